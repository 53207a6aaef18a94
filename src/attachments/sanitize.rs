//! Filename sanitization for untrusted attachment names.
//!
//! Output contains only `[a-zA-Z0-9._-]`, never starts with a dot, has no
//! runs of `_`, and keeps a clean alphanumeric extension intact. The function
//! is idempotent.

/// Maximum length of the base name (extension excluded).
pub const MAX_BASE_LEN: usize = 200;

/// Used when nothing of the original base name survives.
pub const FALLBACK_BASE: &str = "attachment";

/// Sanitize an attachment filename.
pub fn sanitize_filename(name: &str) -> String {
    let mut current = sanitize_once(name);
    // A pass can expose a new extension (e.g. a trailing "_" trimmed after a
    // dot), so settle to a fixed point. Passes after the first only shrink
    // the string, so this terminates.
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Sanitize a single path segment such as an owner or ingestion id.
///
/// Same character rules as filenames, without extension handling.
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned = clean_base(segment);
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

fn sanitize_once(name: &str) -> String {
    let (base, ext) = split_extension(name);
    let mut base = clean_base(base);
    if base.is_empty() {
        base = FALLBACK_BASE.to_string();
    }
    match ext {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

/// Split on the last dot when the suffix is a plain alphanumeric extension
/// and the dot is not the first character.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &name[idx + 1..];
            if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                (&name[..idx], Some(ext))
            } else {
                (name, None)
            }
        }
        _ => (name, None),
    }
}

fn clean_base(base: &str) -> String {
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = trim_edges(&out);
    // All remaining chars are ASCII, so byte truncation is char truncation.
    let truncated = &trimmed[..trimmed.len().min(MAX_BASE_LEN)];
    trim_edges(truncated).to_string()
}

fn trim_edges(s: &str) -> &str {
    s.trim_start_matches(['_', '.']).trim_end_matches('_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_clean(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    }

    #[test]
    fn resume_with_accents_and_parens() {
        let out = sanitize_filename("My Résumé (final)v2.pdf");
        assert_eq!(out, "My_R_sum_final_v2.pdf");
        assert!(is_clean(&out));
        assert!(!out.contains("__"));
        assert!(out.ends_with(".pdf"));
    }

    #[test]
    fn strips_path_separators_and_control_chars() {
        for name in [
            "../../etc/passwd.txt",
            "..\\..\\windows\\system32.dll",
            "evil\u{0}name\r\n.pdf",
            "a/b\\c\td.docx",
        ] {
            let out = sanitize_filename(name);
            assert!(is_clean(&out), "{name:?} -> {out:?}");
            assert!(!out.contains('/') && !out.contains('\\'));
            assert!(!out.starts_with('.'));
            let ext = name.rsplit('.').next().unwrap();
            assert!(out.ends_with(&format!(".{ext}")), "{name:?} -> {out:?}");
        }
    }

    #[test]
    fn idempotent_on_awkward_inputs() {
        let long_plain = "z".repeat(300);
        let long_spaced = format!("{}.pdf", "long name ".repeat(40));
        let long_exposed = format!("{}.p é", "a".repeat(198));
        for name in [
            "My Résumé (final)v2.pdf",
            "a .pé",
            "a_.p q",
            "___",
            "",
            "..",
            ".bashrc",
            "file.",
            "foo.tar gz",
            "report..pdf",
            "日本語.xlsx",
            "x.ab/c",
            long_plain.as_str(),
            long_spaced.as_str(),
            long_exposed.as_str(),
        ] {
            let once = sanitize_filename(name);
            assert_eq!(sanitize_filename(&once), once, "not idempotent for {name:?}");
            assert!(is_clean(&once));
            assert!(!once.is_empty());
        }
    }

    #[test]
    fn empty_base_gets_fallback() {
        assert_eq!(sanitize_filename("###.pdf"), "attachment.pdf");
        assert_eq!(sanitize_filename(""), "attachment");
        assert_eq!(sanitize_filename(".."), "attachment");
    }

    #[test]
    fn truncates_base_but_keeps_extension() {
        let out = sanitize_filename(&format!("{}.pdf", "a".repeat(500)));
        assert_eq!(out.len(), MAX_BASE_LEN + ".pdf".len());
        assert!(out.ends_with(".pdf"));
    }

    #[test]
    fn collapses_underscore_runs() {
        assert_eq!(sanitize_filename("a   b___c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("__lead and trail__.csv"), "lead_and_trail.csv");
    }

    #[test]
    fn non_alphanumeric_suffix_is_not_an_extension() {
        assert_eq!(sanitize_filename("foo.tar gz"), "foo.tar_gz");
    }

    #[test]
    fn segment_sanitization() {
        assert_eq!(sanitize_segment("94a7b7f0-3266-4a4f"), "94a7b7f0-3266-4a4f");
        assert_eq!(sanitize_segment("../owner"), "owner");
        assert_eq!(sanitize_segment("///"), "unknown");
    }
}
