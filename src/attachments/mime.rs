//! Content-type helpers for attachments.

/// Fallback content type for unknown extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess a content type from the filename extension.
pub fn guess_content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "rtf" => "application/rtf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "eml" => "message/rfc822",
        _ => OCTET_STREAM,
    }
}

/// Normalize a declared content type (drops parameters, lowercases).
pub fn normalize_content_type(declared: &str) -> String {
    declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_pdf(content_type: &str) -> bool {
    content_type == "application/pdf"
}

/// Raster images the OCR path can decode and compress.
pub fn is_ocr_image(content_type: &str) -> bool {
    matches!(
        content_type,
        "image/png" | "image/jpeg" | "image/tiff" | "image/webp"
    )
}

/// Whether a conversion engine can turn this type into a PDF.
pub fn is_convertible(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.starts_with("image/")
        || content_type.starts_with("application/vnd.openxmlformats-officedocument.")
        || content_type.starts_with("application/vnd.oasis.opendocument.")
        || matches!(
            content_type,
            "application/msword"
                | "application/vnd.ms-excel"
                | "application/vnd.ms-powerpoint"
                | "application/rtf"
        )
}

/// Detect an encrypted PDF by its `/Encrypt` trailer entry.
pub fn is_password_protected_pdf(bytes: &[u8]) -> bool {
    const MARKER: &[u8] = b"/Encrypt";
    bytes.starts_with(b"%PDF") && bytes.windows(MARKER.len()).any(|w| w == MARKER)
}
