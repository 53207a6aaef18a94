//! Inbound email parsing and owner routing.
//!
//! Uploads arrive addressed to `upload+<owner-uuid>@<domain>`; the owner is
//! taken from the plus-tag of the first recipient that carries one.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser, MimeHeaders};
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use crate::attachments::AttachmentFile;
use crate::attachments::mime::guess_content_type;
use crate::error::IngestError;

static UPLOAD_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^upload\+([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})@")
        .expect("valid upload address pattern")
});

/// A parsed inbound email.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    pub message_id: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<AttachmentFile>,
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    /// Parse raw RFC 5322 bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, IngestError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| IngestError::Parse("not an RFC 5322 message".to_string()))?;

        let sender = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".into());

        let mut recipients = extract_addresses(parsed.to());
        recipients.extend(extract_addresses(parsed.cc()));
        recipients.extend(extract_addresses(parsed.bcc()));

        let message_id = parsed
            .message_id()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

        let received_at = parsed
            .date()
            .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or_else(Utc::now);

        let attachments = parsed
            .attachments()
            .enumerate()
            .map(|(i, part)| {
                let filename = MimeHeaders::attachment_name(part)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("attachment-{}", i + 1));
                let declared = MimeHeaders::content_type(part).map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                });
                let content_type = match declared {
                    Some(ct) if ct != "application/octet-stream" => ct,
                    _ => guess_content_type(&filename).to_string(),
                };
                AttachmentFile::new(filename, part.contents().to_vec()).with_content_type(content_type)
            })
            .collect::<Vec<_>>();

        let email = Self {
            message_id,
            sender,
            recipients,
            subject: parsed.subject().map(|s| s.to_string()),
            text_body: parsed.body_text(0).map(|s| s.to_string()),
            html_body: parsed.body_html(0).map(|s| s.to_string()),
            attachments,
            received_at,
        };
        debug!(
            message_id = %email.message_id,
            sender = %email.sender,
            attachments = email.attachments.len(),
            "Parsed inbound email"
        );
        Ok(email)
    }

    /// Owner id from the first `upload+<uuid>@` recipient.
    pub fn owner_id(&self) -> Result<String, IngestError> {
        self.recipients
            .iter()
            .find_map(|r| owner_from_recipient(r))
            .ok_or_else(|| IngestError::UnknownOwner {
                recipient: self.recipients.first().cloned().unwrap_or_default(),
            })
    }

    pub fn has_body(&self) -> bool {
        self.html_body.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self.text_body.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Owner uuid from an upload address, lowercased.
pub fn owner_from_recipient(recipient: &str) -> Option<String> {
    UPLOAD_ADDRESS
        .captures(recipient.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn extract_addresses(addr: Option<&Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "94a7b7f0-3266-4a4f-9d4e-875542d30e62";

    fn sample_eml() -> String {
        format!(
            "From: Test Sender <test@example.com>\r\n\
             To: upload+{OWNER}@myhome-tech.com\r\n\
             Subject: Test PDF Browser Fix\r\n\
             Message-ID: <test-browser-fix@example.com>\r\n\
             Date: Mon, 11 Aug 2025 15:10:00 +0000\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
             \r\n\
             --XYZ\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             \r\n\
             <html><body><h1>Test PDF Browser Fix</h1></body></html>\r\n\
             --XYZ\r\n\
             Content-Type: text/plain; name=\"notes.txt\"\r\n\
             Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
             \r\n\
             hello notes\r\n\
             --XYZ--\r\n"
        )
    }

    #[test]
    fn parses_headers_body_and_attachments() {
        let email = InboundEmail::parse(sample_eml().as_bytes()).unwrap();

        assert_eq!(email.sender, "test@example.com");
        assert_eq!(email.subject.as_deref(), Some("Test PDF Browser Fix"));
        assert_eq!(email.message_id, "test-browser-fix@example.com");
        assert!(email.html_body.as_deref().unwrap().contains("<h1>"));
        assert!(email.has_body());

        assert_eq!(email.attachments.len(), 1);
        let att = &email.attachments[0];
        assert_eq!(att.filename, "notes.txt");
        assert_eq!(att.content_type.as_deref(), Some("text/plain"));
        assert!(String::from_utf8_lossy(&att.bytes).contains("hello notes"));
    }

    #[test]
    fn owner_from_upload_address() {
        let email = InboundEmail::parse(sample_eml().as_bytes()).unwrap();
        assert_eq!(email.owner_id().unwrap(), OWNER);

        assert_eq!(
            owner_from_recipient(&format!("UPLOAD+{}@x.io", OWNER.to_uppercase())).as_deref(),
            Some(OWNER)
        );
        assert!(owner_from_recipient("someone@example.com").is_none());
        assert!(owner_from_recipient("upload+not-a-uuid@example.com").is_none());
    }

    #[test]
    fn unknown_owner_is_rejected() {
        let raw = "From: a@example.com\r\nTo: inbox@example.com\r\nSubject: hi\r\n\r\nbody\r\n";
        let email = InboundEmail::parse(raw.as_bytes()).unwrap();
        let err = email.owner_id().unwrap_err();
        assert!(matches!(err, IngestError::UnknownOwner { ref recipient } if recipient == "inbox@example.com"));
        assert!(email.message_id.starts_with("gen-"));
    }
}
