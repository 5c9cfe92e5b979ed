//! File-text extraction seam
//!
//! Extraction of PDF/DOCX/image text is an external collaborator behind
//! the [`TextExtractor`] trait: a pure `extract(bytes, mime) -> text`
//! function. The bundled [`PlainTextExtractor`] handles textual MIME
//! types only; deployments wire richer extractors in at construction.

use crate::error::{CampfireError, Result};

/// Pure text extraction from raw file bytes
pub trait TextExtractor: Send + Sync {
    /// Extract readable text from `bytes` of the given MIME type.
    fn extract(&self, bytes: &[u8], mime: &str) -> Result<String>;
}

/// Default extractor: decodes `text/*`, JSON, and XML payloads as UTF-8
/// (lossy) and rejects everything else.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], mime: &str) -> Result<String> {
        let base = mime.split(';').next().unwrap_or(mime).trim();
        let textual = base.starts_with("text/")
            || matches!(
                base,
                "application/json" | "application/xml" | "application/xhtml+xml"
            );
        if !textual {
            return Err(CampfireError::UnsupportedMime(format!(
                "no extractor for {}",
                base
            ))
            .into());
        }
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Map a filename extension to its claimed MIME type. Unknown extensions
/// return `None` and are rejected by the ingestor.
pub fn mime_for_extension(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" => Some("text/plain"),
        "md" => Some("text/markdown"),
        "pdf" => Some("application/pdf"),
        "doc" | "docx" => {
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        }
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

/// Cheap content sniff: a payload claiming a textual type must not look
/// binary, and well-known binary formats must carry their magic bytes.
pub fn sniff_matches(bytes: &[u8], claimed_mime: &str) -> bool {
    match claimed_mime {
        "text/plain" | "text/markdown" => !bytes.iter().take(4096).any(|b| *b == 0),
        "application/pdf" => bytes.starts_with(b"%PDF"),
        "image/png" => bytes.starts_with(&[0x89, b'P', b'N', b'G']),
        "image/jpeg" => bytes.starts_with(&[0xFF, 0xD8]),
        // DOCX is a zip container; legacy DOC uses the OLE header.
        mime if mime.contains("wordprocessingml") => {
            bytes.starts_with(b"PK") || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0])
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_extractor_decodes_text() {
        let text = PlainTextExtractor
            .extract(b"hello world", "text/plain")
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_plain_extractor_handles_params() {
        let text = PlainTextExtractor
            .extract(b"{}", "application/json; charset=utf-8")
            .unwrap();
        assert_eq!(text, "{}");
    }

    #[test]
    fn test_plain_extractor_rejects_binary_mime() {
        let err = PlainTextExtractor
            .extract(&[0xFF, 0xD8], "image/jpeg")
            .unwrap_err();
        let typed = err.downcast_ref::<CampfireError>().unwrap();
        assert!(matches!(typed, CampfireError::UnsupportedMime(_)));
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(mime_for_extension("rules.txt"), Some("text/plain"));
        assert_eq!(mime_for_extension("README.MD"), Some("text/markdown"));
        assert_eq!(mime_for_extension("spec.pdf"), Some("application/pdf"));
        assert_eq!(mime_for_extension("archive.tar.gz"), None);
        assert_eq!(mime_for_extension("no_extension"), None);
    }

    #[test]
    fn test_sniff_detects_binary_claiming_text() {
        assert!(sniff_matches(b"plain words", "text/plain"));
        assert!(!sniff_matches(&[0x00, 0x01, 0x02], "text/plain"));
    }

    #[test]
    fn test_sniff_checks_magic_bytes() {
        assert!(sniff_matches(b"%PDF-1.7 ...", "application/pdf"));
        assert!(!sniff_matches(b"not a pdf", "application/pdf"));
        assert!(sniff_matches(&[0xFF, 0xD8, 0xFF], "image/jpeg"));
    }
}
