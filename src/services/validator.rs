//! Content gatekeeping for uploads.
//!
//! The stored type is always derived from the bytes themselves. A caller's
//! declared MIME type or file extension is only a hint and never decides
//! what an object is cataloged as.

use tracing::{debug, warn};

use crate::errors::UploadError;

/// A content type the pipeline accepts, with its canonical extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedType {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

impl AcceptedType {
    pub const JPEG: AcceptedType = AcceptedType { mime_type: "image/jpeg", extension: "jpg" };
    pub const PNG: AcceptedType = AcceptedType { mime_type: "image/png", extension: "png" };
    pub const GIF: AcceptedType = AcceptedType { mime_type: "image/gif", extension: "gif" };
    pub const WEBP: AcceptedType = AcceptedType { mime_type: "image/webp", extension: "webp" };
    pub const SVG: AcceptedType = AcceptedType { mime_type: "image/svg+xml", extension: "svg" };

    /// Vector formats get no raster derivatives.
    pub fn is_vector(&self) -> bool {
        *self == AcceptedType::SVG
    }

    /// Formats whose derivatives keep an alpha channel.
    pub fn keeps_alpha(&self) -> bool {
        matches!(self.extension, "png" | "gif" | "webp")
    }
}

const ALLOWED_TYPES: &[AcceptedType] = &[
    AcceptedType::JPEG,
    AcceptedType::PNG,
    AcceptedType::GIF,
    AcceptedType::WEBP,
    AcceptedType::SVG,
];

/// Look up an allowed type by its canonical MIME string.
pub fn accepted_type_for_mime(mime_type: &str) -> Option<AcceptedType> {
    ALLOWED_TYPES.iter().copied().find(|t| t.mime_type == mime_type)
}

/// Detect the content type from leading bytes. SVG is checked first since
/// `infer` reports any document with an XML declaration as `text/xml`.
pub fn sniff_mime_type(head: &[u8]) -> Option<&'static str> {
    if looks_like_svg(head) {
        return Some(AcceptedType::SVG.mime_type);
    }
    infer::get(head).map(|kind| kind.mime_type())
}

/// Recognise an SVG document by its root element. Skips a BOM, whitespace,
/// the XML declaration, processing instructions, comments and a doctype.
pub fn looks_like_svg(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    let mut rest = text.trim_start_matches('\u{feff}');

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("<?") {
            match after.find("?>") {
                Some(end) => rest = &after[end + 2..],
                None => return false,
            }
        } else if let Some(after) = rest.strip_prefix("<!--") {
            match after.find("-->") {
                Some(end) => rest = &after[end + 3..],
                None => return false,
            }
        } else if rest
            .as_bytes()
            .get(..9)
            .is_some_and(|p| p.eq_ignore_ascii_case(b"<!doctype"))
        {
            match rest.find('>') {
                Some(end) => rest = &rest[end + 1..],
                None => return false,
            }
        } else {
            break;
        }
    }

    let Some(after) = rest.strip_prefix('<') else {
        return false;
    };
    // Allow a namespace prefix such as <svg:svg
    let name: String = after
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == ':' || *c == '-' || *c == '_')
        .collect();
    let local = name.rsplit(':').next().unwrap_or("");
    local.eq_ignore_ascii_case("svg")
}

/// Validate one upload. `declared_size` is the number of bytes actually
/// received, `head` the leading bytes of the content.
pub fn validate(
    declared_size: u64,
    head: &[u8],
    mime_hint: Option<&str>,
    max_bytes: u64,
) -> Result<AcceptedType, UploadError> {
    if declared_size == 0 {
        return Err(UploadError::EmptyFile);
    }
    if declared_size > max_bytes {
        return Err(UploadError::TooLarge {
            size: declared_size,
            max_size: max_bytes,
        });
    }

    let sniffed = sniff_mime_type(head)
        .ok_or_else(|| UploadError::UnsupportedType("unrecognized content".to_string()))?;

    let accepted = accepted_type_for_mime(sniffed)
        .ok_or_else(|| UploadError::UnsupportedType(sniffed.to_string()))?;

    if let Some(hint) = mime_hint {
        let hint = hint.split(';').next().unwrap_or("").trim();
        if !hint.is_empty() && !hint.eq_ignore_ascii_case(accepted.mime_type) {
            warn!(
                "Declared content type '{}' does not match detected '{}', using detected type",
                hint, accepted.mime_type
            );
        }
    }

    debug!("Accepted upload as {} ({} bytes)", accepted.mime_type, declared_size);
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 10 * 1024 * 1024;
    const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const GIF_MAGIC: &[u8] = b"GIF89a\x01\x00\x01\x00";

    #[test]
    fn test_accepts_png() {
        let t = validate(100, PNG_MAGIC, Some("image/png"), MAX).unwrap();
        assert_eq!(t, AcceptedType::PNG);
    }

    #[test]
    fn test_detected_type_wins_over_hint() {
        let t = validate(100, GIF_MAGIC, Some("image/jpeg"), MAX).unwrap();
        assert_eq!(t.mime_type, "image/gif");
        assert_eq!(t.extension, "gif");
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(validate(0, b"", None, MAX), Err(UploadError::EmptyFile)));
    }

    #[test]
    fn test_rejects_oversize_before_sniffing() {
        let err = validate(MAX + 1, b"garbage", None, MAX).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { .. }));
        assert_eq!(err.category(), crate::errors::ErrorCategory::Content);
    }

    #[test]
    fn test_size_at_limit_is_accepted() {
        assert!(validate(MAX, PNG_MAGIC, None, MAX).is_ok());
    }

    #[test]
    fn test_rejects_unsupported_types() {
        let pdf = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3";
        let err = validate(20, pdf, Some("image/png"), MAX).unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedType(ref m) if m == "application/pdf"));

        let text = b"just some text";
        assert!(matches!(
            validate(14, text, None, MAX),
            Err(UploadError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_svg_detection() {
        assert!(looks_like_svg(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>"));
        assert!(looks_like_svg(
            b"\xef\xbb\xbf<?xml version=\"1.0\"?>\n<!-- drawn by hand -->\n<!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.1//EN\" \"x\">\n  <svg width=\"10\"></svg>"
        ));
        assert!(looks_like_svg(b"<svg:svg xmlns:svg=\"http://www.w3.org/2000/svg\"/>"));
        assert!(!looks_like_svg(b"<html><svg></svg></html>"));
        assert!(!looks_like_svg(b"<svgfoo/>"));
        assert!(!looks_like_svg(b"<?xml version=\"1.0\""));
    }

    #[test]
    fn test_multibyte_prolog_does_not_panic() {
        // RIFF size bytes >= 0x80 become U+FFFD when decoded lossily
        let mut webp = b"RIFF\x80\x80\x00\x00WEBPVP8L".to_vec();
        webp.extend_from_slice(&[0x2f, 0, 0, 0, 0, 0, 0, 0]);
        assert!(!looks_like_svg(&webp));
        let t = validate(32904, &webp, Some("image/webp"), MAX).unwrap();
        assert_eq!(t, AcceptedType::WEBP);

        assert!(!looks_like_svg("<abcdefg\u{e9} rest".as_bytes()));
        assert!(!looks_like_svg("<!doctyp\u{e9}>".as_bytes()));
    }

    #[test]
    fn test_svg_is_accepted_as_vector() {
        let t = validate(40, b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>", None, MAX).unwrap();
        assert_eq!(t, AcceptedType::SVG);
        assert!(t.is_vector());
        assert!(!AcceptedType::JPEG.keeps_alpha());
        assert!(AcceptedType::PNG.keeps_alpha());
    }
}
