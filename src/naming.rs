//! Stored-object naming.
//!
//! Every stored image gets a name of the form `{uuid}_{sanitized}`, where the
//! sanitized part keeps only `[A-Za-z0-9_.-]` from the client's filename.
//! The random prefix makes names collision-resistant for the process
//! lifetime, so concurrent uploads never target the same path or key.

use uuid::Uuid;

/// Placeholder used when the client supplied no usable filename.
pub const PLACEHOLDER_NAME: &str = "untitled_file";

/// Sanitize a client-supplied filename.
///
/// Runs of ASCII whitespace (space, tab, CR, LF, vertical tab, form feed)
/// become a single underscore, then every character outside
/// `[A-Za-z0-9_.-]` is dropped. Absent names, and names with nothing
/// left after stripping, fall back to [`PLACEHOLDER_NAME`].
pub fn sanitize_filename(original: Option<&str>) -> String {
    let Some(original) = original else {
        return PLACEHOLDER_NAME.to_string();
    };

    let mut collapsed = String::with_capacity(original.len());
    let mut in_whitespace = false;
    for c in original.chars() {
        if c.is_ascii_whitespace() || c == '\x0B' {
            if !in_whitespace {
                collapsed.push('_');
            }
            in_whitespace = true;
        } else {
            collapsed.push(c);
            in_whitespace = false;
        }
    }

    let sanitized: String = collapsed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    if sanitized.is_empty() {
        PLACEHOLDER_NAME.to_string()
    } else {
        sanitized
    }
}

/// Generate a unique stored name for an upload.
pub fn unique_name(original: Option<&str>) -> String {
    format!("{}_{}", Uuid::new_v4(), sanitize_filename(original))
}

/// Detect the MIME type of an image from its file extension.
///
/// | Extension | MIME Type |
/// |-----------|-----------|
/// | `.jpg`, `.jpeg` | `image/jpeg` |
/// | `.png` | `image/png` |
/// | `.gif` | `image/gif` |
/// | `.webp` | `image/webp` |
/// | `.svg` | `image/svg+xml` |
/// | `.avif` | `image/avif` |
/// | Other | `application/octet-stream` |
pub fn detect_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ascii_whitespace_becomes_underscore() {
        assert_eq!(sanitize_filename(Some("a\tb\x0Bc\x0Cd\r\ne.png")), "a_b_c_d_e.png");
        // Unicode spaces are stripped like any other non-ASCII character.
        assert_eq!(sanitize_filename(Some("a\u{00A0}b.png")), "ab.png");
        assert_eq!(sanitize_filename(Some("a\u{3000}b.png")), "ab.png");
    }

    #[test]
    fn test_sanitize_whitespace_and_symbols() {
        assert_eq!(sanitize_filename(Some("my photo!@#.png")), "my_photo.png");
    }

    #[test]
    fn test_sanitize_collapses_whitespace_runs() {
        assert_eq!(sanitize_filename(Some("a  \t b.jpg")), "a_b.jpg");
        assert_eq!(sanitize_filename(Some(" lead.jpg")), "_lead.jpg");
    }

    #[test]
    fn test_sanitize_keeps_allowed_punctuation() {
        assert_eq!(sanitize_filename(Some("shoe-2_v1.final.webp")), "shoe-2_v1.final.webp");
    }

    #[test]
    fn test_sanitize_drops_path_separators_and_unicode() {
        assert_eq!(sanitize_filename(Some("../../etc/passwd")), "....etcpasswd");
        assert_eq!(sanitize_filename(Some("café.png")), "caf.png");
    }

    #[test]
    fn test_sanitize_placeholder() {
        assert_eq!(sanitize_filename(None), PLACEHOLDER_NAME);
        assert_eq!(sanitize_filename(Some("!!!")), PLACEHOLDER_NAME);
    }

    #[test]
    fn test_unique_name_shape() {
        let a = unique_name(Some("my photo.png"));
        let b = unique_name(Some("my photo.png"));
        assert_ne!(a, b);
        assert!(a.ends_with("_my_photo.png"));
        // uuid (36 chars) + '_' + name
        assert_eq!(a.len(), 36 + 1 + "my_photo.png".len());
    }

    #[test]
    fn test_detect_content_type() {
        assert_eq!(detect_content_type("x.JPG"), "image/jpeg");
        assert_eq!(detect_content_type("x.png"), "image/png");
        assert_eq!(detect_content_type("noext"), "application/octet-stream");
    }
}
