//! Upload filename classification.
//!
//! Decides whether a filename carries a supported extension and whether it
//! names an image. Matching is a case-insensitive suffix check against fixed
//! lists; nothing here touches file content.

/// Extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    ".txt", ".pdf", ".doc", ".docx", ".png", ".jpg", ".jpeg", ".bmp", ".gif", ".tiff", ".webp",
];

/// Subset of [`ALLOWED_EXTENSIONS`] sent to the model as images.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".bmp", ".gif", ".tiff", ".webp",
];

fn has_suffix(filename: &str, exts: &[&str]) -> bool {
    let lower = filename.to_ascii_lowercase();
    exts.iter().any(|ext| lower.ends_with(ext))
}

pub fn is_allowed_file(filename: &str) -> bool {
    has_suffix(filename, ALLOWED_EXTENSIONS)
}

pub fn is_image_file(filename: &str) -> bool {
    has_suffix(filename, IMAGE_EXTENSIONS)
}

/// MIME type for an image filename, used in `data:` URLs.
///
/// Returns `None` for non-image names.
pub fn image_mime_type(filename: &str) -> Option<&'static str> {
    let lower = filename.to_ascii_lowercase();
    let ext = lower.rsplit('.').next()?;
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// Reduces an uploaded name to a safe flat filename.
///
/// Follows werkzeug's `secure_filename` on POSIX: non-ASCII characters are
/// dropped, `/` and whitespace runs become a single `_`, anything outside
/// `[A-Za-z0-9._-]` is removed, and leading/trailing `.` and `_` are
/// trimmed. May return an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' { ' ' } else { c })
        .collect();
    let joined = ascii
        .split(is_python_whitespace)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    kept.trim_matches(['.', '_']).to_string()
}

/// ASCII whitespace as `str.split()` sees it.
fn is_python_whitespace(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\x0b' || ('\x1c'..='\x1f').contains(&c)
}

/// Allow-list in a stable order for display.
pub fn supported_formats() -> Vec<&'static str> {
    let mut formats = ALLOWED_EXTENSIONS.to_vec();
    formats.sort_unstable();
    formats
}
