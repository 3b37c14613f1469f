//! Content loader: turns an uploaded file into an [`Attachment`].
//!
//! Images are base64-encoded; everything else must decode as UTF-8 text.
//! Every failure comes back as a [`LoadError`] naming the file so the
//! caller can log it and drop that file without failing the request.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::path::Path;

use crate::classify::{is_allowed_file, is_image_file, sanitize_filename};
use crate::extract;
use crate::models::Attachment;

/// Why an upload could not become an [`Attachment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Extension not on the allow-list. Carries the filename.
    Unsupported(String),
    /// Non-image bytes that are not valid UTF-8. Carries the filename.
    NotUtf8(String),
    /// Anything else (read failure, extractor crash). Carries the message.
    Io(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Unsupported(name) => write!(f, "File type not supported: {}", name),
            LoadError::NotUtf8(name) => {
                write!(f, "Could not decode file as UTF-8 text: {}", name)
            }
            LoadError::Io(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for LoadError {}

/// Loader knobs, taken from `[attachments]` in the config.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Fall back to PDF/DOCX text extraction when UTF-8 decoding fails.
    pub extract_documents: bool,
}

/// Builds an [`Attachment`] from raw bytes and an already-sanitized filename.
pub fn load_attachment(
    filename: &str,
    bytes: &[u8],
    options: LoadOptions,
) -> Result<Attachment, LoadError> {
    if !is_allowed_file(filename) {
        return Err(LoadError::Unsupported(filename.to_string()));
    }

    let is_image = is_image_file(filename);
    let content = if is_image {
        STANDARD.encode(bytes)
    } else {
        decode_text(filename, bytes, options)?
    };

    Ok(Attachment {
        filename: filename.to_string(),
        content,
        is_image,
    })
}

fn decode_text(filename: &str, bytes: &[u8], options: LoadOptions) -> Result<String, LoadError> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) if options.extract_documents && extract::can_extract(filename) => {
            match std::panic::catch_unwind(|| extract::extract_text(filename, bytes)) {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => {
                    tracing::debug!(file = filename, error = %e, "text extraction failed");
                    Err(LoadError::NotUtf8(filename.to_string()))
                }
                Err(_) => Err(LoadError::Io(format!(
                    "text extractor crashed on {}",
                    filename
                ))),
            }
        }
        Err(_) => Err(LoadError::NotUtf8(filename.to_string())),
    }
}

/// Reads a local file and loads it under its sanitized basename.
pub async fn load_path(path: &Path, options: LoadOptions) -> Result<Attachment, LoadError> {
    let raw_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filename = sanitize_filename(&raw_name);
    if !is_allowed_file(&filename) {
        return Err(LoadError::Unsupported(filename));
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| LoadError::Io(format!("{}: {}", path.display(), e)))?;
    load_attachment(&filename, &bytes, options)
}
