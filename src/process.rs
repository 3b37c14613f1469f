//! Per-request pipeline: uploads → attachments → prompt → completion.
//!
//! Each upload is loaded on its own. A file that fails to load is logged
//! and dropped; the rest of the batch carries on. The completion outcome,
//! good or bad, is returned as data inside [`ProcessResponse`].

use serde::Serialize;

use crate::attachment::{load_attachment, LoadOptions};
use crate::classify::sanitize_filename;
use crate::completion::{analyze_mail, CompletionClient};
use crate::models::{AnalysisResult, Attachment};

/// Mail id used when the request does not name one.
pub const DEFAULT_MAIL_ID: &str = "mail_001";

/// One raw uploaded file, name as the client sent it.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Body of a `/process` reply.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResponse {
    pub status: &'static str,
    pub mail_id: String,
    pub total_attachments: usize,
    pub result: AnalysisResult,
}

/// Loads every upload, keeping the ones that succeed in upload order.
///
/// Failures are logged and skipped. Uploads with an empty filename are
/// ignored silently.
pub fn collect_attachments<I>(uploads: I, options: LoadOptions) -> Vec<Attachment>
where
    I: IntoIterator<Item = Upload>,
{
    let mut attachments = Vec::new();
    for upload in uploads {
        if upload.filename.is_empty() {
            continue;
        }

        tracing::info!(file = %upload.filename, bytes = upload.bytes.len(), "processing attachment");
        let filename = sanitize_filename(&upload.filename);
        match load_attachment(&filename, &upload.bytes, options) {
            Ok(a) => attachments.push(a),
            Err(e) => {
                tracing::warn!(file = %upload.filename, error = %e, "dropping attachment");
            }
        }
    }
    attachments
}

/// Runs the completion for a mail and wraps the outcome for the caller.
pub async fn process_mail(
    client: &dyn CompletionClient,
    mail_id: &str,
    attachments: &[Attachment],
) -> ProcessResponse {
    tracing::info!(
        mail_id,
        attachments = attachments.len(),
        model = client.model_name(),
        "analyzing mail"
    );
    let result = analyze_mail(client, mail_id, attachments).await;
    ProcessResponse {
        status: "completed",
        mail_id: mail_id.to_string(),
        total_attachments: attachments.len(),
        result,
    }
}

/// `mail_id` form value, or the default when the field is absent.
pub fn resolve_mail_id(raw: Option<String>) -> String {
    raw.unwrap_or_else(|| DEFAULT_MAIL_ID.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, bytes: &[u8]) -> Upload {
        Upload {
            filename: name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn bad_files_dropped_good_ones_kept_in_order() {
        let uploads = vec![
            upload("a.txt", b"alpha"),
            upload("evil.exe", b"MZ"),
            upload("", b"nameless"),
            upload("bad.txt", &[0xff, 0xfe]),
            upload("pic.png", &[0x89, b'P', b'N', b'G']),
        ];
        let atts = collect_attachments(uploads, LoadOptions::default());
        let names: Vec<_> = atts.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "pic.png"]);
        assert!(atts[1].is_image);
    }

    #[test]
    fn uploaded_names_are_sanitized() {
        let atts = collect_attachments(
            vec![upload("../inbox/My Invoice.txt", b"x")],
            LoadOptions::default(),
        );
        assert_eq!(atts[0].filename, "inbox_My_Invoice.txt");
    }

    #[test]
    fn mail_id_defaults() {
        assert_eq!(resolve_mail_id(None), "mail_001");
        assert_eq!(resolve_mail_id(Some(String::new())), "");
        assert_eq!(resolve_mail_id(Some("m9".into())), "m9");
    }
}
