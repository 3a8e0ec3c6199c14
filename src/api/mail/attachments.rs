use super::{
    mailbox::MailClient,
    message_path,
    models::FileAttachment,
    request::{ApiResponse, RequestExecutor, RequestOptions},
    segment,
};
use crate::error::{MailError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Files at or above this size go through an upload session.
pub const SMALL_ATTACHMENT_THRESHOLD: u64 = 3 * 1024 * 1024;
/// Hard cap for a single attachment.
pub const MAX_ATTACHMENT_SIZE: u64 = 150 * 1024 * 1024;
const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";
const MAX_NAME_SUFFIX: u32 = 999;

/// A local file validated for attaching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LocalAttachment {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl LocalAttachment {
    /// Reads the whole file into an inline base64 `fileAttachment`.
    pub(crate) fn to_inline(&self) -> Result<FileAttachment> {
        let bytes = fs::read(&self.path)?;
        Ok(FileAttachment {
            odata_type: FILE_ATTACHMENT_TYPE,
            name: self.name.clone(),
            content_type: content_type_for(&self.path).to_string(),
            content_bytes: STANDARD.encode(bytes),
        })
    }
}

pub(crate) fn needs_upload_session(size: u64) -> bool {
    size >= SMALL_ATTACHMENT_THRESHOLD
}

/// Checks existence and the size cap without touching the network.
pub(crate) fn inspect_attachment(path: &Path) -> Result<LocalAttachment> {
    let metadata = fs::metadata(path).map_err(|_| {
        MailError::validation(format!("attachment not found: {}", path.to_string_lossy()))
    })?;
    if !metadata.is_file() {
        return Err(MailError::validation(format!(
            "attachment is not a regular file: {}",
            path.to_string_lossy()
        )));
    }
    let size = metadata.len();
    if size > MAX_ATTACHMENT_SIZE {
        return Err(MailError::validation(format!(
            "attachment {} is {size} bytes; the maximum is {MAX_ATTACHMENT_SIZE}",
            path.to_string_lossy()
        )));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| {
            MailError::validation(format!(
                "attachment path has no file name: {}",
                path.to_string_lossy()
            ))
        })?;
    Ok(LocalAttachment {
        path: path.to_path_buf(),
        name,
        size,
    })
}

/// POSTs one inline attachment to an existing message.
pub(crate) fn attach_inline(
    executor: &RequestExecutor,
    message_path: &str,
    attachment: &LocalAttachment,
) -> Result<Value> {
    let payload = serde_json::to_value(attachment.to_inline()?)
        .map_err(|e| MailError::validation(format!("failed to encode attachment: {e}")))?;
    debug!(name = %attachment.name, size = attachment.size, "adding inline attachment");
    executor
        .post(&format!("{message_path}/attachments"), Some(payload))
        .map(ApiResponse::into_json)
}

/// Best-effort MIME type from the file extension.
pub(crate) fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "eml" => "message/rfc822",
        _ => "application/octet-stream",
    }
}

impl MailClient {
    pub fn list_attachments(&self, user_id: &str, message_id: &str) -> Result<Vec<Value>> {
        let path = format!("{}/attachments", message_path(user_id, message_id)?);
        self.executor().get_all_pages(&path, RequestOptions::default())
    }

    pub fn get_attachment(
        &self,
        user_id: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Value> {
        let path = format!(
            "{}/attachments/{}",
            message_path(user_id, message_id)?,
            segment(attachment_id, "attachment id")?
        );
        self.executor().get(&path, &RequestOptions::default())
    }

    /// Adds a file below the inline threshold to an existing draft.
    pub fn add_attachment(&self, user_id: &str, message_id: &str, file: &Path) -> Result<Value> {
        let attachment = inspect_attachment(file)?;
        if needs_upload_session(attachment.size) {
            return Err(MailError::validation(format!(
                "attachment {} needs an upload session; use uploads().upload_attachment",
                attachment.name
            )));
        }
        attach_inline(self.executor(), &message_path(user_id, message_id)?, &attachment)
    }

    /// Downloads a file attachment into `target_dir` and returns the saved path.
    /// An existing file with the same name is replaced only with `overwrite`;
    /// otherwise the attachment is saved under a numbered name.
    pub fn save_attachment(
        &self,
        user_id: &str,
        message_id: &str,
        attachment_id: &str,
        target_dir: &Path,
        overwrite: bool,
    ) -> Result<PathBuf> {
        let attachment = self.get_attachment(user_id, message_id, attachment_id)?;
        if attachment.get("@odata.type").and_then(Value::as_str) != Some(FILE_ATTACHMENT_TYPE) {
            return Err(MailError::validation(format!(
                "attachment {attachment_id} is not a file attachment"
            )));
        }
        let encoded = attachment
            .get("contentBytes")
            .and_then(Value::as_str)
            .ok_or_else(|| MailError::protocol("file attachment without contentBytes"))?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| MailError::protocol(format!("invalid base64 attachment content: {e}")))?;

        let file_name =
            attachment_file_name(attachment.get("name").and_then(Value::as_str), attachment_id);
        let destination = destination_for(target_dir, &file_name, overwrite)?;

        let mut writer = BufWriter::new(File::create(&destination)?);
        writer.write_all(&bytes)?;
        writer.flush()?;
        info!(path = %destination.to_string_lossy(), bytes = bytes.len(), "attachment saved");
        Ok(destination)
    }
}

/// Local name for a downloaded attachment. Separators, reserved and control
/// characters become `_`; leading dots and trailing dots or spaces are
/// dropped. Names that end up empty fall back to `attachment-<id>`.
fn attachment_file_name(name: Option<&str>, attachment_id: &str) -> String {
    let replaced: String = name
        .unwrap_or_default()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = replaced
        .trim()
        .trim_start_matches('.')
        .trim_end_matches(|c| c == '.' || c == ' ');
    if !cleaned.is_empty() {
        return cleaned.to_string();
    }

    let id: String = attachment_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(16)
        .collect();
    if id.is_empty() {
        "attachment".to_string()
    } else {
        format!("attachment-{id}")
    }
}

/// Where to write `file_name` inside `target_dir`. Without `overwrite` an
/// existing file is kept and the new one is numbered `name (n).ext`.
fn destination_for(target_dir: &Path, file_name: &str, overwrite: bool) -> Result<PathBuf> {
    fs::create_dir_all(target_dir)?;
    let preferred = target_dir.join(file_name);
    if overwrite || !preferred.exists() {
        return Ok(preferred);
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..=MAX_NAME_SUFFIX)
        .map(|n| target_dir.join(format!("{stem} ({n}){extension}")))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| {
            MailError::validation(format!(
                "no free file name for {file_name} in {}",
                target_dir.to_string_lossy()
            ))
        })
}

/// Body of a `createUploadSession` request.
pub(crate) fn upload_session_request(attachment: &LocalAttachment) -> Value {
    json!({
        "AttachmentItem": {
            "attachmentType": "file",
            "name": attachment.name,
            "size": attachment.size,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mail::testing::{test_config, FakeClock, FakeTransport, TEST_BASE};
    use std::sync::Arc;

    fn client(transport: &Arc<FakeTransport>) -> MailClient {
        MailClient::with_transport(test_config(), transport.clone(), FakeClock::new()).unwrap()
    }

    fn sized_file(len: u64) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(len).unwrap();
        file
    }

    #[test]
    fn threshold_boundary_selects_upload_session() {
        assert!(needs_upload_session(SMALL_ATTACHMENT_THRESHOLD));
        assert!(!needs_upload_session(SMALL_ATTACHMENT_THRESHOLD - 1));

        let at = inspect_attachment(sized_file(SMALL_ATTACHMENT_THRESHOLD).path()).unwrap();
        let under = inspect_attachment(sized_file(SMALL_ATTACHMENT_THRESHOLD - 1).path()).unwrap();
        assert!(needs_upload_session(at.size));
        assert!(!needs_upload_session(under.size));
    }

    #[test]
    fn oversized_and_missing_files_fail_validation() {
        let big = sized_file(MAX_ATTACHMENT_SIZE + 1);
        assert!(matches!(
            inspect_attachment(big.path()),
            Err(MailError::Validation(_))
        ));
        let exact = sized_file(MAX_ATTACHMENT_SIZE);
        assert!(inspect_attachment(exact.path()).is_ok());
        assert!(matches!(
            inspect_attachment(Path::new("/no/such/file.bin")),
            Err(MailError::Validation(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            inspect_attachment(dir.path()),
            Err(MailError::Validation(_))
        ));
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for(Path::new("report.PDF")), "application/pdf");
        assert_eq!(content_type_for(Path::new("notes")), "application/octet-stream");
    }

    #[test]
    fn attachment_names_are_made_safe_for_disk() {
        assert_eq!(attachment_file_name(Some("../etc/passwd"), "a1"), "_etc_passwd");
        assert_eq!(attachment_file_name(Some("a:b?.txt"), "a1"), "a_b_.txt");
        assert_eq!(attachment_file_name(Some("invoice.pdf. "), "a1"), "invoice.pdf");
        assert_eq!(attachment_file_name(Some("tab\there.txt"), "a1"), "tab_here.txt");
        assert_eq!(attachment_file_name(Some(".."), "AAMk=/x"), "attachment-AAMkx");
        assert_eq!(attachment_file_name(None, "a-1"), "attachment-a1");
        assert_eq!(attachment_file_name(Some("  "), ""), "attachment");
    }

    #[test]
    fn add_attachment_posts_inline_payload() {
        let transport = FakeTransport::new();
        transport.push_json(201, r#"{"id":"att1","name":"note.txt"}"#);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, b"abc").unwrap();

        let created = client(&transport).add_attachment("u1", "d1", &path).unwrap();
        assert_eq!(created["id"], json!("att1"));
        let request = &transport.requests()[0];
        assert_eq!(request.url, format!("{TEST_BASE}/users/u1/messages/d1/attachments"));
        let body: Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "@odata.type": "#microsoft.graph.fileAttachment",
                "name": "note.txt",
                "contentType": "text/plain",
                "contentBytes": "YWJj"
            })
        );
    }

    #[test]
    fn add_attachment_refuses_large_files() {
        let transport = FakeTransport::new();
        let big = sized_file(SMALL_ATTACHMENT_THRESHOLD);
        assert!(matches!(
            client(&transport).add_attachment("u1", "d1", big.path()),
            Err(MailError::Validation(_))
        ));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn save_attachment_decodes_content() {
        let transport = FakeTransport::new();
        transport.push_json(
            200,
            r##"{"@odata.type":"#microsoft.graph.fileAttachment","id":"a1","name":"q3/report.txt","contentBytes":"aGVsbG8gd29ybGQ="}"##,
        );
        let dir = tempfile::tempdir().unwrap();

        let saved = client(&transport)
            .save_attachment("u1", "m1", "a1", dir.path(), false)
            .unwrap();
        assert_eq!(saved, dir.path().join("q3_report.txt"));
        assert_eq!(fs::read(&saved).unwrap(), b"hello world");
        assert_eq!(
            transport.requests()[0].url,
            format!("{TEST_BASE}/users/u1/messages/m1/attachments/a1")
        );
    }

    #[test]
    fn save_attachment_keeps_existing_file_unless_overwriting() {
        let transport = FakeTransport::new();
        let body = r##"{"@odata.type":"#microsoft.graph.fileAttachment","name":"a.txt","contentBytes":"eA=="}"##;
        transport.push_json(200, body);
        transport.push_json(200, body);
        transport.push_json(200, body);
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"old").unwrap();
        let client = client(&transport);

        let first = client
            .save_attachment("u1", "m1", "a1", dir.path(), false)
            .unwrap();
        let second = client
            .save_attachment("u1", "m1", "a1", dir.path(), false)
            .unwrap();
        assert_eq!(first, dir.path().join("a (1).txt"));
        assert_eq!(second, dir.path().join("a (2).txt"));
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"old");
        assert_eq!(fs::read(&first).unwrap(), b"x");

        let replaced = client
            .save_attachment("u1", "m1", "a1", dir.path(), true)
            .unwrap();
        assert_eq!(replaced, dir.path().join("a.txt"));
        assert_eq!(fs::read(&replaced).unwrap(), b"x");
    }

    #[test]
    fn save_attachment_rejects_item_attachments() {
        let transport = FakeTransport::new();
        transport.push_json(
            200,
            r##"{"@odata.type":"#microsoft.graph.itemAttachment","name":"Meeting"}"##,
        );
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            client(&transport).save_attachment("u1", "m1", "a1", dir.path(), false),
            Err(MailError::Validation(_))
        ));
    }

    #[test]
    fn upload_session_request_wraps_attachment_item() {
        let attachment = LocalAttachment {
            path: PathBuf::from("/tmp/big.zip"),
            name: "big.zip".to_string(),
            size: 10,
        };
        assert_eq!(
            upload_session_request(&attachment),
            json!({"AttachmentItem": {"attachmentType": "file", "name": "big.zip", "size": 10}})
        );
    }
}
