use crate::api::mail::{
    attachments::{upload_session_request, LocalAttachment},
    models::{UploadSession, UploadSessionDto},
    request::{ApiResponse, RequestExecutor, RequestOptions},
};
use crate::error::{MailError, Result};
use reqwest::Method;
use serde_json::Value;
use std::{
    fs::File,
    io::{self, Read},
};
use tracing::debug;

/// Called with `(bytes_uploaded_so_far, total_bytes)` after each chunk.
pub type ProgressCallback = Box<dyn FnMut(u64, u64) + Send>;

/// Asks Graph for a pre-signed upload URL for one attachment of a draft.
pub(crate) fn create_upload_session(
    executor: &RequestExecutor,
    message_path: &str,
    attachment: &LocalAttachment,
) -> Result<UploadSession> {
    let path = format!("{message_path}/attachments/createUploadSession");
    let response = executor
        .post(&path, Some(upload_session_request(attachment)))?
        .into_json();
    let dto: UploadSessionDto = serde_json::from_value(response)
        .map_err(|e| MailError::protocol(format!("failed to parse upload session: {e}")))?;
    let upload_url = dto
        .upload_url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| MailError::protocol("upload session response without uploadUrl"))?;

    debug!(name = %attachment.name, size = attachment.size, expires = ?dto.expiration_date_time, "upload session created");
    Ok(UploadSession {
        upload_url,
        expiration: dto.expiration_date_time,
        file_path: attachment.path.clone(),
        file_size: attachment.size,
        file_name: attachment.name.clone(),
    })
}

/// PUTs the file to the session URL in `chunk_size` pieces and returns the
/// metadata from the final chunk's response.
///
/// The file handle lives only for this call, so it is closed on every exit
/// path, including a failed chunk.
pub(crate) fn upload_in_chunks(
    executor: &RequestExecutor,
    session: &UploadSession,
    chunk_size: usize,
    progress: &mut Option<ProgressCallback>,
) -> Result<Value> {
    let mut file = File::open(&session.file_path)?;
    let total = session.file_size;
    let mut buffer = vec![0u8; chunk_size];
    let mut offset: u64 = 0;
    let mut last = ApiResponse::NoContent;

    while offset < total {
        if let Some(expiration) = session.expiration {
            if executor.clock().now() >= expiration {
                return Err(MailError::protocol(format!(
                    "upload session for {} expired at {expiration}",
                    session.file_name
                )));
            }
        }

        let wanted = (total - offset).min(chunk_size as u64) as usize;
        let read = read_chunk(&mut file, &mut buffer[..wanted])?;
        if read == 0 {
            return Err(MailError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} ended at byte {offset} of {total}",
                    session.file_path.to_string_lossy()
                ),
            )));
        }

        let end = offset + read as u64 - 1;
        let options = RequestOptions::new().content_range(format!("bytes {offset}-{end}/{total}"));
        last = executor.request_raw(Method::PUT, &session.upload_url, &buffer[..read], &options)?;
        offset += read as u64;
        debug!(file = %session.file_name, uploaded = offset, total, "chunk acknowledged");
        if let Some(callback) = progress.as_mut() {
            callback(offset, total);
        }
    }

    Ok(last.into_json())
}

/// Fills `buf` unless the reader hits EOF first; returns the bytes read.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
