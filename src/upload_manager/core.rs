use super::session::{create_upload_session, upload_in_chunks, ProgressCallback};
use crate::api::mail::{
    attachments::{attach_inline, inspect_attachment, needs_upload_session, LocalAttachment},
    client::recover_lock,
    message_path,
    messages::validate_outgoing,
    models::{OutgoingMessage, SentDraft, UploadSession},
    request::RequestExecutor,
    segment,
};
use crate::error::{MailError, Result};
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::{debug, info, warn};

/// Where the draft workflow currently stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkflowState {
    /// No draft exists yet, or the draft was just created.
    Draft,
    /// Uploading the attachment at this index.
    Attaching(usize),
    Sent,
    Failed,
}

/// Sends messages with large attachments: create a draft, attach every file
/// (inline or through an upload session), then send the draft.
///
/// A failed workflow leaves the draft in the mailbox.
pub struct UploadSessionManager<'a> {
    executor: &'a RequestExecutor,
    chunk_size: usize,
    state: Mutex<WorkflowState>,
    draft_id: Mutex<Option<String>>,
}

impl<'a> UploadSessionManager<'a> {
    pub fn new(executor: &'a RequestExecutor, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(MailError::validation("upload chunk size must be positive"));
        }
        Ok(Self {
            executor,
            chunk_size,
            state: Mutex::new(WorkflowState::Draft),
            draft_id: Mutex::new(None),
        })
    }

    pub fn state(&self) -> WorkflowState {
        recover_lock(&self.state).clone()
    }

    /// Id of the draft created by the last workflow run, if one got that far.
    pub fn draft_id(&self) -> Option<String> {
        recover_lock(&self.draft_id).clone()
    }

    /// Runs the whole draft workflow. Every file is checked for existence and
    /// size before the first request, so a bad path costs no HTTP calls.
    pub fn send_with_attachments(
        &self,
        user_id: &str,
        message: &OutgoingMessage,
        files: &[PathBuf],
        progress: Option<ProgressCallback>,
    ) -> Result<SentDraft> {
        validate_outgoing(message)?;
        segment(user_id, "user id")?;
        let attachments = files
            .iter()
            .map(|path| inspect_attachment(path))
            .collect::<Result<Vec<_>>>()?;

        self.transition(WorkflowState::Draft);
        *recover_lock(&self.draft_id) = None;

        let mut progress = progress;
        match self.run(user_id, message, &attachments, &mut progress) {
            Ok(sent) => {
                self.transition(WorkflowState::Sent);
                info!(draft = %sent.message_id, attachments = sent.attachments.len(), "draft sent");
                Ok(sent)
            }
            Err(err) => {
                let failed_at = self.state();
                self.transition(WorkflowState::Failed);
                warn!(
                    draft = ?self.draft_id(),
                    state = ?failed_at,
                    error = %err,
                    "draft workflow failed; draft left in mailbox"
                );
                Err(err)
            }
        }
    }

    /// Opens an upload session for `file` on an existing message.
    pub fn create_upload_session(
        &self,
        user_id: &str,
        message_id: &str,
        file: &Path,
    ) -> Result<UploadSession> {
        let attachment = inspect_attachment(file)?;
        create_upload_session(
            self.executor,
            &message_path(user_id, message_id)?,
            &attachment,
        )
    }

    /// Uploads one file to an existing message through an upload session,
    /// regardless of its size. Returns the attachment metadata from the
    /// final chunk.
    pub fn upload_attachment(
        &self,
        user_id: &str,
        message_id: &str,
        file: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<Value> {
        let session = self.create_upload_session(user_id, message_id, file)?;
        let mut progress = progress;
        upload_in_chunks(self.executor, &session, self.chunk_size, &mut progress)
    }

    fn run(
        &self,
        user_id: &str,
        message: &OutgoingMessage,
        attachments: &[LocalAttachment],
        progress: &mut Option<ProgressCallback>,
    ) -> Result<SentDraft> {
        let draft_id = self.create_draft(user_id, message)?;
        *recover_lock(&self.draft_id) = Some(draft_id.clone());
        let path = message_path(user_id, &draft_id)?;

        let mut created = Vec::with_capacity(attachments.len());
        for (index, attachment) in attachments.iter().enumerate() {
            self.transition(WorkflowState::Attaching(index));
            let metadata = if needs_upload_session(attachment.size) {
                let session = create_upload_session(self.executor, &path, attachment)?;
                upload_in_chunks(self.executor, &session, self.chunk_size, progress)?
            } else {
                attach_inline(self.executor, &path, attachment)?
            };
            created.push(metadata);
        }

        self.executor.post(&format!("{path}/send"), None)?;
        Ok(SentDraft {
            message_id: draft_id,
            attachments: created,
        })
    }

    fn create_draft(&self, user_id: &str, message: &OutgoingMessage) -> Result<String> {
        let path = format!("/users/{}/messages", segment(user_id, "user id")?);
        let body = serde_json::to_value(message.to_resource())
            .map_err(|e| MailError::validation(format!("failed to encode draft: {e}")))?;
        let draft = self.executor.post(&path, Some(body))?.into_json();
        let id = draft
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| MailError::protocol("draft response without id"))?;
        debug!(draft = %id, "draft created");
        Ok(id.to_string())
    }

    fn transition(&self, next: WorkflowState) {
        let mut state = recover_lock(&self.state);
        if *state != next {
            debug!(from = ?*state, to = ?next, "draft workflow");
            *state = next;
        }
    }
}
