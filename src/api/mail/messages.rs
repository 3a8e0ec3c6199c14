use super::{
    attachments::{inspect_attachment, needs_upload_session},
    folders::resolve_folder_name,
    mailbox::MailClient,
    message_path,
    models::{recipients, ListMessagesQuery, OutgoingMessage, SendMailRequest, SendOutcome},
    request::{ApiResponse, Payload, RequestOptions},
    segment,
};
use crate::error::{MailError, Result};
use reqwest::Method;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info};

impl MailClient {
    /// Messages of one folder. Only the first page unless `all_pages` is set.
    pub fn list_messages(
        &self,
        user_id: &str,
        folder: &str,
        query: &ListMessagesQuery,
    ) -> Result<Vec<Value>> {
        let path = format!(
            "/users/{}/mailFolders/{}/messages",
            segment(user_id, "user id")?,
            segment(&resolve_folder_name(folder), "folder")?
        );
        let options = list_options(query);
        if query.all_pages {
            return self.executor().get_all_pages(&path, options);
        }
        self.executor()
            .pages(&path, options)
            .next()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    pub fn get_message(&self, user_id: &str, message_id: &str) -> Result<Value> {
        let path = message_path(user_id, message_id)?;
        self.executor().get(&path, &RequestOptions::default())
    }

    pub fn mark_read(&self, user_id: &str, message_id: &str, is_read: bool) -> Result<Value> {
        let path = message_path(user_id, message_id)?;
        self.executor()
            .request(
                Method::PATCH,
                &path,
                Some(Payload::Json(json!({ "isRead": is_read }))),
                &RequestOptions::default(),
            )
            .map(ApiResponse::into_json)
    }

    /// Moves a message; `destination` may be a well-known name or a folder id.
    /// Returns the moved copy, which carries a new id unless immutable ids are on.
    pub fn move_message(&self, user_id: &str, message_id: &str, destination: &str) -> Result<Value> {
        if destination.trim().is_empty() {
            return Err(MailError::validation("destination folder is required"));
        }
        let path = format!("{}/move", message_path(user_id, message_id)?);
        let body = json!({ "destinationId": resolve_folder_name(destination) });
        self.executor()
            .post(&path, Some(body))
            .map(ApiResponse::into_json)
    }

    pub fn delete_message(&self, user_id: &str, message_id: &str) -> Result<()> {
        let path = message_path(user_id, message_id)?;
        self.executor()
            .request(Method::DELETE, &path, None, &RequestOptions::default())?;
        Ok(())
    }

    /// Sends a message. Attachments under the inline threshold go out in one
    /// `sendMail` call; if any file needs an upload session the whole send
    /// switches to the draft workflow.
    ///
    /// Sending a draft always keeps a copy in Sent Items, so the draft
    /// workflow is refused with `save_to_sent_items == false`.
    pub fn send_mail(
        &self,
        user_id: &str,
        message: &OutgoingMessage,
        attachments: &[PathBuf],
        save_to_sent_items: bool,
    ) -> Result<SendOutcome> {
        validate_outgoing(message)?;
        let inspected = attachments
            .iter()
            .map(|path| inspect_attachment(path))
            .collect::<Result<Vec<_>>>()?;

        if inspected.iter().any(|a| needs_upload_session(a.size)) {
            if !save_to_sent_items {
                return Err(MailError::validation(
                    "attachments of 3 MiB or more are sent from a draft, which always saves to Sent Items",
                ));
            }
            debug!(attachments = inspected.len(), "large attachment present; using draft workflow");
            let sent = self
                .uploads()?
                .send_with_attachments(user_id, message, attachments, None)?;
            return Ok(SendOutcome::SentFromDraft(sent));
        }

        let mut resource = message.to_resource();
        resource.attachments = inspected
            .iter()
            .map(|a| a.to_inline())
            .collect::<Result<Vec<_>>>()?;
        let body = serde_json::to_value(SendMailRequest {
            message: resource,
            save_to_sent_items,
        })
        .map_err(|e| MailError::validation(format!("failed to encode message: {e}")))?;

        let path = format!("/users/{}/sendMail", segment(user_id, "user id")?);
        let response = self.executor().post(&path, Some(body))?;
        if !response.is_accepted() {
            debug!(?response, "sendMail answered without 202");
        }
        info!(user = %user_id, "message submitted via sendMail");
        Ok(SendOutcome::Accepted)
    }

    /// Saves a draft and returns the created message resource.
    pub fn create_draft(&self, user_id: &str, message: &OutgoingMessage) -> Result<Value> {
        let path = format!("/users/{}/messages", segment(user_id, "user id")?);
        let body = serde_json::to_value(message.to_resource())
            .map_err(|e| MailError::validation(format!("failed to encode draft: {e}")))?;
        self.executor()
            .post(&path, Some(body))
            .map(ApiResponse::into_json)
    }

    pub fn send_draft(&self, user_id: &str, message_id: &str) -> Result<()> {
        let path = format!("{}/send", message_path(user_id, message_id)?);
        self.executor().post(&path, None)?;
        Ok(())
    }

    pub fn reply(&self, user_id: &str, message_id: &str, comment: &str) -> Result<()> {
        let path = format!("{}/reply", message_path(user_id, message_id)?);
        self.executor()
            .post(&path, Some(json!({ "comment": comment })))?;
        Ok(())
    }

    pub fn reply_all(&self, user_id: &str, message_id: &str, comment: &str) -> Result<()> {
        let path = format!("{}/replyAll", message_path(user_id, message_id)?);
        self.executor()
            .post(&path, Some(json!({ "comment": comment })))?;
        Ok(())
    }

    pub fn forward(
        &self,
        user_id: &str,
        message_id: &str,
        to: &[String],
        comment: &str,
    ) -> Result<()> {
        let to_recipients = recipients(to);
        if to_recipients.is_empty() {
            return Err(MailError::validation("forward requires at least one recipient"));
        }
        let path = format!("{}/forward", message_path(user_id, message_id)?);
        let body = json!({ "comment": comment, "toRecipients": to_recipients });
        self.executor().post(&path, Some(body))?;
        Ok(())
    }
}

pub(crate) fn validate_outgoing(message: &OutgoingMessage) -> Result<()> {
    let has_recipient = message
        .to
        .iter()
        .chain(&message.cc)
        .chain(&message.bcc)
        .any(|a| !a.trim().is_empty());
    if !has_recipient {
        return Err(MailError::validation("at least one recipient is required"));
    }
    Ok(())
}

fn list_options(query: &ListMessagesQuery) -> RequestOptions {
    let mut options = RequestOptions::new();
    if let Some(top) = query.top {
        options = options.query("$top", top.to_string());
    }
    if let Some(skip) = query.skip {
        options = options.query("$skip", skip.to_string());
    }
    if let Some(filter) = query.filter.as_deref().filter(|f| !f.trim().is_empty()) {
        options = options.query("$filter", filter);
    }
    if !query.select.is_empty() {
        options = options.query("$select", query.select.join(","));
    }
    if let Some(order_by) = query.order_by.as_deref().filter(|o| !o.trim().is_empty()) {
        options = options.query("$orderby", order_by);
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        // Graph expects the search term in double quotes.
        let quoted = if search.starts_with('"') && search.ends_with('"') && search.len() > 1 {
            search.to_string()
        } else {
            format!("\"{search}\"")
        };
        options = options.query("$search", quoted);
    }
    options
}
