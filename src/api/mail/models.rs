use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Content type of a message body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    #[default]
    #[serde(rename = "Text")]
    Text,
    #[serde(rename = "HTML")]
    Html,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

/// A message to send or save as a draft.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutgoingMessage {
    pub subject: String,
    pub body: String,
    pub body_type: BodyType,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub importance: Importance,
}

impl OutgoingMessage {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    pub fn html(mut self) -> Self {
        self.body_type = BodyType::Html;
        self
    }

    pub fn importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    /// The Graph `message` resource for this draft.
    pub(crate) fn to_resource(&self) -> MessageResource {
        MessageResource {
            subject: self.subject.clone(),
            body: ItemBody {
                content_type: self.body_type,
                content: self.body.clone(),
            },
            to_recipients: recipients(&self.to),
            cc_recipients: recipients(&self.cc),
            bcc_recipients: recipients(&self.bcc),
            importance: self.importance,
            attachments: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageResource {
    pub subject: String,
    pub body: ItemBody,
    pub to_recipients: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc_recipients: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc_recipients: Vec<Recipient>,
    pub importance: Importance,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<FileAttachment>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ItemBody {
    pub content_type: BodyType,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Recipient {
    pub email_address: EmailAddress,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct EmailAddress {
    pub address: String,
}

pub(crate) fn recipients(addresses: &[String]) -> Vec<Recipient> {
    addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(|address| Recipient {
            email_address: EmailAddress {
                address: address.to_string(),
            },
        })
        .collect()
}

/// Inline `fileAttachment` carrying base64 content.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileAttachment {
    #[serde(rename = "@odata.type")]
    pub odata_type: &'static str,
    pub name: String,
    pub content_type: String,
    pub content_bytes: String,
}

/// `sendMail` request body.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMailRequest {
    pub message: MessageResource,
    pub save_to_sent_items: bool,
}

/// Active upload session for one large attachment.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadSession {
    pub upload_url: String,
    pub expiration: Option<DateTime<Utc>>,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadSessionDto {
    pub upload_url: Option<String>,
    pub expiration_date_time: Option<DateTime<Utc>>,
}

/// OData options for listing messages in a folder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListMessagesQuery {
    pub top: Option<u32>,
    pub skip: Option<u32>,
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub order_by: Option<String>,
    pub search: Option<String>,
    /// Follow next links and return every page instead of the first one.
    pub all_pages: bool,
}

/// Result of the draft/upload/send workflow.
#[derive(Clone, Debug, PartialEq)]
pub struct SentDraft {
    pub message_id: String,
    /// Metadata of each created attachment, in input order.
    pub attachments: Vec<Value>,
}

/// How `send_mail` delivered the message.
#[derive(Clone, Debug, PartialEq)]
pub enum SendOutcome {
    /// Accepted by `sendMail` (202); no message id is returned.
    Accepted,
    /// Sent through a draft because an attachment needed an upload session.
    /// A copy is always saved to Sent Items.
    SentFromDraft(SentDraft),
}
