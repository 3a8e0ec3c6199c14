pub mod attachments;
pub mod client;
pub mod folders;
pub mod list;
pub mod mailbox;
pub mod messages;
pub mod models;
pub mod request;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Clock, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, SystemClock};
pub use folders::resolve_folder_name;
pub use list::Pages;
pub use mailbox::MailClient;
pub use models::{
    BodyType, Importance, ListMessagesQuery, OutgoingMessage, SendOutcome, SentDraft,
    UploadSession,
};
pub use request::{
    ApiResponse, Payload, RequestExecutor, RequestOptions, ThrottleState, THROTTLE_HEADER,
    THROTTLE_WARNING_THRESHOLD,
};

use crate::error::{MailError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Unreserved characters stay readable in ids; everything else is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Trims, rejects empty values and path-escapes one identifier.
pub(crate) fn segment(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MailError::validation(format!("{what} is required")));
    }
    Ok(utf8_percent_encode(trimmed, PATH_SEGMENT).to_string())
}

pub(crate) fn message_path(user_id: &str, message_id: &str) -> Result<String> {
    Ok(format!(
        "/users/{}/messages/{}",
        segment(user_id, "user id")?,
        segment(message_id, "message id")?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_escapes_reserved_characters_only() {
        assert_eq!(segment("alice@contoso.com", "user id").unwrap(), "alice%40contoso.com");
        assert_eq!(
            segment("AAMkAGI2TG93AAA=", "message id").unwrap(),
            "AAMkAGI2TG93AAA%3D"
        );
        assert_eq!(segment(" a/b ", "x").unwrap(), "a%2Fb");
        assert_eq!(segment("a-b_c.d~e", "x").unwrap(), "a-b_c.d~e");
    }

    #[test]
    fn segment_rejects_blank_values() {
        let err = segment("  ", "message id").unwrap_err();
        assert!(matches!(err, MailError::Validation(ref m) if m == "message id is required"));
    }

    #[test]
    fn message_path_combines_escaped_ids() {
        assert_eq!(
            message_path("u@x.com", "m/1").unwrap(),
            "/users/u%40x.com/messages/m%2F1"
        );
    }
}
