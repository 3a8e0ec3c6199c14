//! Blocking Microsoft Graph mail client: app-only token acquisition, a
//! retrying request executor, paging, and a draft workflow for large
//! attachments.

pub mod api;
pub mod error;
pub mod settings;
pub mod upload_manager;

pub use api::auth::{AccessToken, TokenProvider};
pub use api::mail::{
    resolve_folder_name, ApiResponse, BodyType, Clock, HttpRequest, HttpResponse, HttpTransport,
    Importance, ListMessagesQuery, MailClient, OutgoingMessage, Payload, RequestExecutor,
    RequestOptions, SendOutcome, SentDraft, SystemClock, ThrottleState, UploadSession,
};
pub use error::{MailError, Result};
pub use settings::{ClientConfig, Credentials, RetryBudget};
pub use upload_manager::{ProgressCallback, UploadSessionManager, WorkflowState};
