pub mod core;
pub mod session;

pub use core::{UploadSessionManager, WorkflowState};
pub use session::ProgressCallback;
