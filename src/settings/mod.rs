pub mod client_config;
pub mod retry_budget;

pub use client_config::{
    ClientConfig, Credentials, ThrottleCallback, DEFAULT_AUTHORITY, DEFAULT_GRAPH_BASE,
    DEFAULT_SCOPE, DEFAULT_UPLOAD_CHUNK_SIZE,
};
pub use retry_budget::{RetryBudget, MAX_MAX_RETRIES, MAX_RETRY_DELAY, MIN_MAX_RETRIES};
