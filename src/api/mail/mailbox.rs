use super::client::{Clock, HttpTransport, ReqwestTransport, SystemClock};
use super::request::{RequestExecutor, ThrottleState};
use crate::api::auth::TokenProvider;
use crate::error::Result;
use crate::settings::ClientConfig;
use crate::upload_manager::UploadSessionManager;
use std::sync::Arc;
use tracing::debug;

/// Entry point for mailbox operations against one Graph endpoint.
///
/// Resource operations live in `messages`, `folders` and `attachments`;
/// all of them go through the shared [`RequestExecutor`].
#[derive(Clone)]
pub struct MailClient {
    executor: Arc<RequestExecutor>,
    upload_chunk_size: usize,
}

impl MailClient {
    /// Production client: reqwest transport and the system clock.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.timeout)?);
        Self::with_transport(config, transport, Arc::new(SystemClock))
    }

    /// Client with an injected transport and clock.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let tokens = Arc::new(TokenProvider::new(
            config.credentials.clone(),
            config.authority.clone(),
            transport.clone(),
            clock.clone(),
        ));
        let executor = Arc::new(RequestExecutor::new(&config, transport, tokens, clock));
        debug!(base = %executor.base_url(), immutable_ids = config.use_immutable_ids, "mail client ready");
        Ok(Self {
            executor,
            upload_chunk_size: config.upload_chunk_size,
        })
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn throttle_state(&self) -> ThrottleState {
        self.executor.throttle_state()
    }

    /// Draft-based workflow for large attachments.
    pub fn uploads(&self) -> Result<UploadSessionManager<'_>> {
        UploadSessionManager::new(&self.executor, self.upload_chunk_size)
    }
}
