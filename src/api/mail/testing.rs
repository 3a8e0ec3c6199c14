//! Scripted transport and controllable clock shared by unit tests.

use super::client::{recover_lock, Clock, HttpRequest, HttpResponse, HttpTransport};
use super::request::RequestExecutor;
use crate::api::auth::TokenProvider;
use crate::error::{MailError, Result};
use crate::settings::{ClientConfig, Credentials};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const TEST_BASE: &str = "https://graph.example.test/v1.0";
pub(crate) const TEST_AUTHORITY: &str = "https://login.example.test";

/// Answers token-endpoint calls on its own (`token-1`, `token-2`, ...) and
/// replays scripted responses for everything else, in order.
pub(crate) struct FakeTransport {
    scripted: Mutex<VecDeque<Result<HttpResponse>>>,
    token_override: Mutex<Option<HttpResponse>>,
    token_requests: Mutex<Vec<HttpRequest>>,
    api_requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(VecDeque::new()),
            token_override: Mutex::new(None),
            token_requests: Mutex::new(Vec::new()),
            api_requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn push(&self, response: HttpResponse) {
        recover_lock(&self.scripted).push_back(Ok(response));
    }

    pub(crate) fn push_json(&self, status: u16, body: &str) {
        self.push(json_response(status, body));
    }

    pub(crate) fn push_status(&self, status: u16) {
        self.push(HttpResponse::new(status_code(status)));
    }

    pub(crate) fn push_error(&self, err: MailError) {
        recover_lock(&self.scripted).push_back(Err(err));
    }

    pub(crate) fn set_token_response(&self, response: HttpResponse) {
        *recover_lock(&self.token_override) = Some(response);
    }

    pub(crate) fn token_requests(&self) -> Vec<HttpRequest> {
        recover_lock(&self.token_requests).clone()
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        recover_lock(&self.api_requests).clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        recover_lock(&self.scripted).len()
    }
}

impl HttpTransport for FakeTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        if request.url.ends_with("/oauth2/v2.0/token") {
            let mut token_requests = recover_lock(&self.token_requests);
            token_requests.push(request);
            if let Some(response) = recover_lock(&self.token_override).clone() {
                return Ok(response);
            }
            let body = format!(
                r#"{{"token_type":"Bearer","access_token":"token-{}","expires_in":3600}}"#,
                token_requests.len()
            );
            return Ok(json_response(200, &body));
        }

        recover_lock(&self.api_requests).push(request.clone());
        recover_lock(&self.scripted)
            .pop_front()
            .unwrap_or_else(|| {
                Err(MailError::Transport(format!(
                    "no scripted response for {} {}",
                    request.method, request.url
                )))
            })
    }
}

/// Starts at a fixed instant; `sleep` advances time and is recorded.
pub(crate) struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub(crate) fn new() -> Arc<Self> {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Arc::new(Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn advance(&self, duration: Duration) {
        let mut now = recover_lock(&self.now);
        *now += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        recover_lock(&self.sleeps).clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *recover_lock(&self.now)
    }

    fn sleep(&self, duration: Duration) {
        recover_lock(&self.sleeps).push(duration);
        self.advance(duration);
    }
}

pub(crate) fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

pub(crate) fn json_response(status: u16, body: &str) -> HttpResponse {
    HttpResponse::new(status_code(status))
        .with_header("content-type", "application/json")
        .with_body(body.as_bytes().to_vec())
}

pub(crate) fn test_config() -> ClientConfig {
    ClientConfig::new(Credentials::new("contoso", "app-id", "s3cret"))
        .with_base_url(TEST_BASE)
        .with_authority(TEST_AUTHORITY)
}

pub(crate) fn executor_with(
    config: ClientConfig,
    transport: &Arc<FakeTransport>,
    clock: &Arc<FakeClock>,
) -> RequestExecutor {
    let tokens = Arc::new(TokenProvider::new(
        config.credentials.clone(),
        config.authority.clone(),
        transport.clone(),
        clock.clone(),
    ));
    RequestExecutor::new(&config, transport.clone(), tokens, clock.clone())
}

pub(crate) fn executor(transport: &Arc<FakeTransport>, clock: &Arc<FakeClock>) -> RequestExecutor {
    executor_with(test_config(), transport, clock)
}
