use super::client::{recover_lock, Clock, HttpRequest, HttpResponse, HttpTransport};
use crate::api::auth::TokenProvider;
use crate::error::{MailError, Result};
use crate::settings::{ClientConfig, RetryBudget, ThrottleCallback};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{
    header::{
        HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE,
        CONTENT_TYPE, RETRY_AFTER,
    },
    Method, StatusCode,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const THROTTLE_HEADER: &str = "x-ms-throttle-limit-percentage";
/// Percentages at or above this value count as "near the limit".
pub const THROTTLE_WARNING_THRESHOLD: f64 = 0.8;
const IMMUTABLE_ID_PREFERENCE: &str = "IdType=\"ImmutableId\"";
const CLIENT_REQUEST_ID: &str = "client-request-id";
const PREFER: &str = "prefer";

/// Characters escaped in query values; everything else (OData `$`, quotes,
/// commas, parentheses) is passed through as written.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'=');

/// Request body for JSON API calls.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Serialized with `serde_json` before sending.
    Json(Value),
    /// Sent verbatim; assumed to already be JSON text.
    Text(String),
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

/// Per-call query parameters, extra headers and content range.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub content_range: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn content_range(mut self, range: impl Into<String>) -> Self {
        self.content_range = Some(range.into());
        self
    }
}

/// Decoded outcome of a terminal, successful response.
#[derive(Clone, Debug, PartialEq)]
pub enum ApiResponse {
    /// 204 No Content.
    NoContent,
    /// 202 Accepted, e.g. `sendMail`.
    Accepted,
    Json(Value),
}

impl ApiResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ApiResponse::Accepted)
    }

    /// The decoded body; `Null` for the payload-less markers.
    pub fn into_json(self) -> Value {
        match self {
            ApiResponse::Json(value) => value,
            ApiResponse::NoContent | ApiResponse::Accepted => Value::Null,
        }
    }
}

/// Latest throttle proximity reported by the service.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ThrottleState {
    pub last_percentage: Option<f64>,
    pub is_near_limit: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    inner_error: Option<InnerError>,
}

#[derive(Debug, Deserialize)]
struct InnerError {
    message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Credential {
    /// Graph bearer token from the token provider.
    Bearer,
    /// Upload session URL that carries its own authorization.
    PreAuthenticated,
}

/// Issues authenticated Graph requests and owns the retry protocol:
/// 429 and 503 back off and retry, a first 401 refreshes the token once.
pub struct RequestExecutor {
    base_url: String,
    use_immutable_ids: bool,
    retry: RetryBudget,
    throttle_callback: Option<ThrottleCallback>,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenProvider>,
    clock: Arc<dyn Clock>,
    throttle: Mutex<ThrottleState>,
}

impl RequestExecutor {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_url: config.normalized_base(),
            use_immutable_ids: config.use_immutable_ids,
            retry: config.retry,
            throttle_callback: config.throttle_callback.clone(),
            transport,
            tokens,
            clock,
            throttle: Mutex::new(ThrottleState::default()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn throttle_state(&self) -> ThrottleState {
        *recover_lock(&self.throttle)
    }

    /// Sends `method path` relative to the API base with a bearer token.
    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Payload>,
        options: &RequestOptions,
    ) -> Result<ApiResponse> {
        let url = self.resolve_url(path, &options.query);
        let body = match body {
            Some(Payload::Json(value)) => Some(serde_json::to_vec(&value).map_err(|e| {
                MailError::validation(format!("failed to serialize request body: {e}"))
            })?),
            Some(Payload::Text(text)) => Some(text.into_bytes()),
            None => None,
        };

        let immutable_ids = self.use_immutable_ids && !addresses_folders(path);
        let response = self.send_with_retries(&method, &url, Credential::Bearer, || {
            let token = self.tokens.get_token()?;
            let headers = self.api_headers(&token, immutable_ids, options)?;
            Ok(HttpRequest {
                method: method.clone(),
                url: url.clone(),
                headers,
                body: body.clone(),
            })
        })?;
        interpret(response)
    }

    /// Sends binary content to an absolute, pre-authenticated URL (upload
    /// sessions). No bearer token and no JSON encoding are applied.
    pub fn request_raw(
        &self,
        method: Method,
        url: &str,
        content: &[u8],
        options: &RequestOptions,
    ) -> Result<ApiResponse> {
        let headers = raw_headers(content.len(), options)?;
        let response = self.send_with_retries(&method, url, Credential::PreAuthenticated, || {
            Ok(HttpRequest {
                method: method.clone(),
                url: url.to_string(),
                headers: headers.clone(),
                body: Some(content.to_vec()),
            })
        })?;
        interpret(response)
    }

    pub fn get(&self, path: &str, options: &RequestOptions) -> Result<Value> {
        self.request(Method::GET, path, None, options)
            .map(ApiResponse::into_json)
    }

    pub fn post(&self, path: &str, body: Option<Value>) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            path,
            body.map(Payload::Json),
            &RequestOptions::default(),
        )
    }

    /// The one token refresh after a rejected first attempt does not count
    /// against the retry budget.
    fn send_with_retries<F>(
        &self,
        method: &Method,
        url: &str,
        credential: Credential,
        mut build: F,
    ) -> Result<HttpResponse>
    where
        F: FnMut() -> Result<HttpRequest>,
    {
        let mut retries: u32 = 0;
        let mut refreshed = false;
        loop {
            let request = build()?;
            debug!(%method, %url, attempt = retries + 1, "sending graph request");
            let response = self.transport.send(request)?;
            self.observe_throttle(&response);

            let wait = match response.status {
                StatusCode::TOO_MANY_REQUESTS => {
                    retry_after(&response).unwrap_or_else(|| self.retry.backoff(retries))
                }
                StatusCode::SERVICE_UNAVAILABLE => self.retry.backoff(retries),
                StatusCode::UNAUTHORIZED
                    if credential == Credential::Bearer && retries == 0 && !refreshed =>
                {
                    debug!(%method, %url, "access token rejected; refreshing once");
                    self.tokens.invalidate();
                    refreshed = true;
                    continue;
                }
                _ => return Ok(response),
            };

            retries += 1;
            if retries >= self.retry.max_retries {
                warn!(%method, %url, attempts = retries, status = %response.status, "retry budget exhausted");
                return Err(MailError::RetryExhausted {
                    method: method.to_string(),
                    url: url.to_string(),
                    attempts: retries,
                });
            }
            if !wait.is_zero() {
                debug!(%method, %url, status = %response.status, wait_ms = wait.as_millis() as u64, "backing off before retry");
                self.clock.sleep(wait);
            }
        }
    }

    fn observe_throttle(&self, response: &HttpResponse) {
        let Some(percentage) = response
            .header(THROTTLE_HEADER)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
        else {
            return;
        };
        let near_limit = percentage >= THROTTLE_WARNING_THRESHOLD;
        *recover_lock(&self.throttle) = ThrottleState {
            last_percentage: Some(percentage),
            is_near_limit: near_limit,
        };
        if near_limit {
            warn!(percentage, "approaching graph throttling limit");
            if let Some(callback) = self.throttle_callback.as_ref() {
                callback(percentage);
            }
        }
    }

    fn resolve_url(&self, path: &str, query: &BTreeMap<String, String>) -> String {
        let mut url = if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        };
        append_query(&mut url, query);
        url
    }

    fn api_headers(
        &self,
        token: &str,
        immutable_ids: bool,
        options: &RequestOptions,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if immutable_ids {
            headers.insert(
                HeaderName::from_static(PREFER),
                HeaderValue::from_static(IMMUTABLE_ID_PREFERENCE),
            );
        }
        if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            headers.insert(HeaderName::from_static(CLIENT_REQUEST_ID), value);
        }
        merge_caller_headers(&mut headers, options)?;

        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| MailError::protocol("access token contains invalid header characters"))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }
}

/// Mail folders have no immutable ids, so the id preference is left off
/// requests whose target is a folder or folder collection.
fn addresses_folders(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or_default();
    for segment in path.rsplit('/') {
        match segment {
            "mailFolders" | "childFolders" => return true,
            "messages" | "attachments" => return false,
            _ => {}
        }
    }
    false
}

fn raw_headers(content_length: usize, options: &RequestOptions) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length as u64));
    merge_caller_headers(&mut headers, options)?;
    headers.remove(AUTHORIZATION);
    Ok(headers)
}

/// Caller headers win over defaults, except `Authorization`.
fn merge_caller_headers(headers: &mut HeaderMap, options: &RequestOptions) -> Result<()> {
    for (name, value) in &options.headers {
        if name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| MailError::validation(format!("invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| MailError::validation(format!("invalid value for header {name}")))?;
        headers.insert(name, value);
    }
    if let Some(range) = options.content_range.as_deref() {
        let value = HeaderValue::from_str(range)
            .map_err(|_| MailError::validation(format!("invalid content range: {range}")))?;
        headers.insert(CONTENT_RANGE, value);
    }
    Ok(())
}

pub(crate) fn append_query(url: &mut String, query: &BTreeMap<String, String>) {
    if query.is_empty() {
        return;
    }
    let encoded = query
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, QUERY_VALUE),
                utf8_percent_encode(value, QUERY_VALUE)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(&encoded);
}

fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn interpret(response: HttpResponse) -> Result<ApiResponse> {
    match response.status {
        StatusCode::NO_CONTENT => return Ok(ApiResponse::NoContent),
        StatusCode::ACCEPTED => return Ok(ApiResponse::Accepted),
        status if !status.is_success() => return Err(api_error(&response)),
        _ => {}
    }

    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ApiResponse::Json(Value::Object(Map::new())));
    }
    serde_json::from_slice(&response.body)
        .map(ApiResponse::Json)
        .map_err(|e| {
            MailError::protocol(format!(
                "failed to parse {} response body: {e}",
                response.status
            ))
        })
}

fn api_error(response: &HttpResponse) -> MailError {
    let body = serde_json::from_slice::<ErrorEnvelope>(&response.body)
        .ok()
        .and_then(|envelope| envelope.error);
    let (code, message, details) = match body {
        Some(error) => (
            error.code,
            error.message,
            error.inner_error.and_then(|inner| inner.message),
        ),
        None => (None, None, None),
    };
    MailError::Api {
        status: response.status.as_u16(),
        code: code.unwrap_or_else(|| response.status.as_u16().to_string()),
        message: message.unwrap_or_else(|| response.status_line()),
        details,
    }
}
