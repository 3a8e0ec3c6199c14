use crate::api::mail::client::{recover_lock, Clock, HttpRequest, HttpTransport};
use crate::error::{MailError, Result};
use crate::settings::Credentials;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method,
};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const TOKEN_PATH: &str = "oauth2/v2.0/token";
/// Tokens closer than this to expiry are treated as already expired.
pub const EXPIRY_BUFFER_SECS: i64 = 300;
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Cached bearer token.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn usable_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > ChronoDuration::seconds(EXPIRY_BUFFER_SECS)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Acquires and caches an app-only token through the client-credentials grant.
pub struct TokenProvider {
    credentials: Credentials,
    authority: String,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(
        credentials: Credentials,
        authority: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            authority: authority.into().trim_end_matches('/').to_string(),
            transport,
            clock,
            cache: Mutex::new(None),
        }
    }

    /// Returns a bearer token with more than five minutes of validity left,
    /// exchanging credentials when the cache cannot satisfy that.
    pub fn get_token(&self) -> Result<String> {
        // Held across the exchange so concurrent callers refresh only once.
        let mut cache = recover_lock(&self.cache);
        let now = self.clock.now();
        if let Some(token) = cache.as_ref().filter(|t| t.usable_at(now)) {
            return Ok(token.access_token.clone());
        }

        let fresh = self.exchange(now)?;
        let access_token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(access_token)
    }

    pub fn invalidate(&self) {
        debug!(tenant = %self.credentials.tenant_id, "invalidating cached access token");
        *recover_lock(&self.cache) = None;
    }

    pub fn is_valid(&self) -> bool {
        let now = self.clock.now();
        recover_lock(&self.cache)
            .as_ref()
            .map(|t| t.usable_at(now))
            .unwrap_or(false)
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/{TOKEN_PATH}",
            self.authority, self.credentials.tenant_id
        )
    }

    fn exchange(&self, now: DateTime<Utc>) -> Result<AccessToken> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("client_secret", &self.credentials.client_secret)
            .append_pair("scope", &self.credentials.scope)
            .append_pair("grant_type", "client_credentials")
            .finish();

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let url = self.token_url();
        debug!(%url, "requesting client-credentials token");
        let response = self.transport.send(HttpRequest {
            method: Method::POST,
            url,
            headers,
            body: Some(form.into_bytes()),
        })?;

        if !response.status.is_success() {
            let description = serde_json::from_slice::<TokenErrorResponse>(&response.body)
                .ok()
                .and_then(|payload| payload.error_description.or(payload.error));
            warn!(status = %response.status, "token endpoint rejected credentials");
            return Err(MailError::Authentication {
                status: response.status_line(),
                description,
            });
        }

        let payload: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| MailError::protocol(format!("failed to parse token response: {e}")))?;
        let access_token = payload
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MailError::protocol("missing access_token in token response"))?;
        let expires_in = payload.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let expires_at = Some(expires_in)
            .filter(|secs| *secs > 0)
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                MailError::protocol(format!("token response has unusable expires_in {expires_in}"))
            })?;

        debug!(expires_in, "access token acquired");
        Ok(AccessToken {
            access_token,
            expires_at,
        })
    }
}
