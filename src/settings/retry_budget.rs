use crate::error::{MailError, Result};
use std::time::Duration;

pub const MIN_MAX_RETRIES: u32 = 1;
pub const MAX_MAX_RETRIES: u32 = 10;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Upper bound for the base delay; exponential backoff multiplies it.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Retry configuration, constant for the life of an executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryBudget {
    /// Validates both values; `max_retries` must lie in [MIN, MAX].
    pub fn new(max_retries: u32, retry_delay: Duration) -> Result<Self> {
        if !(MIN_MAX_RETRIES..=MAX_MAX_RETRIES).contains(&max_retries) {
            return Err(MailError::validation(format!(
                "max_retries must be between {MIN_MAX_RETRIES} and {MAX_MAX_RETRIES}"
            )));
        }
        if retry_delay > MAX_RETRY_DELAY {
            return Err(MailError::validation(format!(
                "retry_delay must not exceed {} seconds",
                MAX_RETRY_DELAY.as_secs()
            )));
        }
        Ok(Self {
            max_retries,
            retry_delay,
        })
    }

    /// `retry_delay * 2^retries`, saturating instead of overflowing.
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 2u32.checked_pow(retries).unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }
}

/// Parses raw values (environment strings) and clamps them into range.
pub(crate) fn parse_and_clamp(raw_retries: Option<&str>, raw_delay: Option<&str>) -> Result<RetryBudget> {
    let mut budget = RetryBudget::default();
    if let Some(raw) = raw_retries {
        let parsed = raw
            .trim()
            .parse::<u32>()
            .map_err(|e| MailError::validation(format!("invalid max retries value: {e}")))?;
        budget.max_retries = parsed.clamp(MIN_MAX_RETRIES, MAX_MAX_RETRIES);
    }
    if let Some(raw) = raw_delay {
        let parsed = raw
            .trim()
            .parse::<u64>()
            .map_err(|e| MailError::validation(format!("invalid retry delay value: {e}")))?;
        budget.retry_delay = Duration::from_secs(parsed).min(MAX_RETRY_DELAY);
    }
    Ok(budget)
}
