use super::request::{RequestExecutor, RequestOptions};
use crate::error::{MailError, Result};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// API version segments stripped from `@odata.nextLink` paths.
const VERSION_PREFIXES: [&str; 2] = ["/v1.0", "/beta"];

/// Lazily walks a collection page by page, following `@odata.nextLink`.
///
/// The first request carries the caller's options; follow-up requests carry
/// none because the next link already encodes filters, ordering and page size.
pub struct Pages<'a> {
    executor: &'a RequestExecutor,
    next_path: Option<String>,
    options: RequestOptions,
    failed: bool,
}

impl<'a> Pages<'a> {
    pub(crate) fn new(executor: &'a RequestExecutor, path: &str, options: RequestOptions) -> Self {
        Self {
            executor,
            next_path: Some(path.to_string()),
            options,
            failed: false,
        }
    }
}

impl Iterator for Pages<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let path = self.next_path.take()?;
        let options = std::mem::take(&mut self.options);

        let page = match self.executor.get(&path, &options) {
            Ok(page) => page,
            Err(err) => {
                self.failed = true;
                return Some(Err(err));
            }
        };

        let items = match page.get("value") {
            Some(Value::Array(items)) => items.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                self.failed = true;
                return Some(Err(MailError::protocol(format!(
                    "collection response for {path} has a non-array value"
                ))));
            }
        };

        if let Some(link) = page.get("@odata.nextLink").and_then(Value::as_str) {
            match next_link_path(link) {
                Ok(next) => {
                    debug!(next = %next, "following next page link");
                    self.next_path = Some(next);
                }
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
        Some(Ok(items))
    }
}

impl RequestExecutor {
    pub fn pages(&self, path: &str, options: RequestOptions) -> Pages<'_> {
        Pages::new(self, path, options)
    }

    /// Every item of every page, in server order.
    pub fn get_all_pages(&self, path: &str, options: RequestOptions) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        for page in self.pages(path, options) {
            items.extend(page?);
        }
        Ok(items)
    }
}

/// Reduces an absolute next link to the path-plus-query below the API version.
pub(crate) fn next_link_path(link: &str) -> Result<String> {
    let url = Url::parse(link)
        .map_err(|e| MailError::protocol(format!("invalid @odata.nextLink {link}: {e}")))?;
    let mut path = url.path().to_string();
    for prefix in VERSION_PREFIXES {
        if let Some(rest) = path.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with('/') {
                path = rest.to_string();
                break;
            }
        }
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    Ok(path)
}
