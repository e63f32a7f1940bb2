//! Google API error bodies.
//!
//! See: <https://cloud.google.com/apis/design/errors#http_mapping>

use crate::retrieval::ProviderError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

/// Builds a [`ProviderError`] from a non-success response.
///
/// Bodies that are not Google error documents keep the status and use the raw text as message.
pub(crate) fn provider_error(status: u16, body: &str) -> ProviderError {
    let error = ProviderError::new(status);
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error: detail }) => {
            let reason = detail.errors.into_iter().find_map(|item| item.reason);
            let error = match reason {
                Some(reason) => error.with_reason(reason),
                None => error,
            };
            match detail.message {
                Some(message) => error.with_message(message),
                None => error,
            }
        }
        Err(_) if body.trim().is_empty() => error,
        Err(_) => error.with_message(body.trim()),
    }
}
