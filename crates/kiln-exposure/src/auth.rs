//! Bearer-token authentication.

use axum::http::HeaderMap;

use crate::config::ExposureConfig;
use crate::error::ExposureError;

/// Checks the request's auth header against the configured token.
///
/// # Errors
/// Returns [`ExposureError::unauthorized`] when neither `allow_anonymous`
/// nor `dangerously_allow_open_exposure` is set and the header is missing
/// or doesn't match.
pub fn check(headers: &HeaderMap, config: &ExposureConfig) -> Result<(), ExposureError> {
    if config.allow_anonymous || config.dangerously_allow_open_exposure {
        return Ok(());
    }
    let Some(expected) = &config.token else {
        return Err(ExposureError::unauthorized("no token is configured"));
    };
    let provided = headers.get(&config.auth_header).and_then(|v| v.to_str().ok());
    match provided {
        Some(value) if constant_time_eq(value.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(ExposureError::unauthorized("missing or invalid bearer token")),
    }
}

/// Compares two byte strings without short-circuiting on the first
/// mismatch, so token comparison doesn't leak length-dependent timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn rejects_missing_token_by_default() {
        let config = ExposureConfig::new().with_token("secret");
        let headers = HeaderMap::new();
        assert!(check(&headers, &config).is_err());
    }

    #[test]
    fn accepts_matching_token() {
        let config = ExposureConfig::new().with_token("secret");
        let mut headers = HeaderMap::new();
        headers.insert("x-runner-token", HeaderValue::from_static("secret"));
        assert!(check(&headers, &config).is_ok());
    }

    #[test]
    fn allow_anonymous_skips_the_check() {
        let config = ExposureConfig::new().with_allow_anonymous(true);
        assert!(check(&HeaderMap::new(), &config).is_ok());
    }
}
