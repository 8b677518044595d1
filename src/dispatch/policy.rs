//! HTTP status classification and the retry ceiling.

use reqwest::StatusCode;

/// How a backend read response steers the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// `200 OK`, the body is meaningful.
    Ok,
    /// Try again on a later pass.
    Transient,
    /// The query itself is wrong; retrying cannot help.
    Permanent,
}

/// Classify a read response status.
///
/// `400` and any other client error are permanent, except authentication
/// failures, request timeouts and rate limiting, which may clear on their
/// own. Everything else, including 5xx and unexpected 2xx/3xx codes, is
/// transient.
pub fn classify_status(status: StatusCode) -> StatusClass {
    if status == StatusCode::OK {
        return StatusClass::Ok;
    }

    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => StatusClass::Transient,
        status if status.is_client_error() => StatusClass::Permanent,
        _ => StatusClass::Transient,
    }
}

/// Whether a send response means the backend took the delivery.
pub fn is_delivery_accepted(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::ACCEPTED
}

/// Ceiling on unsuccessful match attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` polls until the deadline.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(200),
        }
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_retries: None }
    }

    pub fn exhausted(&self, retries: i32) -> bool {
        match self.max_retries {
            Some(max) => i64::from(retries) >= i64::from(max),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Ok);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), StatusClass::Permanent);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusClass::Permanent);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            StatusClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            StatusClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::Transient
        );
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), StatusClass::Transient);
        assert_eq!(classify_status(StatusCode::ACCEPTED), StatusClass::Transient);
    }

    #[test]
    fn test_delivery_accepted() {
        assert!(is_delivery_accepted(StatusCode::OK));
        assert!(is_delivery_accepted(StatusCode::ACCEPTED));
        assert!(!is_delivery_accepted(StatusCode::CREATED));
        assert!(!is_delivery_accepted(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy {
            max_retries: Some(3),
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
        assert!(!RetryPolicy::unbounded().exhausted(i32::MAX));
    }
}
