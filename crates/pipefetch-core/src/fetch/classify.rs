//! Classify fetch responses and transport errors into pipeline outcomes.

use super::{FetchError, FetchResponse};
use crate::model::{FailureReason, FetchOutcome};

/// 2xx counts as success; everything else is a failure.
pub fn is_success_status(code: u32) -> bool {
    (200..300).contains(&code)
}

/// Short human-readable category for a curl error (used in failure reasons).
pub fn classify_curl_error(e: &::curl::Error) -> &'static str {
    if e.is_operation_timedout() {
        return "timeout";
    }
    if e.is_couldnt_resolve_host() || e.is_couldnt_resolve_proxy() {
        return "dns";
    }
    if e.is_couldnt_connect() {
        return "connect";
    }
    if e.is_ssl_connect_error() || e.is_peer_failed_verification() {
        return "tls";
    }
    if e.is_read_error() || e.is_recv_error() || e.is_send_error() || e.is_got_nothing() {
        return "connection";
    }
    if e.is_aborted_by_callback() || e.is_write_error() {
        return "aborted";
    }
    "other"
}

/// Turns the result of one fetch into the outcome the pool acts on.
///
/// `Cancelled` is not classified here: the pool treats it as abandonment.
pub fn classify(result: Result<FetchResponse, FetchError>) -> FetchOutcome {
    match result {
        Ok(resp) if !is_success_status(resp.status) => {
            FetchOutcome::Failed(FailureReason::Status(resp.status))
        }
        Ok(resp) if resp.body.is_empty() => FetchOutcome::Empty,
        Ok(resp) => FetchOutcome::Payload(resp.body),
        Err(FetchError::BodyTooLarge { limit }) => {
            FetchOutcome::Failed(FailureReason::TooLarge { limit })
        }
        Err(FetchError::Curl(e)) => FetchOutcome::Failed(FailureReason::Transport(format!(
            "{}: {}",
            classify_curl_error(&e),
            e
        ))),
        Err(e) => FetchOutcome::Failed(FailureReason::Transport(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_with_body_is_payload() {
        assert_eq!(
            classify(Ok(FetchResponse::ok("Hello, world!"))),
            FetchOutcome::Payload(b"Hello, world!".to_vec())
        );
    }

    #[test]
    fn ok_without_body_is_empty() {
        assert_eq!(classify(Ok(FetchResponse::ok(""))), FetchOutcome::Empty);
        assert_eq!(
            classify(Ok(FetchResponse::new(204, Vec::new()))),
            FetchOutcome::Empty
        );
    }

    #[test]
    fn non_success_status_is_failed_even_with_body() {
        assert_eq!(
            classify(Ok(FetchResponse::new(404, "Not found"))),
            FetchOutcome::Failed(FailureReason::Status(404))
        );
        assert_eq!(
            classify(Ok(FetchResponse::new(500, ""))),
            FetchOutcome::Failed(FailureReason::Status(500))
        );
        assert_eq!(
            classify(Ok(FetchResponse::new(301, "moved"))),
            FetchOutcome::Failed(FailureReason::Status(301))
        );
    }

    #[test]
    fn transport_errors_are_failed() {
        match classify(Err(FetchError::Other("failed to connect".into()))) {
            FetchOutcome::Failed(FailureReason::Transport(msg)) => {
                assert_eq!(msg, "failed to connect")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            classify(Err(FetchError::BodyTooLarge { limit: 8 })),
            FetchOutcome::Failed(FailureReason::TooLarge { limit: 8 })
        );
    }

    #[test]
    fn success_range() {
        assert!(is_success_status(200));
        assert!(is_success_status(299));
        assert!(!is_success_status(199));
        assert!(!is_success_status(300));
    }
}
