use std::error::Error;
use std::io;

use crate::models::outcome::Retryability;
use crate::services::vision::VisionError;

/// Decide whether a failed vision call is worth another attempt.
///
/// Transient transport and server conditions are retryable; anything that
/// would fail the same way again (bad credentials, bad request, unparseable
/// or out-of-range answers) is not.
pub fn classify(cause: &VisionError) -> Retryability {
    match cause {
        VisionError::Connection(_)
        | VisionError::Timeout(_)
        | VisionError::RateLimited
        | VisionError::Server { .. } => Retryability::Retryable,

        VisionError::Unauthorized { .. }
        | VisionError::BadRequest { .. }
        | VisionError::MalformedResponse(_)
        | VisionError::InvalidImage(_)
        | VisionError::InvalidEstimate(_)
        | VisionError::Other(_) => Retryability::NonRetryable,
    }
}

/// Classify an arbitrary error. Unknown error types are never retried.
pub fn classify_error(cause: &(dyn Error + 'static)) -> Retryability {
    if let Some(vision) = cause.downcast_ref::<VisionError>() {
        return classify(vision);
    }
    if let Some(io) = cause.downcast_ref::<io::Error>() {
        return classify_io(io);
    }
    Retryability::NonRetryable
}

fn classify_io(cause: &io::Error) -> Retryability {
    match cause.kind() {
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::Interrupted => Retryability::Retryable,
        _ => Retryability::NonRetryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::nutrition::NutritionEstimate;

    #[test]
    fn test_network_class_is_retryable() {
        for cause in [
            VisionError::Connection("refused".into()),
            VisionError::Timeout("30s".into()),
            VisionError::RateLimited,
            VisionError::Server {
                status: 502,
                body: "bad gateway".into(),
            },
        ] {
            assert_eq!(classify(&cause), Retryability::Retryable, "{}", cause);
        }
    }

    #[test]
    fn test_client_class_is_not_retryable() {
        let invalid_estimate = NutritionEstimate::new(0, "Air").unwrap_err();
        for cause in [
            VisionError::Unauthorized { status: 401 },
            VisionError::BadRequest {
                status: 400,
                body: "missing image".into(),
            },
            VisionError::MalformedResponse("eof".into()),
            VisionError::InvalidImage("unknown format".into()),
            VisionError::InvalidEstimate(invalid_estimate),
            VisionError::Other("builder".into()),
        ] {
            assert_eq!(classify(&cause), Retryability::NonRetryable, "{}", cause);
        }
    }

    #[test]
    fn test_classify_error_downcasts_vision_errors() {
        let cause = VisionError::Timeout("deadline".into());
        assert_eq!(classify_error(&cause), Retryability::Retryable);
    }

    #[test]
    fn test_classify_error_io_kinds() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(classify_error(&reset), Retryability::Retryable);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(classify_error(&denied), Retryability::NonRetryable);
    }

    #[test]
    fn test_unknown_error_type_fails_closed() {
        let cause = std::fmt::Error;
        assert_eq!(classify_error(&cause), Retryability::NonRetryable);
    }
}
