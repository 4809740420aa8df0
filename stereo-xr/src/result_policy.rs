use openxr::sys::Result as OpenXRResult;

/// What a runtime result means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded
    Ok,
    /// The call failed, but the next attempt (or the next tick) may succeed
    Recoverable,
    /// The instance, session or device is gone and everything must be torn down
    Fatal,
}

/// Classify a runtime result.
///
/// Success codes (including qualified successes such as `SESSION_LOSS_PENDING`, which arrive
/// again as an event) are [`Outcome::Ok`]. Failures are [`Outcome::Recoverable`] unless they
/// denote instance, session or graphics device loss.
pub fn classify(result: OpenXRResult) -> Outcome {
    if result.into_raw() >= 0 {
        return Outcome::Ok;
    }

    match result {
        OpenXRResult::ERROR_INSTANCE_LOST
        | OpenXRResult::ERROR_SESSION_LOST
        | OpenXRResult::ERROR_GRAPHICS_DEVICE_INVALID => Outcome::Fatal,
        _ => Outcome::Recoverable,
    }
}

/// Classify the outcome of a runtime call.
pub fn classify_result<T>(result: &openxr::Result<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Ok,
        Err(e) => classify(*e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_success_codes() {
        assert_eq!(classify(OpenXRResult::SUCCESS), Outcome::Ok);
        assert_eq!(classify(OpenXRResult::TIMEOUT_EXPIRED), Outcome::Ok);
        assert_eq!(classify(OpenXRResult::SESSION_LOSS_PENDING), Outcome::Ok);
        assert_eq!(classify(OpenXRResult::FRAME_DISCARDED), Outcome::Ok);
        assert_eq!(classify_result(&Ok::<u32, OpenXRResult>(3)), Outcome::Ok);
    }

    #[test]
    pub fn test_losses_are_fatal() {
        assert_eq!(classify(OpenXRResult::ERROR_INSTANCE_LOST), Outcome::Fatal);
        assert_eq!(classify(OpenXRResult::ERROR_SESSION_LOST), Outcome::Fatal);
        assert_eq!(
            classify(OpenXRResult::ERROR_GRAPHICS_DEVICE_INVALID),
            Outcome::Fatal
        );
        assert_eq!(
            classify_result(&Err::<(), _>(OpenXRResult::ERROR_SESSION_LOST)),
            Outcome::Fatal
        );
    }

    #[test]
    pub fn test_other_failures_are_recoverable() {
        for result in [
            OpenXRResult::ERROR_RUNTIME_FAILURE,
            OpenXRResult::ERROR_VALIDATION_FAILURE,
            OpenXRResult::ERROR_SESSION_NOT_RUNNING,
            OpenXRResult::ERROR_CALL_ORDER_INVALID,
            OpenXRResult::ERROR_TIME_INVALID,
        ] {
            assert_eq!(classify(result), Outcome::Recoverable, "{result:?}");
        }
    }
}
