//! Payload container and load outcome.
//!
//! # Design
//! An `Outcome` is built once per execution and never mutated afterwards.
//! Loaders share it as `Arc<Outcome<_, _>>`, so a consumer holding an older
//! outcome cannot observe a later request's result.

use crate::error::{LoadError, TransportError};

/// Status value reported when no HTTP response was received.
pub const NO_STATUS_CODE: i32 = -1;

/// Decoded business value plus optional schema extras.
///
/// `extras` holds sibling objects an envelope schema decodes next to the
/// payload (metadata, pagination). Plain shapes leave it `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload<T, X = ()> {
    pub data: Option<T>,
    pub extras: Option<X>,
}

impl<T, X> Payload<T, X> {
    pub fn new(data: T) -> Self {
        Self {
            data: Some(data),
            extras: None,
        }
    }

    pub fn with_extras(data: Option<T>, extras: X) -> Self {
        Self {
            data,
            extras: Some(extras),
        }
    }

    pub fn empty() -> Self {
        Self {
            data: None,
            extras: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.data.is_some()
    }
}

impl<T, X> Default for Payload<T, X> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Terminal result of one request execution.
///
/// Invariant: `success` holds exactly when `error` is `None`, which holds
/// exactly when `payload.data` is present. The constructors are the only way
/// to build one, so the invariant cannot be broken from outside.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T, X = ()> {
    success: bool,
    status_code: Option<u16>,
    error: Option<LoadError>,
    response: Option<String>,
    payload: Payload<T, X>,
}

impl<T, X> Outcome<T, X> {
    /// Combine a classification with the response it came from.
    ///
    /// A present `error` always wins. Without one, an absent payload is
    /// reclassified as `ParsingFailed` so the invariant holds.
    pub fn classified(
        status: u16,
        body: String,
        payload: Payload<T, X>,
        error: Option<LoadError>,
    ) -> Self {
        let error = match error {
            Some(error) => Some(error),
            None if !payload.is_present() => Some(LoadError::ParsingFailed),
            None => None,
        };
        let payload = if error.is_some() {
            Payload {
                data: None,
                extras: payload.extras,
            }
        } else {
            payload
        };
        Self {
            success: error.is_none(),
            status_code: Some(status),
            error,
            response: Some(body),
            payload,
        }
    }

    pub fn transport_failure(error: TransportError) -> Self {
        Self {
            success: false,
            status_code: error.status,
            response: error.body.clone(),
            error: Some(LoadError::Transport(error)),
            payload: Payload::empty(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Status code with `-1` standing for "no response received".
    pub fn http_status_code(&self) -> i32 {
        self.status_code.map_or(NO_STATUS_CODE, i32::from)
    }

    pub fn error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }

    /// Raw response body, when one was received.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn payload(&self) -> &Payload<T, X> {
        &self.payload
    }

    pub fn data(&self) -> Option<&T> {
        self.payload.data.as_ref()
    }

    pub fn extras(&self) -> Option<&X> {
        self.payload.extras.as_ref()
    }

    pub fn into_payload(self) -> Payload<T, X> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    fn assert_invariant<T, X>(outcome: &Outcome<T, X>) {
        assert_eq!(outcome.is_success(), outcome.error().is_none());
        assert_eq!(outcome.is_success(), outcome.payload().is_present());
    }

    #[test]
    fn success_when_payload_present() {
        let outcome: Outcome<u32> = Outcome::classified(200, "7".into(), Payload::new(7), None);
        assert_invariant(&outcome);
        assert!(outcome.is_success());
        assert_eq!(outcome.data(), Some(&7));
        assert_eq!(outcome.http_status_code(), 200);
        assert_eq!(outcome.response(), Some("7"));
    }

    #[test]
    fn absent_payload_without_error_becomes_parsing_failed() {
        let outcome: Outcome<u32> = Outcome::classified(200, String::new(), Payload::empty(), None);
        assert_invariant(&outcome);
        assert_eq!(outcome.error(), Some(&LoadError::ParsingFailed));
        assert_eq!(outcome.response(), Some(""));
    }

    #[test]
    fn error_drops_data_but_keeps_extras() {
        let payload = Payload::with_extras(Some(1u32), "meta");
        let outcome = Outcome::classified(
            200,
            "x".into(),
            payload,
            Some(LoadError::Decode(DecodeError::new("bad"))),
        );
        assert_invariant(&outcome);
        assert_eq!(outcome.extras(), Some(&"meta"));
        assert!(outcome.data().is_none());
    }

    #[test]
    fn transport_failure_without_response_uses_sentinel() {
        let outcome: Outcome<u32> = Outcome::transport_failure(TransportError::io("refused"));
        assert_invariant(&outcome);
        assert_eq!(outcome.http_status_code(), NO_STATUS_CODE);
        assert!(outcome.response().is_none());
        assert!(matches!(outcome.error(), Some(LoadError::Transport(_))));
    }

    #[test]
    fn transport_failure_keeps_status_and_partial_body() {
        let outcome: Outcome<u32> =
            Outcome::transport_failure(TransportError::status(500, "oops"));
        assert_eq!(outcome.http_status_code(), 500);
        assert_eq!(outcome.response(), Some("oops"));
    }
}
