//! Callback adapter for requests that need no caching or lifecycle.
//!
//! # Design
//! `ResponseHandler` owns a `Parser` and a set of `ResponseCallbacks`. It keeps
//! no state between calls: each raw response is classified on its own and
//! routed to exactly one branch of callbacks. Every callback has a no-op
//! default, so callers implement only the ones they care about.

use tracing::debug;

use crate::error::{LoadError, TransportError};
use crate::http::HttpRequest;
use crate::model::Payload;
use crate::parser::Parser;
use crate::transport::Transport;

/// Notifications emitted while one request is handled.
///
/// On success the order is `on_raw_success`, `on_success`, `on_payload`.
/// `on_payload` receives the whole container so envelope extras are reachable.
#[allow(unused_variables)]
pub trait ResponseCallbacks<T, X = ()> {
    fn on_start(&self) {}

    fn on_raw_success(&self, status: u16, headers: &[(String, String)], body: &str) {}

    fn on_success(&self, status: u16, headers: &[(String, String)], data: &T) {}

    fn on_payload(&self, status: u16, headers: &[(String, String)], payload: &Payload<T, X>) {}

    /// `body` is the raw response, or the partial body of a transport failure.
    fn on_failure(&self, error: &LoadError, body: Option<&str>) {}

    fn on_finish(&self) {}
}

/// Classifies one response at a time and reports it through `ResponseCallbacks`.
pub struct ResponseHandler<T, X, C> {
    parser: Parser<T, X>,
    callbacks: C,
}

impl<T, X, C> ResponseHandler<T, X, C>
where
    C: ResponseCallbacks<T, X>,
{
    pub fn new(parser: Parser<T, X>, callbacks: C) -> Self {
        Self { parser, callbacks }
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn into_callbacks(self) -> C {
        self.callbacks
    }

    /// Entry point for a response the transport completed successfully.
    pub fn on_raw_response(&self, status: u16, headers: &[(String, String)], body: &str) {
        let (payload, error) = self.parser.parse(body);
        if let Some(error) = error {
            debug!(status, kind = ?error.kind(), "response classified as failure");
            self.callbacks.on_failure(&error, Some(body));
            return;
        }
        let Some(data) = payload.data.as_ref() else {
            self.callbacks.on_failure(&LoadError::ParsingFailed, Some(body));
            return;
        };
        self.callbacks.on_raw_success(status, headers, body);
        self.callbacks.on_success(status, headers, data);
        self.callbacks.on_payload(status, headers, &payload);
    }

    /// Entry point for a failure the transport reported; parsing is skipped.
    pub fn on_transport_failure(&self, error: TransportError) {
        debug!(status = ?error.status, error = %error, "transport failure");
        let body = error.body.clone();
        self.callbacks
            .on_failure(&LoadError::Transport(error), body.as_deref());
    }

    /// Run `request` on `transport` and drive the callbacks from start to finish.
    ///
    /// Blocks for the duration of the round-trip. `on_finish` is always the
    /// last callback.
    pub fn send(&self, transport: &dyn Transport, request: &HttpRequest) {
        self.callbacks.on_start();
        match transport.execute(request) {
            Ok(response) => self.on_raw_response(response.status, &response.headers, &response.body),
            Err(error) => self.on_transport_failure(error),
        }
        self.callbacks.on_finish();
    }
}
