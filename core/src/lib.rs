//! Typed HTTP loading on top of a blocking transport and serde_json.
//!
//! # Overview
//! Issues HTTP requests and turns their bodies into strongly typed results.
//! Every possible ending (transport failure, empty body, malformed JSON, no
//! parser defined, success) is classified into one `Outcome`.
//!
//! # Design
//! - `Parser` wraps a pluggable `DecodeStrategy` (plain JSON, envelope with
//!   sibling metadata, raw body, or a closure) and classifies its answer.
//! - `ResponseHandler` is the stateless, callback-only entry point.
//! - `Loader` caches one outcome and governs when it reaches the consumer
//!   across `start`, `stop`, `reset` and `cancel`, with executions on a
//!   worker thread and delivery on the owning thread.
//! - `Transport` is the only seam to the network; `UreqTransport` is the
//!   default implementation.

pub mod client;
pub mod error;
pub mod handler;
pub mod http;
pub mod loader;
pub mod model;
pub mod parser;
pub mod transport;

pub use client::Client;
pub use error::{DecodeError, ErrorKind, LoadError, TransportError};
pub use handler::{ResponseCallbacks, ResponseHandler};
pub use http::{Credentials, HttpMethod, HttpRequest, HttpResponse};
pub use loader::{execute, Loader, LoaderState};
pub use model::{Outcome, Payload, NO_STATUS_CODE};
pub use parser::{
    strategy_fn, DecodeStrategy, Envelope, FnStrategy, Json, NotImplemented, Parser, RawBody,
    TargetShape,
};
pub use transport::{Transport, TransportConfig, UreqTransport};
