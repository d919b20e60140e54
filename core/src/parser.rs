//! Turns a raw response body into a payload or a classified parsing error.
//!
//! # Design
//! A `Parser` wraps one pluggable `DecodeStrategy` instead of a hierarchy of
//! per-schema parsers. A strategy answers three ways:
//!
//! - `Err(DecodeError)`: the body is not valid JSON for the target shape.
//! - `Ok(None)`: the strategy produced no response object, which means
//!   nobody defined how to parse this schema.
//! - `Ok(Some(payload))`: a response object; its `data` may still be absent.
//!
//! `Parser::parse` maps these onto `LoadError::Decode`,
//! `LoadError::ParsingNotImplemented`, `LoadError::ParsingFailed` (absent
//! data) or success. An empty body, whitespace, or a literal `null` decodes to
//! absent data, so it fails as `ParsingFailed` rather than as a syntax error.
//! An empty JSON array or object is absent data too, unless the strategy was
//! built with `allow_empty`.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::error::{DecodeError, LoadError};
use crate::model::{Outcome, Payload};

/// Shape the caller expects the decoded value to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetShape {
    /// A single value; a top-level JSON array is rejected.
    Object,
    /// A JSON array of values.
    Collection,
    /// The raw body text, undecoded.
    Raw,
    /// A caller-defined schema.
    Custom,
}

impl fmt::Display for TargetShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetShape::Object => "object",
            TargetShape::Collection => "collection",
            TargetShape::Raw => "raw",
            TargetShape::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Capability to decode a raw body into a payload.
pub trait DecodeStrategy<T, X = ()>: Send + Sync {
    fn decode(&self, body: &str) -> Result<Option<Payload<T, X>>, DecodeError>;

    fn shape(&self) -> TargetShape {
        TargetShape::Custom
    }
}

/// Parse `body` as JSON, returning `None` for an empty body or `null`.
fn read_document(body: &str) -> Result<Option<Value>, DecodeError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(body)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

fn check_shape(value: &Value, shape: TargetShape) -> Result<(), DecodeError> {
    match (shape, value) {
        (TargetShape::Collection, Value::Array(_)) => Ok(()),
        (TargetShape::Collection, _) => Err(DecodeError::new(
            "expected a JSON array for a collection shape",
        )),
        (TargetShape::Object, Value::Array(_)) => Err(DecodeError::new(
            "expected a single JSON value but found an array",
        )),
        _ => Ok(()),
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

/// Decode the whole body into `T`, either a single object or a collection.
pub struct Json<T> {
    shape: TargetShape,
    allow_empty: bool,
    _target: PhantomData<fn() -> T>,
}

impl<T> Json<T> {
    pub fn object() -> Self {
        Self::with_shape(TargetShape::Object)
    }

    pub fn collection() -> Self {
        Self::with_shape(TargetShape::Collection)
    }

    fn with_shape(shape: TargetShape) -> Self {
        Self {
            shape,
            allow_empty: false,
            _target: PhantomData,
        }
    }

    /// Accept an empty JSON array or object as a successful decode.
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }
}

impl<T: DeserializeOwned> DecodeStrategy<T> for Json<T> {
    fn decode(&self, body: &str) -> Result<Option<Payload<T>>, DecodeError> {
        let Some(value) = read_document(body)? else {
            return Ok(Some(Payload::empty()));
        };
        check_shape(&value, self.shape)?;
        if !self.allow_empty && is_empty_container(&value) {
            return Ok(Some(Payload::empty()));
        }
        let data = serde_json::from_value(value)?;
        Ok(Some(Payload::new(data)))
    }

    fn shape(&self) -> TargetShape {
        self.shape
    }
}

/// Decode a payload nested under `key`, with sibling objects decoded as `X`.
///
/// `X` is deserialized from the whole document, so a struct with `meta` and
/// `pagination` fields picks those siblings up and ignores the payload key.
/// A missing payload key is a decode error; an explicit `null` is absent data.
pub struct Envelope<T, X> {
    key: String,
    shape: TargetShape,
    allow_empty: bool,
    _target: PhantomData<fn() -> (T, X)>,
}

impl<T, X> Envelope<T, X> {
    pub fn object(key: impl Into<String>) -> Self {
        Self::with_shape(key, TargetShape::Object)
    }

    pub fn collection(key: impl Into<String>) -> Self {
        Self::with_shape(key, TargetShape::Collection)
    }

    fn with_shape(key: impl Into<String>, shape: TargetShape) -> Self {
        Self {
            key: key.into(),
            shape,
            allow_empty: false,
            _target: PhantomData,
        }
    }

    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }
}

impl<T: DeserializeOwned, X: DeserializeOwned> DecodeStrategy<T, X> for Envelope<T, X> {
    fn decode(&self, body: &str) -> Result<Option<Payload<T, X>>, DecodeError> {
        let Some(document) = read_document(body)? else {
            return Ok(Some(Payload::empty()));
        };
        if !document.is_object() {
            return Err(DecodeError::new("expected a JSON object envelope"));
        }
        let extras: X = serde_json::from_value(document.clone())?;
        let inner = document
            .get(&self.key)
            .ok_or_else(|| DecodeError::new(format!("missing field `{}`", self.key)))?;
        if inner.is_null() || (!self.allow_empty && is_empty_container(inner)) {
            return Ok(Some(Payload::with_extras(None, extras)));
        }
        check_shape(inner, self.shape)?;
        let data = serde_json::from_value(inner.clone())?;
        Ok(Some(Payload::with_extras(Some(data), extras)))
    }

    fn shape(&self) -> TargetShape {
        self.shape
    }
}

/// The raw body itself is the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBody;

impl DecodeStrategy<String> for RawBody {
    fn decode(&self, body: &str) -> Result<Option<Payload<String>>, DecodeError> {
        Ok(Some(Payload::new(body.to_string())))
    }

    fn shape(&self) -> TargetShape {
        TargetShape::Raw
    }
}

/// Strategy for a schema nobody has defined yet; never yields a response.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotImplemented;

impl<T, X> DecodeStrategy<T, X> for NotImplemented {
    fn decode(&self, _body: &str) -> Result<Option<Payload<T, X>>, DecodeError> {
        Ok(None)
    }
}

/// Closure-backed strategy, built with [`strategy_fn`].
pub struct FnStrategy<F>(F);

/// Use a closure as the decode strategy for a custom schema.
pub fn strategy_fn<F>(f: F) -> FnStrategy<F> {
    FnStrategy(f)
}

impl<T, X, F> DecodeStrategy<T, X> for FnStrategy<F>
where
    F: Fn(&str) -> Result<Option<Payload<T, X>>, DecodeError> + Send + Sync,
{
    fn decode(&self, body: &str) -> Result<Option<Payload<T, X>>, DecodeError> {
        (self.0)(body)
    }
}

/// Classifies raw bodies with a configured decode strategy.
pub struct Parser<T, X = ()> {
    strategy: Arc<dyn DecodeStrategy<T, X>>,
}

impl<T, X> Clone for Parser<T, X> {
    fn clone(&self) -> Self {
        Self {
            strategy: Arc::clone(&self.strategy),
        }
    }
}

impl<T, X> Parser<T, X> {
    pub fn new(strategy: impl DecodeStrategy<T, X> + 'static) -> Self {
        Self {
            strategy: Arc::new(strategy),
        }
    }

    pub fn shape(&self) -> TargetShape {
        self.strategy.shape()
    }

    /// Decode `body` and classify the result.
    ///
    /// The returned payload is always a container; the error is `None` only
    /// when its data is present.
    pub fn parse(&self, body: &str) -> (Payload<T, X>, Option<LoadError>) {
        let shape = self.strategy.shape();
        match self.strategy.decode(body) {
            Err(error) => {
                trace!(%shape, error = %error, "decode error");
                (Payload::empty(), Some(LoadError::Decode(error)))
            }
            Ok(None) => {
                trace!(%shape, "no response object, parsing not implemented");
                (Payload::empty(), Some(LoadError::ParsingNotImplemented))
            }
            Ok(Some(payload)) if !payload.is_present() => {
                trace!(%shape, "decoded value absent");
                (payload, Some(LoadError::ParsingFailed))
            }
            Ok(Some(payload)) => {
                trace!(%shape, "decoded payload");
                (payload, None)
            }
        }
    }

    /// Parse `body` into a complete outcome for a response with `status`.
    pub fn classify(&self, status: u16, body: String) -> Outcome<T, X> {
        let (payload, error) = self.parse(&body);
        Outcome::classified(status, body, payload, error)
    }
}

impl<T: DeserializeOwned + 'static> Parser<T> {
    pub fn object() -> Self {
        Self::new(Json::<T>::object())
    }

    pub fn collection() -> Self {
        Self::new(Json::<T>::collection())
    }
}

impl<T: DeserializeOwned + 'static, X: DeserializeOwned + 'static> Parser<T, X> {
    pub fn envelope(key: impl Into<String>) -> Self {
        Self::new(Envelope::<T, X>::object(key))
    }

    pub fn envelope_collection(key: impl Into<String>) -> Self {
        Self::new(Envelope::<T, X>::collection(key))
    }
}

impl Parser<String> {
    pub fn raw() -> Self {
        Self::new(RawBody)
    }
}
