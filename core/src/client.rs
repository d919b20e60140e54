//! Base-URL bound entry point for requests, handlers and loaders.
//!
//! # Design
//! `Client` holds only a `base_url` and a shared transport. It builds
//! `HttpRequest` values relative to the base URL and hands the same transport
//! to every loader it creates, so hosts configure the network layer once.

use std::fmt;
use std::sync::Arc;

use crate::handler::{ResponseCallbacks, ResponseHandler};
use crate::http::{HttpMethod, HttpRequest};
use crate::loader::Loader;
use crate::parser::Parser;
use crate::transport::{Transport, TransportConfig, UreqTransport};

#[derive(Clone)]
pub struct Client {
    base_url: String,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Client over a default `UreqTransport`.
    pub fn new(base_url: &str) -> Self {
        Self::with_transport(base_url, Arc::new(UreqTransport::new()))
    }

    pub fn with_config(base_url: &str, config: TransportConfig) -> Self {
        Self::with_transport(base_url, Arc::new(UreqTransport::with_config(config)))
    }

    pub fn with_transport(base_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Absolute URL for `path`; a missing leading slash is added.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    pub fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, self.url(path))
    }

    pub fn get(&self, path: &str) -> HttpRequest {
        self.request(HttpMethod::Get, path)
    }

    pub fn post(&self, path: &str) -> HttpRequest {
        self.request(HttpMethod::Post, path)
    }

    pub fn put(&self, path: &str) -> HttpRequest {
        self.request(HttpMethod::Put, path)
    }

    pub fn delete(&self, path: &str) -> HttpRequest {
        self.request(HttpMethod::Delete, path)
    }

    /// Run `request` through `handler`, blocking until its callbacks finish.
    pub fn send<T, X, C>(&self, request: &HttpRequest, handler: &ResponseHandler<T, X, C>)
    where
        C: ResponseCallbacks<T, X>,
    {
        handler.send(self.transport.as_ref(), request);
    }

    /// Loader for `request`, sharing this client's transport.
    pub fn loader<T, X>(&self, request: HttpRequest, parser: Parser<T, X>) -> Loader<T, X>
    where
        T: Send + 'static,
        X: Send + 'static,
    {
        Loader::new(self.transport(), request, parser)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new("http://localhost:3000")
    }

    #[test]
    fn builds_requests_relative_to_base_url() {
        let req = client().get("/people");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:3000/people");
        assert!(req.body.is_none());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn each_method_maps_through() {
        let c = client();
        assert_eq!(c.post("x").method, HttpMethod::Post);
        assert_eq!(c.put("x").method, HttpMethod::Put);
        assert_eq!(c.delete("x").method, HttpMethod::Delete);
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let client = Client::new("http://localhost:3000/");
        assert_eq!(client.base_url(), "http://localhost:3000");
        assert_eq!(client.get("people").url, "http://localhost:3000/people");
    }

    #[test]
    fn loader_starts_reset() {
        let loader = client().loader(client().get("/person"), Parser::<String>::raw());
        assert!(loader.is_reset());
        assert_eq!(loader.request().url, "http://localhost:3000/person");
    }
}
