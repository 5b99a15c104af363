//! kitserv - small, embeddable HTTP/1.x static-file and API server.
//!
//! Every connection slot is preallocated at startup: a fixed request-header
//! buffer, fixed response-start/header buffers, and a growable body buffer
//! that shrinks back between transactions. Requests are parsed by a
//! resumable byte-level state machine that tolerates arbitrary read
//! fragmentation, responses go out through vectored writes plus a
//! zero-copy `sendfile(2)` loop, and HTTP/1.1 keep-alive carries any
//! over-read bytes of the next request across transactions in the same
//! buffer.
//!
//! # Protocol support
//!
//! - **HTTP/1.1** with keep-alive, single-range requests, and
//!   `If-Modified-Since` conditional GETs
//! - **HTTP/1.0** for legacy clients (connection closes after a response)
//!
//! # Serving files
//!
//! The static responder resolves paths against a [`RequestContext`]: the
//! root-index fallback for `/`, the literal path, an optional `.html`
//! append retry, and an optional catch-all fallback file.
//!
//! # Serving an API
//!
//! Endpoints live in an [`ApiTree`] that is matched per path segment
//! before the static responder runs. A handler drives the whole exchange
//! through [`Client`]: read the request payload (possibly across several
//! readiness events), write body bytes or register a file to send, add
//! headers, then set the response status. Returning without a status
//! suspends the handler until the connection is readable again.
//!
//! ```no_run
//! use kitserv::{ApiEntry, ApiTree, Client, Method, RequestContext, ServerConfig, Status};
//! use std::any::Any;
//!
//! fn hello(client: &mut Client, _state: Option<Box<dyn Any + Send>>) {
//!     let _ = client.write_body(b"hello from the api\n");
//!     let _ = client.header_add_content_type("text/plain");
//!     client.set_response_status(Status::Ok);
//! }
//!
//! let mut config = ServerConfig::new(RequestContext::new("/srv/www"));
//! config.api = Some(ApiTree::root().entry(ApiEntry::new("hello", Method::GET, hello)));
//! kitserv::server_start(config).unwrap();
//! ```

pub mod api;
pub mod buffer;
pub mod config;
pub(crate) mod http {
    pub(crate) mod client;
    pub(crate) mod fileserve;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}

pub use crate::{
    api::{ApiEntry, ApiHandler, ApiTree},
    buffer::{Buffer, BufferFull},
    config::{RequestContext, ServerConfig, WaitStrategy},
    http::client::Client,
    http::types::{Method, Status, Version},
    server::server_impl::server_start,
};
