//! API tree and the handler invocation protocol.
//!
//! The tree is static after startup and shared by every worker. Matching
//! walks the request path one segment at a time: entries of the current
//! node are tried first (first match wins), then subtrees are descended.
//! Methods of every prefix-matched entry are collected so a path match
//! without a method match can answer 405 with an accurate `Allow` header.

use crate::http::{
    client::Client,
    types::{Method, Status, Step, TxnState},
};
use memchr::memchr;
use std::any::Any;
use std::sync::Arc;

/// An API endpoint implementation.
///
/// The handler drives the response through the [`Client`] API: read the
/// payload, write body bytes or register a file, add headers, and finally
/// set a response status. Returning with the status still
/// [`Status::Unset`] signals suspension: the server re-arms readiness and
/// re-enters the handler, passing back whatever continuation was stashed
/// with [`Client::save_state`], when the connection becomes readable
/// again.
pub trait ApiHandler: Send + Sync + 'static {
    fn handle(&self, client: &mut Client, state: Option<Box<dyn Any + Send>>);
}

impl<F> ApiHandler for F
where
    F: Fn(&mut Client, Option<Box<dyn Any + Send>>) + Send + Sync + 'static,
{
    fn handle(&self, client: &mut Client, state: Option<Box<dyn Any + Send>>) {
        self(client, state)
    }
}

/// One endpoint: a path-segment prefix bound to a method mask and handler.
pub struct ApiEntry {
    prefix: String,
    method: Method,
    finishes_path: bool,
    handler: Arc<dyn ApiHandler>,
}

impl ApiEntry {
    /// `prefix` matches exactly one path segment and must not contain `/`.
    /// `method` may be a mask (`Method::GET | Method::POST`); GET implies
    /// HEAD, do not register a separate HEAD entry.
    pub fn new(prefix: impl Into<String>, method: Method, handler: impl ApiHandler) -> Self {
        let prefix = prefix.into();
        debug_assert!(!prefix.contains('/'));
        ApiEntry {
            prefix,
            method,
            finishes_path: false,
            handler: Arc::new(handler),
        }
    }

    /// Refuse to match when non-slash path components remain after this
    /// segment.
    pub fn finishes_path(mut self) -> Self {
        self.finishes_path = true;
        self
    }
}

/// A node in the API tree: a segment prefix with entries and subtrees.
pub struct ApiTree {
    prefix: String,
    subtrees: Vec<ApiTree>,
    entries: Vec<ApiEntry>,
}

impl ApiTree {
    /// The tree entry point; its prefix is ignored during matching.
    pub fn root() -> Self {
        ApiTree::new("")
    }

    pub fn new(prefix: impl Into<String>) -> Self {
        ApiTree {
            prefix: prefix.into(),
            subtrees: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn entry(mut self, entry: ApiEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn subtree(mut self, tree: ApiTree) -> Self {
        self.subtrees.push(tree);
        self
    }
}

pub(crate) enum Walk {
    Matched(Arc<dyn ApiHandler>),
    /// A prefix matched but no method did; `allow` holds the collected
    /// methods for the 405 response.
    MethodRejected,
    NoMatch,
}

impl ApiTree {
    /// Walk the tree for `path` (leading slashes already stripped).
    pub(crate) fn walk(&self, mut path: &[u8], method: Method, allow: &mut Method) -> Walk {
        let mut tree = self;

        'descend: loop {
            let seg_end = memchr(b'/', path).unwrap_or(path.len());
            let segment = &path[..seg_end];

            for entry in &tree.entries {
                if entry.prefix.as_bytes() != segment {
                    continue;
                }
                if entry.finishes_path && path[seg_end..].iter().any(|&b| b != b'/') {
                    continue;
                }
                *allow |= entry.method;
                if method.intersects(entry.method) {
                    return Walk::Matched(Arc::clone(&entry.handler));
                }
            }
            if !allow.is_empty() {
                return Walk::MethodRejected;
            }

            for sub in &tree.subtrees {
                if sub.prefix.as_bytes() == segment {
                    tree = sub;
                    path = if seg_end < path.len() {
                        &path[seg_end + 1..]
                    } else {
                        b""
                    };
                    continue 'descend;
                }
            }
            return Walk::NoMatch;
        }
    }
}

impl Client {
    /// The serve stage: latch and invoke an API endpoint, or fall through
    /// to the static responder.
    pub(crate) fn serve_request(&mut self) -> Result<Step, Status> {
        let shared = Arc::clone(&self.shared);

        if let Some(tree) = &shared.api {
            if self.ta.api_endpoint.is_none() {
                let path = self.span(self.ta.req_path);
                let trimmed = {
                    let mut p = path;
                    while let [b'/', rest @ ..] = p {
                        p = rest;
                    }
                    p
                };
                let mut allow = self.ta.api_allow;
                let outcome = tree.walk(trimmed, self.ta.req_method, &mut allow);
                self.ta.api_allow = allow;
                match outcome {
                    Walk::Matched(handler) => self.ta.api_endpoint = Some(handler),
                    Walk::MethodRejected => {
                        self.ta.resp_status = Status::MethodNotAllowed;
                        self.ta.state = TxnState::PrepareResponse;
                        return Ok(Step::Advanced);
                    }
                    Walk::NoMatch => {}
                }
            }

            if let Some(handler) = self.ta.api_endpoint.clone() {
                let state = self.ta.api_state.take();
                handler.handle(self, state);
                if self.ta.resp_status == Status::Unset {
                    // suspended; re-enter on the next readiness event
                    return Ok(Step::Blocked);
                }
                self.ta.state = TxnState::PrepareResponse;
                return Ok(Step::Advanced);
            }
        }

        let path = self.span(self.ta.req_path).to_vec();
        self.serve_static(&path, None);
        self.ta.state = TxnState::PrepareResponse;
        Ok(Step::Advanced)
    }
}
