//! Server configuration.
//!
//! Buffer sizes are deliberately fixed: one request must fit its request
//! line and headers into [`HTTP_BUFSZ`] bytes, and each connection slot
//! pre-allocates all of its buffers at startup so that serving a request
//! does not allocate beyond response-body growth.

use crate::api::ApiTree;
use std::path::PathBuf;
use std::time::Duration;

/// Request-header buffer, response-header buffer, and initial response-body
/// size, in bytes.
pub(crate) const HTTP_BUFSZ: usize = 4096;

/// Response status-line buffer size in bytes.
pub(crate) const HTTP_BUFSZ_SMALL: usize = 256;

/// Cookies beyond this count are silently discarded.
pub(crate) const HTTP_MAX_COOKIES: usize = 50;

/// Static-file serving context.
///
/// Resolution order for a request path: the root-index fallback (for `/`
/// only), the path itself, the path with `.html` appended (when enabled),
/// and finally the generic fallback. The first candidate that names a
/// regular file wins.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Root directory to serve files from.
    pub root: PathBuf,
    /// Served for the exact path `/`. `None` to disable.
    pub root_fallback: Option<String>,
    /// Served when a path otherwise resolves to 404, as an exact path from
    /// the root. `None` to disable.
    pub fallback: Option<String>,
    /// Retry `<path>.html` before giving up (`/page` -> `/page.html`).
    pub use_html_append_fallback: bool,
}

impl RequestContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RequestContext {
            root: root.into(),
            root_fallback: Some("index.html".into()),
            fallback: None,
            use_html_append_fallback: false,
        }
    }
}

/// How a worker waits when its connection intake queue is empty.
#[derive(Debug, Clone, Copy)]
pub enum WaitStrategy {
    /// Yield back to the runtime between polls. Lowest latency, busy CPU.
    Yield,
    /// Sleep between polls.
    Sleep(Duration),
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Sleep(Duration::from_micros(50))
    }
}

/// Everything [`server_start`](crate::server_start) needs.
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Worker thread count.
    pub workers: usize,
    /// Total connection slots, divided evenly across workers.
    pub slots: usize,
    pub bind_ipv4: bool,
    /// IPv6 falls back to IPv4 with a warning when the system has no IPv6
    /// support.
    pub bind_ipv6: bool,
    pub wait_strategy: WaitStrategy,
    /// Default static-file context.
    pub context: RequestContext,
    /// Optional API tree; `None` serves static files only.
    pub api: Option<ApiTree>,
}

impl ServerConfig {
    pub fn new(context: RequestContext) -> Self {
        ServerConfig {
            port: 8012,
            workers: 2,
            slots: 128,
            bind_ipv4: true,
            bind_ipv6: true,
            wait_strategy: WaitStrategy::default(),
            context,
            api: None,
        }
    }
}

/// Immutable-after-startup state shared by every worker: the default
/// request context and the API tree.
pub(crate) struct Shared {
    pub context: RequestContext,
    pub api: Option<ApiTree>,
}
