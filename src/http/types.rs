//! Core HTTP protocol types.

use std::ops::{BitOr, BitOrAssign};

// METHOD

/// HTTP request method, usable solo or as a bit mask.
///
/// `HEAD` shares the `GET` bit so that `method.intersects(Method::GET)`
/// covers both; API entries accepting `GET` therefore accept `HEAD` too and
/// must not register a separate `HEAD` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Method(pub(crate) u8);

impl Method {
    pub const GET: Method = Method(1);
    pub const PUT: Method = Method(2);
    pub const HEAD: Method = Method(4 | 1);
    pub const POST: Method = Method(8);
    pub const DELETE: Method = Method(16);

    pub(crate) const NONE: Method = Method(0);

    #[inline]
    pub(crate) fn from_token(token: &[u8]) -> Option<Method> {
        match token {
            b"GET" => Some(Method::GET),
            b"PUT" => Some(Method::PUT),
            b"HEAD" => Some(Method::HEAD),
            b"POST" => Some(Method::POST),
            b"DELETE" => Some(Method::DELETE),
            _ => None,
        }
    }

    #[inline]
    pub const fn intersects(self, other: Method) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::NONE
    }
}

impl BitOr for Method {
    type Output = Method;

    fn bitor(self, rhs: Method) -> Method {
        Method(self.0 | rhs.0)
    }
}

impl BitOrAssign for Method {
    fn bitor_assign(&mut self, rhs: Method) {
        self.0 |= rhs.0;
    }
}

// VERSION

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    /// HTTP/1.1, keep-alive by default.
    #[default]
    Http11,
    /// HTTP/1.0, connection closes after every response.
    Http10,
}

impl Version {
    // trailing space for direct prepend to the status text
    #[inline]
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Version::Http11 => "HTTP/1.1 ",
            Version::Http10 => "HTTP/1.0 ",
        }
    }
}

// STATUS

macro_rules! statuses {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($code:expr, $reason:expr);
    )+) => {
        /// Response statuses supported by kitserv.
        ///
        /// `Unset` is the fresh-transaction sentinel: an API handler that
        /// returns while the status is still `Unset` has suspended and will
        /// be re-entered on the next readiness event. `Hangup` means the
        /// connection is gone and no response should be written at all.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum Status {
            /// No status decided yet; also the handler-suspension signal.
            #[default]
            Unset,
            /// Drop the connection without emitting a response.
            Hangup,
            $(
                $(#[$docs])*
                $name,
            )+
        }

        impl Status {
            /// Numeric status code; the two sentinels map below 100.
            pub const fn code(self) -> u16 {
                match self {
                    Status::Unset => 0,
                    Status::Hangup => 1,
                    $(Status::$name => $code,)+
                }
            }

            // the full status text, CRLF included since it always follows
            pub(crate) const fn reason_line(self) -> &'static str {
                match self {
                    $(Status::$name => concat!($code, " ", $reason, "\r\n"),)+
                    Status::Unset | Status::Hangup => "500 Internal Server Error\r\n",
                }
            }

            #[inline]
            pub const fn is_error(self) -> bool {
                self.code() >= 400
            }
        }
    };
}

statuses! {
    Ok = (200, "OK");
    PartialContent = (206, "Partial Content");
    NotModified = (304, "Not Modified");
    BadRequest = (400, "Bad Request");
    Forbidden = (403, "Permission Denied");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    RequestTimeout = (408, "Request Timeout");
    ContentTooLarge = (413, "Content Too Large");
    UriTooLong = (414, "URI Too Long");
    RangeNotSatisfiable = (416, "Range Not Satisfiable");
    HeaderFieldsTooLarge = (431, "Request Header Fields Too Large");
    InternalError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    ServiceUnavailable = (503, "Service Unavailable");
    VersionNotSupported = (505, "Version Not Supported");
    InsufficientStorage = (507, "Insufficient Storage");
}

// INTERNAL BOOKKEEPING

/// High-level transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum TxnState {
    #[default]
    Read,
    Serve,
    PrepareResponse,
    Send,
    Done,
}

/// Request-parser sub-state, saved across blocked reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ParseState {
    #[default]
    New,
    Method,
    Path,
    Version,
    /// Saw the CR capping the version, waiting for LF.
    VersionLf,
    Head,
    /// Saw the CR capping a header line, waiting for LF.
    HeadLf,
}

/// Result of driving one stage of the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Stage completed; the state field has moved on.
    Advanced,
    /// Would block; return control to the worker.
    Blocked,
}

/// A substring of the request-header buffer as (offset, length).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Span {
    pub off: usize,
    pub len: usize,
}

impl Span {
    #[inline]
    pub(crate) const fn of(off: usize, len: usize) -> Span {
        Span { off, len }
    }

    #[inline]
    pub(crate) const fn end(self) -> usize {
        self.off + self.len
    }
}
