//! Per-slot client state and the public in-handler API.
//!
//! A [`Client`] is one preallocated connection slot: the request-header
//! buffer, the response buffers, and the active transaction record. A slot
//! is rented from a worker's freelist when a connection is accepted and
//! returned when it closes; between keep-alive transactions only the
//! transaction record is reset and any already-buffered bytes of the next
//! request are shifted to the front of the header buffer.

use crate::{
    api::ApiHandler,
    buffer::{Buffer, BufferFull, FixedBuf},
    config::{Shared, HTTP_BUFSZ, HTTP_BUFSZ_SMALL, HTTP_MAX_COOKIES},
    http::types::{Method, ParseState, Span, Status, TxnState, Version},
};
use std::{any::Any, fmt, fs::File, io, sync::Arc, time::SystemTime};
use tokio::net::TcpStream;

/// One `key=value` pair from a `Cookie` header, as spans into the
/// request-header buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cookie {
    pub key: Span,
    pub value: Span,
}

/// Where the response payload comes from.
#[derive(Debug, Default)]
pub(crate) enum RespChannel {
    /// Send from the response-body buffer.
    #[default]
    Buffer,
    /// Zero-copy send from an open file within `[resp_body_pos, resp_body_end]`.
    File(File),
    /// Size bookkeeping only: content-length comes from the range math but
    /// no file is held and no payload bytes are sent (HEAD).
    FileSize,
}

impl RespChannel {
    #[inline]
    pub(crate) fn is_buffer(&self) -> bool {
        matches!(self, RespChannel::Buffer)
    }
}

/// One HTTP request-and-response exchange, zero-filled between keep-alive
/// iterations.
#[derive(Default)]
pub(crate) struct Transaction {
    pub state: TxnState,
    pub parse_state: ParseState,
    /// Start of the current unconsumed token (offset into the header buffer).
    pub parse_blk: usize,
    /// Current scan position.
    pub parse_iter: usize,

    pub req_method: Method,
    pub req_version: Version,
    /// Offset of the first payload byte in the header buffer.
    pub req_payload: usize,
    /// Consumed payload bytes, relative to `req_payload`.
    pub req_payload_pos: usize,
    /// Payload bytes available in the buffer, relative to `req_payload`.
    pub req_payload_len: usize,
    pub req_content_len: i64,
    pub req_path: Span,
    pub req_query: Option<Span>,
    pub req_mimetype: Option<Span>,
    pub req_range: Option<Span>,
    pub req_disposition: Option<Span>,
    pub req_modified_since: Option<Span>,

    pub resp_status: Status,
    pub resp_start_pos: usize,
    pub resp_headers_pos: usize,
    pub resp_channel: RespChannel,
    /// Send progress; starts at the range start. Interpreted as a file
    /// offset for `File`/`FileSize` channels, a body-buffer offset otherwise.
    pub resp_body_pos: i64,
    /// Final file offset, inclusive.
    pub resp_body_end: i64,
    pub range_requested: bool,
    pub preserve_headers_on_error: bool,
    pub preserve_body_on_error: bool,

    /// Latched endpoint, so a suspended handler is re-entered without
    /// re-walking the tree.
    pub api_endpoint: Option<Arc<dyn ApiHandler>>,
    /// Handler-owned continuation, handed back on re-entry.
    pub api_state: Option<Box<dyn Any + Send>>,
    /// Methods collected while walking the tree, for the 405 `Allow` header.
    pub api_allow: Method,
}

/// A preallocated connection slot.
///
/// Inside an API handler this is also the request/response API: accessors
/// for the parsed request, the payload reader, body writers, header
/// setters, and the completion/suspension controls.
pub struct Client {
    pub(crate) req_headers: Box<[u8]>,
    /// May carry over into the next transaction, see
    /// [`finalize_transaction`](Client::finalize_transaction).
    pub(crate) req_headers_len: usize,
    pub(crate) cookies: Vec<Cookie>,
    pub(crate) resp_start: FixedBuf,
    pub(crate) resp_headers: FixedBuf,
    pub(crate) resp_body: Buffer,
    pub(crate) ta: Transaction,
    pub(crate) sock: Option<TcpStream>,
    pub(crate) shared: Arc<Shared>,
}

impl Client {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Client {
            req_headers: vec![0; HTTP_BUFSZ].into_boxed_slice(),
            req_headers_len: 0,
            cookies: Vec::with_capacity(HTTP_MAX_COOKIES),
            resp_start: FixedBuf::new(HTTP_BUFSZ_SMALL),
            resp_headers: FixedBuf::new(HTTP_BUFSZ),
            resp_body: Buffer::new(HTTP_BUFSZ),
            ta: Transaction::default(),
            sock: None,
            shared,
        }
    }

    fn cleanup(&mut self) {
        self.ta = Transaction::default();
        self.cookies.clear();
        self.resp_start.clear();
        self.resp_headers.clear();
        self.resp_body.reset(HTTP_BUFSZ);
    }

    /// Reset for a new transaction on the same connection.
    ///
    /// The client may have sent part of its next request into the buffer of
    /// this one; what this transaction considered payload becomes the start
    /// of the next request's headers.
    pub(crate) fn finalize_transaction(&mut self) {
        let start = self.ta.req_payload + self.ta.req_payload_pos;
        let end = self.ta.req_payload + self.ta.req_payload_len;
        debug_assert!(start <= end && end <= HTTP_BUFSZ);
        self.req_headers.copy_within(start..end, 0);
        self.req_headers_len = end - start;
        self.cleanup();
    }

    /// Reset for a fresh connection.
    pub(crate) fn reset(&mut self) {
        self.req_headers_len = 0;
        self.cleanup();
    }

    #[inline]
    pub(crate) fn span(&self, span: Span) -> &[u8] {
        &self.req_headers[span.off..span.end()]
    }
}

// Request accessors
impl Client {
    #[inline]
    pub fn method(&self) -> Method {
        self.ta.req_method
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.ta.req_version
    }

    /// URL-decoded request path.
    #[inline]
    pub fn path(&self) -> &[u8] {
        self.span(self.ta.req_path)
    }

    /// Request path as UTF-8, if it is valid UTF-8.
    #[inline]
    pub fn path_str(&self) -> Option<&str> {
        simdutf8::basic::from_utf8(self.path()).ok()
    }

    /// URL-decoded query string, without the `?`.
    #[inline]
    pub fn query(&self) -> Option<&[u8]> {
        self.ta.req_query.map(|s| self.span(s))
    }

    /// `Content-Length` value, 0 when the header was absent.
    #[inline]
    pub fn content_length(&self) -> i64 {
        self.ta.req_content_len
    }

    /// Raw `Content-Type` value.
    #[inline]
    pub fn mime_type(&self) -> Option<&[u8]> {
        self.ta.req_mimetype.map(|s| self.span(s))
    }

    /// Raw `Content-Disposition` value.
    #[inline]
    pub fn disposition(&self) -> Option<&[u8]> {
        self.ta.req_disposition.map(|s| self.span(s))
    }

    /// Value of the request cookie with the given key, if any.
    pub fn cookie(&self, key: &[u8]) -> Option<&[u8]> {
        self.cookies
            .iter()
            .find(|c| self.span(c.key) == key)
            .map(|c| self.span(c.value))
    }

    /// The requested content range as `(from, to)`, with `-1` standing for
    /// an absent bound (`bytes=50-` yields `(50, -1)`). `None` when no
    /// range was requested or the header does not parse.
    pub fn range(&self) -> Option<(i64, i64)> {
        if !self.ta.range_requested {
            return None;
        }
        crate::http::fileserve::parse_range(self.span(self.ta.req_range?))
    }

    /// Seconds between `time` and the request's `If-Modified-Since` header
    /// (`time` minus header time, so negative means modified since then).
    /// `None` when the header is absent or unparsable.
    pub fn modified_since_delta(&self, time: SystemTime) -> Option<i64> {
        let raw = self.span(self.ta.req_modified_since?);
        let when = httpdate::parse_http_date(std::str::from_utf8(raw).ok()?).ok()?;
        Some(match time.duration_since(when) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        })
    }
}

// Payload and response-body access
impl Client {
    /// Read up to `buf.len()` payload bytes.
    ///
    /// Bytes already buffered past the request headers are consumed first,
    /// then the socket is read without over-reading into the next request.
    /// A [`WouldBlock`](io::ErrorKind::WouldBlock) error means no bytes
    /// were available right now: save state and return from the handler,
    /// it will be re-entered when more data arrives. Any other error is
    /// fatal for the connection.
    pub fn read_payload(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;

        let avail = self.ta.req_payload_len - self.ta.req_payload_pos;
        if avail > 0 {
            let n = buf.len().min(avail);
            let start = self.ta.req_payload + self.ta.req_payload_pos;
            buf[..n].copy_from_slice(&self.req_headers[start..start + n]);
            self.ta.req_payload_pos += n;
            written = n;
        }

        while written < buf.len() {
            let Some(sock) = self.sock.as_ref() else {
                // detached clients (tests) read like an idle socket
                return if written > 0 {
                    Ok(written)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            };
            match sock.try_read(&mut buf[written..]) {
                Ok(0) => {
                    // peer closed; hand over what we got, if anything
                    return if written > 0 {
                        Ok(written)
                    } else {
                        Err(io::ErrorKind::UnexpectedEof.into())
                    };
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return if written > 0 { Ok(written) } else { Err(e) };
                }
                Err(e) => {
                    self.ta.resp_status = Status::Hangup;
                    return Err(e);
                }
            }
        }

        Ok(written)
    }

    /// Append raw bytes to the response body. Returns the bytes written.
    pub fn write_body(&mut self, buf: &[u8]) -> Result<usize, BufferFull> {
        self.resp_body.append(buf)?;
        Ok(buf.len())
    }

    /// Append formatted content to the response body. Returns the bytes
    /// written.
    pub fn write_body_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<usize, BufferFull> {
        let pre = self.resp_body.len();
        self.resp_body.append_fmt(args)?;
        Ok(self.resp_body.len() - pre)
    }

    /// Clear all currently-set response headers.
    pub fn reset_headers(&mut self) {
        self.resp_headers.clear();
    }

    /// Reset the response body to an empty buffer.
    pub fn reset_body(&mut self) {
        self.resp_body.reset(HTTP_BUFSZ);
    }
}

// Response headers
impl Client {
    /// Add a response header. Fails (and marks the transaction 507) if the
    /// header buffer is full; the buffer is left unchanged in that case.
    ///
    /// `Content-Length` and `Server` are added automatically, do not set
    /// them here.
    pub fn header_add(&mut self, key: &str, value: impl fmt::Display) -> Result<(), BufferFull> {
        match self.resp_headers.append_fmt(format_args!("{key}: {value}\r\n")) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.ta.resp_status = Status::InsufficientStorage;
                Err(e)
            }
        }
    }

    /// Add a `Content-Type` header.
    pub fn header_add_content_type(&mut self, mime: &str) -> Result<(), BufferFull> {
        self.header_add("content-type", mime)
    }

    /// Add a `Content-Type` header guessed from a file extension (without
    /// the period, e.g. `html`).
    pub fn header_add_content_type_guess(
        &mut self,
        extension: Option<&str>,
    ) -> Result<(), BufferFull> {
        self.header_add(
            "content-type",
            crate::http::fileserve::guess_mime_type(extension),
        )
    }

    /// Add a `Last-Modified` header in RFC 1123 format.
    pub fn header_add_last_modified(&mut self, time: SystemTime) -> Result<(), BufferFull> {
        self.header_add("last-modified", httpdate::fmt_http_date(time))
    }
}

// Response payload selection and transaction controls
impl Client {
    /// Send an open file as the response payload, replacing any previous
    /// file (which is closed). `filesize` is the full size in bytes; use
    /// [`set_send_range`](Client::set_send_range) to narrow the window.
    pub fn send_file(&mut self, file: File, filesize: u64) {
        self.ta.resp_channel = RespChannel::File(file);
        self.ta.resp_body_pos = 0;
        self.ta.resp_body_end = filesize as i64 - 1;
    }

    /// Size-only variant of [`send_file`](Client::send_file): the
    /// content-length math runs as if a file were being sent, but no file
    /// is held and no payload bytes go out. Meant for HEAD handling.
    pub fn send_file_head(&mut self, filesize: u64) {
        self.ta.resp_channel = RespChannel::FileSize;
        self.ta.resp_body_pos = 0;
        self.ta.resp_body_end = filesize as i64 - 1;
    }

    /// Return to sending the response-body buffer, closing any file
    /// registered earlier.
    pub fn send_file_disable(&mut self) {
        self.ta.resp_channel = RespChannel::Buffer;
        self.ta.resp_body_pos = 0;
    }

    /// Set the byte-inclusive window to send from the registered file.
    /// Does not set the `Content-Range` header. `to` is ignored when
    /// sending from the body buffer, which always drains to its end.
    pub fn set_send_range(&mut self, from: u64, to: u64) {
        self.ta.resp_body_pos = from as i64;
        self.ta.resp_body_end = to as i64;
    }

    /// Keep API-set headers when an error response is generated. Off by
    /// default: headers are wiped for a generic error response. When only
    /// the headers are preserved, a `Content-Type: text/plain` is still
    /// added for the canonical error body.
    pub fn set_preserve_headers_on_error(&mut self, enabled: bool) {
        self.ta.preserve_headers_on_error = enabled;
    }

    /// Keep the API-set body (buffer or file) when an error response is
    /// generated. Off by default. Preserving the body also keeps the
    /// headers; the caller is responsible for whatever content-type their
    /// body needs.
    pub fn set_preserve_body_on_error(&mut self, enabled: bool) {
        self.ta.preserve_body_on_error = enabled;
    }

    /// Set the response status. Until a handler sets this, kitserv assumes
    /// the handler has not finished and will re-enter it on the next
    /// readiness event.
    pub fn set_response_status(&mut self, status: Status) {
        self.ta.resp_status = status;
    }

    /// Stash handler state to resume from after a suspension; handed back
    /// on the next [`ApiHandler::handle`] call.
    pub fn save_state(&mut self, state: Box<dyn Any + Send>) {
        self.ta.api_state = Some(state);
    }
}


#[cfg(test)]
mod reset_tests {
    use super::*;
    use crate::http::types::Step;

    #[test]
    fn finalize_shifts_residue_to_front() {
        let mut client = Client::from_req(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.0\r\n\r\n");
        assert_eq!(client.recv_request(), Ok(Step::Advanced));

        client.finalize_transaction();
        assert_eq!(client.req_headers_len, 19);
        assert_eq!(&client.req_headers[..19], b"GET /b HTTP/1.0\r\n\r\n");
        assert_eq!(client.ta.state, TxnState::Read);
        assert_eq!(client.ta.parse_state, ParseState::New);
        assert_eq!(client.ta.resp_status, Status::Unset);

        // the shifted bytes parse as the next request
        assert_eq!(client.recv_request(), Ok(Step::Advanced));
        assert_eq!(client.path(), b"/b");
        assert_eq!(client.version(), Version::Http10);
    }

    #[test]
    fn finalize_twice_is_idempotent() {
        let mut client = Client::from_req(b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(client.recv_request(), Ok(Step::Advanced));

        client.finalize_transaction();
        assert_eq!(client.req_headers_len, 0);
        client.finalize_transaction();
        assert_eq!(client.req_headers_len, 0);
        assert_eq!(client.ta.parse_iter, 0);
    }

    #[test]
    fn reset_discards_residue() {
        let mut client = Client::from_req(b"GET /a HTTP/1.1\r\n\r\nleftover");
        assert_eq!(client.recv_request(), Ok(Step::Advanced));

        client.reset();
        assert_eq!(client.req_headers_len, 0);
        client.reset();
        assert_eq!(client.req_headers_len, 0);
    }

    #[test]
    fn read_payload_serves_buffered_bytes_first() {
        let mut client =
            Client::from_req(b"POST /u HTTP/1.1\r\ncontent-length: 8\r\n\r\npayload!");
        assert_eq!(client.recv_request(), Ok(Step::Advanced));
        assert_eq!(client.content_length(), 8);

        let mut buf = [0u8; 5];
        assert_eq!(client.read_payload(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"paylo");

        let mut rest = [0u8; 16];
        assert_eq!(client.read_payload(&mut rest).unwrap(), 3);
        assert_eq!(&rest[..3], b"ad!");

        // drained; a detached client now reads as would-block
        let err = client.read_payload(&mut rest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn cookie_lookup() {
        let mut client = Client::from_req(
            b"GET / HTTP/1.1\r\ncookie: session=abc123; theme=dark\r\n\r\n",
        );
        assert_eq!(client.recv_request(), Ok(Step::Advanced));

        assert_eq!(client.cookie(b"session"), Some(&b"abc123"[..]));
        assert_eq!(client.cookie(b"theme"), Some(&b"dark"[..]));
        assert_eq!(client.cookie(b"missing"), None);
    }
}
