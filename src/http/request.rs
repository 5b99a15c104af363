//! Resumable request parser.
//!
//! The parser walks the client's request-header buffer with two cursors: a
//! block anchor at the start of the current unconsumed token and a scan
//! iterator. On entry it attempts one non-blocking read into the buffer
//! tail, then resumes tokenizing at the saved sub-state. Whenever the scan
//! runs past the valid end of the buffer it goes back to the read step; if
//! that read would block, the cursors and sub-state are saved and control
//! returns to the worker. Arbitrary fragmentation of the incoming bytes
//! therefore produces the same parse as a single full read.

use crate::{
    config::{HTTP_BUFSZ, HTTP_MAX_COOKIES},
    http::{
        client::{Client, Cookie},
        types::{Method, ParseState, Span, Status, Step, TxnState, Version},
    },
};
use memchr::memchr;
use std::io;

enum ReadOutcome {
    /// New bytes were appended to the buffer.
    Data,
    WouldBlock,
    /// The buffer holds `HTTP_BUFSZ` bytes and cannot take more.
    BufferFull,
    /// Peer EOF or a non-retriable read error.
    Hangup,
}

impl Client {
    fn refill(&mut self) -> ReadOutcome {
        if self.req_headers_len >= HTTP_BUFSZ {
            return ReadOutcome::BufferFull;
        }
        let Some(sock) = self.sock.as_ref() else {
            // detached clients (tests) never grow the buffer on their own
            return ReadOutcome::WouldBlock;
        };
        match sock.try_read(&mut self.req_headers[self.req_headers_len..]) {
            Ok(0) => ReadOutcome::Hangup,
            Ok(n) => {
                self.req_headers_len += n;
                ReadOutcome::Data
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(_) => ReadOutcome::Hangup,
        }
    }

    /// Consume the delimiter the scan stopped on and open the next token.
    #[inline]
    fn parse_advance(&mut self) {
        self.ta.parse_iter += 1;
        self.ta.parse_blk = self.ta.parse_iter;
    }

    /// Read and tokenize the request line and headers.
    ///
    /// `Ok(Blocked)` means the socket ran dry mid-parse; the sub-state is
    /// saved and the call can be repeated on the next readiness event.
    /// `Ok(Advanced)` means the headers are fully parsed and the
    /// transaction has moved to the serve stage.
    pub(crate) fn recv_request(&mut self) -> Result<Step, Status> {
        'read: loop {
            match self.refill() {
                ReadOutcome::Data => {}
                ReadOutcome::WouldBlock => {
                    if self.ta.parse_iter >= self.req_headers_len {
                        return Ok(Step::Blocked);
                    }
                    // unparsed bytes remain, keep tokenizing
                }
                ReadOutcome::BufferFull => {
                    if self.ta.parse_iter >= self.req_headers_len {
                        return Err(Status::HeaderFieldsTooLarge);
                    }
                    // parse what we have and hope the request fit
                }
                ReadOutcome::Hangup => return Err(Status::Hangup),
            }

            loop {
                let len = self.req_headers_len;
                match self.ta.parse_state {
                    ParseState::New => {
                        self.ta.parse_blk = 0;
                        self.ta.parse_iter = 0;
                        self.ta.parse_state = ParseState::Method;
                    }

                    ParseState::Method => {
                        let Some(i) = memchr(b' ', &self.req_headers[self.ta.parse_iter..len])
                        else {
                            self.ta.parse_iter = len;
                            continue 'read;
                        };
                        self.ta.parse_iter += i;
                        let token = &self.req_headers[self.ta.parse_blk..self.ta.parse_iter];
                        let Some(method) = Method::from_token(token) else {
                            // a method is still needed for the error response
                            self.ta.req_method = Method::GET;
                            return Err(Status::NotImplemented);
                        };
                        self.ta.req_method = method;
                        self.parse_advance();
                        self.ta.parse_state = ParseState::Path;
                    }

                    ParseState::Path => {
                        let Some(i) = memchr(b' ', &self.req_headers[self.ta.parse_iter..len])
                        else {
                            self.ta.parse_iter = len;
                            continue 'read;
                        };
                        self.ta.parse_iter += i;
                        self.parse_path()?;
                        self.parse_advance();
                        self.ta.parse_state = ParseState::Version;
                    }

                    ParseState::Version => {
                        let Some(i) = memchr(b'\r', &self.req_headers[self.ta.parse_iter..len])
                        else {
                            self.ta.parse_iter = len;
                            continue 'read;
                        };
                        self.ta.parse_iter += i;
                        let token = &self.req_headers[self.ta.parse_blk..self.ta.parse_iter];
                        if token.len() < 5 || &token[..5] != b"HTTP/" {
                            return Err(Status::BadRequest);
                        }
                        self.ta.req_version = match &token[5..] {
                            b"1.1" => Version::Http11,
                            b"1.0" => Version::Http10,
                            _ => return Err(Status::VersionNotSupported),
                        };
                        self.parse_advance();
                        self.ta.parse_state = ParseState::VersionLf;
                    }

                    ParseState::VersionLf => {
                        if self.ta.parse_iter >= len {
                            continue 'read;
                        }
                        if self.req_headers[self.ta.parse_iter] != b'\n' {
                            return Err(Status::BadRequest);
                        }
                        self.parse_advance();
                        self.ta.parse_state = ParseState::Head;
                    }

                    ParseState::Head => {
                        let Some(i) = memchr(b'\r', &self.req_headers[self.ta.parse_iter..len])
                        else {
                            self.ta.parse_iter = len;
                            continue 'read;
                        };
                        self.ta.parse_iter += i;
                        if self.ta.parse_iter != self.ta.parse_blk {
                            self.parse_header_line()?;
                            self.parse_advance();
                        } else {
                            // empty line: advance only the iterator so the
                            // LF check can tell end-of-headers from a header
                            self.ta.parse_iter += 1;
                        }
                        self.ta.parse_state = ParseState::HeadLf;
                    }

                    ParseState::HeadLf => {
                        if self.ta.parse_iter >= len {
                            continue 'read;
                        }
                        if self.req_headers[self.ta.parse_iter] != b'\n' {
                            return Err(Status::BadRequest);
                        }
                        if self.ta.parse_iter == self.ta.parse_blk {
                            // a header line was consumed, keep reading more
                            self.parse_advance();
                            self.ta.parse_state = ParseState::Head;
                        } else {
                            // empty CRLF: headers are done
                            self.parse_advance();
                            self.ta.req_payload = self.ta.parse_blk;
                            self.ta.req_payload_len = len - self.ta.parse_blk;
                            self.ta.state = TxnState::Serve;
                            return Ok(Step::Advanced);
                        }
                    }
                }
            }
        }
    }

    /// Validate, split, and URL-decode the path token `blk..iter`.
    fn parse_path(&mut self) -> Result<(), Status> {
        let blk = self.ta.parse_blk;
        let iter = self.ta.parse_iter;

        let mut question = None;
        for (idx, &b) in self.req_headers[blk..iter].iter().enumerate() {
            if !(0x20..=0x7e).contains(&b) {
                return Err(Status::BadRequest);
            }
            if question.is_none() && b == b'?' {
                question = Some(blk + idx);
            }
        }

        let (path, query) = match question {
            Some(q) => {
                let plen = url_decode(&mut self.req_headers[blk..q]);
                let qlen = url_decode(&mut self.req_headers[q + 1..iter]);
                (Span::of(blk, plen), Some(Span::of(q + 1, qlen)))
            }
            None => {
                let plen = url_decode(&mut self.req_headers[blk..iter]);
                (Span::of(blk, plen), None)
            }
        };

        if attempted_path_traversal(&self.req_headers[path.off..path.end()]) {
            return Err(Status::BadRequest);
        }
        self.ta.req_path = path;
        self.ta.req_query = query;
        Ok(())
    }

    /// Split the header line `blk..iter` at the first `:` and dispatch it.
    fn parse_header_line(&mut self) -> Result<(), Status> {
        let blk = self.ta.parse_blk;
        let iter = self.ta.parse_iter;

        let Some(colon) = memchr(b':', &self.req_headers[blk..iter]).map(|i| blk + i) else {
            return Err(Status::BadRequest);
        };
        let name = Span::of(blk, colon - blk);

        let mut v = colon + 1;
        while v < iter && matches!(self.req_headers[v], b' ' | b'\t') {
            v += 1;
        }
        self.dispatch_header(name, Span::of(v, iter - v))
    }

    fn dispatch_header(&mut self, name: Span, value: Span) -> Result<(), Status> {
        #[derive(Clone, Copy)]
        enum Known {
            Cookie,
            Range,
            IfModifiedSince,
            ContentLength,
            ContentType,
            ContentDisposition,
        }

        const TABLE: &[(&[u8], Known)] = &[
            (b"cookie", Known::Cookie),
            (b"range", Known::Range),
            (b"if-modified-since", Known::IfModifiedSince),
            (b"content-length", Known::ContentLength),
            (b"content-type", Known::ContentType),
            (b"content-disposition", Known::ContentDisposition),
        ];

        let known = {
            let raw = self.span(name);
            TABLE
                .iter()
                .find(|(n, _)| raw.eq_ignore_ascii_case(n))
                .map(|&(_, k)| k)
        };

        match known {
            Some(Known::Cookie) => self.parse_cookie_header(value),
            Some(Known::Range) => {
                self.ta.range_requested = true;
                self.ta.req_range = Some(value);
            }
            Some(Known::IfModifiedSince) => self.ta.req_modified_since = Some(value),
            Some(Known::ContentLength) => return self.parse_content_length(value),
            Some(Known::ContentType) => self.ta.req_mimetype = Some(value),
            Some(Known::ContentDisposition) => self.ta.req_disposition = Some(value),
            None => {}
        }
        Ok(())
    }

    /// `Cookie: NAME=VALUE; NAME=VALUE`
    ///
    /// A malformed segment ends cookie parsing for this header without
    /// error; cookies past the cap are discarded.
    fn parse_cookie_header(&mut self, value: Span) {
        let mut p = value.off;
        let end = value.end();

        while p < end {
            while p < end && matches!(self.req_headers[p], b' ' | b'\t') {
                p += 1;
            }
            let semi = memchr(b';', &self.req_headers[p..end]).map(|i| p + i);
            let seg_end = semi.unwrap_or(end);
            let Some(eq) = memchr(b'=', &self.req_headers[p..seg_end]).map(|i| p + i) else {
                return;
            };
            if eq + 1 < seg_end {
                if self.cookies.len() >= HTTP_MAX_COOKIES {
                    // stuffed - discard the rest
                    return;
                }
                self.cookies.push(Cookie {
                    key: Span::of(p, eq - p),
                    value: Span::of(eq + 1, seg_end - (eq + 1)),
                });
            }
            match semi {
                Some(s) => p = s + 1,
                None => return,
            }
        }
    }

    fn parse_content_length(&mut self, value: Span) -> Result<(), Status> {
        let raw = self.span(value);
        let parsed = std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok());
        match parsed {
            Some(n) if n >= 0 => {
                self.ta.req_content_len = n;
                Ok(())
            }
            _ => Err(Status::BadRequest),
        }
    }
}

/// Decode percent-hex triplets in place, returning the decoded length.
/// Anything that is not a full `%XX` triplet passes through untouched.
pub(crate) fn url_decode(buf: &mut [u8]) -> usize {
    let mut r = 0;
    let mut s = 0;
    while s < buf.len() {
        if buf[s] == b'%'
            && s + 2 < buf.len()
            && buf[s + 1].is_ascii_hexdigit()
            && buf[s + 2].is_ascii_hexdigit()
        {
            buf[r] = hex_value(buf[s + 1]) << 4 | hex_value(buf[s + 2]);
            s += 3;
        } else {
            buf[r] = buf[s];
            s += 1;
        }
        r += 1;
    }
    r
}

#[inline]
fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

/// True if the path contains a `..` segment bounded by `/` or the ends of
/// the string. Plain dots inside names (`hello..world`) are fine.
pub(crate) fn attempted_path_traversal(path: &[u8]) -> bool {
    let mut i = 0;
    while i + 1 < path.len() {
        if &path[i..i + 2] == b".." {
            let ends = i + 2 == path.len() || path[i + 2] == b'/';
            let starts = i == 0 || path[i - 1] == b'/';
            if ends && starts {
                return true;
            }
        }
        i += 1;
    }
    false
}

#[cfg(test)]
mod parse_tests {
    use super::*;

    fn parsed(req: &[u8]) -> Client {
        let mut client = Client::from_req(req);
        assert_eq!(client.recv_request(), Ok(Step::Advanced));
        client
    }

    #[test]
    fn methods() {
        #[rustfmt::skip]
        let cases = [
            (&b"GET / HTTP/1.1\r\n\r\n"[..],    Ok(Method::GET)),
            (&b"PUT / HTTP/1.1\r\n\r\n"[..],    Ok(Method::PUT)),
            (&b"HEAD / HTTP/1.1\r\n\r\n"[..],   Ok(Method::HEAD)),
            (&b"POST / HTTP/1.1\r\n\r\n"[..],   Ok(Method::POST)),
            (&b"DELETE / HTTP/1.1\r\n\r\n"[..], Ok(Method::DELETE)),

            (&b"PATCH / HTTP/1.1\r\n\r\n"[..],  Err(Status::NotImplemented)),
            (&b"get / HTTP/1.1\r\n\r\n"[..],    Err(Status::NotImplemented)),
            (&b"NONSENSE / HTTP/1.1\r\n\r\n"[..], Err(Status::NotImplemented)),
        ];

        for (req, expected) in cases {
            let mut client = Client::from_req(req);
            match expected {
                Ok(method) => {
                    assert_eq!(client.recv_request(), Ok(Step::Advanced));
                    assert_eq!(client.method(), method);
                }
                Err(status) => assert_eq!(client.recv_request(), Err(status)),
            }
        }
    }

    #[test]
    fn versions() {
        #[rustfmt::skip]
        let cases = [
            (&b"GET / HTTP/1.1\r\n\r\n"[..],  Ok(Version::Http11)),
            (&b"GET / HTTP/1.0\r\n\r\n"[..],  Ok(Version::Http10)),

            (&b"GET / HTTP/2.0\r\n\r\n"[..],  Err(Status::VersionNotSupported)),
            (&b"GET / HTTP/1.2\r\n\r\n"[..],  Err(Status::VersionNotSupported)),
            (&b"GET / HTTP/1.15\r\n\r\n"[..], Err(Status::VersionNotSupported)),
            (&b"GET / HTP/1.1\r\n\r\n"[..],   Err(Status::BadRequest)),
            (&b"GET / 1.1\r\n\r\n"[..],       Err(Status::BadRequest)),
            (&b"GET / HTTP/1.1\rX\r\n"[..],   Err(Status::BadRequest)),
        ];

        for (req, expected) in cases {
            let mut client = Client::from_req(req);
            match expected {
                Ok(version) => {
                    assert_eq!(client.recv_request(), Ok(Step::Advanced));
                    assert_eq!(client.version(), version);
                }
                Err(status) => assert_eq!(client.recv_request(), Err(status)),
            }
        }
    }

    #[test]
    fn paths_and_queries() {
        #[rustfmt::skip]
        let cases: &[(&[u8], &[u8], Option<&[u8]>)] = &[
            (b"GET / HTTP/1.1\r\n\r\n",                b"/",          None),
            (b"GET /a.txt HTTP/1.1\r\n\r\n",           b"/a.txt",     None),
            (b"GET /a/b/c HTTP/1.1\r\n\r\n",           b"/a/b/c",     None),
            (b"GET /x?k=v&d HTTP/1.1\r\n\r\n",         b"/x",         Some(b"k=v&d")),
            (b"GET /x? HTTP/1.1\r\n\r\n",              b"/x",         Some(b"")),
            (b"GET /p%20q HTTP/1.1\r\n\r\n",           b"/p q",       None),
            (b"GET /%2e%2E HTTP/1.1\r\n\r\n",          b"/..",        None), // decoded, caught below
            (b"GET /a%3fb?c%3dd HTTP/1.1\r\n\r\n",     b"/a?b",       Some(b"c=d")),
            (b"GET /litera%l HTTP/1.1\r\n\r\n",        b"/litera%l",  None),
            (b"GET /tail% HTTP/1.1\r\n\r\n",           b"/tail%",     None),
            (b"GET /hello......world HTTP/1.1\r\n\r\n", b"/hello......world", None),
        ];

        for &(req, path, query) in cases {
            if path == b"/.." {
                // decoding happens before the traversal check
                let mut client = Client::from_req(req);
                assert_eq!(client.recv_request(), Err(Status::BadRequest));
                continue;
            }
            let client = parsed(req);
            assert_eq!(client.path(), path, "req: {}", String::from_utf8_lossy(req));
            assert_eq!(client.query().map(|q| q.to_vec()), query.map(|q| q.to_vec()));
        }
    }

    #[test]
    fn path_traversal_rejected() {
        #[rustfmt::skip]
        let cases: &[&[u8]] = &[
            b"GET /../etc/passwd HTTP/1.1\r\n\r\n",
            b"GET /a/../b HTTP/1.1\r\n\r\n",
            b"GET /a/.. HTTP/1.1\r\n\r\n",
            b"GET /a/..%2fb HTTP/1.1\r\n\r\n",
        ];
        for req in cases {
            let mut client = Client::from_req(req);
            assert_eq!(client.recv_request(), Err(Status::BadRequest));
        }

        // dots inside a component are not traversal
        let client = parsed(b"GET /v1..2/file HTTP/1.1\r\n\r\n");
        assert_eq!(client.path(), b"/v1..2/file");
    }

    #[test]
    fn unprintable_path_rejected() {
        let mut client = Client::from_req(b"GET /a\x01b HTTP/1.1\r\n\r\n");
        assert_eq!(client.recv_request(), Err(Status::BadRequest));
    }

    #[test]
    fn recognized_headers() {
        let client = parsed(
            b"PUT /up HTTP/1.1\r\n\
              Content-Length: 42\r\n\
              CONTENT-TYPE: application/json\r\n\
              Content-Disposition: attachment; filename=x.bin\r\n\
              If-Modified-Since: Mon, 01 Jan 2024 00:00:00 GMT\r\n\
              X-Unknown: skipped\r\n\
              \r\n",
        );
        assert_eq!(client.content_length(), 42);
        assert_eq!(client.mime_type(), Some(&b"application/json"[..]));
        assert_eq!(
            client.disposition(),
            Some(&b"attachment; filename=x.bin"[..])
        );
        assert!(client.ta.req_modified_since.is_some());
    }

    #[test]
    fn content_length_grammar() {
        #[rustfmt::skip]
        let cases: &[(&[u8], Result<i64, Status>)] = &[
            (b"GET / HTTP/1.1\r\ncontent-length: 0\r\n\r\n",     Ok(0)),
            (b"GET / HTTP/1.1\r\ncontent-length: 8123\r\n\r\n",  Ok(8123)),

            (b"GET / HTTP/1.1\r\ncontent-length: -5\r\n\r\n",    Err(Status::BadRequest)),
            (b"GET / HTTP/1.1\r\ncontent-length: 12x\r\n\r\n",   Err(Status::BadRequest)),
            (b"GET / HTTP/1.1\r\ncontent-length: \r\n\r\n",      Err(Status::BadRequest)),
            (b"GET / HTTP/1.1\r\ncontent-length: 1.5\r\n\r\n",   Err(Status::BadRequest)),
        ];

        for (req, expected) in cases {
            let mut client = Client::from_req(req);
            match expected {
                Ok(n) => {
                    assert_eq!(client.recv_request(), Ok(Step::Advanced));
                    assert_eq!(client.content_length(), *n);
                }
                Err(status) => assert_eq!(client.recv_request(), Err(*status)),
            }
        }
    }

    #[test]
    fn header_without_colon_rejected() {
        let mut client = Client::from_req(b"GET / HTTP/1.1\r\nBrokenHeader\r\n\r\n");
        assert_eq!(client.recv_request(), Err(Status::BadRequest));
    }

    #[test]
    fn cookie_grammar() {
        #[rustfmt::skip]
        let cases: &[(&[u8], &[(&[u8], &[u8])])] = &[
            (b"a=1",                    &[(b"a", b"1")]),
            (b"a=1; b=2; c=3",          &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]),
            (b"  a=1;   b=2",           &[(b"a", b"1"), (b"b", b"2")]),
            // empty values are not stored
            (b"a=; b=2",                &[(b"b", b"2")]),
            // malformed segment ends parsing without error
            (b"a=1; nonsense; b=2",     &[(b"a", b"1")]),
            (b"nonsense",               &[]),
        ];

        for (header, expected) in cases {
            let mut req = b"GET / HTTP/1.1\r\ncookie: ".to_vec();
            req.extend_from_slice(header);
            req.extend_from_slice(b"\r\n\r\n");
            let client = parsed(&req);

            assert_eq!(
                client.cookies.len(),
                expected.len(),
                "header: {}",
                String::from_utf8_lossy(header)
            );
            for (key, value) in *expected {
                assert_eq!(client.cookie(key), Some(*value));
            }
        }
    }

    #[test]
    fn cookie_cap_discards_overflow() {
        let mut header = Vec::new();
        for i in 0..HTTP_MAX_COOKIES + 10 {
            if i > 0 {
                header.extend_from_slice(b"; ");
            }
            header.extend_from_slice(format!("k{i}=v{i}").as_bytes());
        }
        let mut req = b"GET / HTTP/1.1\r\ncookie: ".to_vec();
        req.extend_from_slice(&header);
        req.extend_from_slice(b"\r\n\r\n");

        let client = parsed(&req);
        assert_eq!(client.cookies.len(), HTTP_MAX_COOKIES);
        assert_eq!(client.cookie(b"k0"), Some(&b"v0"[..]));
        assert_eq!(client.cookie(b"k49"), Some(&b"v49"[..]));
        assert_eq!(client.cookie(b"k50"), None);
    }

    #[test]
    fn payload_bookkeeping() {
        let client = parsed(b"POST /u HTTP/1.1\r\ncontent-length: 4\r\n\r\nbo");
        let payload = client.ta.req_payload;
        assert_eq!(&client.req_headers[payload..payload + 2], b"bo");
        assert_eq!(client.ta.req_payload_len, 2);
        assert_eq!(client.ta.req_payload_pos, 0);
        assert_eq!(client.ta.state, TxnState::Serve);
    }

    #[test]
    fn oversized_headers_are_431() {
        // no terminator anywhere in a full buffer
        let mut client = Client::from_req(b"GET /");
        let fill = vec![b'a'; HTTP_BUFSZ - client.req_headers_len];
        client.push_bytes(&fill);
        assert_eq!(client.recv_request(), Err(Status::HeaderFieldsTooLarge));
    }

    #[test]
    fn incomplete_request_blocks() {
        #[rustfmt::skip]
        let prefixes: &[&[u8]] = &[
            b"",
            b"GE",
            b"GET ",
            b"GET /pa",
            b"GET /path HTTP/1.",
            b"GET /path HTTP/1.1",
            b"GET /path HTTP/1.1\r",
            b"GET /path HTTP/1.1\r\n",
            b"GET /path HTTP/1.1\r\nHost: x",
            b"GET /path HTTP/1.1\r\nHost: x\r\n",
            b"GET /path HTTP/1.1\r\nHost: x\r\n\r",
        ];
        for prefix in prefixes {
            let mut client = Client::from_req(prefix);
            assert_eq!(
                client.recv_request(),
                Ok(Step::Blocked),
                "prefix: {}",
                String::from_utf8_lossy(prefix)
            );
        }
    }

    #[test]
    fn fragmented_delivery_equals_single_read() {
        let req = b"GET /some/file.txt?q=%31 HTTP/1.1\r\n\
                    Cookie: s=t9; u=v\r\n\
                    Range: bytes=0-5\r\n\
                    Content-Length: 3\r\n\
                    \r\n";

        let oneshot = {
            let mut client = Client::from_req(req);
            assert_eq!(client.recv_request(), Ok(Step::Advanced));
            client
        };

        // deliver the same bytes in chunks, re-parsing between each
        for chunk in [1usize, 2, 3, 7] {
            let mut client = Client::from_req(b"");
            let mut fed = 0;
            while fed < req.len() {
                let end = (fed + chunk).min(req.len());
                client.push_bytes(&req[fed..end]);
                fed = end;
                let expected = if fed < req.len() {
                    Step::Blocked
                } else {
                    Step::Advanced
                };
                assert_eq!(client.recv_request(), Ok(expected), "at byte {fed}");
            }

            assert_eq!(client.ta.state, TxnState::Serve);
            assert_eq!(client.method(), oneshot.method());
            assert_eq!(client.path(), oneshot.path());
            assert_eq!(
                client.query().map(<[u8]>::to_vec),
                oneshot.query().map(<[u8]>::to_vec)
            );
            assert_eq!(client.content_length(), oneshot.content_length());
            assert_eq!(client.ta.range_requested, oneshot.ta.range_requested);
            assert_eq!(client.cookie(b"s"), oneshot.cookie(b"s"));
            assert_eq!(client.cookie(b"u"), oneshot.cookie(b"u"));
            assert_eq!(client.ta.req_payload_len, oneshot.ta.req_payload_len);
        }
    }
}

#[cfg(test)]
mod decode_tests {
    use super::*;

    #[test]
    fn url_decode_cases() {
        #[rustfmt::skip]
        let cases: &[(&[u8], &[u8])] = &[
            (b"plain",        b"plain"),
            (b"a%20b",        b"a b"),
            (b"%41%42%43",    b"ABC"),
            (b"%2F",          b"/"),
            (b"%2f",          b"/"),
            (b"100%",         b"100%"),
            (b"%zz",          b"%zz"),
            (b"%1",           b"%1"),
            (b"",             b""),
            (b"%00",          b"\x00"),
            (b"a%%20b",       b"a% b"),
        ];

        for (input, expected) in cases {
            let mut buf = input.to_vec();
            let n = url_decode(&mut buf);
            assert_eq!(
                &buf[..n],
                *expected,
                "input: {}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn round_trip_arbitrary_bytes() {
        // decoded(encode(s)) == s for percent-encodings of arbitrary bytes
        for byte in 0u8..=255 {
            let encoded = format!("%{byte:02x}");
            let mut buf = encoded.into_bytes();
            let n = url_decode(&mut buf);
            assert_eq!(&buf[..n], &[byte]);

            let encoded = format!("%{byte:02X}");
            let mut buf = encoded.into_bytes();
            let n = url_decode(&mut buf);
            assert_eq!(&buf[..n], &[byte]);
        }
    }

    #[test]
    fn traversal_detection() {
        #[rustfmt::skip]
        let cases: &[(&[u8], bool)] = &[
            (b"/..",              true),
            (b"..",               true),
            (b"/../x",            true),
            (b"/a/../b",          true),
            (b"/a/..",            true),
            (b"../a",             true),
            (b"/first.ok/../up",  true),

            (b"/",                false),
            (b"/a.txt",           false),
            (b"/hello..world",    false),
            (b"/a..b/c",          false),
            (b"/..a",             false),
            (b"/a../b",           false),
            (b"/.hidden",         false),
        ];

        for (path, expected) in cases {
            assert_eq!(
                attempted_path_traversal(path),
                *expected,
                "path: {}",
                String::from_utf8_lossy(path)
            );
        }
    }
}
