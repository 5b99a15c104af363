//! Response assembly and the send loop.
//!
//! `prepare_response` writes the status line into the response-start
//! buffer and finishes the header block (content-length, server, final
//! CRLF), synthesizing a canonical error response first when the status is
//! an error. `send_response` then drains the response-start, header, and
//! body-buffer segments with vectored writes and, when a file is
//! registered, follows up with a `sendfile(2)` loop. Both suspend cleanly
//! when the socket would block.

use crate::{
    buffer::BufferFull,
    http::{
        client::{Client, RespChannel},
        types::{Method, Status, Step, TxnState, Version},
    },
};
use std::io::{self, IoSlice};
use std::os::fd::AsRawFd;
use tokio::io::Interest;

const SERVER_NAME: &str = "kitserv";

impl Client {
    /// Finish the response buffers for sending.
    ///
    /// An error status takes the error path first (honoring the preserve
    /// flags), and a failure while assembling (507) re-enters the error
    /// path exactly once. `Err` means the connection is unsalvageable.
    pub(crate) fn prepare_response(&mut self) -> Result<(), ()> {
        if self.ta.resp_status == Status::Hangup {
            return Err(());
        }

        let mut already_errored = false;
        if self.ta.resp_status.is_error() {
            self.prepare_error_response()?;
            already_errored = true;
        }

        loop {
            if self.assemble().is_ok() {
                self.ta.state = TxnState::Send;
                return Ok(());
            }
            if already_errored {
                log::error!(
                    "unsalvageable handling during error {}",
                    self.ta.resp_status.code()
                );
                return Err(());
            }
            self.prepare_error_response()?;
            already_errored = true;
        }
    }

    /// Status line, content-length, server header, terminating CRLF.
    fn assemble(&mut self) -> Result<(), BufferFull> {
        self.resp_start.clear();
        if self.ta.resp_status == Status::Unset {
            log::error!("response status missing, sending 500");
        }
        // the start buffer always fits a version and status text
        let _ = self
            .resp_start
            .append(self.ta.req_version.as_str().as_bytes());
        let _ = self
            .resp_start
            .append(self.ta.resp_status.reason_line().as_bytes());

        // measured from the file range when a file (or HEAD sizing) is
        // registered, from the body buffer otherwise
        let content_length = if self.ta.resp_channel.is_buffer() {
            self.resp_body.len() as i64 - self.ta.resp_body_pos
        } else {
            self.ta.resp_body_end - self.ta.resp_body_pos + 1
        };
        self.header_add("content-length", content_length)?;
        self.header_add("server", SERVER_NAME)?;

        self.resp_headers.append(b"\r\n").map_err(|e| {
            self.ta.resp_status = Status::InsufficientStorage;
            e
        })
    }

    /// Replace headers and body with the canonical error rendition, as far
    /// as the preserve flags allow.
    ///
    /// Preserving the body preserves the headers with it: the caller
    /// vouched for the response they built, so nothing is wiped at all.
    fn prepare_error_response(&mut self) -> Result<(), ()> {
        if self.ta.preserve_body_on_error {
            return Ok(());
        }

        if !self.ta.preserve_headers_on_error {
            self.resp_headers.clear();
            if self.ta.resp_status == Status::MethodNotAllowed
                && self.header_add_allow().is_err()
            {
                return Err(());
            }
        }

        self.ta.resp_body_pos = 0;
        self.ta.resp_body_end = 0;
        self.resp_body.clear();
        self.ta.resp_channel = RespChannel::Buffer;

        if self.header_add_content_type("text/plain").is_err() {
            return Err(());
        }

        let sentence: &[u8] = match self.ta.resp_status {
            Status::BadRequest => b"Bad request.",
            Status::Forbidden => b"Permission denied.",
            Status::NotFound => {
                let path = self.ta.req_path;
                if self.resp_body.append(b"Not found: ").is_err() {
                    return Err(());
                }
                let path = &self.req_headers[path.off..path.end()];
                return self.resp_body.append(path).map_err(|_| ());
            }
            Status::MethodNotAllowed => b"Method not allowed.",
            Status::RequestTimeout => b"Request timeout.",
            Status::ContentTooLarge => b"Content too large.",
            Status::UriTooLong => b"URI too long.",
            Status::RangeNotSatisfiable => b"Range not satisfiable.",
            Status::HeaderFieldsTooLarge => b"Request header fields too large.",
            Status::NotImplemented => b"Not implemented.",
            Status::ServiceUnavailable => b"Service unavailable.",
            Status::VersionNotSupported => b"Version not supported.",
            Status::InsufficientStorage => b"Insufficient storage.",
            _ => b"Internal server error.",
        };
        self.resp_body.append(sentence).map_err(|_| ())
    }

    /// `Allow:` from the methods collected during the tree walk, in
    /// canonical order, with HEAD implied by GET. Static-only paths (no
    /// flags collected) allow GET and HEAD.
    fn header_add_allow(&mut self) -> Result<(), BufferFull> {
        let allow = self.ta.api_allow;
        let mut list = String::with_capacity(32);
        if allow.is_empty() {
            list.push_str("GET, HEAD");
        } else {
            if allow.intersects(Method::GET) {
                list.push_str("GET, HEAD, ");
            }
            if allow.intersects(Method::PUT) {
                list.push_str("PUT, ");
            }
            if allow.intersects(Method::POST) {
                list.push_str("POST, ");
            }
            if allow.intersects(Method::DELETE) {
                list.push_str("DELETE, ");
            }
            list.truncate(list.len() - 2);
        }
        self.header_add("allow", list)
    }

    /// Drain the response to the socket.
    ///
    /// `Ok(Blocked)` re-arms for writability with all cursors intact.
    /// `Ok(Advanced)` means the response is out and the connection stays
    /// alive; `Err` means it must close (send failure, error status, or
    /// HTTP/1.0).
    pub(crate) fn send_response(&mut self) -> Result<Step, ()> {
        loop {
            let start = &self.resp_start.as_slice()[self.ta.resp_start_pos..];
            let head = &self.resp_headers.as_slice()[self.ta.resp_headers_pos..];
            let body_active = self.ta.resp_channel.is_buffer()
                && self.ta.req_method != Method::HEAD
                && self.ta.resp_body_pos as usize <= self.resp_body.len();
            let body = if body_active {
                &self.resp_body.as_slice()[self.ta.resp_body_pos as usize..]
            } else {
                &[]
            };

            if start.is_empty() && head.is_empty() && body.is_empty() {
                break;
            }

            let mut iovs = [IoSlice::new(b""); 3];
            let mut count = 0;
            for seg in [start, head, body] {
                if !seg.is_empty() {
                    iovs[count] = IoSlice::new(seg);
                    count += 1;
                }
            }

            let Some(sock) = self.sock.as_ref() else {
                return Err(());
            };
            match sock.try_write_vectored(&iovs[..count]) {
                Ok(mut written) => {
                    // charge the written bytes against the cursors in order
                    let adv = written.min(start.len());
                    self.ta.resp_start_pos += adv;
                    written -= adv;
                    let adv = written.min(head.len());
                    self.ta.resp_headers_pos += adv;
                    written -= adv;
                    if body_active {
                        let adv = written.min(body.len());
                        self.ta.resp_body_pos += adv as i64;
                        written -= adv;
                    }
                    debug_assert_eq!(written, 0);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Step::Blocked),
                Err(_) => return Err(()),
            }
        }

        if matches!(self.ta.resp_channel, RespChannel::File(_)) {
            if self.ta.req_method != Method::HEAD {
                while self.ta.resp_body_pos <= self.ta.resp_body_end {
                    match self.sendfile_once() {
                        Ok(0) => {
                            // the file shrank underneath us
                            log::warn!("sendfile hit eof before the registered range end");
                            return Err(());
                        }
                        Ok(_) => {}
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Step::Blocked)
                        }
                        Err(_) => return Err(()),
                    }
                }
            }
            // done with the file (or HEAD never needed it)
            self.ta.resp_channel = RespChannel::Buffer;
        }

        self.ta.state = TxnState::Done;
        if self.ta.resp_status.is_error() || self.ta.req_version == Version::Http10 {
            return Err(());
        }
        Ok(Step::Advanced)
    }

    fn sendfile_once(&mut self) -> io::Result<usize> {
        let RespChannel::File(file) = &self.ta.resp_channel else {
            unreachable!("sendfile without a registered file");
        };
        let sock = self
            .sock
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        let count = (self.ta.resp_body_end - self.ta.resp_body_pos + 1) as usize;
        let mut offset: libc::off_t = self.ta.resp_body_pos;
        let sock_fd = sock.as_raw_fd();
        let file_fd = file.as_raw_fd();

        let sent = sock.try_io(Interest::WRITABLE, || {
            let rc = unsafe { libc::sendfile(sock_fd, file_fd, &mut offset, count) };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(rc as usize)
            }
        });
        if sent.is_ok() {
            // the kernel advanced the offset for us
            self.ta.resp_body_pos = offset;
        }
        sent
    }
}
