//! Static-file responder.
//!
//! Resolves a request path against a [`RequestContext`], walking the
//! fallback chain until a candidate names a regular file, then sets up the
//! response: open fd (or size-only bookkeeping for HEAD), clamped byte
//! range, content-type guess, `Accept-Ranges`, `Last-Modified`, and the
//! conditional-GET short circuit.

use crate::{
    config::RequestContext,
    http::{
        client::{Client, RespChannel},
        types::{Method, Status},
    },
};
use std::{
    ffi::OsString,
    fs::{File, Metadata},
    io,
    os::unix::ffi::{OsStrExt, OsStringExt},
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

const PATH_MAX: usize = 4096;

/// Parse a `Range` header value: `bytes=A-B`, `bytes=A-`, `bytes=-N`.
///
/// Returns `(from, to)` with `-1` for an absent bound. `None` on any
/// grammar error, including multiple hyphens, a bare `bytes=-`, commas
/// (multipart ranges), or `to < from`.
pub(crate) fn parse_range(raw: &[u8]) -> Option<(i64, i64)> {
    let rest = raw.strip_prefix(b"bytes=")?;

    let mut hyphen = None;
    for (i, &b) in rest.iter().enumerate() {
        match b {
            b'0'..=b'9' => {}
            b'-' if hyphen.is_none() => hyphen = Some(i),
            _ => return None,
        }
    }
    let hyphen = hyphen?;

    let (from_digits, to_digits) = (&rest[..hyphen], &rest[hyphen + 1..]);
    if from_digits.is_empty() && to_digits.is_empty() {
        return None;
    }

    let number = |digits: &[u8]| std::str::from_utf8(digits).ok()?.parse::<i64>().ok();
    let from = if from_digits.is_empty() {
        -1
    } else {
        number(from_digits)?
    };
    let to = if to_digits.is_empty() {
        -1
    } else {
        number(to_digits)?
    };

    if from >= 0 && to >= 0 && to < from {
        return None;
    }
    Some((from, to))
}

/// Resolve a raw range against the file size into an inclusive window.
///
/// `bytes=-N` means the last N bytes; an absent or past-EOF end clamps to
/// EOF. A start past the file size is 416, a grammar error 400.
fn clamp_range(raw: &[u8], filesize: i64) -> Result<(i64, i64), Status> {
    let (mut from, mut to) = parse_range(raw).ok_or(Status::BadRequest)?;

    if from < 0 {
        // suffix range: last `to` bytes of the file
        from = (filesize - to).max(0);
        to = filesize - 1;
    } else {
        if to < 0 || to > filesize - 1 {
            to = filesize - 1;
        }
        if from > filesize {
            return Err(Status::RangeNotSatisfiable);
        }
    }
    Ok((from, to))
}

/// Guess the mime type from a file extension (no period). Unknown or
/// absent extensions are `application/octet-stream`.
pub(crate) fn guess_mime_type(extension: Option<&str>) -> &'static str {
    let Some(ext) = extension else {
        return "application/octet-stream";
    };
    #[rustfmt::skip]
    const TABLE: &[(&str, &str)] = &[
        ("html", "text/html"),
        ("htm",  "text/html"),
        ("css",  "text/css"),
        ("js",   "text/javascript"),
        ("json", "application/json"),
        ("svg",  "image/svg+xml"),
        ("png",  "image/png"),
        ("jpg",  "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif",  "image/gif"),
        ("mp4",  "video/mp4"),
        ("txt",  "text/plain"),
        ("md",   "text/plain"),
        ("zip",  "application/zip"),
    ];
    TABLE
        .iter()
        .find(|(e, _)| ext.eq_ignore_ascii_case(e))
        .map_or("application/octet-stream", |&(_, mime)| mime)
}

enum Candidate {
    Found(PathBuf, Metadata),
    Miss,
}

/// Stat one candidate. Over-length paths and permission failures abort the
/// whole chain; anything else just moves on to the next candidate.
fn verify_candidate(raw: Vec<u8>) -> Result<Candidate, Status> {
    if raw.len() >= PATH_MAX {
        return Err(Status::UriTooLong);
    }
    let path = PathBuf::from(OsString::from_vec(raw));
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() => Ok(Candidate::Found(path, meta)),
        Ok(_) => Ok(Candidate::Miss),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(Status::Forbidden),
        Err(_) => Ok(Candidate::Miss),
    }
}

fn joined(root: &PathBuf, tail: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut raw = root.as_os_str().as_bytes().to_vec();
    raw.push(b'/');
    raw.extend_from_slice(tail);
    raw.extend_from_slice(suffix);
    raw
}

/// Walk the candidate chain and return the first regular file.
fn resolve(path: &[u8], ctx: &RequestContext) -> Result<(PathBuf, Metadata), Status> {
    // the root index replaces "/" outright; everything else starts from
    // the path itself
    let primary = match &ctx.root_fallback {
        Some(index) if path == b"/" => joined(&ctx.root, index.as_bytes(), b""),
        _ => joined(&ctx.root, path, b""),
    };
    if let Candidate::Found(p, m) = verify_candidate(primary)? {
        return Ok((p, m));
    }

    if ctx.use_html_append_fallback {
        if let Candidate::Found(p, m) = verify_candidate(joined(&ctx.root, path, b".html"))? {
            return Ok((p, m));
        }
    }

    if let Some(fallback) = &ctx.fallback {
        if let Candidate::Found(p, m) =
            verify_candidate(joined(&ctx.root, fallback.as_bytes(), b""))?
        {
            return Ok((p, m));
        }
    }

    Err(Status::NotFound)
}

fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

impl Client {
    /// Serve `path` as a static file using `ctx`, or the server's default
    /// context when `None`.
    ///
    /// Sets the response status (success or error) and, on success, the
    /// response payload channel, range window, and standard headers. API
    /// handlers may call this to answer with a file the same way the
    /// built-in static route does.
    pub fn serve_static(&mut self, path: &[u8], ctx: Option<&RequestContext>) {
        let shared = std::sync::Arc::clone(&self.shared);
        let ctx = ctx.unwrap_or(&shared.context);

        // only GET and HEAD make sense against the filesystem
        if !self.ta.req_method.intersects(Method::GET) {
            self.ta.resp_status = Status::MethodNotAllowed;
            return;
        }

        let (fname, meta) = match resolve(path, ctx) {
            Ok(found) => found,
            Err(status) => {
                self.ta.resp_status = status;
                return;
            }
        };

        if self.ta.req_method == Method::HEAD {
            // the stat already gave us everything we need
            self.ta.resp_channel = RespChannel::FileSize;
        } else {
            match File::open(&fname) {
                Ok(file) => self.ta.resp_channel = RespChannel::File(file),
                Err(e) => {
                    log::warn!("open {}: {e}", fname.display());
                    self.ta.resp_status = Status::InternalError;
                    return;
                }
            }
        }

        let size = meta.len() as i64;
        self.ta.resp_body_end = size - 1;

        if self.ta.range_requested {
            let raw = self.ta.req_range.unwrap_or_default();
            match clamp_range(self.span(raw), size) {
                Ok((from, to)) => {
                    self.ta.resp_body_pos = from;
                    self.ta.resp_body_end = to;
                    if self
                        .header_add("content-range", format_args!("bytes {from}-{to}/{size}"))
                        .is_err()
                    {
                        self.ta.resp_status = Status::InternalError;
                        self.ta.resp_channel = RespChannel::Buffer;
                        return;
                    }
                }
                Err(Status::RangeNotSatisfiable) => {
                    let _ = self.header_add("content-range", format_args!("*/{size}"));
                    // the 416 must carry the content-range we just wrote
                    self.ta.preserve_headers_on_error = true;
                    self.ta.resp_status = Status::RangeNotSatisfiable;
                    self.ta.resp_channel = RespChannel::Buffer;
                    return;
                }
                Err(status) => {
                    self.ta.resp_status = status;
                    self.ta.resp_channel = RespChannel::Buffer;
                    return;
                }
            }
        }

        let extension = fname.extension().and_then(|e| e.to_str());
        let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
        if self.header_add_content_type_guess(extension).is_err()
            || self.header_add("accept-ranges", "bytes").is_err()
            || self.header_add_last_modified(mtime).is_err()
        {
            self.ta.resp_status = Status::InternalError;
            self.ta.resp_channel = RespChannel::Buffer;
            return;
        }

        if let Some(since) = self.ta.req_modified_since {
            let parsed = std::str::from_utf8(self.span(since))
                .ok()
                .and_then(|s| httpdate::parse_http_date(s).ok());
            let Some(since_time) = parsed else {
                self.ta.resp_status = Status::BadRequest;
                self.ta.resp_channel = RespChannel::Buffer;
                return;
            };
            if unix_seconds(mtime) <= unix_seconds(since_time) {
                self.ta.resp_status = Status::NotModified;
                // the response is otherwise identical, just bodiless
                self.ta.req_method = Method::HEAD;
                self.ta.resp_channel = RespChannel::Buffer;
                return;
            }
        }

        self.ta.resp_status = if self.ta.range_requested {
            Status::PartialContent
        } else {
            Status::Ok
        };
    }
}


#[cfg(test)]
mod mime_tests {
    use super::*;

    #[test]
    fn table() {
        #[rustfmt::skip]
        let cases = [
            (Some("html"), "text/html"),
            (Some("htm"),  "text/html"),
            (Some("HTML"), "text/html"),
            (Some("css"),  "text/css"),
            (Some("js"),   "text/javascript"),
            (Some("json"), "application/json"),
            (Some("svg"),  "image/svg+xml"),
            (Some("png"),  "image/png"),
            (Some("jpg"),  "image/jpeg"),
            (Some("jpeg"), "image/jpeg"),
            (Some("gif"),  "image/gif"),
            (Some("mp4"),  "video/mp4"),
            (Some("txt"),  "text/plain"),
            (Some("md"),   "text/plain"),
            (Some("zip"),  "application/zip"),

            (Some("exe"),  "application/octet-stream"),
            (Some(""),     "application/octet-stream"),
            (None,         "application/octet-stream"),
        ];

        for (ext, expected) in cases {
            assert_eq!(guess_mime_type(ext), expected);
        }
    }
}

#[cfg(test)]
mod resolve_tests {
    use super::*;
    use std::fs;

    fn scratch_root() -> (tempfile::TempDir, RequestContext) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "HELLO\n").unwrap();
        fs::write(dir.path().join("index.html"), "INDEX\n").unwrap();
        fs::write(dir.path().join("page.html"), "PAGE\n").unwrap();
        fs::write(dir.path().join("200.html"), "FALLBACK\n").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let ctx = RequestContext {
            root: dir.path().to_path_buf(),
            root_fallback: Some("index.html".into()),
            fallback: Some("200.html".into()),
            use_html_append_fallback: true,
        };
        (dir, ctx)
    }

    #[test]
    fn fallback_chain() {
        let (_dir, ctx) = scratch_root();

        #[rustfmt::skip]
        let cases: &[(&[u8], &str)] = &[
            (b"/a.txt",     "a.txt"),      // direct hit
            (b"/",          "index.html"), // root fallback
            (b"/page",      "page.html"),  // .html append
            (b"/missing",   "200.html"),   // generic fallback
            (b"/subdir",    "200.html"),   // directories are not files
        ];

        for (path, expected) in cases {
            let (found, meta) = resolve(path, &ctx).unwrap();
            assert!(meta.is_file());
            assert!(
                found.to_str().unwrap().ends_with(expected),
                "path {} resolved to {}",
                String::from_utf8_lossy(path),
                found.display()
            );
        }
    }

    #[test]
    fn miss_without_fallback_is_404() {
        let (_dir, mut ctx) = scratch_root();
        ctx.fallback = None;
        ctx.use_html_append_fallback = false;

        assert_eq!(resolve(b"/missing", &ctx).unwrap_err(), Status::NotFound);
        // and "/" without a root fallback looks up a literal "/" path
        ctx.root_fallback = None;
        assert_eq!(resolve(b"/", &ctx).unwrap_err(), Status::NotFound);
    }

    #[test]
    fn oversized_path_is_414() {
        let (_dir, ctx) = scratch_root();
        let long = vec![b'x'; PATH_MAX];
        assert_eq!(resolve(&long, &ctx).unwrap_err(), Status::UriTooLong);
    }
}
