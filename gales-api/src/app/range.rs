//! Single byte-range support for the annotation directory.
//!
//! The gate sits in front of the static file service. Only `GET` requests
//! under the data mount that carry a `Range` header are answered here;
//! everything else reaches the file service untouched. Requests with more
//! than one range lose their `Range` header and get the whole file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use actix_web::body::{BoxBody, MessageBody, SizedStream};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header;
use actix_web::http::{Method, StatusCode};
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpResponse, ResponseError};
use bytes::Bytes;
use futures::stream::{self, Stream};
use thiserror::Error;
use tracing::debug;

use crate::app::AppData;

/// Upper bound on the bytes read per body chunk.
pub const CHUNK_SIZE: u64 = 64 * 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RangeRequest {
    /// `bytes=first-last`, or `bytes=first-` when `last` is `None`.
    Single { first: u64, last: Option<u64> },
    Multiple,
}

#[derive(Debug, Error)]
pub enum RangeError {
    #[error("malformed Range header: {0}")]
    Malformed(String),

    #[error("not found")]
    NotFound,

    #[error("range starts at {first} but the file is {total} bytes")]
    Unsatisfiable { first: u64, total: u64 },

    #[error("failed to read file: {0}")]
    Io(#[from] io::Error),
}

impl ResponseError for RangeError {
    fn status_code(&self) -> StatusCode {
        match self {
            RangeError::Malformed(_) => StatusCode::BAD_REQUEST,
            RangeError::NotFound => StatusCode::NOT_FOUND,
            RangeError::Unsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            RangeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        let mut response = HttpResponse::build(self.status_code());
        response.insert_header((header::CONTENT_TYPE, "text/plain; charset=utf-8"));
        if let RangeError::Unsatisfiable { total, .. } = self {
            response.insert_header((header::CONTENT_RANGE, format!("bytes */{}", total)));
        }
        response.body(self.to_string())
    }
}

/// Parses a `Range` header value. Only the `bytes` unit is understood;
/// suffix ranges (`bytes=-N`) are rejected.
pub fn parse_range(value: &str) -> Result<RangeRequest, RangeError> {
    let malformed = || RangeError::Malformed(value.to_string());

    let (unit, ranges) = value.trim().split_once('=').ok_or_else(malformed)?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Err(malformed());
    }
    if ranges.contains(',') {
        return Ok(RangeRequest::Multiple);
    }

    let (first, last) = ranges.split_once('-').ok_or_else(malformed)?;
    let first: u64 = first.trim().parse().map_err(|_| malformed())?;
    let last = match last.trim() {
        "" => None,
        last => Some(last.parse::<u64>().map_err(|_| malformed())?),
    };
    if let Some(last) = last {
        if last < first {
            return Err(malformed());
        }
    }

    Ok(RangeRequest::Single { first, last })
}

/// Clamps a requested range to a file of `total` bytes, returning the
/// inclusive `(first, last)` span to send.
pub fn resolve(first: u64, last: Option<u64>, total: u64) -> Result<(u64, u64), RangeError> {
    if first >= total {
        return Err(RangeError::Unsatisfiable { first, total });
    }
    let last = last.map_or(total - 1, |last| last.min(total - 1));
    Ok((first, last))
}

/// Maps a request path under `mount` onto `root`. Anything that would climb
/// out of it, and hidden entries, are refused the same way the static file
/// service refuses them.
fn resolve_path(root: &Path, mount: &str, request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path).ok()?;
    let relative = decoded.strip_prefix(mount)?;
    if !(relative.is_empty() || relative.starts_with('/')) {
        return None;
    }

    let mut path = root.to_path_buf();
    for component in Path::new(relative.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) if part.to_string_lossy().starts_with('.') => return None,
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

async fn read_chunk(file: File, offset: u64, n: u64) -> io::Result<(File, Bytes)> {
    web::block(move || -> io::Result<(File, Bytes)> {
        let mut file = file;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; n as usize];
        file.read_exact(&mut buf)?;
        Ok((file, Bytes::from(buf)))
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
}

/// Streams `len` bytes starting at `offset`, one bounded chunk at a time,
/// reading on the blocking thread pool.
fn file_span(file: File, offset: u64, len: u64) -> impl Stream<Item = Result<Bytes, io::Error>> {
    stream::try_unfold((file, offset, len), |(file, offset, remaining)| async move {
        if remaining == 0 {
            Ok(None)
        } else {
            let n = remaining.min(CHUNK_SIZE);
            read_chunk(file, offset, n).await
                .map(|(file, chunk)| Some((chunk, (file, offset + n, remaining - n))))
        }
    })
}

fn open_sized(path: &Path) -> io::Result<Option<(File, u64)>> {
    match File::open(path) {
        Ok(file) => {
            let metadata = file.metadata()?;
            if metadata.is_file() { Ok(Some((file, metadata.len()))) } else { Ok(None) }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn partial_response(path: PathBuf, first: u64, last: Option<u64>) -> Result<HttpResponse, RangeError> {
    let open_path = path.clone();
    let opened = web::block(move || open_sized(&open_path))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))??;

    let (file, total) = opened.ok_or(RangeError::NotFound)?;
    let (first, last) = resolve(first, last, total)?;
    let len = last - first + 1;

    let content_type = path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| actix_files::file_extension_to_mime(ext).to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    debug!(path = %path.display(), first, last, total, "serving partial content");
    Ok(HttpResponse::PartialContent()
        .insert_header((header::CONTENT_TYPE, content_type))
        .insert_header((header::ACCEPT_RANGES, "bytes"))
        .insert_header((header::CONTENT_RANGE, format!("bytes {}-{}/{}", first, last, total)))
        .body(SizedStream::new(len, file_span(file, first, len))))
}

fn under_mount(path: &str, mount: &str) -> bool {
    match path.strip_prefix(mount) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Middleware answering single-range requests under the data mount.
pub async fn range_gate<B: MessageBody + 'static>(
    mut req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let data = req.app_data::<web::Data<AppData>>().cloned();
    // The router matches on the decoded path, so the mount check must too
    let decoded_path = urlencoding::decode(req.path())
        .map(|path| path.into_owned())
        .unwrap_or_else(|_| req.path().to_string());
    let range = req.headers().get(header::RANGE)
        .map(|value| value.to_str().map(str::to_owned));

    let (data, range) = match (data, range) {
        (Some(data), Some(range)) if req.method() == Method::GET
            && under_mount(&decoded_path, &data.mount) => (data, range),
        _ => return next.call(req).await.map(ServiceResponse::map_into_boxed_body),
    };

    let result = range
        .map_err(|_| RangeError::Malformed("non-ASCII header".to_string()))
        .and_then(|value| parse_range(&value));

    let response = match result {
        Ok(RangeRequest::Multiple) => {
            debug!(path = req.path(), "multi-range request, serving the full file");
            req.headers_mut().remove(header::RANGE);
            return next.call(req).await.map(ServiceResponse::map_into_boxed_body);
        }
        Ok(RangeRequest::Single { first, last }) => {
            match resolve_path(&data.root, &data.mount, req.path()) {
                Some(path) => partial_response(path, first, last).await,
                None => Err(RangeError::NotFound),
            }
        }
        Err(e) => Err(e),
    };

    let response = response.unwrap_or_else(|e| e.error_response());
    Ok(req.into_response(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-9").unwrap(), RangeRequest::Single { first: 0, last: Some(9) });
        assert_eq!(parse_range("bytes=50-").unwrap(), RangeRequest::Single { first: 50, last: None });
        assert_eq!(parse_range("bytes=0-10,20-30").unwrap(), RangeRequest::Multiple);
        assert!(matches!(parse_range("bytes=abc"), Err(RangeError::Malformed(_))));
        assert!(matches!(parse_range("bytes=-500"), Err(RangeError::Malformed(_))));
        assert!(matches!(parse_range("bytes=9-0"), Err(RangeError::Malformed(_))));
        assert!(matches!(parse_range("items=0-9"), Err(RangeError::Malformed(_))));
        assert!(matches!(parse_range("0-9"), Err(RangeError::Malformed(_))));
    }

    #[test]
    fn test_range_unit_is_case_insensitive() {
        assert_eq!(parse_range("Bytes=0-9").unwrap(), RangeRequest::Single { first: 0, last: Some(9) });
        assert_eq!(parse_range("BYTES=5-").unwrap(), RangeRequest::Single { first: 5, last: None });
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve(0, Some(9), 100).unwrap(), (0, 9));
        assert_eq!(resolve(50, None, 100).unwrap(), (50, 99));
        assert_eq!(resolve(90, Some(500), 100).unwrap(), (90, 99));
        assert!(matches!(resolve(150, None, 100), Err(RangeError::Unsatisfiable { first: 150, total: 100 })));
        assert!(matches!(resolve(100, None, 100), Err(RangeError::Unsatisfiable { .. })));
        assert!(matches!(resolve(0, None, 0), Err(RangeError::Unsatisfiable { .. })));
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/srv/annotation");
        assert_eq!(
            resolve_path(root, "/data", "/data/tracks/genome.2bit"),
            Some(PathBuf::from("/srv/annotation/tracks/genome.2bit")),
        );
        assert_eq!(
            resolve_path(root, "/data", "/data/my%20file.bb"),
            Some(PathBuf::from("/srv/annotation/my file.bb")),
        );
        assert_eq!(resolve_path(root, "/data", "/data/../etc/passwd"), None);
        assert_eq!(resolve_path(root, "/data", "/data/%2E%2E/secret"), None);
        assert_eq!(resolve_path(root, "/data", "/database/x"), None);
        assert_eq!(
            resolve_path(root, "/data", "/dat%61/x.bb"),
            Some(PathBuf::from("/srv/annotation/x.bb")),
        );
    }

    #[test]
    fn test_resolve_path_refuses_hidden_entries() {
        let root = Path::new("/srv/annotation");
        assert_eq!(resolve_path(root, "/data", "/data/.secret"), None);
        assert_eq!(resolve_path(root, "/data", "/data/.staging-abc/genome.2bit"), None);
        assert_eq!(resolve_path(root, "/data", "/data/%2Estaging/x"), None);
        assert_eq!(
            resolve_path(root, "/data", "/data/annotation.v1.bb"),
            Some(PathBuf::from("/srv/annotation/annotation.v1.bb")),
        );
    }

    #[test]
    fn test_under_mount() {
        assert!(under_mount("/data/genome.2bit", "/data"));
        assert!(under_mount("/data", "/data"));
        assert!(!under_mount("/database/x", "/data"));
        assert!(!under_mount("/index.html", "/data"));
    }
}
