use std::fs;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{HttpRequest, HttpResponse};

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the response for a static asset request rooted at `root`.
///
/// Only `GET` and `HEAD` are allowed. Paths that try to leave `root`
/// (`..` segments, backslashes) are answered with 404, as are missing files.
pub fn respond(request: &HttpRequest, root: &Path, index_file: &str) -> HttpResponse {
    if request.method != "GET" && request.method != "HEAD" {
        return HttpResponse::method_not_allowed();
    }

    let Some(relative) = resolve(request.path(), index_file) else {
        tracing::debug!(path = %request.path(), "rejected asset path");
        return HttpResponse::not_found();
    };

    let path = root.join(relative);
    match fs::read(&path) {
        Ok(body) => HttpResponse::ok()
            .add_header("Content-Type", content_type(&path))
            .add_header("Cache-Control", "no-cache")
            .closing()
            .with_body(body),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "asset not readable");
            HttpResponse::not_found()
        }
    }
}

/// Answer one asset request on a blocking socket, then close it.
pub(crate) fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    request: HttpRequest,
    root: &Path,
    index_file: &str,
) {
    let response = respond(&request, root, index_file);
    let bytes = if request.method == "HEAD" {
        response.serialize_head()
    } else {
        response.serialize()
    };

    let result = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_write_timeout(Some(WRITE_TIMEOUT)))
        .and_then(|()| stream.write_all(&bytes));

    match result {
        Ok(()) => tracing::debug!(
            %peer,
            method = %request.method,
            path = %request.path(),
            status = response.status_code,
            "asset request"
        ),
        Err(e) => tracing::debug!(%peer, error = %e, "asset write failed"),
    }
}

fn resolve(path: &str, index_file: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') => return None,
            s => relative.push(s),
        }
    }

    if path.ends_with('/') || relative.as_os_str().is_empty() {
        relative.push(index_file);
    }
    Some(relative)
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
