//! Development server.
//!
//! Serves the generated output with the same URL layout the hosted site
//! uses, proxies the widget API calls to the real site, and runs the file
//! watcher on a side thread.
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Main Thread   │     │  Watcher Thread  │
//! │  (HTTP Server)  │     │  (File Monitor)  │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!    route() ──▶ output dir   rebuild ──▶ output dir
//!          │
//!          └──▶ /api/* ──▶ upstream site
//! ```

use crate::{
    config::SiteConfig,
    debug,
    generator::paginate::page_file,
    log,
    utils::hash::content_hash,
    watch::watch_for_changes_blocking,
};
use anyhow::{Context, Result, anyhow};
use reqwest::{Method as UpstreamMethod, Url};
use std::{
    fs,
    io::Read,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

/// Try binding to port, retry with incremented port if in use
const MAX_PORT_RETRIES: u16 = 10;

const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

const INDEX_CACHE: &str = "public, max-age=0, must-revalidate, stale-if-error=0";
const ENTRY_CACHE: &str = "max-age=0, no-cache";

/// Request headers replaced before forwarding.
///
/// `accept-encoding` is dropped outright: the client does not decode, so the
/// upstream must answer with an identity body.
const REWRITTEN_REQUEST_HEADERS: &[&str] = &[
    "accept-encoding",
    "host",
    "origin",
    "authority",
    "x-forwarded-host",
    "content-length",
    "connection",
];

/// Upstream response headers never relayed.
const EXCLUDED_RESPONSE_HEADERS: &[&str] =
    &["content-encoding", "content-length", "server", "transfer-encoding"];

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    /// Generated HTML page, relative to the output dir.
    Page { file: PathBuf, cache: &'static str },
    Redirect(&'static str),
    /// `/a.js`: the analytics beacon is a no-op locally.
    Empty,
    /// Forward to the upstream site at this path (query included).
    Proxy(String),
    /// Any other file under the output dir.
    Static(PathBuf),
    NotFound,
}

fn html(file: impl Into<PathBuf>, cache: &'static str) -> Route {
    Route::Page {
        file: file.into(),
        cache,
    }
}

/// A single path segment usable as a file stem.
fn segment(s: &str) -> Option<&str> {
    (!s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])).then_some(s)
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Map a request to what should answer it.
fn route(method: &Method, url: &str) -> Route {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let decoded = urlencoding::decode(path).map_or_else(|_| path.to_string(), |p| p.into_owned());
    let segments: Vec<&str> = decoded.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (Method::Get, [""]) => html("index.html", INDEX_CACHE),
        (Method::Get, ["entries"]) => match query_param(query, "page") {
            None | Some("" | "1") => Route::Redirect("/"),
            Some(page) => match page.parse::<usize>() {
                Ok(n) if n > 1 => html(page_file(n), INDEX_CACHE),
                _ => Route::NotFound,
            },
        },
        (Method::Get, ["search"]) => html("search.html", INDEX_CACHE),
        (Method::Get, ["a.js"]) => Route::Empty,
        (Method::Get, ["entry", id] | ["entry", id, _]) => match segment(id) {
            Some(id) => html(Path::new("entry").join(format!("{id}.html")), ENTRY_CACHE),
            None => Route::NotFound,
        },
        (Method::Get, ["email", id]) => match segment(id) {
            Some(id) => html(Path::new("email").join(format!("{id}.html")), ENTRY_CACHE),
            None => Route::NotFound,
        },
        (Method::Get, ["api", "analytics", _] | ["api", "clap", "count", _])
        | (Method::Post, ["api", "clap"]) => Route::Proxy(url.to_string()),
        (Method::Get | Method::Head, _) => static_route(&decoded),
        _ => Route::NotFound,
    }
}

/// Catch-all file route; anything escaping the output dir is refused.
fn static_route(path: &str) -> Route {
    let relative = Path::new(path.trim_start_matches('/'));
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Route::Static(relative.to_path_buf())
    } else {
        Route::NotFound
    }
}

// ============================================================================
// Replies
// ============================================================================

/// A response, independent of the HTTP library.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    #[cfg(test)]
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Answer every route except `Proxy` from the output dir.
fn local_reply(route: &Route, output: &Path, if_none_match: Option<&str>) -> Reply {
    match route {
        Route::Page { file, cache } => match fs::read(output.join(file)) {
            Ok(body) => Reply::status(200)
                .with_header("Content-Type", "text/html; charset=utf-8")
                .with_header("Cache-Control", *cache)
                .with_body(body),
            Err(_) => Reply::status(404),
        },
        Route::Redirect(to) => Reply::status(302).with_header("Location", *to),
        Route::Empty => Reply::status(200),
        Route::Static(relative) => {
            let path = output.join(relative);
            if !path.is_file() {
                return Reply::status(404);
            }
            let Ok(body) = fs::read(&path) else {
                return Reply::status(404);
            };
            let etag = format!("\"{}\"", content_hash(&body));
            if if_none_match == Some(etag.as_str()) {
                return Reply::status(304).with_header("ETag", etag);
            }
            Reply::status(200)
                .with_header("Content-Type", guess_content_type(&path))
                .with_header("ETag", etag)
                .with_body(body)
        }
        Route::Proxy(_) | Route::NotFound => Reply::status(404),
    }
}

/// Guess MIME content type from file extension.
///
/// Returns `application/octet-stream` for unknown extensions.
fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        // Web content
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("map") => "application/json; charset=utf-8",

        // Images
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",

        // Fonts
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",

        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// API Proxy
// ============================================================================

/// Headers sent upstream, derived from the incoming ones.
///
/// `host` always points at the upstream; `origin` and `authority` are only
/// rewritten when the browser sent them.
fn forward_headers(
    incoming: &[(String, String)],
    upstream: &Url,
    body_len: usize,
) -> Vec<(String, String)> {
    let upstream_host = upstream.host_str().unwrap_or_default().to_string();
    let has = |name: &str| incoming.iter().any(|(k, _)| k.eq_ignore_ascii_case(name));
    let client_host = incoming
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("host"))
        .map(|(_, v)| v.split(':').next().unwrap_or(v).to_string())
        .unwrap_or_default();

    let mut headers: Vec<(String, String)> = incoming
        .iter()
        .filter(|(k, _)| {
            !REWRITTEN_REQUEST_HEADERS
                .iter()
                .any(|h| k.eq_ignore_ascii_case(h))
        })
        .cloned()
        .collect();

    headers.push(("host".into(), upstream_host.clone()));
    if has("origin") {
        headers.push(("origin".into(), upstream.as_str().trim_end_matches('/').to_string()));
    }
    if has("authority") {
        headers.push(("authority".into(), upstream_host));
    }
    headers.push(("x-forwarded-host".into(), client_host));
    if body_len > 0 {
        headers.push(("content-length".into(), body_len.to_string()));
    }
    headers.push(("connection".into(), "close".into()));
    headers
}

fn relay_header(name: &str) -> bool {
    !EXCLUDED_RESPONSE_HEADERS
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

/// Forward one API call; any failure, reading the request body included,
/// is answered with 500.
fn proxy(
    client: &reqwest::blocking::Client,
    upstream: Option<&Url>,
    method: &Method,
    path: &str,
    headers: &[(String, String)],
    body: impl Read,
) -> Reply {
    let started = Instant::now();
    match try_proxy(client, upstream, method, path, headers, body) {
        Ok(reply) => {
            debug!("proxy"; "{method} {path} -> {} in {:?}", reply.status, started.elapsed());
            reply
        }
        Err(err) => {
            log!("proxy"; "{method} {path} failed: {err:#}");
            Reply::status(500).with_body(b"Internal Server Error".to_vec())
        }
    }
}

fn try_proxy(
    client: &reqwest::blocking::Client,
    upstream: Option<&Url>,
    method: &Method,
    path: &str,
    headers: &[(String, String)],
    mut body: impl Read,
) -> Result<Reply> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf).context("Failed to read request body")?;
    let body = buf;

    let upstream = upstream.ok_or_else(|| anyhow!("no upstream configured, set [source] site"))?;
    let url = upstream.join(path).with_context(|| format!("invalid proxy path {path}"))?;
    let method = match method {
        Method::Post => UpstreamMethod::POST,
        _ => UpstreamMethod::GET,
    };

    let mut request = client.request(method, url);
    for (name, value) in forward_headers(headers, upstream, body.len()) {
        request = request.header(name, value);
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let response = request.send()?;
    let mut reply = Reply::status(response.status().as_u16());
    for (name, value) in response.headers() {
        if relay_header(name.as_str())
            && let Ok(value) = value.to_str()
        {
            reply = reply.with_header(name.as_str(), value);
        }
    }
    Ok(reply.with_body(response.bytes()?.to_vec()))
}

// ============================================================================
// Server Entry Point
// ============================================================================

/// Start the development server with optional file watching.
///
/// The server blocks until Ctrl+C is received.
pub fn serve_site(config: &'static SiteConfig) -> Result<()> {
    let interface: std::net::IpAddr = config
        .serve
        .interface
        .parse()
        .with_context(|| format!("invalid interface {}", config.serve.interface))?;
    let (server, addr) = try_bind_port(interface, config.serve.port, MAX_PORT_RETRIES)?;
    let server = Arc::new(server);

    // Set up Ctrl+C handler for graceful shutdown
    let server_for_signal = Arc::clone(&server);
    ctrlc::set_handler(move || {
        log!("serve"; "shutting down...");
        server_for_signal.unblock();
    })
    .context("Failed to set Ctrl+C handler")?;

    log!("serve"; "http://{}", addr);

    if config.serve.watch {
        std::thread::spawn(move || {
            if let Err(err) = watch_for_changes_blocking(config) {
                log!("watch"; "{err}");
            }
        });
    }

    let upstream = match config.upstream_url() {
        Some(raw) => Some(Url::parse(&raw).with_context(|| format!("invalid upstream {raw}"))?),
        None => None,
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(PROXY_TIMEOUT)
        .build()
        .context("Failed to create proxy client")?;

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(request, config, &client, upstream.as_ref()) {
            log!("serve"; "request error: {e}");
        }
    }

    Ok(())
}

/// Try to bind to a port, retrying with incremented port numbers if in use.
fn try_bind_port(
    interface: std::net::IpAddr,
    base_port: u16,
    max_retries: u16,
) -> Result<(Server, SocketAddr)> {
    let mut last_error = None;
    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, port);
                }
                return Ok((server, addr));
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(anyhow!(
        "Failed to bind after {} attempts (ports {}-{}): {}",
        max_retries,
        base_port,
        base_port.saturating_add(max_retries.saturating_sub(1)),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

fn handle_request(
    mut request: Request,
    config: &SiteConfig,
    client: &reqwest::blocking::Client,
    upstream: Option<&Url>,
) -> Result<()> {
    let method = request.method().clone();
    let url = request.url().to_string();
    let headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .map(|h| (h.field.as_str().as_str().to_string(), h.value.as_str().to_string()))
        .collect();

    let route = route(&method, &url);
    let reply = match &route {
        Route::Proxy(path) => proxy(client, upstream, &method, path, &headers, request.as_reader()),
        _ => {
            let if_none_match = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("if-none-match"))
                .map(|(_, v)| v.as_str());
            local_reply(&route, &config.build.output, if_none_match)
        }
    };
    debug!("serve"; "{method} {url} {}", reply.status);

    let mut response = Response::from_data(reply.body).with_status_code(StatusCode(reply.status));
    for (name, value) in &reply.headers {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response.add_header(header);
        }
    }
    request.respond(response)?;
    Ok(())
}
