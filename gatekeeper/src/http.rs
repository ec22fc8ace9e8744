//! `axum` wiring: turns an inbound request into a
//! [`gatekeeper_core::HttpRequestView`], runs it through the admission graph,
//! and turns whatever comes out into an `axum` response. Origin forwarding for
//! the `Passthrough` case is a thin `hyper` client call — the gate itself
//! never inspects or buffers the origin's response body.

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use gatekeeper_core::actions::GateResponse;
use gatekeeper_core::fsm::{self, DefaultExtensionPoints, Graph, Outcome};
use gatekeeper_core::template::Template;
use gatekeeper_core::{GateState, HttpRequestView};
use http_body_util::{BodyExt, Limited};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::error;

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared state for every request handler: the admission context, the loaded
/// challenge page, the validated graph, and (if configured) where to forward
/// passthrough traffic.
pub struct AppState {
    pub gate: Arc<GateState>,
    pub template: Template,
    pub graph: Graph,
    pub origin: Option<SocketAddr>,
    origin_client: Client<HttpConnector, Body>,
}

impl AppState {
    pub fn new(gate: Arc<GateState>, template: Template, graph: Graph, origin: Option<SocketAddr>) -> Self {
        Self {
            gate,
            template,
            graph,
            origin,
            origin_client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }
}

/// An inbound request's relevant parts, extracted once up front so the
/// transport-agnostic FSM never touches `axum` types.
struct AxumRequestView {
    uri: String,
    query: Vec<(String, String)>,
    post: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    ip: Vec<u8>,
    is_post: bool,
}

impl HttpRequestView for AxumRequestView {
    fn request_uri(&self) -> &str {
        &self.uri
    }

    fn query_arg(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn post_arg(&self, name: &str) -> Option<&str> {
        self.post
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn remote_ip(&self) -> &[u8] {
        &self.ip
    }

    fn is_post(&self) -> bool {
        self.is_post
    }
}

fn parse_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for value in headers.get_all(axum::http::header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            if let Some((k, v)) = pair.trim().split_once('=') {
                out.push((k.to_string(), v.to_string()));
            }
        }
    }
    out
}

fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(input.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn is_form_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// The single catch-all handler mounted for every path and method.
pub async fn handle(
    State(app): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let (parts, body) = req.into_parts();

    let body_bytes = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let query = parts
        .uri
        .query()
        .map(parse_urlencoded)
        .unwrap_or_default();
    let cookies = parse_cookies(&parts.headers);
    let is_post = parts.method == axum::http::Method::POST;

    let post = if is_post && is_form_urlencoded(&parts.headers) {
        let text = String::from_utf8_lossy(&body_bytes);
        parse_urlencoded(&text)
    } else {
        Vec::new()
    };

    let view = AxumRequestView {
        uri,
        query,
        post,
        cookies,
        ip: ip_bytes(remote),
        is_post,
    };

    match fsm::enter(&app.graph, &app.gate, &app.template, &DefaultExtensionPoints, &view) {
        Ok(Outcome::Response(resp)) => gate_response_to_axum(resp),
        Ok(Outcome::Passthrough) => forward_to_origin(&app, parts, body_bytes).await,
        Err(e) => {
            error!(error = %e, "admission graph returned a fatal error");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn ip_bytes(addr: SocketAddr) -> Vec<u8> {
    match addr.ip() {
        std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
        std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn gate_response_to_axum(resp: GateResponse) -> Response {
    let mut builder = Response::builder().status(resp.status);
    for (name, value) in resp.headers {
        builder = builder.header(name, value);
    }
    if let Some(cookie) = resp.set_cookie {
        let expires = httpdate::fmt_http_date(SystemTime::UNIX_EPOCH + Duration::from_secs(cookie.expires_unix));
        let header = format!(
            "{}={}; Path={}; Expires={}; Max-Age={}; HttpOnly",
            cookie.name, cookie.value, cookie.path, expires, cookie.max_age_secs
        );
        if let Ok(value) = HeaderValue::from_str(&header) {
            builder = builder.header(axum::http::header::SET_COOKIE, value);
        }
    }
    builder
        .body(Body::from(resp.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Forward a request that cleared admission to the protected origin.
///
/// Out of scope per the admission gate's design (the gate itself only decides
/// whether to let a request through); this is a minimal same-process forward
/// so the binary is runnable standalone when an `--origin` address is given.
async fn forward_to_origin(app: &AppState, parts: axum::http::request::Parts, body: Bytes) -> Response {
    let Some(origin) = app.origin else {
        return StatusCode::BAD_GATEWAY.into_response();
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let absolute_uri = format!("http://{}{}", origin, path_and_query);

    let mut builder = Request::builder().method(parts.method.clone()).uri(absolute_uri);
    for (name, value) in parts.headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder = builder.header(axum::http::header::HOST, origin.to_string());

    let outgoing = match builder.body(Body::from(body)) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to build forwarded request");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    match app.origin_client.request(outgoing).await {
        Ok(resp) => {
            let (parts, body) = resp.into_parts();
            let bytes: Bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    error!(error = %e, "failed to read origin response body");
                    return StatusCode::BAD_GATEWAY.into_response();
                }
            };
            (parts.status, parts.headers, bytes).into_response()
        }
        Err(e) => {
            error!(error = %e, "origin forward failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
