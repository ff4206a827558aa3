use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use trackwall_policy::{parse_duration, unix_now};

use crate::State as AppState;

/// Sent with every response so browsers do not pin a blocked state.
const CACHE_CONTROL_VALUE: &str = "private, max-age=0, no-cache, must-revalidate";

/// Short probe interval to promptly reclaim sockets held by browsers
/// aggressively reusing connections to spoofed destinations.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(serve).with_state(state)
}

/// Every request for a spoofed destination lands here, whatever the method
/// or path: serve the unblock endpoint, a surrogate script, or the blocked
/// notice.
async fn serve(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let host = html_escape::encode_safe(host).into_owned();
    let url = request.uri().path().trim_start_matches('/');
    let url = html_escape::encode_safe(url).into_owned();

    if url.starts_with("$@_") {
        return handle_special(&state, &host, &url).await;
    }

    if let Some(script) = find_surrogate(&state, &host).await {
        return no_cache_response(StatusCode::OK, Some("application/javascript"), script);
    }

    if url.ends_with(".js") {
        // Wrapped in a comment so the consuming page does not report a
        // script parse error.
        let body = format!("/*{}*/", blocked_page(&host, &url));
        no_cache_response(StatusCode::OK, Some("application/javascript"), body)
    } else {
        no_cache_response(StatusCode::OK, Some("text/html"), blocked_page(&host, &url))
    }
}

/// Handle the special `$@_` urls; only `$@_allow/<duration>/<redirect>` is
/// known at the moment.
async fn handle_special(state: &AppState, host: &str, url: &str) -> Response {
    let params: Vec<&str> = url.split('/').collect();
    match params[0] {
        "$@_allow" => {
            let Some(duration) = params.get(1) else {
                tracing::warn!("malformed unblock request: {url:?}");
                return no_cache_response(StatusCode::OK, None, Body::empty());
            };
            let secs = match parse_duration(duration) {
                Ok(secs) => secs,
                Err(e) => {
                    tracing::warn!("bad duration in unblock request for {host:?}: {e:#}");
                    return no_cache_response(StatusCode::OK, None, Body::empty());
                }
            };

            state.grant_override(host, unix_now() + secs).await;

            // Redirect back to where the user came from.
            let location = format!("/{}", params[2..].join("/"));
            let mut response = no_cache_response(StatusCode::SEE_OTHER, None, Body::empty());
            match HeaderValue::from_str(&location) {
                Ok(value) => {
                    response.headers_mut().insert(header::LOCATION, value);
                }
                Err(e) => tracing::warn!("unusable redirect target {location:?}: {e}"),
            }
            response
        }
        _ => no_cache_response(StatusCode::OK, None, format!("unknown command: {url}")),
    }
}

async fn find_surrogate(state: &AppState, host: &str) -> Option<String> {
    // An exact host with an attached script is the fast path; the pattern
    // scan catches hosts that were added after surrogate registration.
    if let Some(script) = state.hosts.read().await.surrogate(host) {
        return Some(script.to_owned());
    }
    state.surrogates.read().await.find(host).map(ToOwned::to_owned)
}

fn blocked_page(host: &str, url: &str) -> String {
    format!(
        r#"<html><head><title> trackwall {host}</title></head><body>
<p>trackwall blocked access to <code>{host}</code>. Unblock this domain for:</p>
<ul><li><a href="/$@_allow/10s/{url}">ten seconds</a></li>
<li><a href="/$@_allow/1h/{url}">an hour</a></li>
<li><a href="/$@_allow/1d/{url}">a day</a></li>
<li><a href="/$@_allow/10y/{url}">until restart</a></li></ul></body></html>"#
    )
}

fn no_cache_response(status: StatusCode, content_type: Option<&'static str>, body: impl Into<Body>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_VALUE));
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}

pub async fn serve_http(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("error while accepting an HTTP connection: {e}");
                continue;
            }
        };
        configure_keepalive(&stream);
        let app = app.clone();
        tokio::spawn(serve_connection(stream, app));
    }
}

pub async fn serve_https(listener: TcpListener, app: Router, tls_config: Arc<ServerConfig>) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(tls_config);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("error while accepting an HTTPS connection: {e}");
                continue;
            }
        };
        configure_keepalive(&stream);
        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => serve_connection(tls_stream, app).await,
                // Handshake failures are per-connection; the client retries.
                Err(e) => tracing::debug!("TLS handshake with {peer} failed: {e}"),
            }
        });
    }
}

async fn serve_connection<S>(stream: S, app: Router)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = TowerToHyperService::new(app);
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        tracing::debug!("error while serving an HTTP connection: {e}");
    }
}

fn configure_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_INTERVAL)
        .with_interval(KEEPALIVE_INTERVAL);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::debug!("unable to enable TCP keepalive: {e}");
    }
}
