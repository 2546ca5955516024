//! axum-backed dev/mock server.
//!
//! Serves, on one port:
//!
//! ```text
//! GET {api}                   management API (resolved config, injectors)
//! GET /$pilet-api             pilet metadata (name, version, link, hash)
//! GET /$pilet-api/live        websocket, pushes {"type":"reload"}
//! GET /$pilet-api/*file       current bundle files
//! GET /*                      map redirects, then the host app or a generated page
//! ```
//!
//! Request matching beyond this is left to the user's injectors, which are
//! listed on the management API but not executed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use futures::future::BoxFuture;
use pilet_core::bundler::BundleFeed;
use pilet_core::server::{
    DebugServer, MockServerConfig, PiletInjector, ServerAddress, ServerBuilder, ServerEvent,
    PILET_API,
};
use pilet_core::ServerError;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Live-reload client, inlined into every served page.
const LIVE_RELOAD_SCRIPT: &str = r#"<script type="module">
const live = new WebSocket(`ws://${location.host}/$pilet-api/live`);
live.onmessage = (event) => {
  if (JSON.parse(event.data).type === 'reload') location.reload();
};
</script>"#;

/// Page served when there is no host app.
const FALLBACK_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>%NAME%</title>
</head>
<body>
  <div id="app"></div>
  <script type="module">
    const meta = await fetch('/$pilet-api').then((res) => res.json());
    if (meta.link) {
      const pilet = await import(meta.link);
      if (typeof pilet.setup === 'function') {
        pilet.setup({ root: document.getElementById('app') });
      }
    }
  </script>
</body>
</html>
"#;

/// Builder for [`pilet_core::DebugSession`].
pub fn builder() -> impl ServerBuilder {
    |config: MockServerConfig| -> Result<Box<dyn DebugServer>, ServerError> {
        let server = AxumServer::new(config)?;
        Ok(Box::new(server))
    }
}

/// Shared request state.
struct ServerState {
    config: MockServerConfig,
    injector: PiletInjector,
}

impl ServerState {
    fn feed(&self) -> &BundleFeed {
        &self.injector.bundler
    }
}

pub struct AxumServer {
    state: Arc<ServerState>,
    stop: Option<oneshot::Sender<()>>,
}

impl AxumServer {
    /// Validate `config`. TLS is not supported.
    pub fn new(config: MockServerConfig) -> Result<Self, ServerError> {
        if config.ssl.is_some() {
            return Err(ServerError::SslUnsupported);
        }
        validate_api_path(&config.api)?;
        let injector = config.injectors.session().cloned().ok_or_else(|| {
            ServerError::InvalidConfig("no session injector registered".to_string())
        })?;

        for (name, _) in config.injectors.iter().filter(|(_, i)| i.is_active()) {
            debug!(injector = name, "injector registered");
        }

        Ok(Self {
            state: Arc::new(ServerState {
                config,
                injector,
            }),
            stop: None,
        })
    }

    fn router(&self) -> Router {
        let live = format!("{PILET_API}/live");
        let files = format!("{PILET_API}/*file");
        Router::new()
            .route(&self.state.config.api, get(management))
            .route(PILET_API, get(pilet_meta))
            .route(&live, get(live_reload))
            .route(&files, get(pilet_file))
            .fallback(fallback)
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }
}

impl DebugServer for AxumServer {
    fn start(
        &mut self,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> BoxFuture<'_, Result<(), ServerError>> {
        Box::pin(async move {
            let port = self.state.config.port;
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            let listener = TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
                port,
                message: e.to_string(),
            })?;
            let bound = listener.local_addr().map_or(port, |a| a.port());

            let (stop_tx, stop_rx) = oneshot::channel();
            self.stop = Some(stop_tx);
            let app = self.router();

            tokio::spawn(async move {
                let _ = events.send(ServerEvent::Open(ServerAddress::http(bound)));
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal(stop_rx))
                    .await
                    .map_err(|e| ServerError::Crashed(e.to_string()));
                let _ = events.send(ServerEvent::Close(result));
            });
            Ok(())
        })
    }
}

/// Resolves on Ctrl+C or once the server handle is dropped.
async fn shutdown_signal(stop: oneshot::Receiver<()>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("stopping server");
        }
        _ = stop => {}
    }
}

/// The management API path becomes a literal route. Route parameters and
/// wildcards would make the router panic, so they are refused here.
fn validate_api_path(api: &str) -> Result<(), ServerError> {
    let invalid = |reason: &str| {
        Err(ServerError::InvalidConfig(format!(
            "management api path `{api}` {reason}"
        )))
    };
    if !api.starts_with('/') || api == "/" {
        return invalid("must be an absolute path below /");
    }
    if api == PILET_API || api.starts_with(&format!("{PILET_API}/")) {
        return invalid(&format!("must live outside of {PILET_API}"));
    }
    if api.contains([':', '*', '{', '}']) {
        return invalid("must not contain route parameters or wildcards");
    }
    Ok(())
}

type AppState = Arc<ServerState>;

async fn management(State(state): State<AppState>) -> Json<MockServerConfig> {
    Json(state.config.clone())
}

#[derive(Debug, Serialize)]
struct PiletMeta {
    name: String,
    version: String,
    /// URL of the main script; `None` until the first build completes.
    link: Option<String>,
    hash: Option<String>,
    files: Vec<String>,
}

async fn pilet_meta(State(state): State<AppState>) -> Json<PiletMeta> {
    let bundle = state.feed().latest();
    Json(PiletMeta {
        name: state.injector.name.clone(),
        version: state.injector.version.clone(),
        link: bundle
            .as_ref()
            .map(|b| format!("{PILET_API}/{}", b.entry_name())),
        hash: bundle.as_ref().map(|b| b.hash.clone()),
        files: bundle
            .map(|b| {
                b.files
                    .iter()
                    .filter_map(|f| f.strip_prefix(&b.out_dir).ok())
                    .map(|f| f.to_string_lossy().replace('\\', "/"))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

async fn pilet_file(State(state): State<AppState>, AxumPath(file): AxumPath<String>) -> Response {
    let Some(bundle) = state.feed().latest() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "bundle not ready").into_response();
    };
    match safe_join(&bundle.out_dir, &file) {
        Some(path) => serve_file(&path).await,
        None => (StatusCode::NOT_FOUND, format!("Not found: {file}")).into_response(),
    }
}

async fn live_reload(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_live_socket(socket, state))
}

async fn handle_live_socket(mut socket: WebSocket, state: AppState) {
    let mut ready = state.feed().subscribe();

    let _ = socket
        .send(Message::Text(r#"{"type":"connected"}"#.to_string()))
        .await;

    loop {
        tokio::select! {
            signal = ready.recv() => match signal {
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    if socket.send(Message::Text(r#"{"type":"reload"}"#.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn fallback(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();

    if let Some(target) = redirect_target(&state.config, path) {
        debug!(from = path, to = %target, "mapped request");
        return Redirect::temporary(&target).into_response();
    }

    let app_dir = &state.injector.app;
    let relative = path.trim_start_matches('/');
    if !relative.is_empty() {
        if let Some(file) = safe_join(app_dir, relative).filter(|p| p.is_file()) {
            if file.extension().is_some_and(|ext| ext == "html") {
                return serve_page(&state, &file).await;
            }
            return serve_file(&file).await;
        }
        if Path::new(relative).extension().is_some() {
            return (StatusCode::NOT_FOUND, format!("Not found: {path}")).into_response();
        }
    }

    serve_page(&state, &app_dir.join("index.html")).await
}

/// First `map` entry with a non-empty target whose prefix matches `path`.
/// Longer prefixes win.
fn redirect_target(config: &MockServerConfig, path: &str) -> Option<String> {
    config
        .map
        .iter()
        .filter(|(prefix, target)| !target.is_empty() && matches_prefix(path, prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(prefix, target)| {
            let rest = &path[prefix.trim_end_matches('/').len()..];
            format!("{}{rest}", target.trim_end_matches('/'))
        })
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

/// Serve an HTML page with the live-reload client inlined. Falls back to the
/// generated page when `file` cannot be read.
async fn serve_page(state: &ServerState, file: &Path) -> Response {
    let html = match tokio::fs::read_to_string(file).await {
        Ok(html) => html,
        Err(_) => FALLBACK_PAGE.replace("%NAME%", &state.injector.name),
    };
    Html(inject_live_reload(html)).into_response()
}

fn inject_live_reload(mut html: String) -> String {
    if let Some(pos) = html.rfind("</body>") {
        html.insert_str(pos, LIVE_RELOAD_SCRIPT);
    } else {
        html.push_str(LIVE_RELOAD_SCRIPT);
    }
    html
}

async fn serve_file(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, content_type(path)),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, format!("Not found: {}", path.display())).into_response(),
    }
}

/// Join a request path onto `base`, refusing anything that escapes it.
fn safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Some(base.join(relative))
    } else {
        None
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "html" => "text/html",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
