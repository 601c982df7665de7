//! Web proxy server: WebSocket bridge to the instrument, identification
//! document and optional static UI hosting.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Json, Redirect},
    routing::get,
};
use futures_util::{SinkExt, StreamExt, pin_mut};
use tokio::sync::Mutex;
use tower_http::{services::ServeDir, trace::TraceLayer};

use tether_core::{Controller, bridge};

/// Well-known path of the identification document.
pub const IDENT_PATH: &str = "/.well-known/tether.json";

/// Path static UI assets are served under when hosting is enabled.
pub const UI_PATH: &str = "/ui";

#[derive(Clone)]
struct WebState {
    controller: Arc<Mutex<Controller>>,
    target: String,
    hosting_assets: bool,
}

/// Run the proxy web server until the process ends.
pub async fn serve(
    controller: Controller,
    listen: SocketAddr,
    assets: Option<PathBuf>,
) -> anyhow::Result<()> {
    let state = WebState {
        target: controller.endpoint().to_string(),
        controller: Arc::new(Mutex::new(controller)),
        hosting_assets: assets.is_some(),
    };

    let mut app = Router::new()
        .route("/", get(root))
        .route(IDENT_PATH, get(ident))
        .route("/ws", get(websocket_handler))
        .with_state(state);
    if let Some(dir) = assets {
        tracing::info!(dir = %dir.display(), "hosting static assets under {UI_PATH}");
        app = app.nest_service(UI_PATH, ServeDir::new(dir));
    }
    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("webserver listening on http://{listen}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root(State(state): State<WebState>) -> impl IntoResponse {
    if state.hosting_assets {
        Redirect::temporary(UI_PATH).into_response()
    } else {
        format!(
            "tether proxy for {}; identification at {IDENT_PATH}, raw stream at /ws\n",
            state.target
        )
        .into_response()
    }
}

async fn ident(State(state): State<WebState>) -> Json<serde_json::Value> {
    Json(ident_document(Some(&state.target), state.hosting_assets))
}

/// The read-only document describing this proxy, the instrument it bridges
/// to and whether it also hosts a bundled UI.
fn ident_document(target: Option<&str>, hosting_assets: bool) -> serde_json::Value {
    serde_json::json!({
        "webserver": {
            "scenario": "proxy",
            "name": "tether",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "proxy": {
            "target": target,
        },
        "ui": {
            "host_static_assets": hosting_assets,
        },
    })
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<WebState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bridge one WebSocket session onto the instrument stream. The controller
/// is locked for the whole session, so there is at most one conversation at
/// a time and a broken link requires a fresh session.
async fn handle_socket(socket: WebSocket, state: WebState) {
    let (sink, stream) = socket.split();

    // Text frames map 1:1 to device lines; everything else is dropped.
    let from_client = stream.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(text),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("websocket read failed: {e}");
                None
            }
        }
    });
    let to_client = sink.with(|line: String| async move { Ok::<_, axum::Error>(Message::Text(line)) });
    pin_mut!(from_client);
    pin_mut!(to_client);

    let mut controller = state.controller.lock().await;
    tracing::info!(target = %state.target, "websocket bridge session started");
    bridge(&mut controller, to_client, from_client).await;
    tracing::info!("websocket bridge session ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_document_names_the_proxied_instrument() {
        let doc = ident_document(Some("net://1.2.3.4:5732"), true);
        assert_eq!(doc["webserver"]["scenario"], "proxy");
        assert_eq!(doc["proxy"]["target"], "net://1.2.3.4:5732");
        assert_eq!(doc["ui"]["host_static_assets"], true);
    }

    #[test]
    fn ident_document_without_target() {
        let doc = ident_document(None, false);
        assert!(doc["proxy"]["target"].is_null());
        assert_eq!(doc["ui"]["host_static_assets"], false);
    }
}
