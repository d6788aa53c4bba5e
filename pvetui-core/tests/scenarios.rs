//! End-to-end scenario tests straight out of the cluster/auth/VNC
//! behavioural descriptions: VNC session reuse across the disconnect
//! grace window, and ticket refresh under concurrent load.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde_json::json;
use tokio::net::TcpListener;
use url::Url;

use pvetui_core::auth::{AuthManager, TicketAuth, TokenAuth};
use pvetui_core::cache::CacheFactory;
use pvetui_core::http::HttpEngagement;
use pvetui_core::pve::{GuestKind, PveClient};
use pvetui_core::vnc::{VncSessionManager, guest_console_target};

/// Stands in for a PVE node: issues a vncproxy ticket over HTTP and
/// accepts the follow-on websocket upgrade, same as the real node does
/// on one port.
async fn spawn_fake_pve_node() -> u16 {
    async fn vncproxy() -> impl IntoResponse {
        Json(json!({"data": {"ticket": "fake-vnc-ticket", "port": "5900"}}))
    }

    async fn vncwebsocket(ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(|mut socket| async move {
            while socket.recv().await.is_some() {}
        })
    }

    let router = Router::new()
        .route("/api2/json/nodes/127.0.0.1/qemu/100/vncproxy", post(vncproxy))
        .route("/api2/json/nodes/127.0.0.1/qemu/100/vncwebsocket", get(vncwebsocket));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service()).await.unwrap();
    });
    port
}

fn build_manager(port: u16) -> Arc<VncSessionManager> {
    let auth: Arc<dyn AuthManager> =
        Arc::new(TokenAuth::new("root".into(), "pam".into(), "automation".into(), "secret".into()));
    let base_url = Url::parse(&format!("http://127.0.0.1:{port}/api2/json/")).unwrap();
    let http = HttpEngagement::new(reqwest::Client::new(), auth, base_url);
    let cache = CacheFactory::memory(10).namespaced("default").unwrap();
    let pve = PveClient::new(http, cache);
    VncSessionManager::new(pve)
}

async fn connect_and_disconnect(local_url: &Url) {
    let mut ws_url = local_url.clone();
    ws_url.set_scheme("ws").unwrap();
    ws_url.set_path("/websockify");
    ws_url.set_query(None);
    let (stream, _) = tokio_tungstenite::connect_async(ws_url.as_str()).await.unwrap();
    drop(stream);
    // let the bridge task observe the close and run on_client_disconnected
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn vnc_reuse_across_disconnect_then_new_session_past_grace() {
    let port = spawn_fake_pve_node().await;
    let manager = build_manager(port);
    let target = guest_console_target("127.0.0.1".into(), 100, GuestKind::Qemu);

    let first = manager.open(target.clone()).await.unwrap();
    let second = manager.open(target.clone()).await.unwrap();
    assert_eq!(first, second, "second open before any client connects reuses the session");

    connect_and_disconnect(&first).await;

    let reopened_within_grace = manager.open(target.clone()).await.unwrap();
    assert_eq!(first, reopened_within_grace, "reopen within the grace window reuses the session");

    // A real client connects and disconnects again; this is the
    // disconnect the grace window actually counts down from.
    connect_and_disconnect(&reopened_within_grace).await;

    // The session's disconnect grace window is 5 seconds; wait past it.
    tokio::time::sleep(Duration::from_secs(6)).await;
    manager.reap();

    let reopened_after_grace = manager.open(target.clone()).await.unwrap();
    assert_ne!(first, reopened_after_grace, "reopen past the grace window gets a fresh session");

    manager.shutdown();
}

#[tokio::test]
async fn auth_refresh_under_concurrent_load_performs_exactly_one_refresh() {
    let mut server = mockito::Server::new_async().await;
    let login_mock = server
        .mock("POST", "/api2/json/access/ticket")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":{"ticket":"PVE:root@pam:ticket","CSRFPreventionToken":"csrf"}}"#)
        .expect(2)
        .create_async()
        .await;

    let http_client = Arc::new(reqwest::Client::new());
    let auth = Arc::new(
        TicketAuth::new(
            Arc::clone(&http_client),
            server.url(),
            "/api2/json".into(),
            "root".into(),
            "pam".into(),
            "hunter2".into(),
        )
        .unwrap(),
    );

    // Warm up: one login happens here.
    auth.ensure_authenticated().await.unwrap();

    // Models the mock rejecting the request once the ticket's ~119
    // minute lifetime has elapsed: the transport layer invalidates the
    // cached ticket before retrying, forcing the next
    // `ensure_authenticated` call to log in again.
    auth.invalidate();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let auth = Arc::clone(&auth);
        handles.push(tokio::spawn(async move { auth.ensure_authenticated().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Exactly one additional login happened despite 20 concurrent
    // callers observing the invalidated state.
    login_mock.assert_async().await;
}
