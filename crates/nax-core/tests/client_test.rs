#![allow(clippy::unwrap_used)]
// Integration tests for NaxClient against wiremock (HTTP) and a local
// WebSocket server (stream).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use nax_api::session::{LOGIN_PATH, TOKEN_HEADER};
use nax_core::{
    ClientConfig, ConnectionState, CoreError, NaxClient, ReconnectConfig, WriteRoute,
};

const VOLUME: &str = "Device.ZoneOutputs.Zones.Zone01.ZoneAudio.Volume";
const WAIT: Duration = Duration::from_secs(5);

type Events = Arc<Mutex<Vec<String>>>;

// ── Fixtures ────────────────────────────────────────────────────────

/// Answers the login POST and records it in the shared event log, so
/// login attempts can be ordered against connection callbacks.
struct RecordingLogin {
    events: Events,
}

impl Respond for RecordingLogin {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.events.lock().unwrap().push("login".into());
        ResponseTemplate::new(200).insert_header(TOKEN_HEADER, "tok-1")
    }
}

async fn mount_login_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(LOGIN_PATH))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "TRACKID=abc123; Path=/"),
        )
        .mount(server)
        .await;
}

async fn device_http(events: &Events) -> MockServer {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(RecordingLogin {
            events: Arc::clone(events),
        })
        .mount(&server)
        .await;
    server
}

fn config(http: &MockServer, stream_url: Option<Url>, http_fallback: bool) -> ClientConfig {
    let mut config = ClientConfig::new(
        Url::parse(&http.uri()).unwrap(),
        "admin",
        SecretString::from("secret".to_owned()),
    );
    config.stream_url = stream_url;
    config.http_fallback = http_fallback;
    config.keepalive = None;
    config.reconnect = ReconnectConfig {
        interval: Duration::from_millis(50),
    };
    config
}

async fn stream_listener() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!(
        "ws://{}/websockify",
        listener.local_addr().unwrap()
    ))
    .unwrap();
    (listener, url)
}

async fn accept_and_expect_resync(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    let first = ws.next().await.unwrap().unwrap();
    assert_eq!(first.into_text().unwrap().as_str(), "/Device/");
    ws
}

async fn drain(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(_)) = ws.next().await {}
}

async fn wait_for_events(events: &Events, count: usize) -> Vec<String> {
    timeout(WAIT, async {
        loop {
            {
                let seen = events.lock().unwrap();
                if seen.len() >= count {
                    return seen.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_end_to_end_resync_get_and_stream_put() {
    let events = Events::default();
    let http = device_http(&events).await;
    let (listener, ws_url) = stream_listener().await;

    let (written_tx, written_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let mut ws = accept_and_expect_resync(&listener).await;
        ws.send(Message::text(
            json!({"Device":{"ZoneOutputs":{"Zones":{"Zone01":{"ZoneAudio":{"Volume":500}}}}}})
                .to_string(),
        ))
        .await
        .unwrap();

        let written = ws.next().await.unwrap().unwrap();
        written_tx
            .send(written.into_text().unwrap().as_str().to_owned())
            .unwrap();
        drain(ws).await;
    });

    let client = NaxClient::new(config(&http, Some(ws_url), false));
    let (value_tx, mut value_rx) = mpsc::unbounded_channel();
    client
        .subscribe(
            VOLUME,
            move |_, value| {
                let _ = value_tx.send(value.clone());
            },
            true,
        )
        .unwrap();

    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(*client.connection_state().borrow(), ConnectionState::Connected);

    let notified = timeout(WAIT, value_rx.recv()).await.unwrap().unwrap();
    assert_eq!(notified, json!(500));
    assert_eq!(client.get(VOLUME).await, Some(json!(500)));

    let route = client.put(VOLUME, json!(750)).await.unwrap();
    assert_eq!(route, WriteRoute::Stream);

    let written: Value = serde_json::from_str(&timeout(WAIT, written_rx).await.unwrap().unwrap())
        .unwrap();
    assert_eq!(
        written,
        json!({"Device":{"ZoneOutputs":{"Zones":{"Zone01":{"ZoneAudio":{"Volume":750}}}}}})
    );

    client.logout().await;
    assert!(client.snapshot().is_empty());
    assert!(!client.is_connected());
    assert_eq!(
        *client.connection_state().borrow(),
        ConnectionState::Disconnected
    );
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reconnect_notifies_false_before_each_login() {
    let events = Events::default();
    let http = device_http(&events).await;
    let (listener, ws_url) = stream_listener().await;

    let (release_tx, release_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        // First stream: drop right after the resync request.
        let mut ws = accept_and_expect_resync(&listener).await;
        ws.close(None).await.unwrap();
        drop(ws);

        // First retry: refuse the upgrade.
        let (tcp, _) = listener.accept().await.unwrap();
        drop(tcp);

        // Second retry: answer the resync, then stay up until the test
        // is done.
        let mut ws = accept_and_expect_resync(&listener).await;
        ws.send(Message::text(
            json!({"Device":{"ZoneOutputs":{"Zones":{"Zone01":{"ZoneAudio":{"Volume":600}}}}}})
                .to_string(),
        ))
        .await
        .unwrap();
        let _ = release_rx.await;
        drop(ws);
    });

    let client = NaxClient::new(config(&http, Some(ws_url), false));
    let sink = Arc::clone(&events);
    client.subscribe_connection(
        move |connected| sink.lock().unwrap().push(format!("connected:{connected}")),
        false,
    );
    let (value_tx, mut value_rx) = mpsc::unbounded_channel();
    client
        .subscribe(
            VOLUME,
            move |_, value| {
                let _ = value_tx.send(value.clone());
            },
            false,
        )
        .unwrap();

    client.connect().await.unwrap();

    let seen = wait_for_events(&events, 7).await;
    assert_eq!(
        seen,
        vec![
            "login",
            "connected:true",
            "connected:false",
            "login",
            "connected:false",
            "login",
            "connected:true",
        ]
    );
    assert!(client.is_connected());

    // The subscription made before the drops fires on the new stream's
    // resync frame.
    let notified = timeout(WAIT, value_rx.recv()).await.unwrap().unwrap();
    assert_eq!(notified, json!(600));
    assert_eq!(client.store().subscription_count(VOLUME), 1);

    client.logout().await;
    let _ = release_tx.send(());
}

#[tokio::test]
async fn test_connection_state_readable_without_prior_receiver() {
    let events = Events::default();
    let http = device_http(&events).await;
    let (listener, ws_url) = stream_listener().await;

    let (release_tx, release_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let ws = accept_and_expect_resync(&listener).await;
        let _ = release_rx.await;
        drop(ws);
    });

    let client = NaxClient::new(config(&http, Some(ws_url), false));
    client.connect().await.unwrap();
    assert_eq!(*client.connection_state().borrow(), ConnectionState::Connected);

    client.logout().await;
    assert_eq!(
        *client.connection_state().borrow(),
        ConnectionState::Disconnected
    );
    let _ = release_tx.send(());
}

#[tokio::test]
async fn test_failed_relogin_discards_previous_session() {
    let http = MockServer::start().await;
    mount_login_page(&http).await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).insert_header(TOKEN_HEADER, "tok-1"))
        .up_to_n_times(1)
        .mount(&http)
        .await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&http)
        .await;
    Mock::given(method("POST"))
        .and(path("/Device/ZoneOutputs/Zones/Zone01/ZoneAudio/Volume"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&http)
        .await;

    let client = NaxClient::new(config(&http, None, true));
    client.login().await.unwrap();

    let err = client.login().await.unwrap_err();
    assert!(matches!(err, CoreError::AuthenticationFailed { .. }));

    let err = client.put(VOLUME, json!(1)).await.unwrap_err();
    assert!(matches!(err, CoreError::NotConnected));
    assert_eq!(client.get(VOLUME).await, None);
}

#[tokio::test]
async fn test_logout_completes_while_peer_stops_reading() {
    let events = Events::default();
    let http = device_http(&events).await;
    let (listener, ws_url) = stream_listener().await;

    let (release_tx, release_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        // Read the resync request, then never read again.
        let ws = accept_and_expect_resync(&listener).await;
        let _ = release_rx.await;
        drop(ws);
    });

    let mut config = config(&http, Some(ws_url), false);
    config.keepalive = Some(Duration::from_millis(20));
    let client = NaxClient::new(config);
    client.connect().await.unwrap();

    // Fill the socket until writes block.
    let writer = client.clone();
    let flood = tokio::spawn(async move {
        let payload = json!("x".repeat(64 * 1024));
        while writer.put(VOLUME, payload.clone()).await.is_ok() {}
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    timeout(WAIT, client.logout()).await.unwrap();
    timeout(WAIT, flood).await.unwrap().unwrap();
    assert_eq!(
        *client.connection_state().borrow(),
        ConnectionState::Disconnected
    );
    let _ = release_tx.send(());
}

#[tokio::test]
async fn test_logout_stops_reconnect_loop() {
    let events = Events::default();
    let http = device_http(&events).await;
    // Nothing listens here once the listener is dropped.
    let (listener, ws_url) = stream_listener().await;

    tokio::spawn(async move {
        let mut ws = accept_and_expect_resync(&listener).await;
        ws.close(None).await.unwrap();
    });

    let client = NaxClient::new(config(&http, Some(ws_url), false));
    client.connect().await.unwrap();

    // Wait until at least one retry has happened.
    wait_for_events(&events, 2).await;
    let mut state = client.connection_state();
    timeout(WAIT, state.wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. })))
        .await
        .unwrap()
        .unwrap();

    client.logout().await;
    let logins = events.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(events.lock().unwrap().len(), logins);
    assert_eq!(
        *client.connection_state().borrow(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_rejected_login_fails_connect() {
    let http = MockServer::start().await;
    mount_login_page(&http).await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&http)
        .await;

    let client = NaxClient::new(config(&http, None, false));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    assert!(!err.is_connectivity());
    assert_eq!(
        *client.connection_state().borrow(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_put_without_stream_or_fallback_is_not_connected() {
    let http = MockServer::start().await;
    let client = NaxClient::new(config(&http, None, false));
    let err = client.put(VOLUME, json!(1)).await.unwrap_err();
    assert!(matches!(err, CoreError::NotConnected));
}

#[tokio::test]
async fn test_put_rejects_malformed_path() {
    let http = MockServer::start().await;
    let client = NaxClient::new(config(&http, None, true));
    let err = client.put("Device..Volume", json!(1)).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidPath(_)));
}

#[tokio::test]
async fn test_put_falls_back_to_http_post() {
    let events = Events::default();
    let http = device_http(&events).await;
    Mock::given(method("POST"))
        .and(path("/Device/ZoneOutputs/Zones/Zone01/ZoneAudio/Volume"))
        .and(body_json(
            json!({"Device":{"ZoneOutputs":{"Zones":{"Zone01":{"ZoneAudio":{"Volume":750}}}}}}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Actions": []})))
        .expect(1)
        .mount(&http)
        .await;

    let client = NaxClient::new(config(&http, None, true));
    client.login().await.unwrap();

    let route = client.put(VOLUME, json!(750)).await.unwrap();
    assert_eq!(route, WriteRoute::Http);
}

#[tokio::test]
async fn test_get_reads_through_http_without_merging() {
    let events = Events::default();
    let http = device_http(&events).await;
    Mock::given(method("GET"))
        .and(path("/Device/DeviceInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Device": {"DeviceInfo": {
                "Name": "Lobby NAX",
                "Model": "DM-NAX-8ZSA",
                "DeviceVersion": "1.2.3"
            }}
        })))
        .mount(&http)
        .await;

    let client = NaxClient::new(config(&http, None, true));
    client.login().await.unwrap();

    let info = client.device_info().await;
    assert_eq!(info.name.as_deref(), Some("Lobby NAX"));
    assert_eq!(info.model.as_deref(), Some("DM-NAX-8ZSA"));
    assert_eq!(info.firmware_version.as_deref(), Some("1.2.3"));
    assert_eq!(info.serial_number, None);

    assert!(client.snapshot().is_empty());
}

#[tokio::test]
async fn test_get_miss_without_fallback_is_none() {
    let events = Events::default();
    let http = device_http(&events).await;
    let client = NaxClient::new(config(&http, None, false));
    client.login().await.unwrap();
    assert_eq!(client.get("Device.DeviceInfo.Name").await, None);
}
