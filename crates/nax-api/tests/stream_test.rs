#![allow(clippy::unwrap_used)]
// Integration tests for the WebSocket stream against a local server.

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nax_api::session::{LOGIN_PATH, TOKEN_HEADER, TOKEN_REQUEST_HEADER};
use nax_api::{Frame, RESYNC_REQUEST, Session, TransportConfig, connect_stream};

async fn logged_in_session() -> (MockServer, Session) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LOGIN_PATH))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "TRACKID=abc123; Path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).insert_header(TOKEN_HEADER, "tok-1"))
        .mount(&server)
        .await;

    let session = Session::new(Url::parse(&server.uri()).unwrap(), &TransportConfig::default())
        .unwrap();
    session
        .login("admin", &SecretString::from("secret".to_string()))
        .await
        .unwrap();
    (server, session)
}

#[tokio::test]
async fn test_stream_upgrade_resync_and_split_frames() {
    let (_http, session) = logged_in_session().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = Url::parse(&format!(
        "ws://{}/websockify",
        listener.local_addr().unwrap()
    ))
    .unwrap();

    let (seen_tx, seen_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut upgrade_headers = None;
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            upgrade_headers = Some(req.headers().clone());
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
        let headers = upgrade_headers.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        seen_tx
            .send((headers, first.into_text().unwrap().as_str().to_owned()))
            .unwrap();

        ws.send(Message::text(r#"{"Device":{"Zo"#)).await.unwrap();
        ws.send(Message::text(r#"neOutputs":{"Count":2}}}{"Actions":[]}"#))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
    });

    let transport = TransportConfig::default();
    let (mut sink, mut source) = connect_stream(&ws_url, &session, &transport).await.unwrap();
    sink.send_text(RESYNC_REQUEST).await.unwrap();

    let (headers, first) = seen_rx.await.unwrap();
    assert_eq!(first, "/Device/");
    assert!(
        headers["cookie"].to_str().unwrap().contains("TRACKID=abc123"),
        "cookie header missing"
    );
    assert_eq!(headers[TOKEN_REQUEST_HEADER].to_str().unwrap(), "tok-1");
    assert!(headers.contains_key("origin"));

    let frames = source.next_frames().await.unwrap().unwrap();
    assert_eq!(
        frames,
        vec![
            Frame::State(json!({"Device": {"ZoneOutputs": {"Count": 2}}})),
            Frame::Actions(nax_api::ActionReport::default()),
        ]
    );

    assert!(source.next_frames().await.unwrap().is_none());
}

#[tokio::test]
async fn test_stream_upgrade_refused() {
    let (_http, session) = logged_in_session().await;

    // Bind then drop so the port is (almost certainly) closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let ws_url = Url::parse(&format!("ws://{addr}/websockify")).unwrap();
    let err = connect_stream(&ws_url, &session, &TransportConfig::default())
        .await
        .err()
        .unwrap();
    assert!(err.is_connectivity(), "expected connectivity error, got: {err:?}");
}
