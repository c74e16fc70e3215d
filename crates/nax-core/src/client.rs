// ── Client facade ──
//
// Full lifecycle for one device connection: HTTP login, stream upgrade,
// the background task that reads frames into the state store, the write
// path, and the reconnection supervisor.

use std::sync::Arc;
use std::time::Duration;

use nax_api::websocket::stream_url;
use nax_api::{
    Frame, RESYNC_REQUEST, Session, StreamSink, StreamSource, TransportConfig, connect_stream,
};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::device::{DEVICE_INFO_PATH, DeviceInfo};
use crate::error::CoreError;
use crate::merge::Document;
use crate::path::{DataPath, nest, resolve};
use crate::store::{StateStore, SubscriptionId};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Which route carried a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum WriteRoute {
    Stream,
    Http,
}

// ── NaxClient ────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ClientInner>`. Construction does no I/O;
/// call [`connect()`](Self::connect), or [`login()`](Self::login)
/// followed by [`upgrade_to_stream()`](Self::upgrade_to_stream).
///
/// The background stream task holds a clone, so the connection stays up
/// until [`logout()`](Self::logout) is called.
#[derive(Clone)]
pub struct NaxClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: TransportConfig,
    store: Arc<StateStore>,
    connection_state: watch::Sender<ConnectionState>,
    /// Session-scoped token: cancelled on logout, then replaced so the
    /// client can log in again.
    cancel: Mutex<CancellationToken>,
    /// Token of the running stream task, a child of `cancel`.
    stream_cancel: Mutex<Option<CancellationToken>>,
    session: Mutex<Option<Arc<Session>>>,
    /// Write half of the stream. Holding this lock serializes writes.
    writer: Mutex<Option<StreamSink>>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
}

struct AttemptFailure {
    http: String,
    websocket: String,
}

impl NaxClient {
    pub fn new(config: ClientConfig) -> Self {
        let transport = config.transport();
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                store: Arc::new(StateStore::new()),
                connection_state,
                cancel: Mutex::new(CancellationToken::new()),
                stream_cancel: Mutex::new(None),
                session: Mutex::new(None),
                writer: Mutex::new(None),
                stream_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.inner.store
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Log in, then open the stream.
    ///
    /// If login succeeds but the upgrade fails, the HTTP session is kept
    /// so reads and writes can still go over HTTP fallback.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.set_state(ConnectionState::Connecting);

        let result = match self.login().await {
            Ok(()) => self.upgrade_to_stream().await,
            Err(e) => Err(e),
        };
        if let Err(ref e) = result {
            warn!(error = %e, "connect failed");
            self.set_state(ConnectionState::Disconnected);
        }
        result
    }

    /// Authenticate over HTTP, replacing any previous session.
    ///
    /// The previous session is dropped before the attempt, so a failed
    /// re-login leaves no credentials behind.
    pub async fn login(&self) -> Result<(), CoreError> {
        if self.inner.session.lock().await.take().is_some() {
            debug!("discarding previous session");
        }
        let config = &self.inner.config;
        let session = Session::new(config.url.clone(), &self.inner.transport)?;
        session.login(&config.username, &config.password).await?;
        *self.inner.session.lock().await = Some(Arc::new(session));
        Ok(())
    }

    /// Open the stream with the current session and start the background
    /// task that reads it. A stream task already running is stopped first.
    pub async fn upgrade_to_stream(&self) -> Result<(), CoreError> {
        let token = self.inner.cancel.lock().await.child_token();
        if let Some(previous) = self
            .inner
            .stream_cancel
            .lock()
            .await
            .replace(token.clone())
        {
            previous.cancel();
        }

        let source = self.open_stream().await?;
        let handle = tokio::spawn(run_stream(self.clone(), source, token));
        *self.inner.stream_task.lock().await = Some(handle);
        Ok(())
    }

    /// Tear everything down: stop the stream task and any reconnect loop,
    /// log out (best effort), close the stream, drop the document, and
    /// notify connection subscribers with `false`.
    pub async fn logout(&self) {
        // The token stays cancelled until teardown is done, so writes
        // started meanwhile fail fast instead of holding the writer.
        self.inner.cancel.lock().await.cancel();
        self.inner.stream_cancel.lock().await.take();

        let task = self.inner.stream_task.lock().await.take();
        if let Some(mut handle) = task {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                warn!("stream task did not stop in time, aborting");
                handle.abort();
            }
        }

        let session = self.inner.session.lock().await.take();
        if let Some(session) = session {
            session.logout().await;
        }

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut sink) = writer {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "stream close failed (non-fatal)"),
                Err(_) => debug!("stream close timed out"),
            }
        }

        self.inner.store.clear();
        *self.inner.cancel.lock().await = CancellationToken::new();
        self.inner.store.set_connected(false);
        self.set_state(ConnectionState::Disconnected);
        info!("logged out");
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.store.is_connected()
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Value at a dotted path.
    ///
    /// Misses fall through to an HTTP GET when fallback is enabled and a
    /// session exists. The HTTP result is returned but never merged into
    /// the document.
    pub async fn get(&self, path: &str) -> Option<Value> {
        if let Some(value) = self.inner.store.get(path) {
            return Some(value);
        }
        if !self.inner.config.http_fallback {
            return None;
        }

        let parsed = match DataPath::parse(path) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "skipping HTTP fallback");
                return None;
            }
        };
        let session = self.session().await?;
        match session.get_path(&parsed.to_wire()).await {
            Ok(body) => body
                .as_object()
                .and_then(|document| resolve(document, path))
                .cloned(),
            Err(e) => {
                warn!(path, error = %e, "HTTP fallback read failed");
                None
            }
        }
    }

    /// Deep copy of the whole state document.
    pub fn snapshot(&self) -> Document {
        self.inner.store.snapshot()
    }

    /// Identity fields from `Device.DeviceInfo`.
    pub async fn device_info(&self) -> DeviceInfo {
        self.get(DEVICE_INFO_PATH)
            .await
            .map(|value| DeviceInfo::from_value(&value))
            .unwrap_or_default()
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Write `value` at `path`, wrapping it into the nested fragment the
    /// device expects.
    pub async fn put(&self, path: &str, value: Value) -> Result<WriteRoute, CoreError> {
        let parsed = DataPath::parse(path)?;
        let fragment = nest(&parsed, value);
        self.write(&parsed, &fragment).await
    }

    /// Write a pre-built fragment. `path` selects the HTTP endpoint when
    /// the write falls back to HTTP.
    pub async fn put_fragment(&self, path: &str, fragment: &Value) -> Result<WriteRoute, CoreError> {
        let parsed = DataPath::parse(path)?;
        self.write(&parsed, fragment).await
    }

    async fn write(&self, path: &DataPath, fragment: &Value) -> Result<WriteRoute, CoreError> {
        let cancel = self.inner.cancel.lock().await.clone();

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::ConnectionClosed),
            sent = self.send_on_stream(fragment) => sent,
        };
        match sent {
            Ok(true) => {
                debug!(path = %path, "write sent on stream");
                return Ok(WriteRoute::Stream);
            }
            Ok(false) => {}
            Err(e) => warn!(path = %path, error = %e, "stream write failed"),
        }

        if !self.inner.config.http_fallback {
            return Err(CoreError::NotConnected);
        }
        let session = self.session().await.ok_or(CoreError::NotConnected)?;
        let wire = path.to_wire();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::ConnectionClosed),
            posted = session.post_path(&wire, fragment) => {
                posted?;
                debug!(path = %path, "write sent over HTTP");
                Ok(WriteRoute::Http)
            }
        }
    }

    /// `Ok(false)` when there is no stream to send on.
    async fn send_on_stream(&self, fragment: &Value) -> Result<bool, CoreError> {
        let mut writer = self.inner.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Ok(false);
        };
        sink.send_json(fragment).await?;
        Ok(true)
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// See [`StateStore::subscribe`].
    pub fn subscribe<F>(
        &self,
        path: &str,
        callback: F,
        trigger_current_value: bool,
    ) -> Result<SubscriptionId, CoreError>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        Ok(self
            .inner
            .store
            .subscribe(path, callback, trigger_current_value)?)
    }

    pub fn unsubscribe(&self, path: &str, id: SubscriptionId) -> bool {
        self.inner.store.unsubscribe(path, id)
    }

    /// See [`StateStore::subscribe_connection`].
    pub fn subscribe_connection<F>(&self, callback: F, trigger_current_value: bool) -> SubscriptionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner
            .store
            .subscribe_connection(callback, trigger_current_value)
    }

    pub fn unsubscribe_connection(&self, id: SubscriptionId) -> bool {
        self.inner.store.unsubscribe_connection(id)
    }

    // ── Internals ────────────────────────────────────────────────

    // `send_modify` stores the state even with zero receivers.
    fn set_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_modify(|current| *current = state);
    }

    async fn session(&self) -> Option<Arc<Session>> {
        self.inner.session.lock().await.clone()
    }

    fn stream_url(&self) -> Result<Url, CoreError> {
        match &self.inner.config.stream_url {
            Some(url) => Ok(url.clone()),
            None => Ok(stream_url(&self.inner.config.url)?),
        }
    }

    /// Upgrade, request a full resync, install the write half, and mark
    /// the client connected. Returns the read half.
    async fn open_stream(&self) -> Result<StreamSource, CoreError> {
        let session = self.session().await.ok_or(CoreError::NotLoggedIn)?;
        let url = self.stream_url()?;
        let (mut sink, source) = connect_stream(&url, &session, &self.inner.transport).await?;
        sink.send_text(RESYNC_REQUEST).await?;
        *self.inner.writer.lock().await = Some(sink);

        self.inner.store.set_connected(true);
        self.set_state(ConnectionState::Connected);
        info!(url = %url, "stream connected");
        Ok(source)
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::State(fragment) => {
                let notified = self.inner.store.ingest(&fragment);
                debug!(notified, "state frame applied");
            }
            Frame::Actions(report) => {
                report.log_failures();
            }
        }
    }

    async fn ping(&self) -> Result<(), CoreError> {
        let mut writer = self.inner.writer.lock().await;
        if let Some(sink) = writer.as_mut() {
            sink.ping().await?;
        }
        Ok(())
    }

    /// Read frames until the stream drops. `None` if cancelled first.
    async fn read_until_lost(
        &self,
        source: &mut StreamSource,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let mut keepalive = self
            .inner
            .config
            .keepalive
            .filter(|period| !period.is_zero())
            .map(|period| {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = next_tick(keepalive.as_mut()) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return None,
                        pinged = tokio::time::timeout(CLOSE_TIMEOUT, self.ping()) => match pinged {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => return Some(e.to_string()),
                            Err(_) => return Some("keepalive ping timed out".into()),
                        },
                    }
                }
                frames = source.next_frames() => match frames {
                    Ok(Some(frames)) => {
                        for frame in frames {
                            self.dispatch(frame);
                        }
                    }
                    Ok(None) => return Some("closed by device".into()),
                    Err(e) => return Some(e.to_string()),
                },
            }
        }
    }

    /// Reconnection supervisor: notify `false`, then retry login and
    /// upgrade forever with a fixed pause after each failure. `None` if
    /// cancelled before a new stream was opened.
    async fn supervise(&self, cancel: &CancellationToken) -> Option<StreamSource> {
        self.inner.writer.lock().await.take();
        self.inner.store.set_connected(false);

        let interval = self.inner.config.reconnect.interval;
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            self.set_state(ConnectionState::Reconnecting { attempt });

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                outcome = self.reconnect_once() => outcome,
            };
            match outcome {
                Ok(source) => {
                    info!(attempt, "reconnected");
                    return Some(source);
                }
                Err(failure) => {
                    error!(
                        attempt,
                        http = %failure.http,
                        websocket = %failure.websocket,
                        "reconnect attempt failed"
                    );
                    self.inner.store.set_connected(false);
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn reconnect_once(&self) -> Result<StreamSource, AttemptFailure> {
        if let Err(e) = self.login().await {
            return Err(AttemptFailure {
                http: e.to_string(),
                websocket: "not attempted".into(),
            });
        }
        self.open_stream().await.map_err(|e| AttemptFailure {
            http: "ok".into(),
            websocket: e.to_string(),
        })
    }
}

// ── Background stream task ───────────────────────────────────────

async fn run_stream(client: NaxClient, mut source: StreamSource, cancel: CancellationToken) {
    loop {
        let Some(reason) = client.read_until_lost(&mut source, &cancel).await else {
            debug!("stream task cancelled");
            return;
        };
        warn!(%reason, "stream lost");

        match client.supervise(&cancel).await {
            Some(next) => source = next,
            None => {
                debug!("reconnect cancelled");
                return;
            }
        }
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
