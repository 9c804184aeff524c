//! Session/connection manager for the download broker.
//!
//! The broker correlates download requests by a client id that must first be
//! registered over a WebSocket. One logical connection exists per process:
//! it is opened lazily, reused while open, and reopened after it drops.
//! Concurrent callers that arrive while a handshake is in flight all await
//! the same attempt.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use deck_proto::config::BrokerConfig;

use crate::error::ConnectionError;

pub type SessionId = String;

fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

/// Handle to an established broker connection.
///
/// Cheap to clone; all clones observe the same open flag.
#[derive(Debug, Clone)]
pub struct BrokerLink {
    open: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl BrokerLink {
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Record that the underlying channel is gone.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Ask the owner of the channel to shut it down.
    pub fn close(&self) {
        self.mark_closed();
        self.shutdown.notify_one();
    }

    async fn shutdown_requested(&self) {
        self.shutdown.notified().await
    }
}

impl Default for BrokerLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens a broker connection registered under a session id.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    async fn connect(&self, session_id: &str) -> Result<BrokerLink, ConnectionError>;
}

type PendingConnect = Shared<BoxFuture<'static, Result<SessionId, ConnectionError>>>;

#[derive(Default)]
struct SessionState {
    session_id: Option<SessionId>,
    link: Option<BrokerLink>,
    pending: Option<PendingConnect>,
}

pub struct SessionManager {
    connector: Arc<dyn BrokerConnector>,
    timeout: Duration,
    state: Arc<Mutex<SessionState>>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>, timeout: Duration) -> Self {
        Self {
            connector,
            timeout,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(
            Arc::new(WsConnector::new(config)),
            Duration::from_millis(config.connect_timeout_ms),
        )
    }

    /// Return the id of a live broker session, connecting first if needed.
    pub async fn acquire_session_id(&self) -> Result<SessionId, ConnectionError> {
        let pending = {
            let mut state = self.state.lock().await;

            if let Some(link) = &state.link {
                if link.is_open() {
                    if let Some(id) = &state.session_id {
                        return Ok(id.clone());
                    }
                } else {
                    debug!("Broker link closed, reconnecting");
                    state.link = None;
                }
            }

            match &state.pending {
                Some(pending) => pending.clone(),
                None => {
                    let id = state
                        .session_id
                        .get_or_insert_with(new_session_id)
                        .clone();
                    let pending = self.connect(id);
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    fn connect(&self, session_id: SessionId) -> PendingConnect {
        let connector = self.connector.clone();
        let state = self.state.clone();
        let timeout = self.timeout;

        async move {
            debug!(session = %session_id, "Opening broker connection");
            let outcome = match tokio::time::timeout(timeout, connector.connect(&session_id)).await
            {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout(timeout)),
            };

            let mut state = state.lock().await;
            state.pending = None;
            match outcome {
                Ok(link) => {
                    info!(session = %session_id, "Broker connection established");
                    state.link = Some(link);
                    Ok(session_id)
                }
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Broker connection failed");
                    state.session_id = None;
                    state.link = None;
                    Err(e)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Tear the current connection down. The session id survives, so the next
    /// acquire reconnects under the same id.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(link) = state.link.take() {
            info!("Closing broker connection");
            link.close();
        }
    }

    pub async fn current_session_id(&self) -> Option<SessionId> {
        self.state.lock().await.session_id.clone()
    }
}

/// WebSocket connector for `ws://<host>/api/ws?client_id=<id>`.
pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            endpoint: config.ws_endpoint(),
        }
    }
}

#[async_trait]
impl BrokerConnector for WsConnector {
    async fn connect(&self, session_id: &str) -> Result<BrokerLink, ConnectionError> {
        let url = format!("{}?client_id={}", self.endpoint, session_id);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        let link = BrokerLink::new();
        let watcher = link.clone();
        let session = session_id.to_string();
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watcher.shutdown_requested() => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    msg = ws_rx.next() => match msg {
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_tx.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(session = %session, ?frame, "Broker closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(session = %session, error = %e, "Broker connection lost");
                            break;
                        }
                        None => {
                            warn!(session = %session, "Broker connection ended without close frame");
                            break;
                        }
                    }
                }
            }
            watcher.mark_closed();
        });

        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeConnector {
        attempts: AtomicUsize,
        delay_ms: StdMutex<u64>,
        fail: AtomicBool,
        ids: StdMutex<Vec<String>>,
        links: StdMutex<Vec<BrokerLink>>,
    }

    impl FakeConnector {
        fn with_delay(ms: u64) -> Arc<Self> {
            let fake = Self::default();
            *fake.delay_ms.lock().unwrap() = ms;
            Arc::new(fake)
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BrokerConnector for FakeConnector {
        async fn connect(&self, session_id: &str) -> Result<BrokerLink, ConnectionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.ids.lock().unwrap().push(session_id.to_string());
            let delay = *self.delay_ms.lock().unwrap();
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ConnectionError::Handshake("refused".into()));
            }
            let link = BrokerLink::new();
            self.links.lock().unwrap().push(link.clone());
            Ok(link)
        }
    }

    fn manager(connector: Arc<FakeConnector>) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(connector, Duration::from_millis(5000)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_handshake() {
        let connector = FakeConnector::with_delay(100);
        let sessions = manager(connector.clone());

        let calls = (0..8).map(|_| {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.acquire_session_id().await })
        });
        let results = futures_util::future::join_all(calls).await;

        let ids: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();
        assert_eq!(connector.attempts(), 1);
        assert!(ids.iter().all(|id| id == &ids[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_link_is_reused_without_network() {
        let connector = FakeConnector::with_delay(10);
        let sessions = manager(connector.clone());

        let first = sessions.acquire_session_id().await.unwrap();
        let second = sessions.acquire_session_id().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resets_session_then_recovers() {
        let connector = FakeConnector::with_delay(6000);
        let sessions = manager(connector.clone());

        let err = sessions.acquire_session_id().await.unwrap_err();
        assert_eq!(err, ConnectionError::Timeout(Duration::from_millis(5000)));
        assert_eq!(sessions.current_session_id().await, None);

        *connector.delay_ms.lock().unwrap() = 10;
        let id = sessions.acquire_session_id().await.unwrap();
        assert_eq!(connector.attempts(), 2);

        let tried = connector.ids.lock().unwrap().clone();
        assert_ne!(tried[0], tried[1]);
        assert_eq!(id, tried[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_error_reaches_every_waiter() {
        let connector = FakeConnector::with_delay(50);
        connector.fail.store(true, Ordering::SeqCst);
        let sessions = manager(connector.clone());

        let (a, b) = tokio::join!(sessions.acquire_session_id(), sessions.acquire_session_id());
        assert!(matches!(a, Err(ConnectionError::Handshake(_))));
        assert!(matches!(b, Err(ConnectionError::Handshake(_))));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_link_reconnects_with_same_id() {
        let connector = FakeConnector::with_delay(10);
        let sessions = manager(connector.clone());

        let first = sessions.acquire_session_id().await.unwrap();
        connector.links.lock().unwrap()[0].mark_closed();

        let second = sessions.acquire_session_id().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_forces_reconnect() {
        let connector = FakeConnector::with_delay(10);
        let sessions = manager(connector.clone());

        sessions.acquire_session_id().await.unwrap();
        sessions.close().await;
        assert!(!connector.links.lock().unwrap()[0].is_open());

        sessions.acquire_session_id().await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }
}
