use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assets::AssetBundle;
use crate::bridge::{BridgeEvent, DeliveryLog, DeliveryTag};
use crate::config::{ProxyMode, RelayConfig};
use crate::dispatch;
use crate::error::{RelayError, RelayResult};
use crate::events::{EventSender, PlayerEvent};
use crate::page::{self, PageConfig, StreamKind};
use crate::port;
use crate::proxy;

/**
    Initialization state of a player session.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No stream has been requested
    Idle,
    /// A stream was requested and the page has not reported ready
    Loading,
    /// The page reported ready
    Ready,
    /// The page reported an error, navigation failed, or it timed out
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/**
    The host's embedded browser.

    Both calls are fire-and-forget: implementations hand the request to
    the browser (usually by posting to the UI thread) and return.
*/
pub trait WebView: Send + Sync + 'static {
    fn navigate(&self, url: &str) -> anyhow::Result<()>;
    fn evaluate_script(&self, script: &str) -> anyhow::Result<()>;
}

/// What the current page is built for
#[derive(Debug, Clone)]
pub(crate) struct StreamTarget {
    pub url: String,
    pub is_live: bool,
    pub kind: StreamKind,
    pub via_proxy: bool,
    pub generation: u64,
}

struct PendingInit {
    generation: u64,
    tx: oneshot::Sender<RelayResult<()>>,
}

/**
    State shared between the controller and the request handlers.

    The target is written only by the controller. Handlers read it and
    resolve the pending signal.
*/
pub(crate) struct SessionShared {
    pub config: RelayConfig,
    pub base_url: String,
    pub assets: AssetBundle,
    pub client: reqwest::Client,
    pub cancel: CancellationToken,
    target: RwLock<Option<StreamTarget>>,
    generation: AtomicU64,
    pending: Mutex<Option<PendingInit>>,
    deliveries: Mutex<DeliveryLog>,
    state_tx: watch::Sender<SessionState>,
    events: EventSender,
}

impl SessionShared {
    pub fn new(
        config: RelayConfig,
        base_url: String,
        assets: AssetBundle,
        client: reqwest::Client,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            base_url,
            assets,
            client,
            cancel: CancellationToken::new(),
            target: RwLock::new(None),
            generation: AtomicU64::new(0),
            pending: Mutex::new(None),
            deliveries: Mutex::new(DeliveryLog::default()),
            state_tx: watch::Sender::new(SessionState::Idle),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn emit(&self, event: PlayerEvent) {
        // The host may have dropped its receiver
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: SessionState) {
        self.state_tx.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    /**
        Start a new load cycle and return its generation.

        Any earlier pending signal is dropped, which its awaiter sees as superseded.
    */
    fn begin_load(
        &self,
        url: String,
        is_live: bool,
        via_proxy: bool,
        tx: oneshot::Sender<RelayResult<()>>,
    ) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.target.write() = Some(StreamTarget {
            kind: StreamKind::detect(&url),
            url,
            is_live,
            via_proxy,
            generation,
        });
        self.set_state(SessionState::Loading);
        *self.pending.lock() = Some(PendingInit { generation, tx });
        generation
    }

    fn take_pending(&self, generation: u64) -> Option<PendingInit> {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|p| p.generation == generation) {
            pending.take()
        } else {
            None
        }
    }

    /**
        Fail the load for `generation`, unless a newer load has started.
    */
    fn fail_load(&self, generation: u64, error: RelayError) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        drop(self.take_pending(generation));
        self.set_state(SessionState::Failed);
        self.emit(PlayerEvent::Error(error));
    }

    /**
        Build the page for the current target, if any.
    */
    pub fn render_page(&self) -> Option<String> {
        let target = self.target.read();
        let target = target.as_ref()?;
        Some(page::build_page(&PageConfig {
            stream_url: &target.url,
            is_live: target.is_live,
            kind: target.kind,
            license_key: self.config.license_key.as_deref(),
            base_url: &self.base_url,
            cache_bust: cache_bust_token(),
            generation: target.generation,
            via_proxy: target.via_proxy,
        }))
    }

    /**
        Apply an event from the page.

        Events tagged with an old generation and repeated deliveries of the
        same event are ignored.
    */
    pub fn handle_bridge_event(&self, event: BridgeEvent, tag: &DeliveryTag) {
        let current = self.generation.load(Ordering::Acquire);
        if let Some(generation) = tag.generation
            && generation != current
        {
            debug!(generation, current, ?event, "ignoring event from superseded page");
            return;
        }
        if !self.deliveries.lock().first_delivery(tag) {
            return;
        }

        match event {
            BridgeEvent::Ready => {
                // Ready and Failed are terminal until the next load
                let Some(pending) = self.take_pending(current) else {
                    debug!(generation = current, state = %self.state(), "ready with no pending load");
                    return;
                };
                self.set_state(SessionState::Ready);
                info!(generation = current, "player ready");
                let _ = pending.tx.send(Ok(()));
                self.emit(PlayerEvent::StateChanged("ready".to_string()));
            }
            BridgeEvent::Error(message) => {
                warn!(generation = current, %message, "player reported error");
                let error = RelayError::Player(message);
                if let Some(pending) = self.take_pending(current) {
                    self.set_state(SessionState::Failed);
                    let _ = pending.tx.send(Err(error.clone()));
                }
                self.emit(PlayerEvent::Error(error));
            }
            BridgeEvent::StateChanged(state) => {
                debug!(generation = current, %state, "player state changed");
                self.emit(PlayerEvent::StateChanged(state));
            }
            BridgeEvent::Debug(message) => {
                debug!(generation = current, %message, "page debug");
                self.emit(PlayerEvent::Debug(message));
            }
        }
    }
}

fn cache_bust_token() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/**
    One relay instance, owned by one player control.

    Runs the loopback server for as long as the session lives and exposes
    the control contract the host binds its player UI to.
*/
pub struct PlayerSession {
    shared: Arc<SessionShared>,
    web_view: Arc<dyn WebView>,
    server: Mutex<Option<JoinHandle<()>>>,
    port: u16,
}

impl PlayerSession {
    /**
        Bind a port, start serving, and return the session.

        If no port is free the error is also emitted as an event.
    */
    pub async fn start(
        config: RelayConfig,
        web_view: Arc<dyn WebView>,
        events: EventSender,
    ) -> RelayResult<Self> {
        Self::start_with_assets(config, web_view, events, AssetBundle::embedded()).await
    }

    /**
        Same as [`PlayerSession::start`], serving a custom asset bundle.
    */
    pub async fn start_with_assets(
        config: RelayConfig,
        web_view: Arc<dyn WebView>,
        events: EventSender,
        assets: AssetBundle,
    ) -> RelayResult<Self> {
        let (listener, port) = match port::bind_loopback(config.port_start, config.port_count).await
        {
            Ok(bound) => bound,
            Err(e) => {
                warn!(error = %e, "relay startup failed");
                let _ = events.send(PlayerEvent::Error(e.clone()));
                return Err(e);
            }
        };

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RelayError::Proxy(format!("failed to create HTTP client: {e}")))?;

        let base_url = format!("http://127.0.0.1:{port}");
        let shared = Arc::new(SessionShared::new(
            config,
            base_url.clone(),
            assets,
            client,
            events,
        ));

        let app = dispatch::router(Arc::clone(&shared));
        let cancel = shared.cancel.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await;
            match result {
                Ok(()) => debug!(port, "relay listener stopped"),
                Err(e) => warn!(port, error = %e, "relay listener stopped with error"),
            }
        });

        info!(%base_url, "relay session started");

        Ok(Self {
            shared,
            web_view,
            server: Mutex::new(Some(server)),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> &str {
        &self.shared.base_url
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /**
        Watch state transitions.
    */
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    fn ensure_open(&self) -> RelayResult<()> {
        if self.shared.cancel.is_cancelled() {
            Err(RelayError::Disposed)
        } else {
            Ok(())
        }
    }

    /**
        Load a stream and wait until the page reports ready.

        Resolves `Ok(true)` only after the bridge confirms readiness. Fails
        with the page's error, [`RelayError::Navigation`], or
        [`RelayError::InitTimeout`]; each of those is also emitted as an
        event. A call replaced by a newer one fails with
        [`RelayError::Superseded`] and leaves the state to the newer call.
    */
    pub async fn initialize_with_url(&self, url: &str, is_live: bool) -> RelayResult<bool> {
        self.ensure_open()?;

        let url = url.trim();
        if url.is_empty() {
            return Err(RelayError::InvalidArgument(
                "stream url must not be empty".to_string(),
            ));
        }

        let via_proxy = match self.shared.config.proxy_mode {
            ProxyMode::Always => true,
            ProxyMode::Never => false,
            ProxyMode::Auto => {
                !proxy::probe_direct_access(
                    &self.shared.client,
                    url,
                    self.shared.config.probe_timeout,
                )
                .await
            }
        };

        let (tx, rx) = oneshot::channel();
        let generation = self
            .shared
            .begin_load(url.to_string(), is_live, via_proxy, tx);
        info!(generation, %url, is_live, via_proxy, "loading stream");

        let page_url = format!("{}/?v={}", self.shared.base_url, cache_bust_token());
        if let Err(e) = self.web_view.navigate(&page_url) {
            let error = RelayError::Navigation(e.to_string());
            warn!(generation, error = %error, "navigation failed");
            self.shared.fail_load(generation, error.clone());
            return Err(error);
        }

        let timeout = self.shared.config.init_timeout;
        let outcome = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(RelayError::Disposed),
            result = tokio::time::timeout(timeout, rx) => match result {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(RelayError::Superseded),
                Err(_) => Err(RelayError::InitTimeout(timeout)),
            },
        };

        match outcome {
            Ok(()) => Ok(true),
            Err(error @ RelayError::InitTimeout(_)) => {
                warn!(generation, ?timeout, "player did not report ready in time");
                self.shared.fail_load(generation, error.clone());
                Err(error)
            }
            Err(error) if error.is_cancellation() => {
                debug!(generation, error = %error, "initialization ended");
                Err(error)
            }
            Err(error) => {
                info!(generation, error = %error, "initialization failed");
                Err(error)
            }
        }
    }

    pub async fn play(&self) -> RelayResult<()> {
        self.invoke("play", "window.relayControl && window.relayControl.play();")
    }

    pub async fn pause(&self) -> RelayResult<()> {
        self.invoke("pause", "window.relayControl && window.relayControl.pause();")
    }

    pub async fn set_muted(&self, muted: bool) -> RelayResult<()> {
        let script = format!("window.relayControl && window.relayControl.setMuted({muted});");
        self.invoke("set_muted", &script)
    }

    fn invoke(&self, action: &str, script: &str) -> RelayResult<()> {
        self.ensure_open()?;
        let actual = self.state();
        if actual != SessionState::Ready {
            return Err(RelayError::InvalidState {
                expected: SessionState::Ready,
                actual,
            });
        }
        debug!(action, "invoking player script");
        self.web_view
            .evaluate_script(script)
            .map_err(|e| RelayError::Script(e.to_string()))
    }

    /**
        Feed a message that arrived over a native web view channel.

        Duplicates of messages already delivered over HTTP are ignored.
    */
    pub fn handle_web_message(&self, json: &str) -> RelayResult<()> {
        let (event, tag) = BridgeEvent::from_web_message(json)?;
        self.shared.handle_bridge_event(event, &tag);
        Ok(())
    }

    /**
        Stop serving and release the port.

        Idempotent. In-flight requests get the configured grace period
        and are then aborted.
    */
    pub async fn dispose(&self) {
        self.shared.cancel.cancel();
        drop(self.shared.pending.lock().take());

        let server = self.server.lock().take();
        let Some(mut server) = server else {
            return;
        };

        let grace = self.shared.config.shutdown_grace;
        if tokio::time::timeout(grace, &mut server).await.is_err() {
            debug!(port = self.port, "relay listener did not drain in time, aborting");
            server.abort();
            let _ = server.await;
        }

        info!(port = self.port, "relay session disposed");
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
