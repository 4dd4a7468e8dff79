//! Connection manager: the async driver around a [`Session`].
//!
//! One tokio task per manager owns the transport and every timer. It waits on
//! control requests, the pending connect, inbound frames, the retry and auth
//! deadlines and two periodic ticks, and feeds each into the session in turn.
//! Commands from callers lock the same session directly, so the driver and
//! callers see a single order of events.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use murmur_shared::{ApiError, PresenceStatus};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

use super::connection::{ConnectionState, Effect, Input};
use super::events::SessionEvent;
use super::session::{lock, Session};
use super::transport::{Connector, Frame, FrameSink, FrameStream, TransportLink};
use crate::api_client::HistorySource;
use crate::commands::Commands;
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::notify::{NotificationFanout, NotificationSink};
use crate::stores::{Action, Change, Conversation, ObserverId};

/// Capacity of the event bus; slow subscribers observe `Lagged`.
pub const EVENT_CAPACITY: usize = 256;

/// How often typing indicators and presence entries are aged out.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(250);

/// Page size for [`ConnectionManager::load_history`].
pub const HISTORY_PAGE: usize = 50;

type ConnectFuture = Pin<Box<dyn Future<Output = Result<TransportLink, TransportError>> + Send>>;

#[derive(Debug)]
enum Control {
    Connect,
    Disconnect,
    Dispose,
}

/// Handle to one messaging connection and its session state.
pub struct ConnectionManager {
    session: Arc<Mutex<Session>>,
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Set up the session and spawn its driver. Nothing is dialed until
    /// [`connect`](Self::connect). Must be called within a tokio runtime.
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let fanout = NotificationFanout::new(config.user_id.clone(), config.sound_enabled);
        let session = Arc::new(Mutex::new(Session::new(
            config.token.clone(),
            config.user_id.clone(),
            config.reconnect.clone(),
            fanout,
            events.clone(),
            state_tx,
        )));

        let (control, control_rx) = mpsc::unbounded_channel();
        let driver = Driver::new(session.clone(), connector, &config, control_rx);
        let task = tokio::spawn(driver.run());

        Self {
            session,
            control,
            state,
            events,
            task,
        }
    }

    pub fn connect(&self) {
        let _ = self.control.send(Control::Connect);
    }

    /// Close cleanly; no reconnect is scheduled.
    pub fn disconnect(&self) {
        let _ = self.control.send(Control::Disconnect);
    }

    /// Close, clear all session state and stop the driver task.
    pub async fn dispose(self) {
        let _ = self.control.send(Control::Dispose);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "connection driver panicked");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.state().is_connecting()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn commands(&self) -> Commands {
        Commands::new(self.session.clone())
    }

    /// Observe store changes for one conversation.
    ///
    /// The callback runs while the session is locked and must not call back
    /// into this manager.
    pub fn subscribe<F>(&self, conversation_id: &str, callback: F) -> ObserverId
    where
        F: FnMut(&Change) + Send + 'static,
    {
        lock(&self.session).store_mut().subscribe(conversation_id, callback)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        lock(&self.session).store_mut().unsubscribe(id)
    }

    /// Snapshot of one conversation.
    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        lock(&self.session).store().conversation(conversation_id).cloned()
    }

    pub fn unread_count(&self, conversation_id: &str) -> usize {
        lock(&self.session).store().unread_count(conversation_id)
    }

    pub fn presence(&self, user_id: &str) -> PresenceStatus {
        lock(&self.session).store().presence(user_id)
    }

    pub fn joined_conversations(&self) -> BTreeSet<String> {
        lock(&self.session).registry().joined_ids()
    }

    pub fn local_user(&self) -> String {
        lock(&self.session).store().local_user().to_string()
    }

    /// Conversation the user is looking at; it raises no notifications.
    pub fn set_focus(&self, conversation_id: Option<String>) {
        lock(&self.session).fanout_mut().set_focus(conversation_id);
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        lock(&self.session).fanout_mut().set_sound_enabled(enabled);
    }

    pub fn add_notification_sink(&self, sink: Arc<dyn NotificationSink>) {
        lock(&self.session).fanout_mut().add_sink(sink);
    }

    /// Backfill older messages for a conversation. Returns how many were new.
    pub async fn load_history(
        &self,
        source: &dyn HistorySource,
        conversation_id: &str,
    ) -> Result<usize, ApiError> {
        let before = {
            let session = lock(&self.session);
            session
                .store()
                .conversation(conversation_id)
                .and_then(|c| c.messages.iter().find_map(|m| m.id.clone()))
        };
        let page = source
            .list_messages(conversation_id, before.as_deref(), HISTORY_PAGE)
            .await?;

        let mut session = lock(&self.session);
        let local_user = session.store().local_user().to_string();
        let messages = page
            .into_iter()
            .map(|m| m.into_message(&local_user))
            .collect();
        let changes = session.store_mut().apply(Action::History {
            conversation_id: conversation_id.to_string(),
            messages,
        });
        let added: usize = changes
            .iter()
            .map(|c| match c {
                Change::HistoryLoaded { added, .. } => *added,
                _ => 0,
            })
            .sum();
        tracing::debug!(%conversation_id, added, "history loaded");
        Ok(added)
    }

    /// Ids of the peer messages in a conversation that are not read yet.
    pub fn unread_ids(&self, conversation_id: &str) -> Vec<String> {
        let session = lock(&self.session);
        let store = session.store();
        store
            .conversation(conversation_id)
            .map(|c| c.unread_ids(store.local_user()))
            .unwrap_or_default()
    }

    /// Mark messages read over REST while the socket is unavailable. The store
    /// follows once the request succeeds.
    pub async fn mark_read_fallback(
        &self,
        source: &dyn HistorySource,
        conversation_id: &str,
        message_ids: Vec<String>,
    ) -> Result<(), ApiError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        source.mark_read(conversation_id, &message_ids).await?;
        lock(&self.session).store_mut().apply(Action::LocalRead {
            conversation_id: conversation_id.to_string(),
            message_ids,
        });
        Ok(())
    }

    /// React over REST while the socket is unavailable. As with the socket
    /// path, the reaction reaches the store only through the server's broadcast.
    pub async fn add_reaction_fallback(
        &self,
        source: &dyn HistorySource,
        conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), ApiError> {
        source.add_reaction(conversation_id, message_id, emoji).await?;
        tracing::debug!(%conversation_id, %message_id, "reaction posted over rest");
        Ok(())
    }
}

struct Driver {
    session: Arc<Mutex<Session>>,
    connector: Arc<dyn Connector>,
    endpoint: Url,
    auth_timeout: Duration,
    heartbeat_interval: Duration,
    control: mpsc::UnboundedReceiver<Control>,
    connecting: Option<ConnectFuture>,
    stream: Option<FrameStream>,
    /// Link generation, so a stale writer's failure is not blamed on a newer link.
    generation: u64,
    writer_failed_tx: mpsc::UnboundedSender<u64>,
    writer_failed: mpsc::UnboundedReceiver<u64>,
    retry_at: Option<Instant>,
    auth_deadline: Option<Instant>,
    last_inbound: Instant,
}

async fn next_connect(connecting: &mut Option<ConnectFuture>) -> Result<TransportLink, TransportError> {
    match connecting.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(stream: &mut Option<FrameStream>) -> Option<Result<Frame, TransportError>> {
    match stream.as_mut() {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drain the outbound queue into the sink until the session lets go of it.
async fn write_frames(
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    generation: u64,
    failed: mpsc::UnboundedSender<u64>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(frame).await {
            tracing::warn!(error = %e, "websocket send failed");
            let _ = failed.send(generation);
            return;
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "error closing websocket");
    }
}

fn std_now() -> std::time::Instant {
    Instant::now().into_std()
}

impl Driver {
    fn new(
        session: Arc<Mutex<Session>>,
        connector: Arc<dyn Connector>,
        config: &ClientConfig,
        control: mpsc::UnboundedReceiver<Control>,
    ) -> Self {
        let (writer_failed_tx, writer_failed) = mpsc::unbounded_channel();
        Self {
            session,
            connector,
            endpoint: config.endpoint(),
            auth_timeout: config.auth_timeout,
            heartbeat_interval: config.heartbeat_interval.max(Duration::from_millis(100)),
            control,
            connecting: None,
            stream: None,
            generation: 0,
            writer_failed_tx,
            writer_failed,
            retry_at: None,
            auth_deadline: None,
            last_inbound: Instant::now(),
        }
    }

    fn input(&self, input: Input) -> Vec<Effect> {
        lock(&self.session).input(input)
    }

    async fn run(mut self) {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let effects = tokio::select! {
                control = self.control.recv() => match control {
                    Some(Control::Connect) => self.input(Input::Connect),
                    Some(Control::Disconnect) => self.input(Input::Disconnect),
                    Some(Control::Dispose) | None => {
                        let effects = lock(&self.session).dispose();
                        self.perform(effects);
                        break;
                    }
                },
                result = next_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connected(result)
                }
                frame = next_frame(&mut self.stream) => self.on_frame(frame),
                Some(generation) = self.writer_failed.recv() => {
                    if generation == self.generation && self.stream.is_some() {
                        self.stream = None;
                        self.input(Input::TransportClosed("write failed".into()))
                    } else {
                        Vec::new()
                    }
                }
                _ = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    self.input(Input::RetryElapsed)
                }
                _ = sleep_until(self.auth_deadline) => {
                    self.auth_deadline = None;
                    tracing::warn!(timeout = ?self.auth_timeout, "no auth ack in time");
                    self.input(Input::AuthTimedOut)
                }
                _ = heartbeat.tick() => self.on_heartbeat(),
                _ = housekeeping.tick() => {
                    lock(&self.session).expire(std_now());
                    Vec::new()
                }
            };
            self.perform(effects);
        }
        tracing::debug!("connection driver stopped");
    }

    fn perform(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Open => self.open(),
                Effect::ArmAuthTimer => self.auth_deadline = Some(Instant::now() + self.auth_timeout),
                Effect::DisarmAuthTimer => self.auth_deadline = None,
                Effect::ScheduleRetry(delay) => {
                    tracing::info!(?delay, "reconnect scheduled");
                    self.retry_at = Some(Instant::now() + delay);
                }
                Effect::CancelRetry => self.retry_at = None,
                Effect::Close => {
                    // Dropping the session's queue sender ends the writer,
                    // which closes the sink.
                    self.connecting = None;
                    self.stream = None;
                }
                other => tracing::trace!(?other, "effect handled by session"),
            }
        }
    }

    fn open(&mut self) {
        let connector = self.connector.clone();
        let endpoint = self.endpoint.clone();
        tracing::info!(
            host = endpoint.host_str().unwrap_or_default(),
            path = endpoint.path(),
            "connecting"
        );
        self.connecting = Some(Box::pin(async move { connector.connect(&endpoint).await }));
    }

    fn on_connected(&mut self, result: Result<TransportLink, TransportError>) -> Vec<Effect> {
        match result {
            Ok(link) => {
                self.generation += 1;
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(write_frames(
                    link.sink,
                    rx,
                    self.generation,
                    self.writer_failed_tx.clone(),
                ));
                self.stream = Some(link.stream);
                self.last_inbound = Instant::now();

                let mut session = lock(&self.session);
                session.attach(tx);
                session.input(Input::Opened)
            }
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
                self.input(Input::OpenFailed(e.to_string()))
            }
        }
    }

    fn on_frame(&mut self, frame: Option<Result<Frame, TransportError>>) -> Vec<Effect> {
        let reason = match frame {
            Some(Ok(Frame::Close)) => "closed by server".to_string(),
            Some(Ok(frame)) => {
                self.last_inbound = Instant::now();
                return lock(&self.session).on_frame(frame, std_now());
            }
            Some(Err(e)) => e.to_string(),
            None => "stream ended".to_string(),
        };
        tracing::info!(%reason, "websocket closed");
        self.stream = None;
        self.input(Input::TransportClosed(reason))
    }

    fn on_heartbeat(&mut self) -> Vec<Effect> {
        let mut session = lock(&self.session);
        if !session.state().is_authenticated() {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if self.last_inbound.elapsed() >= self.heartbeat_interval * 2 {
            tracing::warn!("heartbeat missed");
            self.last_inbound = Instant::now();
            effects = session.input(Input::HeartbeatMissed);
        }
        session.heartbeat();
        effects
    }
}
