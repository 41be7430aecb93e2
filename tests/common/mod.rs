//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use url::Url;

use livecam::{
    ConnectionManager, ConnectionState, Error, MediaChunk, NegotiationContext, PlaybackEvent,
    PlaybackEvents, PlaybackSink, Result, SinkSource, Snapshot, Status, Transport,
    TransportFactory, TransportKind, WakeLockProvider, WakeLockSentinel,
};

// ============================================================================
// Logging
// ============================================================================

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// RecordingSink
// ============================================================================

/// Sink that records chunk sequences and clears.
#[derive(Default)]
pub struct RecordingSink {
    pub chunks: Mutex<Vec<MediaChunk>>,
    pub clears: AtomicUsize,
    native: bool,
    native_urls: Mutex<Vec<Url>>,
    native_events: Mutex<Option<mpsc::UnboundedSender<PlaybackEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink that claims native HLS playback.
    pub fn native() -> Arc<Self> {
        Arc::new(Self {
            native: true,
            ..Self::default()
        })
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.chunks.lock().iter().map(|c| c.sequence).collect()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn native_urls(&self) -> Vec<Url> {
        self.native_urls.lock().clone()
    }

    /// Emits a native playback event; `false` if nothing is playing.
    pub fn emit(&self, event: PlaybackEvent) -> bool {
        self.native_events
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Stops native playback by closing the event channel.
    pub fn stop_native(&self) {
        self.native_events.lock().take();
    }
}

impl PlaybackSink for RecordingSink {
    fn attach(&self, source: SinkSource) {
        if let SinkSource::Chunk(chunk) = source {
            self.chunks.lock().push(chunk);
        }
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.chunks.lock().clear();
    }

    fn supports_native_hls(&self) -> bool {
        self.native
    }

    fn play_native(&self, manifest: &Url) -> Result<PlaybackEvents> {
        if !self.native {
            return Err(Error::Unsupported);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.native_urls.lock().push(manifest.clone());
        *self.native_events.lock() = Some(tx);
        Ok(rx)
    }
}

// ============================================================================
// Scripted Transports
// ============================================================================

/// How a fake transport's negotiation ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Attach a chunk and succeed.
    Succeed,
    /// Fail like a rejected offer.
    Fail,
    /// Never complete.
    Hang,
    /// Wait for [`FakeTransport::release`], then succeed.
    Gate,
    /// No playback path on this platform.
    Unsupported,
    /// Playlist helper could not be loaded.
    HelperLoad,
}

pub struct FakeTransport {
    pub id: u64,
    pub kind: TransportKind,
    outcome: Outcome,
    ctx: Mutex<Option<NegotiationContext>>,
    torn_down: AtomicBool,
    gate: Notify,
}

impl FakeTransport {
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Reports loss through the notifier the manager handed in.
    pub fn lose(&self, reason: &str) {
        if let Some(ctx) = self.ctx.lock().as_ref() {
            ctx.loss.notify(reason);
        }
    }

    /// Tries to write into the sink with this transport's handle.
    pub fn try_attach(&self) -> Result<()> {
        let ctx = self.ctx.lock().clone();
        match ctx {
            Some(ctx) => ctx.sink.attach(chunk(self.id)),
            None => Err(Error::Superseded),
        }
    }

    /// Lets a [`Outcome::Gate`] negotiation finish.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

fn chunk(id: u64) -> SinkSource {
    SinkSource::Chunk(MediaChunk {
        sequence: id,
        duration: Duration::from_secs(1),
        init: false,
        data: Bytes::from_static(b"media"),
    })
}

#[async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn negotiate(&self, ctx: NegotiationContext) -> Result<()> {
        *self.ctx.lock() = Some(ctx.clone());

        match self.outcome {
            Outcome::Succeed => ctx.sink.attach(chunk(self.id)),
            Outcome::Fail => Err(Error::signaling_status(500)),
            Outcome::Hang => std::future::pending().await,
            Outcome::Gate => {
                self.gate.notified().await;
                Ok(())
            }
            Outcome::Unsupported => Err(Error::Unsupported),
            Outcome::HelperLoad => Err(Error::helper_load("network unreachable")),
        }
    }

    fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }
}

struct Script {
    queued: VecDeque<Outcome>,
    default: Outcome,
}

/// Factory handing out fakes with scripted outcomes.
pub struct ScriptedFactory {
    low_latency: Mutex<Script>,
    fallback: Mutex<Script>,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl ScriptedFactory {
    pub fn new(low_latency: Outcome, fallback: Outcome) -> Arc<Self> {
        Arc::new(Self {
            low_latency: Mutex::new(Script {
                queued: VecDeque::new(),
                default: low_latency,
            }),
            fallback: Mutex::new(Script {
                queued: VecDeque::new(),
                default: fallback,
            }),
            created: Mutex::new(Vec::new()),
        })
    }

    fn script(&self, kind: TransportKind) -> &Mutex<Script> {
        match kind {
            TransportKind::LowLatency => &self.low_latency,
            TransportKind::Fallback => &self.fallback,
        }
    }

    /// Queues a one-off outcome for the next transport of `kind`.
    pub fn push(&self, kind: TransportKind, outcome: Outcome) {
        self.script(kind).lock().queued.push_back(outcome);
    }

    /// Changes the outcome used once the queue is empty.
    pub fn set(&self, kind: TransportKind, outcome: Outcome) {
        self.script(kind).lock().default = outcome;
    }

    pub fn created(&self) -> Vec<Arc<FakeTransport>> {
        self.created.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn count_of(&self, kind: TransportKind) -> usize {
        self.created.lock().iter().filter(|t| t.kind == kind).count()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no transport created")
    }

    /// Transports that have not been torn down.
    pub fn alive(&self) -> usize {
        self.created.lock().iter().filter(|t| !t.is_torn_down()).count()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, kind: TransportKind) -> Result<Arc<dyn Transport>> {
        let outcome = {
            let mut script = self.script(kind).lock();
            let default = script.default;
            script.queued.pop_front().unwrap_or(default)
        };

        let mut created = self.created.lock();
        let transport = Arc::new(FakeTransport {
            id: created.len() as u64 + 1,
            kind,
            outcome,
            ctx: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            gate: Notify::new(),
        });
        created.push(Arc::clone(&transport));
        Ok(transport)
    }
}

// ============================================================================
// Wake Lock
// ============================================================================

#[derive(Default)]
pub struct FakeWakeLock {
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

struct FakeSentinel(Arc<AtomicUsize>);

impl WakeLockSentinel for FakeSentinel {
    fn release(self: Box<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WakeLockProvider for FakeWakeLock {
    async fn acquire(&self) -> Result<Box<dyn WakeLockSentinel>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSentinel(Arc::clone(&self.released))))
    }
}

// ============================================================================
// Status Recording
// ============================================================================

/// Status callback sink with the virtual time of each call.
#[derive(Default, Clone)]
pub struct StatusLog {
    entries: Arc<Mutex<Vec<(Status, tokio::time::Instant)>>>,
}

impl StatusLog {
    pub fn handler(&self) -> impl Fn(&Status) + Send + Sync + 'static {
        let entries = Arc::clone(&self.entries);
        move |status: &Status| {
            entries
                .lock()
                .push((status.clone(), tokio::time::Instant::now()));
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|(status, _)| status.label.clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.entries.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn last(&self) -> Option<Status> {
        self.entries.lock().last().map(|(s, _)| s.clone())
    }

    pub fn times(&self) -> Vec<tokio::time::Instant> {
        self.entries.lock().iter().map(|(_, t)| *t).collect()
    }
}

// ============================================================================
// Waiting
// ============================================================================

/// Waits until the published snapshot satisfies `predicate`.
pub async fn wait_for(
    manager: &ConnectionManager,
    predicate: impl FnMut(&Snapshot) -> bool,
) -> Snapshot {
    let mut rx = manager.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(600), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("manager stopped");
    snapshot.clone()
}

/// Waits until the manager is in `state`, ignoring `started_at`.
pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) -> Snapshot {
    wait_for(manager, |s| same_state(&s.state, &state)).await
}

pub fn same_state(a: &ConnectionState, b: &ConnectionState) -> bool {
    match (a, b) {
        (ConnectionState::Live { kind: x, .. }, ConnectionState::Live { kind: y, .. }) => x == y,
        _ => a == b,
    }
}

/// A `Live` pattern for [`wait_for_state`].
pub fn live(kind: TransportKind) -> ConnectionState {
    ConnectionState::Live {
        kind,
        started_at: tokio::time::Instant::now(),
    }
}

/// Lets spawned tasks run without advancing the clock much.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Local Origin
// ============================================================================

/// Serves `app` on an ephemeral localhost port.
pub async fn serve(app: axum::Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}
