//! Connection manager handle and actor.
//!
//! The manager runs as a single tokio task that owns every piece of mutable
//! state: the connection state, the reconnect counter, the active transport,
//! the retry timer and the wake-lock tracker. [`ConnectionManager`] is a
//! cheap handle that sends commands to it.
//!
//! # Event Loop
//!
//! ```text
//!   ConnectionManager ──Command──►┐
//!   negotiate() tasks ──Signal───►│  select!  ──► transition ──► on_status
//!   LossNotifier      ──Loss─────►│                          └──► watch<Snapshot>
//!   retry timer       ──fires────►┘
//! ```
//!
//! Every transport is stamped with the [`Generation`] of the sink binding it
//! was created for. Results and loss reports carrying any other generation
//! are dropped, so a superseded negotiation can never move the state.
//!
//! # Transitions
//!
//! | From | Event | To |
//! |------|-------|----|
//! | any | `connect()` | `Negotiating(LowLatency)` |
//! | `Negotiating(LowLatency)` | success | `Live(LowLatency)` |
//! | `Negotiating(LowLatency)` | failure | `Negotiating(Fallback)` |
//! | `Negotiating(Fallback)` | success | `Live(Fallback)` |
//! | `Negotiating(Fallback)` | failure | `Disconnected` |
//! | `Live(*)` | loss | `Disconnected` |
//! | `Disconnected` | timer or page visible | `Negotiating(LowLatency)` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep, sleep};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::Generation;
use crate::platform::{AcquireRequest, Visibility, VisibilityAction, WakeLock, WakeLockSentinel};
use crate::policy::ReconnectPolicy;
use crate::sink::SinkSlot;
use crate::state::{ConnectionState, Snapshot, Status, StatusKind, TransportKind};
use crate::transport::{Loss, LossNotifier, NegotiationContext, Transport, TransportFactory};

use super::builder::ManagerBuilder;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked synchronously on every state transition.
pub type StatusHandler = Arc<dyn Fn(&Status) + Send + Sync>;

/// Commands sent from handles to the actor.
enum Command {
    Connect,
    Retry,
    Visibility(Visibility),
    WakeLock(bool),
    WakeLockRevoked,
    Shutdown(oneshot::Sender<()>),
}

/// Completions reported by tasks the actor spawned.
enum Signal {
    Negotiated {
        generation: Generation,
        kind: TransportKind,
        result: Result<()>,
    },
    WakeLock {
        epoch: u64,
        result: Result<Box<dyn WakeLockSentinel>>,
    },
}

/// One unit of work for the actor.
enum Step {
    Command(Option<Command>),
    Signal(Signal),
    Loss(Loss),
    RetryDue,
}

/// Why the manager is entering `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    Failed,
    HelperLoad,
    Unsupported,
    Lost,
}

/// Everything the actor needs, assembled by [`ManagerBuilder`].
pub(crate) struct ManagerParts {
    pub factory: Arc<dyn TransportFactory>,
    pub policy: ReconnectPolicy,
    pub slot: Arc<SinkSlot>,
    pub on_status: Option<StatusHandler>,
    pub wake_lock: WakeLock,
    pub visibility: Visibility,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Handle to a running connection manager.
///
/// Cloning the handle is cheap; all clones drive the same manager. The
/// manager stops when [`shutdown`](Self::shutdown) is called or when every
/// handle has been dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("snapshot", &*self.snapshot.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// Spawns the actor on the current runtime.
    pub(crate) fn spawn(parts: ManagerParts) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("ConnectionManager must be built inside a Tokio runtime"))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (losses_tx, losses_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let actor = Actor {
            factory: parts.factory,
            policy: parts.policy,
            slot: parts.slot,
            on_status: parts.on_status,
            snapshot: snapshot_tx,
            signals: signals_tx,
            losses: losses_tx,
            state: ConnectionState::Idle,
            attempts: 0,
            active: None,
            early_loss: None,
            retry_timer: None,
            retry_in: None,
            visibility: parts.visibility,
            wake_lock: parts.wake_lock,
        };

        runtime.spawn(actor.run(commands_rx, signals_rx, losses_rx));

        Ok(Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
        })
    }

    /// Starts a connect cycle.
    ///
    /// Tears down any existing transport, cancels a pending retry and begins
    /// low-latency negotiation. Calling it again while a cycle is running
    /// restarts the cycle; there is never more than one negotiation in
    /// flight.
    ///
    /// # Errors
    ///
    /// [`Error::ManagerClosed`] if the manager has stopped.
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// User-initiated retry: resets the reconnect counter, then connects.
    ///
    /// # Errors
    ///
    /// [`Error::ManagerClosed`] if the manager has stopped.
    pub fn retry(&self) -> Result<()> {
        self.send(Command::Retry)
    }

    /// Reports a page visibility change.
    ///
    /// # Errors
    ///
    /// [`Error::ManagerClosed`] if the manager has stopped.
    pub fn set_visibility(&self, visibility: Visibility) -> Result<()> {
        self.send(Command::Visibility(visibility))
    }

    /// Toggles whether the user wants the screen kept awake.
    ///
    /// # Errors
    ///
    /// [`Error::ManagerClosed`] if the manager has stopped.
    pub fn set_wake_lock(&self, wanted: bool) -> Result<()> {
        self.send(Command::WakeLock(wanted))
    }

    /// Reports that the platform revoked the wake lock.
    ///
    /// # Errors
    ///
    /// [`Error::ManagerClosed`] if the manager has stopped.
    pub fn wake_lock_revoked(&self) -> Result<()> {
        self.send(Command::WakeLockRevoked)
    }

    /// Returns the latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// Returns a receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Stops the manager.
    ///
    /// Tears down the transport, releases the sink and the wake lock, and
    /// transitions to `Idle`. Resolves once the actor has finished.
    ///
    /// # Errors
    ///
    /// [`Error::ManagerClosed`] if the manager had already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| Error::ManagerClosed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ManagerClosed)
    }
}

// ============================================================================
// Actor
// ============================================================================

struct ActiveTransport {
    kind: TransportKind,
    generation: Generation,
    transport: Arc<dyn Transport>,
    task: JoinHandle<()>,
}

struct Actor {
    factory: Arc<dyn TransportFactory>,
    policy: ReconnectPolicy,
    slot: Arc<SinkSlot>,
    on_status: Option<StatusHandler>,
    snapshot: watch::Sender<Snapshot>,
    signals: mpsc::UnboundedSender<Signal>,
    losses: mpsc::UnboundedSender<Loss>,

    state: ConnectionState,
    attempts: u32,
    active: Option<ActiveTransport>,
    /// Loss reported by the negotiating generation before its result arrived.
    early_loss: Option<Generation>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    retry_in: Option<Duration>,
    visibility: Visibility,
    wake_lock: WakeLock,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
        mut losses: mpsc::UnboundedReceiver<Loss>,
    ) {
        debug!("Connection manager started");
        self.publish();

        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                Some(signal) = signals.recv() => Step::Signal(signal),
                Some(loss) = losses.recv() => Step::Loss(loss),
                () = retry_due(&mut self.retry_timer) => Step::RetryDue,
            };

            match step {
                Step::Command(Some(Command::Shutdown(reply))) => {
                    debug!("Shutdown command received");
                    self.stop();
                    let _ = reply.send(());
                    break;
                }

                Step::Command(Some(command)) => self.handle_command(command),

                Step::Command(None) => {
                    debug!("All manager handles dropped");
                    self.stop();
                    break;
                }

                Step::Signal(Signal::Negotiated {
                    generation,
                    kind,
                    result,
                }) => self.on_negotiated(generation, kind, result),

                Step::Signal(Signal::WakeLock { epoch, result }) => {
                    self.wake_lock
                        .on_acquired(epoch, result, self.visibility.is_visible());
                    self.publish();
                }

                Step::Loss(loss) => self.on_loss(loss),

                Step::RetryDue => {
                    self.retry_timer = None;
                    self.retry_in = None;
                    debug!(attempt = self.attempts, "Retry timer fired");
                    self.connect();
                }
            }
        }

        debug!("Connection manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),

            Command::Retry => {
                info!("Manual retry requested");
                self.attempts = 0;
                self.connect();
            }

            Command::Visibility(visibility) => self.on_visibility(visibility),

            Command::WakeLock(wanted) => {
                let request = self
                    .wake_lock
                    .set_wanted(wanted, self.visibility.is_visible());
                self.spawn_acquire(request);
                self.publish();
            }

            Command::WakeLockRevoked => {
                self.wake_lock.on_revoked();
                self.publish();
            }

            // Handled by the loop.
            Command::Shutdown(_) => {}
        }
    }

    // ========================================================================
    // Connect Cycle
    // ========================================================================

    fn connect(&mut self) {
        self.cancel_retry();
        info!(attempt = self.attempts, "Connecting");
        self.start_negotiation(TransportKind::LowLatency);
    }

    fn start_negotiation(&mut self, kind: TransportKind) {
        self.teardown_active();
        self.early_loss = None;

        let sink = self.slot.rebind();
        let generation = sink.generation();

        self.transition(
            ConnectionState::Negotiating(kind),
            Status::new(
                StatusKind::Connecting,
                format!("Connecting via {}...", kind.protocol()),
            ),
        );

        let transport = match self.factory.create(kind) {
            Ok(transport) => transport,
            Err(e) => {
                self.on_attempt_failed(kind, e);
                return;
            }
        };

        let ctx = NegotiationContext {
            sink,
            loss: LossNotifier::new(generation, self.losses.clone()),
        };
        let signals = self.signals.clone();
        let negotiating = Arc::clone(&transport);

        let task = tokio::spawn(async move {
            let result = negotiating.negotiate(ctx).await;
            let _ = signals.send(Signal::Negotiated {
                generation,
                kind,
                result,
            });
        });

        debug!(%generation, %kind, "Negotiation started");
        self.active = Some(ActiveTransport {
            kind,
            generation,
            transport,
            task,
        });
    }

    fn on_negotiated(&mut self, generation: Generation, kind: TransportKind, result: Result<()>) {
        let current = self
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation && active.kind == kind);

        if !current || self.state != ConnectionState::Negotiating(kind) {
            debug!(%generation, %kind, ok = result.is_ok(), "Ignoring stale negotiation result");
            return;
        }

        match result {
            Ok(()) => {
                self.go_live(kind);
                if self.early_loss.take() == Some(generation) {
                    warn!(%generation, "Stream lost while going live");
                    self.enter_disconnected(Cause::Lost);
                }
            }
            Err(e) => self.on_attempt_failed(kind, e),
        }
    }

    fn on_attempt_failed(&mut self, kind: TransportKind, error: Error) {
        match kind {
            TransportKind::LowLatency => {
                warn!(error = %error, "Low-latency negotiation failed, falling back");
                self.start_negotiation(TransportKind::Fallback);
            }
            TransportKind::Fallback => {
                warn!(error = %error, "Fallback negotiation failed");
                let cause = if error.is_unsupported() {
                    Cause::Unsupported
                } else if error.is_helper_load() {
                    Cause::HelperLoad
                } else {
                    Cause::Failed
                };
                self.enter_disconnected(cause);
            }
        }
    }

    fn go_live(&mut self, kind: TransportKind) {
        self.attempts = 0;
        self.cancel_retry();

        info!(%kind, "Stream live");
        self.transition(
            ConnectionState::Live {
                kind,
                started_at: Instant::now(),
            },
            Status::new(StatusKind::Live, format!("Live · {}", kind.protocol())),
        );
    }

    fn on_loss(&mut self, loss: Loss) {
        let current = self.active.as_ref().map(|active| active.generation);
        if current != Some(loss.generation) {
            debug!(generation = %loss.generation, reason = %loss.reason, "Ignoring loss from stale transport");
            return;
        }

        match self.state {
            ConnectionState::Live { .. } => {
                warn!(generation = %loss.generation, reason = %loss.reason, "Stream lost");
                self.enter_disconnected(Cause::Lost);
            }
            ConnectionState::Negotiating(_) => {
                self.early_loss = Some(loss.generation);
            }
            ConnectionState::Idle | ConnectionState::Disconnected => {}
        }
    }

    fn enter_disconnected(&mut self, cause: Cause) {
        self.teardown_active();
        self.slot.release();
        self.cancel_retry();

        if cause == Cause::Unsupported {
            self.transition(
                ConnectionState::Disconnected,
                Status::new(StatusKind::Error, "Playback unsupported on this device"),
            );
            return;
        }

        if !self.visibility.is_visible() {
            debug!(attempt = self.attempts, "Hidden, not scheduling a retry");
            self.transition(
                ConnectionState::Disconnected,
                Status::new(StatusKind::Offline, "Stream offline, paused while hidden"),
            );
            return;
        }

        let delay = self.policy.delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.retry_timer = Some(Box::pin(sleep(delay)));
        self.retry_in = Some(delay);

        info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        let secs = whole_seconds(delay);
        let status = match cause {
            Cause::HelperLoad => Status::new(
                StatusKind::Error,
                format!("Could not load HLS player, retrying in {secs}s"),
            ),
            Cause::Lost => Status::new(
                StatusKind::Offline,
                format!("Stream lost, retrying in {secs}s"),
            ),
            Cause::Failed | Cause::Unsupported => Status::new(
                StatusKind::Offline,
                format!("Stream offline, retrying in {secs}s"),
            ),
        };
        self.transition(ConnectionState::Disconnected, status);
    }

    fn teardown_active(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(generation = %active.generation, kind = %active.kind, "Tearing down transport");
            active.task.abort();
            active.transport.teardown();
        }
    }

    fn cancel_retry(&mut self) {
        if self.retry_timer.take().is_some() {
            debug!("Pending retry cancelled");
        }
        self.retry_in = None;
    }

    fn stop(&mut self) {
        self.cancel_retry();
        self.teardown_active();
        self.slot.release();
        self.wake_lock.shutdown();
        self.attempts = 0;
        self.transition(
            ConnectionState::Idle,
            Status::new(StatusKind::Offline, "Stopped"),
        );
    }

    // ========================================================================
    // Visibility and Wake Lock
    // ========================================================================

    fn on_visibility(&mut self, visibility: Visibility) {
        debug!(?visibility, state = ?self.state, "Visibility changed");
        self.visibility = visibility;

        match visibility {
            Visibility::Hidden => self.wake_lock.on_hidden(),
            Visibility::Visible => {
                let request = self.wake_lock.on_visible();
                self.spawn_acquire(request);
            }
        }

        match VisibilityAction::for_change(visibility, &self.state) {
            VisibilityAction::SuspendRetry => {
                let had_timer = self.retry_timer.is_some();
                self.cancel_retry();
                if had_timer && self.state == ConnectionState::Disconnected {
                    self.emit(&Status::new(
                        StatusKind::Offline,
                        "Stream offline, paused while hidden",
                    ));
                }
                self.publish();
            }
            VisibilityAction::Reconnect => {
                info!("Page visible, reconnecting now");
                self.attempts = 0;
                self.connect();
            }
            VisibilityAction::None => self.publish(),
        }
    }

    fn spawn_acquire(&self, request: Option<AcquireRequest>) {
        let Some(AcquireRequest { epoch, provider }) = request else {
            return;
        };

        let signals = self.signals.clone();
        tokio::spawn(async move {
            let result = provider.acquire().await;
            if let Err(mpsc::error::SendError(Signal::WakeLock {
                result: Ok(sentinel),
                ..
            })) = signals.send(Signal::WakeLock { epoch, result })
            {
                sentinel.release();
            }
        });
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    fn transition(&mut self, state: ConnectionState, status: Status) {
        let previous = std::mem::replace(&mut self.state, state);
        debug!(from = ?previous, to = ?self.state, status = %status, "State transition");

        self.emit(&status);
        self.publish();
    }

    fn emit(&self, status: &Status) {
        if let Some(handler) = &self.on_status {
            handler(status);
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(Snapshot {
            state: self.state,
            reconnect_attempts: self.attempts,
            retry_in: self.retry_in,
            wake_lock_held: self.wake_lock.is_held(),
        });
    }
}

/// Resolves when the pending retry timer fires; never resolves without one.
async fn retry_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Rounds up to whole seconds for display.
fn whole_seconds(delay: Duration) -> u128 {
    delay.as_millis().div_ceil(1000)
}

// ============================================================================
// Tests
// ============================================================================
