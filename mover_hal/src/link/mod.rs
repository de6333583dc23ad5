//! Serial link to the motion controller.
//!
//! [`Link`] frames text commands, gates every motion command through the
//! [`SafetyGate`], and exposes the controller state as immutable
//! snapshots. Two background tasks run per connection:
//!
//! - **reader** - splits the byte stream into lines, classifies them and
//!   hands them to the supervisor over a channel
//! - **supervisor** - sole owner of [`ConnectionState`]; updates the
//!   snapshot, fires position callbacks, probes a silent controller and
//!   reconnects with bounded backoff
//!
//! Public operations never return errors: commands answer `true` when the
//! bytes were handed to the transport and `false` when they were refused or
//! the write failed. `true` means accepted for transmission, not that the
//! motion finished.

pub mod protocol;
pub mod sim;
pub mod state;
pub mod transport;

mod supervisor;

use crate::safety::SafetyGate;
use mover_common::consts::{
    CMD_ABSOLUTE, CMD_HOME, CMD_MM_UNITS, CMD_UNLOCK, CYCLE_START_BYTE, ESTOP_BYTE,
    SOFT_RESET_BYTE, STATUS_PROBE_BYTE,
};
use mover_common::hal::config::LinkConfig;
use mover_common::types::Position;
use parking_lot::Mutex;
use protocol::{CommandKind, RunState};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use supervisor::{Control, Supervisor};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use protocol::StatusReport;
pub use state::ConnectionState;
pub use transport::{BoxReader, BoxWriter, Connector, SerialConnector};

/// Internal link failures. Logged, never returned from public operations.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    #[error("Link not connected")]
    NotConnected,

    #[error("Emergency stop latched")]
    EmergencyStop,
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Io(e.to_string())
    }
}

/// Command acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ack {
    Ok,
    Error(u16),
}

/// Push notifications from the link.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LinkEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Position(Position),
    Ack(Ack),
    Alarm(u8),
    EmergencyStop {
        latched: bool,
    },
    Feedback(String),
}

/// Immutable view of the link.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkSnapshot {
    pub state: ConnectionState,
    pub run_state: RunState,
    pub position: Option<Position>,
    /// Status reports received since connect.
    pub status_reports: u64,
    pub acks: u64,
    pub errors: u64,
    pub last_alarm: Option<u8>,
    pub emergency_stop: bool,
}

pub type PositionCallback = Box<dyn Fn(Position) + Send + Sync>;

/// State shared between the public handle and the background tasks.
pub(crate) struct Shared {
    config: LinkConfig,
    gate: SafetyGate,
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    estop: AtomicBool,
    snapshot: watch::Sender<LinkSnapshot>,
    events: broadcast::Sender<LinkEvent>,
    callbacks: Mutex<Vec<PositionCallback>>,
}

impl Shared {
    /// Write raw bytes, bypassing the e-stop latch.
    async fn write_raw(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut guard = self.writer.lock().await;
        let w = guard.as_mut().ok_or(LinkError::NotConnected)?;
        w.write_all(bytes).await?;
        w.flush().await?;
        Ok(())
    }

    /// Write one command line. The latch is re-checked under the writer
    /// lock so nothing follows an e-stop byte onto the wire.
    async fn write_line(&self, line: &str) -> Result<(), LinkError> {
        let mut guard = self.writer.lock().await;
        if self.estop.load(Ordering::Acquire) {
            return Err(LinkError::EmergencyStop);
        }
        let w = guard.as_mut().ok_or(LinkError::NotConnected)?;
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        w.write_all(&framed).await?;
        w.flush().await?;
        Ok(())
    }

    fn publish(&self, event: LinkEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn notify_position(&self, pos: Position) {
        let callbacks = self.callbacks.lock();
        for cb in callbacks.iter() {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(pos))).is_err() {
                warn!("Position callback panicked");
            }
        }
    }
}

struct SupervisorHandle {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

/// Handle to the motion-controller link.
pub struct Link<C: Connector> {
    connector: Arc<C>,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<SupervisorHandle>>,
}

impl<C: Connector> Link<C> {
    pub fn new(connector: C, config: LinkConfig, gate: SafetyGate) -> Self {
        let (snapshot, _) = watch::channel(LinkSnapshot::default());
        let (events, _) = broadcast::channel(256);
        Self {
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                config,
                gate,
                writer: tokio::sync::Mutex::new(None),
                estop: AtomicBool::new(false),
                snapshot,
                events,
                callbacks: Mutex::new(Vec::new()),
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.shared.gate
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    // ─── Connection ─────────────────────────────────────────────────

    /// Open `port` and start the reader and supervisor tasks.
    ///
    /// Any existing connection is closed first. Returns whether the first
    /// open succeeded; with `auto_reconnect` a failed first open is retried
    /// in the background.
    pub async fn connect(&self, port: &str, baud: u32, auto_reconnect: bool) -> bool {
        self.disconnect().await;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let supervisor = Supervisor::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            port.to_string(),
            baud,
            auto_reconnect,
            control_rx,
        );
        info!(port, baud, auto_reconnect, "Connecting to motion controller");
        let task = tokio::spawn(supervisor.run(ready_tx));
        *self.supervisor.lock() = Some(SupervisorHandle {
            control: control_tx,
            task,
        });
        ready_rx.await.unwrap_or(false)
    }

    /// [`connect`](Self::connect) with the configured port and baud.
    pub async fn connect_configured(&self) -> bool {
        let cfg = &self.shared.config;
        self.connect(&cfg.port.clone(), cfg.baud, cfg.auto_reconnect)
            .await
    }

    /// Close the port and stop the background tasks.
    pub async fn disconnect(&self) {
        let handle = self.supervisor.lock().take();
        let Some(handle) = handle else { return };
        let (tx, rx) = oneshot::channel();
        if handle.control.send(Control::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
        let _ = handle.task.await;
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Send one command line.
    ///
    /// Refused, with nothing written, while the e-stop is latched, when the
    /// link is not Connected, or when the line names an axis target outside
    /// the travel limits.
    pub async fn send(&self, cmd: &str) -> bool {
        if !self.admit(cmd, false) {
            return false;
        }
        self.transmit(cmd.trim()).await
    }

    /// Rapid move to `target`. The feed rate is clamped, never rejected.
    pub async fn rapid_to(&self, target: Position, feed_mm_min: f64) -> bool {
        match self.checked_feed(&target, feed_mm_min) {
            Some(feed) => self.send(&protocol::rapid_command(&target, feed)).await,
            None => false,
        }
    }

    /// Feed-controlled linear move to `target` (`G1`). Same clamping and
    /// gating as [`Link::rapid_to`].
    pub async fn linear_to(&self, target: Position, feed_mm_min: f64) -> bool {
        match self.checked_feed(&target, feed_mm_min) {
            Some(feed) => self.send(&protocol::linear_command(&target, feed)).await,
            None => false,
        }
    }

    /// Run the homing cycle (`$H`). Accepted in Alarm as recovery.
    pub async fn home(&self) -> bool {
        self.recover_with(CMD_HOME).await
    }

    /// Clear the alarm lock (`$X`). Accepted in Alarm as recovery.
    pub async fn unlock(&self) -> bool {
        self.recover_with(CMD_UNLOCK).await
    }

    /// Millimetre units and absolute positioning.
    pub async fn set_mm_absolute(&self) -> bool {
        self.send(CMD_MM_UNITS).await && self.send(CMD_ABSOLUTE).await
    }

    /// Ask for a status report. Not subject to the e-stop latch.
    pub async fn request_status(&self) -> bool {
        match self.shared.write_raw(&[STATUS_PROBE_BYTE]).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Status request not sent");
                false
            }
        }
    }

    /// Request a status report and wait for it.
    ///
    /// Returns the reported position, or `None` on timeout or when no
    /// report carries one.
    pub async fn wait_for_position(&self, timeout: Duration) -> Option<Position> {
        let mut rx = self.shared.snapshot.subscribe();
        let seen = rx.borrow_and_update().status_reports;
        if !self.request_status().await {
            return None;
        }
        let fresh = async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let snap = rx.borrow_and_update();
                if snap.status_reports > seen {
                    return snap.position;
                }
            }
        };
        tokio::time::timeout(timeout, fresh).await.ok().flatten()
    }

    // ─── Emergency stop ─────────────────────────────────────────────

    /// Send the out-of-band stop byte and latch all further commands.
    pub async fn emergency_stop(&self) {
        self.shared.estop.store(true, Ordering::Release);
        error!("EMERGENCY STOP");
        if let Err(e) = self.shared.write_raw(&[ESTOP_BYTE]).await {
            warn!(error = %e, "Stop byte not delivered; latch set");
        }
        self.shared
            .publish(LinkEvent::EmergencyStop { latched: true });

        let (tx, rx) = oneshot::channel();
        if self.control(Control::EmergencyStop(tx)) {
            let _ = rx.await;
        }
    }

    /// Clear the latch. Held motion is discarded with a soft reset rather
    /// than resumed; the link stays in Alarm until `unlock` or `home`.
    pub async fn reset_emergency_stop(&self) {
        if !self.shared.estop.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.shared.write_raw(&[SOFT_RESET_BYTE]).await {
            debug!(error = %e, "Soft reset not delivered");
        }
        info!("Emergency stop released");
        self.shared
            .publish(LinkEvent::EmergencyStop { latched: false });
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.shared.estop.load(Ordering::Acquire)
    }

    // ─── Observation ────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.shared.snapshot.borrow().state
    }

    pub fn position(&self) -> Option<Position> {
        self.shared.snapshot.borrow().position
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        let mut snap = self.shared.snapshot.borrow().clone();
        snap.emergency_stop = self.is_emergency_stopped();
        snap
    }

    /// Snapshot updates as a watch channel.
    pub fn watch(&self) -> watch::Receiver<LinkSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Called from the supervisor task on every reported position.
    pub fn register_position_callback<F>(&self, callback: F)
    where
        F: Fn(Position) + Send + Sync + 'static,
    {
        self.shared.callbacks.lock().push(Box::new(callback));
    }

    // ─── Internals ──────────────────────────────────────────────────

    fn checked_feed(&self, target: &Position, feed_mm_min: f64) -> Option<f64> {
        let (feed, clamped) = self.shared.config.feed.clamp(feed_mm_min);
        if clamped {
            warn!(requested = feed_mm_min, applied = feed, "Feed rate clamped");
        }
        if let Err(v) = self.shared.gate.validate(target) {
            warn!(%target, violation = %v, "Motion refused by safety gate");
            return None;
        }
        Some(feed)
    }

    /// Pre-transmission checks. Nothing is written when this returns false.
    fn admit(&self, cmd: &str, recovery: bool) -> bool {
        if self.is_emergency_stopped() {
            warn!(cmd, "Emergency stop latched; command blocked");
            return false;
        }
        let state = self.state();
        let ready = match state {
            ConnectionState::Connected => true,
            ConnectionState::Alarm => recovery,
            _ => false,
        };
        if !ready {
            warn!(cmd, %state, "Link not ready; command refused");
            return false;
        }

        let line = cmd.trim();
        if line.is_empty() || line.contains(['\n', '\r']) {
            warn!(cmd, "Command must be exactly one line");
            return false;
        }
        let realtime = [ESTOP_BYTE, STATUS_PROBE_BYTE, CYCLE_START_BYTE, SOFT_RESET_BYTE];
        if line.bytes().any(|b| realtime.contains(&b)) {
            warn!(cmd, "Command contains a real-time control byte");
            return false;
        }

        match protocol::classify_command(line) {
            CommandKind::NonMotion => true,
            CommandKind::Motion(words) => {
                match self.shared.gate.validate_axes([words.x, words.y, words.z]) {
                    Ok(()) => true,
                    Err(v) => {
                        warn!(cmd, violation = %v, "Motion refused by safety gate");
                        false
                    }
                }
            }
            CommandKind::Unverifiable(why) => {
                warn!(cmd, why, "Command refused; target cannot be checked against travel limits");
                false
            }
        }
    }

    async fn transmit(&self, line: &str) -> bool {
        match self.shared.write_line(line).await {
            Ok(()) => {
                debug!(cmd = line, ">>");
                true
            }
            Err(LinkError::EmergencyStop) => {
                warn!(cmd = line, "Emergency stop latched; command blocked");
                false
            }
            Err(LinkError::NotConnected) => {
                warn!(cmd = line, "Link not connected; command refused");
                false
            }
            Err(e) => {
                warn!(cmd = line, error = %e, "Write failed");
                self.control(Control::WriteFailed(e.to_string()));
                false
            }
        }
    }

    /// `$X` / `$H`: plain commands when Connected, recovery when in Alarm.
    async fn recover_with(&self, cmd: &str) -> bool {
        if !self.admit(cmd, true) {
            return false;
        }
        let recovering = self.state() == ConnectionState::Alarm;
        if recovering && !self.enter_recovery(cmd).await {
            return false;
        }
        self.finish_recovery(cmd, recovering).await
    }

    /// Alarm → Connecting before the bytes go out, so the acknowledgement
    /// cannot overtake the transition.
    async fn enter_recovery(&self, cmd: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        if !self.control(Control::Recover(tx)) || !rx.await.unwrap_or(false) {
            warn!(cmd, "Recovery not accepted");
            return false;
        }
        info!(cmd, "Recovering from alarm");
        true
    }

    async fn finish_recovery(&self, cmd: &str, recovering: bool) -> bool {
        if self.transmit(cmd).await {
            return true;
        }
        if recovering {
            warn!(cmd, "Recovery command not sent; back to alarm");
            self.control(Control::RecoverAborted);
        }
        false
    }

    fn control(&self, msg: Control) -> bool {
        match self.supervisor.lock().as_ref() {
            Some(h) => h.control.send(msg).is_ok(),
            None => false,
        }
    }
}

impl<C: Connector> Drop for Link<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.task.abort();
        }
    }
}
