//! Reader and supervisor tasks.
//!
//! The reader owns the read half and only classifies lines. The supervisor
//! owns the connection state machine, the liveness timers and the
//! reconnect loop; everything it learns is published through the shared
//! snapshot and event channels.

use super::protocol::{self, CommandKind, ControllerLine, RunState};
use super::state::{ConnectionEvent, ConnectionState, ConnectionStateMachine, TransitionResult};
use super::transport::{BoxReader, Connector};
use super::{Ack, LinkEvent, Shared};
use mover_common::consts::{CMD_KEEP_ALIVE_OFF, MAX_LINE_LEN, STATUS_PROBE_BYTE};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Requests from the public handle.
pub(super) enum Control {
    EmergencyStop(oneshot::Sender<()>),
    /// Alarm → Connecting ahead of `$X` / `$H`. Replies whether it moved.
    Recover(oneshot::Sender<bool>),
    /// The recovery line never reached the controller.
    RecoverAborted,
    WriteFailed(String),
    Disconnect(oneshot::Sender<()>),
}

enum ReaderEvent {
    Line(ControllerLine),
    Closed(Option<String>),
}

// ─── Reader ─────────────────────────────────────────────────────────

async fn read_lines(reader: BoxReader, tx: mpsc::Sender<ReaderEvent>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(MAX_LINE_LEN);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                let _ = tx.send(ReaderEvent::Closed(None)).await;
                return;
            }
            Ok(_) => {
                if buf.len() > MAX_LINE_LEN {
                    debug!(len = buf.len(), "Overlong line dropped");
                    continue;
                }
                let text = String::from_utf8_lossy(&buf);
                let Some(line) = protocol::parse_line(&text) else {
                    continue;
                };
                if tx.send(ReaderEvent::Line(line)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(ReaderEvent::Closed(Some(e.to_string()))).await;
                return;
            }
        }
    }
}

/// One open connection: the reader task and its event stream.
struct Session {
    events: mpsc::Receiver<ReaderEvent>,
    reader: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn next_reader_event(session: &mut Option<Session>) -> Option<ReaderEvent> {
    match session {
        Some(s) => s.events.recv().await,
        None => std::future::pending().await,
    }
}

// ─── Supervisor ─────────────────────────────────────────────────────

pub(super) struct Supervisor<C: Connector> {
    shared: Arc<Shared>,
    connector: Arc<C>,
    port: String,
    baud: u32,
    auto_reconnect: bool,
    control: mpsc::UnboundedReceiver<Control>,
    sm: ConnectionStateMachine,
    session: Option<Session>,
    last_rx: Instant,
    probe_sent: Option<Instant>,
    last_keep_alive: Instant,
    /// Set while waiting for the acknowledgement of `$X` / `$H`.
    recovering: bool,
}

impl<C: Connector> Supervisor<C> {
    pub(super) fn new(
        shared: Arc<Shared>,
        connector: Arc<C>,
        port: String,
        baud: u32,
        auto_reconnect: bool,
        control: mpsc::UnboundedReceiver<Control>,
    ) -> Self {
        let now = Instant::now();
        Self {
            shared,
            connector,
            port,
            baud,
            auto_reconnect,
            control,
            sm: ConnectionStateMachine::new(),
            session: None,
            last_rx: now,
            probe_sent: None,
            last_keep_alive: now,
            recovering: false,
        }
    }

    pub(super) async fn run(mut self, ready: oneshot::Sender<bool>) {
        self.shared.snapshot.send_modify(|s| {
            *s = super::LinkSnapshot::default();
        });

        let opened = self.open_session().await;
        let _ = ready.send(opened);
        if !opened && !(self.auto_reconnect && self.reconnect().await) {
            return;
        }

        let mut tick = tokio::time::interval(self.shared.config.health_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = next_reader_event(&mut self.session) => {
                    let keep_going = match event {
                        Some(ReaderEvent::Line(line)) => {
                            self.on_line(line);
                            true
                        }
                        Some(ReaderEvent::Closed(reason)) => {
                            self.link_failed(reason.as_deref().unwrap_or("stream closed")).await
                        }
                        None => self.link_failed("reader stopped").await,
                    };
                    if !keep_going {
                        return;
                    }
                }
                msg = self.control.recv() => {
                    if !self.on_control(msg).await {
                        return;
                    }
                }
                _ = tick.tick() => {
                    if !self.on_tick().await {
                        return;
                    }
                }
            }
        }
    }

    // ─── State ──────────────────────────────────────────────────────

    fn apply(&mut self, event: ConnectionEvent) {
        let from = self.sm.state();
        match self.sm.handle_event(event) {
            TransitionResult::Ok(to) if to != from => {
                info!(%from, %to, ?event, "Link state changed");
                self.shared.snapshot.send_modify(|s| s.state = to);
                self.shared.publish(LinkEvent::StateChanged { from, to });
            }
            TransitionResult::Ok(_) => {}
            TransitionResult::Rejected(reason) => {
                debug!(state = %from, ?event, reason, "Transition ignored");
            }
        }
    }

    fn is_watching_liveness(&self) -> bool {
        match self.sm.state() {
            ConnectionState::Connected => true,
            ConnectionState::Connecting => self.recovering,
            _ => false,
        }
    }

    // ─── Sessions ───────────────────────────────────────────────────

    async fn open_session(&mut self) -> bool {
        self.apply(ConnectionEvent::Open);
        match self.connector.open(&self.port, self.baud).await {
            Ok((reader, writer)) => {
                *self.shared.writer.lock().await = Some(writer);
                let (tx, rx) = mpsc::channel(64);
                let reader = tokio::spawn(read_lines(reader, tx));
                self.session = Some(Session { events: rx, reader });

                let now = Instant::now();
                self.last_rx = now;
                self.last_keep_alive = now;
                self.probe_sent = None;
                self.recovering = false;

                info!(port = %self.port, baud = self.baud, "Link open");
                self.apply(ConnectionEvent::Opened);
                true
            }
            Err(e) => {
                warn!(port = %self.port, error = %e, "Open failed");
                self.apply(ConnectionEvent::OpenFailed);
                false
            }
        }
    }

    async fn drop_session(&mut self) {
        self.session = None;
        if let Some(mut w) = self.shared.writer.lock().await.take() {
            let _ = w.shutdown().await;
        }
        self.probe_sent = None;
        self.recovering = false;
    }

    /// Tear down after an I/O failure and reconnect if enabled.
    /// Returns whether the supervisor keeps running.
    async fn link_failed(&mut self, reason: &str) -> bool {
        warn!(reason, "Link failure");
        self.drop_session().await;
        self.apply(ConnectionEvent::IoFailure);
        if self.sm.state() == ConnectionState::Error && self.auto_reconnect {
            return self.reconnect().await;
        }
        false
    }

    /// Bounded exponential backoff. Stays responsive to control requests
    /// while waiting.
    async fn reconnect(&mut self) -> bool {
        let attempts = self.shared.config.reconnect_attempts;
        for attempt in 0..attempts {
            let delay = self.shared.config.reconnect_delay(attempt);
            info!(
                attempt = attempt + 1,
                of = attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    msg = self.control.recv() => {
                        if !self.on_control_while_down(msg).await {
                            return false;
                        }
                    }
                }
            }
            if self.open_session().await {
                info!(attempt = attempt + 1, "Reconnected");
                return true;
            }
        }
        warn!(attempts, "Reconnect budget exhausted");
        self.apply(ConnectionEvent::GiveUp);
        false
    }

    async fn close(&mut self) {
        if self.shared.config.keep_alive && self.session.is_some() {
            let line = format!("{CMD_KEEP_ALIVE_OFF}\n");
            if let Err(e) = self.shared.write_raw(line.as_bytes()).await {
                debug!(error = %e, "Keep-alive off not sent");
            }
        }
        self.drop_session().await;
        self.apply(ConnectionEvent::Close);
        self.shared.snapshot.send_modify(|s| {
            s.position = None;
            s.run_state = RunState::Unknown;
        });
        info!(port = %self.port, "Link closed");
    }

    // ─── Inputs ─────────────────────────────────────────────────────

    fn on_line(&mut self, line: ControllerLine) {
        self.last_rx = Instant::now();
        self.probe_sent = None;

        match line {
            ControllerLine::Ok => {
                self.shared.snapshot.send_modify(|s| s.acks += 1);
                self.shared.publish(LinkEvent::Ack(Ack::Ok));
                if self.recovering && self.sm.state() == ConnectionState::Connecting {
                    self.recovering = false;
                    self.apply(ConnectionEvent::RecoveryAcked);
                }
            }
            ControllerLine::Error(code) => {
                warn!(code, "Controller rejected command");
                self.shared.snapshot.send_modify(|s| s.errors += 1);
                self.shared.publish(LinkEvent::Ack(Ack::Error(code)));
                if self.recovering && self.sm.state() == ConnectionState::Connecting {
                    self.recovering = false;
                    self.apply(ConnectionEvent::AlarmRaised);
                }
            }
            ControllerLine::Alarm(code) => {
                warn!(code, "Controller alarm");
                self.recovering = false;
                self.shared
                    .snapshot
                    .send_modify(|s| s.last_alarm = Some(code));
                self.shared.publish(LinkEvent::Alarm(code));
                self.apply(ConnectionEvent::AlarmRaised);
            }
            ControllerLine::Status(report) => {
                self.shared.snapshot.send_modify(|s| {
                    s.run_state = report.run_state;
                    s.status_reports += 1;
                    if report.position.is_some() {
                        s.position = report.position;
                    }
                });
                if let Some(pos) = report.position {
                    self.shared.notify_position(pos);
                    self.shared.publish(LinkEvent::Position(pos));
                }
                if report.run_state == RunState::Alarm
                    && self.sm.state() == ConnectionState::Connected
                {
                    warn!("Controller reports Alarm state");
                    self.apply(ConnectionEvent::AlarmRaised);
                }
            }
            ControllerLine::Feedback(msg) => {
                debug!(msg, "Controller feedback");
                self.shared.publish(LinkEvent::Feedback(msg));
            }
            ControllerLine::Welcome(banner) => {
                info!(banner, "Controller banner");
            }
            ControllerLine::Other(text) => {
                debug!(text, "Unrecognized controller line");
            }
        }
    }

    async fn on_control(&mut self, msg: Option<Control>) -> bool {
        match msg {
            Some(Control::EmergencyStop(done)) => {
                self.recovering = false;
                self.apply(ConnectionEvent::AlarmRaised);
                let _ = done.send(());
                true
            }
            Some(Control::Recover(done)) => {
                let moved = self.sm.state() == ConnectionState::Alarm;
                if moved {
                    self.apply(ConnectionEvent::RecoveryRequested);
                    self.recovering = true;
                    self.last_rx = Instant::now();
                    self.probe_sent = None;
                }
                let _ = done.send(moved);
                true
            }
            Some(Control::RecoverAborted) => {
                if self.recovering && self.sm.state() == ConnectionState::Connecting {
                    self.recovering = false;
                    self.apply(ConnectionEvent::AlarmRaised);
                }
                true
            }
            Some(Control::WriteFailed(reason)) => {
                if self.session.is_some() {
                    self.link_failed(&reason).await
                } else {
                    true
                }
            }
            Some(Control::Disconnect(done)) => {
                self.close().await;
                let _ = done.send(());
                false
            }
            // Handle dropped.
            None => {
                self.close().await;
                false
            }
        }
    }

    /// Control handling while no session is open.
    async fn on_control_while_down(&mut self, msg: Option<Control>) -> bool {
        match msg {
            Some(Control::EmergencyStop(done)) => {
                let _ = done.send(());
                true
            }
            Some(Control::Recover(done)) => {
                let _ = done.send(false);
                true
            }
            Some(Control::WriteFailed(_)) | Some(Control::RecoverAborted) => true,
            Some(Control::Disconnect(done)) => {
                self.close().await;
                let _ = done.send(());
                false
            }
            None => {
                self.close().await;
                false
            }
        }
    }

    async fn on_tick(&mut self) -> bool {
        if !self.is_watching_liveness() {
            return true;
        }
        let now = Instant::now();
        let shared = Arc::clone(&self.shared);
        let cfg = &shared.config;

        match self.probe_sent {
            Some(sent) if now.duration_since(sent) >= cfg.probe_timeout() => {
                warn!(
                    silent_ms = now.duration_since(self.last_rx).as_millis() as u64,
                    "Controller silent after status probe"
                );
                return self.link_failed("liveness lost").await;
            }
            Some(_) => {}
            None if now.duration_since(self.last_rx) >= cfg.liveness_threshold() => {
                warn!(
                    silent_ms = now.duration_since(self.last_rx).as_millis() as u64,
                    "No traffic from controller; probing"
                );
                if let Err(e) = shared.write_raw(&[STATUS_PROBE_BYTE]).await {
                    return self.link_failed(&e.to_string()).await;
                }
                self.probe_sent = Some(now);
            }
            None => {}
        }

        let keep_alive_due = cfg.keep_alive
            && self.sm.state() == ConnectionState::Connected
            && now.duration_since(self.last_keep_alive) >= cfg.keep_alive_interval();
        if keep_alive_due {
            let cmd = cfg.keep_alive_cmd.trim();
            if protocol::classify_command(cmd) == CommandKind::NonMotion {
                match shared.write_line(cmd).await {
                    Ok(()) => debug!(cmd, "Keep-alive sent"),
                    Err(e) => debug!(error = %e, "Keep-alive skipped"),
                }
            } else {
                warn!(cmd, "Keep-alive command moves the machine; not sent");
            }
            self.last_keep_alive = now;
        }
        true
    }
}
