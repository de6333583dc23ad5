//! In-process controller simulator.
//!
//! [`SimConnector`] hands the link one end of an in-memory pipe and runs a
//! small controller on the other: it answers lines with `ok`, status probes
//! with a report, honours feed hold / resume / soft reset, and moves
//! instantly to every rapid or jog target. Clones share one controller, so a
//! test keeps a clone to inject faults after moving the original into a
//! [`Link`](super::Link).

use super::protocol::{self, CommandKind};
use super::transport::{BoxReader, BoxWriter, Connector};
use super::LinkError;
use mover_common::consts::{
    CMD_HOME, CMD_UNLOCK, CYCLE_START_BYTE, ESTOP_BYTE, SOFT_RESET_BYTE, STATUS_PROBE_BYTE,
};
use mover_common::types::Position;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tracing::debug;

pub const SIM_BANNER: &str = "Grbl 1.1h ['$' for help]";

/// Out-of-band pushes into the live connection.
enum SimPush {
    Line(String),
    Hangup,
}

struct Connection {
    push: mpsc::UnboundedSender<SimPush>,
    silent: Arc<AtomicBool>,
}

#[derive(Default)]
struct SimState {
    position: Position,
    hold: bool,
    alarm: Option<u8>,
    opens: u32,
    fail_opens: u32,
    lines: Vec<String>,
    realtime: Vec<u8>,
    current: Option<Connection>,
}

/// Fake controller connector. See the module docs.
#[derive(Clone, Default)]
pub struct SimConnector {
    state: Arc<Mutex<SimState>>,
}

impl SimConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `position` instead of the origin.
    pub fn with_position(position: Position) -> Self {
        let sim = Self::default();
        sim.state.lock().position = position;
        sim
    }

    /// Current simulated machine position.
    pub fn position(&self) -> Position {
        self.state.lock().position
    }

    /// Number of successful opens.
    pub fn opens(&self) -> u32 {
        self.state.lock().opens
    }

    /// Every command line received, across connections.
    pub fn lines(&self) -> Vec<String> {
        self.state.lock().lines.clone()
    }

    /// Every real-time byte received, across connections.
    pub fn realtime_bytes(&self) -> Vec<u8> {
        self.state.lock().realtime.clone()
    }

    pub fn clear_log(&self) {
        let mut st = self.state.lock();
        st.lines.clear();
        st.realtime.clear();
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().hold
    }

    /// Make the next `n` open attempts fail.
    pub fn fail_next_opens(&self, n: u32) {
        self.state.lock().fail_opens = n;
    }

    /// Stop answering on the current connection. Later connections answer
    /// normally.
    pub fn go_silent(&self) {
        if let Some(conn) = &self.state.lock().current {
            conn.silent.store(true, Ordering::Release);
        }
    }

    /// Enter the alarm state and report `ALARM:code`.
    pub fn raise_alarm(&self, code: u8) {
        let mut st = self.state.lock();
        st.alarm = Some(code);
        if let Some(conn) = &st.current {
            let _ = conn.push.send(SimPush::Line(format!("ALARM:{code}")));
        }
    }

    /// Push an arbitrary line to the host.
    pub fn push_line(&self, line: &str) {
        if let Some(conn) = &self.state.lock().current {
            let _ = conn.push.send(SimPush::Line(line.to_string()));
        }
    }

    /// Drop the current connection from the controller side.
    pub fn hangup(&self) {
        if let Some(conn) = self.state.lock().current.take() {
            let _ = conn.push.send(SimPush::Hangup);
        }
    }
}

impl Connector for SimConnector {
    async fn open(&self, port: &str, baud: u32) -> Result<(BoxReader, BoxWriter), LinkError> {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let silent = Arc::new(AtomicBool::new(false));
        {
            let mut st = self.state.lock();
            if st.fail_opens > 0 {
                st.fail_opens -= 1;
                return Err(LinkError::Io(format!("{port}: simulated open failure")));
            }
            st.opens += 1;
            // Replacing the sender ends any previous connection task.
            st.current = Some(Connection {
                push: push_tx,
                silent: Arc::clone(&silent),
            });
        }
        debug!(port, baud, "Simulated controller attached");

        let (host, device) = tokio::io::duplex(4096);
        tokio::spawn(serve(device, Arc::clone(&self.state), push_rx, silent));
        let (reader, writer) = tokio::io::split(host);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

// ─── Controller task ────────────────────────────────────────────────

async fn serve(
    stream: DuplexStream,
    state: Arc<Mutex<SimState>>,
    mut push: mpsc::UnboundedReceiver<SimPush>,
    silent: Arc<AtomicBool>,
) {
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut line = Vec::new();
    let mut buf = [0u8; 256];

    if !emit(&mut wr, &silent, &[SIM_BANNER.to_string()]).await {
        return;
    }
    loop {
        tokio::select! {
            read = rd.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                let replies = {
                    let mut st = state.lock();
                    buf[..n]
                        .iter()
                        .flat_map(|&b| st.on_byte(b, &mut line))
                        .collect::<Vec<_>>()
                };
                if !emit(&mut wr, &silent, &replies).await {
                    return;
                }
            }
            msg = push.recv() => match msg {
                Some(SimPush::Line(l)) => {
                    if !emit(&mut wr, &silent, &[l]).await {
                        return;
                    }
                }
                Some(SimPush::Hangup) | None => return,
            }
        }
    }
}

async fn emit<W: AsyncWrite + Unpin>(wr: &mut W, silent: &AtomicBool, lines: &[String]) -> bool {
    if silent.load(Ordering::Acquire) || lines.is_empty() {
        return true;
    }
    let mut out = String::new();
    for l in lines {
        out.push_str(l);
        out.push_str("\r\n");
    }
    wr.write_all(out.as_bytes()).await.is_ok() && wr.flush().await.is_ok()
}

impl SimState {
    fn on_byte(&mut self, b: u8, line: &mut Vec<u8>) -> Vec<String> {
        match b {
            STATUS_PROBE_BYTE => {
                self.realtime.push(b);
                vec![self.status()]
            }
            ESTOP_BYTE => {
                self.realtime.push(b);
                self.hold = true;
                Vec::new()
            }
            CYCLE_START_BYTE => {
                self.realtime.push(b);
                self.hold = false;
                Vec::new()
            }
            SOFT_RESET_BYTE => {
                self.realtime.push(b);
                self.hold = false;
                line.clear();
                vec![SIM_BANNER.to_string()]
            }
            b'\r' => Vec::new(),
            b'\n' => {
                let text = String::from_utf8_lossy(line).trim().to_string();
                line.clear();
                if text.is_empty() {
                    Vec::new()
                } else {
                    self.on_line(text)
                }
            }
            other => {
                line.push(other);
                Vec::new()
            }
        }
    }

    fn on_line(&mut self, text: String) -> Vec<String> {
        let upper = text.to_ascii_uppercase();
        self.lines.push(text);

        if upper == CMD_UNLOCK {
            self.alarm = None;
            return vec!["[MSG:Caution: Unlocked]".to_string(), "ok".to_string()];
        }
        if upper == CMD_HOME {
            self.alarm = None;
            self.position = Position::default();
            return vec!["ok".to_string()];
        }
        if self.alarm.is_some() && !upper.starts_with('$') {
            return vec!["error:9".to_string()];
        }
        match protocol::classify_command(&upper) {
            CommandKind::Motion(words) => {
                self.position = words.resolve(&self.position);
                vec!["ok".to_string()]
            }
            CommandKind::Unverifiable(_) => vec!["error:20".to_string()],
            CommandKind::NonMotion => vec!["ok".to_string()],
        }
    }

    fn status(&self) -> String {
        let state = if self.alarm.is_some() {
            "Alarm"
        } else if self.hold {
            "Hold:0"
        } else {
            "Idle"
        };
        let p = self.position;
        format!("<{state}|MPos:{:.3},{:.3},{:.3}|FS:0,0>", p.x, p.y, p.z)
    }
}
