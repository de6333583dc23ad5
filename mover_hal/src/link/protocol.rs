//! Controller wire protocol.
//!
//! Line-oriented ASCII. Every command line is answered with `ok` or
//! `error:N`. Status reports arrive asynchronously as
//! `<State|MPos:x,y,z|...>`, alarms as `ALARM:N`, feedback as `[...]`.
//! The welcome banner starts with `Grbl`.

use mover_common::types::Position;
use serde::Serialize;
use std::fmt;

/// Controller run-state carried in status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Run,
    Hold,
    Jog,
    Alarm,
    Door,
    Check,
    Home,
    Sleep,
    #[default]
    Unknown,
}

impl RunState {
    /// Parse the state field of a status report. Sub-states such as
    /// `Hold:0` or `Door:1` map to their parent state.
    pub fn parse(field: &str) -> Self {
        let name = field.split(':').next().unwrap_or_default();
        match name {
            "Idle" => RunState::Idle,
            "Run" => RunState::Run,
            "Hold" => RunState::Hold,
            "Jog" => RunState::Jog,
            "Alarm" => RunState::Alarm,
            "Door" => RunState::Door,
            "Check" => RunState::Check,
            "Home" => RunState::Home,
            "Sleep" => RunState::Sleep,
            _ => RunState::Unknown,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A parsed `<...>` status report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusReport {
    pub run_state: RunState,
    /// Machine position, or work position when only `WPos` is reported.
    pub position: Option<Position>,
    /// Current feed from the `FS:`/`F:` field.
    pub feed: Option<f64>,
}

/// One classified line from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerLine {
    Ok,
    Error(u16),
    Alarm(u8),
    Status(StatusReport),
    /// `[MSG:...]`, `[GC:...]` and other bracketed feedback.
    Feedback(String),
    /// Startup banner, e.g. `Grbl 1.1h ['$' for help]`.
    Welcome(String),
    /// Anything unrecognized. Still counts as traffic.
    Other(String),
}

/// Classify one line. Returns `None` for blank lines.
pub fn parse_line(raw: &str) -> Option<ControllerLine> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }
    if line == "ok" {
        return Some(ControllerLine::Ok);
    }
    if let Some(code) = line.strip_prefix("error:") {
        return Some(match code.trim().parse() {
            Ok(n) => ControllerLine::Error(n),
            Err(_) => ControllerLine::Other(line.to_string()),
        });
    }
    if let Some(code) = line.strip_prefix("ALARM:") {
        return Some(match code.trim().parse() {
            Ok(n) => ControllerLine::Alarm(n),
            Err(_) => ControllerLine::Other(line.to_string()),
        });
    }
    if line.starts_with('<') {
        return Some(match parse_status(line) {
            Some(report) => ControllerLine::Status(report),
            None => ControllerLine::Other(line.to_string()),
        });
    }
    if line.starts_with('[') && line.ends_with(']') {
        return Some(ControllerLine::Feedback(line[1..line.len() - 1].to_string()));
    }
    if line.starts_with("Grbl") {
        return Some(ControllerLine::Welcome(line.to_string()));
    }
    Some(ControllerLine::Other(line.to_string()))
}

/// Parse `<State|MPos:x,y,z|FS:f,s|...>`.
pub fn parse_status(line: &str) -> Option<StatusReport> {
    let body = line.strip_prefix('<')?.strip_suffix('>')?;
    let mut fields = body.split('|');
    let run_state = RunState::parse(fields.next()?);

    let mut mpos = None;
    let mut wpos = None;
    let mut feed = None;
    for field in fields {
        if let Some(v) = field.strip_prefix("MPos:") {
            mpos = parse_xyz(v);
        } else if let Some(v) = field.strip_prefix("WPos:") {
            wpos = parse_xyz(v);
        } else if let Some(v) = field
            .strip_prefix("FS:")
            .or_else(|| field.strip_prefix("F:"))
        {
            feed = v.split(',').next().and_then(|f| f.trim().parse().ok());
        }
    }
    Some(StatusReport {
        run_state,
        position: mpos.or(wpos),
        feed,
    })
}

fn parse_xyz(v: &str) -> Option<Position> {
    let mut it = v.split(',').map(|s| s.trim().parse::<f64>());
    let x = it.next()?.ok()?;
    let y = it.next()?.ok()?;
    let z = it.next()?.ok()?;
    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return None;
    }
    Some(Position::new(x, y, z))
}

/// Rapid move line: `G21 G90 G0 X.. Y.. Z.. F..`. Units and distance
/// mode are restated on every line so earlier modal words cannot change
/// where it goes.
pub fn rapid_command(target: &Position, feed_mm_min: f64) -> String {
    format!(
        "G21 G90 G0 X{:.3} Y{:.3} Z{:.3} F{}",
        target.x,
        target.y,
        target.z,
        feed_mm_min.round() as i64
    )
}

/// Linear move line at a controlled feed: `G21 G90 G1 X.. Y.. Z.. F..`.
pub fn linear_command(target: &Position, feed_mm_min: f64) -> String {
    format!(
        "G21 G90 G1 X{:.3} Y{:.3} Z{:.3} F{}",
        target.x,
        target.y,
        target.z,
        feed_mm_min.round() as i64
    )
}

/// Axis words of one command line, for travel-limit checks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisWords {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl AxisWords {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }

    /// Fill missing axes from `base`.
    pub fn resolve(&self, base: &Position) -> Position {
        Position::new(
            self.x.unwrap_or(base.x),
            self.y.unwrap_or(base.y),
            self.z.unwrap_or(base.z),
        )
    }
}

/// How a command line relates to travel limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandKind {
    /// No axis words; nothing to check.
    NonMotion,
    /// Absolute axis words to validate.
    Motion(AxisWords),
    /// A word whose effect cannot be checked against absolute limits.
    Unverifiable(&'static str),
}

/// Classify a G-code or jog line.
///
/// System commands (`$...`) carry no axis words except jogs (`$J=`).
/// Anything whose travel depends on controller state or leaves the
/// straight line to its endpoint is unverifiable: incremental mode,
/// inch units, offset changes, stored-position moves, machine
/// coordinates, probing and arcs (including any `I`/`J`/`K`/`R` word).
pub fn classify_command(line: &str) -> CommandKind {
    let upper = line.trim().to_ascii_uppercase();
    let body = match upper.strip_prefix("$J=") {
        Some(jog) => jog.to_string(),
        None if upper.starts_with('$') => return CommandKind::NonMotion,
        None => upper,
    };
    let body = strip_comments(&body);

    let mut words = AxisWords::default();
    let mut chars = body.chars().filter(|c| !c.is_whitespace()).peekable();
    while let Some(letter) = chars.next() {
        let mut number = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' || c == '-' || c == '+' {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }
        match letter {
            'G' => {
                if let Some(reason) = unverifiable_g(number.trim_start_matches('0')) {
                    return CommandKind::Unverifiable(reason);
                }
            }
            'I' | 'J' | 'K' | 'R' => return CommandKind::Unverifiable("arc word"),
            'X' | 'Y' | 'Z' => {
                let Ok(v) = number.parse::<f64>() else {
                    return CommandKind::Unverifiable("malformed axis word");
                };
                match letter {
                    'X' => words.x = Some(v),
                    'Y' => words.y = Some(v),
                    _ => words.z = Some(v),
                }
            }
            _ => {}
        }
    }
    if words.is_empty() {
        CommandKind::NonMotion
    } else {
        CommandKind::Motion(words)
    }
}

/// `code` is the G number without leading zeros (`G02` is `"2"`).
fn unverifiable_g(code: &str) -> Option<&'static str> {
    match code {
        "91" => Some("incremental mode (G91)"),
        "20" => Some("inch units (G20)"),
        "92" | "92.1" | "10" | "28.1" | "30.1" => Some("coordinate offset change"),
        "28" | "30" => Some("move to stored position"),
        "53" => Some("machine coordinates (G53)"),
        "2" | "3" => Some("arc motion"),
        c if c == "38" || c.starts_with("38.") => Some("probing cycle"),
        _ => None,
    }
}

fn strip_comments(line: &str) -> String {
    let without_eol = line.split(';').next().unwrap_or_default();
    let mut out = String::with_capacity(without_eol.len());
    let mut depth = 0usize;
    for c in without_eol.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acks_and_alarms() {
        assert_eq!(parse_line("ok\r"), Some(ControllerLine::Ok));
        assert_eq!(parse_line("error:22"), Some(ControllerLine::Error(22)));
        assert_eq!(parse_line("ALARM:1"), Some(ControllerLine::Alarm(1)));
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn feedback_and_banner() {
        assert_eq!(
            parse_line("[MSG:'$H'|'$X' to unlock]"),
            Some(ControllerLine::Feedback("MSG:'$H'|'$X' to unlock".into()))
        );
        assert!(matches!(
            parse_line("Grbl 1.1h ['$' for help]"),
            Some(ControllerLine::Welcome(_))
        ));
    }

    #[test]
    fn status_with_machine_position() {
        let Some(ControllerLine::Status(r)) = parse_line("<Idle|MPos:1.000,2.500,0.000|FS:0,0>")
        else {
            panic!("expected status report");
        };
        assert_eq!(r.run_state, RunState::Idle);
        assert_eq!(r.position, Some(Position::new(1.0, 2.5, 0.0)));
        assert_eq!(r.feed, Some(0.0));
    }

    #[test]
    fn status_with_work_position_and_substate() {
        let r = parse_status("<Hold:0|WPos:-3.2,4,5|F:500>").unwrap();
        assert_eq!(r.run_state, RunState::Hold);
        assert_eq!(r.position, Some(Position::new(-3.2, 4.0, 5.0)));
        assert_eq!(r.feed, Some(500.0));
    }

    #[test]
    fn garbage_is_ignored_not_fatal() {
        assert!(matches!(parse_line("<Idle|MPos:1,2"), Some(ControllerLine::Other(_))));
        assert!(matches!(parse_line("error:abc"), Some(ControllerLine::Other(_))));
        let r = parse_status("<Run|MPos:1,x,3>").unwrap();
        assert_eq!(r.run_state, RunState::Run);
        assert_eq!(r.position, None);
        assert_eq!(RunState::parse("Bogus"), RunState::Unknown);
    }

    #[test]
    fn rapid_command_format() {
        assert_eq!(
            rapid_command(&Position::new(25.0, 75.12345, 0.0), 2000.4),
            "G21 G90 G0 X25.000 Y75.123 Z0.000 F2000"
        );
        assert_eq!(
            linear_command(&Position::new(1.0, 2.0, 3.0), 300.0),
            "G21 G90 G1 X1.000 Y2.000 Z3.000 F300"
        );
    }

    #[test]
    fn framed_lines_classify_as_motion() {
        let line = rapid_command(&Position::new(10.0, 20.0, 0.0), 1000.0);
        assert_eq!(
            classify_command(&line),
            CommandKind::Motion(AxisWords {
                x: Some(10.0),
                y: Some(20.0),
                z: Some(0.0)
            })
        );
    }

    #[test]
    fn classify_motion_words() {
        assert_eq!(
            classify_command("G0 X10 Y-2.5"),
            CommandKind::Motion(AxisWords {
                x: Some(10.0),
                y: Some(-2.5),
                z: None
            })
        );
        assert_eq!(
            classify_command("$J=G21 G90 X5 F500"),
            CommandKind::Motion(AxisWords {
                x: Some(5.0),
                ..AxisWords::default()
            })
        );
        assert_eq!(classify_command("G21"), CommandKind::NonMotion);
        assert_eq!(classify_command("$X"), CommandKind::NonMotion);
        assert_eq!(classify_command("M3 S1"), CommandKind::NonMotion);
        assert_eq!(classify_command("G0 (X999) Y1"), CommandKind::Motion(AxisWords {
            y: Some(1.0),
            ..AxisWords::default()
        }));
    }

    #[test]
    fn classify_refuses_relative_and_offsets() {
        assert!(matches!(classify_command("G91 G0 X1"), CommandKind::Unverifiable(_)));
        assert!(matches!(classify_command("G92 X0"), CommandKind::Unverifiable(_)));
        assert!(matches!(classify_command("G0 X1.2.3"), CommandKind::Unverifiable(_)));
    }

    #[test]
    fn classify_refuses_modal_and_stored_motion() {
        for line in [
            "G20",
            "G20 G0 X400",
            "G28",
            "G28 X0",
            "G30",
            "G53 G0 X400",
            "G2 X10 Y0 I5000 J0",
            "G03 X10 Y10 R5",
            "G38.2 Z-10 F100",
            "G1 X10 K1",
        ] {
            assert!(
                matches!(classify_command(line), CommandKind::Unverifiable(_)),
                "{line} accepted"
            );
        }
        assert_eq!(classify_command("G00 X1"), classify_command("G0 X1"));
        assert_eq!(classify_command("G4 P1"), CommandKind::NonMotion);
    }

    #[test]
    fn axis_words_resolve_against_base() {
        let w = AxisWords {
            x: Some(1.0),
            ..AxisWords::default()
        };
        assert_eq!(
            w.resolve(&Position::new(9.0, 8.0, 7.0)),
            Position::new(1.0, 8.0, 7.0)
        );
    }
}
