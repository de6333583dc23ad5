//! # Mover CLI
//!
//! Drive the chess mover from the command line: link status, homing,
//! alarm recovery, single moves and the storage map.
//!
//! # Usage
//!
//! ```bash
//! # Link and joint status against the in-process controller
//! mover --config config/machine.toml --simulate status
//!
//! # Home the machine on a real port
//! mover --config config/machine.toml --port /dev/ttyACM0 home
//!
//! # Capture on d8, storage preloaded with a white queen
//! mover -c config/machine.toml -s move --from d7 --to d8 --capture q --promote queen --stored a9=Q
//!
//! # Storage map as JSON
//! mover -c config/machine.toml --json storage
//! ```

use clap::{Parser, Subcommand};
use mover_common::machine::MachineConfig;
use mover_common::types::{BoardOccupancy, Move, Piece, PieceType, Square};
use mover_executor::executor::castling_rook_squares;
use mover_executor::{MoveExecutor, StorageAllocator};
use mover_hal::actuators::{Actuators, JointKind, JointRegistry};
use mover_hal::link::sim::SimConnector;
use mover_hal::link::{ConnectionState, Connector, Link, SerialConnector};
use mover_hal::safety::SafetyGate;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Mover - chess mover motion execution
#[derive(Parser, Debug)]
#[command(name = "mover")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Chess mover motion execution: link, actuators, storage and move planning")]
#[command(long_about = None)]
struct Args {
    /// Path to machine configuration file (machine.toml)
    #[arg(short, long, default_value = "/etc/mover/machine.toml")]
    config: PathBuf,

    /// Serial port, overriding `link.port`
    #[arg(short, long)]
    port: Option<String>,

    /// Use the in-process controller and the simulation joint driver
    #[arg(short = 's', long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and results in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and report link, position and joint status
    Status,
    /// Run the homing cycle
    Home,
    /// Clear the controller alarm lock
    Unlock,
    /// Plan and execute one move
    Move(MoveArgs),
    /// Show storage usage and map
    Storage {
        /// Piece already in storage, as `<square>=<fen>` (repeatable)
        #[arg(long = "stored", value_name = "SQ=FEN", value_parser = parse_stored)]
        stored: Vec<(Square, Piece)>,
    },
}

#[derive(clap::Args, Debug)]
struct MoveArgs {
    #[arg(long)]
    from: Square,

    #[arg(long)]
    to: Square,

    /// Moving piece (FEN letter)
    #[arg(long, default_value = "P")]
    piece: Piece,

    /// Captured piece (FEN letter)
    #[arg(long, value_name = "FEN")]
    capture: Option<Piece>,

    #[arg(long)]
    castle: bool,

    #[arg(long)]
    en_passant: bool,

    /// Promotion piece type
    #[arg(long, value_name = "TYPE")]
    promote: Option<PieceType>,

    /// Piece already in storage, as `<square>=<fen>` (repeatable)
    #[arg(long = "stored", value_name = "SQ=FEN", value_parser = parse_stored)]
    stored: Vec<(Square, Piece)>,
}

fn parse_stored(s: &str) -> Result<(Square, Piece), String> {
    let (sq, fen) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <square>=<fen>, got '{s}'"))?;
    let square = sq.parse::<Square>().map_err(|e| e.to_string())?;
    let piece = fen.parse::<Piece>().map_err(|e| e.to_string())?;
    Ok((square, piece))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run().await {
        error!("mover failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = MachineConfig::load_validated(&args.config);
    let level = match &config {
        Ok(c) => c.shared.log_level.as_directive(),
        Err(_) => "info",
    };
    setup_tracing(&args, level);
    let mut config = config?;

    info!(
        service = %config.shared.service_name,
        "Mover v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    if let Some(port) = &args.port {
        config.link.port = port.clone();
    }

    if args.simulate {
        info!("Simulation mode enabled");
        config.actuators.driver = "simulation".to_string();
        config.link.port = "sim".to_string();
        run_command(SimConnector::new(), &args, config).await
    } else {
        run_command(SerialConnector, &args, config).await
    }
}

async fn run_command<C: Connector>(
    connector: C,
    args: &Args,
    config: MachineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Arc::new(StorageAllocator::new(
        config.board.clone(),
        config.storage.strategy,
    ));

    if let Command::Storage { stored } = &args.command {
        let preload: BoardOccupancy = stored.iter().copied().collect();
        storage.sync_with_occupancy(&preload);
        return print_storage(&storage, args.json);
    }

    let gate = SafetyGate::new(config.safety)?;
    let link = Arc::new(Link::new(connector, config.link.clone(), gate));
    let registry = JointRegistry::with_builtin();
    let actuators = Actuators::new(&config.actuators, &registry)?;
    let executor = MoveExecutor::new(
        Arc::clone(&link),
        actuators,
        Arc::clone(&storage),
        config.executor.clone(),
    );

    if !link.connect_configured().await {
        return Err(format!("could not open {}", config.link.port).into());
    }

    let result = match &args.command {
        Command::Status => status(&executor, args.json).await,
        Command::Home => recover(&link, "home", link.home().await).await,
        Command::Unlock => recover(&link, "unlock", link.unlock().await).await,
        Command::Move(m) => run_move(&executor, m, args.json).await,
        Command::Storage { .. } => Ok(()),
    };

    link.disconnect().await;
    info!("Mover shutdown complete");
    result
}

async fn status<C: Connector>(
    executor: &MoveExecutor<C>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let link = executor.link();
    link.wait_for_position(Duration::from_secs(1)).await;
    let snapshot = link.snapshot();
    let lift = executor.joint_status(JointKind::Lift).await;
    let gripper = executor.joint_status(JointKind::Gripper).await;

    if json {
        let out = serde_json::json!({
            "link": snapshot,
            "joints": [lift, gripper],
            "storage": executor.storage().stats(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("link:      {} ({})", snapshot.state, snapshot.run_state);
        match snapshot.position {
            Some(p) => println!("position:  {p}"),
            None => println!("position:  unknown"),
        }
        println!("acks:      {} ok, {} errors", snapshot.acks, snapshot.errors);
        if let Some(code) = snapshot.last_alarm {
            println!("alarm:     {code}");
        }
        for j in [lift, gripper] {
            println!("{:<10} {:>7.1}° {:?}", format!("{}:", j.joint), j.position_deg, j.bucket);
        }
    }
    Ok(())
}

async fn recover<C: Connector>(
    link: &Link<C>,
    what: &str,
    accepted: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !accepted {
        return Err(format!("{what} refused by the link").into());
    }
    let mut rx = link.watch();
    let settled = tokio::time::timeout(
        Duration::from_secs(60),
        rx.wait_for(|s| s.state != ConnectionState::Connecting),
    )
    .await;
    match settled {
        Ok(Ok(snap)) if snap.state == ConnectionState::Connected => {
            info!(command = what, "Controller ready");
            Ok(())
        }
        Ok(Ok(snap)) => Err(format!("{what} failed: link is {}", snap.state).into()),
        Ok(Err(_)) => Err("link closed".into()),
        Err(_) => Err(format!("{what} did not complete").into()),
    }
}

async fn run_move<C: Connector>(
    executor: &MoveExecutor<C>,
    args: &MoveArgs,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut mv = Move::new(args.from, args.to);
    let mut occupancy = BoardOccupancy::new().with(args.from, args.piece);

    if args.en_passant {
        mv = mv.en_passant();
        let victim = args
            .capture
            .unwrap_or(Piece::new(PieceType::Pawn, args.piece.color.opposite()));
        occupancy.set(Square::new(args.to.file, args.from.rank), Some(victim));
    } else if let Some(victim) = args.capture {
        mv = mv.capture();
        occupancy.set(args.to, Some(victim));
    }
    if args.castle {
        mv = mv.castle();
        let (rook_from, _) = castling_rook_squares(executor.board(), &mv);
        occupancy.set(rook_from, Some(Piece::new(PieceType::Rook, args.piece.color)));
    }
    if let Some(kind) = args.promote {
        mv = mv.promote(kind);
    }
    if !args.stored.is_empty() {
        let preload: BoardOccupancy = args.stored.iter().copied().collect();
        executor.storage().sync_with_occupancy(&preload);
    }

    let plan = executor.plan(&mv, &occupancy)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("plan for {mv}:");
        for (i, action) in plan.actions().iter().enumerate() {
            println!("  {i:>2}  {action}");
        }
    }

    let execution = executor.execute(plan);
    tokio::pin!(execution);
    let finished = tokio::select! {
        r = &mut execution => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(r) => r,
        None => {
            warn!("Received shutdown signal; emergency stop");
            executor.link().emergency_stop().await;
            execution.await
        }
    };

    let report = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} done: {} actions in {:.1} s",
            report.mv,
            report.actions,
            report.elapsed.as_secs_f64()
        );
    }
    Ok(())
}

fn print_storage(storage: &StorageAllocator, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let stats = storage.stats();
    let grid = storage.visual_map();
    if json {
        let rows: Vec<String> = grid.iter().map(|r| r.iter().collect()).collect();
        let out = serde_json::json!({ "stats": stats, "map": rows });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "strategy {}: {}/{} occupied, {} reserved ({:.1}%)",
        stats.strategy, stats.occupied, stats.total, stats.reserved, stats.utilization_pct
    );
    let ranks = grid.len();
    for (i, row) in grid.iter().enumerate() {
        let line: String = row.iter().flat_map(|c| [*c, ' ']).collect();
        println!("{:>3} {}", ranks - i, line.trim_end());
    }
    let files: String = (0..storage.board().files)
        .flat_map(|f| [Square::new(f, 0).file_char(), ' '])
        .collect();
    println!("    {}", files.trim_end());
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and `[shared]`.
fn setup_tracing(args: &Args, level: &str) {
    let directive = if args.verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
