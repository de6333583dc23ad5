//! Planning and execution against the in-process controller.

use mover_common::board::{BoardGeometry, Direction, StorageLayout};
use mover_common::hal::config::{ActuatorsConfig, AxisLimits, LinkConfig, SafetyLimits};
use mover_common::machine::{CaptureFallback, ExecutorConfig, StorageStrategy};
use mover_common::types::{BoardOccupancy, Color, Move, Piece, PieceType, Position, Square};
use mover_executor::executor::StorageEffect;
use mover_executor::{
    Action, ActionError, MoveExecutor, MovePhase, PlanError, ProgressEvent, SlotState,
    StorageAllocator,
};
use mover_hal::actuators::drivers::simulation::{CommandLog, SimulationJointDriver};
use mover_hal::actuators::{Actuators, GripPreset, LiftPreset};
use mover_hal::link::sim::SimConnector;
use mover_hal::link::{ConnectionState, Link};
use mover_hal::safety::SafetyGate;
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    sim: SimConnector,
    link: Arc<Link<SimConnector>>,
    joints: CommandLog,
    executor: MoveExecutor<SimConnector>,
}

fn sq(s: &str) -> Square {
    s.parse().unwrap()
}

fn piece(fen: char) -> Piece {
    Piece::from_fen_char(fen).unwrap()
}

/// 8 × 8 playing area with two storage ranks above, 50 mm squares.
fn top_board() -> BoardGeometry {
    BoardGeometry {
        files: 8,
        ranks: 10,
        width_mm: 400.0,
        height_mm: 500.0,
        storage_layout: StorageLayout::Top,
        storage_depth: 2,
        ..BoardGeometry::default()
    }
}

/// No storage at all, offset so pushes off the low edges stay in limits.
fn bare_board() -> BoardGeometry {
    BoardGeometry {
        origin_x_mm: 50.0,
        origin_y_mm: 50.0,
        ..BoardGeometry::default()
    }
}

fn carry(src: &str, dst: &str) -> Vec<Action> {
    vec![
        Action::MoveTo(sq(src)),
        Action::Grip(GripPreset::Close),
        Action::Lift(LiftPreset::Up),
        Action::MoveTo(sq(dst)),
        Action::Lift(LiftPreset::Down),
        Action::Grip(GripPreset::Open),
    ]
}

async fn rig_with(board: BoardGeometry, strategy: StorageStrategy, config: ExecutorConfig) -> Rig {
    let sim = SimConnector::new();
    let gate = SafetyGate::new(SafetyLimits {
        x: AxisLimits::new(0.0, 550.0),
        y: AxisLimits::new(0.0, 550.0),
        z: AxisLimits::new(0.0, 100.0),
    })
    .unwrap();
    let link_config = LinkConfig {
        port: "sim".into(),
        ..LinkConfig::default()
    };
    let link = Arc::new(Link::new(sim.clone(), link_config, gate));
    assert!(link.connect("sim", 115_200, false).await);

    let driver = SimulationJointDriver::new();
    let joints = driver.log();
    let actuators = Actuators::with_driver(&ActuatorsConfig::default(), Box::new(driver)).unwrap();
    let storage = Arc::new(StorageAllocator::new(board, strategy));
    let executor = MoveExecutor::new(Arc::clone(&link), actuators, storage, config);
    Rig {
        sim,
        link,
        joints,
        executor,
    }
}

async fn rig() -> Rig {
    rig_with(top_board(), StorageStrategy::Nearest, ExecutorConfig::default()).await
}

fn motion_lines(sim: &SimConnector) -> Vec<String> {
    sim.lines()
        .into_iter()
        .filter(|l| l.starts_with("G21 G90 "))
        .collect()
}

// ─── Plain moves ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn plain_move_drives_link_and_joints() {
    let rig = rig().await;
    let occ = BoardOccupancy::new().with(sq("e2"), piece('P'));
    let plan = rig.executor.plan(&Move::new(sq("e2"), sq("e4")), &occ).unwrap();
    assert_eq!(plan.actions(), carry("e2", "e4").as_slice());

    let report = rig.executor.execute(plan).await.unwrap();
    assert_eq!(report.actions, 6);
    assert_eq!(rig.executor.phase(), MovePhase::Completed);

    assert_eq!(
        motion_lines(&rig.sim),
        vec![
            "G21 G90 G0 X225.000 Y75.000 Z0.000 F2000",
            "G21 G90 G0 X225.000 Y175.000 Z0.000 F2000",
        ]
    );
    assert_eq!(rig.sim.position(), Position::new(225.0, 175.0, 0.0));
    // Lift on channel 0 ends down, gripper on channel 1 ends open.
    assert_eq!(rig.joints.last(0), Some(0.0));
    assert_eq!(rig.joints.last(1), Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn progress_events_follow_execution_order() {
    let rig = rig().await;
    let mut events = rig.executor.subscribe();
    let occ = BoardOccupancy::new().with(sq("a2"), piece('P'));
    let plan = rig.executor.plan(&Move::new(sq("a2"), sq("a3")), &occ).unwrap();
    rig.executor.execute(plan).await.unwrap();

    let mut started = Vec::new();
    let mut phases = Vec::new();
    while let Ok(ev) = events.try_recv() {
        match ev {
            ProgressEvent::ActionStarted { index, total, .. } => {
                assert_eq!(total, 6);
                started.push(index);
            }
            ProgressEvent::PhaseChanged { phase, .. } => phases.push(phase),
            _ => {}
        }
    }
    assert_eq!(started, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(
        phases,
        vec![MovePhase::Planning, MovePhase::Executing, MovePhase::Completed]
    );
}

// ─── Captures ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn capture_stores_the_victim_before_moving() {
    let rig = rig().await;
    let occ = BoardOccupancy::new()
        .with(sq("d7"), piece('Q'))
        .with(sq("d8"), piece('q'));
    let plan = rig
        .executor
        .plan(&Move::new(sq("d7"), sq("d8")).capture(), &occ)
        .unwrap();
    let mut expected = carry("d8", "d9");
    expected.extend(carry("d7", "d8"));
    assert_eq!(plan.actions(), expected.as_slice());

    let storage = Arc::clone(rig.executor.storage());
    assert_eq!(
        storage.slot(sq("d9")).unwrap().state,
        SlotState::Reserved(piece('q'))
    );

    rig.executor.execute(plan).await.unwrap();
    assert_eq!(storage.find(PieceType::Queen, Color::Black), Some(sq("d9")));
    assert_eq!(motion_lines(&rig.sim)[0], "G21 G90 G0 X175.000 Y375.000 Z0.000 F2000");
    assert_eq!(motion_lines(&rig.sim)[1], "G21 G90 G0 X175.000 Y425.000 Z0.000 F2000");
}

#[tokio::test(start_paused = true)]
async fn capture_with_full_storage_is_refused() {
    let rig = rig_with(bare_board(), StorageStrategy::Nearest, ExecutorConfig::default()).await;
    let occ = BoardOccupancy::new()
        .with(sq("e4"), piece('P'))
        .with(sq("d5"), piece('p'));
    let err = rig
        .executor
        .plan(&Move::new(sq("e4"), sq("d5")).capture(), &occ)
        .unwrap_err();
    assert_eq!(err, PlanError::StorageFull(piece('p')));
    assert_eq!(rig.executor.phase(), MovePhase::Failed);
    assert!(motion_lines(&rig.sim).is_empty());
}

#[tokio::test(start_paused = true)]
async fn en_passant_removes_the_pawn_beside_the_destination() {
    let rig = rig().await;
    let occ = BoardOccupancy::new()
        .with(sq("e5"), piece('P'))
        .with(sq("d5"), piece('p'));
    let plan = rig
        .executor
        .plan(&Move::new(sq("e5"), sq("d6")).en_passant(), &occ)
        .unwrap();

    assert_eq!(plan.actions()[0], Action::MoveTo(sq("d5")));
    assert_eq!(&plan.actions()[6..], carry("e5", "d6").as_slice());
    assert!(matches!(
        plan.effects()[0].effect,
        StorageEffect::Deposit { piece: p, .. } if p == piece('p')
    ));
}

#[tokio::test(start_paused = true)]
async fn en_passant_onto_an_occupied_square_is_refused() {
    let rig = rig().await;
    let occ = BoardOccupancy::new()
        .with(sq("e5"), piece('P'))
        .with(sq("d5"), piece('p'))
        .with(sq("d6"), piece('n'));
    let err = rig
        .executor
        .plan(&Move::new(sq("e5"), sq("d6")).en_passant(), &occ)
        .unwrap_err();
    assert_eq!(err, PlanError::DestinationOccupied(sq("d6")));
    assert_eq!(rig.executor.storage().stats().reserved, 0);
}

// ─── Castling and promotion ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn castling_moves_king_then_rook() {
    let rig = rig().await;
    let occ = BoardOccupancy::new()
        .with(sq("e1"), piece('K'))
        .with(sq("h1"), piece('R'));
    let plan = rig
        .executor
        .plan(&Move::new(sq("e1"), sq("g1")).castle(), &occ)
        .unwrap();
    let mut expected = carry("e1", "g1");
    expected.extend(carry("h1", "f1"));
    assert_eq!(plan.actions(), expected.as_slice());

    rig.executor.execute(plan).await.unwrap();
    assert_eq!(motion_lines(&rig.sim).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn castling_without_rook_is_refused() {
    let rig = rig().await;
    let occ = BoardOccupancy::new().with(sq("e8"), piece('k'));
    let err = rig
        .executor
        .plan(&Move::new(sq("e8"), sq("c8")).castle(), &occ)
        .unwrap_err();
    assert_eq!(err, PlanError::NoCastlingRook(sq("a8")));
}

#[tokio::test(start_paused = true)]
async fn promotion_swaps_pawn_for_stored_piece() {
    let rig = rig().await;
    let storage = Arc::clone(rig.executor.storage());
    storage.sync_with_occupancy(&BoardOccupancy::new().with(sq("a9"), piece('Q')));

    let occ = BoardOccupancy::new().with(sq("e7"), piece('P'));
    let mv = Move::new(sq("e7"), sq("e8")).promote(PieceType::Queen);
    let plan = rig.executor.plan(&mv, &occ).unwrap();

    let mut expected = carry("e7", "e9");
    expected.extend(carry("a9", "e8"));
    assert_eq!(plan.actions(), expected.as_slice());
    assert_eq!(
        storage.slot(sq("a9")).unwrap().state,
        SlotState::Departing(piece('Q'))
    );

    rig.executor.execute(plan).await.unwrap();
    assert_eq!(storage.find(PieceType::Queen, Color::White), None);
    assert_eq!(storage.find(PieceType::Pawn, Color::White), Some(sq("e9")));
    assert_eq!(storage.slot(sq("a9")).unwrap().state, SlotState::Free);
}

#[tokio::test(start_paused = true)]
async fn promotion_without_stored_piece_is_an_error() {
    let rig = rig().await;
    let storage = Arc::clone(rig.executor.storage());
    // A black queen does not stand in for a white one.
    storage.sync_with_occupancy(&BoardOccupancy::new().with(sq("a9"), piece('q')));

    let occ = BoardOccupancy::new()
        .with(sq("d7"), piece('P'))
        .with(sq("e8"), piece('r'));
    let mv = Move::new(sq("d7"), sq("e8"))
        .capture()
        .promote(PieceType::Queen);
    let err = rig.executor.plan(&mv, &occ).unwrap_err();
    assert_eq!(
        err,
        PlanError::PromotionUnavailable {
            kind: PieceType::Queen,
            color: Color::White
        }
    );

    // The capture's reservation was undone.
    let stats = storage.stats();
    assert_eq!(stats.reserved, 0);
    assert_eq!(stats.occupied, 1);
    assert_eq!(stats.available, stats.total - 1);
}

// ─── Failures ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_action_releases_pending_reservations() {
    let rig = rig().await;
    let occ = BoardOccupancy::new()
        .with(sq("c3"), piece('N'))
        .with(sq("d5"), piece('b'));
    let plan = rig
        .executor
        .plan(&Move::new(sq("c3"), sq("d5")).capture(), &occ)
        .unwrap();
    let reserved = plan.effects()[0].effect.square();

    rig.joints.fail_outputs(true);
    let err = rig.executor.execute(plan).await.unwrap_err();
    assert_eq!(err.index, 1);
    assert_eq!(err.action, Action::Grip(GripPreset::Close));
    assert!(matches!(err.error, ActionError::Actuator(_)));

    assert_eq!(rig.executor.phase(), MovePhase::Failed);
    let storage = rig.executor.storage();
    assert_eq!(storage.slot(reserved).unwrap().state, SlotState::Free);
    assert_eq!(storage.stats().reserved, 0);
}

#[tokio::test(start_paused = true)]
async fn emergency_stop_aborts_the_plan_until_recovered() {
    let rig = rig().await;
    let occ = BoardOccupancy::new().with(sq("b1"), piece('N'));
    let plan = rig.executor.plan(&Move::new(sq("b1"), sq("c3")), &occ).unwrap();

    let mut events = rig.executor.subscribe();
    let link = Arc::clone(&rig.link);
    let stopper = async move {
        loop {
            match events.recv().await {
                Ok(ProgressEvent::ActionCompleted { index: 0, .. }) => {
                    link.emergency_stop().await;
                    return;
                }
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    };
    let (result, ()) = tokio::join!(rig.executor.execute(plan), stopper);

    let err = result.unwrap_err();
    assert_eq!(err.error, ActionError::EmergencyStop);
    assert!(err.index >= 1);
    assert_eq!(motion_lines(&rig.sim).len(), 1);

    assert!(!rig.link.send("G0 X10 Y10").await);
    rig.link.reset_emergency_stop().await;
    assert!(!rig.link.send("G0 X10 Y10").await);
    assert!(rig.link.unlock().await);
    let mut rx = rig.link.watch();
    tokio::time::timeout(
        Duration::from_secs(60),
        rx.wait_for(|s| s.state == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(rig.link.send("G0 X10 Y10").await);
}

// ─── Edge push ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn full_storage_falls_back_to_edge_push() {
    let config = ExecutorConfig {
        capture_fallback: CaptureFallback::EdgePush,
        ..ExecutorConfig::default()
    };
    let rig = rig_with(bare_board(), StorageStrategy::Nearest, config).await;
    let occ = BoardOccupancy::new()
        .with(sq("e2"), piece('Q'))
        .with(sq("e4"), piece('p'));
    let plan = rig
        .executor
        .plan(&Move::new(sq("e2"), sq("e4")).capture(), &occ)
        .unwrap();

    // Corners first; h1 is the closest of the four to e4.
    let mut expected = carry("e4", "h1");
    expected.push(Action::Push {
        direction: Direction::South,
        distance_mm: 30.0,
    });
    expected.extend(carry("e2", "e4"));
    assert_eq!(plan.actions(), expected.as_slice());
    assert!(plan.effects().is_empty());

    rig.executor.execute(plan).await.unwrap();
    let lines = motion_lines(&rig.sim);
    assert_eq!(lines[1], "G21 G90 G0 X425.000 Y75.000 Z0.000 F2000");
    assert_eq!(lines[2], "G21 G90 G1 X425.000 Y45.000 Z0.000 F300");
}

#[tokio::test(start_paused = true)]
async fn edge_push_leaves_the_grid_beside_storage() {
    let config = ExecutorConfig {
        capture_fallback: CaptureFallback::EdgePush,
        ..ExecutorConfig::default()
    };
    let rig = rig_with(top_board(), StorageStrategy::Nearest, config).await;
    let board = rig.executor.board().clone();
    let mut occ: BoardOccupancy = board
        .storage_squares()
        .into_iter()
        .map(|s| (s, piece('P')))
        .collect();
    rig.executor.storage().sync_with_occupancy(&occ);
    occ.set(sq("a1"), Some(piece('R')));
    occ.set(sq("h1"), Some(piece('R')));
    occ.set(sq("d6"), Some(piece('Q')));
    occ.set(sq("d7"), Some(piece('p')));

    let plan = rig
        .executor
        .plan(&Move::new(sq("d6"), sq("d7")).capture(), &occ)
        .unwrap();

    // d8 is closer but its only way out is north into the storage ranks.
    let mut expected = carry("d7", "a7");
    expected.push(Action::Push {
        direction: Direction::West,
        distance_mm: 30.0,
    });
    expected.extend(carry("d6", "d7"));
    assert_eq!(plan.actions(), expected.as_slice());
    assert_eq!(board.neighbour(sq("a7"), Direction::West), None);
}

#[tokio::test(start_paused = true)]
async fn tool_push_fetches_and_returns_the_pusher() {
    let board = BoardGeometry {
        origin_x_mm: 100.0,
        origin_y_mm: 48.0,
        ..top_board()
    };
    let config = ExecutorConfig {
        capture_fallback: CaptureFallback::ToolPush,
        tool_holder: Some(sq("a10")),
        ..ExecutorConfig::default()
    };
    let rig = rig_with(board.clone(), StorageStrategy::Nearest, config).await;
    assert_eq!(rig.executor.storage().slot(sq("a10")), None);
    assert_eq!(rig.executor.storage().stats().total, 15);

    let full: BoardOccupancy = board
        .storage_squares()
        .into_iter()
        .filter(|s| *s != sq("a10"))
        .map(|s| (s, piece('p')))
        .collect();
    rig.executor.storage().sync_with_occupancy(&full);
    let occ = BoardOccupancy::new()
        .with(sq("e2"), piece('Q'))
        .with(sq("e4"), piece('p'));
    let plan = rig
        .executor
        .plan(&Move::new(sq("e2"), sq("e4")).capture(), &occ)
        .unwrap();

    let mut expected = carry("e4", "h1");
    expected.extend([
        Action::Lift(LiftPreset::Up),
        Action::MoveTo(sq("a10")),
        Action::Lift(LiftPreset::Down),
        Action::Grip(GripPreset::Close),
        Action::Lift(LiftPreset::Up),
        Action::MoveTo(sq("h1")),
        Action::Lift(LiftPreset::Down),
        Action::Push {
            direction: Direction::South,
            distance_mm: 70.0,
        },
        Action::Lift(LiftPreset::Up),
        Action::MoveTo(sq("a10")),
        Action::Lift(LiftPreset::Down),
        Action::Grip(GripPreset::Open),
        Action::Lift(LiftPreset::Up),
    ]);
    expected.extend(carry("e2", "e4"));
    assert_eq!(plan.actions(), expected.as_slice());

    rig.executor.execute(plan).await.unwrap();
    let lines = motion_lines(&rig.sim);
    assert_eq!(lines[1], "G21 G90 G0 X475.000 Y73.000 Z0.000 F2000");
    assert_eq!(lines[2], "G21 G90 G0 X125.000 Y523.000 Z0.000 F2000");
    assert_eq!(lines[4], "G21 G90 G1 X475.000 Y3.000 Z0.000 F300");
    assert_eq!(lines[5], "G21 G90 G0 X125.000 Y523.000 Z0.000 F2000");
}

#[tokio::test(start_paused = true)]
async fn edge_push_needs_an_empty_edge_square() {
    let config = ExecutorConfig {
        capture_fallback: CaptureFallback::EdgePush,
        ..ExecutorConfig::default()
    };
    let rig = rig_with(bare_board(), StorageStrategy::Nearest, config).await;
    let board = rig.executor.board().clone();
    let mut occ: BoardOccupancy = board.push_squares().map(|(s, _)| (s, piece('P'))).collect();
    occ.set(sq("d4"), Some(piece('Q')));
    occ.set(sq("e5"), Some(piece('p')));

    let err = rig
        .executor
        .plan(&Move::new(sq("d4"), sq("e5")).capture(), &occ)
        .unwrap_err();
    assert_eq!(err, PlanError::StorageFull(piece('p')));
}

// ─── Lifecycle ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn discard_and_reset_clear_storage() {
    let rig = rig().await;
    let occ = BoardOccupancy::new()
        .with(sq("a1"), piece('R'))
        .with(sq("a7"), piece('p'));
    let plan = rig
        .executor
        .plan(&Move::new(sq("a1"), sq("a7")).capture(), &occ)
        .unwrap();
    assert_eq!(rig.executor.storage().stats().reserved, 1);
    rig.executor.discard(plan);
    assert_eq!(rig.executor.storage().stats().reserved, 0);
    assert_eq!(rig.executor.phase(), MovePhase::Idle);

    let plan = rig
        .executor
        .plan(&Move::new(sq("a1"), sq("a7")).capture(), &occ)
        .unwrap();
    rig.executor.execute(plan).await.unwrap();
    assert_eq!(rig.executor.storage().stats().occupied, 1);

    assert!(rig.executor.storage().stats().utilization_pct > 0.0);

    rig.executor.reset();
    let stats = rig.executor.storage().stats();
    assert_eq!((stats.occupied, stats.reserved), (0, 0));
    assert_eq!(stats.utilization_pct, 0.0);
    assert_eq!(rig.executor.phase(), MovePhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn motion_is_refused_when_disconnected() {
    let rig = rig().await;
    rig.link.disconnect().await;
    let occ = BoardOccupancy::new().with(sq("a2"), piece('P'));
    let plan = rig.executor.plan(&Move::new(sq("a2"), sq("a3")), &occ).unwrap();
    let err = rig.executor.execute(plan).await.unwrap_err();
    assert_eq!(err.index, 0);
    assert_eq!(err.error, ActionError::LinkNotReady(ConnectionState::Disconnected));
}
