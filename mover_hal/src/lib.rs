//! # Mover HAL
//!
//! Hardware side of the chess mover.
//!
//! # Module Structure
//!
//! - [`link`] - serial link to the motion controller: framing, status
//!   parsing, connection state machine, liveness probing, reconnect
//! - [`safety`] - travel-limit gate consulted before every motion command
//! - [`actuators`] - lift and gripper joints behind a pluggable driver
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          mover_hal                           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │  SafetyGate  │◄──│     Link     │──►│ reader task      │  │
//! │  └──────────────┘   │  (snapshot,  │   │ supervisor task  │  │
//! │                     │   events)    │   └────────┬─────────┘  │
//! │                     └──────────────┘            ▼            │
//! │  ┌──────────────┐   ┌──────────────┐     serial / sim pipe   │
//! │  │  Actuators   │──►│ JointDriver  │                         │
//! │  └──────────────┘   └──────────────┘                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod actuators;
pub mod link;
pub mod safety;

pub use crate::actuators::{Actuators, JointRegistry};
pub use crate::link::{Link, LinkEvent, LinkSnapshot};
pub use crate::safety::{SafetyGate, SafetyViolation};
