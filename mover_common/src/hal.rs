//! Configuration types for the hardware side: the controller link, travel
//! limits and the lift/gripper joints.

pub mod config;
