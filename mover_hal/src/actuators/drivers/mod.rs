//! Shipped joint drivers.

pub mod simulation;
pub mod sysfs_pwm;

use super::JointRegistry;

pub fn register_builtin(registry: &mut JointRegistry) {
    registry.register(simulation::NAME, simulation::create);
    registry.register(sysfs_pwm::NAME, sysfs_pwm::create);
}
