//! Joint driver registry.
//!
//! Maps driver names from `[actuators] driver = "..."` to factories. Built
//! at startup and handed to [`Actuators::new`](super::Actuators::new); there
//! is no global registry.

use super::{ActuatorError, JointDriver};
use std::collections::HashMap;

pub type JointDriverFactory = fn() -> Box<dyn JointDriver>;

pub struct JointRegistry {
    factories: HashMap<&'static str, JointDriverFactory>,
}

impl JointRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every shipped driver.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        super::drivers::register_builtin(&mut reg);
        reg
    }

    /// # Panics
    /// Panics if `name` is already registered.
    pub fn register(&mut self, name: &'static str, factory: JointDriverFactory) {
        if self.factories.contains_key(name) {
            panic!("Joint driver '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    pub fn get_factory(&self, name: &str) -> Option<JointDriverFactory> {
        self.factories.get(name).copied()
    }

    /// # Errors
    /// `DriverNotFound` if `name` is not registered.
    pub fn create_driver(&self, name: &str) -> Result<Box<dyn JointDriver>, ActuatorError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| ActuatorError::DriverNotFound(name.to_string()))?;
        Ok(factory())
    }

    /// Registered names, sorted.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for JointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuators::JointSpec;
    use mover_common::hal::config::ActuatorsConfig;

    struct NullDriver;

    impl JointDriver for NullDriver {
        fn name(&self) -> &'static str {
            "null"
        }

        fn version(&self) -> &'static str {
            "0.1.0"
        }

        fn init(&mut self, _: &ActuatorsConfig, _: &[JointSpec]) -> Result<(), ActuatorError> {
            Ok(())
        }

        fn set_angle(&mut self, _: u32, _: f64) -> Result<(), ActuatorError> {
            Ok(())
        }

        fn release(&mut self) -> Result<(), ActuatorError> {
            Ok(())
        }
    }

    fn null_driver() -> Box<dyn JointDriver> {
        Box::new(NullDriver)
    }

    #[test]
    fn register_and_create() {
        let mut reg = JointRegistry::new();
        reg.register("null", null_driver);
        let driver = reg.create_driver("null").expect("should create");
        assert_eq!(driver.name(), "null");
    }

    #[test]
    fn unknown_driver() {
        let reg = JointRegistry::new();
        assert!(matches!(
            reg.create_driver("stepper"),
            Err(ActuatorError::DriverNotFound(_))
        ));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut reg = JointRegistry::new();
        reg.register("null", null_driver);
        reg.register("null", null_driver);
    }

    #[test]
    fn builtin_drivers_listed() {
        let reg = JointRegistry::with_builtin();
        assert_eq!(reg.list_drivers(), vec!["simulation", "sysfs_pwm"]);
    }
}
