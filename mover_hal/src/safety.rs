//! Travel-limit gate.
//!
//! The only checkpoint for limit enforcement. The link consults it before
//! framing any motion command; nothing that fails here reaches the wire.

use mover_common::config::ConfigError;
use mover_common::hal::config::SafetyLimits;
use mover_common::types::Position;
use thiserror::Error;

/// A target outside the travel envelope.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("{axis} = {value} outside travel limits [{min}, {max}]")]
pub struct SafetyViolation {
    pub axis: char,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

/// Stateless validator over a fixed set of limits.
#[derive(Debug, Clone, Copy)]
pub struct SafetyGate {
    limits: SafetyLimits,
}

impl SafetyGate {
    /// # Errors
    /// `ValidationError` if any axis is non-finite or inverted.
    pub fn new(limits: SafetyLimits) -> Result<Self, ConfigError> {
        limits.validate()?;
        Ok(Self { limits })
    }

    pub const fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Check every axis of `target`. NaN and infinities are rejected.
    pub fn validate(&self, target: &Position) -> Result<(), SafetyViolation> {
        self.validate_axes([Some(target.x), Some(target.y), Some(target.z)])
    }

    /// Check only the axes a command names, in x, y, z order.
    pub fn validate_axes(&self, values: [Option<f64>; 3]) -> Result<(), SafetyViolation> {
        for ((axis, lim), value) in self.limits.axes().into_iter().zip(values) {
            let Some(value) = value else { continue };
            if !lim.contains(value) {
                return Err(SafetyViolation {
                    axis,
                    value,
                    min: lim.min,
                    max: lim.max,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mover_common::hal::config::AxisLimits;

    fn gate() -> SafetyGate {
        SafetyGate::new(SafetyLimits {
            x: AxisLimits::new(0.0, 400.0),
            y: AxisLimits::new(0.0, 400.0),
            z: AxisLimits::new(0.0, 100.0),
        })
        .unwrap()
    }

    #[test]
    fn accepts_inside_and_on_bounds() {
        let g = gate();
        assert!(g.validate(&Position::new(0.0, 0.0, 0.0)).is_ok());
        assert!(g.validate(&Position::new(400.0, 400.0, 100.0)).is_ok());
        assert!(g.validate(&Position::new(200.0, 150.5, 10.0)).is_ok());
    }

    #[test]
    fn names_the_offending_axis() {
        let v = gate().validate(&Position::new(100.0, 500.0, 0.0)).unwrap_err();
        assert_eq!(v.axis, 'y');
        assert_eq!(v.value, 500.0);
        assert_eq!((v.min, v.max), (0.0, 400.0));
        assert!(v.to_string().contains("y = 500"));
    }

    #[test]
    fn rejects_non_finite() {
        let g = gate();
        assert!(g.validate(&Position::new(f64::NAN, 0.0, 0.0)).is_err());
        assert!(g.validate(&Position::new(0.0, f64::INFINITY, 0.0)).is_err());
        assert!(g.validate(&Position::new(0.0, 0.0, f64::NEG_INFINITY)).is_err());
    }

    #[test]
    fn partial_check_skips_unnamed_axes() {
        let g = gate();
        assert!(g.validate_axes([None, Some(399.0), None]).is_ok());
        let v = g.validate_axes([None, None, Some(101.0)]).unwrap_err();
        assert_eq!(v.axis, 'z');
    }

    #[test]
    fn construction_rejects_inverted_limits() {
        let limits = SafetyLimits {
            x: AxisLimits::new(5.0, 1.0),
            ..SafetyLimits::default()
        };
        assert!(SafetyGate::new(limits).is_err());
    }
}
