//! Threshold evaluation with hysteresis.
//!
//! Pure functions: given the level an alarm currently holds, a new reading and
//! the threshold, compute the next level. Deciding whether that is a trip, an
//! escalation or a clear belongs to the alarm manager.

use crate::alarms::EscalationLevel;
use crate::thresholds::Threshold;
use serde::Serialize;

/// Outcome of evaluating one reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    /// Level after this reading, `None` when no band is in force
    pub level: Option<EscalationLevel>,
    /// `level` differs from the previous level
    pub crossed: bool,
}

impl Evaluation {
    fn hold(previous: Option<EscalationLevel>) -> Self {
        Self {
            level: previous,
            crossed: false,
        }
    }
}

/// Evaluate a finite-or-not reading against `threshold`
///
/// Non-finite values are treated as "no data": the previous level is kept, so
/// a sensor dropout never clears an alarm.
pub fn evaluate(previous: Option<EscalationLevel>, value: f64, threshold: &Threshold) -> Evaluation {
    if !value.is_finite() {
        return Evaluation::hold(previous);
    }

    let direction = threshold.direction;
    let points = threshold.trip_points();

    let raw = points
        .iter()
        .filter(|(_, trip)| direction.is_past(value, *trip))
        .map(|(level, _)| *level)
        .max();

    // A band already held stays in force until the value moves strictly past
    // its recovery point.
    let held = previous.and_then(|prev| {
        points
            .iter()
            .filter(|(level, _)| *level <= prev)
            .filter(|(_, trip)| {
                let recovery = direction.recovery_point(*trip, threshold.hysteresis);
                !direction.is_past(recovery, value)
            })
            .map(|(level, _)| *level)
            .max()
    });

    let level = raw.max(held);
    Evaluation {
        level,
        crossed: level != previous,
    }
}

/// Evaluate a reading that may be missing from the snapshot
pub fn evaluate_reading(
    previous: Option<EscalationLevel>,
    reading: Option<f64>,
    threshold: &Threshold,
) -> Evaluation {
    match reading {
        Some(value) => evaluate(previous, value, threshold),
        None => Evaluation::hold(previous),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::AlarmType;
    use crate::thresholds::Direction;

    fn depth() -> Threshold {
        Threshold::new("depth", AlarmType::ShallowWater, "depth", Direction::Below, 1.5)
            .with_warning(2.5)
            .with_hysteresis(0.1)
    }

    #[test]
    fn test_depth_scenario() {
        let t = depth();

        let e = evaluate(None, 3.0, &t);
        assert_eq!(e.level, None);
        assert!(!e.crossed);

        let e = evaluate(e.level, 1.4, &t);
        assert_eq!(e.level, Some(EscalationLevel::Critical));
        assert!(e.crossed);

        let e = evaluate(e.level, 1.55, &t);
        assert_eq!(e.level, Some(EscalationLevel::Critical));
        assert!(!e.crossed);

        // Past 1.6 the critical band releases; still inside the warning band
        let e = evaluate(e.level, 1.65, &t);
        assert_eq!(e.level, Some(EscalationLevel::Warning));
        assert!(e.crossed);
    }

    #[test]
    fn test_clears_fully_without_warning_band() {
        let t = Threshold::new("depth", AlarmType::ShallowWater, "depth", Direction::Below, 1.5).with_hysteresis(0.1);
        let e = evaluate(None, 1.4, &t);
        assert_eq!(e.level, Some(EscalationLevel::Critical));
        let e = evaluate(e.level, 1.6, &t);
        assert_eq!(e.level, Some(EscalationLevel::Critical), "exactly on the recovery point holds");
        let e = evaluate(e.level, 1.65, &t);
        assert_eq!(e.level, None);
        assert!(e.crossed);
    }

    #[test]
    fn test_above_direction_hysteresis() {
        let t = Threshold::new("ect", AlarmType::EngineOverheat, "engine.coolantTemp", Direction::Above, 95.0)
            .with_warning(90.0)
            .with_hysteresis(2.0);

        let e = evaluate(None, 96.0, &t);
        assert_eq!(e.level, Some(EscalationLevel::Critical));
        let e = evaluate(e.level, 94.0, &t);
        assert_eq!(e.level, Some(EscalationLevel::Critical));
        let e = evaluate(e.level, 92.5, &t);
        assert_eq!(e.level, Some(EscalationLevel::Warning));
        let e = evaluate(e.level, 87.9, &t);
        assert_eq!(e.level, None);
    }

    #[test]
    fn test_value_on_trip_point_does_not_enter() {
        let t = depth();
        assert_eq!(evaluate(None, 1.5, &t).level, Some(EscalationLevel::Warning));
        assert_eq!(evaluate(None, 2.5, &t).level, None);
    }

    #[test]
    fn test_non_finite_holds_previous_level() {
        let t = depth();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let e = evaluate(Some(EscalationLevel::Critical), bad, &t);
            assert_eq!(e.level, Some(EscalationLevel::Critical));
            assert!(!e.crossed);
        }
        let e = evaluate_reading(Some(EscalationLevel::Warning), None, &t);
        assert_eq!(e.level, Some(EscalationLevel::Warning));
    }

    #[test]
    fn test_emergency_band() {
        let t = Threshold::new("ect", AlarmType::EngineOverheat, "engine.coolantTemp", Direction::Above, 95.0)
            .with_emergency(105.0)
            .with_hysteresis(1.0);
        assert_eq!(evaluate(None, 106.0, &t).level, Some(EscalationLevel::Emergency));
        assert_eq!(evaluate(Some(EscalationLevel::Emergency), 104.5, &t).level, Some(EscalationLevel::Emergency));
        assert_eq!(evaluate(Some(EscalationLevel::Emergency), 103.0, &t).level, Some(EscalationLevel::Critical));
    }

    #[test]
    fn test_rising_value_escalates_past_held_band() {
        let t = depth();
        let e = evaluate(Some(EscalationLevel::Warning), 1.2, &t);
        assert_eq!(e.level, Some(EscalationLevel::Critical));
        assert!(e.crossed);
    }
}
