use bosun::alarm_manager::AlarmManager;
use bosun::events::EventDispatcher;
use bosun::evaluator::evaluate;
use bosun::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Instant;

fn level() -> impl Strategy<Value = Option<EscalationLevel>> {
    prop_oneof![
        Just(None),
        prop::sample::select(EscalationLevel::ALL.to_vec()).prop_map(Some),
    ]
}

fn depth() -> Threshold {
    Threshold::new("depth", AlarmType::ShallowWater, "depth", Direction::Below, 2.0)
        .with_warning(3.0)
        .with_emergency(1.0)
        .with_hysteresis(0.2)
}

fn manager(clock: Arc<ManualClock>) -> AlarmManager {
    AlarmManager::new(clock, Arc::new(LoggingAudio), Arc::new(EventDispatcher::default()))
}

proptest! {
    #[test]
    fn test_non_finite_reading_holds_level(
        previous in level(),
        value in prop_oneof![Just(f64::NAN), Just(f64::INFINITY), Just(f64::NEG_INFINITY)],
    ) {
        let e = evaluate(previous, value, &depth());
        prop_assert_eq!(e.level, previous);
        prop_assert!(!e.crossed);
    }

    #[test]
    fn test_inverted_warning_is_rejected(critical in -100.0f64..100.0, delta in 0.0f64..50.0) {
        let below = Threshold::new("t", AlarmType::ShallowWater, "depth", Direction::Below, critical)
            .with_warning(critical - delta);
        prop_assert!(below.validate().unwrap_err().is_validation());

        let above = Threshold::new("t", AlarmType::EngineOverheat, "engine.coolantTemp", Direction::Above, critical)
            .with_warning(critical + delta);
        prop_assert!(above.validate().is_err());
    }

    #[test]
    fn test_recovery_band_holds_critical(
        trip in -50.0f64..50.0,
        band in 0.01f64..10.0,
        overshoot in 0.001f64..10.0,
        frac in 0.0f64..=1.0,
    ) {
        let t = Threshold::new("t", AlarmType::EngineOverheat, "x", Direction::Above, trip).with_hysteresis(band);
        let tripped = evaluate(None, trip + overshoot, &t);
        prop_assert_eq!(tripped.level, Some(EscalationLevel::Critical));

        let inside = evaluate(tripped.level, trip - band * frac, &t);
        prop_assert_eq!(inside.level, Some(EscalationLevel::Critical));
        prop_assert!(!inside.crossed);

        let outside = evaluate(tripped.level, trip - band - overshoot, &t);
        prop_assert_eq!(outside.level, None);
    }

    #[test]
    fn test_operator_actions_never_change_level(readings in prop::collection::vec(0.0f64..6.0, 1..40)) {
        let clock = Arc::new(ManualClock::starting_now());
        let plain = manager(clock.clone());
        let handled = manager(clock.clone());
        let threshold = depth();

        for value in readings {
            plain.evaluate_threshold(&threshold, Some(value), Instant::now());
            handled.evaluate_threshold(&threshold, Some(value), Instant::now());
            if handled.get("depth").is_some() {
                handled.acknowledge_alarm("depth", "watch").unwrap();
                handled.snooze_alarm("depth", chrono::Duration::minutes(10), "checking", true);
            }
            clock.advance(chrono::Duration::seconds(1));

            prop_assert_eq!(
                plain.get("depth").map(|o| o.escalation_level),
                handled.get("depth").map(|o| o.escalation_level)
            );
        }
    }

    #[test]
    fn test_history_is_bounded(capacity in 1usize..50, trips in 0usize..60) {
        let clock = Arc::new(ManualClock::starting_now());
        let events = Arc::new(EventDispatcher::default());
        let ledger = Arc::new(AlarmLedger::new(capacity, clock.clone()));
        events.subscribe(ledger.clone());
        let manager = AlarmManager::new(clock, Arc::new(LoggingAudio), events);

        for _ in 0..trips {
            manager.raise_synthetic(AlarmType::GpsLoss, EscalationLevel::Critical, "gps", "no fix");
            manager.clear_alarm("gps-loss");
        }
        prop_assert_eq!(ledger.len(), (trips * 2).min(capacity));
    }
}
