//! Property tests for crossing detection and race bookkeeping.

use finishline_core::{
    intersects, CrossingDecision, EntityTrack, RaceConfig, RaceState, Sample, UpdateOutcome,
};
use finishline_env::{EntityId, Point};
use finishline_sim::{ScenarioRunner, scenarios::ScenarioId};
use proptest::prelude::*;

fn blue() -> EntityId {
    EntityId::from("blue-car")
}

/// A non-degenerate line and two points on either side of it, such that the
/// segment between them passes through the line's interior.
#[derive(Debug, Clone)]
struct CrossingCase {
    p1: Point,
    p2: Point,
    before: Point,
    after: Point,
}

fn crossing_case() -> impl Strategy<Value = CrossingCase> {
    (
        (0.0..640.0f64, 0.0..480.0f64),
        (20.0..300.0f64, 0.0..std::f64::consts::TAU),
        0.1..0.9f64,
        1.0..80.0f64,
        1.0..80.0f64,
    )
        .prop_map(|((x, y), (length, heading), along, d1, d2)| {
            let (dx, dy) = (heading.cos() * length, heading.sin() * length);
            let p1 = Point::new(x, y);
            let p2 = Point::new(x + dx, y + dy);
            let mid = Point::new(x + dx * along, y + dy * along);
            // Unit normal of the line
            let (nx, ny) = (-dy / length, dx / length);
            CrossingCase {
                p1,
                p2,
                before: Point::new(mid.x + nx * d1, mid.y + ny * d1),
                after: Point::new(mid.x - nx * d2, mid.y - ny * d2),
            }
        })
}

fn running_race(p1: Point, p2: Point) -> RaceState {
    let mut race = RaceState::new(RaceConfig::default()).unwrap();
    race.set_finish_line(p1, p2).unwrap();
    race.start().unwrap();
    race
}

proptest! {
    // Sample spacing stays under `max_sample_gap_seconds`; wider gaps are
    // covered by `test_gap_suppresses_crossing`.
    #[test]
    fn test_two_sample_crossing_yields_one_event(
        case in crossing_case(),
        t0 in 0.0..100.0f64,
        dt in 0.01..1.5f64,
    ) {
        let mut race = running_race(case.p1, case.p2);
        let id = blue();

        let first = race.update(&id, case.before, t0).unwrap();
        let second = race.update(&id, case.after, t0 + dt).unwrap();

        prop_assert!(!first.is_crossing());
        prop_assert!(second.is_crossing());
        prop_assert!(race.laps(&id).is_empty());
    }

    #[test]
    fn test_gap_suppresses_crossing(
        case in crossing_case(),
        t0 in 0.0..100.0f64,
        gap in 2.01..30.0f64,
    ) {
        let mut race = running_race(case.p1, case.p2);
        let id = blue();

        race.update(&id, case.before, t0).unwrap();
        let outcome = race.update(&id, case.after, t0 + gap).unwrap();

        prop_assert_eq!(outcome, UpdateOutcome::Tracked(CrossingDecision::NotEligible));
        prop_assert_eq!(race.track(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_cooldown_suppresses_second_event(
        case in crossing_case(),
        dt1 in 0.01..1.0f64,
        dt2 in 0.01..1.99f64,
    ) {
        let mut race = running_race(case.p1, case.p2);
        let id = blue();

        race.update(&id, case.before, 0.0).unwrap();
        prop_assert!(race.update(&id, case.after, dt1).unwrap().is_crossing());

        // Straight back over the line inside the cooldown window
        let outcome = race.update(&id, case.before, dt1 + dt2).unwrap();
        prop_assert!(
            matches!(outcome, UpdateOutcome::Tracked(CrossingDecision::Debounced { .. })),
            "got {:?}",
            outcome
        );
        prop_assert_eq!(race.track(&id).unwrap().last_crossing_time, Some(dt1));
    }

    #[test]
    fn test_single_sample_never_crosses(
        case in crossing_case(),
        t in 0.0..100.0f64,
    ) {
        let mut race = running_race(case.p1, case.p2);
        let outcome = race.update(&blue(), case.before, t).unwrap();
        prop_assert!(!outcome.is_crossing());
    }

    #[test]
    fn test_intersection_symmetric(case in crossing_case()) {
        let line = (case.p1, case.p2);
        let motion = (case.before, case.after);
        prop_assert!(intersects(motion, line));
        prop_assert!(intersects(line, motion));
        prop_assert!(intersects((case.after, case.before), (case.p2, case.p1)));
    }

    #[test]
    fn test_track_bounded_and_ordered(
        capacity in 1usize..8,
        times in proptest::collection::vec(-10.0..10.0f64, 0..64),
    ) {
        let mut track = EntityTrack::new(blue(), capacity);
        for t in times {
            track.push(Sample::new(Point::new(t, t), t));
            prop_assert!(track.len() <= capacity);
        }
        let stored: Vec<f64> = track.samples().map(|s| s.timestamp).collect();
        prop_assert!(stored.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_penalty_charged_to_next_lap_only(
        penalties in proptest::collection::vec(0.0..10.0f64, 1..5),
    ) {
        let mut race = running_race(Point::new(0.0, 100.0), Point::new(640.0, 100.0));
        let id = blue();
        let pass = |race: &mut RaceState, t: f64| {
            race.update(&id, Point::new(100.0, 90.0), t).unwrap();
            race.update(&id, Point::new(100.0, 110.0), t + 0.1).unwrap()
        };

        pass(&mut race, 0.0);
        let total: f64 = penalties.iter().sum();
        for p in &penalties {
            race.apply_penalty(&id, *p).unwrap();
        }

        let lap = pass(&mut race, 5.0).lap().cloned().unwrap();
        prop_assert!((lap.penalty_seconds - total).abs() < 1e-9);

        let next = pass(&mut race, 10.0).lap().cloned().unwrap();
        prop_assert_eq!(next.penalty_seconds, 0.0);
        prop_assert_eq!(race.laps(&id)[0].penalty_seconds, lap.penalty_seconds);
    }

    #[test]
    fn test_reset_idempotent(
        case in crossing_case(),
        penalty in 0.0..10.0f64,
    ) {
        let mut race = running_race(case.p1, case.p2);
        let id = blue();
        race.update(&id, case.before, 0.0).unwrap();
        race.update(&id, case.after, 0.5).unwrap();
        race.apply_penalty(&id, penalty).unwrap();

        race.reset();
        let once = race.snapshot();
        race.reset();
        prop_assert_eq!(once, race.snapshot());
        prop_assert_eq!(race.pending_penalty(&id), 0.0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_scenarios_hold_across_seeds(seed in 1u64..10_000) {
        let runner = ScenarioRunner::new(seed).with_duration(25.0);
        for scenario in [ScenarioId::NoisyDetector, ScenarioId::Occlusion, ScenarioId::LineDwell] {
            let result = runner.run(scenario);
            prop_assert!(result.passed, "{} seed={}: {:?}", scenario, seed, result.failure_reason);
        }
    }
}
