use tracing::debug;

use super::brackets::BracketSequence;
use super::schedule::Schedule;
use super::types::Bracket;

/// Adds `other`'s step function into `target`. Each interval of `other` is
/// first materialized in `target` at the rate already prevailing there, then
/// its rate is accumulated onto every target bracket inside the interval.
pub fn combine_into(target: &mut BracketSequence, other: &BracketSequence) {
    if other.is_empty() {
        return;
    }

    *target = materialize(target, other.iter().map(|b| b.threshold));

    let brackets = other.as_slice();
    for (i, bracket) in brackets.iter().enumerate() {
        let upper = brackets.get(i + 1).map(|next| next.threshold);
        target.add_rate_in_range(bracket.threshold, upper, bracket.rate);
    }
}

// Merges ascending `points` into `target`, giving each new threshold the
// marginal rate in force at that point (zero below the first threshold).
fn materialize<I>(target: &BracketSequence, points: I) -> BracketSequence
where
    I: IntoIterator<Item = f64>,
{
    let existing = target.as_slice();
    let mut merged = BracketSequence::new();
    let mut i = 0;
    for point in points {
        while i < existing.len() && existing[i].threshold < point {
            merged.push_sorted(existing[i]);
            i += 1;
        }
        if i < existing.len() && existing[i].threshold == point {
            continue;
        }
        merged.push_sorted(Bracket::new(point, target.rate_at(point)));
    }
    for bracket in &existing[i..] {
        merged.push_sorted(*bracket);
    }
    merged
}

impl Schedule {
    pub fn combine(&mut self, other: &Schedule) {
        debug!(
            event = "combine",
            schedule = self.name(),
            other = other.name(),
            brackets = self.len(),
            other_brackets = other.len(),
        );
        combine_into(self.brackets_mut(), other.brackets());
    }

    pub fn combined(&self, other: &Schedule) -> Schedule {
        let mut out = self.clone();
        out.combine(other);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::evaluate;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn schedule(pairs: &[(f64, f64)]) -> Schedule {
        Schedule::from_brackets("test", pairs.iter().copied().map(Bracket::from))
            .expect("valid schedule")
    }

    fn assert_rates_approx(actual: &Schedule, expected: &[(f64, f64)]) {
        assert_eq!(
            actual.thresholds(),
            expected.iter().map(|(t, _)| *t).collect::<Vec<_>>()
        );
        for (a, (_, e)) in actual.rates().iter().zip(expected) {
            assert!((a - e).abs() <= EPS, "expected rate {e}, got {a}");
        }
    }

    #[test]
    fn combine_sums_two_step_functions() {
        let mut a = schedule(&[(0.0, 0.0), (1000.0, 0.1)]);
        let b = schedule(&[(0.0, 0.0), (2000.0, 0.05)]);
        a.combine(&b);
        assert_rates_approx(&a, &[(0.0, 0.0), (1000.0, 0.1), (2000.0, 0.15)]);
        assert_eq!(b, schedule(&[(0.0, 0.0), (2000.0, 0.05)]));
    }

    #[test]
    fn combine_materializes_interior_thresholds_at_prevailing_rate() {
        let a = schedule(&[(0.0, 0.0), (1000.0, 0.1), (4000.0, 0.3)]);
        let b = schedule(&[(500.0, 0.2), (2000.0, 0.05)]);
        let c = a.combined(&b);
        assert_rates_approx(
            &c,
            &[
                (0.0, 0.0),
                (500.0, 0.2),
                (1000.0, 0.3),
                (2000.0, 0.15),
                (4000.0, 0.35),
            ],
        );
    }

    #[test]
    fn combine_with_empty_schedule_is_noop() {
        let a = schedule(&[(0.0, 0.0), (1000.0, 0.1)]);
        assert_eq!(a.combined(&Schedule::new("empty")), a);
    }

    #[test]
    fn combine_into_empty_schedule_copies_other() {
        let b = schedule(&[(0.0, 0.1), (1000.0, 0.2)]);
        assert_eq!(Schedule::new("empty").combined(&b), b);
    }

    #[test]
    fn combine_supports_negative_rates() {
        let a = schedule(&[(0.0, 0.2)]);
        let credit = schedule(&[(0.0, -0.05), (1000.0, 0.0)]);
        assert_rates_approx(&a.combined(&credit), &[(0.0, 0.15), (1000.0, 0.2)]);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_combined_schedule_is_additive(
            a_points in proptest::collection::vec((0u32..100_000, -2_000i32..8_000), 1..7),
            b_points in proptest::collection::vec((0u32..100_000, -2_000i32..8_000), 0..7),
            bases in proptest::collection::vec(-1_000i32..150_000, 1..20)
        ) {
            let build = |points: &[(u32, i32)]| {
                Schedule::from_brackets(
                    "p",
                    points.iter().map(|(t, r)| Bracket::new(*t as f64, *r as f64 / 10_000.0)),
                )
                .expect("valid schedule")
            };
            let a = build(&a_points);
            let b = build(&b_points);
            let bases: Vec<f64> = bases.iter().map(|x| *x as f64).collect();

            let combined = evaluate(&bases, &a.combined(&b), false).expect("evaluates");
            let left = evaluate(&bases, &a, false).expect("evaluates");
            let right = evaluate(&bases, &b, false).expect("evaluates");
            for i in 0..bases.len() {
                let expected = left.amounts[i] + right.amounts[i];
                prop_assert!(
                    (combined.amounts[i] - expected).abs() <= 1e-6 * expected.abs().max(1.0),
                    "base {} expected {} got {}", bases[i], expected, combined.amounts[i]
                );
            }
        }
    }
}
