use rayon::prelude::*;
use tracing::debug;

use super::brackets::BracketSequence;
use super::convert::marginal_to_average;
use super::error::{BaremeError, Result};
use super::schedule::Schedule;
use super::types::{Evaluation, EvaluationMode};

const PAR_MIN_LEN: usize = 4096;

pub fn evaluate(bases: &[f64], schedule: &Schedule, with_bracket_index: bool) -> Result<Evaluation> {
    let evaluator = Evaluator::new(schedule)?;
    debug!(
        event = "evaluate",
        schedule = schedule.name(),
        mode = ?schedule.mode(),
        bases = bases.len(),
    );

    let amounts = bases.iter().map(|x| evaluator.amount(*x)).collect();
    let bracket_index = with_bracket_index
        .then(|| bases.iter().map(|x| evaluator.bracket_index(*x)).collect());
    Ok(Evaluation {
        amounts,
        bracket_index,
    })
}

pub fn evaluate_par(
    bases: &[f64],
    schedule: &Schedule,
    with_bracket_index: bool,
) -> Result<Evaluation> {
    let evaluator = Evaluator::new(schedule)?;
    debug!(
        event = "evaluate_par",
        schedule = schedule.name(),
        mode = ?schedule.mode(),
        bases = bases.len(),
    );

    let amounts = bases
        .par_iter()
        .with_min_len(PAR_MIN_LEN)
        .map(|x| evaluator.amount(*x))
        .collect();
    let bracket_index = with_bracket_index.then(|| {
        bases
            .par_iter()
            .with_min_len(PAR_MIN_LEN)
            .map(|x| evaluator.bracket_index(*x))
            .collect()
    });
    Ok(Evaluation {
        amounts,
        bracket_index,
    })
}

pub fn weighted_total(amounts: &[f64], weights: &[f64]) -> Result<f64> {
    if amounts.len() != weights.len() {
        return Err(BaremeError::ShapeMismatch {
            expected: amounts.len(),
            actual: weights.len(),
        });
    }
    Ok(amounts.iter().zip(weights).map(|(a, w)| a * w).sum())
}

impl Schedule {
    pub fn evaluate(&self, bases: &[f64], with_bracket_index: bool) -> Result<Evaluation> {
        evaluate(bases, self, with_bracket_index)
    }
}

struct Evaluator<'a> {
    brackets: &'a BracketSequence,
    kind: EvaluatorKind,
}

enum EvaluatorKind {
    Marginal,
    Flat(f64),
    Linear(LinearAverage),
}

/// Average-rate curve: `average[j]` is the average rate at `thresholds[j + 1]`,
/// the last entry is the top marginal rate, and `slopes[j]` is the average-rate
/// slope on `[thresholds[j], thresholds[j + 1])`.
struct LinearAverage {
    thresholds: Vec<f64>,
    average: Vec<f64>,
    slopes: Vec<f64>,
}

impl<'a> Evaluator<'a> {
    fn new(schedule: &'a Schedule) -> Result<Self> {
        let brackets = schedule.brackets();
        let kind = match schedule.mode() {
            EvaluationMode::Marginal => EvaluatorKind::Marginal,
            EvaluationMode::LinearAverage => linear_kind(schedule)?,
        };
        Ok(Self { brackets, kind })
    }

    fn amount(&self, x: f64) -> f64 {
        match &self.kind {
            EvaluatorKind::Marginal => marginal_amount(self.brackets, x),
            EvaluatorKind::Flat(rate) => x * rate,
            EvaluatorKind::Linear(curve) => curve.amount(x),
        }
    }

    // Thresholds strictly below `x`, minus one, floored at zero.
    fn bracket_index(&self, x: f64) -> usize {
        self.brackets
            .as_slice()
            .partition_point(|b| b.threshold < x)
            .saturating_sub(1)
    }
}

fn linear_kind(schedule: &Schedule) -> Result<EvaluatorKind> {
    let brackets = schedule.brackets();
    let stored = schedule.average_brackets();
    let table = if stored.is_empty() {
        marginal_to_average(brackets)
    } else if stored.len() == brackets.len() {
        stored.to_vec()
    } else {
        return Err(BaremeError::ShapeMismatch {
            expected: brackets.len(),
            actual: stored.len(),
        });
    };

    let average: Vec<f64> = table.iter().map(|entry| entry.rate).collect();
    match average.len() {
        0 => Ok(EvaluatorKind::Flat(0.0)),
        1 => Ok(EvaluatorKind::Flat(average[0])),
        _ => {
            let thresholds = brackets.thresholds();
            let slopes = (0..thresholds.len() - 1)
                .map(|j| {
                    let previous = if j == 0 { 0.0 } else { average[j - 1] };
                    (average[j] - previous) / (thresholds[j + 1] - thresholds[j])
                })
                .collect();
            Ok(EvaluatorKind::Linear(LinearAverage {
                thresholds,
                average,
                slopes,
            }))
        }
    }
}

fn marginal_amount(brackets: &BracketSequence, x: f64) -> f64 {
    let slice = brackets.as_slice();
    slice
        .iter()
        .enumerate()
        .map(|(i, bracket)| {
            let upper = slice.get(i + 1).map_or(f64::INFINITY, |next| next.threshold);
            bracket.rate * (x.min(upper) - bracket.threshold).max(0.0)
        })
        .sum()
}

impl LinearAverage {
    fn amount(&self, x: f64) -> f64 {
        let k = self.thresholds.len();
        let top = self.thresholds[k - 1];

        let mut amount = 0.0;
        if let Some(j) = self
            .thresholds
            .partition_point(|t| *t <= x)
            .checked_sub(1)
            .filter(|j| *j < k - 1)
        {
            amount += x * (self.slopes[j] * (x - self.thresholds[j + 1]) + self.average[j]);
        }

        // Above the top threshold: exact tax at the top plus the top marginal rate.
        amount += (x - top).max(0.0) * self.average[k - 1];
        if x >= top {
            amount += top * self.average[k - 2];
        }
        amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AverageThreshold, Bracket};
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_all_approx(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert_approx(*a, *e);
        }
    }

    fn sample_schedule() -> Schedule {
        Schedule::from_brackets(
            "ir",
            [(0.0, 0.0), (1000.0, 0.1), (3000.0, 0.2)].map(Bracket::from),
        )
        .expect("valid schedule")
    }

    #[test]
    fn marginal_mode_integrates_brackets() {
        let result = evaluate(&[500.0, 1500.0, 4000.0], &sample_schedule(), false)
            .expect("evaluates");
        assert_all_approx(&result.amounts, &[0.0, 50.0, 400.0]);
        assert!(result.bracket_index.is_none());
    }

    #[test]
    fn bracket_index_counts_thresholds_exceeded() {
        let result = evaluate(
            &[-50.0, 0.0, 500.0, 1000.0, 1000.5, 3000.0, 4000.0],
            &sample_schedule(),
            true,
        )
        .expect("evaluates");
        assert_eq!(result.bracket_index, Some(vec![0, 0, 0, 0, 1, 1, 2]));
    }

    #[test]
    fn negative_bases_fall_in_lowest_bracket() {
        let flat = Schedule::from_brackets("flat", [Bracket::new(0.0, 0.3)]).expect("valid");
        let result = evaluate(&[-100.0, 100.0], &flat, false).expect("evaluates");
        assert_all_approx(&result.amounts, &[0.0, 30.0]);
    }

    #[test]
    fn empty_schedule_evaluates_to_zero() {
        let empty = Schedule::new("empty");
        let result = evaluate(&[10.0, 20.0], &empty, true).expect("evaluates");
        assert_all_approx(&result.amounts, &[0.0, 0.0]);
        assert_eq!(result.bracket_index, Some(vec![0, 0]));

        let linear = Schedule::new("empty").with_mode(EvaluationMode::LinearAverage);
        let result = evaluate(&[10.0], &linear, false).expect("evaluates");
        assert_all_approx(&result.amounts, &[0.0]);
    }

    #[test]
    fn linear_average_reference_values() {
        let schedule = sample_schedule().with_mode(EvaluationMode::LinearAverage);
        let result = evaluate(&[500.0, 1000.0, 2000.0, 3000.0, 4000.0], &schedule, true)
            .expect("evaluates");
        assert_all_approx(
            &result.amounts,
            &[0.0, 0.0, 200.0 / 3.0, 200.0, 400.0],
        );
        assert_eq!(result.bracket_index, Some(vec![0, 0, 1, 1, 2]));
    }

    #[test]
    fn linear_average_uses_stored_table() {
        let mut schedule = sample_schedule().with_mode(EvaluationMode::LinearAverage);
        schedule.marginal_to_average();
        let derived = evaluate(&[2000.0], &schedule, false).expect("evaluates");
        assert_approx(derived.amounts[0], 200.0 / 3.0);

        schedule.set_average_rate(1, 0.1).expect("valid index");
        let edited = evaluate(&[2000.0, 3000.0], &schedule, false).expect("evaluates");
        // slope on [1000, 3000) is 0.1 / 2000
        assert_approx(edited.amounts[0], 2000.0 * (0.1 / 2000.0 * -1000.0 + 0.1));
        assert_approx(edited.amounts[1], 300.0);
    }

    #[test]
    fn linear_average_single_bracket_is_proportional() {
        let flat = Schedule::from_brackets("csg", [Bracket::new(0.0, 0.075)])
            .expect("valid")
            .with_mode(EvaluationMode::LinearAverage);
        let result = evaluate(&[0.0, 1000.0, -200.0], &flat, false).expect("evaluates");
        assert_all_approx(&result.amounts, &[0.0, 75.0, -15.0]);
    }

    #[test]
    fn linear_average_rejects_stale_table() {
        let mut schedule = sample_schedule().with_mode(EvaluationMode::LinearAverage);
        schedule.marginal_to_average();
        schedule.add_bracket(5000.0, 0.3).expect("valid bracket");
        assert_eq!(
            evaluate(&[1.0], &schedule, false),
            Err(BaremeError::ShapeMismatch {
                expected: 4,
                actual: 3
            })
        );
        schedule
            .add_average_bracket(AverageThreshold::Finite(5000.0), 0.1)
            .expect("valid entry");
        assert!(evaluate(&[1.0], &schedule, false).is_ok());
    }

    #[test]
    fn parallel_evaluation_matches_sequential() {
        let schedule = sample_schedule();
        let bases: Vec<f64> = (0..20_000).map(|i| i as f64 * 0.37).collect();
        let sequential = evaluate(&bases, &schedule, true).expect("evaluates");
        let parallel = evaluate_par(&bases, &schedule, true).expect("evaluates");
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn weighted_total_requires_matching_lengths() {
        assert_approx(
            weighted_total(&[50.0, 400.0], &[2.0, 0.5]).expect("same length"),
            300.0,
        );
        assert_eq!(
            weighted_total(&[50.0, 400.0], &[1.0]),
            Err(BaremeError::ShapeMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_proportional_schedule_scales_linearly(
            rate_bp in -5_000i32..15_000,
            factor_pct in 1u32..500,
            base in -10_000i32..1_000_000
        ) {
            let rate = rate_bp as f64 / 10_000.0;
            let k = factor_pct as f64 / 100.0;
            let x = base as f64;
            let s = Schedule::from_brackets("flat", [Bracket::new(0.0, rate)]).expect("valid");

            let s_k = s.scale(k).expect("finite factor");
            let scaled = evaluate(&[k * x], &s_k, false).expect("evaluates").amounts[0];
            let original = evaluate(&[x], &s, false).expect("evaluates").amounts[0];
            prop_assert!((scaled - k * original).abs() <= 1e-6 * (k * original).abs().max(1.0));
        }

        #[test]
        fn prop_amounts_are_monotonic_for_non_negative_rates(
            widths in proptest::collection::vec(1u32..50_000, 0..6),
            rates_bp in proptest::collection::vec(0i32..9_000, 7),
            a in 0u32..300_000,
            b in 0u32..300_000
        ) {
            let mut s = Schedule::new("m");
            let mut threshold = 0.0;
            s.add_bracket(threshold, rates_bp[0] as f64 / 10_000.0).expect("valid");
            for (i, width) in widths.iter().enumerate() {
                threshold += *width as f64;
                s.add_bracket(threshold, rates_bp[i + 1] as f64 / 10_000.0).expect("valid");
            }
            let (lo, hi) = (a.min(b) as f64, a.max(b) as f64);
            let result = evaluate(&[lo, hi], &s, true).expect("evaluates");
            prop_assert!(result.amounts[0] <= result.amounts[1] + 1e-9);
            let index = result.bracket_index.expect("requested");
            prop_assert!(index[0] <= index[1]);
            prop_assert!(index[1] < s.len());
        }
    }
}
