use tracing::debug;

use super::brackets::BracketSequence;
use super::error::{BaremeError, Result};
use super::schedule::Schedule;

/// Net-to-gross schedule: if `net = gross - tax(gross, schedule)` then
/// `gross = tax(net, invert(schedule))`.
///
/// Gross income is piecewise linear in net income. For each bracket the net
/// threshold is `(1 - previous_rate) * threshold + intercept`, and its slope is
/// `1 / (1 - rate)`. A schedule starting above zero behaves as if it opened
/// with a zero-rate bracket at zero, so the inverse then starts at rate 1.
pub fn invert(schedule: &Schedule) -> Result<Schedule> {
    if schedule.is_empty() {
        return Err(BaremeError::EmptySchedule);
    }

    let mut inverted = BracketSequence::new();
    if schedule.brackets().first().is_some_and(|b| b.threshold > 0.0) {
        inverted.merge(0.0, 1.0);
    }
    let mut previous_rate = 0.0;
    let mut intercept = 0.0;
    for bracket in schedule.brackets() {
        if bracket.rate == 1.0 {
            return Err(BaremeError::UndefinedInversion {
                threshold: bracket.threshold,
            });
        }
        let net_threshold = (1.0 - previous_rate) * bracket.threshold + intercept;
        inverted.add(net_threshold, 1.0 / (1.0 - bracket.rate))?;
        intercept += (bracket.rate - previous_rate) * bracket.threshold;
        previous_rate = bracket.rate;
    }

    debug!(
        event = "invert",
        schedule = schedule.name(),
        brackets = inverted.len(),
    );
    Ok(Schedule::from_sequence(
        format!("{}'", schedule.name()),
        inverted,
    ))
}

impl Schedule {
    pub fn inverted(&self) -> Result<Schedule> {
        invert(self)
    }
}
