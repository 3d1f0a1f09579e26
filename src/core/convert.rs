use super::brackets::BracketSequence;
use super::error::{BaremeError, Result};
use super::types::{AverageBracket, AverageThreshold};

/// Average rate reached at each threshold after the first, closed by the
/// infinite sentinel carrying the top marginal rate.
pub fn marginal_to_average(brackets: &BracketSequence) -> Vec<AverageBracket> {
    let Some(top) = brackets.last() else {
        return Vec::new();
    };

    let mut table = Vec::with_capacity(brackets.len());
    let mut integral = 0.0;
    let mut iter = brackets.iter();
    if let Some(first) = iter.next() {
        let mut previous = *first;
        for bracket in iter {
            integral += previous.rate * (bracket.threshold - previous.threshold);
            table.push(AverageBracket::finite(
                bracket.threshold,
                integral / bracket.threshold,
            ));
            previous = *bracket;
        }
    }
    table.push(AverageBracket::infinite(top.rate));
    table
}

pub fn average_to_marginal(table: &[AverageBracket]) -> Result<BracketSequence> {
    let Some(last) = table.last() else {
        return Err(BaremeError::EmptySchedule);
    };
    if !last.threshold.is_infinite() {
        return Err(BaremeError::InvalidArgument(
            "average table must end with the infinite sentinel".to_string(),
        ));
    }

    let mut brackets = BracketSequence::new();
    let mut previous_integral = 0.0;
    let mut previous_threshold = 0.0;
    for entry in &table[..table.len() - 1] {
        let AverageThreshold::Finite(threshold) = entry.threshold else {
            return Err(BaremeError::InvalidArgument(
                "infinite sentinel must be the last average entry".to_string(),
            ));
        };
        if threshold <= previous_threshold {
            return Err(BaremeError::InvalidArgument(format!(
                "average thresholds must be strictly increasing from 0, got {threshold} after {previous_threshold}"
            )));
        }
        let integral = entry.rate * threshold;
        brackets.add(
            previous_threshold,
            (integral - previous_integral) / (threshold - previous_threshold),
        )?;
        previous_threshold = threshold;
        previous_integral = integral;
    }
    brackets.add(previous_threshold, last.rate)?;
    Ok(brackets)
}
