use std::fmt;

use super::brackets::BracketSequence;
use super::convert;
use super::error::{BaremeError, Result, ensure_finite};
use super::types::{AverageBracket, AverageThreshold, Bracket, EvaluationMode};

pub const DEFAULT_NAME: &str = "untitled";

#[derive(Debug, Clone)]
pub struct Schedule {
    name: String,
    brackets: BracketSequence,
    average: Vec<AverageBracket>,
    mode: EvaluationMode,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new(DEFAULT_NAME)
    }
}

impl Schedule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            brackets: BracketSequence::new(),
            average: Vec::new(),
            mode: EvaluationMode::Marginal,
        }
    }

    pub fn from_brackets<I>(name: impl Into<String>, brackets: I) -> Result<Self>
    where
        I: IntoIterator<Item = Bracket>,
    {
        let mut schedule = Self::new(name);
        schedule.brackets = BracketSequence::from_brackets(brackets)?;
        Ok(schedule)
    }

    pub(crate) fn from_sequence(name: impl Into<String>, brackets: BracketSequence) -> Self {
        let mut schedule = Self::new(name);
        schedule.brackets = brackets;
        schedule
    }

    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: EvaluationMode) {
        self.mode = mode;
    }

    pub fn brackets(&self) -> &BracketSequence {
        &self.brackets
    }

    pub(crate) fn brackets_mut(&mut self) -> &mut BracketSequence {
        &mut self.brackets
    }

    pub fn len(&self) -> usize {
        self.brackets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brackets.is_empty()
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.brackets.thresholds()
    }

    pub fn rates(&self) -> Vec<f64> {
        self.brackets.rates()
    }

    pub fn rate_at(&self, x: f64) -> f64 {
        self.brackets.rate_at(x)
    }

    pub fn add_bracket(&mut self, threshold: f64, rate: f64) -> Result<()> {
        self.brackets.add(threshold, rate).map(|_| ())
    }

    pub fn remove_last_bracket(&mut self) -> Result<Bracket> {
        self.brackets.remove_last()
    }

    /// Moves bracket `index` to `value` and returns where it now sits; indices
    /// of the other brackets may shift as well.
    pub fn set_threshold(&mut self, index: usize, value: f64) -> Result<usize> {
        let (rebuilt, new_index) = self.brackets.with_threshold(index, value)?;
        self.brackets = rebuilt;
        Ok(new_index)
    }

    pub fn set_rate(&mut self, index: usize, value: f64) -> Result<()> {
        self.brackets = self.brackets.with_rate(index, value)?;
        Ok(())
    }

    /// Thresholds multiplied by `factor`, rates untouched. Only finite factors
    /// are accepted; zero or negative ones yield a degenerate schedule.
    pub fn scale(&self, factor: f64) -> Result<Schedule> {
        ensure_finite("factor", factor)?;
        Ok(Schedule {
            name: self.name.clone(),
            brackets: self.brackets.map_thresholds(|t| t * factor),
            average: Vec::new(),
            mode: self.mode,
        })
    }

    pub fn scale_rates(&self, factor: f64) -> Result<Schedule> {
        ensure_finite("factor", factor)?;
        Ok(Schedule {
            name: self.name.clone(),
            brackets: self.brackets.map_rates(|r| r * factor),
            average: Vec::new(),
            mode: self.mode,
        })
    }

    pub fn average_brackets(&self) -> &[AverageBracket] {
        &self.average
    }

    pub fn add_average_bracket(&mut self, threshold: AverageThreshold, rate: f64) -> Result<()> {
        insert_average(&mut self.average, threshold, rate).map(|_| ())
    }

    /// Moves average entry `index` to `threshold` and returns its new index.
    /// Landing on an existing threshold sums the two rates.
    pub fn set_average_threshold(
        &mut self,
        index: usize,
        threshold: AverageThreshold,
    ) -> Result<usize> {
        let moved = self.average_entry(index)?;
        let mut rebuilt = self.average.clone();
        rebuilt.remove(index);
        let new_index = insert_average(&mut rebuilt, threshold, moved.rate)?;
        self.average = rebuilt;
        Ok(new_index)
    }

    pub fn set_average_rate(&mut self, index: usize, value: f64) -> Result<()> {
        ensure_finite("average rate", value)?;
        self.average_entry(index)?;
        self.average[index].rate = value;
        Ok(())
    }

    fn average_entry(&self, index: usize) -> Result<AverageBracket> {
        self.average.get(index).copied().ok_or_else(|| {
            BaremeError::InvalidArgument(format!(
                "average index {index} out of range for {} entries",
                self.average.len()
            ))
        })
    }

    pub fn marginal_to_average(&mut self) {
        self.average = convert::marginal_to_average(&self.brackets);
    }

    pub fn average_to_marginal(&mut self) -> Result<()> {
        self.brackets = convert::average_to_marginal(&self.average)?;
        Ok(())
    }
}

// Finite thresholds ascending, the infinite sentinel last.
fn insert_average(
    table: &mut Vec<AverageBracket>,
    threshold: AverageThreshold,
    rate: f64,
) -> Result<usize> {
    ensure_finite("average rate", rate)?;
    let idx = match threshold {
        AverageThreshold::Finite(t) => {
            ensure_finite("average threshold", t)?;
            if t < 0.0 {
                return Err(BaremeError::InvalidArgument(format!(
                    "average threshold must be >= 0, got {t}"
                )));
            }
            table.partition_point(|entry| match entry.threshold {
                AverageThreshold::Finite(x) => x < t,
                AverageThreshold::Infinite => false,
            })
        }
        AverageThreshold::Infinite => table
            .iter()
            .position(|entry| entry.threshold.is_infinite())
            .unwrap_or(table.len()),
    };
    if idx < table.len() && table[idx].threshold == threshold {
        table[idx].rate += rate;
    } else {
        table.insert(idx, AverageBracket { threshold, rate });
    }
    Ok(idx)
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.brackets == other.brackets
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        for bracket in &self.brackets {
            writeln!(f, "{}  {}", bracket.threshold, bracket.rate)?;
        }
        Ok(())
    }
}
