use super::error::{BaremeError, Result, ensure_finite};
use super::types::Bracket;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BracketSequence {
    brackets: Vec<Bracket>,
}

impl BracketSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_brackets<I>(brackets: I) -> Result<Self>
    where
        I: IntoIterator<Item = Bracket>,
    {
        let mut sequence = Self::new();
        for bracket in brackets {
            sequence.add(bracket.threshold, bracket.rate)?;
        }
        Ok(sequence)
    }

    pub fn len(&self) -> usize {
        self.brackets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brackets.is_empty()
    }

    pub fn as_slice(&self) -> &[Bracket] {
        &self.brackets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bracket> {
        self.brackets.iter()
    }

    pub fn first(&self) -> Option<&Bracket> {
        self.brackets.first()
    }

    pub fn last(&self) -> Option<&Bracket> {
        self.brackets.last()
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.brackets.iter().map(|b| b.threshold).collect()
    }

    pub fn rates(&self) -> Vec<f64> {
        self.brackets.iter().map(|b| b.rate).collect()
    }

    pub fn contains_threshold(&self, threshold: f64) -> bool {
        self.position(threshold).is_some()
    }

    pub fn position(&self, threshold: f64) -> Option<usize> {
        let idx = self.lower_bound(threshold);
        (idx < self.brackets.len() && self.brackets[idx].threshold == threshold).then_some(idx)
    }

    pub fn prevailing_index(&self, x: f64) -> Option<usize> {
        self.brackets
            .partition_point(|b| b.threshold <= x)
            .checked_sub(1)
    }

    /// Marginal rate in force at `x`; zero below the first threshold.
    pub fn rate_at(&self, x: f64) -> f64 {
        self.prevailing_index(x)
            .map(|idx| self.brackets[idx].rate)
            .unwrap_or(0.0)
    }

    /// Inserts a bracket, or sums `rate` into the existing one at `threshold`.
    /// Returns the bracket's index.
    pub fn add(&mut self, threshold: f64, rate: f64) -> Result<usize> {
        ensure_finite("threshold", threshold)?;
        ensure_finite("rate", rate)?;
        if threshold < 0.0 {
            return Err(BaremeError::InvalidArgument(format!(
                "threshold must be >= 0, got {threshold}"
            )));
        }
        Ok(self.merge(threshold, rate))
    }

    pub(crate) fn merge(&mut self, threshold: f64, rate: f64) -> usize {
        let idx = self.lower_bound(threshold);
        if idx < self.brackets.len() && self.brackets[idx].threshold == threshold {
            self.brackets[idx].rate += rate;
        } else {
            self.brackets.insert(idx, Bracket::new(threshold, rate));
        }
        idx
    }

    pub(crate) fn push_sorted(&mut self, bracket: Bracket) {
        debug_assert!(self.last().is_none_or(|last| last.threshold < bracket.threshold));
        self.brackets.push(bracket);
    }

    pub fn remove_last(&mut self) -> Result<Bracket> {
        self.brackets.pop().ok_or(BaremeError::EmptySchedule)
    }

    /// Rebuilds the sequence with bracket `index` moved to `value`. A collision
    /// with another threshold merges the two rates. Returns the rebuilt
    /// sequence and the moved bracket's new index.
    pub fn with_threshold(&self, index: usize, value: f64) -> Result<(Self, usize)> {
        let moved = self.bracket_at(index)?;
        let mut rebuilt = Self {
            brackets: self
                .brackets
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, b)| *b)
                .collect(),
        };
        let new_index = rebuilt.add(value, moved.rate)?;
        Ok((rebuilt, new_index))
    }

    pub fn with_rate(&self, index: usize, value: f64) -> Result<Self> {
        self.bracket_at(index)?;
        ensure_finite("rate", value)?;
        let mut rebuilt = self.clone();
        rebuilt.brackets[index].rate = value;
        Ok(rebuilt)
    }

    /// Adds `rate` to every bracket whose threshold lies in `[lo, hi)`, or in
    /// `[lo, +inf)` when `hi` is `None`.
    pub(crate) fn add_rate_in_range(&mut self, lo: f64, hi: Option<f64>, rate: f64) {
        let start = self.lower_bound(lo);
        let end = match hi {
            Some(hi) => self.lower_bound(hi),
            None => self.brackets.len(),
        };
        if start >= end {
            return;
        }
        for bracket in &mut self.brackets[start..end] {
            bracket.rate += rate;
        }
    }

    /// Applies `f` to every threshold without validation; resulting
    /// collisions are merged by summing rates.
    pub(crate) fn map_thresholds<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        let mut mapped = Self::new();
        for bracket in &self.brackets {
            mapped.merge(f(bracket.threshold), bracket.rate);
        }
        mapped
    }

    pub(crate) fn map_rates<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            brackets: self
                .brackets
                .iter()
                .map(|b| Bracket::new(b.threshold, f(b.rate)))
                .collect(),
        }
    }

    fn bracket_at(&self, index: usize) -> Result<Bracket> {
        if self.brackets.is_empty() {
            return Err(BaremeError::EmptySchedule);
        }
        self.brackets.get(index).copied().ok_or_else(|| {
            BaremeError::InvalidArgument(format!(
                "bracket index {index} out of range for {} brackets",
                self.brackets.len()
            ))
        })
    }

    fn lower_bound(&self, threshold: f64) -> usize {
        self.brackets.partition_point(|b| b.threshold < threshold)
    }
}

impl<'a> IntoIterator for &'a BracketSequence {
    type Item = &'a Bracket;
    type IntoIter = std::slice::Iter<'a, Bracket>;

    fn into_iter(self) -> Self::IntoIter {
        self.brackets.iter()
    }
}
