use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BaremeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("schedule has no brackets")]
    EmptySchedule,

    #[error("inversion undefined: marginal rate is 1 at threshold {threshold}")]
    UndefinedInversion { threshold: f64 },

    #[error("shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, BaremeError>;

pub(crate) fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(BaremeError::InvalidArgument(format!(
            "{name} must be finite, got {value}"
        )))
    }
}
