use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub threshold: f64,
    pub rate: f64,
}

impl Bracket {
    pub fn new(threshold: f64, rate: f64) -> Self {
        Self { threshold, rate }
    }
}

impl From<(f64, f64)> for Bracket {
    fn from((threshold, rate): (f64, f64)) -> Self {
        Self { threshold, rate }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AverageThreshold {
    Finite(f64),
    Infinite,
}

impl AverageThreshold {
    pub fn finite(self) -> Option<f64> {
        match self {
            AverageThreshold::Finite(value) => Some(value),
            AverageThreshold::Infinite => None,
        }
    }

    pub fn is_infinite(self) -> bool {
        matches!(self, AverageThreshold::Infinite)
    }
}

impl fmt::Display for AverageThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AverageThreshold::Finite(value) => write!(f, "{value}"),
            AverageThreshold::Infinite => f.write_str("inf"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AverageBracket {
    pub threshold: AverageThreshold,
    pub rate: f64,
}

impl AverageBracket {
    pub fn finite(threshold: f64, rate: f64) -> Self {
        Self {
            threshold: AverageThreshold::Finite(threshold),
            rate,
        }
    }

    pub fn infinite(rate: f64) -> Self {
        Self {
            threshold: AverageThreshold::Infinite,
            rate,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Number(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Flag(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::Text(value)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum EvaluationMode {
    #[default]
    Marginal,
    LinearAverage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub amounts: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bracket_index: Option<Vec<usize>>,
}
