mod brackets;
mod combine;
mod convert;
mod engine;
mod error;
mod invert;
mod schedule;
mod tree;
mod types;

pub use brackets::BracketSequence;
pub use combine::combine_into;
pub use convert::{average_to_marginal, marginal_to_average};
pub use engine::{evaluate, evaluate_par, weighted_total};
pub use error::{BaremeError, Result};
pub use invert::invert;
pub use schedule::{DEFAULT_NAME, Schedule};
pub use tree::{ScheduleNode, ScheduleTree, combine_all, scale_all};
pub use types::{
    AverageBracket, AverageThreshold, Bracket, Evaluation, EvaluationMode, ParameterValue,
};
