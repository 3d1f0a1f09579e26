use std::collections::BTreeMap;

use tracing::debug;

use super::brackets::BracketSequence;
use super::error::{Result, ensure_finite};
use super::schedule::Schedule;
use super::types::ParameterValue;

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleNode {
    Schedule(Schedule),
    Tree(ScheduleTree),
    Parameter(ParameterValue),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleTree {
    nodes: BTreeMap<String, ScheduleNode>,
}

impl ScheduleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, node: ScheduleNode) -> Option<ScheduleNode> {
        self.nodes.insert(name.into(), node)
    }

    pub fn insert_schedule(&mut self, name: impl Into<String>, schedule: Schedule) {
        self.insert(name, ScheduleNode::Schedule(schedule));
    }

    pub fn insert_tree(&mut self, name: impl Into<String>, tree: ScheduleTree) {
        self.insert(name, ScheduleNode::Tree(tree));
    }

    pub fn insert_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
    ) {
        self.insert(name, ScheduleNode::Parameter(value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&ScheduleNode> {
        self.nodes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ScheduleNode)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<(String, ScheduleNode)> for ScheduleTree {
    fn from_iter<I: IntoIterator<Item = (String, ScheduleNode)>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

/// Sums every schedule in the tree, at any depth, into one schedule seeded
/// with a zero-rate bracket at zero.
pub fn combine_all(tree: &ScheduleTree, name: &str) -> Schedule {
    let mut seed = BracketSequence::new();
    seed.merge(0.0, 0.0);
    let mut total = Schedule::from_sequence(name, seed);
    fold_into(&mut total, tree);
    debug!(event = "combine_all", schedule = name, brackets = total.len());
    total
}

fn fold_into(total: &mut Schedule, tree: &ScheduleTree) {
    for node in tree.nodes.values() {
        match node {
            ScheduleNode::Schedule(schedule) => total.combine(schedule),
            ScheduleNode::Tree(subtree) => fold_into(total, subtree),
            ScheduleNode::Parameter(_) => {}
        }
    }
}

pub fn scale_all(tree: &ScheduleTree, factor: f64) -> Result<ScheduleTree> {
    ensure_finite("factor", factor)?;
    tree.nodes
        .iter()
        .map(|(name, node)| Ok((name.clone(), scale_node(node, factor)?)))
        .collect()
}

fn scale_node(node: &ScheduleNode, factor: f64) -> Result<ScheduleNode> {
    Ok(match node {
        ScheduleNode::Schedule(schedule) => ScheduleNode::Schedule(schedule.scale(factor)?),
        ScheduleNode::Tree(subtree) => ScheduleNode::Tree(scale_all(subtree, factor)?),
        ScheduleNode::Parameter(value) => ScheduleNode::Parameter(value.clone()),
    })
}
