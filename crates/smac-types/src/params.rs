//! Parameter assignments exchanged with the external optimizer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::space::{ParameterSpace, ParameterValue};

/// A fully bound point in a [`ParameterSpace`]: one value per dimension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterAssignment {
    pub continuous: Vec<f64>,
    pub integer: Vec<i64>,
    pub categorical: HashMap<String, ParameterValue>,
}

impl ParameterAssignment {
    /// The assignment made of every dimension's default value.
    pub fn defaults(space: &ParameterSpace) -> Self {
        Self {
            continuous: space.continuous.defaults.clone(),
            integer: space.integer.defaults.clone(),
            categorical: space
                .categorical
                .iter()
                .filter_map(|p| Some((p.name.clone(), p.default_value()?.clone())))
                .collect(),
        }
    }

    /// Look a value up by its declared name.
    pub fn get(&self, space: &ParameterSpace, name: &str) -> Option<ParameterValue> {
        if let Some(i) = space.continuous.names.iter().position(|n| n == name) {
            return self.continuous.get(i).copied().map(ParameterValue::Float);
        }
        if let Some(i) = space.integer.names.iter().position(|n| n == name) {
            return self.integer.get(i).copied().map(ParameterValue::Int);
        }
        self.categorical.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.continuous.len() + self.integer.len() + self.categorical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One candidate the external optimizer wants evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedParameters {
    /// Instance identifier sent by the optimizer (always the synthetic instance).
    pub instance: String,
    /// Seed sent by the optimizer, if it parsed as an integer.
    pub seed: Option<i64>,
    pub values: ParameterAssignment,
}

/// Outcome of one objective evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub performance: f64,
    pub wall_time_seconds: f64,
}

/// Best configuration recorded in the optimizer's trajectory log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTrajectory {
    pub parameters: ParameterAssignment,
    pub objective_value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> ParameterSpace {
        ParameterSpace::new()
            .add_continuous("lr", 0.0, 1.0, 0.25)
            .add_integer("depth", 1, 10, 4)
            .add_categorical("criterion", ["gini", "entropy"])
    }

    #[test]
    fn defaults_cover_every_dimension() {
        let space = space();
        let assignment = ParameterAssignment::defaults(&space);
        assert_eq!(assignment.continuous, vec![0.25]);
        assert_eq!(assignment.integer, vec![4]);
        assert_eq!(
            assignment.categorical.get("criterion"),
            Some(&ParameterValue::from("gini"))
        );
        assert_eq!(assignment.len(), space.dimension_count());
    }

    #[test]
    fn lookup_by_name() {
        let space = space();
        let assignment = ParameterAssignment::defaults(&space);
        assert_eq!(assignment.get(&space, "lr"), Some(ParameterValue::Float(0.25)));
        assert_eq!(assignment.get(&space, "depth"), Some(ParameterValue::Int(4)));
        assert_eq!(assignment.get(&space, "missing"), None);
    }
}
