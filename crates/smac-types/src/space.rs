//! Search space definitions: continuous ranges, integer ranges and
//! categorical choices.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::SpaceError;

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A group of bounded numeric dimensions held as parallel sequences.
///
/// The positional layout mirrors the `x0 / xmin / xmax` calling convention, so
/// the sequences can disagree in length until [`ParameterSpace::validate`]
/// has checked them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeGroup<T> {
    pub names: Vec<String>,
    pub lower: Vec<T>,
    pub upper: Vec<T>,
    pub defaults: Vec<T>,
}

impl<T> RangeGroup<T> {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            lower: Vec::new(),
            upper: Vec::new(),
            defaults: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn push(&mut self, name: String, lower: T, upper: T, default: T) {
        self.names.push(name);
        self.lower.push(lower);
        self.upper.push(upper);
        self.defaults.push(default);
    }

    fn check_shape(&self, group: &'static str) -> Result<(), SpaceError> {
        let n = self.names.len();
        if self.lower.len() != n || self.upper.len() != n || self.defaults.len() != n {
            return Err(SpaceError::ShapeMismatch {
                group,
                names: n,
                lower: self.lower.len(),
                upper: self.upper.len(),
                defaults: self.defaults.len(),
            });
        }
        Ok(())
    }
}

impl<T: PartialOrd + std::fmt::Display> RangeGroup<T> {
    fn check_ranges(&self) -> Result<(), SpaceError> {
        for (i, name) in self.names.iter().enumerate() {
            let (lower, upper, default) = (&self.lower[i], &self.upper[i], &self.defaults[i]);
            // Written as negations so NaN bounds are rejected too.
            if !(lower < upper) {
                return Err(SpaceError::RangeError {
                    name: name.clone(),
                    message: format!("lower bound {lower} must be below upper bound {upper}"),
                });
            }
            if !(lower <= default && default <= upper) {
                return Err(SpaceError::RangeError {
                    name: name.clone(),
                    message: format!("default {default} outside [{lower}, {upper}]"),
                });
            }
        }
        Ok(())
    }
}

impl<T> Default for RangeGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A categorical dimension. The first choice is the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalParam {
    pub name: String,
    pub choices: Vec<ParameterValue>,
}

impl CategoricalParam {
    pub fn default_value(&self) -> Option<&ParameterValue> {
        self.choices.first()
    }

    /// True when every choice is a number, so received values are parsed
    /// numerically rather than matched as text.
    pub fn is_numeric(&self) -> bool {
        !self.choices.is_empty() && self.choices.iter().all(ParameterValue::is_numeric)
    }
}

/// The full search space.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub continuous: RangeGroup<f64>,
    pub integer: RangeGroup<i64>,
    pub categorical: Vec<CategoricalParam>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a purely continuous space from positional vectors, naming the
    /// dimensions `x0, x1, ...`.
    pub fn from_bounds(defaults: &[f64], lower: &[f64], upper: &[f64]) -> Self {
        Self {
            continuous: RangeGroup {
                names: (0..defaults.len()).map(|i| format!("x{i}")).collect(),
                lower: lower.to_vec(),
                upper: upper.to_vec(),
                defaults: defaults.to_vec(),
            },
            ..Self::default()
        }
    }

    /// Add positional integer dimensions named `x_int0, x_int1, ...`.
    pub fn with_integer_bounds(mut self, defaults: &[i64], lower: &[i64], upper: &[i64]) -> Self {
        let offset = self.integer.names.len();
        self.integer
            .names
            .extend((0..defaults.len()).map(|i| format!("x_int{}", offset + i)));
        self.integer.lower.extend_from_slice(lower);
        self.integer.upper.extend_from_slice(upper);
        self.integer.defaults.extend_from_slice(defaults);
        self
    }

    pub fn add_continuous(mut self, name: impl Into<String>, lower: f64, upper: f64, default: f64) -> Self {
        self.continuous.push(name.into(), lower, upper, default);
        self
    }

    pub fn add_integer(mut self, name: impl Into<String>, lower: i64, upper: i64, default: i64) -> Self {
        self.integer.push(name.into(), lower, upper, default);
        self
    }

    pub fn add_categorical<V: Into<ParameterValue>>(
        mut self,
        name: impl Into<String>,
        choices: impl IntoIterator<Item = V>,
    ) -> Self {
        self.categorical.push(CategoricalParam {
            name: name.into(),
            choices: choices.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Total number of dimensions across all groups.
    pub fn dimension_count(&self) -> usize {
        self.continuous.len() + self.integer.len() + self.categorical.len()
    }

    /// Check shapes, bounds, defaults and names. No side effects.
    pub fn validate(&self) -> Result<(), SpaceError> {
        self.continuous.check_shape("continuous")?;
        self.integer.check_shape("integer")?;
        self.continuous.check_ranges()?;
        self.integer.check_ranges()?;

        for param in &self.categorical {
            if param.choices.is_empty() {
                return Err(SpaceError::EmptyChoices {
                    name: param.name.clone(),
                });
            }
            let mut rendered = HashSet::new();
            for choice in &param.choices {
                if !rendered.insert(choice.to_string()) {
                    return Err(SpaceError::DuplicateChoice {
                        name: param.name.clone(),
                        choice: choice.to_string(),
                    });
                }
                let valid = match choice {
                    ParameterValue::Text(text) => is_valid_name(text),
                    ParameterValue::Float(v) => v.is_finite(),
                    _ => true,
                };
                if !valid {
                    return Err(SpaceError::InvalidChoice {
                        name: param.name.clone(),
                        choice: choice.to_string(),
                    });
                }
            }
        }

        let mut seen = HashSet::new();
        let names = self
            .continuous
            .names
            .iter()
            .chain(&self.integer.names)
            .chain(self.categorical.iter().map(|p| &p.name));
        for name in names {
            if !is_valid_name(name) {
                return Err(SpaceError::InvalidName { name: name.clone() });
            }
            if !seen.insert(name.as_str()) {
                return Err(SpaceError::DuplicateName { name: name.clone() });
            }
        }

        Ok(())
    }
}

/// Names and text choices end up verbatim in the parameter file and in
/// `name='value'` trajectory fields.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || "'\"=,{}[]".contains(c))
}
