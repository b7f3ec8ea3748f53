//! Ordered binding between dimension positions and the tags the optimizer
//! sees in the parameter file and echoes back over the socket.

use smac_types::{CategoricalParam, ParameterSpace, SmacResult};
use std::collections::HashMap;

/// Where a tag lands in a [`smac_types::ParameterAssignment`].
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionKind {
    Continuous {
        index: usize,
        lower: f64,
        upper: f64,
        default: f64,
    },
    Integer {
        index: usize,
        lower: i64,
        upper: i64,
        default: i64,
    },
    Categorical(CategoricalParam),
}

/// One dimension as the optimizer knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    /// Name written to the parameter file (`x0`, `x_int0`, `x_categorical_<name>`).
    pub tag: String,
    /// Name the caller declared.
    pub label: String,
    pub kind: DimensionKind,
}

/// Dimensions in parameter-file order: continuous, integer, categorical.
///
/// Built once from a validated space; both the scenario writer and the codec
/// read positions from here so the binding cannot drift between them.
#[derive(Debug, Clone)]
pub struct DimensionRegistry {
    dimensions: Vec<Dimension>,
    by_tag: HashMap<String, usize>,
    continuous_len: usize,
    integer_len: usize,
}

pub const CONTINUOUS_PREFIX: &str = "x";
pub const INTEGER_PREFIX: &str = "x_int";
pub const CATEGORICAL_PREFIX: &str = "x_categorical_";

impl DimensionRegistry {
    /// Validate `space` and fix its dimension order.
    pub fn new(space: &ParameterSpace) -> SmacResult<Self> {
        space.validate()?;

        let mut dimensions = Vec::with_capacity(space.dimension_count());

        let c = &space.continuous;
        for (index, name) in c.names.iter().enumerate() {
            dimensions.push(Dimension {
                tag: format!("{CONTINUOUS_PREFIX}{index}"),
                label: name.clone(),
                kind: DimensionKind::Continuous {
                    index,
                    lower: c.lower[index],
                    upper: c.upper[index],
                    default: c.defaults[index],
                },
            });
        }

        let n = &space.integer;
        for (index, name) in n.names.iter().enumerate() {
            dimensions.push(Dimension {
                tag: format!("{INTEGER_PREFIX}{index}"),
                label: name.clone(),
                kind: DimensionKind::Integer {
                    index,
                    lower: n.lower[index],
                    upper: n.upper[index],
                    default: n.defaults[index],
                },
            });
        }

        for param in &space.categorical {
            dimensions.push(Dimension {
                tag: format!("{CATEGORICAL_PREFIX}{}", param.name),
                label: param.name.clone(),
                kind: DimensionKind::Categorical(param.clone()),
            });
        }

        let by_tag = dimensions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.tag.clone(), i))
            .collect();

        Ok(Self {
            dimensions,
            by_tag,
            continuous_len: c.len(),
            integer_len: n.len(),
        })
    }

    pub fn lookup(&self, tag: &str) -> Option<&Dimension> {
        self.by_tag.get(tag).map(|&i| &self.dimensions[i])
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn continuous_len(&self) -> usize {
        self.continuous_len
    }

    pub fn integer_len(&self) -> usize {
        self.integer_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smac_types::{SmacError, SpaceError};

    #[test]
    fn tags_follow_group_order() {
        let space = ParameterSpace::new()
            .add_categorical("kernel", ["rbf", "linear"])
            .add_integer("depth", 1, 10, 3)
            .add_continuous("lr", 0.0, 1.0, 0.5)
            .add_continuous("momentum", 0.0, 1.0, 0.9);
        let registry = DimensionRegistry::new(&space).unwrap();

        let tags: Vec<&str> = registry.dimensions().iter().map(|d| d.tag.as_str()).collect();
        assert_eq!(tags, vec!["x0", "x1", "x_int0", "x_categorical_kernel"]);
        assert_eq!(registry.continuous_len(), 2);
        assert_eq!(registry.integer_len(), 1);
    }

    #[test]
    fn lookup_resolves_labels() {
        let space = ParameterSpace::new()
            .add_continuous("lr", 0.0, 1.0, 0.5)
            .add_continuous("momentum", 0.0, 1.0, 0.9);
        let registry = DimensionRegistry::new(&space).unwrap();

        let dim = registry.lookup("x1").unwrap();
        assert_eq!(dim.label, "momentum");
        assert!(matches!(dim.kind, DimensionKind::Continuous { index: 1, .. }));
        assert!(registry.lookup("x2").is_none());
        assert!(registry.lookup("x01").is_none());
    }

    #[test]
    fn invalid_space_is_rejected_before_registration() {
        let space = ParameterSpace::from_bounds(&[0.0], &[0.0, 1.0], &[1.0]);
        assert!(matches!(
            DimensionRegistry::new(&space),
            Err(SmacError::Space(SpaceError::ShapeMismatch { .. }))
        ));
    }
}
