//! Line formats exchanged with the optimizer.
//!
//! ```text
//! proposal    instance0 0 18000.0 2147483647 4 -x0 '6.98' -x_int0 '3' -x_categorical_kernel 'rbf'
//! report      Result for ParamILS: SAT, 0.012000, 0, 0.397887, 4
//! trajectory  12.84, 0.542677, 1.979, 100, 2.84,  x0='3.23', x1='1.88'
//! ```
//!
//! Every function here is pure. Tags are resolved through the
//! [`DimensionRegistry`]; a tag it does not know is an error rather than a
//! silently dropped value, since dropping would shift the positional vectors.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;

use smac_types::{
    BestTrajectory, CategoricalParam, EvaluationResult, ParameterAssignment, ParameterValue,
    ProposedParameters, ProtocolError,
};

use crate::registry::{DimensionKind, DimensionRegistry};

/// Smallest runtime ever reported. The optimizer requires a strictly positive
/// runtime and this is the smallest value that stays positive at six decimals.
pub const MIN_REPORTED_RUNTIME: f64 = 1e-6;

const REPORT_PREFIX: &str = "Result for ParamILS:";
const PROPOSAL_METADATA_FIELDS: usize = 5;
const TRAJECTORY_PARAM_OFFSET: usize = 5;

/// Parse a proposal line into a fully bound assignment.
pub fn parse_proposal(
    line: &str,
    registry: &DimensionRegistry,
) -> Result<ProposedParameters, ProtocolError> {
    let malformed = |reason: String| ProtocolError::MalformedProposal {
        line: line.trim().to_string(),
        reason,
    };

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < PROPOSAL_METADATA_FIELDS {
        return Err(malformed(format!(
            "expected {PROPOSAL_METADATA_FIELDS} metadata fields, got {}",
            tokens.len()
        )));
    }

    let pairs = &tokens[PROPOSAL_METADATA_FIELDS..];
    if pairs.len() % 2 != 0 {
        return Err(malformed(format!(
            "odd number of parameter tokens ({})",
            pairs.len()
        )));
    }

    let mut builder = AssignmentBuilder::new(registry);
    for pair in pairs.chunks(2) {
        let tag = pair[0]
            .strip_prefix('-')
            .ok_or_else(|| malformed(format!("parameter flag {} lacks a leading '-'", pair[0])))?;
        builder.set(tag, pair[1]).map_err(malformed)?;
    }

    Ok(ProposedParameters {
        instance: tokens[0].to_string(),
        seed: tokens[1].parse().ok(),
        values: builder.finish().map_err(malformed)?,
    })
}

/// Parse one data line of the trajectory log.
pub fn parse_trajectory(
    line: &str,
    registry: &DimensionRegistry,
) -> Result<BestTrajectory, ProtocolError> {
    let mut reader = trajectory_reader(false).from_reader(line.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) => parse_trajectory_record(&record, registry),
        Some(Err(e)) => Err(ProtocolError::MalformedTrajectory {
            line: line.trim().to_string(),
            reason: e.to_string(),
        }),
        None => Err(ProtocolError::MalformedTrajectory {
            line: line.trim().to_string(),
            reason: "empty line".to_string(),
        }),
    }
}

/// Reader settings for the trajectory log: ragged rows, padded fields.
pub fn trajectory_reader(has_headers: bool) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.has_headers(has_headers).flexible(true).trim(Trim::All);
    builder
}

/// Parse one trajectory record: column 1 is the incumbent's cost, columns
/// from 5 on are `tag='value'` assignments.
pub fn parse_trajectory_record(
    record: &StringRecord,
    registry: &DimensionRegistry,
) -> Result<BestTrajectory, ProtocolError> {
    let malformed = |reason: String| ProtocolError::MalformedTrajectory {
        line: record.iter().collect::<Vec<_>>().join(", "),
        reason,
    };

    if record.len() < TRAJECTORY_PARAM_OFFSET {
        return Err(malformed(format!(
            "expected at least {TRAJECTORY_PARAM_OFFSET} columns, got {}",
            record.len()
        )));
    }

    let cost = record.get(1).unwrap_or("");
    let objective_value = cost
        .parse::<f64>()
        .map_err(|_| malformed(format!("objective value {cost:?} is not a number")))?;

    let mut builder = AssignmentBuilder::new(registry);
    for field in record.iter().skip(TRAJECTORY_PARAM_OFFSET) {
        if field.is_empty() {
            continue;
        }
        let (tag, value) = field
            .split_once('=')
            .ok_or_else(|| malformed(format!("field {field:?} is not a name='value' assignment")))?;
        builder.set(tag.trim(), value).map_err(malformed)?;
    }

    Ok(BestTrajectory {
        parameters: builder.finish().map_err(malformed)?,
        objective_value,
    })
}

/// Render the report line sent back for one evaluation.
pub fn format_report(performance: f64, runtime: f64) -> String {
    // f64::max also maps a NaN runtime to the minimum.
    let runtime = runtime.max(MIN_REPORTED_RUNTIME);
    format!("{REPORT_PREFIX} SAT, {runtime:.6}, 0, {performance:.6}, 4")
}

/// Parse a report line back into its runtime and performance fields.
pub fn parse_report(line: &str) -> Result<EvaluationResult, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::MalformedReport {
        line: line.trim().to_string(),
        reason: reason.to_string(),
    };

    let body = line
        .trim()
        .strip_prefix(REPORT_PREFIX)
        .ok_or_else(|| malformed("missing result prefix"))?;
    let fields: Vec<&str> = body.split(',').map(str::trim).collect();
    if fields.len() < 5 {
        return Err(malformed("expected five fields"));
    }

    let wall_time_seconds = fields[1]
        .parse::<f64>()
        .map_err(|_| malformed("runtime is not a number"))?;
    let performance = fields[3]
        .parse::<f64>()
        .map_err(|_| malformed("quality is not a number"))?;

    Ok(EvaluationResult {
        performance,
        wall_time_seconds,
    })
}

/// Collects tagged values into positional slots and refuses to finish until
/// every dimension has exactly one value.
struct AssignmentBuilder<'a> {
    registry: &'a DimensionRegistry,
    continuous: Vec<Option<f64>>,
    integer: Vec<Option<i64>>,
    categorical: Vec<(String, Option<ParameterValue>)>,
}

impl<'a> AssignmentBuilder<'a> {
    fn new(registry: &'a DimensionRegistry) -> Self {
        let categorical = registry
            .dimensions()
            .iter()
            .filter_map(|d| match &d.kind {
                DimensionKind::Categorical(param) => Some((param.name.clone(), None)),
                _ => None,
            })
            .collect();
        Self {
            registry,
            continuous: vec![None; registry.continuous_len()],
            integer: vec![None; registry.integer_len()],
            categorical,
        }
    }

    fn set(&mut self, tag: &str, raw: &str) -> Result<(), String> {
        let dim = self
            .registry
            .lookup(tag)
            .ok_or_else(|| format!("unknown parameter {tag}"))?;
        let value = strip_quotes(raw);

        let slot_filled = match &dim.kind {
            DimensionKind::Continuous { index, .. } => {
                let parsed = value
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| format!("{tag} value {value:?} is not a real number"))?;
                self.continuous[*index].replace(parsed).is_some()
            }
            DimensionKind::Integer { index, .. } => {
                let parsed = parse_integer(value)
                    .ok_or_else(|| format!("{tag} value {value:?} is not an integer"))?;
                self.integer[*index].replace(parsed).is_some()
            }
            DimensionKind::Categorical(param) => {
                let parsed = parse_choice(param, value)
                    .ok_or_else(|| format!("{tag} value {value:?} is not a declared choice"))?;
                let slot = self
                    .categorical
                    .iter_mut()
                    .find(|(name, _)| *name == param.name)
                    .ok_or_else(|| format!("unknown parameter {tag}"))?;
                slot.1.replace(parsed).is_some()
            }
        };

        if slot_filled {
            return Err(format!("duplicate value for {tag}"));
        }
        Ok(())
    }

    fn finish(self) -> Result<ParameterAssignment, String> {
        let missing = |tag: &str| format!("missing value for {tag}");
        let dims = self.registry.dimensions();

        let continuous = self
            .continuous
            .iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| missing(&dims[i].tag)))
            .collect::<Result<Vec<_>, _>>()?;

        let offset = self.registry.continuous_len();
        let integer = self
            .integer
            .iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| missing(&dims[offset + i].tag)))
            .collect::<Result<Vec<_>, _>>()?;

        let categorical: HashMap<String, ParameterValue> = self
            .categorical
            .into_iter()
            .map(|(name, v)| match v {
                Some(value) => Ok((name, value)),
                None => Err(missing(&name)),
            })
            .collect::<Result<_, String>>()?;

        Ok(ParameterAssignment {
            continuous,
            integer,
            categorical,
        })
    }
}

fn strip_quotes(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '\'' || c == '"')
}

fn parse_integer(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().or_else(|| {
        let v = value.parse::<f64>().ok()?;
        (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
    })
}

/// Recover the declared choice `value` names, keeping the choice's type:
/// numeric choices compare numerically, everything else by rendered text.
fn parse_choice(param: &CategoricalParam, value: &str) -> Option<ParameterValue> {
    if let Some(choice) = param.choices.iter().find(|c| c.to_string() == value) {
        return Some(choice.clone());
    }
    let number = value.parse::<f64>().ok()?;
    param
        .choices
        .iter()
        .find(|c| c.as_f64() == Some(number))
        .cloned()
}
