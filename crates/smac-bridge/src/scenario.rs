//! Scenario, instance and parameter-description files in the layout the
//! optimizer reads at startup.

use smac_types::{RunConfig, SmacError, SmacResult};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::registry::{DimensionKind, DimensionRegistry};

pub const SCENARIO_FILE: &str = "smac-scenario.txt";
pub const INSTANCE_FILE: &str = "instances.txt";
pub const PARAM_FILE: &str = "params.pcs";
/// The one synthetic problem instance every run presents.
pub const INSTANCE_NAME: &str = "instance0";
/// Subdirectory of the output directory holding trajectory logs.
pub const RUN_GROUP: &str = "result";

/// Paths of everything written into a run's working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioLayout {
    pub root: PathBuf,
    pub exec_dir: PathBuf,
    pub out_dir: PathBuf,
    pub scenario_file: PathBuf,
    pub instance_file: PathBuf,
    pub param_file: PathBuf,
}

impl ScenarioLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            exec_dir: root.join("exec"),
            out_dir: root.join("out"),
            scenario_file: root.join(SCENARIO_FILE),
            instance_file: root.join(INSTANCE_FILE),
            param_file: root.join(PARAM_FILE),
        }
    }

    /// Trajectory log the optimizer writes for the run with `seed`.
    pub fn trajectory_file(&self, seed: u32) -> PathBuf {
        self.out_dir
            .join(RUN_GROUP)
            .join(format!("traj-run-{seed}.txt"))
    }
}

/// Create the directory skeleton and write all three artifacts under `root`.
pub fn write_artifacts(
    registry: &DimensionRegistry,
    config: &RunConfig,
    root: &Path,
) -> SmacResult<ScenarioLayout> {
    let layout = ScenarioLayout::new(root);

    for dir in [&layout.exec_dir, &layout.out_dir] {
        std::fs::create_dir_all(dir).map_err(|source| SmacError::ArtifactWrite {
            path: dir.clone(),
            source,
        })?;
    }

    write_file(&layout.scenario_file, &render_scenario(&layout, config))?;
    write_file(&layout.instance_file, INSTANCE_NAME)?;
    write_file(&layout.param_file, &render_parameter_file(registry))?;

    debug!(root = %root.display(), dimensions = registry.len(), "scenario artifacts written");
    Ok(layout)
}

fn write_file(path: &Path, contents: &str) -> SmacResult<()> {
    std::fs::write(path, contents).map_err(|source| SmacError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Scenario file body. The declared algorithm is a no-op: evaluations come
/// back over the socket instead.
pub fn render_scenario(layout: &ScenarioLayout, config: &RunConfig) -> String {
    let lines = [
        "algo = echo 0".to_string(),
        format!("execdir = {}", layout.exec_dir.display()),
        format!("outdir = {}", layout.out_dir.display()),
        "deterministic = 1".to_string(),
        format!("rungroup = {RUN_GROUP}"),
        "run_obj = quality".to_string(),
        "overall_obj = mean".to_string(),
        format!("cutoff_time = {}", config.cutoff_time),
        "cutoff_length = max".to_string(),
        "validation = false".to_string(),
        format!("paramfile = {}", layout.param_file.display()),
        format!("instance_file = {}", layout.instance_file.display()),
    ];
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

/// One line per dimension in registry order.
pub fn render_parameter_file(registry: &DimensionRegistry) -> String {
    registry
        .dimensions()
        .iter()
        .map(|dim| match &dim.kind {
            DimensionKind::Continuous {
                lower,
                upper,
                default,
                ..
            } => format!("{} [{lower:.6}, {upper:.6}] [{default:.6}]", dim.tag),
            DimensionKind::Integer {
                lower,
                upper,
                default,
                ..
            } => format!("{} [{lower}, {upper}] [{default}]i", dim.tag),
            DimensionKind::Categorical(param) => {
                let choices: Vec<String> = param.choices.iter().map(|c| c.to_string()).collect();
                // validate() guarantees at least one choice.
                let default = param.choices.first().map(|c| c.to_string()).unwrap_or_default();
                format!("{} {{{}}} [{default}]", dim.tag, choices.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use smac_types::ParameterSpace;
    use tempfile::tempdir;

    fn registry() -> DimensionRegistry {
        let space = ParameterSpace::from_bounds(&[0.0, 0.0], &[-5.0, 0.0], &[10.0, 15.0])
            .with_integer_bounds(&[4], &[-100], &[100])
            .add_categorical("max_depth", [3, 5])
            .add_categorical("criterion", ["gini", "entropy"]);
        DimensionRegistry::new(&space).unwrap()
    }

    #[test]
    fn parameter_file_format() {
        let pcs = render_parameter_file(&registry());
        let expected = "x0 [-5.000000, 10.000000] [0.000000]\n\
                        x1 [0.000000, 15.000000] [0.000000]\n\
                        x_int0 [-100, 100] [4]i\n\
                        x_categorical_max_depth {3, 5} [3]\n\
                        x_categorical_criterion {gini, entropy} [gini]";
        assert_eq!(pcs, expected);
    }

    #[test]
    fn scenario_file_keys_in_order() {
        let layout = ScenarioLayout::new(Path::new("/work"));
        let body = render_scenario(&layout, &RunConfig::default());
        let keys: Vec<&str> = body
            .lines()
            .map(|l| l.split(" = ").next().unwrap())
            .collect();
        assert_eq!(
            keys,
            vec![
                "algo",
                "execdir",
                "outdir",
                "deterministic",
                "rungroup",
                "run_obj",
                "overall_obj",
                "cutoff_time",
                "cutoff_length",
                "validation",
                "paramfile",
                "instance_file",
            ]
        );
        assert!(body.contains("cutoff_time = 18000\n"));
        assert!(body.contains(&format!("paramfile = {}", Path::new("/work").join(PARAM_FILE).display())));
    }

    #[test]
    fn artifacts_are_written() {
        let dir = tempdir().unwrap();
        let layout = write_artifacts(&registry(), &RunConfig::default(), dir.path()).unwrap();

        assert!(layout.exec_dir.is_dir());
        assert!(layout.out_dir.is_dir());
        assert_eq!(std::fs::read_to_string(&layout.instance_file).unwrap(), "instance0");
        assert!(std::fs::read_to_string(&layout.param_file)
            .unwrap()
            .starts_with("x0 [-5.000000"));
        assert!(std::fs::read_to_string(&layout.scenario_file)
            .unwrap()
            .starts_with("algo = echo 0\n"));
        assert_eq!(
            layout.trajectory_file(1),
            dir.path().join("out").join("result").join("traj-run-1.txt")
        );
    }

    #[test]
    fn unwritable_root_names_the_failed_path() {
        let dir = tempdir().unwrap();
        // A regular file where the working directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        match write_artifacts(&registry(), &RunConfig::default(), &blocker) {
            Err(SmacError::ArtifactWrite { path, .. }) => assert!(path.starts_with(&blocker)),
            other => panic!("expected artifact write error, got {other:?}"),
        }
    }
}
