//! Minimize the Branin function with SMAC.
//!
//! Needs a SMAC installation: set `SMAC_EXECUTABLE` to its launcher script,
//! or put `smac` on the `PATH`. Use `RUST_LOG=smac_bridge=debug` to follow
//! each evaluation.

use smac_bridge::{minimize, ObjectiveArgs};
use smac_types::{ParameterAssignment, ParameterSpace};
use std::f64::consts::PI;
use tracing_subscriber::EnvFilter;

fn branin(p: &ParameterAssignment, _: &ObjectiveArgs) -> f64 {
    let (x1, x2) = (p.continuous[0], p.continuous[1]);
    let a = 1.0;
    let b = 5.1 / (4.0 * PI * PI);
    let c = 5.0 / PI;
    let r = 6.0;
    let s = 10.0;
    let t = 1.0 / (8.0 * PI);
    a * (x2 - b * x1 * x1 + c * x1 - r).powi(2) + s * (1.0 - t) * x1.cos() + s
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let space = ParameterSpace::from_bounds(&[0.0, 0.0], &[-5.0, 0.0], &[10.0, 15.0]);
    let (best, value) = minimize(branin, &space, 50, &ObjectiveArgs::new())?;

    println!("best x = {:?}", best.continuous);
    println!("branin(x) = {value:.6} (global minimum 0.397887)");
    Ok(())
}
