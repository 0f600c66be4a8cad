//! Boot smoke testing: launch a target, watch its stdout for a startup banner, kill it.

pub mod config;
pub mod context;
pub mod error;
pub mod report;
pub mod scenario;
pub mod verify;

mod capture;
mod process;

pub use config::{Manifest, STARTUP_BANNER, StrategyKind};
pub use context::{RunContext, ScenarioId, Termination};
pub use error::ScenarioError;
pub use scenario::{CaptureStrategy, Expectation, Scenario, run_scenario};
