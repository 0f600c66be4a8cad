use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::scenario::{CaptureStrategy, Expectation, Scenario};

/// Message the kernel prints once it has switched its console to the serial port.
pub const STARTUP_BANNER: &str = "Switched to serial console.";

/// Environment variable naming the root of the built tree.
pub const ROOT_ENV: &str = "ROOT";

/// Launcher script, relative to the root.
pub const DEFAULT_EXECUTABLE: &str = "bin/run";

pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SNAPSHOT_WAIT_MS: u64 = 500;

/// Reads `ROOT` once. An unset or empty variable is an error.
pub fn root_from_env() -> Result<PathBuf> {
    match std::env::var_os(ROOT_ENV) {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => bail!("{ROOT_ENV} is not set - point it at the built tree containing {DEFAULT_EXECUTABLE}"),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Streaming,
    Snapshot,
}

impl StrategyKind {
    pub fn into_strategy(self, wait_ms: Option<u64>) -> CaptureStrategy {
        match self {
            StrategyKind::Streaming => CaptureStrategy::Streaming,
            StrategyKind::Snapshot => CaptureStrategy::Snapshot {
                wait: Duration::from_millis(wait_ms.unwrap_or(DEFAULT_SNAPSHOT_WAIT_MS)),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub scenarios: Vec<ScenarioEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScenarioEntry {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Capture settings; only meaningful for `banner` entries.
    pub strategy: Option<StrategyKind>,
    pub wait_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub allow_failure: bool,
    pub banner: Option<String>,
    pub contains: Option<String>,
    pub absent: Option<String>,
    pub pattern: Option<String>,
    pub alternating: Option<[String; 2]>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_executable() -> PathBuf {
    PathBuf::from(DEFAULT_EXECUTABLE)
}

impl ScenarioEntry {
    fn expectation(&self) -> Result<Expectation> {
        let mut found = Vec::new();
        if let Some(banner) = &self.banner {
            found.push(Expectation::Banner(banner.clone()));
        }
        if let Some(needle) = &self.contains {
            found.push(Expectation::Contains(needle.clone()));
        }
        if let Some(needle) = &self.absent {
            found.push(Expectation::Absent(needle.clone()));
        }
        if let Some(pattern) = &self.pattern {
            found.push(Expectation::Pattern(pattern.clone()));
        }
        if let Some([first, second]) = &self.alternating {
            found.push(Expectation::Alternating(first.clone(), second.clone()));
        }
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => bail!(
                "scenario {} needs one of `banner`, `contains`, `absent`, `pattern` or `alternating`",
                self.name
            ),
            n => bail!(
                "scenario {} sets {n} expectations - pick exactly one",
                self.name
            ),
        }
    }

    fn strategy(&self, expectation: &Expectation) -> Result<CaptureStrategy> {
        let banner = matches!(expectation, Expectation::Banner(_));
        if !banner && (self.strategy.is_some() || self.wait_ms.is_some()) {
            bail!(
                "scenario {}: `strategy` and `wait_ms` only apply to `banner` checks",
                self.name
            );
        }
        let kind = self.strategy.unwrap_or_default();
        if kind == StrategyKind::Streaming && self.wait_ms.is_some() {
            bail!(
                "scenario {}: `wait_ms` needs `strategy = \"snapshot\"`",
                self.name
            );
        }
        Ok(kind.into_strategy(self.wait_ms))
    }

    /// Resolves the entry against `root`. Relative executables are joined onto it.
    pub fn to_scenario(&self, root: &Path, default_timeout_ms: u64) -> Result<Scenario> {
        let expectation = self.expectation()?;
        let strategy = self.strategy(&expectation)?;
        let executable = if self.executable.is_absolute() {
            self.executable.clone()
        } else {
            root.join(&self.executable)
        };
        let mut scenario = Scenario::new(&self.name, executable, root, expectation)
            .strategy(strategy)
            .timeout(Duration::from_millis(
                self.timeout_ms.unwrap_or(default_timeout_ms),
            ))
            .args(self.args.iter().cloned())
            .allow_failure(self.allow_failure);
        for (key, value) in &self.env {
            scenario = scenario.env(key, value);
        }
        Ok(scenario)
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The manifest used when none is given: the startup serial message check.
    pub fn builtin(strategy: StrategyKind, timeout_ms: u64) -> Self {
        Manifest {
            name: Some("startup".into()),
            description: Some("kernel switches to the serial console".into()),
            default_timeout_ms: timeout_ms,
            scenarios: vec![ScenarioEntry {
                name: "startup serial message".into(),
                description: None,
                executable: default_executable(),
                args: Vec::new(),
                env: BTreeMap::new(),
                strategy: Some(strategy),
                wait_ms: None,
                timeout_ms: None,
                allow_failure: false,
                banner: Some(STARTUP_BANNER.into()),
                contains: None,
                absent: None,
                pattern: None,
                alternating: None,
            }],
        }
    }

    pub fn scenarios(&self, root: &Path) -> Result<Vec<Scenario>> {
        if self.scenarios.is_empty() {
            bail!("manifest has no scenarios defined");
        }
        self.scenarios
            .iter()
            .map(|entry| entry.to_scenario(root, self.default_timeout_ms))
            .collect()
    }
}
