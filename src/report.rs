use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Result, bail};
use chrono::{DateTime, Local};
use colored::Colorize;
use serde::Serialize;

use crate::{
    config::Manifest,
    context::RunContext,
    scenario::{Scenario, run_scenario},
};

#[derive(Debug, Serialize)]
pub struct CaseDetail {
    pub name: String,
    pub status: CaseStatus,
    pub duration_ms: u128,
    pub failure_kind: Option<String>,
    pub message: Option<String>,
    pub allow_failure: bool,
    pub pid: Option<u32>,
    pub exit_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub suite: String,
    pub description: Option<String>,
    pub root: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub soft_failed: usize,
    pub log_file: PathBuf,
    pub cases: Vec<CaseDetail>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed,
    SoftFailed,
}

impl CaseStatus {
    fn label(&self) -> colored::ColoredString {
        match self {
            CaseStatus::Passed => "PASS".green().bold(),
            CaseStatus::Failed => "FAIL".red().bold(),
            CaseStatus::SoftFailed => "SOFT".yellow().bold(),
        }
    }
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Runs every scenario of `manifest` against `ctx`, one after another, then tears the
/// context down.
///
/// Writes `logs/<timestamp>/suite.log` and `logs/last_run.json` under `workspace`.
pub async fn run_suite(
    manifest: &Manifest,
    mut ctx: RunContext,
    workspace: &Path,
) -> Result<RunSummary> {
    let scenarios = manifest.scenarios(ctx.root())?;
    let root = ctx.root().to_path_buf();

    let logs_root = workspace.join("logs");
    let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let run_dir = logs_root.join(&timestamp);
    fs::create_dir_all(&run_dir)?;
    let run_log_path = run_dir.join("suite.log");
    let mut run_log = File::create(&run_log_path)?;
    let start = Local::now();
    let suite_label = manifest.name.clone().unwrap_or_else(|| "serial smoke".into());

    writeln!(
        run_log,
        "[suite] {} ({}) - {}",
        suite_label,
        root.display(),
        manifest
            .description
            .as_deref()
            .unwrap_or("no description provided")
    )?;

    let mut cases = Vec::new();
    for (scenario, entry) in scenarios.iter().zip(&manifest.scenarios) {
        writeln!(
            run_log,
            "[case] starting {} -> {}",
            scenario.name,
            scenario.executable.display()
        )?;
        if let Some(desc) = &entry.description {
            writeln!(run_log, "        {}", desc)?;
        }
        let detail = run_case(&mut ctx, scenario).await;
        writeln!(
            run_log,
            "[case] {} {:?} in {} ms (pid {:?}, exit {})",
            detail.name,
            detail.status,
            detail.duration_ms,
            detail.pid,
            detail.exit_status.as_deref().unwrap_or("unknown")
        )?;
        if let Some(message) = &detail.message {
            writeln!(run_log, "        {}", message)?;
        }
        print_case(&detail);
        cases.push(detail);
    }

    for leftover in ctx.teardown().await {
        writeln!(
            run_log,
            "[teardown] killed {} (pid {:?})",
            leftover.id, leftover.pid
        )?;
    }

    let count = |status: CaseStatus| cases.iter().filter(|case| case.status == status).count();
    let summary = RunSummary {
        suite: suite_label,
        description: manifest.description.clone(),
        root,
        started_at: start,
        finished_at: Local::now(),
        total: cases.len(),
        passed: count(CaseStatus::Passed),
        failed: count(CaseStatus::Failed),
        soft_failed: count(CaseStatus::SoftFailed),
        log_file: rel_path(&run_log_path, workspace),
        cases,
    };

    let summary_path = logs_root.join("last_run.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;

    println!(
        "{} completed: {}/{} passed ({} soft failures). Log: {}",
        summary.suite,
        summary.passed,
        summary.total,
        summary.soft_failed,
        summary.log_file.display()
    );

    Ok(summary)
}

/// Like [`run_suite`] but fails when any scenario without `allow_failure` failed.
pub async fn run_suite_checked(
    manifest: &Manifest,
    ctx: RunContext,
    workspace: &Path,
) -> Result<RunSummary> {
    let summary = run_suite(manifest, ctx, workspace).await?;
    if !summary.succeeded() {
        bail!(
            "{} of {} scenarios failed. Consult {}",
            summary.failed,
            summary.total,
            summary.log_file.display()
        );
    }
    Ok(summary)
}

async fn run_case(ctx: &mut RunContext, scenario: &Scenario) -> CaseDetail {
    let before = ctx.terminations().len();
    let start = Instant::now();
    let outcome = run_scenario(ctx, scenario).await;
    let duration_ms = start.elapsed().as_millis();
    let termination = ctx.terminations().get(before).cloned();

    let (status, failure_kind, message) = match &outcome {
        Ok(()) => (CaseStatus::Passed, None, None),
        Err(err) => {
            let status = if scenario.allow_failure {
                CaseStatus::SoftFailed
            } else {
                CaseStatus::Failed
            };
            (status, Some(err.kind().to_string()), Some(err.to_string()))
        }
    };

    CaseDetail {
        name: scenario.name.clone(),
        status,
        duration_ms,
        failure_kind,
        message,
        allow_failure: scenario.allow_failure,
        pid: termination.as_ref().and_then(|t| t.pid),
        exit_status: termination
            .and_then(|t| t.status)
            .map(|status| status.to_string()),
    }
}

fn print_case(detail: &CaseDetail) {
    match &detail.message {
        Some(message) => println!(
            "{} {} ({} ms): {}",
            detail.status.label(),
            detail.name,
            detail.duration_ms,
            message
        ),
        None => println!(
            "{} {} ({} ms)",
            detail.status.label(),
            detail.name,
            detail.duration_ms
        ),
    }
}

fn rel_path(path: &Path, workspace: &Path) -> PathBuf {
    path.strip_prefix(workspace).unwrap_or(path).to_path_buf()
}
