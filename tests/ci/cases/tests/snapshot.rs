use std::{path::Path, time::Duration};

use serial_smoke::{
    CaptureStrategy, RunContext, STARTUP_BANNER, ScenarioError, run_scenario,
};
use test_utils::{FakeRoot, ensure_reaped};

const WAIT: Duration = Duration::from_millis(500);

fn fake_boot() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_fake-boot"))
}

async fn snapshot_in(root: &FakeRoot) -> (Result<(), ScenarioError>, RunContext) {
    let mut ctx = RunContext::new(root.path());
    let scenario = ctx
        .startup_scenario(Duration::from_millis(1000))
        .strategy(CaptureStrategy::Snapshot { wait: WAIT });
    let outcome = run_scenario(&mut ctx, &scenario).await;
    (outcome, ctx)
}

fn assert_killed(ctx: &RunContext) {
    assert_eq!(ctx.running(), 0);
    let pid = ctx
        .terminations()
        .last()
        .and_then(|t| t.pid)
        .expect("termination with pid");
    ensure_reaped(pid).expect("target should be gone");
}

#[tokio::test]
async fn banner_in_buffer_passes() {
    let root = FakeRoot::with_exec(fake_boot(), &["--hang", STARTUP_BANNER, "more boot noise"])
        .expect("创建测试根目录");
    let (outcome, ctx) = snapshot_in(&root).await;
    outcome.expect("snapshot starts with banner");
    assert_killed(&ctx);
}

#[tokio::test]
async fn partial_output_is_too_short_not_a_timeout() {
    let root =
        FakeRoot::with_exec(fake_boot(), &["--hang", "--no-newline", "Switched"]).expect("创建测试根目录");
    let (outcome, ctx) = snapshot_in(&root).await;
    match outcome {
        Err(ScenarioError::TooShort { observed, expected }) => {
            assert_eq!(observed, 8);
            assert_eq!(expected, STARTUP_BANNER.len());
        }
        other => panic!("expected TooShort, got {other:?}"),
    }
    assert_killed(&ctx);
}

#[tokio::test]
async fn silent_target_yields_empty_snapshot() {
    let root = FakeRoot::with_script("exec sleep 30").expect("创建测试根目录");
    let (outcome, ctx) = snapshot_in(&root).await;
    assert!(
        matches!(outcome, Err(ScenarioError::TooShort { observed: 0, .. })),
        "{outcome:?}"
    );
    assert_killed(&ctx);
}

#[tokio::test]
async fn output_after_the_wait_is_not_seen() {
    let root = FakeRoot::with_exec(fake_boot(), &["--hang", "--delay-ms", "3000", STARTUP_BANNER])
        .expect("创建测试根目录");
    let (outcome, ctx) = snapshot_in(&root).await;
    assert!(
        matches!(outcome, Err(ScenarioError::TooShort { .. })),
        "{outcome:?}"
    );
    assert_killed(&ctx);
}

#[tokio::test]
async fn different_first_bytes_mismatch() {
    let root = FakeRoot::with_exec(fake_boot(), &["--hang", "Switched to SERIAL console."])
        .expect("创建测试根目录");
    let (outcome, ctx) = snapshot_in(&root).await;
    match outcome {
        Err(ScenarioError::Mismatch { actual, .. }) => {
            assert_eq!(actual, "Switched to SERIAL console.")
        }
        other => panic!("expected Mismatch, got {other:?}"),
    }
    assert_killed(&ctx);
}
