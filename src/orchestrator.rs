//! Sequential execution of the selected step list.
//!
//! Idle -> Selecting -> Executing(i) -> { Executing(i+1) | Failed | Done }
//!
//! Fail-fast by design: the first non-success halts the run. Later steps
//! routinely depend on earlier ones (the venv needs the system packages,
//! the pip install needs the checkout), so attempting independent-looking
//! remainders just buries the real error.

use anyhow::{anyhow, Context, Result};

use crate::config::PodupConfig;
use crate::guard::Guard;
use crate::state::StateStore;
use crate::steps::{Registry, StepContext};
use crate::target::Target;
use crate::transport::{RunLog, Transport};
use crate::ui;

#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    pub list: bool,
    pub from: Option<String>,
    pub only: Option<String>,
    pub skip: Vec<String>,
    pub force: bool,
    pub dry_run: bool,
}

/// Print the step table. Touches no target.
pub fn print_steps(registry: &Registry) {
    ui::header("Provisioning steps");
    for step in registry.steps() {
        println!("  {:<14} {}", step.name, step.description);
    }
}

pub fn run(
    registry: &Registry,
    config: &PodupConfig,
    target: Target,
    opts: &RunOptions,
) -> Result<()> {
    if opts.list {
        print_steps(registry);
        return Ok(());
    }

    let selected = registry.select(
        opts.from.as_deref(),
        opts.only.as_deref(),
        &opts.skip,
    )?;
    if selected.is_empty() {
        ui::info("no steps selected");
        return Ok(());
    }

    let (log, log_path) = RunLog::create(&config.log_path()).context("creating run log")?;
    ui::dim(&format!("log: {}", log_path.display()));

    let transport = Transport::new(target, opts.dry_run, log.clone());

    // One cheap round trip before any step: an unreachable target must
    // fail here, not halfway through a provisioning run.
    if transport.target().is_remote() {
        transport
            .run_ro(&["true"])
            .with_context(|| format!("preflight connection to {}", transport.target()))?;
    }

    if opts.dry_run {
        ui::info("dry-run: mutating commands are printed, not executed");
    }

    let store = StateStore::new(&transport, config.state_file(transport.target()));
    let guard = Guard::new(&store, opts.force);
    let ctx = StepContext {
        transport: &transport,
        store: &store,
        config,
        force: opts.force,
    };

    let total = selected.len();
    for (i, step) in selected.iter().enumerate() {
        ui::step(i + 1, total, &format!("{} - {}", step.name, step.description));

        if step.track_done && !guard.should_run(step.name)? {
            ui::dim("already done, skipping");
            continue;
        }

        if let Err(err) = (step.run)(&ctx) {
            let msg = format!("step '{}' failed: {err:#}", step.name);
            ui::error(&msg);
            log.line(&msg);
            // No completion marker: the next invocation retries this step.
            return Err(anyhow!("step '{}' failed", step.name));
        }

        if step.track_done {
            guard.mark_done(step.name)?;
        }
        ui::success(&format!("{} done", step.name));
    }

    ui::success("all selected steps completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{Step, StepContext};

    fn test_config(dir: &std::path::Path) -> PodupConfig {
        PodupConfig {
            state_dir: dir.to_str().unwrap().to_string(),
            log_dir: dir.join("logs").to_str().unwrap().to_string(),
            ..PodupConfig::default()
        }
    }

    // Step bodies are fn pointers, so probes go through the state_dir the
    // context hands them instead of captured paths.
    fn touch_probe(ctx: &StepContext) -> Result<()> {
        ctx.transport
            .run_script(&format!("echo ran >> {}/probe", ctx.config.state_dir))?
            .check("probe")?;
        Ok(())
    }

    fn failing(_ctx: &StepContext) -> Result<()> {
        anyhow::bail!("boom")
    }

    fn step(name: &'static str, run: crate::steps::StepFn, track_done: bool) -> Step {
        Step {
            name,
            description: "test step",
            run,
            track_done,
        }
    }

    fn registry_with_failure() -> Registry {
        Registry::from_steps(vec![
            step("10_a", touch_probe, true),
            step("20_b", failing, true),
            step("30_c", touch_probe, true),
            step("40_d", touch_probe, true),
        ])
    }

    fn probe_lines(dir: &std::path::Path) -> usize {
        std::fs::read_to_string(dir.join("probe"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[test]
    fn test_fail_fast_stops_and_leaves_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = registry_with_failure();

        let err = run(&registry, &config, Target::Local, &RunOptions::default()).unwrap_err();
        assert!(err.to_string().contains("20_b"));

        // Only 10_a ran; 30_c and 40_d were never attempted
        assert_eq!(probe_lines(dir.path()), 1);

        let record = std::fs::read_to_string(dir.path().join("state.local")).unwrap();
        assert!(record.contains("DONE_10_A=1"));
        assert!(!record.contains("DONE_20_B"));
        assert!(!record.contains("DONE_30_C"));
        assert!(!record.contains("DONE_40_D"));
    }

    #[test]
    fn test_second_run_skips_completed_steps() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Registry::from_steps(vec![step("10_a", touch_probe, true)]);

        run(&registry, &config, Target::Local, &RunOptions::default()).unwrap();
        run(&registry, &config, Target::Local, &RunOptions::default()).unwrap();

        // Mutating body executed exactly once across both runs
        assert_eq!(probe_lines(dir.path()), 1);
    }

    #[test]
    fn test_force_reruns_completed_steps() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Registry::from_steps(vec![step("10_a", touch_probe, true)]);

        run(&registry, &config, Target::Local, &RunOptions::default()).unwrap();
        let forced = RunOptions {
            force: true,
            ..RunOptions::default()
        };
        run(&registry, &config, Target::Local, &forced).unwrap();
        assert_eq!(probe_lines(dir.path()), 2);
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Registry::from_steps(vec![step("10_a", touch_probe, true)]);

        let opts = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        run(&registry, &config, Target::Local, &opts).unwrap();

        assert_eq!(probe_lines(dir.path()), 0);
        assert!(!dir.path().join("state.local").exists());
    }

    // A self-gated body: reinstalls (appends to the probe) only when the
    // watched manifest changed since the recorded fingerprint.
    fn gated_install(ctx: &StepContext) -> Result<()> {
        let manifest = format!("{}/requirements.txt", ctx.config.state_dir);
        let fp = crate::guard::manifest_fingerprint(ctx.transport, &[manifest], "py3.10")?;
        let guard = Guard::new(ctx.store, ctx.force);
        if guard.should_run_fp("20_a/install", &fp, true)? {
            touch_probe(ctx)?;
            guard.record_fingerprint("20_a/install", &fp)?;
        }
        Ok(())
    }

    #[test]
    fn test_changed_manifest_triggers_gated_suboperation() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Registry::from_steps(vec![step("20_a", gated_install, false)]);
        let manifest = dir.path().join("requirements.txt");

        std::fs::write(&manifest, "torch==2.1\n").unwrap();
        run(&registry, &config, Target::Local, &RunOptions::default()).unwrap();
        assert_eq!(probe_lines(dir.path()), 1);

        // Unchanged manifest: the expensive sub-operation is skipped
        run(&registry, &config, Target::Local, &RunOptions::default()).unwrap();
        assert_eq!(probe_lines(dir.path()), 1);

        // Changed manifest: re-runs even though a fingerprint is recorded
        std::fs::write(&manifest, "torch==2.2\n").unwrap();
        run(&registry, &config, Target::Local, &RunOptions::default()).unwrap();
        assert_eq!(probe_lines(dir.path()), 2);
    }

    #[test]
    fn test_untracked_step_body_runs_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Registry::from_steps(vec![step("10_a", touch_probe, false)]);

        run(&registry, &config, Target::Local, &RunOptions::default()).unwrap();
        run(&registry, &config, Target::Local, &RunOptions::default()).unwrap();
        // Gating is the body's responsibility for untracked steps
        assert_eq!(probe_lines(dir.path()), 2);
    }

    #[test]
    fn test_resolution_error_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = registry_with_failure();

        let opts = RunOptions {
            only: Some("99".to_string()),
            ..RunOptions::default()
        };
        assert!(run(&registry, &config, Target::Local, &opts).is_err());
        assert_eq!(probe_lines(dir.path()), 0);
    }

    #[test]
    fn test_list_contacts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = registry_with_failure();

        let opts = RunOptions {
            list: true,
            ..RunOptions::default()
        };
        run(&registry, &config, Target::Local, &opts).unwrap();
        assert_eq!(probe_lines(dir.path()), 0);
        assert!(!dir.path().join("logs").exists());
    }
}
