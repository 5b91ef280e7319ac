//! Ordered step execution with two failure tiers.
//!
//! A task is a flat list of [`Step`]s. The driver runs them strictly in order:
//! a failing `Required` step aborts the run, while `BestEffort` and
//! `Background` failures are logged and recorded without stopping anything.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::revision::RevisionPair;
use crate::runner::CommandRunner;
use crate::settings::Settings;

/// State threaded through every step of a run.
pub struct DeployContext {
    pub settings: Settings,
    pub revisions: Option<RevisionPair>,
    pub changelog: Option<String>,
    pub detached: Vec<DetachedJob>,
}

impl DeployContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            revisions: None,
            changelog: None,
            detached: Vec::new(),
        }
    }

    pub fn src_dir(&self) -> PathBuf {
        PathBuf::from(&self.settings.src_dir)
    }

    /// Revision pair recorded by an earlier step.
    pub fn revisions(&self) -> Result<&RevisionPair> {
        self.revisions.as_ref().ok_or_else(|| {
            Error::internal_unexpected("Revision markers have not been recorded in this run")
                .with_hint("Run the 'update_revision_files' task first")
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedJob {
    pub step: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTier {
    /// Failure aborts the run.
    Required,
    /// Failure is logged; the run continues.
    BestEffort,
    /// Started without waiting; spawn failure is logged.
    Background,
}

pub enum StepOutcome {
    Completed(Option<String>),
    Detached(u32),
    Skipped(String),
}

pub type StepAction = Box<dyn Fn(&mut DeployContext, &dyn CommandRunner) -> Result<StepOutcome>>;

/// Returns a skip reason when the step should not run.
pub type StepCondition = fn(&DeployContext) -> Option<String>;

pub struct Step {
    pub id: String,
    pub label: String,
    pub tier: StepTier,
    pub condition: Option<StepCondition>,
    pub action: StepAction,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}

impl Step {
    fn new<F>(id: &str, label: &str, tier: StepTier, action: F) -> Self
    where
        F: Fn(&mut DeployContext, &dyn CommandRunner) -> Result<StepOutcome> + 'static,
    {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            tier,
            condition: None,
            action: Box::new(action),
        }
    }

    pub fn required<F>(id: &str, label: &str, action: F) -> Self
    where
        F: Fn(&mut DeployContext, &dyn CommandRunner) -> Result<StepOutcome> + 'static,
    {
        Self::new(id, label, StepTier::Required, action)
    }

    pub fn best_effort<F>(id: &str, label: &str, action: F) -> Self
    where
        F: Fn(&mut DeployContext, &dyn CommandRunner) -> Result<StepOutcome> + 'static,
    {
        Self::new(id, label, StepTier::BestEffort, action)
    }

    pub fn background<F>(id: &str, label: &str, action: F) -> Self
    where
        F: Fn(&mut DeployContext, &dyn CommandRunner) -> Result<StepOutcome> + 'static,
    {
        Self::new(id, label, StepTier::Background, action)
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
    Detached,
    Planned,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub id: String,
    pub label: String,
    pub tier: StepTier,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StepResult {
    fn for_step(step: &Step, status: StepStatus) -> Self {
        Self {
            id: step.id.clone(),
            label: step.label.clone(),
            tier: step.tier,
            status,
            output: None,
            pid: None,
            error: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every required step succeeded. Best-effort and background failures
    /// show up in the step results and summary only.
    Success,
    Planned,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub detached: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub task: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revisions: Option<RevisionPair>,
    pub steps: Vec<StepResult>,
    pub summary: RunSummary,
}

fn validate_ids(task: &str, steps: &[Step]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.id.as_str()) {
            return Err(Error::validation_invalid_argument(
                task,
                format!("Duplicate step id '{}'", step.id),
            ));
        }
    }
    Ok(())
}

/// List the steps without running anything.
pub fn plan(task: &str, steps: &[Step]) -> Result<RunResult> {
    validate_ids(task, steps)?;
    let now = Utc::now();
    let results: Vec<StepResult> = steps
        .iter()
        .map(|step| StepResult::for_step(step, StepStatus::Planned))
        .collect();

    Ok(RunResult {
        task: task.to_string(),
        status: RunStatus::Planned,
        started_at: now,
        finished_at: now,
        revisions: None,
        summary: build_summary(&results),
        steps: results,
    })
}

/// Run `steps` in order against `ctx`.
///
/// Returns `deploy.step_failed` as soon as a required step fails.
pub fn run(
    task: &str,
    steps: &[Step],
    ctx: &mut DeployContext,
    runner: &dyn CommandRunner,
) -> Result<RunResult> {
    validate_ids(task, steps)?;
    let started_at = Utc::now();
    let mut results: Vec<StepResult> = Vec::with_capacity(steps.len());

    for step in steps {
        if let Some(reason) = step.condition.and_then(|condition| condition(ctx)) {
            log_status!("deploy", "Skipping {}: {}", step.id, reason);
            let mut result = StepResult::for_step(step, StepStatus::Skipped);
            result.warnings.push(reason);
            results.push(result);
            continue;
        }

        log_status!("deploy", "{}", step.label);

        match (step.action)(ctx, runner) {
            Ok(StepOutcome::Completed(output)) => {
                let mut result = StepResult::for_step(step, StepStatus::Success);
                result.output = output.filter(|o| !o.is_empty());
                results.push(result);
            }
            Ok(StepOutcome::Detached(pid)) => {
                log_status!("deploy", "{} running in background (pid {})", step.id, pid);
                ctx.detached.push(DetachedJob {
                    step: step.id.clone(),
                    pid,
                });
                let mut result = StepResult::for_step(step, StepStatus::Detached);
                result.pid = Some(pid);
                results.push(result);
            }
            Ok(StepOutcome::Skipped(reason)) => {
                log_status!("deploy", "Skipping {}: {}", step.id, reason);
                let mut result = StepResult::for_step(step, StepStatus::Skipped);
                result.warnings.push(reason);
                results.push(result);
            }
            Err(err) if step.tier == StepTier::Required => {
                let completed = results
                    .iter()
                    .filter(|r| r.status == StepStatus::Success)
                    .map(|r| r.id.clone())
                    .collect();
                return Err(Error::deploy_step_failed(task, &step.id, completed, &err));
            }
            Err(err) => {
                let reason = describe_error(&err);
                eprintln!("[deploy] {} failed (ignored): {}", step.id, reason);
                let mut result = StepResult::for_step(step, StepStatus::Failed);
                result.warnings.push(format!("{} failed; run continued", step.id));
                result.error = Some(reason);
                results.push(result);
            }
        }
    }

    Ok(RunResult {
        task: task.to_string(),
        status: RunStatus::Success,
        started_at,
        finished_at: Utc::now(),
        revisions: ctx.revisions.clone(),
        summary: build_summary(&results),
        steps: results,
    })
}

/// Error message plus exit code, stderr and inner error text when present.
fn describe_error(err: &Error) -> String {
    let details = &err.details;
    let mut parts = Vec::new();

    if let Some(code) = details.get("exitCode").and_then(|c| c.as_i64()) {
        parts.push(format!("exit {}", code));
    }
    for key in ["stderr", "error"] {
        if let Some(text) = details.get(key).and_then(|v| v.as_str()) {
            let text = text.trim();
            if !text.is_empty() {
                parts.push(text.to_string());
            }
        }
    }

    if parts.is_empty() {
        err.message.clone()
    } else {
        format!("{} ({})", err.message, parts.join(": "))
    }
}

fn build_summary(results: &[StepResult]) -> RunSummary {
    let count = |status: StepStatus| results.iter().filter(|r| r.status == status).count();

    RunSummary {
        total_steps: results.len(),
        succeeded: count(StepStatus::Success),
        failed: count(StepStatus::Failed),
        skipped: count(StepStatus::Skipped),
        detached: count(StepStatus::Detached),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommandFailedDetails, ErrorCode};
    use crate::settings::HostGroup;
    use crate::ssh::CommandOutput;
    use std::cell::RefCell;
    use std::path::Path;

    #[derive(Default)]
    struct NullRunner {
        commands: RefCell<Vec<String>>,
    }

    impl CommandRunner for NullRunner {
        fn run(&self, command: &str, _dir: &Path) -> CommandOutput {
            self.commands.borrow_mut().push(command.to_string());
            CommandOutput::ok("")
        }

        fn spawn_detached(&self, _command: &str, _dir: &Path) -> Result<u32> {
            Ok(4242)
        }

        fn run_remote(
            &self,
            _group: &HostGroup,
            _host: &str,
            _identity_file: Option<&str>,
            _command: &str,
        ) -> Result<CommandOutput> {
            Ok(CommandOutput::ok(""))
        }
    }

    fn ctx() -> DeployContext {
        DeployContext::new(Settings::new("/srv/app"))
    }

    fn ok_step(id: &str) -> Step {
        Step::required(id, id, |_, _| Ok(StepOutcome::Completed(None)))
    }

    fn failing(id: &str, tier: StepTier) -> Step {
        Step::new(id, id, tier, |_, _| Err(Error::internal_unexpected("boom")))
    }

    #[test]
    fn required_failure_stops_the_run() {
        let ran = std::rc::Rc::new(RefCell::new(false));
        let flag = ran.clone();
        let steps = vec![
            ok_step("first"),
            failing("second", StepTier::Required),
            Step::required("third", "third", move |_, _| {
                *flag.borrow_mut() = true;
                Ok(StepOutcome::Completed(None))
            }),
        ];

        let err = run("update", &steps, &mut ctx(), &NullRunner::default()).unwrap_err();

        assert_eq!(err.code, ErrorCode::DeployStepFailed);
        assert_eq!(err.details["step"], "second");
        assert_eq!(err.details["completed"][0], "first");
        assert!(!*ran.borrow());
    }

    #[test]
    fn best_effort_failure_is_recorded_and_run_continues() {
        let steps = vec![
            failing("notify", StepTier::BestEffort),
            ok_step("after"),
        ];

        let result = run("deploy", &steps, &mut ctx(), &NullRunner::default()).unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.steps[0].status, StepStatus::Failed);
        assert!(result.steps[0].error.as_deref().unwrap().contains("boom"));
        assert_eq!(result.steps[1].status, StepStatus::Success);
        assert_eq!(result.summary.failed, 1);
        assert_eq!(result.summary.succeeded, 1);
    }

    #[test]
    fn background_steps_are_tracked_in_context() {
        let steps = vec![Step::background("index", "index", |ctx, runner| {
            let pid = runner.spawn_detached("reindex", &ctx.src_dir())?;
            Ok(StepOutcome::Detached(pid))
        })];
        let mut context = ctx();

        let result = run("deploy", &steps, &mut context, &NullRunner::default()).unwrap();

        assert_eq!(result.steps[0].status, StepStatus::Detached);
        assert_eq!(result.steps[0].pid, Some(4242));
        assert_eq!(context.detached.len(), 1);
        assert_eq!(result.summary.detached, 1);
    }

    #[test]
    fn condition_skips_step() {
        let steps = vec![ok_step("ping").when(|_| Some("same revision".to_string()))];

        let result = run("deploy", &steps, &mut ctx(), &NullRunner::default()).unwrap();

        assert_eq!(result.steps[0].status, StepStatus::Skipped);
        assert_eq!(result.steps[0].warnings, vec!["same revision"]);
        assert_eq!(result.status, RunStatus::Success);
    }

    #[test]
    fn steps_share_context_updates() {
        let steps = vec![
            Step::required("record", "record", |ctx, _| {
                ctx.revisions = Some(RevisionPair::new("a", "b"));
                Ok(StepOutcome::Completed(None))
            }),
            Step::required("read", "read", |ctx, _| {
                Ok(StepOutcome::Completed(Some(ctx.revisions()?.log_range())))
            }),
        ];

        let result = run("deploy", &steps, &mut ctx(), &NullRunner::default()).unwrap();

        assert_eq!(result.steps[1].output.as_deref(), Some("a..b"));
        assert_eq!(result.revisions, Some(RevisionPair::new("a", "b")));
    }

    #[test]
    fn plan_runs_nothing() {
        let runner = NullRunner::default();
        let steps = vec![Step::required("cmd", "cmd", |ctx, runner| {
            runner.run("git fetch", &ctx.src_dir());
            Ok(StepOutcome::Completed(None))
        })];

        let result = plan("update", &steps).unwrap();

        assert_eq!(result.status, RunStatus::Planned);
        assert_eq!(result.steps[0].status, StepStatus::Planned);
        assert!(runner.commands.borrow().is_empty());
    }

    #[test]
    fn background_spawn_failure_does_not_change_run_status() {
        let steps = vec![
            failing("index", StepTier::Background),
            ok_step("after"),
        ];

        let result = run("deploy", &steps, &mut ctx(), &NullRunner::default()).unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.steps[0].status, StepStatus::Failed);
        assert_eq!(result.steps[0].warnings.len(), 1);
        assert_eq!(result.summary.failed, 1);
    }

    #[test]
    fn ignored_command_failure_keeps_exit_code_and_stderr() {
        let steps = vec![Step::best_effort("info", "svn status", |_, _| {
            Err(Error::local_command_failed(CommandFailedDetails {
                command: "svn status".to_string(),
                exit_code: 127,
                stdout: String::new(),
                stderr: "svn: command not found\n".to_string(),
                dir: Some("/srv/app/locale".to_string()),
                host: None,
            }))
        })];

        let result = run("update_info", &steps, &mut ctx(), &NullRunner::default()).unwrap();

        let error = result.steps[0].error.as_deref().unwrap();
        assert_eq!(
            error,
            "Command failed: svn status (exit 127: svn: command not found)"
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let steps = vec![ok_step("same"), ok_step("same")];
        let err = plan("update", &steps).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }
}
