use clap::Args;
use serde::Serialize;

use rollout::pipeline::{DeployContext, RunResult};
use rollout::runner::ShellRunner;
use rollout::tasks::{self, Task};

use super::CmdResult;

#[derive(Args)]
pub struct RefArgs {
    /// Git ref or tag to deploy (defaults to the configured updateRef)
    pub git_ref: Option<String>,
}

/// The composite tasks exposed as top-level commands.
pub enum Pipeline {
    Full(RefArgs),
    UpdateApp(RefArgs),
    PreUpdate(RefArgs),
    Update,
    Deploy,
}

impl Pipeline {
    fn into_parts(self) -> (Task, Option<String>) {
        match self {
            Pipeline::Full(args) => (Task::Full, args.git_ref),
            Pipeline::UpdateApp(args) => (Task::UpdateApp, args.git_ref),
            Pipeline::PreUpdate(args) => (Task::PreUpdate, args.git_ref),
            Pipeline::Update => (Task::Update, None),
            Pipeline::Deploy => (Task::Deploy, None),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub command: String,
    pub dry_run: bool,
    #[serde(flatten)]
    pub run: RunResult,
}

pub fn run(pipeline: Pipeline, global: &crate::commands::GlobalArgs) -> CmdResult<RunOutput> {
    let (task, git_ref) = pipeline.into_parts();
    run_task(task, git_ref.as_deref(), global)
}

/// Shared by the composite commands and `rollout task`.
pub fn run_task(
    task: Task,
    git_ref: Option<&str>,
    global: &crate::commands::GlobalArgs,
) -> CmdResult<RunOutput> {
    let settings = global.load_settings()?;
    let mut ctx = DeployContext::new(settings);

    let run = tasks::execute(task, git_ref, &mut ctx, &ShellRunner, global.dry_run)?;

    Ok((
        RunOutput {
            command: format!("run.{}", task.as_str()),
            dry_run: global.dry_run,
            run,
        },
        0,
    ))
}
