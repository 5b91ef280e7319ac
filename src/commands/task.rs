use clap::Args;
use serde::Serialize;

use rollout::tasks::Task;

use super::deploy::{self, RunOutput};
use super::CmdResult;

#[derive(Args)]
pub struct TaskArgs {
    /// Task name (e.g. update_code, database, ping_newrelic)
    pub name: String,

    /// Git ref for tasks that check out code
    pub git_ref: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub name: &'static str,
    pub takes_ref: bool,
}

#[derive(Serialize)]
pub struct TaskListOutput {
    pub command: String,
    pub tasks: Vec<TaskInfo>,
}

pub fn run(args: TaskArgs, global: &crate::commands::GlobalArgs) -> CmdResult<RunOutput> {
    let task = Task::parse(&args.name)?;
    deploy::run_task(task, args.git_ref.as_deref(), global)
}

pub fn list() -> CmdResult<TaskListOutput> {
    Ok((
        TaskListOutput {
            command: "tasks".to_string(),
            tasks: Task::ALL
                .iter()
                .map(|task| TaskInfo {
                    name: task.as_str(),
                    takes_ref: task.takes_ref(),
                })
                .collect(),
        },
        0,
    ))
}
