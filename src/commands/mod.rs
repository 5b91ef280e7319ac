use rollout::settings::{self, Settings};

pub type CmdResult<T> = rollout::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub config: Option<String>,
    pub dry_run: bool,
}

impl GlobalArgs {
    pub fn load_settings(&self) -> rollout::Result<Settings> {
        settings::load(self.config.as_deref())
    }
}

pub mod config;
pub mod deploy;
pub mod describe;
pub mod task;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run_json($args))
    };
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (rollout::Result<serde_json::Value>, i32) {
    crate::tty::status("rollout is working...");

    match command {
        // Commands without global context
        crate::Commands::Describe(args) => dispatch!(args, describe),
        crate::Commands::Tasks => crate::output::map_cmd_result_to_json(task::list()),

        // Commands with global context
        crate::Commands::Full(args) => dispatch!(deploy::Pipeline::Full(args), global, deploy),
        crate::Commands::UpdateApp(args) => {
            dispatch!(deploy::Pipeline::UpdateApp(args), global, deploy)
        }
        crate::Commands::PreUpdate(args) => {
            dispatch!(deploy::Pipeline::PreUpdate(args), global, deploy)
        }
        crate::Commands::Update => dispatch!(deploy::Pipeline::Update, global, deploy),
        crate::Commands::Deploy => dispatch!(deploy::Pipeline::Deploy, global, deploy),
        crate::Commands::Task(args) => dispatch!(args, global, task),
        crate::Commands::Config(args) => dispatch!(args, global, config),
    }
}
