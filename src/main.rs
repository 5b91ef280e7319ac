use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{config, deploy, describe, task};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "rollout")]
#[command(version = VERSION)]
#[command(about = "Deploy a Django web application to its web and celery hosts")]
struct Cli {
    /// Settings file (defaults to $ROLLOUT_CONFIG, then ~/.config/rollout/rollout.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,

    /// Print the planned steps without running anything
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// update-app, then deploy
    Full(deploy::RefArgs),
    /// pre_update then update
    UpdateApp(deploy::RefArgs),
    /// Fetch and check out code, then report on the tree
    PreUpdate(deploy::RefArgs),
    /// Compile locales, build assets and migrate the database
    Update,
    /// Record revisions, push to web and celery hosts, then run post-deploy jobs
    Deploy,
    /// Run a single named task
    Task(task::TaskArgs),
    /// List the named tasks
    Tasks,
    /// Describe a push from a revision pair and changelog
    Describe(describe::DescribeArgs),
    /// Inspect settings
    Config(config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let global = GlobalArgs {
        config: cli.config,
        dry_run: cli.dry_run,
    };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err.message);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
