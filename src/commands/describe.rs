use clap::Args;
use serde::Serialize;
use std::io::{IsTerminal, Read};

use rollout::describe;

use super::CmdResult;

#[derive(Args)]
pub struct DescribeArgs {
    /// Revision currently deployed
    pub old_revision: String,

    /// Revision being pushed
    pub new_revision: String,

    /// Changelog text (`git log --oneline` output)
    #[arg(long, conflicts_with = "changelog_file")]
    pub changelog: Option<String>,

    /// Read the changelog from a file, or `-` for stdin
    #[arg(long, value_name = "PATH")]
    pub changelog_file: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeOutput {
    pub command: String,
    pub description: String,
    pub bugs: Vec<String>,
}

pub fn run_json(args: DescribeArgs) -> CmdResult<DescribeOutput> {
    if args.old_revision.is_empty() || args.new_revision.is_empty() {
        return Err(rollout::Error::validation_invalid_argument(
            "revision",
            "Revisions must not be empty",
        ));
    }

    let changelog = match (args.changelog, args.changelog_file.as_deref()) {
        (Some(text), _) => text,
        (None, Some(path)) => read_changelog(path)?,
        (None, None) => String::new(),
    };

    Ok((
        DescribeOutput {
            command: "describe".to_string(),
            description: describe::describe(&args.old_revision, &args.new_revision, &changelog),
            bugs: describe::extract_bugs(&changelog),
        },
        0,
    ))
}

fn read_changelog(path: &str) -> rollout::Result<String> {
    if path.trim() == "-" {
        let mut stdin = std::io::stdin();
        if stdin.is_terminal() {
            return Err(rollout::Error::validation_invalid_argument(
                "changelog_file",
                "Cannot read changelog from stdin when stdin is a TTY",
            ));
        }
        let mut buf = String::new();
        stdin.read_to_string(&mut buf).map_err(|e| {
            rollout::Error::internal_io(e.to_string(), Some("read stdin".to_string()))
        })?;
        return Ok(buf);
    }

    std::fs::read_to_string(path)
        .map_err(|e| rollout::Error::internal_io(e.to_string(), Some(format!("read {}", path))))
}
