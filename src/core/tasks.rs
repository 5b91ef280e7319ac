//! Named deployment tasks.
//!
//! Each task expands to an ordered list of pipeline steps. Composite tasks
//! concatenate the step lists of the tasks they are made of, so a full
//! deploy is still one flat sequence run by a single driver.

use std::path::PathBuf;

use serde::Serialize;

use crate::describe;
use crate::error::{Error, Result};
use crate::notify::{self, Deployment};
use crate::pipeline::{self, DeployContext, RunResult, Step, StepOutcome, StepTier};
use crate::revision::{self, RevisionPair};
use crate::runner::{run_checked, CommandRunner};
use crate::settings::{HostGroup, Settings};
use crate::ssh;
use crate::utils::shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    UpdateCode,
    UpdateInfo,
    UpdateLocales,
    UpdateAssets,
    Database,
    UpdateRevisionFiles,
    CheckinChanges,
    DeployApp,
    PrimeApp,
    UpdateCelery,
    PingNewrelic,
    UpdateEsIndexes,
    ValidateFunFacts,
    GenerateHumanstxt,
    PreUpdate,
    Update,
    Deploy,
    UpdateApp,
    Full,
}

impl Task {
    pub const ALL: [Task; 19] = [
        Task::UpdateCode,
        Task::UpdateInfo,
        Task::UpdateLocales,
        Task::UpdateAssets,
        Task::Database,
        Task::UpdateRevisionFiles,
        Task::CheckinChanges,
        Task::DeployApp,
        Task::PrimeApp,
        Task::UpdateCelery,
        Task::PingNewrelic,
        Task::UpdateEsIndexes,
        Task::ValidateFunFacts,
        Task::GenerateHumanstxt,
        Task::PreUpdate,
        Task::Update,
        Task::Deploy,
        Task::UpdateApp,
        Task::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::UpdateCode => "update_code",
            Task::UpdateInfo => "update_info",
            Task::UpdateLocales => "update_locales",
            Task::UpdateAssets => "update_assets",
            Task::Database => "database",
            Task::UpdateRevisionFiles => "update_revision_files",
            Task::CheckinChanges => "checkin_changes",
            Task::DeployApp => "deploy_app",
            Task::PrimeApp => "prime_app",
            Task::UpdateCelery => "update_celery",
            Task::PingNewrelic => "ping_newrelic",
            Task::UpdateEsIndexes => "update_es_indexes",
            Task::ValidateFunFacts => "validate_fun_facts",
            Task::GenerateHumanstxt => "generate_humanstxt",
            Task::PreUpdate => "pre_update",
            Task::Update => "update",
            Task::Deploy => "deploy",
            Task::UpdateApp => "update_app",
            Task::Full => "full",
        }
    }

    /// Accepts snake_case or kebab-case names.
    pub fn parse(name: &str) -> Result<Task> {
        let normalized = name.trim().replace('-', "_");
        Task::ALL
            .iter()
            .copied()
            .find(|task| task.as_str() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = Task::ALL.iter().map(|t| t.as_str()).collect();
                Error::validation_invalid_argument(
                    "task",
                    format!("Unknown task '{}'. Known tasks: {}", name, known.join(", ")),
                )
            })
    }

    /// Tasks that take a ref/tag argument (defaulting to `updateRef`).
    pub fn takes_ref(&self) -> bool {
        matches!(
            self,
            Task::UpdateCode | Task::PreUpdate | Task::UpdateApp | Task::Full
        )
    }

    pub fn steps(&self, settings: &Settings, git_ref: Option<&str>) -> Result<Vec<Step>> {
        if git_ref.is_some() && !self.takes_ref() {
            return Err(Error::validation_invalid_argument(
                "ref",
                format!("Task '{}' does not take a ref argument", self.as_str()),
            ));
        }
        let git_ref = git_ref.unwrap_or(&settings.update_ref);

        match self {
            Task::UpdateCode => Ok(update_code(git_ref)),
            Task::UpdateInfo => Ok(update_info(settings)),
            Task::UpdateLocales => Ok(update_locales()),
            Task::UpdateAssets => Ok(update_assets(settings)),
            Task::Database => Ok(database(settings)),
            Task::UpdateRevisionFiles => Ok(update_revision_files()),
            Task::CheckinChanges => checkin_changes(settings),
            Task::DeployApp => deploy_app(settings),
            Task::PrimeApp => prime_app(settings),
            Task::UpdateCelery => update_celery(settings),
            Task::PingNewrelic => Ok(vec![ping_newrelic()]),
            Task::UpdateEsIndexes => Ok(vec![update_es_indexes(settings)]),
            Task::ValidateFunFacts => Ok(vec![validate_fun_facts(settings)]),
            Task::GenerateHumanstxt => Ok(vec![generate_humanstxt(settings)]),
            Task::PreUpdate => Ok(pre_update(settings, git_ref)),
            Task::Update => Ok(update(settings)),
            Task::Deploy => deploy(settings),
            Task::UpdateApp => Ok(update_app(settings, git_ref)),
            Task::Full => full(settings, git_ref),
        }
    }
}

/// Build and run (or just plan) a task.
pub fn execute(
    task: Task,
    git_ref: Option<&str>,
    ctx: &mut DeployContext,
    runner: &dyn CommandRunner,
    dry_run: bool,
) -> Result<RunResult> {
    let steps = task.steps(&ctx.settings, git_ref)?;

    if dry_run {
        return pipeline::plan(task.as_str(), &steps);
    }

    pipeline::run(task.as_str(), &steps, ctx, runner)
}

// ============================================================================
// Step builders
// ============================================================================

/// A shell command run in the source tree (or a subdirectory of it).
fn local(id: &str, tier: StepTier, subdir: &'static str, command: impl Into<String>) -> Step {
    let command = command.into();
    let label = command.clone();
    let dir_of = move |ctx: &DeployContext| -> PathBuf {
        if subdir.is_empty() {
            ctx.src_dir()
        } else {
            ctx.src_dir().join(subdir)
        }
    };

    match tier {
        StepTier::Required => Step::required(id, &label, move |ctx, runner| {
            run_checked(runner, &command, &dir_of(ctx)).map(|out| StepOutcome::Completed(Some(out)))
        }),
        StepTier::BestEffort => Step::best_effort(id, &label, move |ctx, runner| {
            run_checked(runner, &command, &dir_of(ctx)).map(|out| StepOutcome::Completed(Some(out)))
        }),
        StepTier::Background => Step::background(id, &label, move |ctx, runner| {
            runner
                .spawn_detached(&command, &dir_of(ctx))
                .map(StepOutcome::Detached)
        }),
    }
}

/// A command run on every host of a group; aborts the run on failure.
fn remote(id: &str, group: &HostGroup, identity_file: Option<String>, command: String) -> Step {
    let label = format!("[{}] {}", group.name, command);
    let group = group.clone();

    Step::required(id, &label, move |_ctx, runner| {
        let outputs = ssh::run_on_group(runner, &group, identity_file.as_deref(), &command)?;
        let hosts: Vec<&str> = outputs.iter().map(|o| o.host.as_str()).collect();
        Ok(StepOutcome::Completed(Some(hosts.join(", "))))
    })
}

fn lang(settings: &Settings, args: &str) -> String {
    format!("LANG=en_US.UTF-8 {}", settings.manage(args))
}

// ============================================================================
// Named tasks
// ============================================================================

pub fn update_code(git_ref: &str) -> Vec<Step> {
    use StepTier::Required;
    vec![
        local("code.fetch", Required, "", "git fetch"),
        local(
            "code.checkout",
            Required,
            "",
            format!("git checkout -f {}", shell::quote_arg(git_ref)),
        ),
        local("code.submodule_sync", Required, "", "git submodule sync"),
        local(
            "code.submodule_update",
            Required,
            "",
            "git submodule update --init --recursive",
        ),
        local(
            "code.clean_pyc",
            Required,
            "",
            "find . -type f -name '*.pyc' -delete",
        ),
        local("code.clean_vendor", Required, "", "git clean -xdff vendor-local/"),
    ]
}

/// Diagnostics about the checked-out tree. Never fails the run.
pub fn update_info(settings: &Settings) -> Vec<Step> {
    use StepTier::BestEffort;
    vec![
        local("info.date", BestEffort, "", "date"),
        local("info.branch", BestEffort, "", "git branch"),
        local("info.log", BestEffort, "", "git log -3"),
        local("info.status", BestEffort, "", "git status"),
        local("info.submodules", BestEffort, "", "git submodule status"),
        local(
            "info.migrations",
            BestEffort,
            "",
            settings.manage("migrate --list"),
        ),
        local("info.locale_info", BestEffort, "locale", "svn info"),
        local("info.locale_status", BestEffort, "locale", "svn status"),
    ]
}

pub fn update_locales() -> Vec<Step> {
    use StepTier::Required;
    vec![
        local(
            "locales.clean",
            Required,
            "locale",
            "find . -name '*.mo' -delete",
        ),
        local("locales.svn_up", Required, "locale", "svn up"),
        local("locales.compile", Required, "locale", "./compile.sh ."),
    ]
}

pub fn update_assets(settings: &Settings) -> Vec<Step> {
    use StepTier::Required;
    vec![
        local(
            "assets.collectstatic",
            Required,
            "",
            lang(
                settings,
                "collectstatic --noinput --no-default-ignore -i .git",
            ),
        ),
        local(
            "assets.compress",
            Required,
            "",
            lang(settings, "compress --engine jinja2"),
        ),
        local(
            "assets.product_details",
            Required,
            "",
            lang(settings, "update_product_details"),
        ),
    ]
}

pub fn database(settings: &Settings) -> Vec<Step> {
    use StepTier::Required;
    vec![
        local(
            "database.syncdb",
            Required,
            "",
            settings.manage("syncdb --noinput"),
        ),
        local(
            "database.migrate",
            Required,
            "",
            settings.manage("migrate --noinput"),
        ),
    ]
}

pub fn update_revision_files() -> Vec<Step> {
    vec![Step::required(
        "revision.record",
        "Record revision markers",
        |ctx, runner| {
            let src = ctx.src_dir();
            let new_revision = run_checked(runner, "git rev-parse HEAD", &src)?;
            let old_revision = revision::rotate_markers(
                &src.join(&ctx.settings.revision_file),
                &src.join(&ctx.settings.prev_revision_file),
                &new_revision,
            )?;

            let output = format!("{} -> {}", old_revision, new_revision);
            ctx.revisions = Some(RevisionPair::new(old_revision, new_revision));
            Ok(StepOutcome::Completed(Some(output)))
        },
    )]
}

pub fn checkin_changes(settings: &Settings) -> Result<Vec<Step>> {
    Ok(vec![local(
        "checkin.deploy_script",
        StepTier::Required,
        "",
        settings.deploy_script()?,
    )])
}

pub fn deploy_app(settings: &Settings) -> Result<Vec<Step>> {
    let group = settings.web_hostgroup()?;
    let key = settings.ssh_key_path();
    Ok(vec![
        remote(
            "app.update",
            group,
            key.clone(),
            settings.remote_update_script()?.to_string(),
        ),
        remote(
            "app.touch_wsgi",
            group,
            key,
            format!("/bin/touch {}", shell::quote_path(settings.remote_wsgi()?)),
        ),
    ])
}

/// Warm each app server process with a burst of requests per port.
pub fn prime_app(settings: &Settings) -> Result<Vec<Step>> {
    let group = settings.web_hostgroup()?;
    let key = settings.ssh_key_path();
    let host_header = shell::quote_arg(&format!("Host: {}", settings.remote_hostname()?));

    Ok(settings
        .prime_ports
        .iter()
        .map(|port| {
            let command = format!(
                "for i in $(seq 1 {}); do curl -so /dev/null -H {} -I http://localhost:{}/ & sleep 1; done",
                settings.prime_requests, host_header, port
            );
            remote(&format!("app.prime_{}", port), group, key.clone(), command)
        })
        .collect())
}

pub fn update_celery(settings: &Settings) -> Result<Vec<Step>> {
    let group = settings.celery_hostgroup()?;
    let key = settings.ssh_key_path();
    Ok(vec![
        remote(
            "celery.update",
            group,
            key.clone(),
            settings.remote_update_script()?.to_string(),
        ),
        remote(
            "celery.restart",
            group,
            key,
            format!(
                "/sbin/service {} restart",
                shell::quote_arg(settings.celery_service()?)
            ),
        ),
    ])
}

/// Revisions recorded earlier in this run, or read back from the marker files.
fn recorded_revisions(ctx: &DeployContext) -> Result<RevisionPair> {
    if let Some(pair) = &ctx.revisions {
        return Ok(pair.clone());
    }

    let src = ctx.src_dir();
    let new = revision::read_marker(&src.join(&ctx.settings.revision_file))?;
    let old = revision::read_marker(&src.join(&ctx.settings.prev_revision_file))?;
    Ok(RevisionPair::new(old, new))
}

fn new_relic_configured(ctx: &DeployContext) -> Option<String> {
    if ctx.settings.new_relic.is_configured() {
        None
    } else {
        Some("New Relic API key or app id not configured".to_string())
    }
}

pub fn ping_newrelic() -> Step {
    Step::best_effort("notify.newrelic", "Post deployment to New Relic", |ctx, runner| {
        let revisions = recorded_revisions(ctx)?;
        let changelog = run_checked(
            runner,
            &format!("git log --oneline {}", shell::quote_arg(&revisions.log_range())),
            &ctx.src_dir(),
        )?;

        let description = describe::describe(&revisions.old, &revisions.new, &changelog);
        let deployment = Deployment {
            description: description.clone(),
            revision: revisions.new.clone(),
            app_id: ctx.settings.new_relic.app_id.clone().unwrap_or_default(),
            changelog: notify::changelog_with_compare_link(
                &changelog,
                &ctx.settings.compare_url,
                &revisions,
            ),
        };
        ctx.changelog = Some(changelog);

        let status = notify::post(&ctx.settings.new_relic, &deployment)?;
        Ok(StepOutcome::Completed(Some(format!(
            "{} (HTTP {})",
            description, status
        ))))
    })
    .when(new_relic_configured)
}

pub fn update_es_indexes(settings: &Settings) -> Step {
    local(
        "jobs.index_profiles",
        StepTier::Background,
        "",
        settings.manage("cron index_all_profiles"),
    )
}

pub fn validate_fun_facts(settings: &Settings) -> Step {
    local(
        "jobs.validate_fun_facts",
        StepTier::Background,
        "",
        settings.manage("cron validate_fun_facts"),
    )
}

pub fn generate_humanstxt(settings: &Settings) -> Step {
    local(
        "jobs.generate_humanstxt",
        StepTier::Background,
        "",
        settings.manage("cron generate_humanstxt"),
    )
}

// ============================================================================
// Composite tasks
// ============================================================================

pub fn pre_update(settings: &Settings, git_ref: &str) -> Vec<Step> {
    let mut steps = update_code(git_ref);
    steps.extend(update_info(settings));
    steps
}

pub fn update(settings: &Settings) -> Vec<Step> {
    let mut steps = update_locales();
    steps.extend(update_assets(settings));
    steps.extend(database(settings));
    steps
}

fn revision_changed(ctx: &DeployContext) -> Option<String> {
    match &ctx.revisions {
        Some(pair) if pair.is_same() => Some(format!("revision {} unchanged", pair.new)),
        _ => None,
    }
}

fn new_relic_and_revision_changed(ctx: &DeployContext) -> Option<String> {
    revision_changed(ctx).or_else(|| new_relic_configured(ctx))
}

pub fn deploy(settings: &Settings) -> Result<Vec<Step>> {
    let mut steps = update_revision_files();
    steps.extend(checkin_changes(settings)?);
    steps.extend(deploy_app(settings)?);
    steps.extend(prime_app(settings)?);
    steps.extend(update_celery(settings)?);

    // Nothing below may fail the deploy; skipped when the same revision is pushed again.
    steps.push(ping_newrelic().when(new_relic_and_revision_changed));
    steps.push(update_es_indexes(settings).when(revision_changed));
    steps.push(validate_fun_facts(settings).when(revision_changed));
    steps.push(generate_humanstxt(settings).when(revision_changed));
    Ok(steps)
}

pub fn update_app(settings: &Settings, git_ref: &str) -> Vec<Step> {
    let mut steps = pre_update(settings, git_ref);
    steps.extend(update(settings));
    steps
}

pub fn full(settings: &Settings, git_ref: &str) -> Result<Vec<Step>> {
    let mut steps = update_app(settings, git_ref);
    steps.extend(deploy(settings)?);
    Ok(steps)
}
