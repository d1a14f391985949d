//! ST-060: CLI subcommands: init, validate, schema, plan, apply, destroy, refresh, status.

use crate::api::awscli::AwsCli;
use crate::api::CloudApi;
use crate::core::{executor, parser, planner, state, types};
use crate::resources;
use crate::resources::schema::{Attribute, AttrType};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stratus project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stratus.yaml without calling AWS
    Validate {
        /// Path to stratus.yaml
        #[arg(short, long, default_value = "stratus.yaml")]
        file: PathBuf,
    },

    /// Show the attribute schema of one resource type, or list all types
    Schema {
        /// Resource type, e.g. aws_eks_fargate_profile
        resource_type: Option<String>,
    },

    /// Show execution plan (diff desired vs recorded state)
    Plan {
        /// Path to stratus.yaml
        #[arg(short, long, default_value = "stratus.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Create, update, or replace resources to match the config
    Apply {
        /// Path to stratus.yaml
        #[arg(short, long, default_value = "stratus.yaml")]
        file: PathBuf,

        /// Target specific resource
        #[arg(short, long)]
        resource: Option<String>,

        /// Show the plan without calling AWS
        #[arg(long)]
        dry_run: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Delete every resource recorded in the state lock
    Destroy {
        /// Path to stratus.yaml
        #[arg(short, long, default_value = "stratus.yaml")]
        file: PathBuf,

        /// Target specific resource
        #[arg(short, long)]
        resource: Option<String>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Read recorded resources back from AWS and report drift
    Refresh {
        /// Path to stratus.yaml
        #[arg(short, long, default_value = "stratus.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Exit non-zero on any drift (for CI/cron)
        #[arg(long)]
        fail_on_drift: bool,
    },

    /// Show current state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target specific stack
        #[arg(short, long)]
        name: Option<String>,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Schema { resource_type } => cmd_schema(resource_type.as_deref()),
        Commands::Plan { file, state_dir } => cmd_plan(&file, &state_dir),
        Commands::Apply {
            file,
            resource,
            dry_run,
            state_dir,
        } => {
            let config = parser::load_config(&file)?;
            let api = AwsCli::from_settings(&config.provider);
            cmd_apply(&config, &state_dir, &api, resource.as_deref(), dry_run).await
        }
        Commands::Destroy {
            file,
            resource,
            state_dir,
        } => {
            let config = parser::load_config(&file)?;
            let api = AwsCli::from_settings(&config.provider);
            cmd_destroy(&config, &state_dir, &api, resource.as_deref()).await
        }
        Commands::Refresh {
            file,
            state_dir,
            fail_on_drift,
        } => {
            let config = parser::load_config(&file)?;
            let api = AwsCli::from_settings(&config.provider);
            cmd_refresh(&config, &state_dir, &api, fail_on_drift).await
        }
        Commands::Status { state_dir, name } => cmd_status(&state_dir, name.as_deref()),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("stratus.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let template = r#"version: "1.0"
name: my-stack
description: "Managed by stratus"

provider:
  region: us-east-1

resources: {}

policy:
  failure: stop_on_first
  lock_file: true
  event_log: true
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized stratus project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        println!("OK: {} ({} resources)", config.name, config.resources.len());
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

fn cmd_schema(resource_type: Option<&str>) -> Result<(), String> {
    let Some(name) = resource_type else {
        for t in types::ResourceType::ALL {
            println!("{}", t);
        }
        return Ok(());
    };
    let t: types::ResourceType = name.parse()?;
    println!("{}", t);
    for attr in &resources::handler(t).schema().attributes {
        print_attribute(attr, 1);
    }
    Ok(())
}

fn print_attribute(attr: &Attribute, depth: usize) {
    let indent = "  ".repeat(depth);
    let mut flags = vec![attr.presence.to_string()];
    if attr.force_new {
        flags.push("forces replacement".to_string());
    }
    if let Some(ref default) = attr.default {
        flags.push(format!("default {}", default));
    }
    let description = if attr.description.is_empty() {
        String::new()
    } else {
        format!(": {}", attr.description)
    };
    println!(
        "{}{} ({}; {}){}",
        indent,
        attr.name,
        attr.ty,
        flags.join(", "),
        description
    );
    let nested = match &attr.ty {
        AttrType::Block(fields) => Some(fields),
        AttrType::List(inner) => match inner.as_ref() {
            AttrType::Block(fields) => Some(fields),
            _ => None,
        },
        _ => None,
    };
    for field in nested.into_iter().flatten() {
        print_attribute(field, depth + 1);
    }
}

fn cmd_plan(file: &Path, state_dir: &Path) -> Result<(), String> {
    let config = parser::load_config(file)?;
    let lock = state::load_lock(state_dir, &config.name)?;
    let plan = planner::plan(&config, lock.as_ref());
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} resources)", plan.name, plan.changes.len());
    println!();

    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Replace => "-/+",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {:>3} {} [{}]", symbol, change.description, change.resource_type);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to replace, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_replace, plan.to_destroy, plan.unchanged
    );
}

async fn cmd_apply(
    config: &types::StratusConfig,
    state_dir: &Path,
    api: &dyn CloudApi,
    resource_filter: Option<&str>,
    dry_run: bool,
) -> Result<(), String> {
    if dry_run {
        let lock = state::load_lock(state_dir, &config.name)?;
        print_plan(&planner::plan(config, lock.as_ref()));
        println!();
        println!("Dry run: no changes applied.");
        return Ok(());
    }

    let result = executor::apply(&executor::ApplyConfig {
        config,
        state_dir,
        api,
        dry_run,
        resource_filter,
    })
    .await?;

    print_result("Apply", &result)
}

async fn cmd_destroy(
    config: &types::StratusConfig,
    state_dir: &Path,
    api: &dyn CloudApi,
    resource_filter: Option<&str>,
) -> Result<(), String> {
    let result = executor::destroy(&executor::DestroyConfig {
        config,
        state_dir,
        api,
        resource_filter,
    })
    .await?;

    print_result("Destroy", &result)
}

fn print_result(verb: &str, result: &types::ApplyResult) -> Result<(), String> {
    println!(
        "{}: {} converged, {} unchanged, {} destroyed, {} failed ({:.1}s)",
        result.name,
        result.resources_converged,
        result.resources_unchanged,
        result.resources_destroyed,
        result.resources_failed,
        result.total_duration.as_secs_f64()
    );
    if result.resources_failed > 0 {
        return Err(format!(
            "{} completed with errors: {} resource(s) failed",
            verb, result.resources_failed
        ));
    }
    println!("{} complete.", verb);
    Ok(())
}

async fn cmd_refresh(
    config: &types::StratusConfig,
    state_dir: &Path,
    api: &dyn CloudApi,
    fail_on_drift: bool,
) -> Result<(), String> {
    let findings = executor::refresh(config, state_dir, api).await?;
    if findings.is_empty() {
        println!("No drift detected.");
        return Ok(());
    }
    for f in &findings {
        println!("  DRIFTED: {} [{}] ({})", f.resource_id, f.resource_type, f.detail);
    }
    println!();
    println!("Drift detected: {} resource(s)", findings.len());
    if fail_on_drift {
        return Err(format!("{} drift finding(s)", findings.len()));
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, name_filter: Option<&str>) -> Result<(), String> {
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read state dir {}: {}", state_dir.display(), e))?;

    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| name_filter.is_none_or(|f| f == n))
        .collect();
    names.sort();

    let mut found = false;
    for name in &names {
        let Some(lock) = state::load_lock(state_dir, name)? else {
            continue;
        };
        found = true;
        println!("Stack: {}", lock.name);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        println!("  Resources: {}", lock.resources.len());

        for (id, rl) in &lock.resources {
            let duration = rl
                .duration_seconds
                .map(|d| format!(" ({:.2}s)", d))
                .unwrap_or_default();
            let remote = rl.id.as_deref().unwrap_or("-");
            println!(
                "    {}: {} [{}] {}{}",
                id, rl.status, rl.resource_type, remote, duration
            );
        }
        println!();
    }

    if !found {
        println!("No state found. Run `stratus apply` first.");
    }

    Ok(())
}
