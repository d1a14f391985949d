//! ST-007: Executor: orchestration loop for apply, destroy, and refresh.
//!
//! Resources are handled one at a time in plan order:
//! plan → for each change: handler call → merge state → lock → events

use super::drift::{self, DriftFinding};
use super::eventlog;
use super::planner;
use super::state;
use super::types::*;
use crate::api::CloudApi;
use crate::error::ProviderError;
use crate::resources::{self, merge_state, HandlerCtx, ResourceHandler, ResourceState};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

/// Configuration for an apply run.
pub struct ApplyConfig<'a> {
    pub config: &'a StratusConfig,
    pub state_dir: &'a Path,
    pub api: &'a dyn CloudApi,
    pub dry_run: bool,
    pub resource_filter: Option<&'a str>,
}

/// Configuration for a destroy run.
pub struct DestroyConfig<'a> {
    pub config: &'a StratusConfig,
    pub state_dir: &'a Path,
    pub api: &'a dyn CloudApi,
    pub resource_filter: Option<&'a str>,
}

/// Outcome of one planned change.
enum ResourceOutcome {
    Converged,
    Destroyed,
    Unchanged,
    Skipped,
    /// Includes whether to stop the run.
    Failed { should_stop: bool },
}

/// Shared context for recording resource outcomes.
struct RecordCtx<'a> {
    lock: &'a mut StateLock,
    state_dir: &'a Path,
    stack: &'a str,
    event_log: bool,
    failure_policy: &'a FailurePolicy,
}

impl RecordCtx<'_> {
    fn log_event(&self, event: ProvenanceEvent) {
        log_event(self.state_dir, self.stack, self.event_log, event);
    }
}

fn log_event(state_dir: &Path, stack: &str, enabled: bool, event: ProvenanceEvent) {
    if !enabled {
        return;
    }
    if let Err(e) = eventlog::append_event(state_dir, stack, event) {
        warn!(stack, error = %e, "cannot append to event log");
    }
}

/// Execute the apply loop.
pub async fn apply(cfg: &ApplyConfig<'_>) -> Result<ApplyResult, String> {
    let start = Instant::now();
    let config = cfg.config;
    let existing = state::load_lock(cfg.state_dir, &config.name)?;
    let plan = planner::plan(config, existing.as_ref());

    if cfg.dry_run {
        return Ok(ApplyResult {
            name: config.name.clone(),
            resources_unchanged: plan.unchanged,
            total_duration: start.elapsed(),
            ..ApplyResult::default()
        });
    }

    let run_id = eventlog::generate_run_id();
    let mut lock = existing.unwrap_or_else(|| state::new_lock(&config.name));
    let mut result = ApplyResult {
        name: config.name.clone(),
        ..ApplyResult::default()
    };

    log_event(
        cfg.state_dir,
        &config.name,
        config.policy.event_log,
        ProvenanceEvent::ApplyStarted {
            name: config.name.clone(),
            run_id: run_id.clone(),
            stratus_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );
    info!(stack = %config.name, %run_id, changes = plan.changes.len(), "apply started");

    let mut ctx = RecordCtx {
        lock: &mut lock,
        state_dir: cfg.state_dir,
        stack: &config.name,
        event_log: config.policy.event_log,
        failure_policy: &config.policy.failure,
    };

    for change in &plan.changes {
        if cfg.resource_filter.is_some_and(|f| f != change.resource_id) {
            continue;
        }
        let outcome = if change.action == PlanAction::NoOp {
            ResourceOutcome::Unchanged
        } else {
            apply_change(cfg.api, config, change, &mut ctx).await
        };
        match outcome {
            ResourceOutcome::Converged => result.resources_converged += 1,
            ResourceOutcome::Destroyed => result.resources_destroyed += 1,
            ResourceOutcome::Unchanged => result.resources_unchanged += 1,
            ResourceOutcome::Skipped => {}
            ResourceOutcome::Failed { should_stop } => {
                result.resources_failed += 1;
                if should_stop {
                    break;
                }
            }
        }
    }

    finish_run(cfg.state_dir, config, &mut lock, &run_id, &mut result, start)?;
    Ok(result)
}

/// Destroy every resource recorded in the lock, in reverse order.
pub async fn destroy(cfg: &DestroyConfig<'_>) -> Result<ApplyResult, String> {
    let start = Instant::now();
    let config = cfg.config;
    let Some(mut lock) = state::load_lock(cfg.state_dir, &config.name)? else {
        info!(stack = %config.name, "no state lock, nothing to destroy");
        return Ok(ApplyResult {
            name: config.name.clone(),
            total_duration: start.elapsed(),
            ..ApplyResult::default()
        });
    };
    let plan = planner::plan_destroy(&lock);
    let run_id = eventlog::generate_run_id();
    let mut result = ApplyResult {
        name: config.name.clone(),
        ..ApplyResult::default()
    };

    log_event(
        cfg.state_dir,
        &config.name,
        config.policy.event_log,
        ProvenanceEvent::ApplyStarted {
            name: config.name.clone(),
            run_id: run_id.clone(),
            stratus_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );

    let mut ctx = RecordCtx {
        lock: &mut lock,
        state_dir: cfg.state_dir,
        stack: &config.name,
        event_log: config.policy.event_log,
        failure_policy: &config.policy.failure,
    };

    for change in &plan.changes {
        if cfg.resource_filter.is_some_and(|f| f != change.resource_id) {
            continue;
        }
        match apply_change(cfg.api, config, change, &mut ctx).await {
            ResourceOutcome::Destroyed => result.resources_destroyed += 1,
            ResourceOutcome::Failed { should_stop } => {
                result.resources_failed += 1;
                if should_stop {
                    break;
                }
            }
            _ => {}
        }
    }

    finish_run(cfg.state_dir, config, &mut lock, &run_id, &mut result, start)?;
    Ok(result)
}

/// Read every recorded resource back from AWS and mark drift in the lock.
pub async fn refresh(
    config: &StratusConfig,
    state_dir: &Path,
    api: &dyn CloudApi,
) -> Result<Vec<DriftFinding>, String> {
    let Some(mut lock) = state::load_lock(state_dir, &config.name)? else {
        return Ok(Vec::new());
    };
    let mut findings = Vec::new();

    for (resource_id, rl) in lock.resources.iter_mut() {
        let Some(ref id) = rl.id else {
            continue;
        };
        let handler = resources::handler(rl.resource_type);
        let timeouts = config
            .resources
            .get(resource_id)
            .map(|d| d.timeouts.clone())
            .unwrap_or_default();
        let ctx = HandlerCtx::new(api, &timeouts);
        let live = handler
            .read(&ctx, id)
            .await
            .map_err(|e| format!("{}: {}", resource_id, e))?;

        let recorded = handler.schema().observable(&rl.attributes);
        match drift::check_drift(resource_id, rl.resource_type, &recorded, live.as_ref()) {
            Some(finding) => {
                warn!(resource = %resource_id, detail = %finding.detail, "drift detected");
                rl.status = match (&live, &rl.status) {
                    (None, _) => ResourceStatus::Missing,
                    (Some(_), ResourceStatus::Tainted) => ResourceStatus::Tainted,
                    (Some(_), _) => ResourceStatus::Drifted,
                };
                findings.push(finding);
            }
            None => {
                if let Some(live) = live {
                    rl.attributes.extend(handler.schema().computed(&live));
                }
                if rl.status == ResourceStatus::Drifted {
                    rl.status = ResourceStatus::Converged;
                }
            }
        }
    }

    lock.generated_at = eventlog::now_iso8601();
    if config.policy.lock_file {
        state::save_lock(state_dir, &lock)?;
    }
    Ok(findings)
}

fn finish_run(
    state_dir: &Path,
    config: &StratusConfig,
    lock: &mut StateLock,
    run_id: &str,
    result: &mut ApplyResult,
    start: Instant,
) -> Result<(), String> {
    lock.generated_at = eventlog::now_iso8601();
    if config.policy.lock_file {
        state::save_lock(state_dir, lock)?;
    }
    result.total_duration = start.elapsed();

    log_event(
        state_dir,
        &config.name,
        config.policy.event_log,
        ProvenanceEvent::ApplyCompleted {
            name: config.name.clone(),
            run_id: run_id.to_string(),
            resources_converged: result.resources_converged,
            resources_unchanged: result.resources_unchanged,
            resources_destroyed: result.resources_destroyed,
            resources_failed: result.resources_failed,
            total_seconds: result.total_duration.as_secs_f64(),
        },
    );
    info!(
        stack = %config.name,
        converged = result.resources_converged,
        unchanged = result.resources_unchanged,
        destroyed = result.resources_destroyed,
        failed = result.resources_failed,
        elapsed_ms = result.total_duration.as_millis() as u64,
        "run completed"
    );
    Ok(())
}

/// Apply a single planned change, returning its outcome.
async fn apply_change(
    api: &dyn CloudApi,
    config: &StratusConfig,
    change: &PlannedChange,
    ctx: &mut RecordCtx<'_>,
) -> ResourceOutcome {
    ctx.log_event(ProvenanceEvent::ResourceStarted {
        resource: change.resource_id.clone(),
        action: change.action.to_string(),
    });
    info!(resource = %change.resource_id, action = %change.action, "{}", change.description);

    let resource_start = Instant::now();
    let prior = ctx.lock.resources.get(&change.resource_id).cloned();
    let decl = config.resources.get(&change.resource_id);
    let timeouts = decl.map(|d| d.timeouts.clone()).unwrap_or_default();
    let hctx = HandlerCtx::new(api, &timeouts);

    if change.action == PlanAction::Destroy {
        let Some(rl) = prior else {
            return ResourceOutcome::Skipped;
        };
        let Some(ref id) = rl.id else {
            return ResourceOutcome::Skipped;
        };
        let handler = resources::handler(rl.resource_type);
        return match handler.delete(&hctx, id, &rl.attributes).await {
            Ok(()) => {
                let duration = resource_start.elapsed().as_secs_f64();
                ctx.lock.resources.shift_remove(&change.resource_id);
                ctx.log_event(ProvenanceEvent::ResourceDestroyed {
                    resource: change.resource_id.clone(),
                    remote_id: id.clone(),
                    duration_seconds: duration,
                });
                info!(resource = %change.resource_id, remote_id = %id, "destroyed");
                ResourceOutcome::Destroyed
            }
            Err(e) => record_failure(ctx, change, rl.resource_type, rl.id.clone(), &e.to_string()),
        };
    }

    let Some(decl) = decl else {
        return ResourceOutcome::Skipped;
    };
    let handler = resources::handler(decl.resource_type);
    let (desired, hash) = planner::desired_state(decl);

    let applied = match (change.action.clone(), prior) {
        (PlanAction::Update, Some(rl @ ResourceLock { id: Some(_), .. })) => {
            update_existing(handler, &hctx, &change.resource_id, &rl, &desired).await
        }
        (PlanAction::Replace, Some(rl)) => {
            if let Some(ref id) = rl.id {
                let old = resources::handler(rl.resource_type);
                if let Err(e) = old.delete(&hctx, id, &rl.attributes).await {
                    return record_failure(ctx, change, rl.resource_type, rl.id.clone(), &e.to_string());
                }
                info!(resource = %change.resource_id, remote_id = %id, "destroyed for replacement");
            }
            handler.create(&hctx, &desired).await
        }
        _ => handler.create(&hctx, &desired).await,
    };
    let duration = resource_start.elapsed().as_secs_f64();

    match applied {
        Ok(state) => {
            let attributes = merge_state(handler, &desired, &state.attributes);
            ctx.lock.resources.insert(
                change.resource_id.clone(),
                ResourceLock {
                    resource_type: decl.resource_type,
                    id: Some(state.id.clone()),
                    status: ResourceStatus::Converged,
                    applied_at: Some(eventlog::now_iso8601()),
                    duration_seconds: Some(duration),
                    hash: hash.clone(),
                    attributes,
                },
            );
            ctx.log_event(ProvenanceEvent::ResourceConverged {
                resource: change.resource_id.clone(),
                remote_id: state.id.clone(),
                duration_seconds: duration,
                hash,
            });
            info!(
                resource = %change.resource_id,
                remote_id = %state.id,
                elapsed_ms = (duration * 1000.0) as u64,
                "converged"
            );
            ResourceOutcome::Converged
        }
        Err(e) => {
            if let Some(created) = e.created_id() {
                let attributes = merge_state(handler, &desired, &AttributeMap::new());
                return record_tainted(ctx, change, decl.resource_type, created, attributes, &e.to_string());
            }
            // a failed update leaves the remote entity in place; a failed create or replace does not
            let remote_id = match change.action {
                PlanAction::Update => ctx
                    .lock
                    .resources
                    .get(&change.resource_id)
                    .and_then(|rl| rl.id.clone()),
                _ => None,
            };
            record_failure(ctx, change, decl.resource_type, remote_id, &e.to_string())
        }
    }
}

/// Update a recorded entity in place. A drifted entity is read first and its
/// drifted attributes replace the recorded ones, so the update pushes them back.
async fn update_existing(
    handler: &dyn ResourceHandler,
    hctx: &HandlerCtx<'_>,
    resource_id: &str,
    rl: &ResourceLock,
    desired: &AttributeMap,
) -> Result<ResourceState, ProviderError> {
    let Some(ref id) = rl.id else {
        return handler.create(hctx, desired).await;
    };
    if rl.status != ResourceStatus::Drifted {
        return handler.update(hctx, id, &rl.attributes, desired).await;
    }
    let Some(live) = handler.read(hctx, id).await? else {
        info!(resource = %resource_id, remote_id = %id, "gone since refresh, creating");
        return handler.create(hctx, desired).await;
    };

    let recorded = handler.schema().observable(&rl.attributes);
    let mut prior = rl.attributes.clone();
    for key in drift::drifted_attributes(&recorded, &live) {
        match live.get(&key) {
            Some(value) => prior.insert(key, value.clone()),
            None => prior.shift_remove(&key),
        };
    }

    let reasons = handler.replacement_reasons(&prior, desired);
    if reasons.is_empty() {
        return handler.update(hctx, id, &prior, desired).await;
    }
    info!(
        resource = %resource_id,
        remote_id = %id,
        "drifted {} forces replacement",
        reasons.join(", ")
    );
    handler.delete(hctx, id, &prior).await?;
    handler.create(hctx, desired).await
}

/// Record an entity that was created but never became usable, so the next
/// plan replaces it instead of creating a second one.
fn record_tainted(
    ctx: &mut RecordCtx<'_>,
    change: &PlannedChange,
    resource_type: ResourceType,
    remote_id: &str,
    attributes: AttributeMap,
    error: &str,
) -> ResourceOutcome {
    ctx.lock.resources.insert(
        change.resource_id.clone(),
        ResourceLock {
            resource_type,
            id: Some(remote_id.to_string()),
            status: ResourceStatus::Tainted,
            applied_at: Some(eventlog::now_iso8601()),
            duration_seconds: None,
            hash: String::new(),
            attributes,
        },
    );
    warn!(resource = %change.resource_id, remote_id, "created but not usable, marked tainted");
    failed(ctx, change, error)
}

/// Record a resource failure into the lock and event log.
fn record_failure(
    ctx: &mut RecordCtx<'_>,
    change: &PlannedChange,
    resource_type: ResourceType,
    remote_id: Option<String>,
    error: &str,
) -> ResourceOutcome {
    let prior = ctx
        .lock
        .resources
        .get(&change.resource_id)
        .filter(|_| remote_id.is_some());
    let attributes = prior.map(|rl| rl.attributes.clone()).unwrap_or_default();
    // a tainted entity stays tainted until it is replaced
    let status = match prior.map(|rl| &rl.status) {
        Some(ResourceStatus::Tainted) => ResourceStatus::Tainted,
        _ => ResourceStatus::Failed,
    };
    ctx.lock.resources.insert(
        change.resource_id.clone(),
        ResourceLock {
            resource_type,
            id: remote_id,
            status,
            applied_at: Some(eventlog::now_iso8601()),
            duration_seconds: None,
            hash: String::new(),
            attributes,
        },
    );
    failed(ctx, change, error)
}

fn failed(ctx: &mut RecordCtx<'_>, change: &PlannedChange, error: &str) -> ResourceOutcome {
    ctx.log_event(ProvenanceEvent::ResourceFailed {
        resource: change.resource_id.clone(),
        error: error.to_string(),
    });
    error!(resource = %change.resource_id, action = %change.action, %error, "failed");

    let should_stop = *ctx.failure_policy == FailurePolicy::StopOnFirst;
    if should_stop {
        warn!(stack = %ctx.stack, resource = %change.resource_id, "stopping after first failure");
    }
    ResourceOutcome::Failed { should_stop }
}
