//! ST-006: Plan generation: diff desired state against the state lock.
//!
//! Resources are planned in declaration order. Lock entries that no longer
//! appear in the config are destroyed last, in reverse lock order.

use super::hasher;
use super::types::*;
use crate::resources;

/// Normalized desired attributes of one declaration, and their hash.
pub fn desired_state(decl: &ResourceDecl) -> (AttributeMap, String) {
    let attrs = resources::handler(decl.resource_type).normalize(&decl.attributes);
    let hash = hasher::hash_desired(decl.resource_type, &attrs);
    (attrs, hash)
}

/// Generate an execution plan by comparing desired config to lock state.
pub fn plan(config: &StratusConfig, lock: Option<&StateLock>) -> ExecutionPlan {
    let mut changes = Vec::new();

    for (resource_id, decl) in &config.resources {
        let entry = lock.and_then(|l| l.resources.get(resource_id));
        let (action, description) = determine_action(resource_id, decl, entry);
        changes.push(PlannedChange {
            resource_id: resource_id.clone(),
            resource_type: decl.resource_type,
            action,
            description,
        });
    }

    if let Some(lock) = lock {
        for (resource_id, rl) in lock.resources.iter().rev() {
            if config.resources.contains_key(resource_id) || rl.id.is_none() {
                continue;
            }
            changes.push(PlannedChange {
                resource_id: resource_id.clone(),
                resource_type: rl.resource_type,
                action: PlanAction::Destroy,
                description: format!("{}: destroy (removed from config)", resource_id),
            });
        }
    }

    summarize(config.name.clone(), changes)
}

/// Plan the destruction of everything recorded in the lock, newest first.
pub fn plan_destroy(lock: &StateLock) -> ExecutionPlan {
    let changes = lock
        .resources
        .iter()
        .rev()
        .filter(|(_, rl)| rl.id.is_some())
        .map(|(resource_id, rl)| PlannedChange {
            resource_id: resource_id.clone(),
            resource_type: rl.resource_type,
            action: PlanAction::Destroy,
            description: format!("{}: destroy", resource_id),
        })
        .collect();
    summarize(lock.name.clone(), changes)
}

fn summarize(name: String, changes: Vec<PlannedChange>) -> ExecutionPlan {
    let count = |action: PlanAction| changes.iter().filter(|c| c.action == action).count() as u32;
    ExecutionPlan {
        name,
        to_create: count(PlanAction::Create),
        to_update: count(PlanAction::Update),
        to_replace: count(PlanAction::Replace),
        to_destroy: count(PlanAction::Destroy),
        unchanged: count(PlanAction::NoOp),
        changes,
    }
}

/// Determine what action to take for one declared resource.
fn determine_action(
    resource_id: &str,
    decl: &ResourceDecl,
    entry: Option<&ResourceLock>,
) -> (PlanAction, String) {
    let create = (PlanAction::Create, format!("{}: create", resource_id));
    let Some(rl) = entry else {
        return create;
    };
    // nothing remote to update when a create failed or the entity vanished
    if rl.id.is_none() || rl.status == ResourceStatus::Missing {
        return create;
    }

    if rl.resource_type != decl.resource_type {
        return (
            PlanAction::Replace,
            format!(
                "{}: replace (type changed from {})",
                resource_id, rl.resource_type
            ),
        );
    }

    if rl.status == ResourceStatus::Tainted {
        return (
            PlanAction::Replace,
            format!("{}: replace (tainted by a failed create)", resource_id),
        );
    }

    let (desired, hash) = desired_state(decl);
    if rl.status == ResourceStatus::Converged && rl.hash == hash {
        return (PlanAction::NoOp, format!("{}: no changes", resource_id));
    }

    let handler = resources::handler(decl.resource_type);
    let reasons = handler.replacement_reasons(&rl.attributes, &desired);
    if !reasons.is_empty() {
        return (
            PlanAction::Replace,
            format!(
                "{}: replace ({} forces replacement)",
                resource_id,
                reasons.join(", ")
            ),
        );
    }

    let schema = handler.schema();
    let changed = schema.changed(&rl.attributes, &desired);
    if changed.is_empty() {
        match rl.status {
            ResourceStatus::Converged => {
                return (PlanAction::NoOp, format!("{}: no changes", resource_id));
            }
            _ if !schema.updatable_in_place() => {
                return (
                    PlanAction::Replace,
                    format!(
                        "{}: replace ({}, cannot be updated in place)",
                        resource_id,
                        rl.status.to_string().to_lowercase()
                    ),
                );
            }
            _ => {}
        }
    }
    let detail = if changed.is_empty() {
        format!("status {}", rl.status)
    } else {
        changed.join(", ")
    };
    (
        PlanAction::Update,
        format!("{}: update ({})", resource_id, detail),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;
    use crate::resources::merge_state;
    use serde_json::json;

    const CONFIG: &str = r#"
version: "1.0"
name: test
resources:
  pods:
    type: aws_eks_fargate_profile
    cluster_name: prod
    fargate_profile_name: default
    pod_execution_role_arn: arn:aws:iam::123456789012:role/pods
    selector:
      - namespace: default
    tags:
      env: prod
  grant:
    type: aws_redshift_snapshot_copy_grant
    snapshot_copy_grant_name: dr-grant
"#;

    fn config() -> StratusConfig {
        parse_config(CONFIG).unwrap()
    }

    /// A lock recording every resource in `config` as converged.
    fn converged_lock(config: &StratusConfig) -> StateLock {
        let mut lock = crate::core::state::new_lock(&config.name);
        for (id, decl) in &config.resources {
            let (desired, hash) = desired_state(decl);
            let handler = resources::handler(decl.resource_type);
            lock.resources.insert(
                id.clone(),
                ResourceLock {
                    resource_type: decl.resource_type,
                    id: Some(format!("remote-{id}")),
                    status: ResourceStatus::Converged,
                    applied_at: None,
                    duration_seconds: None,
                    hash,
                    attributes: merge_state(handler, &desired, &AttributeMap::new()),
                },
            );
        }
        lock
    }

    fn action_of<'a>(plan: &'a ExecutionPlan, id: &str) -> &'a PlannedChange {
        plan.changes.iter().find(|c| c.resource_id == id).unwrap()
    }

    #[test]
    fn test_st006_plan_all_create() {
        let plan = plan(&config(), None);
        assert_eq!(plan.to_create, 2);
        assert_eq!(plan.unchanged, 0);
        let ids: Vec<_> = plan.changes.iter().map(|c| c.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["pods", "grant"]);
        assert!(plan.changes.iter().all(|c| c.action == PlanAction::Create));
    }

    #[test]
    fn test_st006_plan_all_unchanged() {
        let config = config();
        let lock = converged_lock(&config);
        let plan = plan(&config, Some(&lock));
        assert_eq!(plan.unchanged, 2);
        assert_eq!(plan.to_create + plan.to_update + plan.to_replace + plan.to_destroy, 0);
    }

    #[test]
    fn test_st006_plan_update_in_place() {
        let config = config();
        let lock = converged_lock(&config);
        let mut changed = config.clone();
        changed.resources["pods"]
            .attributes
            .insert("tags".into(), json!({"env": "staging"}));
        let plan = plan(&changed, Some(&lock));
        assert_eq!(plan.to_update, 1);
        let pods = action_of(&plan, "pods");
        assert_eq!(pods.action, PlanAction::Update);
        assert_eq!(pods.description, "pods: update (tags)");
    }

    #[test]
    fn test_st006_plan_replace_on_force_new() {
        let config = config();
        let lock = converged_lock(&config);
        let mut changed = config.clone();
        changed.resources["pods"]
            .attributes
            .insert("cluster_name".into(), json!("staging"));
        let plan = plan(&changed, Some(&lock));
        assert_eq!(plan.to_replace, 1);
        let pods = action_of(&plan, "pods");
        assert_eq!(pods.action, PlanAction::Replace);
        assert!(pods.description.contains("cluster_name forces replacement"));
    }

    #[test]
    fn test_st006_plan_failed_resource_gets_retried() {
        let config = config();
        let mut lock = converged_lock(&config);
        lock.resources.get_mut("pods").unwrap().status = ResourceStatus::Failed;
        lock.resources.get_mut("grant").unwrap().status = ResourceStatus::Failed;
        let plan = plan(&config, Some(&lock));
        let change = action_of(&plan, "pods");
        assert_eq!(change.action, PlanAction::Update);
        assert_eq!(change.description, "pods: update (status FAILED)");
        // every grant attribute forces replacement, so an update has nothing to send
        let change = action_of(&plan, "grant");
        assert_eq!(change.action, PlanAction::Replace);
        assert_eq!(change.description, "grant: replace (failed, cannot be updated in place)");

        lock.resources.get_mut("grant").unwrap().id = None;
        let plan = super::plan(&config, Some(&lock));
        assert_eq!(action_of(&plan, "grant").action, PlanAction::Create);
    }

    #[test]
    fn test_st006_plan_drifted_without_diff() {
        let config = config();
        let mut lock = converged_lock(&config);
        for rl in lock.resources.values_mut() {
            rl.status = ResourceStatus::Drifted;
        }
        let plan = plan(&config, Some(&lock));
        assert_eq!(action_of(&plan, "pods").action, PlanAction::Update);
        assert_eq!(action_of(&plan, "pods").description, "pods: update (status DRIFTED)");
        assert_eq!(action_of(&plan, "grant").action, PlanAction::Replace);
        assert_eq!(plan.to_update, 1);
    }

    #[test]
    fn test_st006_plan_converged_hash_mismatch_without_diff_is_noop() {
        let config = config();
        let mut lock = converged_lock(&config);
        lock.resources.get_mut("grant").unwrap().hash = "blake3:stale".into();
        let plan = plan(&config, Some(&lock));
        assert_eq!(action_of(&plan, "grant").action, PlanAction::NoOp);
    }

    #[test]
    fn test_st006_plan_tainted_is_replaced() {
        let config = config();
        let mut lock = converged_lock(&config);
        lock.resources.get_mut("pods").unwrap().status = ResourceStatus::Tainted;
        let plan = plan(&config, Some(&lock));
        let pods = action_of(&plan, "pods");
        assert_eq!(pods.action, PlanAction::Replace);
        assert_eq!(pods.description, "pods: replace (tainted by a failed create)");
    }

    #[test]
    fn test_st006_plan_missing_is_recreated() {
        let config = config();
        let mut lock = converged_lock(&config);
        lock.resources.get_mut("pods").unwrap().status = ResourceStatus::Missing;
        let plan = plan(&config, Some(&lock));
        assert_eq!(action_of(&plan, "pods").action, PlanAction::Create);
    }

    #[test]
    fn test_st006_plan_destroys_orphans_last_in_reverse() {
        let config = config();
        let mut lock = converged_lock(&config);
        for id in ["old-a", "old-b"] {
            let mut entry = lock.resources["grant"].clone();
            entry.id = Some(id.to_string());
            lock.resources.insert(id.to_string(), entry);
        }
        let plan = plan(&config, Some(&lock));
        assert_eq!(plan.to_destroy, 2);
        let tail: Vec<_> = plan.changes[2..].iter().map(|c| c.resource_id.as_str()).collect();
        assert_eq!(tail, vec!["old-b", "old-a"]);
    }

    #[test]
    fn test_st006_plan_destroy_reverse_order() {
        let config = config();
        let mut lock = converged_lock(&config);
        lock.resources.get_mut("pods").unwrap().id = None;
        let plan = plan_destroy(&lock);
        assert_eq!(plan.to_destroy, 1);
        assert_eq!(plan.changes[0].resource_id, "grant");

        let lock = converged_lock(&config);
        let ids: Vec<_> = plan_destroy(&lock)
            .changes
            .into_iter()
            .map(|c| c.resource_id)
            .collect();
        assert_eq!(ids, vec!["grant", "pods"]);
    }

    #[test]
    fn test_st006_hash_ignores_defaults_spelled_out() {
        let yaml = r#"
version: "1.0"
name: t
resources:
  a:
    type: aws_sagemaker_domain
    domain_name: d
    auth_mode: IAM
    vpc_id: vpc-1
    subnet_ids: [subnet-1]
    default_user_settings:
      execution_role: arn:aws:iam::1:role/sm
"#;
        let implicit = parse_config(yaml).unwrap();
        let explicit = parse_config(&format!("{yaml}    app_network_access_type: PublicInternetOnly\n")).unwrap();
        assert_eq!(
            desired_state(&implicit.resources["a"]).1,
            desired_state(&explicit.resources["a"]).1
        );
    }
}
