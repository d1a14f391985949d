//! ST-054: CodeDeploy deployment group.
//!
//! ID format: `<application>:<deployment group>`. Renaming the group updates
//! it in place and changes the ID.

use super::attrs::{expand_tag_list, get_str, get_str_list, get_str_map, require_str, split_id};
use super::schema::{AttrType, Attribute, Check, ResourceSchema};
use super::{HandlerCtx, ResourceHandler, ResourceState};
use crate::api::{call_as, CloudApi, Request};
use crate::core::types::{AttributeMap, ResourceType};
use crate::error::{ApiError, ProviderError};
use crate::waiter::{retry, Attempt, BackoffPolicy, Target};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::info;

const KIND: &str = "aws_codedeploy_deployment_group";
const SERVICE: &str = "deploy";

pub const PROPAGATION_POLICY: BackoffPolicy =
    BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(5 * 60));

const APPLICATION_MISSING: &str = "ApplicationDoesNotExistException";

const AUTO_ROLLBACK_EVENTS: &[&str] = &[
    "DEPLOYMENT_FAILURE",
    "DEPLOYMENT_STOP_ON_ALARM",
    "DEPLOYMENT_STOP_ON_REQUEST",
];

const TRIGGER_EVENTS: &[&str] = &[
    "DeploymentStart",
    "DeploymentSuccess",
    "DeploymentFailure",
    "DeploymentStop",
    "DeploymentRollback",
    "DeploymentReady",
    "InstanceStart",
    "InstanceSuccess",
    "InstanceFailure",
    "InstanceReady",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetOutput {
    deployment_group_info: GroupInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOutput {
    #[serde(default)]
    deployment_group_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub application_name: String,
    pub deployment_group_name: String,
    #[serde(default)]
    pub deployment_group_id: Option<String>,
    #[serde(default)]
    pub service_role_arn: Option<String>,
    #[serde(default)]
    pub deployment_config_name: Option<String>,
    #[serde(default)]
    pub compute_platform: Option<String>,
    #[serde(default)]
    pub auto_scaling_groups: Vec<AutoScalingGroup>,
    #[serde(default)]
    pub deployment_style: Option<DeploymentStyle>,
    #[serde(default)]
    pub ec2_tag_filters: Vec<Ec2TagFilter>,
    #[serde(default)]
    pub trigger_configurations: Vec<TriggerConfig>,
    #[serde(default)]
    pub auto_rollback_configuration: Option<AutoRollback>,
    #[serde(default)]
    pub alarm_configuration: Option<AlarmConfig>,
    #[serde(default)]
    pub outdated_instances_strategy: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoScalingGroup {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStyle {
    #[serde(default)]
    pub deployment_option: Option<String>,
    #[serde(default)]
    pub deployment_type: Option<String>,
}

/// The one CodeDeploy shape that uses PascalCase.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec2TagFilter {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    pub trigger_name: String,
    pub trigger_target_arn: String,
    #[serde(default)]
    pub trigger_events: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoRollback {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ignore_poll_alarm_failure: bool,
    #[serde(default)]
    pub alarms: Vec<Alarm>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alarm {
    pub name: String,
}

// ============================================================================
// Expand / flatten
// ============================================================================

fn expand_deployment_style(v: &Value) -> Value {
    let mut out = Map::new();
    if let Some(o) = v.get("deployment_option") {
        out.insert("deploymentOption".into(), o.clone());
    }
    if let Some(t) = v.get("deployment_type") {
        out.insert("deploymentType".into(), t.clone());
    }
    Value::Object(out)
}

fn expand_ec2_tag_filters(v: Option<&Value>) -> Value {
    let filters = v.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    Value::Array(
        filters
            .iter()
            .map(|f| {
                let mut out = Map::new();
                for (from, to) in [("key", "Key"), ("value", "Value"), ("type", "Type")] {
                    if let Some(v) = f.get(from) {
                        out.insert(to.into(), v.clone());
                    }
                }
                Value::Object(out)
            })
            .collect(),
    )
}

fn expand_triggers(v: Option<&Value>) -> Value {
    let triggers = v.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    Value::Array(
        triggers
            .iter()
            .map(|t| {
                json!({
                    "triggerName": t.get("trigger_name"),
                    "triggerTargetArn": t.get("trigger_target_arn"),
                    "triggerEvents": t.get("trigger_events").cloned().unwrap_or_else(|| json!([])),
                })
            })
            .collect(),
    )
}

/// A removed block is sent as disabled so the service clears it.
fn expand_auto_rollback(v: Option<&Value>) -> Value {
    match v {
        Some(c) => json!({
            "enabled": c.get("enabled").and_then(Value::as_bool).unwrap_or(false),
            "events": c.get("events").cloned().unwrap_or_else(|| json!([])),
        }),
        None => json!({"enabled": false, "events": []}),
    }
}

fn expand_alarms(v: Option<&Value>) -> Value {
    match v {
        Some(c) => {
            let names: Vec<Value> = c
                .get("alarms")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(|n| json!({"name": n}))
                .collect();
            json!({
                "enabled": c.get("enabled").and_then(Value::as_bool).unwrap_or(false),
                "ignorePollAlarmFailure": c.get("ignore_poll_alarm_failure").and_then(Value::as_bool).unwrap_or(false),
                "alarms": names,
            })
        }
        None => json!({"enabled": false, "ignorePollAlarmFailure": false, "alarms": []}),
    }
}

/// Fields shared by create and update.
fn expand_common(attrs: &AttributeMap, input: &mut Map<String, Value>) {
    for (from, to) in [
        ("service_role_arn", "serviceRoleArn"),
        ("deployment_config_name", "deploymentConfigName"),
        ("outdated_instances_strategy", "outdatedInstancesStrategy"),
    ] {
        if let Some(v) = attrs.get(from).filter(|v| !v.is_null()) {
            input.insert(to.into(), v.clone());
        }
    }
    input.insert(
        "autoScalingGroups".into(),
        json!(get_str_list(attrs, "autoscaling_groups")),
    );
    if let Some(style) = attrs.get("deployment_style") {
        input.insert("deploymentStyle".into(), expand_deployment_style(style));
    }
    input.insert("ec2TagFilters".into(), expand_ec2_tag_filters(attrs.get("ec2_tag_filter")));
    input.insert(
        "triggerConfigurations".into(),
        expand_triggers(attrs.get("trigger_configuration")),
    );
    input.insert(
        "autoRollbackConfiguration".into(),
        expand_auto_rollback(attrs.get("auto_rollback_configuration")),
    );
    input.insert(
        "alarmConfiguration".into(),
        expand_alarms(attrs.get("alarm_configuration")),
    );
}

fn expand_create_input(attrs: &AttributeMap) -> Value {
    let mut input = Map::new();
    for (from, to) in [
        ("app_name", "applicationName"),
        ("deployment_group_name", "deploymentGroupName"),
    ] {
        if let Some(v) = attrs.get(from) {
            input.insert(to.into(), v.clone());
        }
    }
    expand_common(attrs, &mut input);
    let tags = get_str_map(attrs, "tags");
    if !tags.is_empty() {
        input.insert("tags".into(), expand_tag_list(&tags, "Key", "Value"));
    }
    Value::Object(input)
}

fn expand_update_input(prior: &AttributeMap, desired: &AttributeMap) -> Value {
    let mut input = Map::new();
    if let Some(app) = desired.get("app_name") {
        input.insert("applicationName".into(), app.clone());
    }
    let current = get_str(prior, "deployment_group_name");
    let next = get_str(desired, "deployment_group_name");
    if let Some(current) = current.or(next) {
        input.insert("currentDeploymentGroupName".into(), json!(current));
    }
    if let (Some(current), Some(next)) = (current, next) {
        if current != next {
            input.insert("newDeploymentGroupName".into(), json!(next));
        }
    }
    expand_common(desired, &mut input);
    Value::Object(input)
}

fn flatten(g: &GroupInfo) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    attrs.insert("app_name".into(), json!(g.application_name));
    attrs.insert("deployment_group_name".into(), json!(g.deployment_group_name));
    for (key, value) in [
        ("service_role_arn", &g.service_role_arn),
        ("deployment_config_name", &g.deployment_config_name),
        ("outdated_instances_strategy", &g.outdated_instances_strategy),
        ("deployment_group_id", &g.deployment_group_id),
        ("compute_platform", &g.compute_platform),
    ] {
        if let Some(v) = value {
            attrs.insert(key.into(), json!(v));
        }
    }
    if !g.auto_scaling_groups.is_empty() {
        let names: Vec<&str> = g.auto_scaling_groups.iter().map(|a| a.name.as_str()).collect();
        attrs.insert("autoscaling_groups".into(), json!(names));
    }
    if let Some(ref s) = g.deployment_style {
        attrs.insert(
            "deployment_style".into(),
            json!({"deployment_option": s.deployment_option, "deployment_type": s.deployment_type}),
        );
    }
    if !g.ec2_tag_filters.is_empty() {
        let filters: Vec<Value> = g
            .ec2_tag_filters
            .iter()
            .map(|f| json!({"key": f.key, "value": f.value, "type": f.r#type}))
            .collect();
        attrs.insert("ec2_tag_filter".into(), Value::Array(filters));
    }
    if !g.trigger_configurations.is_empty() {
        let triggers: Vec<Value> = g
            .trigger_configurations
            .iter()
            .map(|t| {
                json!({
                    "trigger_name": t.trigger_name,
                    "trigger_target_arn": t.trigger_target_arn,
                    "trigger_events": t.trigger_events,
                })
            })
            .collect();
        attrs.insert("trigger_configuration".into(), Value::Array(triggers));
    }
    if let Some(ref r) = g.auto_rollback_configuration {
        if r.enabled || !r.events.is_empty() {
            attrs.insert(
                "auto_rollback_configuration".into(),
                json!({"enabled": r.enabled, "events": r.events}),
            );
        }
    }
    if let Some(ref a) = g.alarm_configuration {
        if a.enabled || !a.alarms.is_empty() {
            let names: Vec<&str> = a.alarms.iter().map(|al| al.name.as_str()).collect();
            attrs.insert(
                "alarm_configuration".into(),
                json!({
                    "enabled": a.enabled,
                    "ignore_poll_alarm_failure": a.ignore_poll_alarm_failure,
                    "alarms": names,
                }),
            );
        }
    }
    attrs
}

/// IAM role and SNS topic permissions take a while to become usable.
fn propagation_attempt(e: ApiError) -> Attempt {
    if e.is_code("InvalidRoleException")
        || e.message_contains("InvalidTriggerConfigException", "Topic ARN")
    {
        Attempt::Retryable(e)
    } else {
        Attempt::from(e)
    }
}

pub async fn get(api: &dyn CloudApi, app: &str, group: &str) -> Result<GroupInfo, ApiError> {
    let out: GetOutput = call_as(
        api,
        Request::new(
            SERVICE,
            "GetDeploymentGroup",
            json!({"applicationName": app, "deploymentGroupName": group}),
        ),
    )
    .await?;
    Ok(out.deployment_group_info)
}

pub struct DeploymentGroup;

#[async_trait]
impl ResourceHandler for DeploymentGroup {
    fn resource_type(&self) -> ResourceType {
        ResourceType::CodedeployDeploymentGroup
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .attribute(
                Attribute::required("app_name", AttrType::String)
                    .check(Check::Length(1, 100))
                    .force_new()
                    .describe("CodeDeploy application"),
            )
            .attribute(
                Attribute::required("deployment_group_name", AttrType::String)
                    .check(Check::Length(1, 100))
                    .describe("Deployment group name; renames in place"),
            )
            .attribute(
                Attribute::required("service_role_arn", AttrType::String)
                    .describe("IAM role CodeDeploy acts as"),
            )
            .attribute(
                Attribute::optional("deployment_config_name", AttrType::String)
                    .with_default(json!("CodeDeployDefault.OneAtATime"))
                    .check(Check::Length(1, 100))
                    .describe("Deployment configuration"),
            )
            .attribute(
                Attribute::optional("autoscaling_groups", AttrType::list(AttrType::String))
                    .describe("Auto Scaling groups deployed to"),
            )
            .attribute(
                Attribute::optional(
                    "deployment_style",
                    AttrType::Block(vec![
                        Attribute::optional("deployment_option", AttrType::String).check(
                            Check::OneOf(&["WITH_TRAFFIC_CONTROL", "WITHOUT_TRAFFIC_CONTROL"]),
                        ),
                        Attribute::optional("deployment_type", AttrType::String)
                            .check(Check::OneOf(&["IN_PLACE", "BLUE_GREEN"])),
                    ]),
                )
                .describe("In-place or blue/green, with or without a load balancer"),
            )
            .attribute(
                Attribute::optional(
                    "ec2_tag_filter",
                    AttrType::list(AttrType::Block(vec![
                        Attribute::optional("key", AttrType::String),
                        Attribute::optional("value", AttrType::String),
                        Attribute::optional("type", AttrType::String)
                            .check(Check::OneOf(&["KEY_ONLY", "VALUE_ONLY", "KEY_AND_VALUE"])),
                    ])),
                )
                .describe("EC2 instances deployed to, by tag"),
            )
            .attribute(
                Attribute::optional(
                    "trigger_configuration",
                    AttrType::list(AttrType::Block(vec![
                        Attribute::required("trigger_name", AttrType::String),
                        Attribute::required("trigger_target_arn", AttrType::String),
                        Attribute::required("trigger_events", AttrType::list(AttrType::String))
                            .check(Check::OneOf(TRIGGER_EVENTS)),
                    ])),
                )
                .describe("SNS notifications for deployment events"),
            )
            .attribute(
                Attribute::optional(
                    "auto_rollback_configuration",
                    AttrType::Block(vec![
                        Attribute::optional("enabled", AttrType::Bool),
                        Attribute::optional("events", AttrType::list(AttrType::String))
                            .check(Check::OneOf(AUTO_ROLLBACK_EVENTS)),
                    ]),
                )
                .describe("When to roll back automatically"),
            )
            .attribute(
                Attribute::optional(
                    "alarm_configuration",
                    AttrType::Block(vec![
                        Attribute::optional("alarms", AttrType::list(AttrType::String)),
                        Attribute::optional("enabled", AttrType::Bool),
                        Attribute::optional("ignore_poll_alarm_failure", AttrType::Bool),
                    ]),
                )
                .describe("CloudWatch alarms that stop a deployment"),
            )
            .attribute(
                Attribute::optional("outdated_instances_strategy", AttrType::String)
                    .with_default(json!("UPDATE"))
                    .check(Check::OneOf(&["UPDATE", "IGNORE"]))
                    .describe("What happens to instances launched during a deployment"),
            )
            .attribute(
                Attribute::optional("tags", AttrType::Map)
                    .force_new()
                    .write_only()
                    .describe("Resource tags, set at creation"),
            )
            .attribute(
                Attribute::computed("deployment_group_id", AttrType::String)
                    .describe("ID assigned by CodeDeploy"),
            )
            .attribute(
                Attribute::computed("compute_platform", AttrType::String)
                    .describe("Server, Lambda or ECS"),
            )
    }

    async fn create(
        &self,
        ctx: &HandlerCtx<'_>,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let app = require_str(desired, "app_name")?;
        let group = require_str(desired, "deployment_group_name")?;
        let api = ctx.api;
        let input = &expand_create_input(desired);
        let target = Target::new(KIND, [app, group]);

        let out: CreateOutput =
            retry(&target, ctx.create_policy(PROPAGATION_POLICY), || async move {
                call_as(api, Request::new(SERVICE, "CreateDeploymentGroup", input.clone()))
                    .await
                    .map_err(propagation_attempt)
            })
            .await?;
        info!(
            resource = %target,
            deployment_group_id = out.deployment_group_id.as_deref().unwrap_or_default(),
            "deployment group created"
        );

        let id = format!("{app}:{group}");
        let attributes = self.read(ctx, &id).await?.unwrap_or_default();
        Ok(ResourceState { id, attributes })
    }

    async fn read(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
    ) -> Result<Option<AttributeMap>, ProviderError> {
        let parts = split_id(id, ':', 2)?;
        match get(ctx.api, parts[0], parts[1]).await {
            Ok(group) => Ok(Some(flatten(&group))),
            Err(e) if e.is_not_found() || e.is_code(APPLICATION_MISSING) => Ok(None),
            Err(e) => Err(ProviderError::api(
                format!("reading CodeDeploy Deployment Group ({id})"),
                e,
            )),
        }
    }

    async fn update(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
        prior: &AttributeMap,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let api = ctx.api;
        let input = &expand_update_input(prior, desired);
        let parts = split_id(id, ':', 2)?;
        let target = Target::new(KIND, [parts[0], parts[1]]);
        retry(&target, ctx.update_policy(PROPAGATION_POLICY), || async move {
            api.call(Request::new(SERVICE, "UpdateDeploymentGroup", input.clone()))
                .await
                .map_err(propagation_attempt)
        })
        .await?;

        let group = get_str(desired, "deployment_group_name").unwrap_or(parts[1]);
        let new_id = format!("{}:{group}", parts[0]);
        if new_id != id {
            info!(from = id, to = %new_id, "deployment group renamed");
        }
        let attributes = self.read(ctx, &new_id).await?.unwrap_or_default();
        Ok(ResourceState {
            id: new_id,
            attributes,
        })
    }

    async fn delete(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
        _prior: &AttributeMap,
    ) -> Result<(), ProviderError> {
        let parts = split_id(id, ':', 2)?;
        let result = ctx
            .api
            .call(Request::new(
                SERVICE,
                "DeleteDeploymentGroup",
                json!({"applicationName": parts[0], "deploymentGroupName": parts[1]}),
            ))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() || e.is_code(APPLICATION_MISSING) => Ok(()),
            Err(e) => Err(ProviderError::api(
                format!("deleting CodeDeploy Deployment Group ({id})"),
                e,
            )),
        }
    }
}
