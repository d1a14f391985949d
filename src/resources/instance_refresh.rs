//! ST-050: Auto Scaling group instance refresh.
//!
//! Create starts a refresh and waits for it to finish. If the wait runs out
//! of time, the refresh is cancelled so the group is not left mid-rollout.
//! ID format: `<group name>,<instance refresh id>`.

use super::attrs::{get_str, require_str, set_opt, split_id};
use super::schema::{AttrType, Attribute, Check, ResourceSchema};
use super::{HandlerCtx, ResourceHandler, ResourceState};
use crate::api::{call_as, CloudApi, Request};
use crate::core::types::{AttributeMap, ResourceType};
use crate::error::{ApiError, ProviderError, WaitError};
use crate::waiter::{
    poll, retry, wait_or_cancel, Attempt, BackoffPolicy, Classification, Classify, OnNotFound,
    PollOutcome, Target,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::info;

const KIND: &str = "aws_autoscaling_instance_refresh";
const SERVICE: &str = "autoscaling";

const IN_PROGRESS_FAULT: &str = "InstanceRefreshInProgressFault";
const NO_ACTIVE_REFRESH_FAULT: &str = "ActiveInstanceRefreshNotFoundFault";

pub const CREATE_POLICY: BackoffPolicy =
    BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(60 * 60));
pub const CANCEL_POLICY: BackoffPolicy =
    BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(15 * 60));
/// Starting may have to wait out the cancellation of an earlier refresh.
pub const START_POLICY: BackoffPolicy = CANCEL_POLICY;

/// Instance refresh status as reported by `DescribeInstanceRefreshes`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum RefreshStatus {
    Pending,
    InProgress,
    Successful,
    Failed,
    Cancelling,
    Cancelled,
    RollbackInProgress,
    RollbackFailed,
    RollbackSuccessful,
    Baking,
    Unknown(String),
}

impl From<&str> for RefreshStatus {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "InProgress" => Self::InProgress,
            "Successful" => Self::Successful,
            "Failed" => Self::Failed,
            "Cancelling" => Self::Cancelling,
            "Cancelled" => Self::Cancelled,
            "RollbackInProgress" => Self::RollbackInProgress,
            "RollbackFailed" => Self::RollbackFailed,
            "RollbackSuccessful" => Self::RollbackSuccessful,
            "Baking" => Self::Baking,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for RefreshStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl RefreshStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Successful => "Successful",
            Self::Failed => "Failed",
            Self::Cancelling => "Cancelling",
            Self::Cancelled => "Cancelled",
            Self::RollbackInProgress => "RollbackInProgress",
            Self::RollbackFailed => "RollbackFailed",
            Self::RollbackSuccessful => "RollbackSuccessful",
            Self::Baking => "Baking",
            Self::Unknown(s) => s,
        }
    }

    /// Still changing instances; a delete has to cancel it.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::InProgress
                | Self::Baking
                | Self::Cancelling
                | Self::RollbackInProgress
        )
    }
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeOutput {
    #[serde(default)]
    instance_refreshes: Vec<RefreshInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RefreshInfo {
    pub instance_refresh_id: String,
    pub auto_scaling_group_name: String,
    pub status: RefreshStatus,
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub percentage_complete: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
}

impl RefreshInfo {
    fn reason(&self) -> String {
        match self.status_reason.as_deref() {
            Some(r) if !r.is_empty() => format!("{}: {r}", self.status),
            _ => self.status.to_string(),
        }
    }
}

impl Classify for RefreshInfo {
    fn classify(&self) -> Classification {
        match self.status {
            RefreshStatus::Successful => Classification::Success,
            RefreshStatus::Failed | RefreshStatus::RollbackFailed => {
                Classification::Failure(self.reason())
            }
            RefreshStatus::RollbackSuccessful => {
                Classification::Failure(format!("rolled back ({})", self.reason()))
            }
            RefreshStatus::Cancelled => Classification::Cancelled,
            _ => Classification::InProgress,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RefreshIdOutput {
    #[serde(default)]
    instance_refresh_id: Option<String>,
}

// ============================================================================
// API calls
// ============================================================================

pub async fn describe(api: &dyn CloudApi, asg: &str, id: &str) -> Result<RefreshInfo, ApiError> {
    let out: DescribeOutput = call_as(
        api,
        Request::new(
            SERVICE,
            "DescribeInstanceRefreshes",
            json!({"AutoScalingGroupName": asg, "InstanceRefreshIds": [id]}),
        ),
    )
    .await?;
    out.instance_refreshes.into_iter().next().ok_or_else(|| {
        ApiError::not_found(
            "DescribeInstanceRefreshes",
            format!("instance refresh {id} not found for group {asg}"),
        )
    })
}

async fn start(api: &dyn CloudApi, input: &Value) -> Result<String, ApiError> {
    let out: RefreshIdOutput = call_as(
        api,
        Request::new(SERVICE, "StartInstanceRefresh", input.clone()),
    )
    .await?;
    out.instance_refresh_id
        .ok_or_else(|| ApiError::decode("StartInstanceRefresh", "response has no InstanceRefreshId"))
}

/// Cancel whatever refresh is active on the group. `None` when nothing was active.
async fn cancel(api: &dyn CloudApi, asg: &str) -> Result<Option<String>, ApiError> {
    let result: Result<RefreshIdOutput, ApiError> = call_as(
        api,
        Request::new(
            SERVICE,
            "CancelInstanceRefresh",
            json!({"AutoScalingGroupName": asg}),
        ),
    )
    .await;
    match result {
        Ok(out) => Ok(out.instance_refresh_id),
        Err(e) if e.is_code(NO_ACTIVE_REFRESH_FAULT) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Cancel the active refresh and wait until it stops.
async fn cancel_active(
    api: &dyn CloudApi,
    asg: &str,
    policy: BackoffPolicy,
) -> Result<(), ProviderError> {
    let cancelled = cancel(api, asg).await.map_err(|e| {
        ProviderError::api(
            format!("cancelling Auto Scaling Group ({asg}) instance refresh"),
            e,
        )
    })?;
    let Some(id) = cancelled else {
        return Ok(());
    };
    let target = Target::new(KIND, [asg, id.as_str()]);
    let id = id.as_str();
    match poll(&target, OnNotFound::Retry, policy, || describe(api, asg, id)).await? {
        PollOutcome::TimedOut => Err(WaitError::CancelStuck { target }.into()),
        outcome => {
            info!(asg, refresh_id = id, %outcome, "earlier instance refresh stopped");
            Ok(())
        }
    }
}

// ============================================================================
// Expand / flatten
// ============================================================================

fn expand_start_input(attrs: &AttributeMap) -> Value {
    let mut input = Map::new();
    if let Some(asg) = get_str(attrs, "auto_scaling_group_name") {
        input.insert("AutoScalingGroupName".into(), json!(asg));
    }
    if let Some(strategy) = get_str(attrs, "strategy") {
        input.insert("Strategy".into(), json!(strategy));
    }
    if let Some(Value::Object(prefs)) = attrs.get("preferences") {
        input.insert("Preferences".into(), expand_preferences(prefs));
    }
    if let Some(Value::Object(lt)) = attrs.get("launch_template") {
        let mut spec = Map::new();
        for (from, to) in [
            ("id", "LaunchTemplateId"),
            ("name", "LaunchTemplateName"),
            ("version", "Version"),
        ] {
            if let Some(v) = lt.get(from) {
                spec.insert(to.into(), v.clone());
            }
        }
        input.insert(
            "DesiredConfiguration".into(),
            json!({"LaunchTemplate": Value::Object(spec)}),
        );
    }
    Value::Object(input)
}

fn expand_preferences(prefs: &Map<String, Value>) -> Value {
    let mut out = Map::new();
    out.insert("MinHealthyPercentage".into(), json!(90));
    out.insert("MaxHealthyPercentage".into(), json!(100));
    out.insert("SkipMatching".into(), json!(false));
    out.insert("ScaleInProtectedInstances".into(), json!("Ignore"));
    out.insert("StandbyInstances".into(), json!("Ignore"));
    for (from, to) in [
        ("min_healthy_percentage", "MinHealthyPercentage"),
        ("max_healthy_percentage", "MaxHealthyPercentage"),
        ("instance_warmup", "InstanceWarmup"),
        ("checkpoint_percentages", "CheckpointPercentages"),
        ("checkpoint_delay", "CheckpointDelay"),
        ("skip_matching", "SkipMatching"),
        ("auto_rollback", "AutoRollback"),
        ("scale_in_protected_instances", "ScaleInProtectedInstances"),
        ("standby_instances", "StandbyInstances"),
    ] {
        if let Some(v) = prefs.get(from).filter(|v| !v.is_null()) {
            out.insert(to.into(), v.clone());
        }
    }
    if let Some(alarms) = prefs.get("alarms").filter(|v| v.is_array()) {
        out.insert("AlarmSpecification".into(), json!({"Alarms": alarms}));
    }
    Value::Object(out)
}

fn flatten(info: &RefreshInfo) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    attrs.insert(
        "auto_scaling_group_name".into(),
        json!(info.auto_scaling_group_name),
    );
    // omitted by older API versions, where Rolling is the only strategy
    attrs.insert(
        "strategy".into(),
        json!(info.strategy.as_deref().unwrap_or("Rolling")),
    );
    attrs.insert("instance_refresh_id".into(), json!(info.instance_refresh_id));
    attrs.insert("status".into(), json!(info.status.as_str()));
    set_opt(&mut attrs, "status_reason", info.status_reason.clone());
    set_opt(&mut attrs, "percentage_complete", info.percentage_complete);
    set_opt(&mut attrs, "start_time", info.start_time.clone());
    set_opt(&mut attrs, "end_time", info.end_time.clone());
    attrs
}

// ============================================================================
// Handler
// ============================================================================

pub struct InstanceRefresh;

#[async_trait]
impl ResourceHandler for InstanceRefresh {
    fn resource_type(&self) -> ResourceType {
        ResourceType::AutoscalingInstanceRefresh
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .attribute(
                Attribute::required("auto_scaling_group_name", AttrType::String)
                    .force_new()
                    .describe("Auto Scaling group to refresh"),
            )
            .attribute(
                Attribute::optional("strategy", AttrType::String)
                    .with_default(json!("Rolling"))
                    .check(Check::OneOf(&["Rolling", "ReplaceRootVolume"]))
                    .force_new()
                    .describe("Refresh strategy"),
            )
            .attribute(
                Attribute::optional(
                    "preferences",
                    AttrType::Block(vec![
                        Attribute::optional("min_healthy_percentage", AttrType::Int)
                            .check(Check::IntRange(0, 100)),
                        Attribute::optional("max_healthy_percentage", AttrType::Int)
                            .check(Check::IntRange(100, 200)),
                        Attribute::optional("instance_warmup", AttrType::Int)
                            .check(Check::IntRange(0, i64::from(i32::MAX))),
                        Attribute::optional(
                            "checkpoint_percentages",
                            AttrType::list(AttrType::Int),
                        )
                        .check(Check::IntRange(1, 100)),
                        Attribute::optional("checkpoint_delay", AttrType::Int)
                            .check(Check::IntRange(0, 172_800)),
                        Attribute::optional("skip_matching", AttrType::Bool),
                        Attribute::optional("auto_rollback", AttrType::Bool),
                        Attribute::optional("scale_in_protected_instances", AttrType::String)
                            .check(Check::OneOf(&["Refresh", "Ignore", "Wait"])),
                        Attribute::optional("standby_instances", AttrType::String)
                            .check(Check::OneOf(&["Terminate", "Ignore", "Wait"])),
                        Attribute::optional("alarms", AttrType::list(AttrType::String)),
                    ]),
                )
                .force_new()
                .write_only()
                .describe("Rollout preferences"),
            )
            .attribute(
                Attribute::optional(
                    "launch_template",
                    AttrType::Block(vec![
                        Attribute::optional("id", AttrType::String),
                        Attribute::optional("name", AttrType::String),
                        Attribute::optional("version", AttrType::String),
                    ]),
                )
                .force_new()
                .write_only()
                .describe("Desired launch template; required for auto_rollback"),
            )
            .attribute(
                Attribute::computed("instance_refresh_id", AttrType::String)
                    .describe("ID assigned by Auto Scaling"),
            )
            .attribute(Attribute::computed("status", AttrType::String).describe("Last observed status"))
            .attribute(
                Attribute::computed("status_reason", AttrType::String)
                    .describe("Explanation of the last status"),
            )
            .attribute(
                Attribute::computed("percentage_complete", AttrType::Int)
                    .describe("Share of instances replaced"),
            )
            .attribute(Attribute::computed("start_time", AttrType::String).describe("Start time"))
            .attribute(Attribute::computed("end_time", AttrType::String).describe("End time"))
    }

    fn validate(&self, attrs: &AttributeMap) -> Vec<String> {
        let mut errors = self.schema().validate(attrs);
        if auto_rollback_enabled(attrs) && !attrs.contains_key("launch_template") {
            errors.push("preferences.auto_rollback: requires launch_template".to_string());
        }
        errors
    }

    async fn create(
        &self,
        ctx: &HandlerCtx<'_>,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let api = ctx.api;
        let asg = require_str(desired, "auto_scaling_group_name")?;
        let input = &expand_start_input(desired);

        let refresh_id = match start(api, input).await {
            Ok(id) => id,
            Err(e) if e.is_code(IN_PROGRESS_FAULT) => {
                info!(asg, "another instance refresh is active, cancelling it first");
                cancel_active(api, asg, CANCEL_POLICY).await?;
                let target = Target::new(KIND, [asg]);
                retry(&target, START_POLICY, || async move {
                    start(api, input).await.map_err(|e| {
                        if e.is_code(IN_PROGRESS_FAULT) {
                            Attempt::Retryable(e)
                        } else {
                            Attempt::from(e)
                        }
                    })
                })
                .await?
            }
            Err(e) => {
                return Err(ProviderError::api(
                    format!("starting Auto Scaling Group ({asg}) instance refresh"),
                    e,
                ))
            }
        };
        info!(asg, refresh_id = %refresh_id, "instance refresh started");

        let id = format!("{asg},{refresh_id}");
        let target = Target::new(KIND, [asg, refresh_id.as_str()]);
        let policy = ctx.create_policy(CREATE_POLICY);
        let rid = refresh_id.as_str();
        let settled = async {
            let waited = wait_or_cancel(
                &target,
                "create",
                policy,
                || describe(api, asg, rid),
                || async move { cancel(api, asg).await.map(|_| ()) },
                || poll(&target, OnNotFound::Retry, CANCEL_POLICY, || describe(api, asg, rid)),
            )
            .await;
            let outcome = match waited {
                // finished between the last poll and the cancel; nothing was cancelled
                Err(WaitError::CancelledAfterTimeout {
                    outcome: PollOutcome::Success,
                    ..
                }) => {
                    info!(asg, refresh_id = rid, "instance refresh succeeded as the wait timed out");
                    PollOutcome::Success
                }
                other => other?,
            };
            outcome.into_result(&target, &policy)?;
            self.read(ctx, &id).await
        }
        .await;

        let attributes = settled
            .map_err(|e| ProviderError::tainted(&id, e))?
            .unwrap_or_default();
        Ok(ResourceState { id, attributes })
    }

    async fn read(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
    ) -> Result<Option<AttributeMap>, ProviderError> {
        let parts = split_id(id, ',', 2)?;
        match describe(ctx.api, parts[0], parts[1]).await {
            Ok(info) => Ok(Some(flatten(&info))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ProviderError::api(
                format!("reading Auto Scaling Group ({}) instance refresh", parts[0]),
                e,
            )),
        }
    }

    async fn delete(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
        _prior: &AttributeMap,
    ) -> Result<(), ProviderError> {
        let parts = split_id(id, ',', 2)?;
        let (asg, refresh_id) = (parts[0], parts[1]);
        let info = match describe(ctx.api, asg, refresh_id).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(ProviderError::api(
                    format!("reading Auto Scaling Group ({asg}) instance refresh"),
                    e,
                ))
            }
        };
        if info.status.is_active() {
            info!(asg, refresh_id, status = %info.status, "cancelling active instance refresh");
            cancel_active(ctx.api, asg, ctx.delete_policy(CANCEL_POLICY)).await?;
        }
        Ok(())
    }
}

/// `preferences.auto_rollback`, off unless set.
fn auto_rollback_enabled(attrs: &AttributeMap) -> bool {
    match attrs.get("preferences") {
        Some(Value::Object(p)) => p.get("auto_rollback").and_then(Value::as_bool) == Some(true),
        _ => false,
    }
}
