//! ST-001: Configuration, state lock, plan, and event types.
//!
//! Defines the YAML schema types for provider settings, resources, policy,
//! state locks, and provenance events. All types derive Serialize/Deserialize
//! for YAML roundtripping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Engine-side representation of one resource instance: attribute name to value.
pub type AttributeMap = IndexMap<String, serde_json::Value>;

// ============================================================================
// Top-level stratus.yaml
// ============================================================================

/// Root configuration: the desired state of cloud resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratusConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name, also the state directory name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// How to reach the AWS API
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Resource declarations (order-preserving)
    pub resources: IndexMap<String, ResourceDecl>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

// ============================================================================
// Provider
// ============================================================================

/// AWS CLI settings shared by every resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Region passed as `--region`; falls back to the CLI's own config
    #[serde(default)]
    pub region: Option<String>,

    /// Named profile passed as `--profile`
    #[serde(default)]
    pub profile: Option<String>,

    /// Path or name of the `aws` binary
    #[serde(default = "default_aws_bin")]
    pub aws_bin: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            aws_bin: default_aws_bin(),
        }
    }
}

fn default_aws_bin() -> String {
    "aws".to_string()
}

// ============================================================================
// Resources
// ============================================================================

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Resource type
    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    /// Per-operation timeout overrides
    #[serde(default, skip_serializing_if = "Timeouts::is_empty")]
    pub timeouts: Timeouts,

    /// Every other key is a resource attribute
    #[serde(flatten)]
    pub attributes: AttributeMap,
}

/// Resource type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "aws_autoscaling_instance_refresh")]
    AutoscalingInstanceRefresh,
    #[serde(rename = "aws_eks_fargate_profile")]
    EksFargateProfile,
    #[serde(rename = "aws_sagemaker_domain")]
    SagemakerDomain,
    #[serde(rename = "aws_codebuild_project")]
    CodebuildProject,
    #[serde(rename = "aws_codedeploy_deployment_group")]
    CodedeployDeploymentGroup,
    #[serde(rename = "aws_dynamodb_table_item")]
    DynamodbTableItem,
    #[serde(rename = "aws_redshift_snapshot_copy_grant")]
    RedshiftSnapshotCopyGrant,
}

impl ResourceType {
    pub const ALL: [ResourceType; 7] = [
        Self::AutoscalingInstanceRefresh,
        Self::EksFargateProfile,
        Self::SagemakerDomain,
        Self::CodebuildProject,
        Self::CodedeployDeploymentGroup,
        Self::DynamodbTableItem,
        Self::RedshiftSnapshotCopyGrant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoscalingInstanceRefresh => "aws_autoscaling_instance_refresh",
            Self::EksFargateProfile => "aws_eks_fargate_profile",
            Self::SagemakerDomain => "aws_sagemaker_domain",
            Self::CodebuildProject => "aws_codebuild_project",
            Self::CodedeployDeploymentGroup => "aws_codedeploy_deployment_group",
            Self::DynamodbTableItem => "aws_dynamodb_table_item",
            Self::RedshiftSnapshotCopyGrant => "aws_redshift_snapshot_copy_grant",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown resource type '{s}'"))
    }
}

/// Per-operation timeout overrides, written as `90s`, `30m`, `2h`, or seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    #[serde(default, with = "opt_duration", skip_serializing_if = "Option::is_none")]
    pub create: Option<Duration>,
    #[serde(default, with = "opt_duration", skip_serializing_if = "Option::is_none")]
    pub update: Option<Duration>,
    #[serde(default, with = "opt_duration", skip_serializing_if = "Option::is_none")]
    pub delete: Option<Duration>,
}

impl Timeouts {
    pub fn is_empty(&self) -> bool {
        self.create.is_none() && self.update.is_none() && self.delete.is_none()
    }
}

mod opt_duration {
    use crate::waiter::policy::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_str(&format_duration(d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Secs(n)) => Ok(Some(Duration::from_secs(n))),
            Some(Raw::Text(t)) => parse_duration(&t).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Persist the state lock after apply
    #[serde(default = "default_true")]
    pub lock_file: bool,

    /// Append provenance events to events.jsonl
    #[serde(default = "default_true")]
    pub event_log: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            lock_file: true,
            event_log: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirst,
    ContinueIndependent,
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Stack name
    pub name: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// Per-resource state
    pub resources: IndexMap<String, ResourceLock>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    /// Resource type
    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    /// Remote identity returned by create
    #[serde(default)]
    pub id: Option<String>,

    /// Convergence status
    pub status: ResourceStatus,

    /// When the resource was last applied
    #[serde(default)]
    pub applied_at: Option<String>,

    /// Duration of last apply in seconds
    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 hash of the desired attributes
    pub hash: String,

    /// Attributes as last read back from AWS, computed ones included
    #[serde(default)]
    pub attributes: AttributeMap,
}

/// Resource convergence status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Converged,
    Failed,
    /// Created remotely, but the wait that followed failed
    Tainted,
    Drifted,
    Missing,
    Unknown,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "CONVERGED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Tainted => write!(f, "TAINTED"),
            Self::Drifted => write!(f, "DRIFTED"),
            Self::Missing => write!(f, "MISSING"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    /// Destroy then create, because a force-new attribute changed
    Replace,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Replace => write!(f, "REPLACE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// Resource ID (config key)
    pub resource_id: String,

    /// Resource type
    pub resource_type: ResourceType,

    /// Action to take
    pub action: PlanAction,

    /// Human-readable description
    pub description: String,
}

/// Full execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Config name
    pub name: String,

    /// Planned changes, in execution order
    pub changes: Vec<PlannedChange>,

    /// Summary counts
    pub to_create: u32,
    pub to_update: u32,
    pub to_replace: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        name: String,
        run_id: String,
        stratus_version: String,
    },
    ResourceStarted {
        resource: String,
        action: String,
    },
    ResourceConverged {
        resource: String,
        remote_id: String,
        duration_seconds: f64,
        hash: String,
    },
    ResourceDestroyed {
        resource: String,
        remote_id: String,
        duration_seconds: f64,
    },
    ResourceFailed {
        resource: String,
        error: String,
    },
    ApplyCompleted {
        name: String,
        run_id: String,
        resources_converged: u32,
        resources_unchanged: u32,
        resources_destroyed: u32,
        resources_failed: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Apply result
// ============================================================================

/// Result of one apply or destroy run.
#[derive(Debug, Clone, Default)]
pub struct ApplyResult {
    pub name: String,
    pub resources_converged: u32,
    pub resources_unchanged: u32,
    pub resources_destroyed: u32,
    pub resources_failed: u32,
    pub total_duration: Duration,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_st001_config_parse() {
        let yaml = r#"
version: "1.0"
name: data-platform
provider:
  region: us-west-2
resources:
  web-refresh:
    type: aws_autoscaling_instance_refresh
    auto_scaling_group_name: web
    min_healthy_percentage: 90
    timeouts:
      create: 45m
  build:
    type: aws_codebuild_project
    name: api-build
    service_role: arn:aws:iam::123456789012:role/codebuild
policy:
  failure: stop_on_first
"#;
        let config: StratusConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.provider.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.provider.aws_bin, "aws");
        let refresh = &config.resources["web-refresh"];
        assert_eq!(refresh.resource_type, ResourceType::AutoscalingInstanceRefresh);
        assert_eq!(refresh.timeouts.create, Some(Duration::from_secs(45 * 60)));
        assert_eq!(refresh.attributes["auto_scaling_group_name"], json!("web"));
        assert_eq!(refresh.attributes["min_healthy_percentage"], json!(90));
        assert!(!refresh.attributes.contains_key("timeouts"));
        assert!(!refresh.attributes.contains_key("type"));
        let keys: Vec<_> = config.resources.keys().collect();
        assert_eq!(keys, vec!["web-refresh", "build"]);
    }

    #[test]
    fn test_st001_timeouts_forms() {
        let t: Timeouts = serde_yaml_ng::from_str("create: 600\ndelete: 1h30m").unwrap();
        assert_eq!(t.create, Some(Duration::from_secs(600)));
        assert_eq!(t.update, None);
        assert_eq!(t.delete, Some(Duration::from_secs(5400)));
        assert!(serde_yaml_ng::from_str::<Timeouts>("create: soon").is_err());
        assert!(serde_yaml_ng::from_str::<Timeouts>("read: 5m").is_err());
    }

    #[test]
    fn test_st001_unknown_type_rejected() {
        let yaml = "type: aws_s3_bucket\nbucket: x\n";
        assert!(serde_yaml_ng::from_str::<ResourceDecl>(yaml).is_err());
    }

    #[test]
    fn test_st001_resource_type_str() {
        for t in ResourceType::ALL {
            assert_eq!(t.as_str().parse::<ResourceType>().unwrap(), t);
        }
        assert_eq!(
            ResourceType::EksFargateProfile.to_string(),
            "aws_eks_fargate_profile"
        );
        assert!("aws_nope".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_st001_policy_defaults() {
        let p = Policy::default();
        assert_eq!(p.failure, FailurePolicy::StopOnFirst);
        assert!(p.lock_file);
        assert!(p.event_log);
    }

    #[test]
    fn test_st001_resource_status_display() {
        assert_eq!(ResourceStatus::Converged.to_string(), "CONVERGED");
        assert_eq!(ResourceStatus::Missing.to_string(), "MISSING");
        assert_eq!(ResourceStatus::Tainted.to_string(), "TAINTED");
    }

    #[test]
    fn test_st001_plan_action_display() {
        assert_eq!(PlanAction::Replace.to_string(), "REPLACE");
        assert_eq!(PlanAction::NoOp.to_string(), "NO-OP");
    }

    #[test]
    fn test_st001_state_lock_roundtrip() {
        let lock = StateLock {
            schema: "1.0".to_string(),
            name: "data-platform".to_string(),
            generated_at: "2026-02-16T14:00:00Z".to_string(),
            generator: "stratus 0.3.0".to_string(),
            resources: IndexMap::from([(
                "grant".to_string(),
                ResourceLock {
                    resource_type: ResourceType::RedshiftSnapshotCopyGrant,
                    id: Some("dr-grant".to_string()),
                    status: ResourceStatus::Converged,
                    applied_at: Some("2026-02-16T14:00:01Z".to_string()),
                    duration_seconds: Some(1.5),
                    hash: "blake3:abc123".to_string(),
                    attributes: AttributeMap::from([(
                        "snapshot_copy_grant_name".to_string(),
                        json!("dr-grant"),
                    )]),
                },
            )]),
        };
        let yaml = serde_yaml_ng::to_string(&lock).unwrap();
        let lock2: StateLock = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(lock2.name, "data-platform");
        let entry = &lock2.resources["grant"];
        assert_eq!(entry.status, ResourceStatus::Converged);
        assert_eq!(entry.id.as_deref(), Some("dr-grant"));
        assert_eq!(entry.attributes["snapshot_copy_grant_name"], json!("dr-grant"));
    }

    #[test]
    fn test_st001_provenance_event_serde() {
        let event = ProvenanceEvent::ResourceDestroyed {
            resource: "grant".to_string(),
            remote_id: "dr-grant".to_string(),
            duration_seconds: 0.5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"resource_destroyed\""));
        assert!(json.contains("\"remote_id\":\"dr-grant\""));
    }
}
