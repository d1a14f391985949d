//! ST-051: EKS Fargate profile.
//!
//! Everything but tags is fixed at creation. ID format: `<cluster>,<profile>`.

use super::attrs::{get_str_list, get_str_map, map_value, require_str, split_id, tags_diff};
use super::schema::{AttrType, Attribute, Check, ResourceSchema};
use super::{HandlerCtx, ResourceHandler, ResourceState};
use crate::api::{call_as, CloudApi, Request};
use crate::core::types::{AttributeMap, ResourceType};
use crate::error::{ApiError, ProviderError};
use crate::waiter::{poll, BackoffPolicy, Classification, Classify, OnNotFound, Target};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::info;

const KIND: &str = "aws_eks_fargate_profile";
const SERVICE: &str = "eks";

pub const CREATE_POLICY: BackoffPolicy =
    BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(10 * 60));
pub const DELETE_POLICY: BackoffPolicy = CREATE_POLICY;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ProfileStatus {
    Creating,
    Active,
    Deleting,
    CreateFailed,
    DeleteFailed,
    Unknown(String),
}

impl From<String> for ProfileStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CREATING" => Self::Creating,
            "ACTIVE" => Self::Active,
            "DELETING" => Self::Deleting,
            "CREATE_FAILED" => Self::CreateFailed,
            "DELETE_FAILED" => Self::DeleteFailed,
            _ => Self::Unknown(s),
        }
    }
}

impl ProfileStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Deleting => "DELETING",
            Self::CreateFailed => "CREATE_FAILED",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::Unknown(s) => s,
        }
    }
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileOutput {
    fargate_profile: Profile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub fargate_profile_name: String,
    #[serde(default)]
    pub fargate_profile_arn: Option<String>,
    pub cluster_name: String,
    #[serde(default)]
    pub pod_execution_role_arn: Option<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub selectors: Vec<Selector>,
    pub status: ProfileStatus,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Selector {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Creation wait: CREATING until ACTIVE.
impl Classify for Profile {
    fn classify(&self) -> Classification {
        match self.status {
            ProfileStatus::Active => Classification::Success,
            ProfileStatus::CreateFailed | ProfileStatus::DeleteFailed => {
                Classification::Failure(self.status.to_string())
            }
            _ => Classification::InProgress,
        }
    }
}

/// Deletion wait: anything still visible is in progress unless deletion failed.
#[derive(Debug)]
struct ProfileDeletion(Profile);

impl Classify for ProfileDeletion {
    fn classify(&self) -> Classification {
        match self.0.status {
            ProfileStatus::DeleteFailed => Classification::Failure(self.0.status.to_string()),
            _ => Classification::InProgress,
        }
    }
}

pub async fn describe(api: &dyn CloudApi, cluster: &str, name: &str) -> Result<Profile, ApiError> {
    let out: ProfileOutput = call_as(
        api,
        Request::new(
            SERVICE,
            "DescribeFargateProfile",
            json!({"clusterName": cluster, "fargateProfileName": name}),
        ),
    )
    .await?;
    Ok(out.fargate_profile)
}

fn expand_create_input(attrs: &AttributeMap) -> Value {
    let mut input = Map::new();
    for (from, to) in [
        ("cluster_name", "clusterName"),
        ("fargate_profile_name", "fargateProfileName"),
        ("pod_execution_role_arn", "podExecutionRoleArn"),
    ] {
        if let Some(v) = attrs.get(from) {
            input.insert(to.into(), v.clone());
        }
    }
    let subnets = get_str_list(attrs, "subnet_ids");
    if !subnets.is_empty() {
        input.insert("subnets".into(), json!(subnets));
    }
    if let Some(Value::Array(selectors)) = attrs.get("selector") {
        let expanded: Vec<Value> = selectors
            .iter()
            .map(|s| {
                let mut sel = Map::new();
                if let Some(ns) = s.get("namespace") {
                    sel.insert("namespace".into(), ns.clone());
                }
                if let Some(labels) = s.get("labels").filter(|l| l.is_object()) {
                    sel.insert("labels".into(), labels.clone());
                }
                Value::Object(sel)
            })
            .collect();
        input.insert("selectors".into(), Value::Array(expanded));
    }
    let tags = get_str_map(attrs, "tags");
    if !tags.is_empty() {
        input.insert("tags".into(), map_value(&tags));
    }
    Value::Object(input)
}

fn flatten(p: &Profile) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    attrs.insert("cluster_name".into(), json!(p.cluster_name));
    attrs.insert("fargate_profile_name".into(), json!(p.fargate_profile_name));
    if let Some(ref role) = p.pod_execution_role_arn {
        attrs.insert("pod_execution_role_arn".into(), json!(role));
    }
    if !p.subnets.is_empty() {
        attrs.insert("subnet_ids".into(), json!(p.subnets));
    }
    let selectors: Vec<Value> = p
        .selectors
        .iter()
        .map(|s| {
            let mut sel = Map::new();
            if let Some(ref ns) = s.namespace {
                sel.insert("namespace".into(), json!(ns));
            }
            if !s.labels.is_empty() {
                sel.insert("labels".into(), map_value(&s.labels));
            }
            Value::Object(sel)
        })
        .collect();
    attrs.insert("selector".into(), Value::Array(selectors));
    if !p.tags.is_empty() {
        attrs.insert("tags".into(), map_value(&p.tags));
    }
    if let Some(ref arn) = p.fargate_profile_arn {
        attrs.insert("arn".into(), json!(arn));
    }
    attrs.insert("status".into(), json!(p.status.as_str()));
    attrs
}

pub struct FargateProfile;

#[async_trait]
impl ResourceHandler for FargateProfile {
    fn resource_type(&self) -> ResourceType {
        ResourceType::EksFargateProfile
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .attribute(
                Attribute::required("cluster_name", AttrType::String)
                    .check(Check::Length(1, 100))
                    .check(Check::Pattern(r"^[0-9A-Za-z][A-Za-z0-9\-_]*$"))
                    .force_new()
                    .describe("EKS cluster name"),
            )
            .attribute(
                Attribute::required("fargate_profile_name", AttrType::String)
                    .check(Check::Length(1, 100))
                    .force_new()
                    .describe("Profile name, unique within the cluster"),
            )
            .attribute(
                Attribute::required("pod_execution_role_arn", AttrType::String)
                    .force_new()
                    .describe("IAM role the Fargate pods run as"),
            )
            .attribute(
                Attribute::optional("subnet_ids", AttrType::list(AttrType::String))
                    .force_new()
                    .describe("Private subnets for the pods"),
            )
            .attribute(
                Attribute::required(
                    "selector",
                    AttrType::list(AttrType::Block(vec![
                        Attribute::required("namespace", AttrType::String),
                        Attribute::optional("labels", AttrType::Map),
                    ])),
                )
                .force_new()
                .describe("Pod selectors that schedule onto this profile"),
            )
            .attribute(Attribute::optional("tags", AttrType::Map).describe("Resource tags"))
            .attribute(Attribute::computed("arn", AttrType::String).describe("Profile ARN"))
            .attribute(Attribute::computed("status", AttrType::String).describe("Profile status"))
    }

    async fn create(
        &self,
        ctx: &HandlerCtx<'_>,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let cluster = require_str(desired, "cluster_name")?;
        let name = require_str(desired, "fargate_profile_name")?;
        ctx.api
            .call(Request::new(
                SERVICE,
                "CreateFargateProfile",
                expand_create_input(desired),
            ))
            .await
            .map_err(|e| ProviderError::api(format!("creating EKS Fargate Profile ({name})"), e))?;

        let id = format!("{cluster},{name}");
        info!(resource = %id, "waiting for fargate profile to become ACTIVE");
        let target = Target::new(KIND, [cluster, name]);
        let policy = ctx.create_policy(CREATE_POLICY);
        let api = ctx.api;
        let settled = async {
            poll(&target, OnNotFound::Retry, policy, || describe(api, cluster, name))
                .await?
                .into_result(&target, &policy)?;
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
            Ok(profile) => Ok(Some(flatten(&profile))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ProviderError::api(
                format!("reading EKS Fargate Profile ({id})"),
                e,
            )),
        }
    }

    /// Only tags change in place.
    async fn update(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
        prior: &AttributeMap,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let arn = match prior.get("arn").and_then(Value::as_str) {
            Some(arn) => arn.to_string(),
            None => self
                .read(ctx, id)
                .await?
                .and_then(|a| a.get("arn").and_then(Value::as_str).map(str::to_string))
                .ok_or_else(|| ProviderError::Validation(format!("EKS Fargate Profile ({id}) has no ARN")))?,
        };
        let (set, remove) = tags_diff(&get_str_map(prior, "tags"), &get_str_map(desired, "tags"));
        if !remove.is_empty() {
            ctx.api
                .call(Request::new(
                    SERVICE,
                    "UntagResource",
                    json!({"resourceArn": arn, "tagKeys": remove}),
                ))
                .await
                .map_err(|e| ProviderError::api(format!("untagging EKS Fargate Profile ({id})"), e))?;
        }
        if !set.is_empty() {
            ctx.api
                .call(Request::new(
                    SERVICE,
                    "TagResource",
                    json!({"resourceArn": arn, "tags": map_value(&set)}),
                ))
                .await
                .map_err(|e| ProviderError::api(format!("tagging EKS Fargate Profile ({id})"), e))?;
        }
        let attributes = self.read(ctx, id).await?.unwrap_or_default();
        Ok(ResourceState {
            id: id.to_string(),
            attributes,
        })
    }

    async fn delete(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
        _prior: &AttributeMap,
    ) -> Result<(), ProviderError> {
        let parts = split_id(id, ',', 2)?;
        let (cluster, name) = (parts[0], parts[1]);
        let result = ctx
            .api
            .call(Request::new(
                SERVICE,
                "DeleteFargateProfile",
                json!({"clusterName": cluster, "fargateProfileName": name}),
            ))
            .await;
        match result {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(ProviderError::api(
                    format!("deleting EKS Fargate Profile ({id})"),
                    e,
                ))
            }
        }

        let target = Target::new(KIND, [cluster, name]);
        let policy = ctx.delete_policy(DELETE_POLICY);
        let api = ctx.api;
        poll(&target, OnNotFound::Succeed, policy, || async move {
            describe(api, cluster, name).await.map(ProfileDeletion)
        })
        .await?
        .into_result(&target, &policy)?;
        Ok(())
    }
}
