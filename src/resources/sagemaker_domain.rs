//! ST-052: SageMaker Studio domain.
//!
//! The ID is the domain ID (`d-...`), taken from the ARN returned by
//! `CreateDomain`. Only `default_user_settings`, `retention_policy` and tags
//! change in place.

use super::attrs::{
    expand_tag_list, flatten_tag_list, get_str, get_str_list, get_str_map, map_value,
    require_str, set_opt, tags_diff,
};
use super::schema::{AttrType, Attribute, Check, ResourceSchema};
use super::{HandlerCtx, ResourceHandler, ResourceState};
use crate::api::{call_as, CloudApi, Request};
use crate::core::types::{AttributeMap, ResourceType};
use crate::error::{ApiError, ProviderError};
use crate::waiter::{poll, BackoffPolicy, Classification, Classify, OnNotFound, Target};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::info;

const KIND: &str = "aws_sagemaker_domain";
const SERVICE: &str = "sagemaker";

pub const DEFAULT_POLICY: BackoffPolicy =
    BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(10 * 60));

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum DomainStatus {
    Pending,
    InService,
    Updating,
    Deleting,
    Failed,
    UpdateFailed,
    DeleteFailed,
    Unknown(String),
}

impl From<String> for DomainStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Pending" => Self::Pending,
            "InService" => Self::InService,
            "Updating" => Self::Updating,
            "Deleting" => Self::Deleting,
            "Failed" => Self::Failed,
            "Update_Failed" => Self::UpdateFailed,
            "Delete_Failed" => Self::DeleteFailed,
            _ => Self::Unknown(s),
        }
    }
}

impl DomainStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::InService => "InService",
            Self::Updating => "Updating",
            Self::Deleting => "Deleting",
            Self::Failed => "Failed",
            Self::UpdateFailed => "Update_Failed",
            Self::DeleteFailed => "Delete_Failed",
            Self::Unknown(s) => s,
        }
    }

    fn is_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::UpdateFailed | Self::DeleteFailed)
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Domain {
    pub domain_id: String,
    #[serde(default)]
    pub domain_arn: Option<String>,
    #[serde(default)]
    pub domain_name: Option<String>,
    pub status: DomainStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub auth_mode: Option<String>,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub app_network_access_type: Option<String>,
    #[serde(default)]
    pub app_security_group_management: Option<String>,
    #[serde(default)]
    pub kms_key_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub home_efs_file_system_id: Option<String>,
    #[serde(default)]
    pub single_sign_on_managed_application_instance_id: Option<String>,
    #[serde(default)]
    pub security_group_id_for_domain_boundary: Option<String>,
    #[serde(default)]
    pub default_user_settings: Option<UserSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserSettings {
    #[serde(default)]
    pub execution_role: Option<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub sharing_settings: Option<SharingSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SharingSettings {
    #[serde(default)]
    pub notebook_output_option: Option<String>,
    #[serde(default)]
    pub s3_output_path: Option<String>,
    #[serde(default)]
    pub s3_kms_key_id: Option<String>,
}

impl Domain {
    fn reason(&self) -> String {
        match self.failure_reason.as_deref() {
            Some(r) if !r.is_empty() => format!("{}: {r}", self.status),
            _ => self.status.to_string(),
        }
    }
}

/// Creation and update waits: until InService.
impl Classify for Domain {
    fn classify(&self) -> Classification {
        match self.status {
            DomainStatus::InService => Classification::Success,
            ref s if s.is_failed() => Classification::Failure(self.reason()),
            _ => Classification::InProgress,
        }
    }
}

#[derive(Debug)]
struct DomainDeletion(Domain);

impl Classify for DomainDeletion {
    fn classify(&self) -> Classification {
        if self.0.status.is_failed() {
            Classification::Failure(self.0.reason())
        } else {
            Classification::InProgress
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateDomainOutput {
    domain_arn: String,
}

pub async fn describe(api: &dyn CloudApi, domain_id: &str) -> Result<Domain, ApiError> {
    call_as(
        api,
        Request::new(SERVICE, "DescribeDomain", json!({"DomainId": domain_id})),
    )
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListTagsOutput {
    #[serde(default)]
    tags: Vec<Value>,
    #[serde(default)]
    next_token: Option<String>,
}

/// Every tag on the domain, following `NextToken`.
async fn list_tags(api: &dyn CloudApi, arn: &str) -> Result<Value, ApiError> {
    let mut tags = Vec::new();
    let mut next_token: Option<String> = None;
    loop {
        let mut input = json!({"ResourceArn": arn});
        if let Some(ref token) = next_token {
            input["NextToken"] = json!(token);
        }
        let page: ListTagsOutput = call_as(api, Request::new(SERVICE, "ListTags", input)).await?;
        tags.extend(page.tags);
        next_token = page.next_token.filter(|t| !t.is_empty());
        if next_token.is_none() {
            break;
        }
    }
    Ok(map_value(&flatten_tag_list(&tags, "Key", "Value")))
}

/// `arn:aws:sagemaker:us-east-1:123:domain/d-abc` -> `d-abc`.
pub fn domain_id_from_arn(arn: &str) -> Result<String, ProviderError> {
    let resource = arn.splitn(6, ':').nth(5).unwrap_or_default();
    match resource.strip_prefix("domain/") {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ProviderError::InvalidId {
            id: arn.to_string(),
            reason: "not a SageMaker domain ARN".to_string(),
        }),
    }
}

fn expand_user_settings(v: &Value) -> Value {
    let mut out = Map::new();
    if let Some(role) = v.get("execution_role") {
        out.insert("ExecutionRole".into(), role.clone());
    }
    if let Some(groups) = v.get("security_groups").filter(|g| g.is_array()) {
        out.insert("SecurityGroups".into(), groups.clone());
    }
    if let Some(sharing) = v.get("sharing_settings").and_then(Value::as_object) {
        let mut s = Map::new();
        for (from, to) in [
            ("notebook_output_option", "NotebookOutputOption"),
            ("s3_output_path", "S3OutputPath"),
            ("s3_kms_key_id", "S3KmsKeyId"),
        ] {
            if let Some(v) = sharing.get(from) {
                s.insert(to.into(), v.clone());
            }
        }
        out.insert("SharingSettings".into(), Value::Object(s));
    }
    Value::Object(out)
}

fn flatten_user_settings(u: &UserSettings) -> Value {
    let mut out = Map::new();
    if let Some(ref role) = u.execution_role {
        out.insert("execution_role".into(), json!(role));
    }
    if !u.security_groups.is_empty() {
        out.insert("security_groups".into(), json!(u.security_groups));
    }
    if let Some(ref s) = u.sharing_settings {
        let mut sharing = Map::new();
        if let Some(ref v) = s.notebook_output_option {
            sharing.insert("notebook_output_option".into(), json!(v));
        }
        if let Some(ref v) = s.s3_output_path {
            sharing.insert("s3_output_path".into(), json!(v));
        }
        if let Some(ref v) = s.s3_kms_key_id {
            sharing.insert("s3_kms_key_id".into(), json!(v));
        }
        out.insert("sharing_settings".into(), Value::Object(sharing));
    }
    Value::Object(out)
}

fn expand_create_input(attrs: &AttributeMap) -> Value {
    let mut input = Map::new();
    for (from, to) in [
        ("domain_name", "DomainName"),
        ("auth_mode", "AuthMode"),
        ("vpc_id", "VpcId"),
        ("app_network_access_type", "AppNetworkAccessType"),
        ("app_security_group_management", "AppSecurityGroupManagement"),
        ("kms_key_id", "KmsKeyId"),
    ] {
        if let Some(v) = attrs.get(from).filter(|v| !v.is_null()) {
            input.insert(to.into(), v.clone());
        }
    }
    input.insert("SubnetIds".into(), json!(get_str_list(attrs, "subnet_ids")));
    if let Some(settings) = attrs.get("default_user_settings") {
        input.insert("DefaultUserSettings".into(), expand_user_settings(settings));
    }
    let tags = get_str_map(attrs, "tags");
    if !tags.is_empty() {
        input.insert("Tags".into(), expand_tag_list(&tags, "Key", "Value"));
    }
    Value::Object(input)
}

fn flatten(d: &Domain) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    set_opt(&mut attrs, "domain_name", d.domain_name.clone());
    set_opt(&mut attrs, "auth_mode", d.auth_mode.clone());
    set_opt(&mut attrs, "vpc_id", d.vpc_id.clone());
    if !d.subnet_ids.is_empty() {
        attrs.insert("subnet_ids".into(), json!(d.subnet_ids));
    }
    set_opt(&mut attrs, "app_network_access_type", d.app_network_access_type.clone());
    set_opt(
        &mut attrs,
        "app_security_group_management",
        d.app_security_group_management.clone(),
    );
    set_opt(&mut attrs, "kms_key_id", d.kms_key_id.clone());
    if let Some(ref u) = d.default_user_settings {
        attrs.insert("default_user_settings".into(), flatten_user_settings(u));
    }
    set_opt(&mut attrs, "arn", d.domain_arn.clone());
    set_opt(&mut attrs, "url", d.url.clone());
    set_opt(&mut attrs, "home_efs_file_system_id", d.home_efs_file_system_id.clone());
    set_opt(
        &mut attrs,
        "single_sign_on_managed_application_instance_id",
        d.single_sign_on_managed_application_instance_id.clone(),
    );
    set_opt(
        &mut attrs,
        "security_group_id_for_domain_boundary",
        d.security_group_id_for_domain_boundary.clone(),
    );
    attrs
}

async fn wait_in_service(
    api: &dyn CloudApi,
    domain_id: &str,
    policy: BackoffPolicy,
) -> Result<(), ProviderError> {
    let target = Target::new(KIND, [domain_id]);
    poll(&target, OnNotFound::Retry, policy, || describe(api, domain_id))
        .await?
        .into_result(&target, &policy)?;
    Ok(())
}

pub struct SagemakerDomain;

#[async_trait]
impl ResourceHandler for SagemakerDomain {
    fn resource_type(&self) -> ResourceType {
        ResourceType::SagemakerDomain
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .attribute(
                Attribute::required("domain_name", AttrType::String)
                    .check(Check::Length(1, 63))
                    .force_new()
                    .describe("Domain name"),
            )
            .attribute(
                Attribute::required("auth_mode", AttrType::String)
                    .check(Check::OneOf(&["IAM", "SSO"]))
                    .force_new()
                    .describe("How users sign in to the domain"),
            )
            .attribute(
                Attribute::required("vpc_id", AttrType::String)
                    .force_new()
                    .describe("VPC used for Studio traffic"),
            )
            .attribute(
                Attribute::required("subnet_ids", AttrType::list(AttrType::String))
                    .force_new()
                    .describe("Subnets for Studio traffic"),
            )
            .attribute(
                Attribute::optional("app_network_access_type", AttrType::String)
                    .with_default(json!("PublicInternetOnly"))
                    .check(Check::OneOf(&["PublicInternetOnly", "VpcOnly"]))
                    .force_new()
                    .describe("Whether apps reach the internet directly or only through the VPC"),
            )
            .attribute(
                Attribute::optional("app_security_group_management", AttrType::String)
                    .check(Check::OneOf(&["Service", "Customer"]))
                    .force_new()
                    .describe("Who manages security groups for RStudio traffic"),
            )
            .attribute(
                Attribute::optional("kms_key_id", AttrType::String)
                    .force_new()
                    .describe("KMS key for the home EFS volume"),
            )
            .attribute(
                Attribute::required(
                    "default_user_settings",
                    AttrType::Block(vec![
                        Attribute::required("execution_role", AttrType::String),
                        Attribute::optional("security_groups", AttrType::list(AttrType::String)),
                        Attribute::optional(
                            "sharing_settings",
                            AttrType::Block(vec![
                                Attribute::optional("notebook_output_option", AttrType::String)
                                    .check(Check::OneOf(&["Allowed", "Disabled"])),
                                Attribute::optional("s3_output_path", AttrType::String),
                                Attribute::optional("s3_kms_key_id", AttrType::String),
                            ]),
                        ),
                    ]),
                )
                .describe("Settings applied to every user profile in the domain"),
            )
            .attribute(
                Attribute::optional(
                    "retention_policy",
                    AttrType::Block(vec![Attribute::optional(
                        "home_efs_file_system",
                        AttrType::String,
                    )
                    .check(Check::OneOf(&["Retain", "Delete"]))]),
                )
                .write_only()
                .describe("Whether the home EFS volume survives domain deletion"),
            )
            .attribute(Attribute::optional("tags", AttrType::Map).describe("Resource tags"))
            .attribute(Attribute::computed("arn", AttrType::String).describe("Domain ARN"))
            .attribute(Attribute::computed("url", AttrType::String).describe("Studio URL"))
            .attribute(
                Attribute::computed("home_efs_file_system_id", AttrType::String)
                    .describe("EFS volume holding user home directories"),
            )
            .attribute(
                Attribute::computed(
                    "single_sign_on_managed_application_instance_id",
                    AttrType::String,
                )
                .describe("IAM Identity Center application, in SSO mode"),
            )
            .attribute(
                Attribute::computed("security_group_id_for_domain_boundary", AttrType::String)
                    .describe("Security group for traffic between the domain and the EFS volume"),
            )
    }

    async fn create(
        &self,
        ctx: &HandlerCtx<'_>,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let name = require_str(desired, "domain_name")?;
        let out: CreateDomainOutput = call_as(
            ctx.api,
            Request::new(SERVICE, "CreateDomain", expand_create_input(desired)),
        )
        .await
        .map_err(|e| ProviderError::api(format!("creating SageMaker Domain ({name})"), e))?;

        let id = domain_id_from_arn(&out.domain_arn)?;
        info!(resource = %id, "waiting for domain to be InService");
        let settled = async {
            wait_in_service(ctx.api, &id, ctx.create_policy(DEFAULT_POLICY)).await?;
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
        let domain = match describe(ctx.api, id).await {
            Ok(domain) => domain,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(ProviderError::api(format!("reading SageMaker Domain ({id})"), e)),
        };
        let mut attrs = flatten(&domain);
        if let Some(ref arn) = domain.domain_arn {
            let tags = list_tags(ctx.api, arn).await.map_err(|e| {
                ProviderError::api(format!("listing tags for SageMaker Domain ({id})"), e)
            })?;
            attrs.insert("tags".into(), tags);
        }
        Ok(Some(attrs))
    }

    async fn update(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
        prior: &AttributeMap,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let changed = self.schema().changed(prior, desired);

        if changed.contains(&"default_user_settings") {
            let mut input = json!({"DomainId": id});
            if let Some(settings) = desired.get("default_user_settings") {
                input["DefaultUserSettings"] = expand_user_settings(settings);
            }
            ctx.api
                .call(Request::new(SERVICE, "UpdateDomain", input))
                .await
                .map_err(|e| ProviderError::api(format!("updating SageMaker Domain ({id})"), e))?;
            info!(resource = %id, "waiting for domain update");
            wait_in_service(ctx.api, id, ctx.update_policy(DEFAULT_POLICY)).await?;
        }

        if changed.contains(&"tags") {
            let arn = get_str(prior, "arn")
                .ok_or_else(|| ProviderError::Validation(format!("SageMaker Domain ({id}) has no ARN")))?;
            let (set, remove) =
                tags_diff(&get_str_map(prior, "tags"), &get_str_map(desired, "tags"));
            if !remove.is_empty() {
                ctx.api
                    .call(Request::new(
                        SERVICE,
                        "DeleteTags",
                        json!({"ResourceArn": arn, "TagKeys": remove}),
                    ))
                    .await
                    .map_err(|e| ProviderError::api(format!("untagging SageMaker Domain ({id})"), e))?;
            }
            if !set.is_empty() {
                ctx.api
                    .call(Request::new(
                        SERVICE,
                        "AddTags",
                        json!({"ResourceArn": arn, "Tags": expand_tag_list(&set, "Key", "Value")}),
                    ))
                    .await
                    .map_err(|e| ProviderError::api(format!("tagging SageMaker Domain ({id})"), e))?;
            }
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
        prior: &AttributeMap,
    ) -> Result<(), ProviderError> {
        let mut input = json!({"DomainId": id});
        let retention = prior
            .get("retention_policy")
            .and_then(|p| p.get("home_efs_file_system"))
            .and_then(Value::as_str);
        if let Some(retention) = retention {
            input["RetentionPolicy"] = json!({"HomeEfsFileSystem": retention});
        }
        match ctx.api.call(Request::new(SERVICE, "DeleteDomain", input)).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(ProviderError::api(format!("deleting SageMaker Domain ({id})"), e))
            }
        }

        let target = Target::new(KIND, [id]);
        let policy = ctx.delete_policy(DEFAULT_POLICY);
        let api = ctx.api;
        poll(&target, OnNotFound::Succeed, policy, || async move {
            describe(api, id).await.map(DomainDeletion)
        })
        .await?
        .into_result(&target, &policy)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scripted::ScriptedApi;
    use crate::core::types::Timeouts;
    use crate::error::WaitError;

    const ARN: &str = "arn:aws:sagemaker:us-east-1:123456789012:domain/d-abc123";

    fn domain(status: &str) -> Value {
        json!({
            "DomainId": "d-abc123",
            "DomainArn": ARN,
            "DomainName": "research",
            "Status": status,
            "AuthMode": "IAM",
            "VpcId": "vpc-1",
            "SubnetIds": ["subnet-1"],
            "AppNetworkAccessType": "PublicInternetOnly",
            "Url": "https://d-abc123.studio.us-east-1.sagemaker.aws",
            "HomeEfsFileSystemId": "fs-1",
            "DefaultUserSettings": {"ExecutionRole": "arn:aws:iam::1:role/studio"}
        })
    }

    fn tags() -> Value {
        json!({"Tags": [{"Key": "team", "Value": "ml"}]})
    }

    fn desired() -> AttributeMap {
        serde_json::from_value(json!({
            "domain_name": "research",
            "auth_mode": "IAM",
            "vpc_id": "vpc-1",
            "subnet_ids": ["subnet-1"],
            "default_user_settings": {"execution_role": "arn:aws:iam::1:role/studio"},
            "tags": {"team": "ml"}
        }))
        .unwrap()
    }

    #[test]
    fn test_st052_domain_id_from_arn() {
        assert_eq!(domain_id_from_arn(ARN).unwrap(), "d-abc123");
        assert!(domain_id_from_arn("arn:aws:sagemaker:us-east-1:1:endpoint/x").is_err());
        assert!(domain_id_from_arn("d-abc123").is_err());
    }

    #[test]
    fn test_st052_classify() {
        let d: Domain = serde_json::from_value(domain("Update_Failed")).unwrap();
        assert_eq!(d.status, DomainStatus::UpdateFailed);
        assert!(matches!(d.classify(), Classification::Failure(_)));
        let d: Domain = serde_json::from_value(domain("Deleting")).unwrap();
        assert_eq!(d.classify(), Classification::InProgress);
        assert_eq!(DomainDeletion(d).classify(), Classification::InProgress);
        let d: Domain = serde_json::from_value(domain("Rebooting")).unwrap();
        assert_eq!(d.classify(), Classification::InProgress);
    }

    #[test]
    fn test_st052_expand_create() {
        let input = expand_create_input(&SagemakerDomain.normalize(&desired()));
        assert_eq!(input["AppNetworkAccessType"], json!("PublicInternetOnly"));
        assert_eq!(
            input["DefaultUserSettings"]["ExecutionRole"],
            json!("arn:aws:iam::1:role/studio")
        );
        assert_eq!(input["Tags"], json!([{"Key": "team", "Value": "ml"}]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_st052_create_waits_in_service() {
        let api = ScriptedApi::new();
        api.push_ok("CreateDomain", json!({"DomainArn": ARN, "Url": "x"}))
            .push_ok_times("DescribeDomain", domain("Pending"), 3)
            .push_ok_times("DescribeDomain", domain("InService"), 2)
            .push_ok("ListTags", tags());
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);

        let state = SagemakerDomain.create(&ctx, &desired()).await.unwrap();
        assert_eq!(state.id, "d-abc123");
        assert_eq!(state.attributes["arn"], json!(ARN));
        assert_eq!(state.attributes["home_efs_file_system_id"], json!("fs-1"));
        assert_eq!(state.attributes["tags"], json!({"team": "ml"}));
        assert_eq!(api.inputs("ListTags")[0]["ResourceArn"], json!(ARN));
        assert_eq!(api.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_st052_create_failure_reason() {
        let api = ScriptedApi::new();
        let mut failed = domain("Failed");
        failed["FailureReason"] = json!("subnet not in VPC");
        api.push_ok("CreateDomain", json!({"DomainArn": ARN}))
            .push_ok("DescribeDomain", failed);
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let err = SagemakerDomain.create(&ctx, &desired()).await.unwrap_err();
        assert!(
            matches!(&err, ProviderError::Tainted { source, .. }
                if matches!(**source, ProviderError::Wait(WaitError::Failed { .. }))),
            "{err}"
        );
        assert_eq!(err.created_id(), Some("d-abc123"));
        assert!(err.to_string().contains("subnet not in VPC"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_st052_update_user_settings_and_tags() {
        let api = ScriptedApi::new();
        api.push_ok("UpdateDomain", json!({"DomainArn": ARN}))
            .push_ok("DescribeDomain", domain("Updating"))
            .push_ok("DescribeDomain", domain("InService"))
            .push_ok("AddTags", json!({}))
            .push_ok("DescribeDomain", domain("InService"))
            .push_ok("ListTags", tags());
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);

        let mut prior = desired();
        prior.insert("arn".into(), json!(ARN));
        prior.insert("tags".into(), json!({}));
        let mut next = desired();
        next.insert(
            "default_user_settings".into(),
            json!({"execution_role": "arn:aws:iam::1:role/studio-v2"}),
        );
        SagemakerDomain.update(&ctx, "d-abc123", &prior, &next).await.unwrap();
        assert_eq!(
            api.inputs("UpdateDomain")[0]["DefaultUserSettings"]["ExecutionRole"],
            json!("arn:aws:iam::1:role/studio-v2")
        );
        assert_eq!(api.call_count("DeleteTags"), 0);
        assert_eq!(api.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_st052_retention_change_is_state_only() {
        let api = ScriptedApi::new();
        api.push_ok("DescribeDomain", domain("InService"))
            .push_ok("ListTags", tags());
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let mut next = desired();
        next.insert("retention_policy".into(), json!({"home_efs_file_system": "Delete"}));
        SagemakerDomain.update(&ctx, "d-abc123", &desired(), &next).await.unwrap();
        assert_eq!(api.call_count("UpdateDomain"), 0);
        assert!(SagemakerDomain.replacement_reasons(&desired(), &next).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_st052_delete_passes_retention_and_waits() {
        let api = ScriptedApi::new();
        api.push_ok("DeleteDomain", json!({}))
            .push_ok("DescribeDomain", domain("Deleting"))
            .push_err("DescribeDomain", "ResourceNotFound", "Cannot find Domain");
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let mut prior = desired();
        prior.insert("retention_policy".into(), json!({"home_efs_file_system": "Delete"}));
        SagemakerDomain.delete(&ctx, "d-abc123", &prior).await.unwrap();
        assert_eq!(
            api.inputs("DeleteDomain")[0]["RetentionPolicy"],
            json!({"HomeEfsFileSystem": "Delete"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_st052_delete_failed() {
        let api = ScriptedApi::new();
        api.push_err("DeleteDomain", "ResourceNotFound", "gone already")
            .push_ok("DescribeDomain", domain("Delete_Failed"));
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let err = SagemakerDomain
            .delete(&ctx, "d-abc123", &AttributeMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Delete_Failed"));
    }

    #[tokio::test]
    async fn test_st052_read_follows_tag_pages() {
        let api = ScriptedApi::new();
        api.push_ok("DescribeDomain", domain("InService"))
            .push_ok(
                "ListTags",
                json!({"Tags": [{"Key": "team", "Value": "ml"}], "NextToken": "t1"}),
            )
            .push_ok("ListTags", json!({"Tags": [{"Key": "env", "Value": "prod"}]}));
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let live = SagemakerDomain.read(&ctx, "d-abc123").await.unwrap().unwrap();
        assert_eq!(live["tags"], json!({"env": "prod", "team": "ml"}));
        assert_eq!(api.inputs("ListTags")[1]["NextToken"], json!("t1"));
    }

    #[tokio::test]
    async fn test_st052_unchanged_domain_has_no_drift() {
        let api = ScriptedApi::new();
        api.push_ok("DescribeDomain", domain("InService"))
            .push_ok("ListTags", tags());
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);

        let mut wanted = desired();
        wanted.insert("retention_policy".into(), json!({"home_efs_file_system": "Delete"}));
        let wanted = SagemakerDomain.normalize(&wanted);
        let recorded = crate::resources::merge_state(&SagemakerDomain, &wanted, &AttributeMap::new());
        let live = SagemakerDomain.read(&ctx, "d-abc123").await.unwrap().unwrap();
        let observable = SagemakerDomain.schema().observable(&recorded);
        assert!(observable.contains_key("tags"));
        assert!(!observable.contains_key("retention_policy"));
        assert!(crate::core::drift::drifted_attributes(&observable, &live).is_empty());
    }
}
