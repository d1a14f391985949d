//! ST-056: Redshift snapshot copy grant.
//!
//! Grants are immutable; every attribute forces replacement. A new grant can
//! take a while to show up in DescribeSnapshotCopyGrants, so the read that
//! follows create is retried while the grant is not visible.

use super::attrs::{expand_tag_list, flatten_tag_list, get_str, get_str_map, map_value, require_str};
use super::schema::{AttrType, Attribute, Check, ResourceSchema};
use super::{HandlerCtx, ResourceHandler, ResourceState};
use crate::api::{call_as, CloudApi, Request};
use crate::core::types::{AttributeMap, ResourceType};
use crate::error::{ApiError, ProviderError};
use crate::waiter::{poll, retry, Attempt, BackoffPolicy, Classification, Classify, OnNotFound, Target};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::info;

const KIND: &str = "aws_redshift_snapshot_copy_grant";
const SERVICE: &str = "redshift";

pub const VISIBILITY_POLICY: BackoffPolicy =
    BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(3 * 60));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeOutput {
    #[serde(default)]
    snapshot_copy_grants: Vec<Grant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Grant {
    pub snapshot_copy_grant_name: String,
    #[serde(default)]
    pub kms_key_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<Value>,
}

/// Deletion wait: a grant that is still listed has not gone yet.
#[derive(Debug)]
struct GrantDeletion(Grant);

impl Classify for GrantDeletion {
    fn classify(&self) -> Classification {
        Classification::InProgress
    }
}

/// An empty list is reported as not found.
pub async fn describe(api: &dyn CloudApi, name: &str) -> Result<Grant, ApiError> {
    let out: DescribeOutput = call_as(
        api,
        Request::new(
            SERVICE,
            "DescribeSnapshotCopyGrants",
            json!({"SnapshotCopyGrantName": name}),
        ),
    )
    .await?;
    out.snapshot_copy_grants
        .into_iter()
        .find(|g| g.snapshot_copy_grant_name == name)
        .ok_or_else(|| {
            ApiError::not_found(
                "DescribeSnapshotCopyGrants",
                format!("snapshot copy grant {name} not found"),
            )
        })
}

fn expand_create_input(attrs: &AttributeMap) -> Value {
    let mut input = Map::new();
    if let Some(name) = get_str(attrs, "snapshot_copy_grant_name") {
        input.insert("SnapshotCopyGrantName".into(), json!(name));
    }
    if let Some(key) = get_str(attrs, "kms_key_id") {
        input.insert("KmsKeyId".into(), json!(key));
    }
    let tags = get_str_map(attrs, "tags");
    if !tags.is_empty() {
        input.insert("Tags".into(), expand_tag_list(&tags, "Key", "Value"));
    }
    Value::Object(input)
}

fn flatten(g: &Grant) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    attrs.insert(
        "snapshot_copy_grant_name".into(),
        json!(g.snapshot_copy_grant_name),
    );
    if let Some(ref key) = g.kms_key_id {
        attrs.insert("kms_key_id".into(), json!(key));
    }
    let tags = flatten_tag_list(&g.tags, "Key", "Value");
    if !tags.is_empty() {
        attrs.insert("tags".into(), map_value(&tags));
    }
    attrs
}

/// Not found is retryable while the new grant propagates.
fn visibility_attempt(e: ApiError) -> Attempt {
    if e.is_not_found() {
        Attempt::Retryable(e)
    } else {
        Attempt::from(e)
    }
}

pub struct SnapshotCopyGrant;

#[async_trait]
impl ResourceHandler for SnapshotCopyGrant {
    fn resource_type(&self) -> ResourceType {
        ResourceType::RedshiftSnapshotCopyGrant
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .attribute(
                Attribute::required("snapshot_copy_grant_name", AttrType::String)
                    .check(Check::Length(1, 63))
                    .check(Check::Pattern(r"^[a-z0-9\-]+$"))
                    .force_new()
                    .describe("Grant name, unique in the account and region"),
            )
            .attribute(
                Attribute::optional("kms_key_id", AttrType::String)
                    .force_new()
                    .describe("KMS key to grant Redshift use of; the account default key when unset"),
            )
            .attribute(
                Attribute::optional("tags", AttrType::Map)
                    .force_new()
                    .describe("Resource tags"),
            )
    }

    async fn create(
        &self,
        ctx: &HandlerCtx<'_>,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let name = require_str(desired, "snapshot_copy_grant_name")?;
        ctx.api
            .call(Request::new(
                SERVICE,
                "CreateSnapshotCopyGrant",
                expand_create_input(desired),
            ))
            .await
            .map_err(|e| {
                ProviderError::api(format!("creating Redshift Snapshot Copy Grant ({name})"), e)
            })?;

        info!(resource = %name, "waiting for snapshot copy grant to become visible");
        let target = Target::new(KIND, [name]);
        let api = ctx.api;
        let grant = retry(&target, ctx.create_policy(VISIBILITY_POLICY), || async move {
            describe(api, name).await.map_err(visibility_attempt)
        })
        .await
        .map_err(|e| ProviderError::tainted(name, e.into()))?;

        Ok(ResourceState {
            id: name.to_string(),
            attributes: flatten(&grant),
        })
    }

    async fn read(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
    ) -> Result<Option<AttributeMap>, ProviderError> {
        match describe(ctx.api, id).await {
            Ok(grant) => Ok(Some(flatten(&grant))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ProviderError::api(
                format!("reading Redshift Snapshot Copy Grant ({id})"),
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
        let result = ctx
            .api
            .call(Request::new(
                SERVICE,
                "DeleteSnapshotCopyGrant",
                json!({"SnapshotCopyGrantName": id}),
            ))
            .await;
        match result {
            Ok(_) => {}
            Err(e) if e.is_code("SnapshotCopyGrantNotFoundFault") => return Ok(()),
            Err(e) => {
                return Err(ProviderError::api(
                    format!("deleting Redshift Snapshot Copy Grant ({id})"),
                    e,
                ))
            }
        }

        let target = Target::new(KIND, [id]);
        let policy = ctx.delete_policy(VISIBILITY_POLICY);
        let api = ctx.api;
        poll(&target, OnNotFound::Succeed, policy, || async move {
            describe(api, id).await.map(GrantDeletion)
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

    fn grant() -> Value {
        json!({"SnapshotCopyGrants": [{
            "SnapshotCopyGrantName": "dr-grant",
            "KmsKeyId": "arn:aws:kms:us-west-2:1:key/abc",
            "Tags": [{"Key": "env", "Value": "prod"}]
        }]})
    }

    fn desired() -> AttributeMap {
        serde_json::from_value(json!({
            "snapshot_copy_grant_name": "dr-grant",
            "kms_key_id": "arn:aws:kms:us-west-2:1:key/abc",
            "tags": {"env": "prod"}
        }))
        .unwrap()
    }

    #[test]
    fn test_st056_expand() {
        let input = expand_create_input(&desired());
        assert_eq!(input["SnapshotCopyGrantName"], json!("dr-grant"));
        assert_eq!(input["Tags"], json!([{"Key": "env", "Value": "prod"}]));
    }

    #[test]
    fn test_st056_validate() {
        assert!(SnapshotCopyGrant.validate(&desired()).is_empty());
        let mut bad = desired();
        bad.insert("snapshot_copy_grant_name".into(), json!("DR_Grant"));
        assert_eq!(SnapshotCopyGrant.validate(&bad).len(), 1);
    }

    #[test]
    fn test_st056_every_attribute_forces_new() {
        let mut changed = desired();
        changed.insert("tags".into(), json!({"env": "dr"}));
        assert_eq!(
            SnapshotCopyGrant.replacement_reasons(&desired(), &changed),
            vec!["tags"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_st056_create_waits_for_visibility() {
        let api = ScriptedApi::new();
        api.push_ok("CreateSnapshotCopyGrant", json!({}))
            .push_ok("DescribeSnapshotCopyGrants", json!({"SnapshotCopyGrants": []}))
            .push_err("DescribeSnapshotCopyGrants", "SnapshotCopyGrantNotFoundFault", "lag")
            .push_ok("DescribeSnapshotCopyGrants", grant());
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let state = SnapshotCopyGrant.create(&ctx, &desired()).await.unwrap();
        assert_eq!(state.id, "dr-grant");
        assert_eq!(state.attributes, desired());
        assert_eq!(api.call_count("DescribeSnapshotCopyGrants"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_st056_create_never_visible() {
        let api = ScriptedApi::new();
        api.push_ok("CreateSnapshotCopyGrant", json!({}));
        // 5s cadence in a 10s budget: t = 0, 5, 10, then the final attempt
        for _ in 0..4 {
            api.push_ok("DescribeSnapshotCopyGrants", json!({"SnapshotCopyGrants": []}));
        }
        let timeouts = Timeouts {
            create: Some(Duration::from_secs(10)),
            ..Timeouts::default()
        };
        let ctx = HandlerCtx::new(&api, &timeouts);
        let err = SnapshotCopyGrant.create(&ctx, &desired()).await.unwrap_err();
        assert!(
            matches!(&err, ProviderError::Tainted { source, .. }
                if matches!(**source, ProviderError::Wait(WaitError::RetriesExhausted { .. }))),
            "{err}"
        );
        assert_eq!(err.created_id(), Some("dr-grant"));
        assert_eq!(api.remaining(), 0);
    }

    #[tokio::test]
    async fn test_st056_create_access_denied() {
        let api = ScriptedApi::new();
        api.push_err("CreateSnapshotCopyGrant", "AccessDenied", "no kms:CreateGrant");
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let err = SnapshotCopyGrant.create(&ctx, &desired()).await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("creating Redshift Snapshot Copy Grant (dr-grant)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_st056_delete_waits_until_gone() {
        let api = ScriptedApi::new();
        api.push_ok("DeleteSnapshotCopyGrant", json!({}))
            .push_ok("DescribeSnapshotCopyGrants", grant())
            .push_ok("DescribeSnapshotCopyGrants", json!({"SnapshotCopyGrants": []}));
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        SnapshotCopyGrant
            .delete(&ctx, "dr-grant", &AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(api.call_count("DescribeSnapshotCopyGrants"), 2);
    }

    #[tokio::test]
    async fn test_st056_delete_already_gone() {
        let api = ScriptedApi::new();
        api.push_err("DeleteSnapshotCopyGrant", "SnapshotCopyGrantNotFoundFault", "gone");
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        SnapshotCopyGrant
            .delete(&ctx, "dr-grant", &AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(api.call_count("DescribeSnapshotCopyGrants"), 0);
    }

    #[tokio::test]
    async fn test_st056_read_missing() {
        let api = ScriptedApi::new();
        api.push_ok("DescribeSnapshotCopyGrants", json!({"SnapshotCopyGrants": []}));
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        assert!(SnapshotCopyGrant.read(&ctx, "dr-grant").await.unwrap().is_none());
    }
}
