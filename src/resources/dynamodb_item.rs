//! ST-055: DynamoDB table item.
//!
//! `item` is a JSON document in DynamoDB AttributeValue form, e.g.
//! `{"pk": {"S": "user#1"}, "visits": {"N": "3"}}`. Every call is retried
//! while the table is throttling.
//!
//! ID format: `<table>|<hash key>|<range key or empty>|<key JSON>`.

use super::attrs::{get_str, require_str};
use super::schema::{AttrType, Attribute, Check, ResourceSchema};
use super::{HandlerCtx, ResourceHandler, ResourceState};
use crate::api::{call_as, CloudApi, Request};
use crate::core::hasher::canonical;
use crate::core::types::{AttributeMap, ResourceType};
use crate::error::{ApiError, ProviderError};
use crate::waiter::{retry, Attempt, BackoffPolicy, Target};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

const KIND: &str = "aws_dynamodb_table_item";
const SERVICE: &str = "dynamodb";

pub const THROTTLE_POLICY: BackoffPolicy =
    BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(5 * 60));

const CONDITION_FAILED: &str = "ConditionalCheckFailedException";

/// Type descriptors allowed in an AttributeValue.
const ATTRIBUTE_VALUE_TYPES: &[&str] = &["S", "N", "B", "SS", "NS", "BS", "M", "L", "NULL", "BOOL"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetItemOutput {
    #[serde(default)]
    item: Option<Map<String, Value>>,
}

/// Parsed form of the resource ID.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemId {
    pub table: String,
    pub hash_key: String,
    pub range_key: Option<String>,
    pub key: Value,
}

impl ItemId {
    pub fn parse(id: &str) -> Result<Self, ProviderError> {
        let invalid = |reason: &str| ProviderError::InvalidId {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = id.splitn(4, '|').collect();
        let [table, hash_key, range_key, key] = parts[..] else {
            return Err(invalid("expected <table>|<hash key>|<range key>|<key JSON>"));
        };
        if table.is_empty() || hash_key.is_empty() {
            return Err(invalid("table and hash key must not be empty"));
        }
        let key: Value = serde_json::from_str(key).map_err(|e| invalid(&format!("key JSON: {e}")))?;
        Ok(Self {
            table: table.to_string(),
            hash_key: hash_key.to_string(),
            range_key: (!range_key.is_empty()).then(|| range_key.to_string()),
            key,
        })
    }

    fn format(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.table,
            self.hash_key,
            self.range_key.as_deref().unwrap_or_default(),
            self.key
        )
    }
}

fn parse_item(attrs: &AttributeMap) -> Result<Map<String, Value>, ProviderError> {
    let raw = require_str(attrs, "item")?;
    match serde_json::from_str(raw) {
        Ok(Value::Object(m)) => Ok(m),
        Ok(_) => Err(ProviderError::Validation("item: must be a JSON object".into())),
        Err(e) => Err(ProviderError::Validation(format!("item: invalid JSON: {e}"))),
    }
}

/// The key attributes of `item`, in canonical form.
fn item_key(
    item: &Map<String, Value>,
    hash_key: &str,
    range_key: Option<&str>,
) -> Result<Value, ProviderError> {
    let mut key = Map::new();
    for name in std::iter::once(hash_key).chain(range_key) {
        let value = item.get(name).ok_or_else(|| {
            ProviderError::Validation(format!("item: key attribute '{name}' is missing"))
        })?;
        key.insert(name.to_string(), value.clone());
    }
    Ok(canonical(&Value::Object(key)))
}

fn item_id(attrs: &AttributeMap) -> Result<ItemId, ProviderError> {
    let table = require_str(attrs, "table_name")?;
    let hash_key = require_str(attrs, "hash_key")?;
    let range_key = get_str(attrs, "range_key");
    let key = item_key(&parse_item(attrs)?, hash_key, range_key)?;
    Ok(ItemId {
        table: table.to_string(),
        hash_key: hash_key.to_string(),
        range_key: range_key.map(str::to_string),
        key,
    })
}

fn throttle_attempt(e: ApiError) -> Attempt {
    Attempt::from(e)
}

async fn put_item(
    api: &dyn CloudApi,
    target: &Target,
    policy: BackoffPolicy,
    input: &Value,
) -> Result<(), ProviderError> {
    retry(target, policy, || async move {
        api.call(Request::new(SERVICE, "PutItem", input.clone()))
            .await
            .map_err(throttle_attempt)
    })
    .await?;
    Ok(())
}

pub async fn get_item(
    api: &dyn CloudApi,
    id: &ItemId,
    policy: BackoffPolicy,
) -> Result<Option<Map<String, Value>>, ProviderError> {
    let target = Target::new(KIND, [id.table.as_str(), &id.key.to_string()]);
    let input = &json!({"TableName": id.table, "Key": id.key, "ConsistentRead": true});
    let result = retry(&target, policy, || async move {
        call_as::<GetItemOutput>(api, Request::new(SERVICE, "GetItem", input.clone()))
            .await
            .map_err(throttle_attempt)
    })
    .await;
    match result {
        Ok(out) => Ok(out.item.filter(|m| !m.is_empty())),
        Err(crate::error::WaitError::Api { source, .. }) if source.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub struct DynamodbTableItem;

#[async_trait]
impl ResourceHandler for DynamodbTableItem {
    fn resource_type(&self) -> ResourceType {
        ResourceType::DynamodbTableItem
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .attribute(
                Attribute::required("table_name", AttrType::String)
                    .check(Check::Pattern(r"^[A-Za-z0-9_.\-]{3,255}$"))
                    .force_new()
                    .describe("Table the item lives in"),
            )
            .attribute(
                Attribute::required("hash_key", AttrType::String)
                    .force_new()
                    .describe("Name of the table's partition key"),
            )
            .attribute(
                Attribute::optional("range_key", AttrType::String)
                    .force_new()
                    .describe("Name of the table's sort key, if it has one"),
            )
            .attribute(
                Attribute::required("item", AttrType::String)
                    .describe("Item as DynamoDB AttributeValue JSON"),
            )
    }

    fn validate(&self, attrs: &AttributeMap) -> Vec<String> {
        let mut errors = self.schema().validate(attrs);
        if !errors.is_empty() {
            return errors;
        }
        let item = match parse_item(attrs) {
            Ok(item) => item,
            Err(e) => return vec![e.to_string()],
        };
        if item.is_empty() {
            errors.push("item: must contain at least one attribute".into());
        }
        for (name, value) in &item {
            match value.as_object() {
                Some(m) if m.len() == 1 && m.keys().all(|k| ATTRIBUTE_VALUE_TYPES.contains(&k.as_str())) => {}
                _ => errors.push(format!(
                    "item.{name}: expected a single-type AttributeValue such as {{\"S\": \"...\"}}"
                )),
            }
        }
        if let Some(hash_key) = get_str(attrs, "hash_key") {
            if let Err(e) = item_key(&item, hash_key, get_str(attrs, "range_key")) {
                errors.push(e.to_string());
            }
        }
        errors
    }

    /// Canonical item JSON so formatting alone never shows up as a change.
    fn normalize(&self, attrs: &AttributeMap) -> AttributeMap {
        let mut out = self.schema().with_defaults(attrs);
        if let Ok(item) = parse_item(attrs) {
            out.insert(
                "item".into(),
                Value::String(canonical(&Value::Object(item)).to_string()),
            );
        }
        out
    }

    /// Changing a key attribute's value means a different item.
    fn replacement_reasons(&self, prior: &AttributeMap, desired: &AttributeMap) -> Vec<String> {
        let mut reasons: Vec<String> = self
            .schema()
            .force_new_changes(prior, desired)
            .into_iter()
            .map(str::to_string)
            .collect();
        if let (Ok(before), Ok(after)) = (item_id(prior), item_id(desired)) {
            if before.key != after.key {
                reasons.push("item (key attributes)".to_string());
            }
        }
        reasons
    }

    async fn create(
        &self,
        ctx: &HandlerCtx<'_>,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let id = item_id(desired)?;
        let item = parse_item(desired)?;
        let target = Target::new(KIND, [id.table.as_str(), &id.key.to_string()]);
        let input = json!({
            "TableName": id.table,
            "Item": item,
            "ConditionExpression": "attribute_not_exists(#hk)",
            "ExpressionAttributeNames": {"#hk": id.hash_key},
        });
        put_item(ctx.api, &target, ctx.create_policy(THROTTLE_POLICY), &input)
            .await
            .map_err(|e| match e {
                ProviderError::Wait(crate::error::WaitError::Api { source, .. })
                    if source.is_code(CONDITION_FAILED) =>
                {
                    ProviderError::Validation(format!(
                        "{target}: an item with this key already exists"
                    ))
                }
                other => other,
            })?;

        let attributes = self.read(ctx, &id.format()).await?.unwrap_or_default();
        Ok(ResourceState {
            id: id.format(),
            attributes,
        })
    }

    async fn read(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
    ) -> Result<Option<AttributeMap>, ProviderError> {
        let id = ItemId::parse(id)?;
        let Some(item) = get_item(ctx.api, &id, THROTTLE_POLICY).await? else {
            return Ok(None);
        };
        let mut attrs = AttributeMap::new();
        attrs.insert("table_name".into(), json!(id.table));
        attrs.insert("hash_key".into(), json!(id.hash_key));
        if let Some(ref range_key) = id.range_key {
            attrs.insert("range_key".into(), json!(range_key));
        }
        attrs.insert(
            "item".into(),
            Value::String(canonical(&Value::Object(item)).to_string()),
        );
        Ok(Some(attrs))
    }

    async fn update(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
        _prior: &AttributeMap,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let parsed = ItemId::parse(id)?;
        let item = parse_item(desired)?;
        let target = Target::new(KIND, [parsed.table.as_str(), &parsed.key.to_string()]);
        let input = json!({"TableName": parsed.table, "Item": item});
        put_item(ctx.api, &target, ctx.update_policy(THROTTLE_POLICY), &input).await?;
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
        let parsed = ItemId::parse(id)?;
        let target = Target::new(KIND, [parsed.table.as_str(), &parsed.key.to_string()]);
        let api = ctx.api;
        let input = &json!({"TableName": parsed.table, "Key": parsed.key});
        let result = retry(&target, ctx.delete_policy(THROTTLE_POLICY), || async move {
            api.call(Request::new(SERVICE, "DeleteItem", input.clone()))
                .await
                .map_err(throttle_attempt)
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            // table already gone
            Err(crate::error::WaitError::Api { source, .. }) if source.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scripted::ScriptedApi;
    use crate::core::types::Timeouts;

    fn desired(item: &str) -> AttributeMap {
        serde_json::from_value(json!({
            "table_name": "users",
            "hash_key": "pk",
            "range_key": "sk",
            "item": item
        }))
        .unwrap()
    }

    const ITEM: &str = r#"{"sk": {"S": "profile"}, "pk": {"S": "user#1"}, "visits": {"N": "3"}}"#;

    #[test]
    fn test_st055_id_round_trip() {
        let id = item_id(&desired(ITEM)).unwrap();
        let formatted = id.format();
        assert_eq!(
            formatted,
            r#"users|pk|sk|{"pk":{"S":"user#1"},"sk":{"S":"profile"}}"#
        );
        assert_eq!(ItemId::parse(&formatted).unwrap(), id);
        assert!(ItemId::parse("users|pk").is_err());
        assert!(ItemId::parse("users|pk||not json").is_err());
    }

    #[test]
    fn test_st055_validate() {
        assert!(DynamodbTableItem.validate(&desired(ITEM)).is_empty());
        let errs = DynamodbTableItem.validate(&desired(r#"{"pk": {"S": "a"}, "n": 3}"#));
        assert!(errs.iter().any(|e| e.starts_with("item.n:")), "{errs:?}");
        assert!(errs.iter().any(|e| e.contains("'sk' is missing")), "{errs:?}");
        let errs = DynamodbTableItem.validate(&desired("[1, 2]"));
        assert_eq!(errs, vec!["item: must be a JSON object"]);
    }

    #[test]
    fn test_st055_normalize_ignores_formatting() {
        let a = DynamodbTableItem.normalize(&desired(ITEM));
        let b = DynamodbTableItem.normalize(&desired(
            r#"{"visits":{"N":"3"},"pk":{"S":"user#1"},"sk":{"S":"profile"}}"#,
        ));
        assert_eq!(a, b);
    }

    #[test]
    fn test_st055_key_change_forces_replacement() {
        let moved = desired(r#"{"pk": {"S": "user#2"}, "sk": {"S": "profile"}}"#);
        assert_eq!(
            DynamodbTableItem.replacement_reasons(&desired(ITEM), &moved),
            vec!["item (key attributes)"]
        );
        let edited = desired(r#"{"pk": {"S": "user#1"}, "sk": {"S": "profile"}, "visits": {"N": "4"}}"#);
        assert!(DynamodbTableItem.replacement_reasons(&desired(ITEM), &edited).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_st055_create_retries_throttling() {
        let api = ScriptedApi::new();
        api.push_err("PutItem", "ProvisionedThroughputExceededException", "slow down")
            .push_err("PutItem", "ThrottlingException", "slow down")
            .push_ok("PutItem", json!({}))
            .push_ok("GetItem", json!({"Item": serde_json::from_str::<Value>(ITEM).unwrap()}));
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let state = DynamodbTableItem.create(&ctx, &desired(ITEM)).await.unwrap();
        assert!(state.id.starts_with("users|pk|sk|"));
        assert_eq!(api.call_count("PutItem"), 3);
        let put = &api.inputs("PutItem")[0];
        assert_eq!(put["ConditionExpression"], json!("attribute_not_exists(#hk)"));
        assert_eq!(put["ExpressionAttributeNames"]["#hk"], json!("pk"));
        assert_eq!(state.attributes["item"], DynamodbTableItem.normalize(&desired(ITEM))["item"]);
        assert_eq!(api.inputs("GetItem")[0]["ConsistentRead"], json!(true));
    }

    #[tokio::test]
    async fn test_st055_create_existing_item() {
        let api = ScriptedApi::new();
        api.push_err("PutItem", CONDITION_FAILED, "The conditional request failed");
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let err = DynamodbTableItem.create(&ctx, &desired(ITEM)).await.unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");
    }

    #[tokio::test]
    async fn test_st055_read_empty_item_is_none() {
        let api = ScriptedApi::new();
        api.push_ok("GetItem", json!({}))
            .push_err("GetItem", "ResourceNotFoundException", "table gone");
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let id = item_id(&desired(ITEM)).unwrap().format();
        assert!(DynamodbTableItem.read(&ctx, &id).await.unwrap().is_none());
        assert!(DynamodbTableItem.read(&ctx, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_st055_delete() {
        let api = ScriptedApi::new();
        api.push_ok("DeleteItem", json!({}));
        let timeouts = Timeouts::default();
        let ctx = HandlerCtx::new(&api, &timeouts);
        let id = item_id(&desired(ITEM)).unwrap().format();
        DynamodbTableItem.delete(&ctx, &id, &AttributeMap::new()).await.unwrap();
        assert_eq!(
            api.inputs("DeleteItem")[0]["Key"],
            json!({"pk": {"S": "user#1"}, "sk": {"S": "profile"}})
        );
    }
}
