//! ST-053: CodeBuild project.
//!
//! No status to wait on. Create and update are retried while the service
//! role is still propagating through IAM. The ID is the project ARN.

use super::attrs::{expand_tag_list, flatten_tag_list, get_str, get_str_map, map_value, require_str};
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

const KIND: &str = "aws_codebuild_project";
const SERVICE: &str = "codebuild";

pub const PROPAGATION_POLICY: BackoffPolicy =
    BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(2 * 60));

const SOURCE_TYPES: &[&str] = &[
    "BITBUCKET",
    "CODECOMMIT",
    "CODEPIPELINE",
    "GITHUB",
    "GITHUB_ENTERPRISE",
    "GITLAB",
    "GITLAB_SELF_MANAGED",
    "NO_SOURCE",
    "S3",
];

/// Source types that can report build status back to the provider.
const STATUS_REPORTING_SOURCES: &[&str] = &[
    "BITBUCKET",
    "GITHUB",
    "GITHUB_ENTERPRISE",
    "GITLAB",
    "GITLAB_SELF_MANAGED",
];

// (attribute, API field)
const ARTIFACTS_FIELDS: &[(&str, &str)] = &[
    ("type", "type"),
    ("location", "location"),
    ("name", "name"),
    ("path", "path"),
    ("packaging", "packaging"),
    ("namespace_type", "namespaceType"),
    ("encryption_disabled", "encryptionDisabled"),
];

const ENVIRONMENT_FIELDS: &[(&str, &str)] = &[
    ("compute_type", "computeType"),
    ("image", "image"),
    ("type", "type"),
    ("image_pull_credentials_type", "imagePullCredentialsType"),
    ("privileged_mode", "privilegedMode"),
    ("certificate", "certificate"),
];

const SOURCE_FIELDS: &[(&str, &str)] = &[
    ("type", "type"),
    ("location", "location"),
    ("buildspec", "buildspec"),
    ("git_clone_depth", "gitCloneDepth"),
    ("insecure_ssl", "insecureSsl"),
    ("report_build_status", "reportBuildStatus"),
];

const ENV_VAR_FIELDS: &[(&str, &str)] = &[("name", "name"), ("value", "value"), ("type", "type")];

#[derive(Debug, Deserialize)]
struct ProjectOutput {
    project: Project,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetProjectsOutput {
    #[serde(default)]
    projects: Vec<Project>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub arn: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub service_role: Option<String>,
    #[serde(default)]
    pub timeout_in_minutes: Option<i64>,
    #[serde(default)]
    pub queued_timeout_in_minutes: Option<i64>,
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub source_version: Option<String>,
    #[serde(default)]
    pub concurrent_build_limit: Option<i64>,
    #[serde(default)]
    pub badge: Option<Badge>,
    #[serde(default)]
    pub artifacts: Option<Map<String, Value>>,
    #[serde(default)]
    pub environment: Option<Map<String, Value>>,
    #[serde(default)]
    pub source: Option<Map<String, Value>>,
    #[serde(default)]
    pub tags: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    #[serde(default)]
    pub badge_enabled: bool,
    #[serde(default)]
    pub badge_request_url: Option<String>,
}

/// Copy `fields` from `src` to a new object, renaming `from -> to`.
fn pick<'a>(
    src: &Map<String, Value>,
    fields: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Map<String, Value> {
    fields
        .into_iter()
        .filter_map(|(from, to)| {
            src.get(from)
                .filter(|v| !v.is_null())
                .map(|v| (to.to_string(), v.clone()))
        })
        .collect()
}

fn to_api<'a>(
    fields: &'a [(&'static str, &'static str)],
) -> impl Iterator<Item = (&'static str, &'static str)> + 'a {
    fields.iter().copied()
}

fn from_api<'a>(
    fields: &'a [(&'static str, &'static str)],
) -> impl Iterator<Item = (&'static str, &'static str)> + 'a {
    fields.iter().map(|&(attr, api)| (api, attr))
}

fn expand_source(src: &Map<String, Value>) -> Value {
    let mut out = pick(src, to_api(SOURCE_FIELDS));
    let reports = src
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| STATUS_REPORTING_SOURCES.contains(&t));
    if !reports {
        out.remove("reportBuildStatus");
    }
    Value::Object(out)
}

fn expand_environment(env: &Map<String, Value>) -> Value {
    let mut out = pick(env, to_api(ENVIRONMENT_FIELDS));
    if let Some(Value::Array(vars)) = env.get("environment_variable") {
        let vars: Vec<Value> = vars
            .iter()
            .filter_map(Value::as_object)
            .map(|v| Value::Object(pick(v, to_api(ENV_VAR_FIELDS))))
            .collect();
        out.insert("environmentVariables".into(), Value::Array(vars));
    }
    Value::Object(out)
}

fn flatten_environment(env: &Map<String, Value>) -> Value {
    let mut out = pick(env, from_api(ENVIRONMENT_FIELDS));
    if let Some(Value::Array(vars)) = env.get("environmentVariables") {
        if !vars.is_empty() {
            let vars: Vec<Value> = vars
                .iter()
                .filter_map(Value::as_object)
                .map(|v| Value::Object(pick(v, from_api(ENV_VAR_FIELDS))))
                .collect();
            out.insert("environment_variable".into(), Value::Array(vars));
        }
    }
    Value::Object(out)
}

/// Request body shared by `CreateProject` and `UpdateProject`.
fn expand_input(attrs: &AttributeMap) -> Value {
    let mut input = Map::new();
    for (from, to) in [
        ("name", "name"),
        ("description", "description"),
        ("service_role", "serviceRole"),
        ("build_timeout", "timeoutInMinutes"),
        ("queued_timeout", "queuedTimeoutInMinutes"),
        ("badge_enabled", "badgeEnabled"),
        ("concurrent_build_limit", "concurrentBuildLimit"),
        ("encryption_key", "encryptionKey"),
        ("source_version", "sourceVersion"),
    ] {
        if let Some(v) = attrs.get(from).filter(|v| !v.is_null()) {
            input.insert(to.into(), v.clone());
        }
    }
    if let Some(Value::Object(a)) = attrs.get("artifacts") {
        input.insert("artifacts".into(), Value::Object(pick(a, to_api(ARTIFACTS_FIELDS))));
    }
    if let Some(Value::Object(e)) = attrs.get("environment") {
        input.insert("environment".into(), expand_environment(e));
    }
    if let Some(Value::Object(s)) = attrs.get("source") {
        input.insert("source".into(), expand_source(s));
    }
    // UpdateProject replaces the whole tag set, so always send it.
    input.insert(
        "tags".into(),
        expand_tag_list(&get_str_map(attrs, "tags"), "key", "value"),
    );
    Value::Object(input)
}

fn flatten(p: &Project) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    attrs.insert("name".into(), json!(p.name));
    for (key, value) in [
        ("description", p.description.clone().map(Value::from)),
        ("service_role", p.service_role.clone().map(Value::from)),
        ("build_timeout", p.timeout_in_minutes.map(Value::from)),
        ("queued_timeout", p.queued_timeout_in_minutes.map(Value::from)),
        ("concurrent_build_limit", p.concurrent_build_limit.map(Value::from)),
        ("encryption_key", p.encryption_key.clone().map(Value::from)),
        ("source_version", p.source_version.clone().map(Value::from)),
    ] {
        if let Some(v) = value {
            attrs.insert(key.into(), v);
        }
    }
    if let Some(ref a) = p.artifacts {
        attrs.insert("artifacts".into(), Value::Object(pick(a, from_api(ARTIFACTS_FIELDS))));
    }
    if let Some(ref e) = p.environment {
        attrs.insert("environment".into(), flatten_environment(e));
    }
    if let Some(ref s) = p.source {
        attrs.insert("source".into(), Value::Object(pick(s, from_api(SOURCE_FIELDS))));
    }
    let tags = flatten_tag_list(&p.tags, "key", "value");
    if !tags.is_empty() {
        attrs.insert("tags".into(), map_value(&tags));
    }
    let badge_enabled = p.badge.as_ref().is_some_and(|b| b.badge_enabled);
    attrs.insert("badge_enabled".into(), json!(badge_enabled));
    if let Some(url) = p.badge.as_ref().and_then(|b| b.badge_request_url.clone()) {
        attrs.insert("badge_url".into(), json!(url));
    }
    attrs.insert("arn".into(), json!(p.arn));
    attrs
}

/// IAM eventual consistency surfaces as an `InvalidInputException`.
fn propagation_attempt(e: ApiError) -> Attempt {
    if e.message_contains("InvalidInputException", "ot authorized to perform") {
        Attempt::Retryable(e)
    } else {
        Attempt::from(e)
    }
}

async fn find(api: &dyn CloudApi, name_or_arn: &str) -> Result<Option<Project>, ApiError> {
    let out: BatchGetProjectsOutput = call_as(
        api,
        Request::new(SERVICE, "BatchGetProjects", json!({"names": [name_or_arn]})),
    )
    .await?;
    Ok(out.projects.into_iter().next())
}

pub struct CodebuildProject;

#[async_trait]
impl ResourceHandler for CodebuildProject {
    fn resource_type(&self) -> ResourceType {
        ResourceType::CodebuildProject
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .attribute(
                Attribute::required("name", AttrType::String)
                    .check(Check::Pattern(r"^[A-Za-z0-9][A-Za-z0-9\-_]{1,254}$"))
                    .force_new()
                    .describe("Project name"),
            )
            .attribute(
                Attribute::optional("description", AttrType::String)
                    .check(Check::Length(0, 255))
                    .describe("Short description"),
            )
            .attribute(
                Attribute::required("service_role", AttrType::String)
                    .describe("IAM role CodeBuild assumes for builds"),
            )
            .attribute(
                Attribute::optional("build_timeout", AttrType::Int)
                    .with_default(json!(60))
                    .check(Check::IntRange(5, 2160))
                    .describe("Minutes before an unfinished build is stopped"),
            )
            .attribute(
                Attribute::optional("queued_timeout", AttrType::Int)
                    .with_default(json!(480))
                    .check(Check::IntRange(5, 480))
                    .describe("Minutes a build may wait in the queue"),
            )
            .attribute(
                Attribute::optional("badge_enabled", AttrType::Bool)
                    .with_default(json!(false))
                    .describe("Generate a public build badge"),
            )
            .attribute(
                Attribute::optional("concurrent_build_limit", AttrType::Int)
                    .check(Check::IntRange(1, i64::from(i32::MAX)))
                    .describe("Maximum concurrent builds"),
            )
            .attribute(
                Attribute::optional("encryption_key", AttrType::String)
                    .describe("KMS key for build output artifacts"),
            )
            .attribute(
                Attribute::optional("source_version", AttrType::String)
                    .describe("Branch, tag or commit to build by default"),
            )
            .attribute(
                Attribute::required(
                    "artifacts",
                    AttrType::Block(vec![
                        Attribute::required("type", AttrType::String)
                            .check(Check::OneOf(&["CODEPIPELINE", "NO_ARTIFACTS", "S3"])),
                        Attribute::optional("location", AttrType::String),
                        Attribute::optional("name", AttrType::String),
                        Attribute::optional("path", AttrType::String),
                        Attribute::optional("packaging", AttrType::String)
                            .check(Check::OneOf(&["NONE", "ZIP"])),
                        Attribute::optional("namespace_type", AttrType::String)
                            .check(Check::OneOf(&["NONE", "BUILD_ID"])),
                        Attribute::optional("encryption_disabled", AttrType::Bool),
                    ]),
                )
                .describe("Build output"),
            )
            .attribute(
                Attribute::required(
                    "environment",
                    AttrType::Block(vec![
                        Attribute::required("compute_type", AttrType::String),
                        Attribute::required("image", AttrType::String),
                        Attribute::required("type", AttrType::String),
                        Attribute::optional("image_pull_credentials_type", AttrType::String)
                            .check(Check::OneOf(&["CODEBUILD", "SERVICE_ROLE"])),
                        Attribute::optional("privileged_mode", AttrType::Bool),
                        Attribute::optional("certificate", AttrType::String),
                        Attribute::optional(
                            "environment_variable",
                            AttrType::list(AttrType::Block(vec![
                                Attribute::required("name", AttrType::String),
                                Attribute::required("value", AttrType::String),
                                Attribute::optional("type", AttrType::String).check(Check::OneOf(
                                    &["PLAINTEXT", "PARAMETER_STORE", "SECRETS_MANAGER"],
                                )),
                            ])),
                        ),
                    ]),
                )
                .describe("Build container"),
            )
            .attribute(
                Attribute::required(
                    "source",
                    AttrType::Block(vec![
                        Attribute::required("type", AttrType::String).check(Check::OneOf(SOURCE_TYPES)),
                        Attribute::optional("location", AttrType::String),
                        Attribute::optional("buildspec", AttrType::String),
                        Attribute::optional("git_clone_depth", AttrType::Int)
                            .check(Check::IntRange(0, i64::from(i32::MAX))),
                        Attribute::optional("insecure_ssl", AttrType::Bool),
                        Attribute::optional("report_build_status", AttrType::Bool),
                    ]),
                )
                .describe("Where the build input comes from"),
            )
            .attribute(Attribute::optional("tags", AttrType::Map).describe("Resource tags"))
            .attribute(Attribute::computed("arn", AttrType::String).describe("Project ARN"))
            .attribute(
                Attribute::computed("badge_url", AttrType::String)
                    .describe("Build badge URL when badges are enabled"),
            )
    }

    fn validate(&self, attrs: &AttributeMap) -> Vec<String> {
        let mut errors = self.schema().validate(attrs);
        if let Some(Value::Object(source)) = attrs.get("source") {
            let non_empty = |k: &str| source.get(k).and_then(Value::as_str).is_some_and(|s| !s.is_empty());
            if source.get("type").and_then(Value::as_str) == Some("NO_SOURCE") {
                if !non_empty("buildspec") {
                    errors.push("source.buildspec: must be set when source type is NO_SOURCE".into());
                }
                if non_empty("location") {
                    errors.push("source.location: must be empty when source type is NO_SOURCE".into());
                }
            }
        }
        errors
    }

    async fn create(
        &self,
        ctx: &HandlerCtx<'_>,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let name = require_str(desired, "name")?;
        let api = ctx.api;
        let input = &expand_input(desired);
        let target = Target::new(KIND, [name]);
        let out: ProjectOutput = retry(&target, ctx.create_policy(PROPAGATION_POLICY), || async move {
            call_as(api, Request::new(SERVICE, "CreateProject", input.clone()))
                .await
                .map_err(propagation_attempt)
        })
        .await?;

        let mut attributes = flatten(&out.project);
        if let Some(project) = find(api, &out.project.arn).await.map_err(|e| {
            ProviderError::api(format!("reading CodeBuild Project ({name})"), e)
        })? {
            attributes = flatten(&project);
        }
        Ok(ResourceState {
            id: out.project.arn,
            attributes,
        })
    }

    async fn read(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
    ) -> Result<Option<AttributeMap>, ProviderError> {
        match find(ctx.api, id).await {
            Ok(project) => Ok(project.as_ref().map(flatten)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ProviderError::api(format!("reading CodeBuild Project ({id})"), e)),
        }
    }

    async fn update(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
        _prior: &AttributeMap,
        desired: &AttributeMap,
    ) -> Result<ResourceState, ProviderError> {
        let api = ctx.api;
        let input = &expand_input(desired);
        let target = Target::new(KIND, [get_str(desired, "name").unwrap_or(id)]);
        let out: ProjectOutput = retry(&target, ctx.update_policy(PROPAGATION_POLICY), || async move {
            call_as(api, Request::new(SERVICE, "UpdateProject", input.clone()))
                .await
                .map_err(propagation_attempt)
        })
        .await?;
        Ok(ResourceState {
            id: id.to_string(),
            attributes: flatten(&out.project),
        })
    }

    async fn delete(
        &self,
        ctx: &HandlerCtx<'_>,
        id: &str,
        _prior: &AttributeMap,
    ) -> Result<(), ProviderError> {
        match ctx
            .api
            .call(Request::new(SERVICE, "DeleteProject", json!({"name": id})))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ProviderError::api(format!("deleting CodeBuild Project ({id})"), e)),
        }
    }
}
