//! GitHub Projects (v2) store over the GraphQL API.
//!
//! Project, status field, option, repository and label ids are resolved on
//! first use and cached for the life of the store. Queries are retried on
//! transport errors, 5xx and rate limiting. Mutations are resent only when
//! the server refused them without running them (rate limiting or a failed
//! connect); a 5xx or dropped response on a write fails at once.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{BoardConfig, Config, RemoteConfig};
use crate::error::{Error, Result};
use crate::labels::LabelDiffer;
use crate::remote::{
    self, CreateStep, CreatedIssue, Filter, IssueDraft, IssueUpdate, RemoteIssue, RemoteIssueStore,
    RemoteItems,
};
use crate::task::GitHubRef;

/// Fallback token variable when the configured one is unset
pub const FALLBACK_TOKEN_ENV: &str = "BOARDSYNC_TOKEN";

const MAX_BACKOFF_MS: u64 = 30_000;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const LABELS_PER_ISSUE: usize = 50;
const LABELS_PAGE: usize = 100;

const ITEMS_QUERY: &str = r#"
query($owner: String!, $number: Int!, $first: Int!, $after: String, $statusField: String!, $labels: Int!) {
  repositoryOwner(login: $owner) {
    ... on ProjectV2Owner {
      projectV2(number: $number) {
        items(first: $first, after: $after) {
          pageInfo { hasNextPage endCursor }
          nodes {
            id
            updatedAt
            fieldValueByName(name: $statusField) {
              ... on ProjectV2ItemFieldSingleSelectValue { name }
            }
            content {
              ... on Issue {
                id
                number
                title
                body
                state
                createdAt
                updatedAt
                repository { nameWithOwner }
                labels(first: $labels) { nodes { name } }
              }
            }
          }
        }
      }
    }
  }
}
"#;

const IDS_QUERY: &str = r#"
query($owner: String!, $number: Int!, $repoOwner: String!, $repo: String!, $statusField: String!) {
  repositoryOwner(login: $owner) {
    ... on ProjectV2Owner {
      projectV2(number: $number) {
        id
        field(name: $statusField) {
          ... on ProjectV2SingleSelectField { id options { id name } }
        }
      }
    }
  }
  repository(owner: $repoOwner, name: $repo) { id }
}
"#;

const LABELS_QUERY: &str = r#"
query($owner: String!, $repo: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $repo) {
    labels(first: $first, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes { id name }
    }
  }
}
"#;

const VIEWER_QUERY: &str = "query { viewer { login } }";

const CREATE_ISSUE: &str = r#"
mutation($repositoryId: ID!, $title: String!, $body: String, $labelIds: [ID!]) {
  createIssue(input: { repositoryId: $repositoryId, title: $title, body: $body, labelIds: $labelIds }) {
    issue { id number createdAt repository { nameWithOwner } }
  }
}
"#;

const ADD_TO_PROJECT: &str = r#"
mutation($projectId: ID!, $contentId: ID!) {
  addProjectV2ItemById(input: { projectId: $projectId, contentId: $contentId }) { item { id } }
}
"#;

const SET_STATUS: &str = r#"
mutation($projectId: ID!, $itemId: ID!, $fieldId: ID!, $optionId: String!) {
  updateProjectV2ItemFieldValue(input: {
    projectId: $projectId, itemId: $itemId, fieldId: $fieldId,
    value: { singleSelectOptionId: $optionId }
  }) { projectV2Item { id } }
}
"#;

const UPDATE_ISSUE: &str = r#"
mutation($id: ID!, $title: String, $body: String) {
  updateIssue(input: { id: $id, title: $title, body: $body }) { issue { id } }
}
"#;

const ADD_LABELS: &str = r#"
mutation($id: ID!, $labelIds: [ID!]!) {
  addLabelsToLabelable(input: { labelableId: $id, labelIds: $labelIds }) { clientMutationId }
}
"#;

const REMOVE_LABELS: &str = r#"
mutation($id: ID!, $labelIds: [ID!]!) {
  removeLabelsFromLabelable(input: { labelableId: $id, labelIds: $labelIds }) { clientMutationId }
}
"#;

const ITEM_UPDATED: &str = r#"
query($id: ID!) {
  node(id: $id) {
    ... on ProjectV2Item {
      updatedAt
      content { ... on Issue { updatedAt } }
    }
  }
}
"#;

const CLOSE_ISSUE: &str = r#"
mutation($id: ID!) {
  closeIssue(input: { issueId: $id }) { issue { state } }
}
"#;

// =============================================================================
// Retry policy
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub base_ms: u64,
    pub max_rate_limit_wait: Duration,
}

impl RetryPolicy {
    fn from_config(remote: &RemoteConfig) -> Self {
        Self {
            max_retries: remote.max_retries,
            base_ms: remote.retry_base_ms,
            max_rate_limit_wait: Duration::from_secs(remote.max_rate_limit_wait_secs),
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, capped
pub(crate) fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
}

/// How long to wait before retrying, if the response was rate limited.
///
/// `retry-after` wins; otherwise an exhausted `x-ratelimit-remaining`
/// waits until `x-ratelimit-reset` (epoch seconds). `now` is epoch seconds.
pub(crate) fn rate_limit_wait(status: u16, headers: &HeaderMap, now: i64) -> Option<Duration> {
    if status != 403 && status != 429 {
        return None;
    }

    if let Some(seconds) = header_i64(headers, "retry-after") {
        return Some(Duration::from_secs(seconds.max(1) as u64));
    }

    let exhausted = header_i64(headers, "x-ratelimit-remaining") == Some(0);
    match header_i64(headers, "x-ratelimit-reset") {
        Some(reset) if exhausted => Some(Duration::from_secs((reset - now).max(1) as u64)),
        _ if status == 429 => Some(Duration::from_secs(60)),
        _ => None,
    }
}

/// Whether a request is safe to send twice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    Query,
    Mutation,
}

impl Request {
    /// A mutation is resent only if the server refused it before running it.
    pub(crate) fn may_resend(self, refused: bool) -> bool {
        self == Request::Query || refused
    }
}

/// What to do with one HTTP exchange
#[derive(Debug)]
pub(crate) enum Outcome {
    Data(Value),
    /// Transient failure. `refused` means the request was not executed.
    Retry {
        wait: Duration,
        error: Error,
        refused: bool,
    },
    Fail(Error),
}

/// Whether to send `request` again after a transient failure
pub(crate) fn should_resend(
    request: Request,
    refused: bool,
    attempt: u32,
    policy: &RetryPolicy,
) -> bool {
    attempt < policy.max_retries && request.may_resend(refused)
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

/// Classify one HTTP response.
pub(crate) fn interpret(
    status: u16,
    headers: &HeaderMap,
    body: &str,
    now: i64,
    attempt: u32,
    policy: &RetryPolicy,
) -> Outcome {
    if let Some(wait) = rate_limit_wait(status, headers, now) {
        if wait > policy.max_rate_limit_wait {
            return Outcome::Fail(Error::Network(format!(
                "rate limited; resets in {}s",
                wait.as_secs()
            )));
        }
        return Outcome::Retry {
            wait,
            error: Error::Network("rate limit exceeded".to_string()),
            refused: true,
        };
    }

    match status {
        401 => return Outcome::Fail(Error::Auth("bad credentials".to_string())),
        403 => return Outcome::Fail(Error::Auth(format!("forbidden: {}", snippet(body)))),
        500..=599 => {
            return Outcome::Retry {
                wait: backoff_delay(policy.base_ms, attempt),
                error: Error::Network(format!("server error {status}")),
                refused: false,
            }
        }
        200..=299 => {}
        _ => return Outcome::Fail(Error::Remote(format!("HTTP {status}: {}", snippet(body)))),
    }

    let response: GraphQlResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(err) => return Outcome::Fail(Error::Remote(format!("invalid response: {err}"))),
    };

    if !response.errors.is_empty() {
        let kind_is = |wanted: &str| {
            response
                .errors
                .iter()
                .any(|err| err.kind.as_deref() == Some(wanted))
        };
        let message = response
            .errors
            .iter()
            .map(|err| err.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");

        if kind_is("RATE_LIMITED") {
            return Outcome::Retry {
                wait: backoff_delay(policy.base_ms, attempt),
                error: Error::Network(message),
                refused: true,
            };
        }
        if kind_is("NOT_FOUND") {
            return Outcome::Fail(Error::RemoteNotFound(message));
        }
        return Outcome::Fail(Error::Remote(message));
    }

    match response.data {
        Some(data) if !data.is_null() => Outcome::Data(data),
        _ => Outcome::Fail(Error::Remote("response carried no data".to_string())),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

// =============================================================================
// Response shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemsData {
    repository_owner: Option<ItemsOwner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemsOwner {
    #[serde(rename = "projectV2")]
    project: Option<ItemsProject>,
}

#[derive(Debug, Deserialize)]
struct ItemsProject {
    items: ItemsConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemsConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<ItemNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemNode {
    id: String,
    updated_at: DateTime<Utc>,
    field_value_by_name: Option<NamedValue>,
    content: Option<IssueContent>,
}

#[derive(Debug, Deserialize)]
struct ItemUpdated {
    node: Option<ItemUpdatedNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemUpdatedNode {
    updated_at: DateTime<Utc>,
    #[serde(default)]
    content: Option<UpdatedAt>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatedAt {
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct NamedValue {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct IssueContent {
    id: Option<String>,
    number: Option<u64>,
    title: String,
    body: Option<String>,
    state: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    repository: Option<RepositoryName>,
    labels: Option<Nodes<LabelName>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryName {
    name_with_owner: String,
}

#[derive(Debug, Deserialize)]
struct LabelName {
    name: String,
}

/// One page of board items and the cursor of the next page.
///
/// Draft issues and pull requests are skipped.
pub(crate) fn parse_items_page(data: Value) -> Result<(Vec<RemoteIssue>, Option<String>)> {
    let data: ItemsData = shape(data)?;
    let items = data
        .repository_owner
        .and_then(|owner| owner.project)
        .map(|project| project.items)
        .ok_or_else(|| Error::StoreInvalid("project not found".to_string()))?;

    let mut issues = Vec::new();
    for node in items.nodes.into_iter().flatten() {
        let content = match node.content {
            Some(content) => content,
            None => continue,
        };
        let (Some(node_id), Some(number), Some(repository)) =
            (content.id, content.number, content.repository)
        else {
            debug!(item = %node.id, "skipping non-issue board item");
            continue;
        };

        let issue_updated = content.updated_at.unwrap_or(node.updated_at);
        issues.push(RemoteIssue {
            remote: GitHubRef {
                repository: repository.name_with_owner,
                issue_number: number,
                issue_node_id: node_id,
                project_item_id: node.id,
            },
            title: content.title,
            body: content.body.unwrap_or_default(),
            status: node.field_value_by_name.and_then(|value| value.name),
            labels: content
                .labels
                .map(|labels| labels.nodes.into_iter().flatten().map(|l| l.name).collect())
                .unwrap_or_default(),
            closed: content
                .state
                .map(|state| state.eq_ignore_ascii_case("CLOSED"))
                .unwrap_or(false),
            created: content.created_at.unwrap_or(issue_updated),
            updated: issue_updated.max(node.updated_at),
        });
    }

    let next = if items.page_info.has_next_page {
        items.page_info.end_cursor
    } else {
        None
    };
    Ok((issues, next))
}

fn shape<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|err| Error::Remote(format!("unexpected response shape: {err}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdsData {
    repository_owner: Option<IdsOwner>,
    repository: Option<IdsRepository>,
}

#[derive(Debug, Deserialize)]
struct IdsOwner {
    #[serde(rename = "projectV2")]
    project: Option<IdsProject>,
}

#[derive(Debug, Deserialize)]
struct IdsProject {
    id: String,
    field: Option<StatusFieldNode>,
}

#[derive(Debug, Deserialize)]
struct StatusFieldNode {
    id: Option<String>,
    #[serde(default)]
    options: Vec<IdName>,
}

#[derive(Debug, Deserialize)]
struct IdName {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct IdsRepository {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LabelsData {
    repository: Option<LabelsRepository>,
}

#[derive(Debug, Deserialize)]
struct LabelsRepository {
    labels: LabelsConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelsConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<IdName>>,
}

/// Ids resolved once per store
#[derive(Debug, Clone)]
pub(crate) struct ProjectIds {
    pub project_id: String,
    pub status_field_id: Option<String>,
    /// Option name to option id
    pub status_options: Vec<(String, String)>,
    pub repository_id: String,
    /// Lowercased label name to label id
    pub labels: HashMap<String, String>,
}

impl ProjectIds {
    fn status_option(&self, status: &str) -> Option<&str> {
        self.status_options
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(status))
            .map(|(_, id)| id.as_str())
    }

    fn label_id(&self, name: &str) -> Option<&str> {
        self.labels.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Status field id and option id for `status`
    fn status_ids(&self, status: &str, status_field: &str) -> Result<(&str, &str)> {
        let field_id = self.status_field_id.as_deref().ok_or_else(|| {
            Error::StoreInvalid(format!("project has no single-select field '{status_field}'"))
        })?;
        let option_id = self
            .status_option(status)
            .ok_or_else(|| Error::Remote(format!("unknown status option '{status}'")))?;
        Ok((field_id, option_id))
    }

    /// Label ids for `names`.
    ///
    /// A canonical type or priority label that is missing from the
    /// repository is an error. A missing free-form tag is skipped.
    fn resolve_labels<'n>(
        &self,
        names: impl IntoIterator<Item = &'n String>,
        canonical: &[String],
        repository: &str,
    ) -> Result<Vec<&str>> {
        let mut resolved = Vec::new();
        for name in names {
            match self.label_id(name) {
                Some(id) => resolved.push(id),
                None if canonical.iter().any(|c| c.eq_ignore_ascii_case(name)) => {
                    return Err(Error::Remote(format!(
                        "label '{name}' does not exist in {repository}"
                    )));
                }
                None => warn!(label = %name, repository, "tag has no matching label; skipped"),
            }
        }
        Ok(resolved)
    }
}

/// Every id an update needs, resolved before the first write
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct UpdatePlan<'a> {
    pub add_label_ids: Vec<&'a str>,
    pub remove_label_ids: Vec<&'a str>,
    /// Status field id and option id
    pub status: Option<(&'a str, &'a str)>,
}

/// Resolve the ids for `update` so nothing is sent when one is missing.
pub(crate) fn plan_update<'a>(
    ids: &'a ProjectIds,
    update: &IssueUpdate,
    canonical: &[String],
    repository: &str,
    status_field: &str,
) -> Result<UpdatePlan<'a>> {
    let add_label_ids = ids.resolve_labels(&update.labels_add, canonical, repository)?;
    let remove_label_ids = update
        .labels_remove
        .iter()
        .filter_map(|name| ids.label_id(name))
        .collect();
    let status = update
        .status
        .as_deref()
        .map(|status| ids.status_ids(status, status_field))
        .transpose()?;

    Ok(UpdatePlan {
        add_label_ids,
        remove_label_ids,
        status,
    })
}

pub(crate) fn parse_ids(data: Value, remote: &RemoteConfig) -> Result<ProjectIds> {
    let data: IdsData = shape(data)?;
    let project = data
        .repository_owner
        .and_then(|owner| owner.project)
        .ok_or_else(|| {
            Error::StoreInvalid(format!(
                "project {} not found for {}",
                remote.project_number,
                remote.project_owner()
            ))
        })?;
    let repository = data.repository.ok_or_else(|| {
        Error::StoreInvalid(format!("repository {} not found", remote.repository()))
    })?;

    let (status_field_id, status_options) = match project.field {
        Some(field) => (
            field.id,
            field
                .options
                .into_iter()
                .map(|option| (option.name, option.id))
                .collect(),
        ),
        None => (None, Vec::new()),
    };

    Ok(ProjectIds {
        project_id: project.id,
        status_field_id,
        status_options,
        repository_id: repository.id,
        labels: HashMap::new(),
    })
}

/// One page of repository labels as (lowercased name, id), and the cursor
/// of the next page.
pub(crate) fn parse_labels_page(data: Value) -> Result<(Vec<(String, String)>, Option<String>)> {
    let data: LabelsData = shape(data)?;
    let labels = data
        .repository
        .map(|repository| repository.labels)
        .ok_or_else(|| Error::StoreInvalid("repository not found".to_string()))?;

    let page = labels
        .nodes
        .into_iter()
        .flatten()
        .map(|label| (label.name.to_ascii_lowercase(), label.id))
        .collect();
    let next = if labels.page_info.has_next_page {
        labels.page_info.end_cursor
    } else {
        None
    };
    Ok((page, next))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIssueData {
    create_issue: CreateIssuePayload,
}

#[derive(Debug, Deserialize)]
struct CreateIssuePayload {
    issue: CreatedIssueNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedIssueNode {
    id: String,
    number: u64,
    created_at: DateTime<Utc>,
    repository: RepositoryName,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddItemData {
    add_project_v2_item_by_id: AddItemPayload,
}

#[derive(Debug, Deserialize)]
struct AddItemPayload {
    item: IdOnly,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

// =============================================================================
// Store
// =============================================================================

/// Remote store talking to api.github.com (or a configured endpoint)
#[derive(Debug)]
pub struct GitHubStore {
    http: Client,
    token: String,
    remote: RemoteConfig,
    board: BoardConfig,
    canonical_labels: Vec<String>,
    policy: RetryPolicy,
    ids: OnceCell<ProjectIds>,
}

impl GitHubStore {
    /// Build a store from config, reading the token from the environment
    pub fn from_config(config: &Config) -> Result<Self> {
        config.remote.validate_for_connect()?;

        let token = [config.remote.token_env.as_str(), FALLBACK_TOKEN_ENV]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .ok_or_else(|| {
                Error::Auth(format!(
                    "no token found; set {} or {}",
                    config.remote.token_env, FALLBACK_TOKEN_ENV
                ))
            })?;

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| Error::Network(err.to_string()))?;

        Ok(Self {
            http,
            token,
            remote: config.remote.clone(),
            board: config.board.clone(),
            canonical_labels: LabelDiffer::new(&config.labels)
                .canonical_labels()
                .into_iter()
                .map(str::to_string)
                .collect(),
            policy: RetryPolicy::from_config(&config.remote),
            ids: OnceCell::new(),
        })
    }

    async fn graphql(&self, request: Request, query: &str, variables: Value) -> Result<Value> {
        let payload = json!({ "query": query, "variables": variables });
        let mut attempt = 0;

        loop {
            let outcome = match self
                .http
                .post(&self.remote.api_url)
                .header(AUTHORIZATION, format!("Bearer {}", self.token))
                .header(USER_AGENT, concat!("boardsync/", env!("CARGO_PKG_VERSION")))
                .header(ACCEPT, "application/json")
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let headers = response.headers().clone();
                    match response.text().await {
                        Ok(body) => interpret(
                            status,
                            &headers,
                            &body,
                            Utc::now().timestamp(),
                            attempt,
                            &self.policy,
                        ),
                        Err(err) => Outcome::Retry {
                            wait: backoff_delay(self.policy.base_ms, attempt),
                            error: Error::Network(err.to_string()),
                            refused: false,
                        },
                    }
                }
                Err(err) => Outcome::Retry {
                    wait: backoff_delay(self.policy.base_ms, attempt),
                    refused: err.is_connect(),
                    error: Error::Network(err.to_string()),
                },
            };

            match outcome {
                Outcome::Data(data) => return Ok(data),
                Outcome::Fail(err) => return Err(err),
                Outcome::Retry { error, refused, .. }
                    if !should_resend(request, refused, attempt, &self.policy) =>
                {
                    if !request.may_resend(refused) {
                        warn!(error = %error, "write may have been applied; not resending");
                    }
                    return Err(error);
                }
                Outcome::Retry { wait, error, .. } => {
                    attempt += 1;
                    warn!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %error,
                        "retrying GitHub request"
                    );
                    sleep(wait).await;
                }
            }
        }
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        shape(self.graphql(Request::Query, query, variables).await?)
    }

    async fn mutate(&self, mutation: &str, variables: Value) -> Result<Value> {
        self.graphql(Request::Mutation, mutation, variables).await
    }

    async fn mutate_as<T: DeserializeOwned>(&self, mutation: &str, variables: Value) -> Result<T> {
        shape(self.mutate(mutation, variables).await?)
    }

    async fn ids(&self) -> Result<&ProjectIds> {
        self.ids
            .get_or_try_init(|| async {
                let data = self
                    .graphql(
                        Request::Query,
                        IDS_QUERY,
                        json!({
                            "owner": self.remote.project_owner(),
                            "number": self.remote.project_number,
                            "repoOwner": self.remote.owner,
                            "repo": self.remote.repo,
                            "statusField": self.remote.status_field,
                        }),
                    )
                    .await?;
                let mut ids = parse_ids(data, &self.remote)?;

                let mut cursor: Option<String> = None;
                loop {
                    let data = self
                        .graphql(
                            Request::Query,
                            LABELS_QUERY,
                            json!({
                                "owner": self.remote.owner,
                                "repo": self.remote.repo,
                                "first": LABELS_PAGE,
                                "after": cursor,
                            }),
                        )
                        .await?;
                    let (labels, next) = parse_labels_page(data)?;
                    ids.labels.extend(labels);
                    match next {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }

                debug!(project = %ids.project_id, labels = ids.labels.len(), "resolved project ids");
                Ok::<_, Error>(ids)
            })
            .await
    }

    async fn set_status(
        &self,
        ids: &ProjectIds,
        item_id: &str,
        (field_id, option_id): (&str, &str),
    ) -> Result<()> {
        self.mutate(
            SET_STATUS,
            json!({
                "projectId": ids.project_id,
                "itemId": item_id,
                "fieldId": field_id,
                "optionId": option_id,
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteIssueStore for GitHubStore {
    async fn fetch_filtered(&self, filters: &[Filter]) -> Result<RemoteItems> {
        // Cursor paging: each page depends on the previous cursor.
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let data = self
                .graphql(
                    Request::Query,
                    ITEMS_QUERY,
                    json!({
                        "owner": self.remote.project_owner(),
                        "number": self.remote.project_number,
                        "first": self.remote.page_size,
                        "after": cursor,
                        "statusField": self.remote.status_field,
                        "labels": LABELS_PER_ISSUE,
                    }),
                )
                .await?;
            let (issues, next) = parse_items_page(data)?;
            pages += 1;
            collected.extend(
                issues
                    .into_iter()
                    .filter(|issue| remote::matches_any(filters, issue)),
            );

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(pages, items = collected.len(), "fetched project items");
        Ok(RemoteItems::from_pages(collected))
    }

    async fn create(&self, draft: &IssueDraft) -> Result<CreatedIssue> {
        let ids = self.ids().await?;
        let repository = self.remote.repository();
        let label_ids = ids.resolve_labels(&draft.labels, &self.canonical_labels, &repository)?;
        let status = draft
            .status
            .as_deref()
            .map(|status| ids.status_ids(status, &self.remote.status_field))
            .transpose()?;

        let created: CreateIssueData = self
            .mutate_as(
                CREATE_ISSUE,
                json!({
                    "repositoryId": ids.repository_id,
                    "title": draft.title,
                    "body": draft.body,
                    "labelIds": label_ids,
                }),
            )
            .await?;
        let issue = created.create_issue.issue;
        let repository = issue.repository.name_with_owner;
        debug!(repository = %repository, number = issue.number, "created issue");

        let partial = |step, err| remote::partial_create(&repository, issue.number, &issue.id, step, err);

        let added: AddItemData = self
            .mutate_as(
                ADD_TO_PROJECT,
                json!({ "projectId": ids.project_id, "contentId": issue.id }),
            )
            .await
            .map_err(|err| partial(CreateStep::AddToProject, err))?;
        let item_id = added.add_project_v2_item_by_id.item.id;

        if let Some(status) = status {
            self.set_status(ids, &item_id, status)
                .await
                .map_err(|err| partial(CreateStep::SetStatus, err))?;
        }

        Ok(CreatedIssue {
            remote: GitHubRef {
                repository: repository.clone(),
                issue_number: issue.number,
                issue_node_id: issue.id.clone(),
                project_item_id: item_id,
            },
            created_at: issue.created_at,
        })
    }

    async fn update(&self, target: &GitHubRef, update: &IssueUpdate) -> Result<DateTime<Utc>> {
        let ids = self.ids().await?;
        let plan = plan_update(
            ids,
            update,
            &self.canonical_labels,
            &target.repository,
            &self.remote.status_field,
        )?;

        if update.title.is_some() || update.body.is_some() {
            self.mutate(
                UPDATE_ISSUE,
                json!({
                    "id": target.issue_node_id,
                    "title": update.title,
                    "body": update.body,
                }),
            )
            .await?;
        }

        if !plan.add_label_ids.is_empty() {
            self.mutate(
                ADD_LABELS,
                json!({ "id": target.issue_node_id, "labelIds": plan.add_label_ids }),
            )
            .await?;
        }

        if !plan.remove_label_ids.is_empty() {
            self.mutate(
                REMOVE_LABELS,
                json!({ "id": target.issue_node_id, "labelIds": plan.remove_label_ids }),
            )
            .await?;
        }

        if let Some(status) = plan.status {
            self.set_status(ids, &target.project_item_id, status).await?;
        }

        let updated: ItemUpdated = self
            .query(ITEM_UPDATED, json!({ "id": target.project_item_id }))
            .await?;
        let node = updated
            .node
            .ok_or_else(|| Error::RemoteNotFound(target.display_ref()))?;
        let content_updated = node.content.and_then(|content| content.updated_at);
        Ok(content_updated.map_or(node.updated_at, |at| at.max(node.updated_at)))
    }

    async fn close(&self, target: &GitHubRef) -> Result<()> {
        self.mutate(CLOSE_ISSUE, json!({ "id": target.issue_node_id }))
            .await?;
        Ok(())
    }

    async fn validate(&self) -> Result<()> {
        let viewer = self
            .graphql(Request::Query, VIEWER_QUERY, json!({}))
            .await?;
        debug!(login = ?viewer.pointer("/viewer/login"), "authenticated");

        let ids = self.ids().await?;
        let mut problems = Vec::new();

        if ids.status_field_id.is_none() {
            problems.push(format!(
                "single-select field '{}' not found on project",
                self.remote.status_field
            ));
        } else {
            for column in &self.board.columns {
                if ids.status_option(&column.status).is_none() {
                    problems.push(format!(
                        "status option '{}' (column '{}') not found",
                        column.status, column.id
                    ));
                }
            }
        }

        for label in &self.canonical_labels {
            if ids.label_id(label).is_none() {
                problems.push(format!(
                    "label '{label}' not found in {}",
                    self.remote.repository()
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::StoreInvalid(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::collections::BTreeSet;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_ms: 500,
            max_rate_limit_wait: Duration::from_secs(60),
        }
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(500, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(500, 40), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn rate_limit_headers_set_wait() {
        let now = 1_700_000_000;
        let exhausted = headers(&[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset", "1700000030"),
        ]);
        assert_eq!(rate_limit_wait(403, &exhausted, now), Some(Duration::from_secs(30)));
        assert_eq!(
            rate_limit_wait(429, &headers(&[("retry-after", "7")]), now),
            Some(Duration::from_secs(7))
        );
        assert_eq!(rate_limit_wait(403, &headers(&[("x-ratelimit-remaining", "12")]), now), None);
        assert_eq!(rate_limit_wait(200, &exhausted, now), None);
    }

    #[test]
    fn long_rate_limit_fails_instead_of_waiting() {
        let outcome = interpret(
            403,
            &headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "4000")]),
            "",
            1000,
            0,
            &policy(),
        );
        assert!(matches!(outcome, Outcome::Fail(Error::Network(_))));
    }

    #[test]
    fn status_codes_are_classified() {
        let empty = HeaderMap::new();
        assert!(matches!(
            interpret(401, &empty, "", 0, 0, &policy()),
            Outcome::Fail(Error::Auth(_))
        ));
        assert!(matches!(
            interpret(502, &empty, "", 0, 1, &policy()),
            Outcome::Retry { wait, error: Error::Network(_), refused: false }
                if wait == Duration::from_millis(1000)
        ));
        assert!(matches!(
            interpret(422, &empty, "nope", 0, 0, &policy()),
            Outcome::Fail(Error::Remote(_))
        ));
    }

    #[test]
    fn graphql_errors_are_classified() {
        let empty = HeaderMap::new();
        let not_found = r#"{"data":null,"errors":[{"type":"NOT_FOUND","message":"Could not resolve"}]}"#;
        assert!(matches!(
            interpret(200, &empty, not_found, 0, 0, &policy()),
            Outcome::Fail(Error::RemoteNotFound(_))
        ));

        let limited = r#"{"errors":[{"type":"RATE_LIMITED","message":"slow down"}]}"#;
        assert!(matches!(
            interpret(200, &empty, limited, 0, 0, &policy()),
            Outcome::Retry { refused: true, .. }
        ));

        let ok = r#"{"data":{"viewer":{"login":"octocat"}}}"#;
        match interpret(200, &empty, ok, 0, 0, &policy()) {
            Outcome::Data(data) => assert_eq!(data["viewer"]["login"], "octocat"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn items_page_skips_non_issues_and_reads_cursor() {
        let data = json!({
            "repositoryOwner": { "projectV2": { "items": {
                "pageInfo": { "hasNextPage": true, "endCursor": "c2" },
                "nodes": [
                    {
                        "id": "PVTI_1",
                        "updatedAt": "2025-01-15T10:30:00Z",
                        "fieldValueByName": { "name": "In Progress" },
                        "content": {
                            "id": "I_1", "number": 42, "title": "Fix login", "body": "Broken",
                            "state": "OPEN",
                            "createdAt": "2025-01-10T09:00:00Z",
                            "updatedAt": "2025-01-15T10:00:00Z",
                            "repository": { "nameWithOwner": "owner/repo" },
                            "labels": { "nodes": [ { "name": "bug" } ] }
                        }
                    },
                    { "id": "PVTI_2", "updatedAt": "2025-01-15T10:00:00Z", "fieldValueByName": null, "content": {} }
                ]
            }}}
        });

        let (issues, next) = parse_items_page(data).unwrap();
        assert_eq!(next.as_deref(), Some("c2"));
        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.remote.file_name("fix-login"), "owner-repo#42-fix-login.md");
        assert_eq!(issue.status.as_deref(), Some("In Progress"));
        assert_eq!(issue.labels, vec!["bug".to_string()]);
        assert_eq!(issue.updated.to_rfc3339(), "2025-01-15T10:30:00+00:00");
        assert!(!issue.closed);
    }

    #[test]
    fn missing_project_is_store_invalid() {
        let remote = RemoteConfig {
            owner: "owner".to_string(),
            repo: "repo".to_string(),
            project_number: 3,
            ..RemoteConfig::default()
        };
        let err = parse_ids(json!({ "repositoryOwner": null, "repository": null }), &remote).unwrap_err();
        assert!(matches!(err, Error::StoreInvalid(_)));

        let ids = parse_ids(
            json!({
                "repositoryOwner": { "projectV2": {
                    "id": "PVT_1",
                    "field": { "id": "F_1", "options": [ { "id": "o1", "name": "Todo" } ] }
                }},
                "repository": { "id": "R_1" }
            }),
            &remote,
        )
        .unwrap();
        assert_eq!(ids.status_option("todo"), Some("o1"));
        assert_eq!(ids.repository_id, "R_1");
        assert!(ids.labels.is_empty());
    }

    fn resolved_ids() -> ProjectIds {
        ProjectIds {
            project_id: "PVT_1".to_string(),
            status_field_id: Some("F_1".to_string()),
            status_options: vec![
                ("Todo".to_string(), "o1".to_string()),
                ("Done".to_string(), "o2".to_string()),
            ],
            repository_id: "R_1".to_string(),
            labels: [("bug", "L_1"), ("p1", "L_2"), ("p2", "L_3"), ("backend", "L_4")]
                .into_iter()
                .map(|(name, id)| (name.to_string(), id.to_string()))
                .collect(),
        }
    }

    fn canonical() -> Vec<String> {
        ["bug", "feature", "P1", "P2", "P3"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn failed_writes_are_not_resent() {
        let empty = HeaderMap::new();
        let Outcome::Retry { refused, .. } = interpret(502, &empty, "", 0, 0, &policy()) else {
            panic!("502 should be transient");
        };
        assert!(!should_resend(Request::Mutation, refused, 0, &policy()));
        assert!(should_resend(Request::Query, refused, 0, &policy()));
        assert!(!should_resend(Request::Query, refused, 3, &policy()));
    }

    #[test]
    fn rate_limited_writes_are_resent() {
        let limited = headers(&[("retry-after", "2")]);
        let Outcome::Retry { wait, refused, .. } = interpret(429, &limited, "", 0, 0, &policy())
        else {
            panic!("429 should be transient");
        };
        assert_eq!(wait, Duration::from_secs(2));
        assert!(should_resend(Request::Mutation, refused, 0, &policy()));
        assert!(!should_resend(Request::Mutation, refused, 3, &policy()));
    }

    #[test]
    fn labels_page_reads_cursor() {
        let data = json!({ "repository": { "labels": {
            "pageInfo": { "hasNextPage": true, "endCursor": "l2" },
            "nodes": [ { "id": "L_1", "name": "Bug" }, null, { "id": "L_9", "name": "needs-triage" } ]
        }}});
        let (labels, next) = parse_labels_page(data).unwrap();
        assert_eq!(next.as_deref(), Some("l2"));
        assert_eq!(
            labels,
            vec![
                ("bug".to_string(), "L_1".to_string()),
                ("needs-triage".to_string(), "L_9".to_string()),
            ]
        );

        let last = json!({ "repository": { "labels": {
            "pageInfo": { "hasNextPage": false, "endCursor": "l3" },
            "nodes": []
        }}});
        assert_eq!(parse_labels_page(last).unwrap().1, None);
        assert!(matches!(
            parse_labels_page(json!({ "repository": null })),
            Err(Error::StoreInvalid(_))
        ));
    }

    #[test]
    fn missing_tags_are_skipped_but_canonical_labels_are_required() {
        let ids = resolved_ids();
        let resolved = ids
            .resolve_labels(&names(&["Bug", "backend", "someday"]), &canonical(), "owner/repo")
            .unwrap();
        assert_eq!(resolved, vec!["L_1", "L_4"]);

        let err = ids
            .resolve_labels(&names(&["feature", "backend"]), &canonical(), "owner/repo")
            .unwrap_err();
        assert!(matches!(err, Error::Remote(message) if message.contains("'feature'")));
    }

    #[test]
    fn update_plan_resolves_every_id_up_front() {
        let ids = resolved_ids();
        let update = IssueUpdate {
            title: Some("Fix login".to_string()),
            labels_add: names(&["p1", "someday"]),
            labels_remove: names(&["p2", "gone"]),
            status: Some("done".to_string()),
            ..IssueUpdate::default()
        };
        let plan = plan_update(&ids, &update, &canonical(), "owner/repo", "Status").unwrap();
        assert_eq!(
            plan,
            UpdatePlan {
                add_label_ids: vec!["L_2"],
                remove_label_ids: vec!["L_3"],
                status: Some(("F_1", "o2")),
            }
        );

        let unknown_status = IssueUpdate {
            title: Some("Fix login".to_string()),
            status: Some("Blocked".to_string()),
            ..IssueUpdate::default()
        };
        assert!(matches!(
            plan_update(&ids, &unknown_status, &canonical(), "owner/repo", "Status"),
            Err(Error::Remote(_))
        ));

        let missing_label = IssueUpdate {
            title: Some("Fix login".to_string()),
            labels_add: names(&["P3"]),
            ..IssueUpdate::default()
        };
        assert!(plan_update(&ids, &missing_label, &canonical(), "owner/repo", "Status").is_err());

        let no_field = ProjectIds {
            status_field_id: None,
            ..resolved_ids()
        };
        assert!(matches!(
            plan_update(&no_field, &update, &canonical(), "owner/repo", "Status"),
            Err(Error::StoreInvalid(_))
        ));
    }
}
