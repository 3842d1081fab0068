//! GitHub payload entities.
//!
//! Only the fields used for routing and by typical transforms are modelled;
//! unknown fields are ignored so that new GitHub payload additions never break
//! parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    field_path, flexible_timestamp, flexible_timestamp_option, CommitHash, EmailAddress, GitUrl,
    HttpsUrl, Validate, Violations,
};

/// Account type of a GitHub user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserType {
    Bot,
    Organization,
    User,
}

/// Relationship of a pull request author to the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorAssociation {
    Collaborator,
    Contributor,
    FirstTimer,
    FirstTimeContributor,
    Mannequin,
    Member,
    None,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoVisibility {
    Private,
    Public,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
}

/// Owner of a configured webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookType {
    Repository,
    Organization,
    App,
}

/// A GitHub account (user, bot or organization)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub id: u64,
    pub node_id: String,
    pub avatar_url: HttpsUrl,
    pub html_url: HttpsUrl,
    pub url: HttpsUrl,
    #[serde(rename = "type")]
    pub user_type: UserType,
    #[serde(default)]
    pub site_admin: bool,
}

impl Validate for User {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.avatar_url
            .validate(&field_path(path, "avatar_url"), violations);
        self.html_url.validate(&field_path(path, "html_url"), violations);
        self.url.validate(&field_path(path, "url"), violations);
    }
}

/// Organization that owns the repository the event concerns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub login: String,
    pub id: u64,
    pub node_id: String,
    pub url: HttpsUrl,
    #[serde(default)]
    pub description: Option<String>,
}

impl Validate for Organization {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.url.validate(&field_path(path, "url"), violations);
    }
}

/// A GitHub repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub node_id: String,
    pub name: String,
    pub full_name: String,
    pub private: bool,
    pub owner: User,
    pub html_url: HttpsUrl,
    pub url: HttpsUrl,
    pub clone_url: HttpsUrl,
    pub git_url: GitUrl,
    pub ssh_url: String,
    pub default_branch: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub visibility: Option<RepoVisibility>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "flexible_timestamp_option")]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(with = "flexible_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Validate for Repository {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.owner.validate(&field_path(path, "owner"), violations);
        self.html_url.validate(&field_path(path, "html_url"), violations);
        self.url.validate(&field_path(path, "url"), violations);
        self.clone_url
            .validate(&field_path(path, "clone_url"), violations);
        self.git_url.validate(&field_path(path, "git_url"), violations);
    }
}

/// Head or base side of a pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRef {
    pub label: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: CommitHash,
    pub user: User,
    pub repo: Repository,
}

impl Validate for BaseRef {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.sha.validate(&field_path(path, "sha"), violations);
        self.user.validate(&field_path(path, "user"), violations);
        self.repo.validate(&field_path(path, "repo"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: u64,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub description: Option<String>,
    pub url: HttpsUrl,
}

impl Validate for Label {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.url.validate(&field_path(path, "url"), violations);
    }
}

/// A GitHub pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub node_id: String,
    pub number: u64,
    pub state: PullRequestState,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    pub locked: bool,
    pub user: User,
    pub html_url: HttpsUrl,
    pub url: HttpsUrl,
    pub head: BaseRef,
    pub base: BaseRef,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub requested_reviewers: Vec<User>,
    pub author_association: AuthorAssociation,
    #[serde(default)]
    pub merged: Option<bool>,
    #[serde(default)]
    pub merge_commit_sha: Option<CommitHash>,
    #[serde(default)]
    pub merged_by: Option<User>,
    #[serde(with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "flexible_timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "flexible_timestamp_option")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_timestamp_option")]
    pub merged_at: Option<DateTime<Utc>>,
}

impl Validate for PullRequest {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.user.validate(&field_path(path, "user"), violations);
        self.html_url.validate(&field_path(path, "html_url"), violations);
        self.url.validate(&field_path(path, "url"), violations);
        self.head.validate(&field_path(path, "head"), violations);
        self.base.validate(&field_path(path, "base"), violations);
        self.labels.validate(&field_path(path, "labels"), violations);
        self.requested_reviewers
            .validate(&field_path(path, "requested_reviewers"), violations);
        self.merge_commit_sha
            .validate(&field_path(path, "merge_commit_sha"), violations);
        self.merged_by
            .validate(&field_path(path, "merged_by"), violations);
    }
}

/// Author or committer identity attached to a pushed commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitUser {
    pub name: String,
    pub email: EmailAddress,
    #[serde(default)]
    pub username: Option<String>,
}

impl Validate for CommitUser {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.email.validate(&field_path(path, "email"), violations);
    }
}

/// A commit included in a push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitHash,
    pub tree_id: CommitHash,
    pub distinct: bool,
    pub message: String,
    #[serde(with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub url: HttpsUrl,
    pub author: CommitUser,
    pub committer: CommitUser,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
}

impl Validate for Commit {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.id.validate(&field_path(path, "id"), violations);
        self.tree_id.validate(&field_path(path, "tree_id"), violations);
        self.url.validate(&field_path(path, "url"), violations);
        self.author.validate(&field_path(path, "author"), violations);
        self.committer
            .validate(&field_path(path, "committer"), violations);
    }
}

/// The `pusher` block of a push event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pusher {
    pub name: String,
    #[serde(default)]
    pub email: Option<EmailAddress>,
}

impl Validate for Pusher {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.email.validate(&field_path(path, "email"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookLastResponse {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The webhook definition delivered with a ping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    #[serde(rename = "type")]
    pub hook_type: HookType,
    pub id: u64,
    pub name: String,
    pub active: bool,
    pub events: Vec<String>,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    pub url: HttpsUrl,
    #[serde(default)]
    pub last_response: Option<HookLastResponse>,
    #[serde(with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "flexible_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Name GitHub gives every repository and organization webhook
pub const WEB_HOOK_NAME: &str = "web";

pub(crate) fn hook_name_violation(name: &str) -> Option<String> {
    (name != WEB_HOOK_NAME).then(|| format!("expected '{}', found '{}'", WEB_HOOK_NAME, name))
}

impl Validate for Hook {
    fn validate(&self, path: &str, violations: &mut Violations) {
        if let Some(message) = hook_name_violation(&self.name) {
            violations.push(field_path(path, "name"), message);
        }
        self.url.validate(&field_path(path, "url"), violations);
    }
}
