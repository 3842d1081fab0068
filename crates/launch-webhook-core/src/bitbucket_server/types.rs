//! Bitbucket Server payload entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{field_path, CommitHash, EmailAddress, HttpsUrl, SshUrl, Validate, Violations};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    Normal,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectType {
    Normal,
    Personal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefType {
    Branch,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Add,
    Delete,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestState {
    Open,
    Merged,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryState {
    Available,
    Deleted,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Author,
    Reviewer,
    Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Approved,
    NeedsWork,
    Unapproved,
}

// ============================================================================
// Links
// ============================================================================

/// A clone link; `http` links must be https, `ssh` links must be ssh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum CloneLink {
    Http { href: HttpsUrl },
    Ssh { href: SshUrl },
}

impl Validate for CloneLink {
    fn validate(&self, path: &str, violations: &mut Violations) {
        let href = field_path(path, "href");
        match self {
            Self::Http { href: url } => url.validate(&href, violations),
            Self::Ssh { href: url } => url.validate(&href, violations),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BareLink {
    pub href: HttpsUrl,
}

impl Validate for BareLink {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.href.validate(&field_path(path, "href"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub clone: Option<Vec<CloneLink>>,
    #[serde(rename = "self")]
    pub self_links: Vec<BareLink>,
}

impl Validate for Links {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.clone.validate(&field_path(path, "clone"), violations);
        self.self_links
            .validate(&field_path(path, "self"), violations);
    }
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub key: String,
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub links: Links,
}

impl Validate for Project {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.links.validate(&field_path(path, "links"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefInfo {
    pub id: String,
    pub display_id: String,
    #[serde(rename = "type")]
    pub ref_type: RefType,
}

/// A ref update within a push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(rename = "ref")]
    pub ref_info: RefInfo,
    pub ref_id: String,
    pub from_hash: CommitHash,
    pub to_hash: CommitHash,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
}

impl Validate for Change {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.from_hash
            .validate(&field_path(path, "fromHash"), violations);
        self.to_hash.validate(&field_path(path, "toHash"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub slug: String,
    pub id: u64,
    pub name: String,
    pub hierarchy_id: String,
    pub scm_id: String,
    pub state: RepositoryState,
    pub status_message: String,
    pub forkable: bool,
    pub project: Project,
    pub public: bool,
    pub links: Links,
}

impl Validate for Repository {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.project.validate(&field_path(path, "project"), violations);
        self.links.validate(&field_path(path, "links"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub name: String,
    pub email_address: EmailAddress,
    pub active: bool,
    pub display_name: String,
    pub id: u64,
    pub slug: String,
    #[serde(rename = "type")]
    pub user_type: UserType,
    pub links: Links,
}

impl Validate for User {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.email_address
            .validate(&field_path(path, "emailAddress"), violations);
        self.links.validate(&field_path(path, "links"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user: User,
    pub role: ParticipantRole,
    pub approved: bool,
    pub status: ApprovalStatus,
}

impl Validate for Participant {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.user.validate(&field_path(path, "user"), violations);
    }
}

/// Source or target ref of a pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    pub id: String,
    pub display_id: String,
    pub latest_commit: CommitHash,
    #[serde(rename = "type")]
    pub ref_type: RefType,
    pub repository: Repository,
}

impl Validate for Ref {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.latest_commit
            .validate(&field_path(path, "latestCommit"), violations);
        self.repository
            .validate(&field_path(path, "repository"), violations);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: u64,
    pub version: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: PullRequestState,
    pub open: bool,
    pub closed: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_date: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_date: DateTime<Utc>,
    pub from_ref: Ref,
    pub to_ref: Ref,
    pub locked: bool,
    pub author: Participant,
    pub reviewers: Vec<Participant>,
    pub participants: Vec<Participant>,
    pub links: Links,
}

impl Validate for PullRequest {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.from_ref.validate(&field_path(path, "fromRef"), violations);
        self.to_ref.validate(&field_path(path, "toRef"), violations);
        self.author.validate(&field_path(path, "author"), violations);
        self.reviewers
            .validate(&field_path(path, "reviewers"), violations);
        self.participants
            .validate(&field_path(path, "participants"), violations);
        self.links.validate(&field_path(path, "links"), violations);
    }
}
