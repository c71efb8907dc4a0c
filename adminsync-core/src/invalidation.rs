//! Invalidation rule table.
//!
//! Every write the dashboard can perform, and every push event that reports a
//! server-side write, is described by a [`Change`]. The rule table maps the
//! change's [`ChangeKind`] to the cache key prefixes it makes stale. The
//! mutation dispatcher and the realtime default listener both go through
//! [`Change::prefixes`], so user-driven and push-driven invalidation share one
//! source of truth.
//!
//! [`rule`] is an exhaustive `match`: a new `ChangeKind` without a rule does
//! not compile.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::key::QueryKey;
use crate::resources;

/// Kind of state change that requires cache invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    UserUpdated,
    TokenBalanceUpdated,
    SchoolCreated,
    SchoolUpdated,
    SchoolDeleted,
    JobUpdated,
    JobStatsUpdated,
    AlertRaised,
    AlertUpdated,
    SessionEnded,
}

// Listing every variant here makes a new one fail to compile until it is
// added to this arm and to `ChangeKind::ALL` beside it.
const _: () = match ChangeKind::SessionEnded {
    ChangeKind::UserUpdated
    | ChangeKind::TokenBalanceUpdated
    | ChangeKind::SchoolCreated
    | ChangeKind::SchoolUpdated
    | ChangeKind::SchoolDeleted
    | ChangeKind::JobUpdated
    | ChangeKind::JobStatsUpdated
    | ChangeKind::AlertRaised
    | ChangeKind::AlertUpdated
    | ChangeKind::SessionEnded => (),
};

impl ChangeKind {
    pub const ALL: [ChangeKind; 10] = [
        ChangeKind::UserUpdated,
        ChangeKind::TokenBalanceUpdated,
        ChangeKind::SchoolCreated,
        ChangeKind::SchoolUpdated,
        ChangeKind::SchoolDeleted,
        ChangeKind::JobUpdated,
        ChangeKind::JobStatsUpdated,
        ChangeKind::AlertRaised,
        ChangeKind::AlertUpdated,
        ChangeKind::SessionEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::UserUpdated => "user_updated",
            ChangeKind::TokenBalanceUpdated => "token_balance_updated",
            ChangeKind::SchoolCreated => "school_created",
            ChangeKind::SchoolUpdated => "school_updated",
            ChangeKind::SchoolDeleted => "school_deleted",
            ChangeKind::JobUpdated => "job_updated",
            ChangeKind::JobStatsUpdated => "job_stats_updated",
            ChangeKind::AlertRaised => "alert_raised",
            ChangeKind::AlertUpdated => "alert_updated",
            ChangeKind::SessionEnded => "session_ended",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a rule: which keys a change evicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTarget {
    /// Every key of the resource, whatever its identifiers or filters.
    Resource(&'static str),
    /// The resource keyed by the change's subject id. Skipped when the change
    /// carries no subject.
    Subject(&'static str),
    /// One fixed sub-key of a resource, e.g. a single dashboard panel.
    Nested(&'static str, &'static str),
    /// Every key in the cache.
    Everything,
}

/// The static rule for a change kind.
pub fn rule(kind: ChangeKind) -> &'static [KeyTarget] {
    use KeyTarget::*;

    match kind {
        ChangeKind::UserUpdated => &[Subject(resources::USER), Resource(resources::USERS)],
        ChangeKind::TokenBalanceUpdated => &[
            Subject(resources::TOKENS),
            Subject(resources::USER),
            Resource(resources::USERS),
        ],
        ChangeKind::SchoolCreated => &[Resource(resources::SCHOOLS)],
        ChangeKind::SchoolUpdated => &[Subject(resources::SCHOOL), Resource(resources::SCHOOLS)],
        // Users are filterable by school, so their lists go too.
        ChangeKind::SchoolDeleted => &[
            Subject(resources::SCHOOL),
            Resource(resources::SCHOOLS),
            Resource(resources::USERS),
        ],
        ChangeKind::JobUpdated => &[
            Resource(resources::JOBS),
            Subject(resources::JOB_DETAIL),
            Resource(resources::USER_JOBS),
            Resource(resources::JOB_STATS),
            Nested(resources::DASHBOARD, resources::JOB_TREND),
            Nested(resources::DASHBOARD, resources::RECENT_JOBS),
        ],
        ChangeKind::JobStatsUpdated => &[
            Resource(resources::JOB_STATS),
            Nested(resources::DASHBOARD, resources::JOB_TREND),
            Nested(resources::DASHBOARD, resources::RECENT_JOBS),
        ],
        ChangeKind::AlertRaised | ChangeKind::AlertUpdated => &[Resource(resources::ALERTS)],
        ChangeKind::SessionEnded => &[Everything],
    }
}

/// A concrete change: a kind plus the identity of the entity it touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub subject: Option<String>,
}

impl Change {
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            kind,
            subject: None,
        }
    }

    pub fn for_subject(kind: ChangeKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: Some(subject.into()),
        }
    }

    /// Key prefixes this change evicts, in rule order.
    pub fn prefixes(&self) -> Vec<QueryKey> {
        let mut prefixes = Vec::new();
        for target in rule(self.kind) {
            match target {
                KeyTarget::Resource(resource) => prefixes.push(QueryKey::new(*resource)),
                KeyTarget::Subject(resource) => match self.subject.as_deref() {
                    Some(subject) if !subject.is_empty() => {
                        prefixes.push(QueryKey::new(*resource).segment(subject))
                    }
                    _ => tracing::debug!(
                        change = %self.kind,
                        resource = *resource,
                        "Change has no subject; skipping subject-scoped prefix"
                    ),
                },
                KeyTarget::Nested(resource, segment) => {
                    prefixes.push(QueryKey::new(*resource).segment(*segment))
                }
                KeyTarget::Everything => prefixes.push(QueryKey::root()),
            }
        }
        prefixes
    }
}
