//! Typed writes and their cache invalidation.
//!
//! A [`Mutation`] describes one write: where it goes, what it sends and which
//! [`Change`] it makes. The [`MutationDispatcher`] validates, sends, and on
//! success evicts the change's prefixes before handing back the response.
//! Writes are never retried or deduplicated.

use adminsync_cache::QueryCache;
use adminsync_core::types::{School, SchoolFields, TokenAdjustment, User, UserUpdate};
use adminsync_core::{Change, ChangeKind, SyncResult, ValidationError};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::resource::{api_path, Method, ResourceClient};

pub trait Mutation: Send + Sync {
    type Output: DeserializeOwned + Send;
    type Body: Serialize + Send + Sync;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn method(&self) -> Method;

    /// Request path, ids percent-encoded.
    fn path(&self) -> SyncResult<String>;

    fn body(&self) -> Option<&Self::Body>;

    /// What the write changes, once it succeeds.
    fn change(&self) -> Change;

    /// Checked before any request is made.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MutationDispatcher {
    client: ResourceClient,
    cache: QueryCache,
}

impl MutationDispatcher {
    pub fn new(client: ResourceClient, cache: QueryCache) -> Self {
        Self { client, cache }
    }

    pub async fn mutate<M: Mutation>(&self, mutation: &M) -> SyncResult<M::Output> {
        if let Err(err) = mutation.validate() {
            tracing::debug!(mutation = mutation.name(), error = %err, "Mutation rejected before sending");
            return Err(err.into());
        }

        let path = mutation.path()?;
        let output = self
            .client
            .request::<M::Output, (), M::Body>(mutation.method(), &path, None, mutation.body())
            .await?;

        let change = mutation.change();
        let evicted = self.cache.apply_change(&change);
        tracing::info!(
            mutation = mutation.name(),
            path = %path,
            change = %change.kind,
            evicted,
            "Mutation applied"
        );
        Ok(output)
    }
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateUser {
    pub id: String,
    pub fields: UserUpdate,
}

impl UpdateUser {
    pub fn new(id: impl Into<String>, fields: UserUpdate) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

impl Mutation for UpdateUser {
    type Output = User;
    type Body = UserUpdate;

    fn name(&self) -> &'static str {
        "update_user"
    }

    fn method(&self) -> Method {
        Method::PUT
    }

    fn path(&self) -> SyncResult<String> {
        api_path(&["admin", "users", &self.id])
    }

    fn body(&self) -> Option<&UserUpdate> {
        Some(&self.fields)
    }

    fn change(&self) -> Change {
        Change::for_subject(ChangeKind::UserUpdated, self.id.clone())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::required("userId"));
        }
        if self.fields.is_empty() {
            return Err(ValidationError::invalid("fields", "no changes to apply"));
        }
        if matches!(&self.fields.username, Some(name) if name.trim().is_empty()) {
            return Err(ValidationError::required("username"));
        }
        Ok(())
    }
}

/// Credit (positive amount) or debit (negative amount) a user's tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTokenBalance {
    pub user_id: String,
    pub adjustment: TokenAdjustment,
}

impl UpdateTokenBalance {
    pub fn new(user_id: impl Into<String>, amount: i64, reason: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            adjustment: TokenAdjustment {
                amount,
                reason: reason.into(),
            },
        }
    }
}

impl Mutation for UpdateTokenBalance {
    type Output = serde_json::Value;
    type Body = TokenAdjustment;

    fn name(&self) -> &'static str {
        "update_token_balance"
    }

    fn method(&self) -> Method {
        Method::PUT
    }

    fn path(&self) -> SyncResult<String> {
        api_path(&["admin", "users", &self.user_id, "tokens"])
    }

    fn body(&self) -> Option<&TokenAdjustment> {
        Some(&self.adjustment)
    }

    fn change(&self) -> Change {
        Change::for_subject(ChangeKind::TokenBalanceUpdated, self.user_id.clone())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::required("userId"));
        }
        if self.adjustment.amount == 0 {
            return Err(ValidationError::invalid("amount", "must not be zero"));
        }
        if self.adjustment.reason.trim().is_empty() {
            return Err(ValidationError::required("reason"));
        }
        Ok(())
    }
}

// ============================================================================
// SCHOOLS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSchool {
    pub fields: SchoolFields,
}

impl CreateSchool {
    pub fn new(fields: SchoolFields) -> Self {
        Self { fields }
    }
}

impl Mutation for CreateSchool {
    type Output = School;
    type Body = SchoolFields;

    fn name(&self) -> &'static str {
        "create_school"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    fn path(&self) -> SyncResult<String> {
        Ok("/admin/schools".to_string())
    }

    fn body(&self) -> Option<&SchoolFields> {
        Some(&self.fields)
    }

    fn change(&self) -> Change {
        Change::new(ChangeKind::SchoolCreated)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.fields.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSchool {
    pub id: i64,
    pub fields: SchoolFields,
}

impl UpdateSchool {
    pub fn new(id: i64, fields: SchoolFields) -> Self {
        Self { id, fields }
    }
}

impl Mutation for UpdateSchool {
    type Output = School;
    type Body = SchoolFields;

    fn name(&self) -> &'static str {
        "update_school"
    }

    fn method(&self) -> Method {
        Method::PUT
    }

    fn path(&self) -> SyncResult<String> {
        api_path(&["admin", "schools", &self.id.to_string()])
    }

    fn body(&self) -> Option<&SchoolFields> {
        Some(&self.fields)
    }

    fn change(&self) -> Change {
        Change::for_subject(ChangeKind::SchoolUpdated, self.id.to_string())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_school_id(self.id)?;
        self.fields.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteSchool {
    pub id: i64,
}

impl DeleteSchool {
    pub fn new(id: i64) -> Self {
        Self { id }
    }
}

impl Mutation for DeleteSchool {
    type Output = ();
    type Body = ();

    fn name(&self) -> &'static str {
        "delete_school"
    }

    fn method(&self) -> Method {
        Method::DELETE
    }

    fn path(&self) -> SyncResult<String> {
        api_path(&["admin", "schools", &self.id.to_string()])
    }

    fn body(&self) -> Option<&()> {
        None
    }

    fn change(&self) -> Change {
        Change::for_subject(ChangeKind::SchoolDeleted, self.id.to_string())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_school_id(self.id)
    }
}

fn validate_school_id(id: i64) -> Result<(), ValidationError> {
    if id <= 0 {
        return Err(ValidationError::invalid("schoolId", "must be positive"));
    }
    Ok(())
}
