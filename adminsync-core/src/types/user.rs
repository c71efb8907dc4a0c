//! Users, their token balances, and the user-facing filters and writes.

use serde::{Deserialize, Serialize};

use super::{Pagination, School, SortOrder};
use crate::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    User,
    Admin,
    Superadmin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Email,
    Google,
    Firebase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FederationStatus {
    Pending,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub school_id: Option<i64>,
    #[serde(default)]
    pub school: Option<School>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub user_type: UserType,
    pub is_active: bool,
    pub auth_provider: AuthProvider,
    #[serde(default)]
    pub token_balance: i64,
    #[serde(default)]
    pub firebase_uid: Option<String>,
    #[serde(default)]
    pub federation_status: Option<FederationStatus>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub last_login: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<User>,
    pub pagination: Pagination,
}

/// Activity counters shown next to a user's detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStatistics {
    #[serde(default)]
    pub jobs: Vec<serde_json::Value>,
    #[serde(default)]
    pub conversations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDetail {
    pub user: User,
    #[serde(default)]
    pub statistics: UserStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenActivity {
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(rename = "newBalance")]
    pub new_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTransaction {
    pub id: String,
    pub activity_type: String,
    pub activity_data: TokenActivity,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenHistory {
    #[serde(rename = "currentBalance")]
    pub current_balance: i64,
    #[serde(default)]
    pub history: Vec<TokenTransaction>,
}

/// Filters for the users list. Absent fields are omitted from both the query
/// string and the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_provider: Option<AuthProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
}

impl UserFilters {
    pub fn page(page: u32) -> Self {
        Self {
            page: Some(page),
            ..Self::default()
        }
    }
}

/// Fields an admin may change on a user. Only present fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub federation_status: Option<FederationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileUpdate>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.is_active.is_none()
            && self.user_type.is_none()
            && self.federation_status.is_none()
            && self.profile.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAdjustment {
    pub amount: i64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_decodes_optional_fields() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "username": "ayu",
            "email": "ayu@example.com",
            "user_type": "admin",
            "is_active": true,
            "auth_provider": "firebase",
            "token_balance": 120,
            "created_at": "2025-01-02T03:04:05Z",
            "updated_at": "2025-01-02T03:04:05Z",
            "profile": { "full_name": "Ayu", "school_id": 7 }
        }))
        .unwrap();

        assert_eq!(user.user_type, UserType::Admin);
        assert_eq!(user.auth_provider, AuthProvider::Firebase);
        assert_eq!(user.profile.and_then(|p| p.school_id), Some(7));
        assert!(user.last_login.is_none());
    }

    #[test]
    fn test_empty_filters_serialize_to_empty_object() {
        let json = serde_json::to_value(UserFilters::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn test_token_history_field_names() {
        let history: TokenHistory = serde_json::from_value(serde_json::json!({
            "currentBalance": 50,
            "history": [{
                "id": "t1",
                "activity_type": "token_adjustment",
                "activity_data": { "amount": -10, "reason": "refund", "newBalance": 50 },
                "created_at": "2025-01-02T03:04:05Z"
            }]
        }))
        .unwrap();
        assert_eq!(history.current_balance, 50);
        assert_eq!(history.history[0].activity_data.new_balance, 50);
    }

    #[test]
    fn test_user_update_skips_absent_fields() {
        let update = UserUpdate {
            is_active: Some(false),
            ..UserUpdate::default()
        };
        assert!(!update.is_empty());
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({ "is_active": false })
        );
    }
}
