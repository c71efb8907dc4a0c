//! Schools and their writes.

use serde::{Deserialize, Serialize};

use super::Pagination;
use crate::{Timestamp, ValidationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct School {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolDetail {
    #[serde(flatten)]
    pub school: School,
    #[serde(rename = "userCount", default)]
    pub user_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolList {
    pub schools: Vec<School>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchoolFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// Body for creating or updating a school.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolFields {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
}

impl SchoolFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::required("name"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_name_is_rejected() {
        assert_eq!(
            SchoolFields::named("   ").validate(),
            Err(ValidationError::required("name"))
        );
        assert!(SchoolFields::named("SMA 1 Bandung").validate().is_ok());
    }

    #[test]
    fn test_detail_flattens_school() {
        let detail: SchoolDetail = serde_json::from_value(serde_json::json!({
            "id": 3,
            "name": "SMA 3",
            "city": "Bandung",
            "created_at": "2025-01-02T03:04:05Z",
            "userCount": 12
        }))
        .unwrap();
        assert_eq!(detail.school.id, 3);
        assert_eq!(detail.user_count, Some(12));
    }
}
