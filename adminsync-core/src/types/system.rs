//! System metrics and the combined dashboard summary.

use serde::{Deserialize, Deserializer, Serialize};

use super::{ChatbotStats, JobStats};

/// Postgres aggregate counts arrive as strings; older deployments send
/// numbers. Accept both.
fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetrics {
    #[serde(deserialize_with = "count")]
    pub total_users: u64,
    #[serde(deserialize_with = "count")]
    pub new_users_today: u64,
    #[serde(deserialize_with = "count")]
    pub active_today: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMetrics {
    #[serde(deserialize_with = "count")]
    pub total_tokens_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub users: UserMetrics,
    pub chat: ChatMetrics,
    /// Sections the dashboard does not interpret (database, queue, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Headline numbers for the dashboard landing page, derived from the job
/// stats, system metrics and chatbot stats queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub jobs_total: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub job_success_rate: f64,
    pub total_users: u64,
    pub new_users_today: u64,
    pub active_users_today: u64,
    pub total_conversations: u64,
    pub total_messages: u64,
    pub avg_response_time_ms: f64,
    pub total_tokens_used: u64,
}

impl DashboardSummary {
    pub fn combine(jobs: &JobStats, system: &SystemMetrics, chatbot: &ChatbotStats) -> Self {
        let overview = &jobs.overview;
        Self {
            jobs_total: overview.total,
            jobs_completed: overview.completed,
            jobs_failed: overview.failed,
            job_success_rate: overview.success_rate,
            total_users: system.users.total_users,
            new_users_today: system.users.new_users_today,
            active_users_today: system.users.active_today,
            total_conversations: chatbot.overview.total_conversations,
            total_messages: chatbot.overview.total_messages,
            avg_response_time_ms: chatbot.performance.avg_response_time_ms,
            total_tokens_used: system.chat.total_tokens_used,
        }
    }
}
