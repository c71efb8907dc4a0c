//! Wire types for the admin REST API.
//!
//! Field names follow the API: snake_case for row fields, camelCase where the
//! server aggregates (stats, pagination).

mod auth;
mod chatbot;
mod envelope;
mod job;
mod school;
mod system;
mod trend;
mod user;

pub use auth::{AuthUser, LoginCredentials, LoginResponse};
pub use chatbot::{
    ChatMessage, ChatOverview, ChatPage, ChatPerformance, ChatToday, ChatTokenUsage, ChatbotStats,
    ContextType, Conversation, ConversationFilters, ConversationList, ConversationStatus,
    ModelStats, ModelSummary, ModelUsage, SenderType, TokenUsage,
};
pub use envelope::{ApiEnvelope, ApiErrorBody, Pagination, SortOrder};
pub use job::{
    Job, JobFilters, JobList, JobRef, JobResult, JobResults, JobStats, JobStatsOverview,
    JobStatus, PageParams, UserSummary,
};
pub use school::{School, SchoolDetail, SchoolFields, SchoolFilters, SchoolList};
pub use system::{ChatMetrics, DashboardSummary, SystemMetrics, UserMetrics};
pub use trend::{
    trend_window, JobTrendPoint, RecentJob, UserGrowthPoint, TREND_DAYS, TREND_FETCH_LIMIT,
};
pub use user::{
    AuthProvider, FederationStatus, ProfileUpdate, TokenActivity, TokenAdjustment, TokenHistory,
    TokenTransaction, User, UserDetail, UserFilters, UserList, UserProfile, UserStatistics,
    UserType, UserUpdate,
};
