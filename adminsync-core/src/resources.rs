//! Resource names used as the first segment of every cache key.

pub const USERS: &str = "users";
pub const USER: &str = "user";
pub const TOKENS: &str = "tokens";
pub const USER_JOBS: &str = "userJobs";
pub const USER_CONVERSATIONS: &str = "userConversations";
pub const JOBS: &str = "jobs";
pub const JOB_DETAIL: &str = "jobDetail";
pub const JOB_RESULTS: &str = "jobResults";
pub const JOB_STATS: &str = "jobStats";
pub const CHATBOT_STATS: &str = "chatbotStats";
pub const MODELS: &str = "models";
pub const CONVERSATIONS: &str = "conversations";
pub const CONVERSATION_DETAIL: &str = "conversationDetail";
pub const CONVERSATION_CHATS: &str = "conversationChats";
pub const SCHOOLS: &str = "schools";
pub const SCHOOL: &str = "school";
pub const DASHBOARD: &str = "dashboard";
pub const SYSTEM_METRICS: &str = "systemMetrics";
pub const JOB_TREND: &str = "jobTrend";
pub const USER_GROWTH: &str = "userGrowth";
pub const TOP_MODELS: &str = "topModels";
pub const RECENT_JOBS: &str = "recentJobs";
pub const ALERTS: &str = "alerts";
