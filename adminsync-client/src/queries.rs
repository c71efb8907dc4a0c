//! Typed, cached reads for every admin resource.
//!
//! Each query builds its [`QueryKey`], picks the resource's freshness policy
//! and reads through the [`QueryCache`] with a fetcher that wraps the
//! [`ResourceClient`].

use std::sync::Arc;
use std::time::Duration;

use adminsync_cache::{CacheRead, PollHandle, QueryCache, QueryPolicy, RetryPolicy};
use adminsync_core::resources;
use adminsync_core::types::{
    trend_window, ChatPage, ChatbotStats, Conversation, ConversationFilters, ConversationList,
    DashboardSummary, Job, JobFilters, JobList, JobResults, JobStats, JobTrendPoint, ModelStats,
    PageParams, RecentJob, SchoolDetail, SchoolFilters, SchoolList, SortOrder, SystemMetrics,
    TokenHistory, User, UserDetail, UserFilters, UserGrowthPoint, UserList, TREND_FETCH_LIMIT,
};
use adminsync_core::{QueryKey, SyncResult, ValidationError};
use chrono::{NaiveDate, Utc};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::resource::{api_path, ResourceClient};

/// Rows shown in the dashboard's recent-jobs feed.
pub const RECENT_JOBS_LIMIT: u32 = 10;

/// Freshness and eviction windows per resource.
pub fn default_policy(resource: &str) -> QueryPolicy {
    match resource {
        resources::TOKENS | resources::JOBS | resources::RECENT_JOBS => QueryPolicy::minutes(2, 5),
        resources::USER_JOBS | resources::USER_CONVERSATIONS => QueryPolicy::minutes(3, 10),
        resources::JOB_RESULTS => QueryPolicy::minutes(10, 30),
        resources::JOB_STATS => QueryPolicy::minutes(1, 5),
        resources::CHATBOT_STATS => QueryPolicy::minutes(3, 10),
        resources::MODELS
        | resources::CONVERSATIONS
        | resources::CONVERSATION_DETAIL
        | resources::CONVERSATION_CHATS => QueryPolicy::minutes(5, 15),
        resources::JOB_TREND | resources::USER_GROWTH | resources::TOP_MODELS => {
            QueryPolicy::minutes(5, 10)
        }
        _ => QueryPolicy::minutes(5, 10),
    }
}

/// Auto-refresh period for the dashboard's live panels.
pub fn poll_interval(resource: &str) -> Option<Duration> {
    match resource {
        resources::JOB_STATS => Some(Duration::from_secs(10)),
        resources::CHATBOT_STATS | resources::SYSTEM_METRICS | resources::RECENT_JOBS => {
            Some(Duration::from_secs(30))
        }
        resources::JOB_TREND | resources::USER_GROWTH | resources::TOP_MODELS => {
            Some(Duration::from_secs(60))
        }
        _ => None,
    }
}

/// Cache keys, one builder per query.
pub mod keys {
    use super::*;

    pub fn users(filters: &UserFilters) -> QueryKey {
        QueryKey::new(resources::USERS).with_params(filters)
    }

    pub fn user(id: &str) -> QueryKey {
        QueryKey::new(resources::USER).segment(id)
    }

    pub fn tokens(user_id: &str) -> QueryKey {
        QueryKey::new(resources::TOKENS).segment(user_id)
    }

    pub fn user_jobs(user_id: &str, page: &PageParams) -> QueryKey {
        QueryKey::new(resources::USER_JOBS).segment(user_id).with_params(page)
    }

    pub fn user_conversations(user_id: &str, page: &PageParams) -> QueryKey {
        QueryKey::new(resources::USER_CONVERSATIONS)
            .segment(user_id)
            .with_params(page)
    }

    pub fn jobs(filters: &JobFilters) -> QueryKey {
        QueryKey::new(resources::JOBS).with_params(filters)
    }

    pub fn job(id: &str) -> QueryKey {
        QueryKey::new(resources::JOB_DETAIL).segment(id)
    }

    pub fn job_results(id: &str) -> QueryKey {
        QueryKey::new(resources::JOB_RESULTS).segment(id)
    }

    pub fn job_stats() -> QueryKey {
        QueryKey::new(resources::JOB_STATS)
    }

    pub fn chatbot_stats() -> QueryKey {
        QueryKey::new(resources::CHATBOT_STATS)
    }

    pub fn models() -> QueryKey {
        QueryKey::new(resources::MODELS)
    }

    pub fn conversations(filters: &ConversationFilters) -> QueryKey {
        QueryKey::new(resources::CONVERSATIONS).with_params(filters)
    }

    pub fn conversation(id: &str) -> QueryKey {
        QueryKey::new(resources::CONVERSATION_DETAIL).segment(id)
    }

    pub fn conversation_chats(id: &str, page: &PageParams) -> QueryKey {
        QueryKey::new(resources::CONVERSATION_CHATS)
            .segment(id)
            .with_params(page)
    }

    pub fn schools(filters: &SchoolFilters) -> QueryKey {
        QueryKey::new(resources::SCHOOLS).with_params(filters)
    }

    pub fn school(id: i64) -> QueryKey {
        QueryKey::new(resources::SCHOOL).segment(id.to_string())
    }

    pub fn system_metrics() -> QueryKey {
        dashboard(resources::SYSTEM_METRICS)
    }

    pub fn job_trend() -> QueryKey {
        dashboard(resources::JOB_TREND)
    }

    pub fn user_growth() -> QueryKey {
        dashboard(resources::USER_GROWTH)
    }

    pub fn top_models() -> QueryKey {
        dashboard(resources::TOP_MODELS)
    }

    pub fn recent_jobs() -> QueryKey {
        dashboard(resources::RECENT_JOBS)
    }

    fn dashboard(panel: &str) -> QueryKey {
        QueryKey::new(resources::DASHBOARD).segment(panel)
    }
}

type Fetcher<T> = Box<dyn Fn() -> BoxFuture<'static, SyncResult<T>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Queries {
    client: ResourceClient,
    cache: QueryCache,
    retry: RetryPolicy,
}

impl Queries {
    pub fn new(client: ResourceClient, cache: QueryCache, retry: RetryPolicy) -> Self {
        Self {
            client,
            cache,
            retry,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn policy(&self, resource: &str) -> QueryPolicy {
        default_policy(resource).with_retry(self.retry)
    }

    // ========================================================================
    // USERS
    // ========================================================================

    pub async fn users(&self, filters: &UserFilters) -> SyncResult<CacheRead<Arc<UserList>>> {
        self.read(
            keys::users(filters),
            resources::USERS,
            "/admin/users".to_string(),
            Some(filters.clone()),
        )
        .await
    }

    pub async fn user(&self, id: &str) -> SyncResult<CacheRead<Arc<UserDetail>>> {
        require_id("userId", id)?;
        self.read::<_, ()>(
            keys::user(id),
            resources::USER,
            api_path(&["admin", "users", id])?,
            None,
        )
        .await
    }

    pub async fn token_history(&self, user_id: &str) -> SyncResult<CacheRead<Arc<TokenHistory>>> {
        require_id("userId", user_id)?;
        self.read::<_, ()>(
            keys::tokens(user_id),
            resources::TOKENS,
            api_path(&["admin", "users", user_id, "tokens"])?,
            None,
        )
        .await
    }

    pub async fn user_jobs(
        &self,
        user_id: &str,
        page: PageParams,
    ) -> SyncResult<CacheRead<Arc<JobList>>> {
        require_id("userId", user_id)?;
        self.read(
            keys::user_jobs(user_id, &page),
            resources::USER_JOBS,
            api_path(&["admin", "users", user_id, "jobs"])?,
            Some(page),
        )
        .await
    }

    pub async fn user_conversations(
        &self,
        user_id: &str,
        page: PageParams,
    ) -> SyncResult<CacheRead<Arc<ConversationList>>> {
        require_id("userId", user_id)?;
        self.read(
            keys::user_conversations(user_id, &page),
            resources::USER_CONVERSATIONS,
            api_path(&["admin", "users", user_id, "conversations"])?,
            Some(page),
        )
        .await
    }

    // ========================================================================
    // JOBS
    // ========================================================================

    pub async fn jobs(&self, filters: &JobFilters) -> SyncResult<CacheRead<Arc<JobList>>> {
        self.read(
            keys::jobs(filters),
            resources::JOBS,
            "/admin/jobs".to_string(),
            Some(filters.clone()),
        )
        .await
    }

    pub async fn job(&self, id: &str) -> SyncResult<CacheRead<Arc<Job>>> {
        require_id("jobId", id)?;
        self.read::<_, ()>(
            keys::job(id),
            resources::JOB_DETAIL,
            api_path(&["admin", "jobs", id])?,
            None,
        )
        .await
    }

    pub async fn job_results(&self, id: &str) -> SyncResult<CacheRead<Arc<JobResults>>> {
        require_id("jobId", id)?;
        self.read::<_, ()>(
            keys::job_results(id),
            resources::JOB_RESULTS,
            api_path(&["admin", "jobs", id, "results"])?,
            None,
        )
        .await
    }

    pub async fn job_stats(&self) -> SyncResult<CacheRead<Arc<JobStats>>> {
        self.read::<_, ()>(
            keys::job_stats(),
            resources::JOB_STATS,
            "/admin/jobs/stats".to_string(),
            None,
        )
        .await
    }

    // ========================================================================
    // CHATBOT
    // ========================================================================

    pub async fn chatbot_stats(&self) -> SyncResult<CacheRead<Arc<ChatbotStats>>> {
        self.read::<_, ()>(
            keys::chatbot_stats(),
            resources::CHATBOT_STATS,
            "/admin/chatbot/stats".to_string(),
            None,
        )
        .await
    }

    pub async fn models(&self) -> SyncResult<CacheRead<Arc<ModelStats>>> {
        self.read::<_, ()>(
            keys::models(),
            resources::MODELS,
            "/admin/chatbot/models".to_string(),
            None,
        )
        .await
    }

    pub async fn conversations(
        &self,
        filters: &ConversationFilters,
    ) -> SyncResult<CacheRead<Arc<ConversationList>>> {
        self.read(
            keys::conversations(filters),
            resources::CONVERSATIONS,
            "/admin/conversations".to_string(),
            Some(filters.clone()),
        )
        .await
    }

    pub async fn conversation(&self, id: &str) -> SyncResult<CacheRead<Arc<Conversation>>> {
        require_id("conversationId", id)?;
        self.read::<_, ()>(
            keys::conversation(id),
            resources::CONVERSATION_DETAIL,
            api_path(&["admin", "conversations", id])?,
            None,
        )
        .await
    }

    pub async fn conversation_chats(
        &self,
        id: &str,
        page: PageParams,
    ) -> SyncResult<CacheRead<Arc<ChatPage>>> {
        require_id("conversationId", id)?;
        self.read(
            keys::conversation_chats(id, &page),
            resources::CONVERSATION_CHATS,
            api_path(&["admin", "conversations", id, "chats"])?,
            Some(page),
        )
        .await
    }

    // ========================================================================
    // SCHOOLS
    // ========================================================================

    pub async fn schools(&self, filters: &SchoolFilters) -> SyncResult<CacheRead<Arc<SchoolList>>> {
        self.read(
            keys::schools(filters),
            resources::SCHOOLS,
            "/admin/schools".to_string(),
            Some(filters.clone()),
        )
        .await
    }

    pub async fn school(&self, id: i64) -> SyncResult<CacheRead<Arc<SchoolDetail>>> {
        if id <= 0 {
            return Err(ValidationError::invalid("schoolId", "must be positive").into());
        }
        self.read::<_, ()>(
            keys::school(id),
            resources::SCHOOL,
            api_path(&["admin", "schools", &id.to_string()])?,
            None,
        )
        .await
    }

    // ========================================================================
    // DASHBOARD
    // ========================================================================

    pub async fn system_metrics(&self) -> SyncResult<CacheRead<Arc<SystemMetrics>>> {
        self.read::<_, ()>(
            keys::system_metrics(),
            resources::SYSTEM_METRICS,
            "/admin/system/metrics".to_string(),
            None,
        )
        .await
    }

    /// Jobs created per day over the last week, split by outcome.
    pub async fn job_trend(&self) -> SyncResult<CacheRead<Arc<Vec<JobTrendPoint>>>> {
        let policy = self.policy(resources::JOB_TREND);
        self.cache
            .read(&keys::job_trend(), &policy, self.job_trend_fetcher())
            .await
    }

    /// Sign-ups per day over the last week.
    pub async fn user_growth(&self) -> SyncResult<CacheRead<Arc<Vec<UserGrowthPoint>>>> {
        let policy = self.policy(resources::USER_GROWTH);
        self.cache
            .read(&keys::user_growth(), &policy, self.user_growth_fetcher())
            .await
    }

    /// Model usage for the dashboard panel. Cached apart from the chatbot
    /// page's `models` read.
    pub async fn top_models(&self) -> SyncResult<CacheRead<Arc<ModelStats>>> {
        self.read::<_, ()>(
            keys::top_models(),
            resources::TOP_MODELS,
            "/admin/chatbot/models".to_string(),
            None,
        )
        .await
    }

    /// Newest jobs, each with its owner looked up. A failed lookup leaves
    /// that row's owner empty rather than failing the feed.
    pub async fn recent_jobs(&self) -> SyncResult<CacheRead<Arc<Vec<RecentJob>>>> {
        let policy = self.policy(resources::RECENT_JOBS);
        self.cache
            .read(&keys::recent_jobs(), &policy, self.recent_jobs_fetcher())
            .await
    }

    /// Landing-page headline numbers from three cached reads issued
    /// concurrently.
    pub async fn dashboard_summary(&self) -> SyncResult<DashboardSummary> {
        let (jobs, system, chatbot) =
            tokio::try_join!(self.job_stats(), self.system_metrics(), self.chatbot_stats())?;
        Ok(DashboardSummary::combine(jobs.value(), system.value(), chatbot.value()))
    }

    /// Keep every dashboard panel refreshing at its period until the handles
    /// are dropped.
    pub fn poll_dashboard(&self) -> Vec<PollHandle> {
        vec![
            self.poll(
                keys::job_stats(),
                resources::JOB_STATS,
                self.fetcher::<JobStats, ()>("/admin/jobs/stats".to_string(), None),
            ),
            self.poll(
                keys::chatbot_stats(),
                resources::CHATBOT_STATS,
                self.fetcher::<ChatbotStats, ()>("/admin/chatbot/stats".to_string(), None),
            ),
            self.poll(
                keys::system_metrics(),
                resources::SYSTEM_METRICS,
                self.fetcher::<SystemMetrics, ()>("/admin/system/metrics".to_string(), None),
            ),
            self.poll(keys::job_trend(), resources::JOB_TREND, self.job_trend_fetcher()),
            self.poll(keys::user_growth(), resources::USER_GROWTH, self.user_growth_fetcher()),
            self.poll(
                keys::top_models(),
                resources::TOP_MODELS,
                self.fetcher::<ModelStats, ()>("/admin/chatbot/models".to_string(), None),
            ),
            self.poll(keys::recent_jobs(), resources::RECENT_JOBS, self.recent_jobs_fetcher()),
        ]
    }

    fn poll<T>(&self, key: QueryKey, resource: &'static str, fetcher: Fetcher<T>) -> PollHandle
    where
        T: Send + Sync + 'static,
    {
        let period = poll_interval(resource).unwrap_or(Duration::from_secs(30));
        self.cache.poll(key, self.policy(resource), period, fetcher)
    }

    fn job_trend_fetcher(&self) -> Fetcher<Vec<JobTrendPoint>> {
        let client = self.client.clone();
        Box::new(move || {
            let client = client.clone();
            async move {
                let today = Utc::now().date_naive();
                let (from, to) = window_bounds(today);
                let filters = JobFilters {
                    limit: Some(TREND_FETCH_LIMIT),
                    date_from: Some(from),
                    date_to: Some(to),
                    sort_by: Some("created_at".to_string()),
                    sort_order: Some(SortOrder::Asc),
                    ..JobFilters::default()
                };
                let list: JobList = client.get("/admin/jobs", Some(&filters)).await?;
                Ok(JobTrendPoint::aggregate(&list.jobs, today))
            }
            .boxed()
        })
    }

    fn user_growth_fetcher(&self) -> Fetcher<Vec<UserGrowthPoint>> {
        let client = self.client.clone();
        Box::new(move || {
            let client = client.clone();
            async move {
                let today = Utc::now().date_naive();
                let (from, to) = window_bounds(today);
                let filters = UserFilters {
                    limit: Some(TREND_FETCH_LIMIT),
                    date_from: Some(from),
                    date_to: Some(to),
                    sort_by: Some("created_at".to_string()),
                    sort_order: Some(SortOrder::Asc),
                    ..UserFilters::default()
                };
                let list: UserList = client.get("/admin/users", Some(&filters)).await?;
                Ok(UserGrowthPoint::aggregate(&list.users, today))
            }
            .boxed()
        })
    }

    fn recent_jobs_fetcher(&self) -> Fetcher<Vec<RecentJob>> {
        let client = self.client.clone();
        Box::new(move || {
            let client = client.clone();
            async move {
                let filters = JobFilters {
                    page: Some(1),
                    limit: Some(RECENT_JOBS_LIMIT),
                    sort_by: Some("created_at".to_string()),
                    sort_order: Some(SortOrder::Desc),
                    ..JobFilters::default()
                };
                let list: JobList = client.get("/admin/jobs", Some(&filters)).await?;
                let rows = join_all(list.jobs.into_iter().map(|job| {
                    let client = client.clone();
                    async move {
                        let owner = lookup_owner(&client, &job).await;
                        RecentJob { job, owner }
                    }
                }))
                .await;
                Ok(rows)
            }
            .boxed()
        })
    }

    async fn read<T, Q>(
        &self,
        key: QueryKey,
        resource: &str,
        path: String,
        query: Option<Q>,
    ) -> SyncResult<CacheRead<Arc<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        Q: Serialize + Send + Sync + 'static,
    {
        let policy = self.policy(resource);
        self.cache.read(&key, &policy, self.fetcher(path, query)).await
    }

    fn fetcher<T, Q>(&self, path: String, query: Option<Q>) -> Fetcher<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        Q: Serialize + Send + Sync + 'static,
    {
        let client = self.client.clone();
        let path: Arc<str> = path.into();
        let query = Arc::new(query);
        Box::new(move || {
            let client = client.clone();
            let path = Arc::clone(&path);
            let query = Arc::clone(&query);
            async move { client.get::<T, Q>(&path, (*query).as_ref()).await }.boxed()
        })
    }
}

/// First and last day of the trend window, as the API's date filters.
fn window_bounds(today: NaiveDate) -> (String, String) {
    let window = trend_window(today);
    let first = window.first().copied().unwrap_or(today);
    (first.to_string(), today.to_string())
}

async fn lookup_owner(client: &ResourceClient, job: &Job) -> Option<User> {
    if job.user_id.trim().is_empty() {
        return None;
    }
    let result = match api_path(&["admin", "users", &job.user_id]) {
        Ok(path) => client.get::<UserDetail, ()>(&path, None).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(detail) => Some(detail.user),
        Err(err) => {
            tracing::debug!(
                job_id = %job.id,
                user_id = %job.user_id,
                error = %err,
                "Owner lookup failed; recent job listed without owner"
            );
            None
        }
    }
}

fn require_id(field: &'static str, id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        assert_eq!(default_policy(resources::USERS), QueryPolicy::minutes(5, 10));
        assert_eq!(default_policy(resources::TOKENS), QueryPolicy::minutes(2, 5));
        assert_eq!(default_policy(resources::JOB_RESULTS), QueryPolicy::minutes(10, 30));
        assert_eq!(default_policy(resources::JOB_STATS), QueryPolicy::minutes(1, 5));
        assert_eq!(default_policy(resources::MODELS), QueryPolicy::minutes(5, 15));
        assert_eq!(default_policy(resources::SYSTEM_METRICS), QueryPolicy::minutes(5, 10));
        assert_eq!(default_policy(resources::JOB_TREND), QueryPolicy::minutes(5, 10));
        assert_eq!(default_policy(resources::RECENT_JOBS), QueryPolicy::minutes(2, 5));
    }

    #[test]
    fn test_poll_periods() {
        assert_eq!(poll_interval(resources::JOB_STATS), Some(Duration::from_secs(10)));
        assert_eq!(poll_interval(resources::SYSTEM_METRICS), Some(Duration::from_secs(30)));
        assert_eq!(poll_interval(resources::JOB_TREND), Some(Duration::from_secs(60)));
        assert_eq!(poll_interval(resources::USER_GROWTH), Some(Duration::from_secs(60)));
        assert_eq!(poll_interval(resources::TOP_MODELS), Some(Duration::from_secs(60)));
        assert_eq!(poll_interval(resources::RECENT_JOBS), Some(Duration::from_secs(30)));
        assert_eq!(poll_interval(resources::USERS), None);
    }

    #[test]
    fn test_keys_nest_under_resource() {
        let key = keys::user_jobs("u1", &PageParams::new(2, 10));
        assert_eq!(key.resource(), Some(resources::USER_JOBS));
        assert!(key.starts_with(&QueryKey::new(resources::USER_JOBS).segment("u1")));

        let metrics = keys::system_metrics();
        assert!(metrics.starts_with(&QueryKey::new(resources::DASHBOARD)));
        assert_eq!(keys::job_trend(), QueryKey::new("dashboard").segment("jobTrend"));
        assert_eq!(keys::recent_jobs(), QueryKey::new("dashboard").segment("recentJobs"));
        assert_ne!(keys::top_models(), keys::models());
        assert_eq!(keys::school(7), QueryKey::new("school").segment("7"));
    }

    #[test]
    fn test_window_bounds_span_seven_days() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(
            window_bounds(today),
            ("2024-02-25".to_string(), "2024-03-02".to_string())
        );
    }

    #[test]
    fn test_filters_key_ignores_absent_fields() {
        let a = keys::users(&UserFilters::page(1));
        let b = keys::users(&UserFilters {
            page: Some(1),
            search: None,
            ..UserFilters::default()
        });
        assert_eq!(a, b);
        assert_ne!(a, keys::users(&UserFilters::page(2)));
    }
}
