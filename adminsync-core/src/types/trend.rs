//! Dashboard trend series: per-day job and sign-up counts over a trailing
//! window, and the recent-jobs feed with owner details attached.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{Job, JobStatus, User};

/// Days covered by the trend charts, today included.
pub const TREND_DAYS: u64 = 7;

/// Page size used to pull a whole trend window in one request.
pub const TREND_FETCH_LIMIT: u32 = 1000;

/// Oldest-first dates of the window ending at `today`.
pub fn trend_window(today: NaiveDate) -> Vec<NaiveDate> {
    (0..TREND_DAYS)
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(back)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTrendPoint {
    pub date: NaiveDate,
    pub count: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobTrendPoint {
    /// Bucket `jobs` by creation date over the window ending at `today`.
    /// Days without jobs are zero; jobs outside the window are ignored.
    pub fn aggregate(jobs: &[Job], today: NaiveDate) -> Vec<JobTrendPoint> {
        let mut points: Vec<JobTrendPoint> = trend_window(today)
            .into_iter()
            .map(|date| JobTrendPoint {
                date,
                count: 0,
                completed: 0,
                failed: 0,
            })
            .collect();

        for job in jobs {
            let day = job.created_at.date_naive();
            if let Some(point) = points.iter_mut().find(|p| p.date == day) {
                point.count += 1;
                match job.status {
                    JobStatus::Completed => point.completed += 1,
                    JobStatus::Failed => point.failed += 1,
                    _ => {}
                }
            }
        }
        points
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrowthPoint {
    pub date: NaiveDate,
    pub count: u64,
}

impl UserGrowthPoint {
    /// Sign-ups per day over the window ending at `today`.
    pub fn aggregate(users: &[User], today: NaiveDate) -> Vec<UserGrowthPoint> {
        let mut points: Vec<UserGrowthPoint> = trend_window(today)
            .into_iter()
            .map(|date| UserGrowthPoint { date, count: 0 })
            .collect();

        for user in users {
            let day = user.created_at.date_naive();
            if let Some(point) = points.iter_mut().find(|p| p.date == day) {
                point.count += 1;
            }
        }
        points
    }
}

/// A row of the recent-jobs feed. `owner` is absent when the owner lookup
/// failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentJob {
    pub job: Job,
    #[serde(default)]
    pub owner: Option<User>,
}
