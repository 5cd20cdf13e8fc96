use std::sync::Arc;

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use reflection_worker_job::{AnalysisType, PeriodKey};
use serde::Serialize;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::errors::Result;
use crate::store::{EligibilitySource, Entry};

/// A period the user's data qualifies for. Whether it still needs a job is
/// decided by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub key: PeriodKey,
    pub entry_id: Option<Uuid>,
}

/// Monday of the week that contains `today - 7`.
pub fn previous_week_start(today: NaiveDate) -> NaiveDate {
    let reference = today - Duration::days(7);
    reference - Duration::days(reference.weekday().num_days_from_monday() as i64)
}

/// First day of the month before `today`'s month.
pub fn previous_month_start(today: NaiveDate) -> NaiveDate {
    let first = today.with_day(1).unwrap_or(today);
    first.checked_sub_months(Months::new(1)).unwrap_or(first)
}

pub fn is_weekly_trigger(today: NaiveDate, local_hour: u32) -> bool {
    today.weekday() == Weekday::Sun && local_hour == 0
}

pub fn is_monthly_trigger(today: NaiveDate, local_hour: u32) -> bool {
    today.day() == 1 && local_hour == 0
}

/// Evaluates the daily, catch-up, weekly and monthly rules for one user.
#[derive(Clone)]
pub struct EligibilityScanner {
    source: Arc<dyn EligibilitySource>,
    config: WorkerConfig,
}

impl EligibilityScanner {
    pub fn new(source: Arc<dyn EligibilitySource>, config: WorkerConfig) -> Self {
        Self { source, config }
    }

    /// `today` and `local_hour` are the user's local calendar date and
    /// wall-clock hour.
    pub async fn scan(
        &self,
        user_id: Uuid,
        today: NaiveDate,
        local_hour: u32,
    ) -> Result<Vec<Candidate>> {
        let mut candidates = self.daily_candidates(user_id, today).await?;

        if is_weekly_trigger(today, local_hour) {
            let week_start = previous_week_start(today);
            let key = PeriodKey::new(user_id, AnalysisType::Weekly, week_start);
            if self
                .has_enough_entries(&key, self.config.weekly_min_entries())
                .await?
            {
                candidates.push(Candidate {
                    key,
                    entry_id: None,
                });
            }
        }

        if is_monthly_trigger(today, local_hour) {
            let month_start = previous_month_start(today);
            let key = PeriodKey::new(user_id, AnalysisType::Monthly, month_start);
            if self
                .has_enough_entries(&key, self.config.monthly_min_entries())
                .await?
            {
                candidates.push(Candidate {
                    key,
                    entry_id: None,
                });
            }
        }

        Ok(candidates)
    }

    /// Today's entry plus catch-up entries from the look-back window.
    async fn daily_candidates(&self, user_id: Uuid, today: NaiveDate) -> Result<Vec<Candidate>> {
        let from = today - Duration::days(self.config.catch_up_days());
        let entries = self.source.list_entries(user_id, from, today).await?;

        let mut candidates = Vec::new();
        for entry in entries {
            if entry.entry_date > today {
                continue;
            }
            if !self.is_daily_eligible(&entry).await? {
                continue;
            }
            candidates.push(Candidate {
                key: PeriodKey::new(user_id, AnalysisType::Daily, entry.entry_date),
                entry_id: Some(entry.id),
            });
        }

        Ok(candidates)
    }

    async fn is_daily_eligible(&self, entry: &Entry) -> Result<bool> {
        if !entry.has_text() || entry.text_len() < self.config.daily_min_chars() {
            trace!(entry_id = %entry.id, len = entry.text_len(), "Entry text too short");
            return Ok(false);
        }
        if !self.source.is_entry_complete(entry.id).await? {
            debug!(entry_id = %entry.id, "Entry incomplete");
            return Ok(false);
        }
        Ok(true)
    }

    async fn has_enough_entries(&self, key: &PeriodKey, min_entries: usize) -> Result<bool> {
        let entries = self
            .source
            .list_entries(key.user_id, key.period_start, key.period_end())
            .await?;
        debug!(
            period = %key,
            count = entries.len(),
            min_entries,
            "Counted entries for period"
        );
        Ok(entries.len() >= min_entries)
    }
}
