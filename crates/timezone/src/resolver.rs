use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{trace, warn};

use crate::calendar::{local_date_at, next_local_midnight_in, parse_timezone};
use crate::clock::Clock;
use crate::source::TimezoneSource;

/// Turns a user's IANA timezone into calendar boundaries.
///
/// Every operation is infallible: an unreachable source degrades to the
/// local chrono-tz calculation and an unknown identifier is read as UTC.
#[derive(Clone)]
pub struct TimezoneResolver {
    source: Option<Arc<dyn TimezoneSource>>,
    clock: Arc<dyn Clock>,
}

impl TimezoneResolver {
    /// A resolver computing everything locally from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            source: None,
            clock,
        }
    }

    /// Consults `source` first for calendar dates.
    pub fn with_source(mut self, source: Arc<dyn TimezoneSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn local_now(&self, timezone: &str) -> DateTime<Tz> {
        self.clock.now().with_timezone(&parse_timezone(timezone))
    }

    /// Calendar date current in `timezone`, shifted by `offset_days`.
    pub async fn local_date(&self, timezone: &str, offset_days: i64) -> NaiveDate {
        if let Some(source) = &self.source {
            match source.date_in_timezone(timezone, offset_days).await {
                Ok(date) => return date,
                Err(e) => {
                    warn!(timezone, offset_days, error = %e, "Timezone lookup failed, using local calculation");
                }
            }
        }

        let date = local_date_at(self.clock.now(), parse_timezone(timezone), offset_days);
        trace!(timezone, offset_days, %date, "Resolved local date");
        date
    }

    /// Instant at which the day after `date` begins in `timezone`.
    pub fn next_local_midnight(&self, date: NaiveDate, timezone: &str) -> DateTime<Utc> {
        next_local_midnight_in(date, parse_timezone(timezone))
    }
}
