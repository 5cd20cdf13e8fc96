use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Parses an IANA timezone identifier, treating unknown identifiers as UTC.
pub fn parse_timezone(name: &str) -> Tz {
    match name.trim().parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = name, "Invalid timezone identifier, falling back to UTC");
            Tz::UTC
        }
    }
}

/// Calendar date current in `tz` at `now`, shifted by `offset_days`.
pub fn local_date_at(now: DateTime<Utc>, tz: Tz, offset_days: i64) -> NaiveDate {
    let today = now.with_timezone(&tz).date_naive();
    today
        .checked_add_signed(Duration::days(offset_days))
        .unwrap_or(today)
}

/// Absolute instant at which the day after `date` begins in `tz`.
///
/// When a DST jump skips local midnight, the day begins at the end of the
/// gap: midnight is read with the offset in force at noon of `date`, before
/// the jump.
pub fn next_local_midnight_in(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let next = date.succ_opt().unwrap_or(date);
    let midnight = next.and_time(NaiveTime::MIN);

    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let noon = date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN));
            let offset_seconds = tz
                .offset_from_local_datetime(&noon)
                .earliest()
                .map(|offset| offset.fix().local_minus_utc())
                .unwrap_or(0);
            (midnight - Duration::seconds(i64::from(offset_seconds))).and_utc()
        }
    }
}
