mod calendar;
mod clock;
mod resolver;
mod source;

pub use calendar::{local_date_at, next_local_midnight_in, parse_timezone};
pub use chrono_tz::Tz;
pub use clock::{mock, Clock, SystemClock};
pub use resolver::TimezoneResolver;
pub use source::{TimezoneLookupError, TimezoneSource};
