use chrono::{DateTime, Duration, NaiveTime, Utc};

// US exchanges close at 21:00 UTC; the provider's daily batch is expected 15 minutes later.
const CLOSE_CUTOFF_HOUR_UTC: i64 = 21;
const CLOSE_CUTOFF_MINUTE_UTC: i64 = 15;

/// Yesterday's close-of-market cutoff relative to `now`'s UTC date.
pub fn freshness_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    let prev_day = now.date_naive() - Duration::days(1);
    let cutoff = prev_day.and_time(NaiveTime::MIN)
        + Duration::hours(CLOSE_CUTOFF_HOUR_UTC)
        + Duration::minutes(CLOSE_CUTOFF_MINUTE_UTC);
    cutoff.and_utc()
}

/// Cached data is fresh when it was refreshed strictly after yesterday's cutoff.
/// A record that was never refreshed is never fresh.
pub fn is_fresh(last_refresh: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_refresh {
        Some(t) => t > freshness_cutoff(now),
        None => false,
    }
}
