// ── Response rate tracking ──
//
// Each stats cycle samples the daemon's response counter. Consecutive
// samples become an `RpsInterval`; the daemon's rates are the response
// totals over the short and long windows divided by the covered time.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde_json::Value;

use super::stats::decode_stat_value;
use crate::model::{DaemonId, Family, RpsInterval, RpsValues};

/// Counter sampled at one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpsSample {
    pub sampled_at: DateTime<Utc>,
    pub value: u64,
}

/// Counter statistic sampled for a family.
pub fn response_statistic(family: Family) -> &'static str {
    match family {
        Family::V4 => "pkt4-ack-sent",
        Family::V6 => "pkt6-reply-sent",
    }
}

/// Most recent value of a `statistic-get` response.
///
/// The response maps the statistic name to `[[value, timestamp], ...]`,
/// newest first.
pub fn latest_sample(arguments: &Value, name: &str) -> Option<u64> {
    let value = arguments.get(name)?.as_array()?.first()?.as_array()?.first()?;
    let value: BigUint = decode_stat_value(value)?;
    Some(value.to_u64().unwrap_or(u64::MAX))
}

/// Interval covered by two samples.
///
/// A counter lower than its previous value means the daemon restarted, so
/// the whole current value counts as new responses.
pub fn interval_between(
    daemon_id: DaemonId,
    previous: RpsSample,
    current: RpsSample,
) -> Option<RpsInterval> {
    let duration = current.sampled_at - previous.sampled_at;
    if duration <= TimeDelta::zero() {
        return None;
    }
    let responses = if current.value >= previous.value {
        current.value - previous.value
    } else {
        current.value
    };
    Some(RpsInterval {
        daemon_id,
        start: previous.sampled_at,
        duration,
        responses,
    })
}

/// Responses per second over intervals starting within `window` of `now`.
pub fn rate<'a>(
    intervals: impl IntoIterator<Item = &'a RpsInterval>,
    now: DateTime<Utc>,
    window: Duration,
) -> f64 {
    let since = TimeDelta::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let (responses, millis) = intervals
        .into_iter()
        .filter(|i| i.start >= since)
        .fold((0u64, 0i64), |(r, d), i| {
            (
                r.saturating_add(i.responses),
                d.saturating_add(i.duration.num_milliseconds()),
            )
        });
    if millis <= 0 {
        return 0.0;
    }
    responses.to_f64().unwrap_or(0.0) * 1000.0 / millis.to_f64().unwrap_or(1.0)
}

pub fn rates<'a>(
    intervals: impl IntoIterator<Item = &'a RpsInterval> + Clone,
    now: DateTime<Utc>,
    short: Duration,
    long: Duration,
) -> RpsValues {
    RpsValues {
        short: rate(intervals.clone(), now, short),
        long: rate(intervals, now, long),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn delta_is_difference_when_monotonic() {
        let i = interval_between(
            DaemonId(1),
            RpsSample {
                sampled_at: at(0),
                value: 100,
            },
            RpsSample {
                sampled_at: at(60),
                value: 160,
            },
        )
        .unwrap();
        assert_eq!(i.responses, 60);
        assert_eq!(i.duration, TimeDelta::seconds(60));
        assert_eq!(i.start, at(0));
    }

    #[test]
    fn counter_restart_counts_full_value() {
        let i = interval_between(
            DaemonId(1),
            RpsSample {
                sampled_at: at(0),
                value: 500,
            },
            RpsSample {
                sampled_at: at(60),
                value: 20,
            },
        )
        .unwrap();
        assert_eq!(i.responses, 20);
    }

    #[test]
    fn windows_select_recent_intervals() {
        let now = at(3 * 3600);
        let intervals = vec![
            RpsInterval {
                daemon_id: DaemonId(1),
                start: at(0),
                duration: TimeDelta::seconds(600),
                responses: 6000,
            },
            RpsInterval {
                daemon_id: DaemonId(1),
                start: now - TimeDelta::seconds(600),
                duration: TimeDelta::seconds(600),
                responses: 600,
            },
        ];
        let values = rates(
            &intervals,
            now,
            Duration::from_secs(900),
            Duration::from_secs(86_400),
        );
        assert!((values.short - 1.0).abs() < 1e-9);
        assert!((values.long - 5.5).abs() < 1e-9);
        assert!(rate(&[], now, Duration::from_secs(60)).abs() < f64::EPSILON);
    }

    #[test]
    fn latest_sample_reads_first_entry() {
        let args = json!({"pkt4-ack-sent": [[42, "2024-01-01 10:00:01"], [40, "2024-01-01 10:00:00"]]});
        assert_eq!(latest_sample(&args, "pkt4-ack-sent"), Some(42));
        assert_eq!(latest_sample(&args, "pkt6-reply-sent"), None);
    }
}
