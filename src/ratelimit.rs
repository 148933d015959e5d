//! Per-account daily usage counters.
//!
//! Counters are valid only for the calendar day recorded in `countOf`; the
//! first access on a later day zeroes everything before the current action
//! is charged (lazy rollover, no scheduled job). The limiter charges on
//! attempt, not on success, so failed retries cannot bypass the ceiling.
//! The caller owns persistence: updated counters ride the same upsert as
//! the rest of the record mutation.

use crate::model::{day_stamp, stamp, UsageCounters};
use chrono::{DateTime, Utc};

/// Fixed per-action daily ceiling.
pub const DAILY_LIMIT: i64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateAction {
    Login,
    Challenge,
    Validate,
    Password,
    SysReset,
    SysCheck,
    Details,
    Library,
}

impl RateAction {
    /// Parse the wire name of an action. Unknown names yield `None`; the
    /// caller must treat that as a denied attempt (fail closed).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "login" => Some(Self::Login),
            "challenge" => Some(Self::Challenge),
            "validate" => Some(Self::Validate),
            "password" => Some(Self::Password),
            "sys-reset" => Some(Self::SysReset),
            "sys-check" => Some(Self::SysCheck),
            "details" => Some(Self::Details),
            "library" => Some(Self::Library),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Challenge => "challenge",
            Self::Validate => "validate",
            Self::Password => "password",
            Self::SysReset => "sys-reset",
            Self::SysCheck => "sys-check",
            Self::Details => "details",
            Self::Library => "library",
        }
    }
}

/// Roll the counters over if the day changed, test the ceiling, and charge
///// the attempt. Pure: the caller owns the returned counters and their
/// persistence.
#[must_use]
pub fn check_and_increment(
    counters: UsageCounters,
    action: RateAction,
    now: DateTime<Utc>,
) -> (bool, UsageCounters) {
    let today = day_stamp(now);
    let mut counters = if counters.count_of == today {
        counters
    } else {
        UsageCounters::new(now)
    };

    let slot = match action {
        RateAction::Login => &mut counters.login,
        RateAction::Challenge => &mut counters.challenge,
        RateAction::Validate => &mut counters.validate,
        RateAction::Password => &mut counters.password,
        RateAction::SysReset => &mut counters.sys_reset,
        RateAction::SysCheck => &mut counters.sys_check,
        RateAction::Details => &mut counters.details,
        RateAction::Library => &mut counters.library,
    };

    let allowed = (0..DAILY_LIMIT).contains(slot);
    *slot += 1;
    counters.updated_at = stamp(now);

    (allowed, counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn charges_each_attempt_until_the_ceiling() {
        let now = noon();
        let mut counters = UsageCounters::new(now);

        for _ in 0..DAILY_LIMIT {
            let (allowed, next) = check_and_increment(counters, RateAction::Login, now);
            assert!(allowed);
            counters = next;
        }

        let (allowed, counters) = check_and_increment(counters, RateAction::Login, now);
        assert!(!allowed);
        assert_eq!(counters.login, DAILY_LIMIT + 1);
    }

    #[test]
    fn actions_are_counted_independently() {
        let now = noon();
        let counters = UsageCounters::new(now);

        let (_, counters) = check_and_increment(counters, RateAction::Challenge, now);
        let (allowed, counters) = check_and_increment(counters, RateAction::Validate, now);
        assert!(allowed);
        assert_eq!(counters.challenge, 1);
        assert_eq!(counters.validate, 1);
        assert_eq!(counters.login, 0);
    }

    #[test]
    fn crossing_midnight_resets_all_counters_once() {
        let now = noon();
        let mut counters = UsageCounters::new(now);
        counters.login = 40;
        counters.challenge = 99;

        let tomorrow = now + Duration::days(1);
        let (allowed, counters) = check_and_increment(counters, RateAction::Challenge, tomorrow);
        assert!(allowed);
        assert_eq!(counters.count_of, "20240502");
        assert_eq!(counters.login, 0);
        assert_eq!(counters.challenge, 1);

        // Same day again: no second reset.
        let (_, counters) = check_and_increment(counters, RateAction::Challenge, tomorrow);
        assert_eq!(counters.challenge, 2);
    }

    #[test]
    fn exhausted_quota_recovers_after_rollover() {
        let now = noon();
        let mut counters = UsageCounters::new(now);
        counters.validate = DAILY_LIMIT;

        let (allowed, counters) = check_and_increment(counters, RateAction::Validate, now);
        assert!(!allowed);

        let (allowed, _) =
            check_and_increment(counters, RateAction::Validate, now + Duration::days(1));
        assert!(allowed);
    }

    #[test]
    fn unknown_action_names_fail_closed() {
        assert_eq!(RateAction::parse("logout"), None);
        assert_eq!(RateAction::parse(""), None);
        assert_eq!(RateAction::parse("sys-check"), Some(RateAction::SysCheck));
    }

    #[test]
    fn action_names_round_trip() {
        for action in [
            RateAction::Login,
            RateAction::Challenge,
            RateAction::Validate,
            RateAction::Password,
            RateAction::SysReset,
            RateAction::SysCheck,
            RateAction::Details,
            RateAction::Library,
        ] {
            assert_eq!(RateAction::parse(action.as_str()), Some(action));
        }
    }
}
