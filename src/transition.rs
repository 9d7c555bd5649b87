//! Locating the next offset transition by bisection.

use crate::{Error, OffsetOracle};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

/// The outcome of [`find_next_transition()`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransitionResult {
    /// The offset at the end of the horizon equals the offset at the start.
    NotFound,
    /// The offset changes to `new_offset` at `instant`.
    Found {
        /// The first second at which `new_offset` applies.
        instant: DateTime<Utc>,
        /// The offset from UTC in seconds from `instant` on.
        new_offset: i32,
    },
}

impl TransitionResult {
    /// Returns the instant and offset of the transition, if one was found.
    pub fn found(self) -> Option<(DateTime<Utc>, i32)> {
        match self {
            TransitionResult::Found {
                instant,
                new_offset,
            } => Some((instant, new_offset)),
            TransitionResult::NotFound => None,
        }
    }
}

/// Finds the next change of the offset reported by `oracle` in
/// `start..=start + horizon`.
///
/// Both ends are truncated to whole seconds, and the search only compares
/// the offsets at those ends, so at most one transition is assumed to occur
/// inside the horizon: two transitions that cancel out are not found. When
/// the ends differ, the interval is bisected until it is one second wide,
/// costing one oracle query per halving.
///
/// Returns [`Error::InvalidHorizon`] if `horizon` is not positive or
/// `start + horizon` is out of range. A positive horizon that does not reach
/// the next whole second returns [`TransitionResult::NotFound`].
pub fn find_next_transition<O>(
    oracle: &O,
    start: DateTime<Utc>,
    horizon: TimeDelta,
) -> Result<TransitionResult, Error>
where
    O: OffsetOracle + ?Sized,
{
    if horizon <= TimeDelta::zero() {
        return Err(Error::InvalidHorizon);
    }
    let end = start
        .checked_add_signed(horizon)
        .ok_or(Error::InvalidHorizon)?;

    let mut start = start.trunc_subsecs(0);
    let mut end = end.trunc_subsecs(0);
    if end == start {
        return Ok(TransitionResult::NotFound);
    }

    let start_offset = oracle.offset_at(start);
    let mut end_offset = oracle.offset_at(end);
    if start_offset == end_offset {
        return Ok(TransitionResult::NotFound);
    }

    // Invariant: offset(start) == start_offset != end_offset == offset(end).
    let mut span = (end - start).num_seconds();
    while span > 1 {
        let mid = start + TimeDelta::seconds(span / 2);
        let mid_offset = oracle.offset_at(mid);
        if mid_offset == start_offset {
            start = mid;
        } else {
            end = mid;
            end_offset = mid_offset;
        }
        span = (end - start).num_seconds();
    }

    Ok(TransitionResult::Found {
        instant: end,
        new_offset: end_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tz;
    use chrono::TimeZone;
    use std::cell::Cell;

    fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
    }

    /// An oracle stepping from `before` to `after` at `step`.
    fn step(step: DateTime<Utc>, before: i32, after: i32) -> impl Fn(DateTime<Utc>) -> i32 {
        move |instant| if instant < step { before } else { after }
    }

    fn new_york() -> Tz {
        Tz::from_posix_tz("EST5EDT,M3.2.0,M11.1.0").unwrap()
    }

    fn found(instant: DateTime<Utc>, new_offset: i32) -> TransitionResult {
        TransitionResult::Found {
            instant,
            new_offset,
        }
    }

    #[test]
    fn spring_forward() {
        let result =
            find_next_transition(&new_york(), at(2024, 3, 10, 6, 59, 0), TimeDelta::hours(2));
        assert_eq!(result.unwrap(), found(at(2024, 3, 10, 7, 0, 0), -14400));
    }

    #[test]
    fn after_spring_forward() {
        let result =
            find_next_transition(&new_york(), at(2024, 3, 10, 8, 0, 0), TimeDelta::hours(2));
        assert_eq!(result.unwrap(), TransitionResult::NotFound);
    }

    #[test]
    fn new_york_2024() {
        let spring = at(2024, 3, 10, 7, 0, 0);
        let fall = at(2024, 11, 3, 6, 0, 0);
        let tz = new_york();
        let weeks_4 = TimeDelta::weeks(4);

        let cases = vec![
            (spring - TimeDelta::hours(1), Some((spring, -14400))),
            (fall - TimeDelta::hours(1), Some((fall, -18000))),
            (spring - TimeDelta::seconds(1), Some((spring, -14400))),
            (fall - TimeDelta::seconds(1), Some((fall, -18000))),
            (spring - TimeDelta::weeks(3), Some((spring, -14400))),
            (spring, None),
            (fall, None),
            (spring + TimeDelta::hours(1), None),
            (fall + TimeDelta::hours(1), None),
            (spring - TimeDelta::weeks(5), None),
            (fall - TimeDelta::weeks(5), None),
        ];

        for (start, expected) in cases {
            let result = find_next_transition(&tz, start, weeks_4).unwrap();
            assert_eq!(result.found(), expected, "start = {}", start);
        }
    }

    #[test]
    fn one_second_before() {
        let transition = at(2024, 6, 1, 0, 0, 0);
        let oracle = step(transition, 0, 3600);
        let start = transition - TimeDelta::seconds(1);
        let result = find_next_transition(&oracle, start, TimeDelta::hours(2)).unwrap();
        assert_eq!(result, found(start + TimeDelta::seconds(1), 3600));
    }

    #[test]
    fn starting_at_transition() {
        let transition = at(2024, 6, 1, 0, 0, 0);
        let oracle = step(transition, 0, 3600);
        let result = find_next_transition(&oracle, transition, TimeDelta::hours(2)).unwrap();
        assert_eq!(result, TransitionResult::NotFound);
    }

    #[test]
    fn transition_at_end_of_horizon() {
        let transition = at(2024, 6, 1, 0, 0, 0);
        let oracle = step(transition, 0, -3600);
        let start = transition - TimeDelta::hours(2);
        let result = find_next_transition(&oracle, start, TimeDelta::hours(2)).unwrap();
        assert_eq!(result, found(transition, -3600));
    }

    #[test]
    fn exact_for_every_step_position() {
        let start = at(2024, 1, 1, 0, 0, 0);
        for seconds in 1..=300 {
            let transition = start + TimeDelta::seconds(seconds);
            let oracle = step(transition, 100, 200);
            let result = find_next_transition(&oracle, start, TimeDelta::seconds(300)).unwrap();
            assert_eq!(result, found(transition, 200), "step at +{}s", seconds);
        }
    }

    #[test]
    fn sub_second_start_is_truncated() {
        let transition = at(2024, 3, 10, 7, 0, 0);
        let tz = new_york();
        for millis in [1, 250, 500, 999] {
            let start = transition - TimeDelta::seconds(1) + TimeDelta::milliseconds(millis);
            let result = find_next_transition(&tz, start, TimeDelta::hours(2)).unwrap();
            assert_eq!(result, found(transition, -14400), "{} ms", millis);
            assert_eq!(result.found().unwrap().0.timestamp_subsec_nanos(), 0);
        }

        // Truncation puts a start just past a transition back onto it.
        let start = transition + TimeDelta::milliseconds(400);
        let result = find_next_transition(&tz, start, TimeDelta::hours(2)).unwrap();
        assert_eq!(result, TransitionResult::NotFound);
    }

    #[test]
    fn sub_second_horizon() {
        let transition = at(2024, 6, 1, 0, 0, 0);
        let oracle = step(transition, 0, 3600);

        // Both ends fall in the same second.
        let start = transition - TimeDelta::milliseconds(900);
        let result = find_next_transition(&oracle, start, TimeDelta::milliseconds(500));
        assert_eq!(result.unwrap(), TransitionResult::NotFound);

        // The ends straddle the transition second.
        let start = transition - TimeDelta::milliseconds(300);
        let result = find_next_transition(&oracle, start, TimeDelta::milliseconds(500));
        assert_eq!(result.unwrap(), found(transition, 3600));
    }

    #[test]
    fn invalid_horizon() {
        let start = at(2024, 6, 1, 0, 0, 0);
        let oracle = |_: DateTime<Utc>| 0;
        for horizon in [TimeDelta::zero(), TimeDelta::seconds(-1), TimeDelta::weeks(-4)] {
            assert!(matches!(
                find_next_transition(&oracle, start, horizon),
                Err(Error::InvalidHorizon)
            ));
        }
        assert!(matches!(
            find_next_transition(&oracle, DateTime::<Utc>::MAX_UTC, TimeDelta::seconds(1)),
            Err(Error::InvalidHorizon)
        ));
    }

    #[test]
    fn fixed_offset_never_transitions() {
        let utc = Tz::from(Utc);
        let starts = [
            at(1970, 1, 1, 0, 0, 0),
            at(2024, 3, 10, 6, 59, 0),
            at(2024, 11, 3, 5, 59, 59),
        ];
        for start in starts {
            for horizon in [TimeDelta::seconds(1), TimeDelta::hours(2), TimeDelta::weeks(520)] {
                let result = find_next_transition(&utc, start, horizon).unwrap();
                assert_eq!(result, TransitionResult::NotFound);
            }
        }
    }

    #[test]
    fn cancelling_transitions_are_missed() {
        let start = at(2024, 1, 1, 0, 0, 0);
        let up = start + TimeDelta::hours(1);
        let down = start + TimeDelta::hours(2);
        let oracle = |instant: DateTime<Utc>| {
            if up <= instant && instant < down {
                3600
            } else {
                0
            }
        };
        let result = find_next_transition(&oracle, start, TimeDelta::hours(3)).unwrap();
        assert_eq!(result, TransitionResult::NotFound);
    }

    #[test]
    fn offsets_are_unbounded() {
        let transition = at(2024, 6, 1, 0, 0, 0);
        let oracle = step(transition, i32::MIN, i32::MAX);
        let start = transition - TimeDelta::days(3);
        let result = find_next_transition(&oracle, start, TimeDelta::weeks(1)).unwrap();
        assert_eq!(result, found(transition, i32::MAX));
    }

    #[test]
    fn idempotent() {
        let tz = new_york();
        let start = at(2024, 10, 20, 12, 34, 56);
        let first = find_next_transition(&tz, start, TimeDelta::weeks(4)).unwrap();
        let second = find_next_transition(&tz, start, TimeDelta::weeks(4)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, found(at(2024, 11, 3, 6, 0, 0), -18000));
    }

    #[test]
    fn query_count_is_logarithmic() {
        let horizon = TimeDelta::weeks(4);
        // ceil(log2(2_419_200)) halvings, plus the two endpoint queries.
        let limit = 2 + 22;

        let start = at(2024, 2, 20, 0, 0, 0);
        for transition in [
            start + TimeDelta::seconds(1),
            at(2024, 3, 10, 7, 0, 0),
            start + horizon,
        ] {
            let calls = Cell::new(0);
            let inner = step(transition, -18000, -14400);
            let oracle = |instant: DateTime<Utc>| {
                calls.set(calls.get() + 1);
                inner(instant)
            };
            let result = find_next_transition(&oracle, start, horizon).unwrap();
            assert_eq!(result, found(transition, -14400));
            assert!(calls.get() <= limit, "{} queries", calls.get());
        }

        let calls = Cell::new(0);
        let oracle = |_: DateTime<Utc>| {
            calls.set(calls.get() + 1);
            0
        };
        find_next_transition(&oracle, start, horizon).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn dyn_oracle() {
        let tz = new_york();
        let oracle: &dyn OffsetOracle = &tz;
        let result = find_next_transition(oracle, at(2024, 3, 10, 6, 0, 0), TimeDelta::hours(2));
        assert_eq!(result.unwrap(), found(at(2024, 3, 10, 7, 0, 0), -14400));
    }
}
