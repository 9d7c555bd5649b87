//! POSIX TZ strings, as found in the footer of TZif files since version 2.
//!
//! The footer describes the rule in effect after the last transition stored
//! in the file, e.g. `EST5EDT,M3.2.0,M11.1.0`.

use chrono::{DateTime, Datelike, NaiveDate};

/// Rule time used when a rule has no explicit `/time` (02:00 local).
const DEFAULT_RULE_TIME: i32 = 2 * 3600;
/// Rule times may range over ±167 hours.
const MAX_RULE_TIME: i32 = 167 * 3600;
/// Offsets are below 25 hours.
const MAX_OFFSET: i32 = 24 * 3600 + 59 * 60 + 59;

/// A parsed POSIX TZ string.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PosixTz {
    /// Standard time offset, in seconds east of UTC.
    std: i32,
    dst: Option<Dst>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct Dst {
    /// Daylight time offset, in seconds east of UTC.
    offset: i32,
    /// When DST starts, in standard local time.
    start: (Rule, i32),
    /// When DST ends, in daylight local time.
    end: (Rule, i32),
}

/// The date on which DST starts or ends.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Rule {
    /// `Jn`: day 1..=365, February 29 is never counted.
    Julian1(u16),
    /// `n`: day 0..=365, February 29 is counted.
    Julian0(u16),
    /// `Mm.w.d`: day `d` (0 is Sunday) of week `w` (5 is the last) of month `m`.
    MonthWeekDay { month: u8, week: u8, weekday: u8 },
}

impl Rule {
    fn date(self, year: i32) -> Option<NaiveDate> {
        match self {
            Rule::Julian1(day) => {
                let leap = NaiveDate::from_ymd_opt(year, 2, 29).is_some();
                let ordinal = u32::from(day) + u32::from(leap && day > 59);
                NaiveDate::from_yo_opt(year, ordinal)
            }
            Rule::Julian0(day) => NaiveDate::from_yo_opt(year, u32::from(day) + 1)
                .or_else(|| NaiveDate::from_ymd_opt(year, 12, 31)),
            Rule::MonthWeekDay {
                month,
                week,
                weekday,
            } => {
                let first = NaiveDate::from_ymd_opt(year, month.into(), 1)?;
                let first_weekday = first.weekday().num_days_from_sunday();
                let mut day =
                    1 + (u32::from(weekday) + 7 - first_weekday) % 7 + 7 * (u32::from(week) - 1);
                // A fifth week does not exist in every month; fall back to the last.
                while first.with_day(day).is_none() {
                    day -= 7;
                }
                first.with_day(day)
            }
        }
    }

    /// Returns the UTC timestamp of this rule in `year`, given the rule time
    /// and the local offset the rule time is expressed in.
    fn timestamp(self, year: i32, time: i32, offset: i32) -> Option<i64> {
        let midnight = self.date(year)?.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
        Some(midnight + i64::from(time) - i64::from(offset))
    }
}

impl PosixTz {
    /// Parses a TZ string such as `CET-1CEST,M3.5.0,M10.5.0/3`.
    ///
    /// Returns `None` if the string is not a valid TZ string.
    pub(crate) fn parse(source: &[u8]) -> Option<Self> {
        let mut scanner = Scanner(source);
        scanner.name()?;
        let std = scanner.offset()?;
        if scanner.is_empty() {
            return Some(Self { std, dst: None });
        }

        scanner.name()?;
        let offset = if scanner.peek() == Some(b',') {
            std.checked_add(3600)?
        } else {
            scanner.offset()?
        };
        scanner.eat(b',')?;
        let start = scanner.rule()?;
        scanner.eat(b',')?;
        let end = scanner.rule()?;
        if !scanner.is_empty() {
            return None;
        }

        Some(Self {
            std,
            dst: Some(Dst { offset, start, end }),
        })
    }

    /// Obtains the UTC offset in seconds at the UTC timestamp.
    pub(crate) fn offset_at(&self, timestamp: i64) -> i32 {
        let Some(dst) = self.dst else {
            return self.std;
        };

        // Rule times may push a transition up to a week into a neighbouring
        // year, so the transitions of the years around the standard local
        // year are all candidates.
        let year = match DateTime::from_timestamp(timestamp.saturating_add(self.std.into()), 0) {
            Some(local) => local.year(),
            None => return self.std,
        };
        let (start_rule, start_time) = dst.start;
        let (end_rule, end_time) = dst.end;
        (year - 1..=year + 1)
            .flat_map(|year| {
                [
                    start_rule
                        .timestamp(year, start_time, self.std)
                        .map(|at| (at, dst.offset)),
                    end_rule
                        .timestamp(year, end_time, dst.offset)
                        .map(|at| (at, self.std)),
                ]
            })
            .flatten()
            .filter(|&(at, _)| at <= timestamp)
            // On a tie the later rule wins, so DST ending one year exactly as
            // it starts the next stays in effect.
            .max_by_key(|&(at, _)| at)
            .map_or(self.std, |(_, offset)| offset)
    }
}

struct Scanner<'a>(&'a [u8]);

impl<'a> Scanner<'a> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn peek(&self) -> Option<u8> {
        self.0.first().copied()
    }

    fn bump(&mut self) {
        if let Some((_, rest)) = self.0.split_first() {
            self.0 = rest;
        }
    }

    fn eat(&mut self, expected: u8) -> Option<()> {
        if self.peek()? != expected {
            return None;
        }
        self.bump();
        Some(())
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a [u8] {
        let len = self
            .0
            .iter()
            .position(|&b| !pred(b))
            .unwrap_or(self.0.len());
        let (head, tail) = self.0.split_at(len);
        self.0 = tail;
        head
    }

    /// Skips a time zone abbreviation, either `<...>` or at least three letters.
    fn name(&mut self) -> Option<()> {
        if self.peek()? == b'<' {
            self.bump();
            let name = self.take_while(|b| b != b'>');
            self.eat(b'>')?;
            (!name.is_empty()).then_some(())
        } else {
            let name = self.take_while(|b| b.is_ascii_alphabetic());
            (name.len() >= 3).then_some(())
        }
    }

    fn number(&mut self, max_digits: usize) -> Option<i32> {
        let digits = self.take_while(|b| b.is_ascii_digit());
        if digits.is_empty() || digits.len() > max_digits {
            return None;
        }
        Some(
            digits
                .iter()
                .fold(0, |acc, &d| acc * 10 + i32::from(d - b'0')),
        )
    }

    fn minutes_or_seconds(&mut self) -> Option<i32> {
        self.number(2).filter(|&n| n < 60)
    }

    /// Parses `[+-]h[hh][:mm[:ss]]` into seconds.
    fn hms(&mut self, max: i32) -> Option<i32> {
        let sign = match self.peek() {
            Some(b'-') => {
                self.bump();
                -1
            }
            Some(b'+') => {
                self.bump();
                1
            }
            _ => 1,
        };
        let mut total = self.number(3)? * 3600;
        if self.peek() == Some(b':') {
            self.bump();
            total += self.minutes_or_seconds()? * 60;
            if self.peek() == Some(b':') {
                self.bump();
                total += self.minutes_or_seconds()?;
            }
        }
        (total <= max).then_some(sign * total)
    }

    /// POSIX offsets count westward, the opposite of UTC offsets.
    fn offset(&mut self) -> Option<i32> {
        self.hms(MAX_OFFSET).map(|seconds| -seconds)
    }

    fn rule(&mut self) -> Option<(Rule, i32)> {
        let rule = match self.peek()? {
            b'J' => {
                self.bump();
                let day = self.number(3).filter(|d| (1..=365).contains(d))?;
                Rule::Julian1(u16::try_from(day).ok()?)
            }
            b'M' => {
                self.bump();
                let month = self.number(2).filter(|m| (1..=12).contains(m))?;
                self.eat(b'.')?;
                let week = self.number(1).filter(|w| (1..=5).contains(w))?;
                self.eat(b'.')?;
                let weekday = self.number(1).filter(|d| (0..=6).contains(d))?;
                Rule::MonthWeekDay {
                    month: u8::try_from(month).ok()?,
                    week: u8::try_from(week).ok()?,
                    weekday: u8::try_from(weekday).ok()?,
                }
            }
            _ => {
                let day = self.number(3).filter(|d| (0..=365).contains(d))?;
                Rule::Julian0(u16::try_from(day).ok()?)
            }
        };
        let time = if self.peek() == Some(b'/') {
            self.bump();
            self.hms(MAX_RULE_TIME)?
        } else {
            DEFAULT_RULE_TIME
        };
        Some((rule, time))
    }
}
