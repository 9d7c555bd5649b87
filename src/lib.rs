//! `tzwatch` finds when the UTC offset of a time zone next changes.
//!
//! Time zones are read from the system tz database (the compiled files
//! inside `/usr/share/zoneinfo`) and treated as an oracle mapping an instant
//! to an offset. [`find_next_transition()`] bisects that oracle to locate
//! the next change within a horizon, to the second.
//!
//! # Examples
//!
//! ```
//! use chrono::{TimeDelta, TimeZone, Utc};
//! use tzwatch::{find_next_transition, Tz, TransitionResult};
//!
//! let tz = Tz::from_posix_tz("EST5EDT,M3.2.0,M11.1.0")?;
//! let start = Utc.with_ymd_and_hms(2024, 3, 10, 6, 59, 0).unwrap();
//! let result = find_next_transition(&tz, start, TimeDelta::hours(2))?;
//! assert_eq!(
//!     result,
//!     TransitionResult::Found {
//!         instant: Utc.with_ymd_and_hms(2024, 3, 10, 7, 0, 0).unwrap(),
//!         new_offset: -14400,
//!     }
//! );
//!
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

use chrono::{DateTime, Utc};
use std::error;
use std::fmt;
use std::io;

mod posix;
mod transition;
mod tz;

pub use transition::{find_next_transition, TransitionResult};
pub use tz::{ParseError, Tz, ZoneDb};

/// Maps an instant to the offset from UTC, in seconds, in effect at that
/// instant.
///
/// Implementations must be pure: the same instant always yields the same
/// offset. Besides [`Tz`], any `Fn(DateTime<Utc>) -> i32` is an oracle.
pub trait OffsetOracle {
    /// Obtains the offset from UTC in seconds at `instant`.
    fn offset_at(&self, instant: DateTime<Utc>) -> i32;
}

impl<F> OffsetOracle for F
where
    F: Fn(DateTime<Utc>) -> i32,
{
    fn offset_at(&self, instant: DateTime<Utc>) -> i32 {
        self(instant)
    }
}

/// Errors from resolving a time zone or searching it for transitions.
///
/// Finding no transition is not an error; see [`TransitionResult::NotFound`].
#[derive(Debug)]
pub enum Error {
    /// The time zone identifier does not resolve to a tz database entry.
    InvalidTimezone {
        /// The identifier as given.
        name: Box<str>,
        /// Why reading or parsing the entry failed.
        source: io::Error,
    },
    /// The search horizon is not positive, or its end is not representable.
    InvalidHorizon,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidTimezone { name, source } => {
                write!(f, "invalid time zone {:?}: {}", name, source)
            }
            Error::InvalidHorizon => f.write_str("invalid search horizon"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::InvalidTimezone { source, .. } => Some(source),
            Error::InvalidHorizon => None,
        }
    }
}
