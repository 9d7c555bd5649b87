//! Time zones parsed from compiled (binary) tz database files.

use crate::posix::PosixTz;
use crate::transition::{find_next_transition, TransitionResult};
use crate::{Error, OffsetOracle};
use byteorder::{ByteOrder, BE};
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use std::env;
use std::error;
use std::fmt;
use std::fs::read;
use std::io;
use std::mem::size_of;
use std::path::{Path, PathBuf};

/// Directory of the system tz database, unless `$TZDIR` says otherwise.
const DEFAULT_TZDIR: &str = "/usr/share/zoneinfo";

/// Time zone parsed from a tz database file.
///
/// A `Tz` is immutable, so one instance may be shared between threads and
/// queried concurrently through [`OffsetOracle`].
///
/// # Examples
///
/// Read the time zone information from the system.
///
/// ```
/// # #[cfg(unix)] {
/// use chrono::{TimeZone, Utc};
/// use tzwatch::{OffsetOracle, Tz};
///
/// let tz = Tz::named("America/New_York")?;
/// let before = Utc.with_ymd_and_hms(2019, 3, 10, 6, 45, 0).unwrap();
/// assert_eq!(tz.offset_at(before), -18000);
/// let after = Utc.with_ymd_and_hms(2019, 3, 10, 7, 15, 0).unwrap();
/// assert_eq!(tz.offset_at(after), -14400);
///
/// # } Ok::<_, std::io::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tz {
    /// Sorted array of transitions. The first item of the tuple is the
    /// starting UTC timestamp, and second item is the offset from UTC in
    /// seconds from then on. The first entry always starts at `i64::MIN`.
    transitions: Box<[(i64, i32)]>,
    /// The rule in effect from the last transition onwards.
    footer: Option<PosixTz>,
}

/// Extracts the lower bound index from the result of standard `binary_search`.
fn to_lower_bound(bsr: Result<usize, usize>) -> usize {
    bsr.unwrap_or_else(|i| i - 1)
}

impl Tz {
    /// Obtains the offset from UTC in seconds at the UTC timestamp.
    pub fn offset_at_timestamp(&self, timestamp: i64) -> i32 {
        let index = to_lower_bound(
            self.transitions
                .binary_search_by(|&(utc, _)| utc.cmp(&timestamp)),
        );
        match self.footer {
            Some(footer) if index + 1 == self.transitions.len() => footer.offset_at(timestamp),
            _ => self.transitions[index].1,
        }
    }

    fn fixed(offset: i32) -> Self {
        Self {
            transitions: vec![(i64::MIN, offset)].into_boxed_slice(),
            footer: None,
        }
    }
}

impl OffsetOracle for Tz {
    fn offset_at(&self, instant: DateTime<Utc>) -> i32 {
        self.offset_at_timestamp(instant.timestamp())
    }
}

/// Parse errors from [`Tz::parse()`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ParseError {
    /// The source bytes is too short to parse the header.
    HeaderTooShort,
    /// The source does not start with the correct magic string (`"TZif"`).
    InvalidMagic,
    /// Unsupported tzfile version. Currently we only support versions 2 to 4.
    UnsupportedVersion,
    /// The lengths of several related arrays in the file are not the same,
    /// making the file invalid.
    InconsistentTypeCount,
    /// The tzfile contains no time zone information.
    NoTypes,
    /// The time zone offset exceeds ±86400s (1 day).
    OffsetOverflow,
    /// The source bytes is too short to parse the content.
    DataTooShort,
    /// Invalid time zone file name.
    InvalidTimeZoneFileName,
    /// The time zone transition type is invalid.
    InvalidType,
    /// Name offset is out of bounds.
    NameOffsetOutOfBounds,
    /// The POSIX TZ string, either in the footer or given directly, is invalid.
    InvalidPosixTz,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("tzif error: ")?;
        f.write_str(match self {
            ParseError::HeaderTooShort => "header too short",
            ParseError::InvalidMagic => "invalid magic",
            ParseError::UnsupportedVersion => "unsupported version",
            ParseError::InconsistentTypeCount => "inconsistent type count",
            ParseError::NoTypes => "no types",
            ParseError::OffsetOverflow => "time zone offset overflow",
            ParseError::DataTooShort => "data too short",
            ParseError::InvalidTimeZoneFileName => "invalid time zone file name",
            ParseError::InvalidType => "invalid time zone transition type",
            ParseError::NameOffsetOutOfBounds => "name offset out of bounds",
            ParseError::InvalidPosixTz => "invalid POSIX TZ string",
        })
    }
}

impl error::Error for ParseError {}

impl From<ParseError> for io::Error {
    fn from(e: ParseError) -> io::Error {
        io::Error::new(io::ErrorKind::Other, e)
    }
}

static MAGIC: [u8; 4] = *b"TZif";

struct Header {
    tzh_ttisgmtcnt: usize,
    tzh_ttisstdcnt: usize,
    tzh_leapcnt: usize,
    tzh_timecnt: usize,
    tzh_typecnt: usize,
    tzh_charcnt: usize,
}

impl Header {
    /// Parses the header from the prefix of the `source`.
    fn parse(source: &[u8]) -> Result<Self, ParseError> {
        if source.len() < Self::HEADER_LEN {
            return Err(ParseError::HeaderTooShort);
        }
        if source[..4] != MAGIC {
            return Err(ParseError::InvalidMagic);
        }
        match source[4] {
            b'2' | b'3' | b'4' => {}
            _ => return Err(ParseError::UnsupportedVersion),
        }
        let tzh_ttisgmtcnt = BE::read_u32(&source[20..24]) as usize;
        let tzh_ttisstdcnt = BE::read_u32(&source[24..28]) as usize;
        let tzh_leapcnt = BE::read_u32(&source[28..32]) as usize;
        let tzh_timecnt = BE::read_u32(&source[32..36]) as usize;
        let tzh_typecnt = BE::read_u32(&source[36..40]) as usize;
        let tzh_charcnt = BE::read_u32(&source[40..44]) as usize;

        if (tzh_ttisgmtcnt != 0 && tzh_ttisgmtcnt != tzh_typecnt)
            || (tzh_ttisstdcnt != 0 && tzh_ttisstdcnt != tzh_typecnt)
        {
            return Err(ParseError::InconsistentTypeCount);
        }
        if tzh_typecnt == 0 {
            return Err(ParseError::NoTypes);
        }

        Ok(Header {
            tzh_ttisgmtcnt,
            tzh_ttisstdcnt,
            tzh_leapcnt,
            tzh_timecnt,
            tzh_typecnt,
            tzh_charcnt,
        })
    }

    /// The length of the header.
    const HEADER_LEN: usize = 44;

    /// The length of the content, when `time_t` is represented by type `L`.
    fn data_len<L>(&self) -> usize {
        self.tzh_timecnt * (size_of::<L>() + 1)
            + self.tzh_typecnt * 6
            + self.tzh_charcnt
            + self.tzh_leapcnt * (size_of::<L>() + 4)
            + self.tzh_ttisstdcnt
            + self.tzh_ttisgmtcnt
    }

    /// Parses the transitions from the prefix of the 64-bit `content`.
    fn parse_content(&self, content: &[u8]) -> Result<Box<[(i64, i32)]>, ParseError> {
        // Obtain the byte indices where each array ends.
        let trans_encoded_end = self.tzh_timecnt * 8;
        let local_time_types_end = trans_encoded_end + self.tzh_timecnt;
        let infos_end = local_time_types_end + self.tzh_typecnt * 6;

        // Collect the offsets of each local time type.
        let offsets = content[local_time_types_end..infos_end]
            .chunks_exact(6)
            .map(|encoded| {
                let seconds = BE::read_i32(&encoded[..4]);
                if FixedOffset::east_opt(seconds).is_none() {
                    return Err(ParseError::OffsetOverflow);
                }
                if usize::from(encoded[5]) >= self.tzh_charcnt {
                    return Err(ParseError::NameOffsetOutOfBounds);
                }
                Ok(seconds)
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        // Collect the transition times.
        let trans_encoded = &content[..trans_encoded_end];
        let local_time_types = &content[trans_encoded_end..local_time_types_end];

        let mut transitions = Vec::with_capacity(self.tzh_timecnt + 1);
        transitions.push((i64::MIN, offsets[0]));
        for (te, &ltt) in trans_encoded.chunks_exact(8).zip(local_time_types) {
            let offset = *offsets.get(usize::from(ltt)).ok_or(ParseError::InvalidType)?;
            transitions.push((BE::read_i64(te), offset));
        }
        Ok(transitions.into_boxed_slice())
    }
}

/// Parses the `\n<TZ string>\n` footer following the 64-bit data block.
fn parse_footer(source: &[u8]) -> Result<Option<PosixTz>, ParseError> {
    if source.is_empty() {
        return Ok(None);
    }
    let source = source.strip_prefix(b"\n").ok_or(ParseError::InvalidPosixTz)?;
    let end = source
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(ParseError::InvalidPosixTz)?;
    match &source[..end] {
        [] => Ok(None),
        tz => PosixTz::parse(tz)
            .map(Some)
            .ok_or(ParseError::InvalidPosixTz),
    }
}

impl Tz {
    /// Parses the content of the tz database file.
    ///
    /// This crate can recognize versions 2 to 4 of the tz database. Leap
    /// second information is ignored. The embedded POSIX TZ string describes
    /// the transitions after the last one stored in the file, and is used for
    /// all instants from then on.
    ///
    /// # Examples
    ///
    /// Read a file into bytes and then parse it.
    ///
    /// ```rust
    /// # #[cfg(unix)] {
    /// use tzwatch::Tz;
    ///
    /// let content = std::fs::read("/usr/share/zoneinfo/Etc/UTC")?;
    /// let tz = Tz::parse(&content)?;
    ///
    /// # } Ok::<_, Box<dyn std::error::Error>>(())
    /// ```
    pub fn parse(source: &[u8]) -> Result<Self, ParseError> {
        let header = Header::parse(source)?;
        let first_ver_len = Header::HEADER_LEN + header.data_len::<i32>();
        let source = source.get(first_ver_len..).ok_or(ParseError::DataTooShort)?;
        let header = Header::parse(source)?;
        let second_ver_len = Header::HEADER_LEN + header.data_len::<i64>();
        if source.len() < second_ver_len {
            return Err(ParseError::DataTooShort);
        }
        let transitions = header.parse_content(&source[Header::HEADER_LEN..])?;
        let footer = parse_footer(&source[second_ver_len..])?;
        Ok(Tz {
            transitions,
            footer,
        })
    }

    /// Builds a time zone from a POSIX TZ string alone, such as
    /// `"EST5EDT,M3.2.0,M11.1.0"`.
    pub fn from_posix_tz(tz: &str) -> Result<Self, ParseError> {
        let footer = PosixTz::parse(tz.as_bytes()).ok_or(ParseError::InvalidPosixTz)?;
        Ok(Tz {
            transitions: vec![(i64::MIN, footer.offset_at(i64::MIN))].into_boxed_slice(),
            footer: Some(footer),
        })
    }

    /// Reads and parses a system time zone.
    ///
    /// This function is equivalent to reading `$TZDIR/{name}` if the environment variable `$TZDIR`
    /// is set or `/usr/share/zoneinfo/{name}` if it isn't, then constructing a time zone via
    /// [`parse()`](Tz::parse).
    ///
    /// This function is currently only supported on Unix.
    #[cfg(unix)]
    pub fn named(name: &str) -> io::Result<Self> {
        let dir = env::var_os("TZDIR").unwrap_or_else(|| DEFAULT_TZDIR.into());
        Self::named_in(Path::new(&dir), name)
    }

    /// Reads and parses the time zone `name` from the tz database at `dir`.
    pub fn named_in(dir: &Path, name: &str) -> io::Result<Self> {
        if name.is_empty() || name.starts_with('/') || name.contains('.') {
            return Err(ParseError::InvalidTimeZoneFileName.into());
        }
        let content = read(dir.join(name))?;
        Ok(Self::parse(&content)?)
    }
}

impl From<chrono::Utc> for Tz {
    fn from(_: chrono::Utc) -> Self {
        Self::fixed(0)
    }
}

impl From<FixedOffset> for Tz {
    fn from(offset: FixedOffset) -> Self {
        Self::fixed(offset.local_minus_utc())
    }
}

/// Resolves time zone identifiers against a tz database directory.
///
/// This is the named form of [`OffsetOracle`]: every operation takes an
/// identifier such as `"America/New_York"` and fails with
/// [`Error::InvalidTimezone`] if it does not resolve. `"UTC"` always
/// resolves, without reading the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneDb {
    dir: PathBuf,
}

impl ZoneDb {
    /// The identifier that resolves even without a tz database.
    pub const UTC: &'static str = "UTC";

    /// Creates a database reading zones from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a database reading zones from `$TZDIR`, or
    /// `/usr/share/zoneinfo` if it is not set.
    pub fn system() -> Self {
        Self::new(env::var_os("TZDIR").unwrap_or_else(|| DEFAULT_TZDIR.into()))
    }

    /// The directory zones are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Loads the time zone `timezone`.
    pub fn load(&self, timezone: &str) -> Result<Tz, Error> {
        if timezone == Self::UTC {
            return Ok(Tz::from(Utc));
        }
        Tz::named_in(&self.dir, timezone).map_err(|source| Error::InvalidTimezone {
            name: timezone.into(),
            source,
        })
    }

    /// Obtains the offset from UTC in seconds of `timezone` at `instant`.
    pub fn offset_at(&self, timezone: &str, instant: DateTime<Utc>) -> Result<i32, Error> {
        Ok(self.load(timezone)?.offset_at(instant))
    }

    /// Finds the next offset transition of `timezone` within `horizon` after
    /// `start`. See [`find_next_transition()`].
    pub fn find_next_transition(
        &self,
        timezone: &str,
        start: DateTime<Utc>,
        horizon: TimeDelta,
    ) -> Result<TransitionResult, Error> {
        find_next_transition(&self.load(timezone)?, start, horizon)
    }
}
