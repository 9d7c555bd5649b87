use chrono::{DateTime, TimeDelta, Utc};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use hyper::{Request, Response, StatusCode};
use log::{debug, error, info};
use serde::Serialize;
use std::time::Instant;
use tzwatch::{find_next_transition, Error, OffsetOracle, TransitionResult, ZoneDb};

const TIMEZONE_HEADER: &str = "x-timezone";

/// Source of the current instant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Clock {
    /// The system wall clock.
    System,
    /// Always the given instant.
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(now) => now,
        }
    }
}

/// `[now_millis, offset, transition_millis, transition_offset]`, the body of a
/// `/time` response. The transition fields are `null` when no transition
/// falls within the horizon.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct TimeReport(pub i64, pub i32, pub Option<i64>, pub Option<i32>);

/// Everything a request needs; shared read-only between connections.
#[derive(Debug)]
pub struct State {
    zones: ZoneDb,
    clock: Clock,
    horizon: TimeDelta,
}

impl State {
    pub fn new(zones: ZoneDb, clock: Clock, horizon: TimeDelta) -> Self {
        Self {
            zones,
            clock,
            horizon,
        }
    }

    pub fn report(&self, timezone: &str) -> Result<TimeReport, Error> {
        let tz = self.zones.load(timezone)?;
        let now = self.clock.now();
        let (transition_millis, transition_offset) =
            match find_next_transition(&tz, now, self.horizon)? {
                TransitionResult::Found {
                    instant,
                    new_offset,
                } => (Some(instant.timestamp_millis()), Some(new_offset)),
                TransitionResult::NotFound => (None, None),
            };
        Ok(TimeReport(
            now.timestamp_millis(),
            tz.offset_at(now),
            transition_millis,
            transition_offset,
        ))
    }

    pub fn handle<B>(&self, request: &Request<B>) -> Response<Full<Bytes>> {
        let started = Instant::now();
        let path = request.uri().path();
        // An absent or empty header means UTC; one that is not text is invalid.
        let timezone = match request.headers().get(TIMEZONE_HEADER).map(HeaderValue::to_str) {
            None | Some(Ok("")) => Some(ZoneDb::UTC),
            Some(value) => value.ok(),
        };

        let response = match (path, timezone) {
            ("/time", Some(timezone)) => self.respond(timezone),
            ("/time", None) => text(StatusCode::BAD_REQUEST, "invalid timezone\n"),
            _ => text(StatusCode::NOT_FOUND, "404 page not found\n"),
        };
        info!(
            "{} {} timezone={:?} {} {:?}",
            request.method(),
            path,
            timezone.unwrap_or("<invalid>"),
            response.status().as_u16(),
            started.elapsed()
        );
        response
    }

    fn respond(&self, timezone: &str) -> Response<Full<Bytes>> {
        let report = match self.report(timezone) {
            Ok(report) => report,
            Err(e @ Error::InvalidTimezone { .. }) => {
                debug!("{}", e);
                return text(StatusCode::BAD_REQUEST, "invalid timezone\n");
            }
            Err(e) => {
                error!("{}: {}", timezone, e);
                return text(StatusCode::INTERNAL_SERVER_ERROR, "internal error\n");
            }
        };
        match serde_json::to_vec(&report) {
            Ok(mut body) => {
                body.push(b'\n');
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => {
                error!("cannot encode {:?}: {}", report, e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "internal error\n")
            }
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}
