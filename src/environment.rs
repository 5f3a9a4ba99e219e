//! Where a request is being served from, and timezone-independent time
//! helpers. We don't know what timezone the host runs in, so timestamps are
//! always handled as UTC.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, TimeZone, Utc};
use rocket::request::{FromRequest, Outcome, Request};

use crate::error::{Error, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Requests addressed to `localhost` come from a development machine.
    pub fn from_base_url(base_url: &str) -> Self {
        let rest = base_url
            .strip_prefix("https://")
            .or_else(|| base_url.strip_prefix("http://"));
        let host = match rest {
            Some(rest) => rest.split('/').next().unwrap_or_default(),
            None => return Self::Production,
        };
        let (name, port) = match host.split_once(':') {
            Some((name, port)) => (name, Some(port)),
            None => (host, None),
        };
        let port_ok = port.map_or(true, |p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
        if name == "localhost" && port_ok {
            Self::Development
        } else {
            Self::Production
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "Development"),
            Self::Production => write!(f, "Production"),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Environment {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let host = req.headers().get_one("Host").unwrap_or_default();
        Outcome::Success(Environment::from_base_url(&format!("http://{host}/")))
    }
}

/// Convert seconds since the Unix epoch to a UTC datetime.
pub fn utc_from_epoch(seconds: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::bad_request(format!("Invalid Unix timestamp: {seconds}")))
}

/// Convert milliseconds since the Unix epoch to a UTC datetime.
pub fn utc_from_epoch_ms(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::bad_request(format!("Invalid Unix timestamp: {millis}ms")))
}
