use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The Asana user a token set was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsanaUser {
    pub gid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Tokens returned by the token endpoint after a code exchange or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Asana describes the authorizing user under `data`.
    #[serde(rename = "data", default)]
    pub user: Option<AsanaUser>,
}

impl TokenSet {
    /// When the access token expires, if the provider said. A lifetime too
    /// long to represent is treated as no expiry at all.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lifetime = Duration::from_std(StdDuration::from_secs(self.expires_in?)).ok()?;
        now.checked_add_signed(lifetime)
    }
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::serde_json;

    use super::*;

    #[test]
    fn parses_code_exchange_response() {
        let body = r#"{
            "access_token": "f6ds7fdsa69ags7ag9sd5a",
            "expires_in": 3600,
            "token_type": "bearer",
            "data": {
                "id": 4673218951,
                "gid": "4673218951",
                "name": "Greg Sanchez",
                "email": "gsanchez@example.com"
            },
            "refresh_token": "hjkl325hjkl4325hj4kl32fjds"
        }"#;
        let tokens: TokenSet = serde_json::from_str(body).unwrap();
        assert_eq!(tokens.access_token, "f6ds7fdsa69ags7ag9sd5a");
        assert_eq!(tokens.refresh_token.as_deref(), Some("hjkl325hjkl4325hj4kl32fjds"));
        assert_eq!(tokens.user.unwrap().gid, "4673218951");
    }

    #[test]
    fn refresh_response_may_omit_refresh_token_and_user() {
        let body = r#"{"access_token": "new", "expires_in": 3600, "token_type": "bearer"}"#;
        let tokens: TokenSet = serde_json::from_str(body).unwrap();
        assert_eq!(tokens.refresh_token, None);
        assert_eq!(tokens.user, None);
    }

    #[test]
    fn expiry_is_relative_to_now() {
        let now = Utc::now();
        let tokens = TokenSet {
            access_token: "a".to_string(),
            refresh_token: None,
            token_type: None,
            expires_in: Some(3600),
            user: None,
        };
        assert_eq!(tokens.expires_at(now), Some(now + Duration::hours(1)));

        let forever = TokenSet {
            expires_in: None,
            ..tokens
        };
        assert_eq!(forever.expires_at(now), None);
    }

    #[test]
    fn absurd_lifetimes_mean_no_expiry() {
        let body = r#"{"access_token": "a", "expires_in": 100000000000000000}"#;
        let tokens: TokenSet = serde_json::from_str(body).unwrap();
        assert_eq!(tokens.expires_at(Utc::now()), None);

        let tokens = TokenSet {
            expires_in: Some(u64::MAX),
            ..tokens
        };
        assert_eq!(tokens.expires_at(Utc::now()), None);
    }
}
