use chrono::{DateTime, Duration, Utc};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions},
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    mongodb::{key_filter, Coll},
    oauth::TokenSet,
};

/// Access tokens this close to expiry are treated as already expired.
const EXPIRY_MARGIN_SECONDS: i64 = 60;

/// One user's Asana tokens. Mutated on login and on refresh, read on every
/// authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredentials {
    #[serde(rename = "_id")]
    pub key: String,
    pub user_id: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<BsonDateTime>,
}

impl UserCredentials {
    pub fn key(user_id: &str) -> String {
        format!("user_credentials_{user_id}")
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at.map(|dt| dt.to_chrono())
    }

    /// Whether the access token must be refreshed before use.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.expires_at()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(_), Some(expires_at)) => {
                expires_at - Duration::seconds(EXPIRY_MARGIN_SECONDS) <= now
            }
        }
    }

    pub async fn load(credentials: &Coll<UserCredentials>, user_id: &str) -> Result<Self> {
        credentials
            .find_one(key_filter(&Self::key(user_id)), None)
            .await?
            .ok_or_else(|| Error::not_found(format!("Credentials for user {user_id}")))
    }

    /// Upsert the tokens from a code exchange or refresh.
    ///
    /// Providers don't always send a new refresh token on refresh; the stored
    /// one is kept in that case.
    pub async fn store(
        credentials: &Coll<UserCredentials>,
        user_id: &str,
        tokens: &TokenSet,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut set = doc! {
            "user_id": user_id,
            "access_token": &tokens.access_token,
            "expires_at": tokens.expires_at(now).map(BsonDateTime::from_chrono),
        };
        if let Some(refresh_token) = &tokens.refresh_token {
            set.insert("refresh_token", refresh_token);
        }
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        credentials
            .find_one_and_update(key_filter(&Self::key(user_id)), doc! { "$set": set }, options)
            .await?
            .ok_or_else(|| {
                Error::Corrupt(
                    Self::key(user_id),
                    "upsert returned no document".to_string(),
                )
            })
    }

    /// Store only a refresh token, leaving any access token alone.
    pub async fn store_refresh_token(
        credentials: &Coll<UserCredentials>,
        user_id: &str,
        refresh_token: &str,
    ) -> Result<()> {
        let update = doc! {
            "$set": {
                "user_id": user_id,
                "refresh_token": refresh_token,
            }
        };
        let options = UpdateOptions::builder().upsert(true).build();
        credentials
            .update_one(key_filter(&Self::key(user_id)), update, options)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod examples {
    use super::*;

    impl UserCredentials {
        pub fn example(expires_at: Option<DateTime<Utc>>) -> Self {
            Self {
                key: Self::key("1204"),
                user_id: "1204".to_string(),
                access_token: Some("access".to_string()),
                refresh_token: Some("refresh".to_string()),
                expires_at: expires_at.map(BsonDateTime::from_chrono),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_by_user_id() {
        assert_eq!(UserCredentials::key("1204"), "user_credentials_1204");
    }

    #[test]
    fn expiry_includes_margin() {
        let now = Utc::now();
        let fresh = UserCredentials::example(Some(now + Duration::minutes(30)));
        assert!(!fresh.is_expired(now));

        let nearly = UserCredentials::example(Some(now + Duration::seconds(30)));
        assert!(nearly.is_expired(now));

        let stale = UserCredentials::example(Some(now - Duration::minutes(1)));
        assert!(stale.is_expired(now));
    }

    #[test]
    fn missing_access_token_is_expired() {
        let mut creds = UserCredentials::example(None);
        assert!(!creds.is_expired(Utc::now()));
        creds.access_token = None;
        assert!(creds.is_expired(Utc::now()));
    }

    fn tokens(access: &str, refresh: Option<&str>) -> TokenSet {
        TokenSet {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            token_type: Some("bearer".to_string()),
            expires_in: Some(3600),
            user: None,
        }
    }

    #[backend_test]
    async fn refresh_keeps_previous_refresh_token(credentials: Coll<UserCredentials>) {
        let now = Utc::now();
        let stored = UserCredentials::store(&credentials, "1204", &tokens("a1", Some("r1")), now)
            .await
            .unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("a1"));
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
        assert_eq!(
            stored.expires_at().map(|t| t.timestamp_millis()),
            Some((now + Duration::seconds(3600)).timestamp_millis())
        );

        let stored = UserCredentials::store(&credentials, "1204", &tokens("a2", None), now)
            .await
            .unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("a2"));
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
        assert_eq!(
            UserCredentials::load(&credentials, "1204").await.unwrap(),
            stored
        );
    }

    #[backend_test]
    async fn refresh_token_stored_alone(credentials: Coll<UserCredentials>) {
        UserCredentials::store_refresh_token(&credentials, "99", "r")
            .await
            .unwrap();
        let loaded = UserCredentials::load(&credentials, "99").await.unwrap();
        assert_eq!(loaded.access_token, None);
        assert_eq!(loaded.refresh_token.as_deref(), Some("r"));
        assert!(loaded.is_expired(Utc::now()));

        assert!(UserCredentials::load(&credentials, "nobody").await.is_err());
    }
}
