use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use rand::Rng;
use rocket::{
    http::{Cookie, SameSite, Status},
    serde::json::serde_json,
    time::Duration,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const STATE_COOKIE: &str = "oauth_state";
/// How long a user has to complete the authorization.
const STATE_TTL_MINUTES: i64 = 10;
const NONCE_BYTES: usize = 16;

/// The `state` parameter of an authorization request: a random nonce plus an
/// HMAC tag, so forged or tampered values are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    nonce: String,
}

impl OAuthState {
    pub fn random() -> Self {
        let mut nonce = [0_u8; NONCE_BYTES];
        rand::thread_rng().fill(&mut nonce);
        Self {
            nonce: HEXLOWER.encode(&nonce),
        }
    }

    fn mac(nonce: &str, secret: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| {
            Error::Status(Status::InternalServerError, format!("Bad state secret: {e}"))
        })?;
        mac.update(nonce.as_bytes());
        Ok(mac)
    }

    /// `<nonce>.<hex tag>`
    pub fn sign(&self, secret: &[u8]) -> Result<String> {
        let tag = Self::mac(&self.nonce, secret)?.finalize().into_bytes();
        Ok(format!("{}.{}", self.nonce, HEXLOWER.encode(&tag)))
    }

    /// Check a signed state string, returning the state it carries.
    pub fn verify(signed: &str, secret: &[u8]) -> Result<Self> {
        let invalid = || Error::bad_request("Invalid OAuth state");
        let (nonce, tag) = signed.split_once('.').ok_or_else(invalid)?;
        let tag = HEXLOWER.decode(tag.as_bytes()).map_err(|_| invalid())?;
        Self::mac(nonce, secret)?
            .verify_slice(&tag)
            .map_err(|_| invalid())?;
        Ok(Self {
            nonce: nonce.to_string(),
        })
    }
}

/// An authorization in progress, remembered in a private cookie between the
/// redirect to Asana and the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub redirect_uri: String,
}

impl PendingAuthorization {
    pub fn into_cookie(self) -> Result<Cookie<'static>> {
        let value = serde_json::to_string(&self)
            .map_err(|e| Error::Status(Status::InternalServerError, e.to_string()))?;
        Ok(Cookie::build(STATE_COOKIE, value)
            .max_age(Duration::minutes(STATE_TTL_MINUTES))
            .http_only(true)
            .same_site(SameSite::Lax)
            .finish())
    }

    pub fn from_cookie(cookie: &Cookie<'_>) -> Result<Self> {
        serde_json::from_str(cookie.value())
            .map_err(|_| Error::bad_request("Malformed OAuth state cookie"))
    }

    /// Check the callback's `state` parameter against this authorization.
    pub fn check(&self, returned_state: &str, secret: &[u8]) -> Result<()> {
        OAuthState::verify(returned_state, secret)?;
        if returned_state != self.state {
            return Err(Error::bad_request("OAuth state does not match this session"));
        }
        Ok(())
    }
}
