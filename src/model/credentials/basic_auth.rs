use argon2::Config as Argon2Config;
use data_encoding::BASE64;
use log::warn;
use rand::Rng;
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::{errors::is_duplicate_key_error, key_filter, Coll};
use crate::Config;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// A user allowed through HTTP basic auth. Only the hash of their peppered
/// password is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuthUser {
    #[serde(rename = "_id")]
    pub key: String,
    pub username: String,
    pub password_hash: String,
}

impl BasicAuthUser {
    pub fn key(username: &str) -> String {
        format!("basic_auth_{username}")
    }

    /// Hash a new user's password. The username must be non-empty and the
    /// password at least [`MIN_PASSWORD_LENGTH`] long.
    pub fn new(username: &str, password: &str, pepper: &str) -> Result<Self> {
        if username.is_empty() || username.contains(':') {
            return Err(Error::bad_request("Illegal username"));
        }
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(Error::bad_request(format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let mut salt = [0_u8; 16];
        rand::thread_rng().fill(&mut salt);
        let peppered = format!("{password}{pepper}");
        let password_hash =
            argon2::hash_encoded(peppered.as_bytes(), &salt, &Argon2Config::default())?;
        Ok(Self {
            key: Self::key(username),
            username: username.to_string(),
            password_hash,
        })
    }

    /// Check whether the given password is correct.
    pub fn verify_password(&self, password: &str, pepper: &str) -> Result<bool> {
        let peppered = format!("{password}{pepper}");
        Ok(argon2::verify_encoded(
            &self.password_hash,
            peppered.as_bytes(),
        )?)
    }

    pub async fn load(users: &Coll<BasicAuthUser>, username: &str) -> Result<Option<Self>> {
        Ok(users.find_one(key_filter(&Self::key(username)), None).await?)
    }

    /// Insert a new user; an existing username is a conflict.
    pub async fn create(users: &Coll<BasicAuthUser>, user: &Self) -> Result<()> {
        match users.insert_one(user, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => Err(Error::conflict(format!(
                "User {} already exists",
                user.username
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Split an `Authorization: Basic ...` header into username and password.
pub fn parse_basic_authorization(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim().as_bytes()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Request guard for routes behind HTTP basic auth.
pub struct BasicAuth {
    pub username: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BasicAuth {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let unauthorized = |msg: &str| -> Outcome<Self, Self::Error> {
            let status = Status::Unauthorized;
            Outcome::Failure((status, Error::Status(status, msg.to_string())))
        };

        let (username, password) = match req
            .headers()
            .get_one("Authorization")
            .and_then(parse_basic_authorization)
        {
            Some(credentials) if !credentials.0.is_empty() => credentials,
            _ => return unauthorized("Missing basic auth credentials"),
        };

        // Unwraps are safe as `Config` and `Database` are always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();
        let users = req.guard::<Coll<BasicAuthUser>>().await.unwrap();

        let user = match BasicAuthUser::load(&users, &username).await {
            Ok(Some(user)) => user,
            Ok(None) => return unauthorized("Unknown user or wrong password"),
            Err(e) => return Outcome::Failure((Status::InternalServerError, e)),
        };
        match user.verify_password(&password, config.password_pepper()) {
            Ok(true) => Outcome::Success(BasicAuth { username }),
            Ok(false) => unauthorized("Unknown user or wrong password"),
            Err(e) => {
                warn!("Stored password hash for {username} is unusable: {e}");
                Outcome::Failure((Status::InternalServerError, e))
            }
        }
    }
}


#[cfg(test)]
pub use examples::{example_authorization, EXAMPLE_USERNAME};
