//! Credential records, all kept in one collection and told apart by key:
//! `app_credentials_<app id>`, `user_credentials_<user id>` and
//! `basic_auth_<username>`.

mod app;
mod basic_auth;
mod user;

pub use app::{AppCredentials, AppCredentialsInfo};
pub use basic_auth::{parse_basic_authorization, BasicAuth, BasicAuthUser, MIN_PASSWORD_LENGTH};
pub use user::UserCredentials;

#[cfg(test)]
pub use basic_auth::{example_authorization, EXAMPLE_USERNAME};
