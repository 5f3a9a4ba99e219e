//! OAuth 2.0 against Asana: authorization-code and refresh-token grants,
//! CSRF state, and the signed-in user's session.

mod asana;
mod session;
mod state;
mod token;

#[cfg(test)]
pub mod stub;

pub use asana::AsanaClient;
pub use session::{fresh_credentials, AsanaSession, USER_COOKIE};
pub use state::{OAuthState, PendingAuthorization, STATE_COOKIE};
pub use token::{AsanaUser, TokenSet};
