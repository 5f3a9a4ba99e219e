//! A stand-in for Asana's token endpoint, served on a local port so the real
//! HTTP client can be exercised end to end.

use std::net::Ipv4Addr;

use rocket::{
    config::{LogLevel, Shutdown},
    fairing::AdHoc,
    form::{Form, FromForm},
    http::Status,
    serde::json::{json, Json, Value},
    tokio::sync::oneshot,
};

/// The user every successful code exchange signs in.
pub const USER_ID: &str = "4673218951";
pub const USER_NAME: &str = "Greg Sanchez";

/// Exchanged for tokens and a user.
pub const GOOD_CODE: &str = "good-code";
/// Exchanged for tokens that do not say which user they belong to.
pub const ANONYMOUS_CODE: &str = "anonymous-code";

pub const EXCHANGED_ACCESS_TOKEN: &str = "exchanged-access-token";
pub const EXCHANGED_REFRESH_TOKEN: &str = "exchanged-refresh-token";
pub const REFRESHED_ACCESS_TOKEN: &str = "refreshed-access-token";

/// Refresh tokens the endpoint no longer honours.
pub const REVOKED_REFRESH_TOKEN: &str = "revoked-refresh-token";

#[derive(Debug, FromForm)]
struct TokenRequest<'r> {
    grant_type: &'r str,
    client_id: &'r str,
    client_secret: &'r str,
    code: Option<&'r str>,
    refresh_token: Option<&'r str>,
}

#[post("/-/oauth_token", data = "<request>")]
fn token(request: Form<TokenRequest<'_>>) -> Result<Json<Value>, (Status, Json<Value>)> {
    let invalid = |status: Status| -> Result<Json<Value>, (Status, Json<Value>)> {
        Err((status, Json(json!({ "error": "invalid_grant" }))))
    };
    if request.client_id.is_empty() || request.client_secret.is_empty() {
        return invalid(Status::Unauthorized);
    }

    match (request.grant_type, request.code, request.refresh_token) {
        ("authorization_code", Some(GOOD_CODE), _) => Ok(Json(json!({
            "access_token": EXCHANGED_ACCESS_TOKEN,
            "refresh_token": EXCHANGED_REFRESH_TOKEN,
            "token_type": "bearer",
            "expires_in": 3600,
            "data": {
                "id": 4673218951_u64,
                "gid": USER_ID,
                "name": USER_NAME,
                "email": "gsanchez@example.com",
            },
        }))),
        ("authorization_code", Some(ANONYMOUS_CODE), _) => Ok(Json(json!({
            "access_token": EXCHANGED_ACCESS_TOKEN,
            "token_type": "bearer",
            "expires_in": 3600,
        }))),
        ("refresh_token", _, Some(REVOKED_REFRESH_TOKEN)) => invalid(Status::Unauthorized),
        // Asana does not rotate refresh tokens.
        ("refresh_token", _, Some(_)) => Ok(Json(json!({
            "access_token": REFRESHED_ACCESS_TOKEN,
            "token_type": "bearer",
            "expires_in": 3600,
        }))),
        _ => invalid(Status::BadRequest),
    }
}

/// Launch the stand-in on a free local port and return its token URL.
///
/// It runs until the runtime it was launched on shuts down.
pub async fn launch() -> String {
    let config = rocket::Config {
        address: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        log_level: LogLevel::Off,
        shutdown: Shutdown {
            ctrlc: false,
            ..Default::default()
        },
        ..rocket::Config::debug_default()
    };

    let (port_tx, port_rx) = oneshot::channel();
    let rocket = rocket::custom(config)
        .mount("/", routes![token])
        .attach(AdHoc::on_liftoff("Report port", move |rocket| {
            Box::pin(async move {
                let _ = port_tx.send(rocket.config().port);
            })
        }));
    rocket::tokio::spawn(rocket.launch());

    let port = port_rx
        .await
        .expect("Stand-in token endpoint failed to launch");
    format!("http://127.0.0.1:{port}/-/oauth_token")
}
