use argon2::Error as Argon2Error;
use log::{debug, error};
use mongodb::{
    bson::{de::Error as BsonDeError, document::ValueAccessError, ser::Error as BsonSerError},
    error::Error as DbError,
};
use reqwest::Error as HttpError;
use rocket::{http::Status, response::Responder, Request};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Failed to serialise document: {0}")]
    BsonSer(#[from] BsonSerError),
    #[error("Failed to deserialise document: {0}")]
    BsonDe(#[from] BsonDeError),
    #[error("Malformed document field: {0}")]
    FieldAccess(#[from] ValueAccessError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error("Upstream OAuth request failed: {0}")]
    Upstream(#[from] HttpError),
    #[error("Record {0} has no snapshot; read it from the database first")]
    NoSnapshot(String),
    #[error("Stored document {0} is corrupt: {1}")]
    Corrupt(String, String),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    /// Construct a "Not Found" error for the given thing.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Status(Status::NotFound, format!("Not found: {}", what.into()))
    }

    /// Construct a "Conflict" error, used when optimistic concurrency checks fail.
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Status(Status::Conflict, what.into())
    }

    /// Construct a "Bad Request" error.
    pub fn bad_request(what: impl Into<String>) -> Self {
        Self::Status(Status::BadRequest, what.into())
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> Status {
        match self {
            Self::Db(_)
            | Self::BsonSer(_)
            | Self::BsonDe(_)
            | Self::FieldAccess(_)
            | Self::Argon2(_)
            | Self::NoSnapshot(_)
            | Self::Corrupt(..) => Status::InternalServerError,
            Self::Upstream(_) => Status::BadGateway,
            Self::Status(status, _) => *status,
        }
    }

    /// Whether this is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        self.status() == Status::Conflict
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{} {}: {self}", req.method(), req.uri());
        } else {
            debug!("{} {}: {self}", req.method(), req.uri());
        }
        let body = self.to_string();
        (status, body).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(
            Error::from(Argon2Error::DecodingFail).status(),
            Status::InternalServerError
        );
        assert_eq!(
            Error::Corrupt("x".to_string(), "missing field".to_string()).status(),
            Status::InternalServerError
        );
        assert_eq!(Error::not_found("x").status(), Status::NotFound);
        assert!(Error::conflict("stale").is_conflict());
        assert!(!Error::bad_request("nope").is_conflict());
    }
}
