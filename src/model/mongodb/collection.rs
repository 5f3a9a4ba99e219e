use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::{doc, Document},
    error::Error as DbError,
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::{
    credentials::{AppCredentials, BasicAuthUser, UserCredentials},
    voting::{Candidate, CandidateCategory, CandidateElection, Election, Vote},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }

    /// The same collection, viewed as raw documents.
    pub fn raw(&self) -> Collection<Document> {
        self.0.clone_with_type()
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

/// Filter matching a single document by its string key.
pub fn key_filter(key: &str) -> Document {
    doc! { "_id": key }
}

// Credential collection: one collection, several record kinds told apart by key prefix.
const OAUTH_CREDENTIALS: &str = "oauth_credentials";
impl MongoCollection for AppCredentials {
    const NAME: &'static str = OAUTH_CREDENTIALS;
}
impl MongoCollection for UserCredentials {
    const NAME: &'static str = OAUTH_CREDENTIALS;
}
impl MongoCollection for BasicAuthUser {
    const NAME: &'static str = OAUTH_CREDENTIALS;
}

// Voting collections
impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}
impl MongoCollection for CandidateCategory {
    const NAME: &'static str = "candidate_categories";
}
impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}
impl MongoCollection for CandidateElection {
    const NAME: &'static str = "candidate_election";
}
impl MongoCollection for Vote {
    const NAME: &'static str = "votes";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let plain = IndexOptions::builder().build();

    // Join table, looked up by election.
    let join_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "candidate_id": 1})
        .options(plain.clone())
        .build();
    Coll::<CandidateElection>::from_db(db)
        .create_index(join_index, None)
        .await?;

    // Votes, tallied by election.
    let vote_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "candidate_id": 1})
        .options(plain.clone())
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // Candidates, filtered by category.
    let category_index = IndexModel::builder()
        .keys(doc! {"category": 1})
        .options(plain)
        .build();
    Coll::<Candidate>::from_db(db)
        .create_index(category_index, None)
        .await?;

    Ok(())
}
