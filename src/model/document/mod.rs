//! Object/document mapping for the voting app.
//!
//! A [`Model`] knows how to turn itself into a document and back. A
//! [`Record`] binds a model to a document id and drives the lifecycle:
//! serialisation hooks, creation and modification timestamps, and
//! optimistic-concurrency writes inside MongoDB transactions.

mod model;
mod record;

pub use model::{take_field, take_flag, take_optional, Model};
pub use record::{
    abort, commit, Record, RecordDescription, Snapshot, CREATED_FIELD, MODIFIED_FIELD,
};
