//! Voting domain: candidates, their categories, elections, the
//! candidate/election join table, and votes.

mod candidate;
mod category;
mod election;
mod vote;

pub use candidate::{Candidate, CandidateUpdate, NewCandidate};
pub use category::{CandidateCategory, CategoryUpdate, NewCategory};
pub use election::{CandidateElection, Election, ElectionUpdate, NewElection};
pub use vote::{cast_vote, tally, Ballot, CandidateTally, Vote};

use mongodb::bson::{doc, Document};

/// A voting type that is soft-deleted by flagging it as trashed.
pub trait Trashable {
    fn is_trashed(&self) -> bool;
    fn set_trashed(&mut self, trashed: bool);
}

/// Filter for listing documents, hiding trashed ones unless asked for.
pub fn trash_filter(include_trashed: bool) -> Document {
    if include_trashed {
        doc! {}
    } else {
        doc! { "trashed": { "$ne": true } }
    }
}
