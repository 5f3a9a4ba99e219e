use std::collections::HashMap;

use log::info;
use mongodb::{
    bson::{doc, Document},
    Client, ClientSession, Database,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::document::{abort, commit, take_field, take_flag, Model, Record};

use super::{Candidate, CandidateElection, Election, Trashable};

/// One voter's choice in one election.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Vote {
    pub election_id: String,
    pub candidate_id: String,
    pub voter: String,
    pub trashed: bool,
}

impl Vote {
    /// Document id of a voter's vote. A voter gets one per election.
    pub fn key(election_id: &str, voter: &str) -> String {
        format!("{election_id}:{voter}")
    }
}

impl Model for Vote {
    fn to_document(&self, mut doc: Document) -> Result<Document> {
        doc.insert("election_id", self.election_id.as_str());
        doc.insert("candidate_id", self.candidate_id.as_str());
        doc.insert("voter", self.voter.as_str());
        doc.insert("trashed", self.trashed);
        Ok(doc)
    }

    fn from_document(&mut self, doc: &mut Document) -> Result<()> {
        self.election_id = take_field(doc, "election_id")?;
        self.candidate_id = take_field(doc, "candidate_id")?;
        self.voter = take_field(doc, "voter")?;
        self.trashed = take_flag(doc, "trashed")?;
        Ok(())
    }
}

impl Trashable for Vote {
    fn is_trashed(&self) -> bool {
        self.trashed
    }

    fn set_trashed(&mut self, trashed: bool) {
        self.trashed = trashed;
    }
}

/// Request body for casting a vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    pub candidate: String,
    pub voter: String,
}

/// Votes received by one candidate in one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate: String,
    pub votes: u64,
}

/// Record a vote and bump the candidate's running total, atomically.
///
/// The candidate must be entered in the election, and neither may be trashed.
/// A second vote from the same voter in the same election is a conflict, as
/// is a concurrent change to the candidate.
pub async fn cast_vote(
    client: &Client,
    db: &Database,
    election_id: &str,
    ballot: Ballot,
) -> Result<Record<Vote>> {
    if ballot.voter.trim().is_empty() {
        return Err(Error::bad_request("Voter must not be empty"));
    }

    let election = Record::<Election>::get(db, election_id).await?;
    if election.is_trashed() {
        return Err(Error::bad_request(format!(
            "Election {election_id} is trashed"
        )));
    }
    let entry_key = CandidateElection::key(election_id, &ballot.candidate);
    Record::<CandidateElection>::find(db, &entry_key)
        .await?
        .filter(|entry| !entry.is_trashed())
        .ok_or_else(|| {
            Error::bad_request(format!(
                "{} is not standing in election {election_id}",
                ballot.candidate
            ))
        })?;
    let mut candidate = Record::<Candidate>::get(db, &ballot.candidate).await?;
    if candidate.is_trashed() {
        return Err(Error::bad_request(format!(
            "Candidate {} is trashed",
            ballot.candidate
        )));
    }

    candidate.num_votes += 1;
    let mut vote = Record::new(
        Vote::key(election_id, &ballot.voter),
        Vote {
            election_id: election_id.to_string(),
            candidate_id: ballot.candidate,
            voter: ballot.voter,
            trashed: false,
        },
    );

    let mut session = client.start_session(None).await?;
    session.start_transaction(None).await?;
    if let Err(e) = write_ballot(db, &mut session, &mut vote, &mut candidate).await {
        abort(&mut session).await;
        return Err(e);
    }
    commit(&mut session, vote.id()).await?;
    info!(
        "{} voted for {} in {election_id}",
        vote.voter, vote.candidate_id
    );

    vote.refresh(db).await?;
    Ok(vote)
}

async fn write_ballot(
    db: &Database,
    session: &mut ClientSession,
    vote: &mut Record<Vote>,
    candidate: &mut Record<Candidate>,
) -> Result<()> {
    vote.write_in(db, session).await.map_err(|e| {
        if e.is_conflict() {
            Error::conflict(format!(
                "{} has already voted in {}",
                vote.voter, vote.election_id
            ))
        } else {
            e
        }
    })?;
    candidate.write_in(db, session).await
}

/// Count the non-trashed votes in an election, per entered candidate.
pub async fn tally(db: &Database, election_id: &str) -> Result<Vec<CandidateTally>> {
    let entrants =
        Record::<CandidateElection>::find_many(db, live_in_election(election_id)).await?;
    let votes = Record::<Vote>::find_many(db, live_in_election(election_id)).await?;

    Ok(count_votes(
        entrants.iter().map(|entry| entry.candidate_id.as_str()),
        votes.iter().map(|vote| vote.candidate_id.as_str()),
    ))
}

/// Entrants with no votes still appear, with a count of zero. Sorted by
/// votes, most first, then by name.
fn count_votes<'a>(
    entrants: impl Iterator<Item = &'a str>,
    votes: impl Iterator<Item = &'a str>,
) -> Vec<CandidateTally> {
    let mut counts: HashMap<&str, u64> = entrants.map(|name| (name, 0)).collect();
    for candidate in votes {
        *counts.entry(candidate).or_default() += 1;
    }
    let mut tallies: Vec<_> = counts
        .into_iter()
        .map(|(candidate, votes)| CandidateTally {
            candidate: candidate.to_string(),
            votes,
        })
        .collect();
    tallies.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.candidate.cmp(&b.candidate)));
    tallies
}

/// Filter for the non-trashed documents belonging to one election.
fn live_in_election(election_id: &str) -> Document {
    doc! { "election_id": election_id, "trashed": { "$ne": true } }
}

#[cfg(test)]
mod examples {
    use super::*;

    impl Ballot {
        pub fn example(voter: &str) -> Self {
            Self {
                candidate: "7-11".to_string(),
                voter: voter.to_string(),
            }
        }
    }
}
