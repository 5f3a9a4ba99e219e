use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::document::{take_field, take_flag, take_optional, Model};

use super::Trashable;

/// A poll that candidates are entered into and voters vote in.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Election {
    pub title: String,
    pub description: String,
    pub trashed: bool,
}

impl Model for Election {
    fn to_document(&self, mut doc: Document) -> Result<Document> {
        doc.insert("title", self.title.as_str());
        doc.insert("description", self.description.as_str());
        doc.insert("trashed", self.trashed);
        Ok(doc)
    }

    fn from_document(&mut self, doc: &mut Document) -> Result<()> {
        self.title = take_field(doc, "title")?;
        self.description = take_optional(doc, "description")?.unwrap_or_default();
        self.trashed = take_flag(doc, "trashed")?;
        Ok(())
    }
}

impl Trashable for Election {
    fn is_trashed(&self) -> bool {
        self.trashed
    }

    fn set_trashed(&mut self, trashed: bool) {
        self.trashed = trashed;
    }
}

/// Request body for creating an election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewElection {
    /// URL-safe identifier chosen by the creator.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl NewElection {
    /// Check the identifier can be used in URLs and join keys.
    pub fn validate(&self) -> Result<()> {
        let valid_char = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
        if self.id.is_empty() || !self.id.chars().all(valid_char) {
            return Err(Error::bad_request(format!(
                "Election id must be non-empty and contain only [A-Za-z0-9_-]: {:?}",
                self.id
            )));
        }
        if self.title.trim().is_empty() {
            return Err(Error::bad_request("Election title must not be empty"));
        }
        Ok(())
    }
}

impl From<NewElection> for Election {
    fn from(new: NewElection) -> Self {
        Self {
            title: new.title,
            description: new.description,
            trashed: false,
        }
    }
}

/// Request body for updating an election. Absent fields are left alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// The `modified_at` the client last saw, in milliseconds since the epoch.
    #[serde(default)]
    pub modified_at: Option<i64>,
}

impl ElectionUpdate {
    /// Apply the update, refusing to blank out the title.
    pub fn apply(self, election: &mut Election) -> Result<()> {
        if let Some(title) = self.title {
            if title.trim().is_empty() {
                return Err(Error::bad_request("Election title must not be empty"));
            }
            election.title = title;
        }
        if let Some(description) = self.description {
            election.description = description;
        }
        Ok(())
    }
}

/// Join record entering a candidate into an election.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateElection {
    pub election_id: String,
    pub candidate_id: String,
    pub trashed: bool,
}

impl CandidateElection {
    pub fn new(election_id: &str, candidate_id: &str) -> Self {
        Self {
            election_id: election_id.to_string(),
            candidate_id: candidate_id.to_string(),
            trashed: false,
        }
    }

    /// Document id of the join record for this pair.
    pub fn key(election_id: &str, candidate_id: &str) -> String {
        format!("{election_id}:{candidate_id}")
    }
}

impl Model for CandidateElection {
    fn to_document(&self, mut doc: Document) -> Result<Document> {
        doc.insert("election_id", self.election_id.as_str());
        doc.insert("candidate_id", self.candidate_id.as_str());
        doc.insert("trashed", self.trashed);
        Ok(doc)
    }

    fn from_document(&mut self, doc: &mut Document) -> Result<()> {
        self.election_id = take_field(doc, "election_id")?;
        self.candidate_id = take_field(doc, "candidate_id")?;
        self.trashed = take_flag(doc, "trashed")?;
        Ok(())
    }
}

impl Trashable for CandidateElection {
    fn is_trashed(&self) -> bool {
        self.trashed
    }

    fn set_trashed(&mut self, trashed: bool) {
        self.trashed = trashed;
    }
}

#[cfg(test)]
mod examples {
    use super::*;

    impl NewElection {
        pub fn example() -> Self {
            Self {
                id: "best-snacks-2026".to_string(),
                title: "Best snack stop".to_string(),
                description: "Where should the team stop on the road trip?".to_string(),
            }
        }
    }
}
