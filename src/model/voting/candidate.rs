use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::document::{take_field, take_flag, take_optional, Model};

use super::Trashable;

/// Someone (or something) that can be voted for. Identified by name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Votes received across all elections.
    pub num_votes: u64,
    /// Name of the [`super::CandidateCategory`] this candidate belongs to.
    pub category: Option<String>,
    pub trashed: bool,
}

impl Model for Candidate {
    fn to_document(&self, mut doc: Document) -> Result<Document> {
        // BSON has no unsigned integers.
        let num_votes = i64::try_from(self.num_votes).map_err(|_| {
            Error::Corrupt(
                "candidate".to_string(),
                format!("vote count {} does not fit in int64", self.num_votes),
            )
        })?;
        doc.insert("num_votes", num_votes);
        doc.insert("category", self.category.clone());
        doc.insert("trashed", self.trashed);
        Ok(doc)
    }

    fn from_document(&mut self, doc: &mut Document) -> Result<()> {
        let num_votes: i64 = take_field(doc, "num_votes")?;
        self.num_votes = u64::try_from(num_votes).map_err(|_| {
            Error::Corrupt(
                "candidate".to_string(),
                format!("negative vote count {num_votes}"),
            )
        })?;
        self.category = take_optional(doc, "category")?;
        self.trashed = take_flag(doc, "trashed")?;
        Ok(())
    }
}

impl Trashable for Candidate {
    fn is_trashed(&self) -> bool {
        self.trashed
    }

    fn set_trashed(&mut self, trashed: bool) {
        self.trashed = trashed;
    }
}

/// Request body for creating a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCandidate {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Request body for updating a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateUpdate {
    #[serde(default)]
    pub category: Option<String>,
    /// The `modified_at` the client last saw, in milliseconds since the epoch.
    /// When given, the update is refused if the candidate changed since.
    #[serde(default)]
    pub modified_at: Option<i64>,
}

#[cfg(test)]
mod examples {
    use super::*;

    impl NewCandidate {
        pub fn example() -> Self {
            Self {
                name: "7-11".to_string(),
                category: None,
            }
        }

        pub fn example2() -> Self {
            Self {
                name: "Wawa".to_string(),
                category: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{doc, Bson};

    use super::*;

    #[test]
    fn document_mapping() {
        let candidate = Candidate {
            num_votes: 5,
            category: Some("stores".to_string()),
            trashed: false,
        };
        let mut doc = candidate.to_document(doc! { "legacy": 1_i32 }).unwrap();
        assert_eq!(
            doc,
            doc! { "legacy": 1_i32, "num_votes": 5_i64, "category": "stores", "trashed": false }
        );

        let mut read = Candidate::default();
        read.from_document(&mut doc).unwrap();
        assert_eq!(read, candidate);
        assert_eq!(doc, doc! { "legacy": 1_i32 });
    }

    #[test]
    fn uncategorised_candidates_store_null() {
        let doc = Candidate::default().to_document(Document::new()).unwrap();
        assert_eq!(doc.get("category"), Some(&Bson::Null));
    }

    #[test]
    fn vote_counts_are_never_negative() {
        let mut doc = doc! { "num_votes": -1_i64, "trashed": false };
        let err = Candidate::default().from_document(&mut doc).unwrap_err();
        assert!(matches!(err, Error::Corrupt(..)));

        let huge = Candidate {
            num_votes: u64::MAX,
            ..Default::default()
        };
        assert!(huge.to_document(Document::new()).is_err());
    }

    #[test]
    fn missing_vote_count_is_rejected() {
        let mut doc = doc! { "trashed": false };
        assert!(Candidate::default().from_document(&mut doc).is_err());
    }
}
