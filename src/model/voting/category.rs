use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::document::{take_flag, take_optional, Model};

use super::Trashable;

/// A grouping of candidates, e.g. "convenience stores". Identified by name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateCategory {
    pub description: String,
    pub trashed: bool,
}

impl Model for CandidateCategory {
    fn to_document(&self, mut doc: Document) -> Result<Document> {
        doc.insert("description", self.description.as_str());
        doc.insert("trashed", self.trashed);
        Ok(doc)
    }

    fn from_document(&mut self, doc: &mut Document) -> Result<()> {
        self.description = take_optional(doc, "description")?.unwrap_or_default();
        self.trashed = take_flag(doc, "trashed")?;
        Ok(())
    }
}

impl Trashable for CandidateCategory {
    fn is_trashed(&self) -> bool {
        self.trashed
    }

    fn set_trashed(&mut self, trashed: bool) {
        self.trashed = trashed;
    }
}

/// Request body for creating a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Request body for updating a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryUpdate {
    #[serde(default)]
    pub description: Option<String>,
    /// The `modified_at` the client last saw, in milliseconds since the epoch.
    #[serde(default)]
    pub modified_at: Option<i64>,
}
