use mongodb::bson::{from_bson, Bson, Document};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::model::mongodb::MongoCollection;

/// A type whose values are persisted as documents through [`super::Record`].
///
/// Implementors map their own fields to and from a document; the record takes
/// care of ids, timestamps, and any stored fields the model does not claim.
/// The hooks run around the mapping and default to passing the document
/// through untouched.
pub trait Model: MongoCollection + Send + Sync {
    /// Write this model's fields into `doc` and return it.
    fn to_document(&self, doc: Document) -> Result<Document>;

    /// Read this model's fields out of `doc`, removing the ones consumed.
    fn from_document(&mut self, doc: &mut Document) -> Result<()>;

    fn before_serialize(&mut self, doc: Document) -> Document {
        doc
    }

    fn after_serialize(&mut self, doc: Document) -> Document {
        doc
    }

    fn before_deserialize(&mut self, doc: Document) -> Document {
        doc
    }

    fn after_deserialize(&mut self, doc: Document) -> Document {
        doc
    }
}

/// Remove a required field from `doc` and deserialise it.
pub fn take_field<T: DeserializeOwned>(doc: &mut Document, key: &str) -> Result<T> {
    let value = doc
        .remove(key)
        .ok_or_else(|| Error::Corrupt(key.to_string(), "missing field".to_string()))?;
    Ok(from_bson(value)?)
}

/// Remove an optional field from `doc`, treating `null` like absence.
pub fn take_optional<T: DeserializeOwned>(doc: &mut Document, key: &str) -> Result<Option<T>> {
    match doc.remove(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(value) => Ok(Some(from_bson(value)?)),
    }
}

/// Remove a boolean flag from `doc`, defaulting to `false` when absent.
pub fn take_flag(doc: &mut Document, key: &str) -> Result<bool> {
    Ok(take_optional(doc, key)?.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;

    use super::*;

    #[test]
    fn take_field_consumes_the_key() {
        let mut d = doc! { "num_votes": 3_i64, "other": "kept" };
        let votes: i64 = take_field(&mut d, "num_votes").unwrap();
        assert_eq!(votes, 3);
        assert_eq!(d, doc! { "other": "kept" });
    }

    #[test]
    fn take_field_reports_missing_keys() {
        let mut d = doc! {};
        let err = take_field::<String>(&mut d, "name").unwrap_err();
        assert!(matches!(err, Error::Corrupt(ref field, _) if field == "name"));
    }

    #[test]
    fn optional_fields_treat_null_as_absent() {
        let mut d = doc! { "category": Bson::Null, "trashed": true };
        assert_eq!(take_optional::<String>(&mut d, "category").unwrap(), None);
        assert!(take_flag(&mut d, "trashed").unwrap());
        assert!(!take_flag(&mut d, "trashed").unwrap());
        assert!(d.is_empty());
    }
}
