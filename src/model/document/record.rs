use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use mongodb::{
    bson::{Bson, DateTime as BsonDateTime, Document},
    error::Error as DbError,
    Client, ClientSession, Collection, Database,
};
use rocket::futures::TryStreamExt;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::model::mongodb::{
    errors::{is_duplicate_key_error, is_write_conflict_error},
    key_filter,
};

use super::Model;

/// Field holding the creation time. Written once, never changed.
pub const CREATED_FIELD: &str = "t_crte";
/// Field holding the last modification time. Doubles as the optimistic
/// concurrency token.
pub const MODIFIED_FIELD: &str = "t_mod";
const ID_FIELD: &str = "_id";
const METADATA_FIELDS: [&str; 3] = [ID_FIELD, CREATED_FIELD, MODIFIED_FIELD];

/// The last copy of a document read from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub document: Document,
}

/// A model value bound to a document id, plus what we last saw of it in the
/// database.
///
/// A record without a snapshot has never been read and is created on save.
/// A record with a snapshot is updated on save, provided nobody else modified
/// the document since the snapshot was taken.
#[derive(Debug)]
pub struct Record<M> {
    id: String,
    model: M,
    snapshot: Option<Snapshot>,
    additional_attributes: Document,
}

impl<M> Deref for Record<M> {
    type Target = M;

    fn deref(&self) -> &Self::Target {
        &self.model
    }
}

impl<M> DerefMut for Record<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.model
    }
}

impl<M> Record<M>
where
    M: Model,
{
    /// An unsaved record.
    pub fn new(id: impl Into<String>, model: M) -> Self {
        Self {
            id: id.into(),
            model,
            snapshot: None,
            additional_attributes: Document::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_new(&self) -> bool {
        self.snapshot.is_none()
    }

    /// Stored fields the model doesn't map. They are written back unchanged.
    pub fn additional_attributes(&self) -> &Document {
        &self.additional_attributes
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.as_ref().map(|s| s.created_at)
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.as_ref().map(|s| s.modified_at)
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Human-readable name for log and error messages.
    fn label(&self) -> String {
        format!("{}/{}", M::NAME, self.id)
    }

    fn collection(db: &Database) -> Collection<Document> {
        db.collection(M::NAME)
    }

    /// Run the write pipeline, producing the document body without metadata.
    pub fn serialize(&mut self) -> Result<Document> {
        let doc = self.additional_attributes.clone();
        let doc = self.model.before_serialize(doc);
        let doc = self.model.to_document(doc)?;
        let mut doc = self.model.after_serialize(doc);
        for field in METADATA_FIELDS {
            doc.remove(field);
        }
        Ok(doc)
    }

    /// Re-run the read pipeline over the current snapshot, discarding local
    /// changes to the model.
    pub fn deserialize(&mut self) -> Result<()> {
        let doc = self
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.document.clone())
            .ok_or_else(|| Error::NoSnapshot(self.label()))?;
        self.deserialize_from(doc)?;
        Ok(())
    }

    /// Read pipeline. Returns the creation and modification times found.
    fn deserialize_from(&mut self, doc: Document) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let mut doc = self.model.before_deserialize(doc);
        self.model.from_document(&mut doc)?;
        let mut doc = self.model.after_deserialize(doc);

        doc.remove(ID_FIELD);
        let created_at = take_timestamp(&mut doc, CREATED_FIELD)
            .map_err(|reason| Error::Corrupt(self.label(), reason))?
            .ok_or_else(|| Error::Corrupt(self.label(), format!("missing `{CREATED_FIELD}`")))?;
        let modified_at = take_timestamp(&mut doc, MODIFIED_FIELD)
            .map_err(|reason| Error::Corrupt(self.label(), reason))?
            .unwrap_or(created_at);
        self.additional_attributes = doc;
        Ok((created_at, modified_at))
    }

    /// Replace the model with a document fetched from the database.
    fn load(&mut self, document: Document) -> Result<()> {
        let (created_at, modified_at) = self.deserialize_from(document.clone())?;
        self.snapshot = Some(Snapshot {
            created_at,
            modified_at,
            document,
        });
        Ok(())
    }

    /// Read this record from the database, overwriting local model state.
    ///
    /// Returns `false`, leaving the record untouched, if no such document exists.
    pub async fn read(&mut self, db: &Database) -> Result<bool> {
        match Self::collection(db)
            .find_one(key_filter(&self.id), None)
            .await?
        {
            Some(document) => {
                self.load(document)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Like [`Record::read`], but a missing document is an error.
    pub async fn refresh(&mut self, db: &Database) -> Result<()> {
        if self.read(db).await? {
            Ok(())
        } else {
            Err(Error::not_found(self.label()))
        }
    }

    /// Fail if the document changed since the client last saw it.
    pub fn expect_unmodified_since(&self, modified_at: DateTime<Utc>) -> Result<()> {
        match self.modified_at() {
            Some(current) if current.timestamp_millis() == modified_at.timestamp_millis() => Ok(()),
            Some(current) => Err(Error::conflict(format!(
                "{} was modified at {current}, not {modified_at}",
                self.label()
            ))),
            None => Err(Error::NoSnapshot(self.label())),
        }
    }

    /// Create or update this record in its own transaction, then re-read it
    /// so the snapshot holds the server's view.
    pub async fn save(&mut self, client: &Client, db: &Database) -> Result<()> {
        let mut session = client.start_session(None).await?;
        session.start_transaction(None).await?;
        if let Err(e) = self.write_in(db, &mut session).await {
            abort(&mut session).await;
            return Err(e);
        }
        commit(&mut session, &self.label()).await?;
        self.refresh(db).await
    }

    /// Read the record if it exists, then save it, creating it if needed.
    pub async fn sync(&mut self, client: &Client, db: &Database) -> Result<()> {
        if self.is_new() {
            self.read(db).await?;
        }
        self.save(client, db).await
    }

    /// The write step of [`Record::save`], inside a transaction owned by the
    /// caller. The snapshot is stale afterwards; call [`Record::refresh`] once
    /// the transaction commits.
    pub async fn write_in(&mut self, db: &Database, session: &mut ClientSession) -> Result<()> {
        let mut doc = self.serialize()?;
        let coll = Self::collection(db);
        let label = self.label();

        match &self.snapshot {
            None => {
                let now = BsonDateTime::now();
                doc.insert(ID_FIELD, self.id.as_str());
                doc.insert(CREATED_FIELD, now);
                doc.insert(MODIFIED_FIELD, now);
                debug!("Creating {label}");
                coll.insert_one_with_session(doc, None, session)
                    .await
                    .map_err(|e| write_error(e, &label, "already exists"))?;
            }
            Some(snapshot) => {
                let current = coll
                    .find_one_with_session(key_filter(&self.id), None, session)
                    .await?
                    .ok_or_else(|| Error::conflict(format!("{label} was deleted concurrently")))?;
                let server_modified = match current.get(MODIFIED_FIELD) {
                    Some(Bson::DateTime(dt)) => dt.to_chrono(),
                    _ => current
                        .get_datetime(CREATED_FIELD)
                        .map_err(|_| Error::Corrupt(label.clone(), "no timestamps".to_string()))?
                        .to_chrono(),
                };
                if server_modified != snapshot.modified_at {
                    return Err(Error::conflict(format!(
                        "{label} was modified at {server_modified}, local copy is from {}",
                        snapshot.modified_at
                    )));
                }

                doc.insert(CREATED_FIELD, BsonDateTime::from_chrono(snapshot.created_at));
                doc.insert(
                    MODIFIED_FIELD,
                    BsonDateTime::from_chrono(next_modification(snapshot.modified_at)),
                );
                debug!("Updating {label}");
                let result = coll
                    .replace_one_with_session(key_filter(&self.id), doc, None, session)
                    .await
                    .map_err(|e| write_error(e, &label, "was modified concurrently"))?;
                if result.matched_count != 1 {
                    return Err(Error::conflict(format!("{label} was deleted concurrently")));
                }
            }
        }
        Ok(())
    }

    /// Delete this record's document. Returns whether anything was deleted.
    pub async fn delete(&mut self, db: &Database) -> Result<bool> {
        let result = Self::collection(db)
            .delete_one(key_filter(&self.id), None)
            .await?;
        self.snapshot = None;
        Ok(result.deleted_count == 1)
    }

    /// Delete every document in this model's collection.
    pub async fn delete_all(db: &Database) -> Result<u64> {
        let result = Self::collection(db).delete_many(Document::new(), None).await?;
        debug!("Deleted {} documents from {}", result.deleted_count, M::NAME);
        Ok(result.deleted_count)
    }
}

impl<M> Record<M>
where
    M: Model + Default,
{
    /// Fetch a record by id.
    pub async fn find(db: &Database, id: &str) -> Result<Option<Self>> {
        let mut record = Self::new(id, M::default());
        Ok(record.read(db).await?.then_some(record))
    }

    /// Fetch a record by id, treating absence as "Not Found".
    pub async fn get(db: &Database, id: &str) -> Result<Self> {
        Self::find(db, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("{}/{id}", M::NAME)))
    }

    /// Fetch every record matching `filter`.
    pub async fn find_many(db: &Database, filter: Document) -> Result<Vec<Self>> {
        let documents: Vec<Document> = Self::collection(db)
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        documents
            .into_iter()
            .map(|document| {
                let id = match document.get(ID_FIELD) {
                    Some(Bson::String(id)) => id.clone(),
                    Some(Bson::ObjectId(oid)) => oid.to_hex(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let mut record = Self::new(id, M::default());
                record.load(document)?;
                Ok(record)
            })
            .collect()
    }
}

/// Modification times must strictly increase, even when two writes land in
/// the same millisecond.
fn next_modification(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = BsonDateTime::now().to_chrono();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

fn take_timestamp(
    doc: &mut Document,
    field: &str,
) -> std::result::Result<Option<DateTime<Utc>>, String> {
    match doc.remove(field) {
        Some(Bson::DateTime(dt)) => Ok(Some(dt.to_chrono())),
        Some(other) => Err(format!("`{field}` is not a datetime: {other}")),
        None => Ok(None),
    }
}

fn write_error(err: DbError, label: &str, conflict: &str) -> Error {
    if is_duplicate_key_error(&err) || is_write_conflict_error(&err) {
        Error::conflict(format!("{label} {conflict}"))
    } else {
        Error::Db(err)
    }
}

/// Commit a transaction, reporting commit-time write conflicts as conflicts.
pub async fn commit(session: &mut ClientSession, label: &str) -> Result<()> {
    session
        .commit_transaction()
        .await
        .map_err(|e| write_error(e, label, "was modified concurrently"))
}

/// Abort a transaction after a failed write. The write error is what the
/// caller reports, so abort failures are only logged.
pub async fn abort(session: &mut ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        warn!("Failed to abort transaction: {e}");
    }
}

/// API view of a record: its id and timestamps alongside the model's fields.
#[derive(Debug, Serialize)]
pub struct RecordDescription<M> {
    pub id: String,
    #[serde(serialize_with = "serialize_millis")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_millis")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub model: M,
}

impl<M> From<Record<M>> for RecordDescription<M>
where
    M: Model + Serialize,
{
    fn from(record: Record<M>) -> Self {
        Self {
            created_at: record.created_at(),
            modified_at: record.modified_at(),
            id: record.id,
            model: record.model,
        }
    }
}

/// Timestamps go over the wire as milliseconds since the epoch, the same
/// precision the database stores.
fn serialize_millis<S: Serializer>(
    time: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match time {
        Some(time) => serializer.serialize_i64(time.timestamp_millis()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use mongodb::{bson::doc, Client as MongoClient};

    use super::super::take_optional;
    use super::*;
    use crate::model::mongodb::MongoCollection;

    /// Records which lifecycle hooks ran.
    #[derive(Default)]
    struct Tracked {
        some_key: Option<String>,
        trace: Mutex<Vec<&'static str>>,
    }

    impl Tracked {
        fn record_call(&self, name: &'static str) {
            self.trace.lock().unwrap().push(name);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.trace.lock().unwrap().clone()
        }
    }

    impl MongoCollection for Tracked {
        const NAME: &'static str = "test_collection";
    }

    impl Model for Tracked {
        fn to_document(&self, mut doc: Document) -> Result<Document> {
            self.record_call("to_document");
            doc.insert("some_key", self.some_key.clone());
            Ok(doc)
        }

        fn from_document(&mut self, doc: &mut Document) -> Result<()> {
            self.record_call("from_document");
            self.some_key = take_optional(doc, "some_key")?;
            Ok(())
        }

        fn before_serialize(&mut self, doc: Document) -> Document {
            self.record_call("before_serialize");
            doc
        }

        fn after_serialize(&mut self, doc: Document) -> Document {
            self.record_call("after_serialize");
            doc
        }

        fn before_deserialize(&mut self, doc: Document) -> Document {
            self.record_call("before_deserialize");
            doc
        }

        fn after_deserialize(&mut self, doc: Document) -> Document {
            self.record_call("after_deserialize");
            doc
        }
    }

    fn tracked(key: &str) -> Record<Tracked> {
        Record::new(
            "tracked",
            Tracked {
                some_key: Some(key.to_string()),
                ..Default::default()
            },
        )
    }

    fn stored(created_ms: i64, modified_ms: i64) -> Document {
        let mut doc = doc! {
            "_id": "tracked",
            "some_key": "from the db",
            "legacy": 42_i32,
        };
        doc.insert(CREATED_FIELD, BsonDateTime::from_millis(created_ms));
        doc.insert(MODIFIED_FIELD, BsonDateTime::from_millis(modified_ms));
        doc
    }

    #[test]
    fn serialize_runs_hooks_in_order() {
        let mut record = tracked("Initialized data");
        let doc = record.serialize().unwrap();
        assert_eq!(doc, doc! { "some_key": "Initialized data" });
        assert_eq!(
            record.calls(),
            vec!["before_serialize", "to_document", "after_serialize"]
        );
    }

    #[test]
    fn serialize_never_emits_metadata() {
        struct Sneaky;
        impl MongoCollection for Sneaky {
            const NAME: &'static str = "sneaky";
        }
        impl Model for Sneaky {
            fn to_document(&self, mut doc: Document) -> Result<Document> {
                doc.insert(CREATED_FIELD, BsonDateTime::from_millis(0));
                doc.insert("_id", "other");
                doc.insert("name", "kept");
                Ok(doc)
            }
            fn from_document(&mut self, _doc: &mut Document) -> Result<()> {
                Ok(())
            }
        }

        let doc = Record::new("sneaky", Sneaky).serialize().unwrap();
        assert_eq!(doc, doc! { "name": "kept" });
    }

    #[test]
    fn deserialize_needs_a_snapshot() {
        let mut record = tracked("unsaved");
        assert!(matches!(record.deserialize(), Err(Error::NoSnapshot(_))));
        assert!(record.calls().is_empty());
    }

    #[test]
    fn load_pops_metadata_and_keeps_unknown_fields() {
        let mut record = tracked("local");
        record.load(stored(1_000, 2_000)).unwrap();

        assert_eq!(record.some_key.as_deref(), Some("from the db"));
        assert_eq!(record.additional_attributes(), &doc! { "legacy": 42_i32 });
        assert_eq!(record.created_at().unwrap().timestamp_millis(), 1_000);
        assert_eq!(record.modified_at().unwrap().timestamp_millis(), 2_000);
        assert_eq!(
            record.calls(),
            vec!["before_deserialize", "from_document", "after_deserialize"]
        );

        // Unknown fields survive the next write.
        let doc = record.serialize().unwrap();
        assert_eq!(doc, doc! { "legacy": 42_i32, "some_key": "from the db" });
    }

    #[test]
    fn deserialize_discards_local_changes() {
        let mut record = tracked("local");
        record.load(stored(1_000, 1_000)).unwrap();
        record.some_key = Some("edited".to_string());

        record.deserialize().unwrap();
        assert_eq!(record.some_key.as_deref(), Some("from the db"));
    }

    #[test]
    fn missing_creation_time_is_corrupt() {
        let mut record = tracked("local");
        let err = record.load(doc! { "_id": "tracked" }).unwrap_err();
        assert!(matches!(err, Error::Corrupt(..)));
        assert!(record.is_new());
    }

    #[test]
    fn modification_time_defaults_to_creation_time() {
        let mut record = tracked("local");
        let mut doc = stored(5_000, 0);
        doc.remove(MODIFIED_FIELD);
        record.load(doc).unwrap();
        assert_eq!(record.modified_at(), record.created_at());
    }

    #[test]
    fn unmodified_check_compares_snapshot_time() {
        let mut record = tracked("local");
        assert!(matches!(
            record.expect_unmodified_since(Utc::now()),
            Err(Error::NoSnapshot(_))
        ));

        record.load(stored(1_000, 2_000)).unwrap();
        let seen = record.modified_at().unwrap();
        record.expect_unmodified_since(seen).unwrap();
        let err = record
            .expect_unmodified_since(seen - Duration::seconds(1))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn modification_times_strictly_increase() {
        let future = Utc::now() + Duration::hours(1);
        assert_eq!(next_modification(future), future + Duration::milliseconds(1));
        let past = Utc::now() - Duration::hours(1);
        assert!(next_modification(past) > past);
    }

    #[backend_test]
    async fn create_read_update(db_client: MongoClient, db: Database) {
        let mut record = tracked("Initialized data");
        record.save(&db_client, &db).await.unwrap();
        assert!(!record.is_new());
        assert_eq!(record.created_at(), record.modified_at());

        let mut other = Record::<Tracked>::get(&db, "tracked").await.unwrap();
        assert_eq!(other.some_key.as_deref(), Some("Initialized data"));

        other.some_key = Some("Updated data".to_string());
        other.save(&db_client, &db).await.unwrap();
        assert_eq!(other.created_at(), record.created_at());
        assert!(other.modified_at() > record.modified_at());

        // `record` still holds the first snapshot.
        record.some_key = Some("Lost update".to_string());
        let err = record.save(&db_client, &db).await.unwrap_err();
        assert!(err.is_conflict());

        assert!(record.read(&db).await.unwrap());
        assert_eq!(record.some_key.as_deref(), Some("Updated data"));
        assert_eq!(record.modified_at(), other.modified_at());
    }

    #[backend_test]
    async fn creating_twice_conflicts(db_client: MongoClient, db: Database) {
        tracked("first").save(&db_client, &db).await.unwrap();
        let err = tracked("second").save(&db_client, &db).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = Record::<Tracked>::get(&db, "tracked").await.unwrap();
        assert_eq!(stored.some_key.as_deref(), Some("first"));
    }

    #[backend_test]
    async fn unknown_fields_survive_updates(db_client: MongoClient, db: Database) {
        let raw = db.collection::<Document>(Tracked::NAME);
        raw.insert_one(stored(1_000, 2_000), None).await.unwrap();

        let mut record = Record::<Tracked>::get(&db, "tracked").await.unwrap();
        assert_eq!(record.some_key.as_deref(), Some("from the db"));
        record.some_key = Some("changed".to_string());
        record.save(&db_client, &db).await.unwrap();

        let saved = raw.find_one(key_filter("tracked"), None).await.unwrap().unwrap();
        assert_eq!(saved.get_str("some_key").unwrap(), "changed");
        assert_eq!(saved.get_i32("legacy").unwrap(), 42);
        assert_eq!(saved.get_datetime(CREATED_FIELD).unwrap().timestamp_millis(), 1_000);
        assert!(saved.get_datetime(MODIFIED_FIELD).unwrap().timestamp_millis() > 2_000);
    }

    #[backend_test]
    async fn read_missing_leaves_record_alone(db: Database) {
        let mut record = tracked("local");
        assert!(!record.read(&db).await.unwrap());
        assert!(record.is_new());
        assert_eq!(record.some_key.as_deref(), Some("local"));
        assert!(Record::<Tracked>::find(&db, "tracked").await.unwrap().is_none());
        assert!(record.refresh(&db).await.is_err());
    }

    #[backend_test]
    async fn sync_creates_or_adopts(db_client: MongoClient, db: Database) {
        let mut first = tracked("v1");
        first.sync(&db_client, &db).await.unwrap();
        assert!(!first.is_new());

        // A fresh record for an existing id picks up the stored state.
        let mut second = tracked("v2");
        second.sync(&db_client, &db).await.unwrap();
        assert_eq!(second.some_key.as_deref(), Some("v1"));
        assert_eq!(second.created_at(), first.created_at());
        assert!(second.modified_at() > first.modified_at());
    }

    #[backend_test]
    async fn delete_one_and_all(db_client: MongoClient, db: Database) {
        let mut record = tracked("doomed");
        record.save(&db_client, &db).await.unwrap();
        Record::new("other", Tracked::default())
            .save(&db_client, &db)
            .await
            .unwrap();

        assert!(record.delete(&db).await.unwrap());
        assert!(record.is_new());
        assert!(!record.delete(&db).await.unwrap());

        assert_eq!(Record::<Tracked>::delete_all(&db).await.unwrap(), 1);
        assert!(Record::<Tracked>::find_many(&db, Document::new())
            .await
            .unwrap()
            .is_empty());
    }
}
