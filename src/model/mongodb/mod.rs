mod collection;
pub mod errors;

pub use collection::{ensure_indexes_exist, key_filter, Coll, MongoCollection};
