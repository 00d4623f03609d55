//! Persisted record types.

use crate::backend::Table;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record type the generic store can persist.
///
/// The store only needs the table name and the primary key column; every
/// other field travels as JSON.
///
/// ```
/// use keystone_store::Entity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Post {
///     #[serde(default)]
///     id: i64,
///     user_id: String,
///     title: String,
/// }
///
/// impl Entity for Post {
///     const TABLE: &'static str = "posts";
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table name.
    const TABLE: &'static str;

    /// Primary key column. A zero, empty or null key is assigned on insert.
    const KEY: &'static str = "id";

    /// Returns the table descriptor.
    fn table() -> Table {
        Table::new(Self::TABLE, Self::KEY)
    }
}
