//! Contains all of the types needed to specify options to operations.
//!
//! Most of the options structs in this module use the
//! [`typed-builder`](https://crates.io/crates/typed-builder) crate to derive a type-safe builder
//! API on them. For example, to create an instance of
//! [`FindOptions`](struct.FindOptions.html) with only `limit` and `batch_size` set, the builder
//! API can be used as follows:
//!
//! ```rust
//! # use mongodb_operation::options::FindOptions;
//! #
//! # let options = FindOptions::builder()
//! #                   .limit(20)
//! #                   .batch_size(5)
//! #                   .build();
//! ```

use serde::{Deserialize, Serialize};

use crate::bson::{Bson, Document};

pub use crate::{
    change_stream::options::*,
    collation::*,
    concern::*,
    index::IndexOptions,
    operation::{
        aggregate::AggregateOptions,
        bulk_write::BulkWriteOptions,
        count::CountOptions,
        create::{CreateCollectionOptions, ValidationAction, ValidationLevel},
        create_indexes::CreateIndexOptions,
        distinct::DistinctOptions,
        drop_collection::DropCollectionOptions,
        find::FindOptions,
        find_and_modify::options::{
            FindAndDeleteOptions,
            FindAndReplaceOptions,
            FindAndUpdateOptions,
        },
        list_collections::ListCollectionsOptions,
        list_indexes::ListIndexesOptions,
        map_reduce::{MapReduceAction, MapReduceOptions, MapReduceOutput},
    },
    sdam::{ServerAddress, ServerType},
    selection_criteria::ReadPreference,
};

/// Specifies the index to use for an operation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Hint {
    /// The key pattern of the index.
    Keys(Document),
    /// The name of the index.
    Name(String),
}

impl Hint {
    pub(crate) fn to_bson(&self) -> Bson {
        match self {
            Hint::Keys(ref d) => Bson::Document(d.clone()),
            Hint::Name(ref s) => Bson::String(s.clone()),
        }
    }

    pub(crate) fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Document(d) => Some(Hint::Keys(d.clone())),
            Bson::String(s) => Some(Hint::Name(s.clone())),
            _ => None,
        }
    }
}

/// Specifies the type of cursor to return from a find operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum CursorType {
    /// Close the cursor after the last document is received from the server.
    #[default]
    NonTailable,

    /// Keep the cursor open after the last document; later results are returned by get-mores.
    Tailable,

    /// Like `Tailable`, but each get-more waits on the server (up to `max_await_time`) for new
    /// results instead of returning an empty batch straight away.
    TailableAwait,
}

impl CursorType {
    pub(crate) fn is_tailable(self) -> bool {
        !matches!(self, CursorType::NonTailable)
    }

    pub(crate) fn is_await_data(self) -> bool {
        matches!(self, CursorType::TailableAwait)
    }
}

/// Which version of a document a find-and-modify returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReturnDocument {
    /// The document as it was after the update.
    After,
    /// The document as it was before the update.
    #[default]
    Before,
}
