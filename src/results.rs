//! Contains the types of results returned by write, index and map-reduce operations.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::bson::Bson;

/// The result of a [`MixedBulkWrite`](crate::operation::MixedBulkWrite).
///
/// Counts are the sums over every batch the write was split into. When the write concern was
/// unacknowledged, nothing is known about the outcome and only `acknowledged` is meaningful.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BulkWriteResult {
    /// Whether the server reported the outcome of the writes.
    pub acknowledged: bool,

    /// The number of documents inserted.
    pub inserted_count: u64,

    /// The number of documents matched by update and replace requests. Upserts are not counted.
    pub matched_count: u64,

    /// The number of documents modified by update and replace requests.
    pub modified_count: u64,

    /// The number of documents deleted.
    pub deleted_count: u64,

    /// The documents inserted by upserts, keyed by the index of the request that inserted them.
    pub upserts: Vec<UpsertedId>,

    /// The `_id` of each inserted document, keyed by the index of its insert request.
    pub inserted_ids: HashMap<usize, Bson>,
}

impl BulkWriteResult {
    pub(crate) fn acknowledged() -> Self {
        Self {
            acknowledged: true,
            ..Default::default()
        }
    }

    pub(crate) fn unacknowledged() -> Self {
        Self::default()
    }

    /// The `_id` of the document upserted by the request at `index`, if any.
    pub fn upserted_id(&self, index: usize) -> Option<&Bson> {
        self.upserts
            .iter()
            .find(|upsert| upsert.index == index)
            .map(|upsert| &upsert.id)
    }
}

/// A document inserted by an upsert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UpsertedId {
    /// The index of the request in the bulk write that performed the upsert.
    pub index: usize,

    /// The `_id` of the inserted document.
    #[serde(rename = "_id")]
    pub id: Bson,
}

/// Counters reported by the server for a map-reduce.
///
/// MongoDB 4.4 stopped reporting the document counts, so they are zero for newer servers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct MapReduceStatistics {
    /// The number of documents read from the input collection.
    pub input_count: u64,

    /// The number of documents passed to `emit` by the map function.
    pub emit_count: u64,

    /// The number of documents in the output.
    pub output_count: u64,

    /// How long the server spent on the map-reduce.
    pub duration: Duration,
}

/// The result of a [`CreateIndexes`](crate::operation::CreateIndexes).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CreateIndexesResult {
    /// The names of the requested indexes, in request order.
    pub index_names: Vec<String>,
}
