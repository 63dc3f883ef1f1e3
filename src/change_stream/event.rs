//! Contains the types related to a `ChangeStream` event.

use serde::{Deserialize, Serialize};

use crate::bson::{Bson, Document, Timestamp};

/// An opaque token used for resuming an interrupted
/// [`ChangeStream`](crate::change_stream::ChangeStream).
///
/// Tokens are handed out by [`ChangeStream::resume_token`](crate::ChangeStream::resume_token)
/// and accepted by [`StartPosition`](crate::options::StartPosition).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ResumeToken(pub(crate) Bson);

impl ResumeToken {
    pub fn as_bson(&self) -> &Bson {
        &self.0
    }
}

impl From<Document> for ResumeToken {
    fn from(document: Document) -> Self {
        ResumeToken(Bson::Document(document))
    }
}

/// A [change event](https://www.mongodb.com/docs/manual/reference/change-events/) delivered by
/// a change stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamEvent<T> {
    /// The resume token of this event.
    #[serde(rename = "_id")]
    pub id: ResumeToken,

    /// Describes the type of operation represented in this change notification.
    pub operation_type: OperationType,

    /// Identifies the collection or database on which the event occurred.
    pub ns: Option<ChangeNamespace>,

    /// The new name for the `ns` collection. Only included for `OperationType::Rename`.
    pub to: Option<ChangeNamespace>,

    /// The `_id` of the document created or modified by a CRUD operation, plus the shard key
    /// for sharded collections.
    pub document_key: Option<Document>,

    /// The fields changed by an update. Only included for `OperationType::Update`.
    pub update_description: Option<UpdateDescription>,

    /// The cluster time at which the change occurred.
    pub cluster_time: Option<Timestamp>,

    /// The document created or replaced, or, with
    /// [`FullDocumentType::UpdateLookup`](crate::options::FullDocumentType::UpdateLookup), the
    /// current version of an updated document.
    pub full_document: Option<T>,
}

/// Describes which fields have been updated or removed from a document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateDescription {
    pub updated_fields: Document,

    pub removed_fields: Vec<String>,
}

/// The operation type represented in a given change notification.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Drop,
    Rename,
    DropDatabase,
    Invalidate,

    /// An event type this crate does not know about.
    #[serde(other)]
    Other,
}

/// The database, and for collection-level events the collection, an event occurred in.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct ChangeNamespace {
    pub db: String,

    pub coll: Option<String>,
}
