//! Contains options for change streams.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Timestamp},
    change_stream::event::ResumeToken,
    collation::Collation,
};

/// The options that can be passed to a
/// [`ChangeStreamOperation`](crate::operation::ChangeStreamOperation).
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct ChangeStreamOptions {
    /// Configures how the
    /// [`ChangeStreamEvent::full_document`](crate::change_stream::event::ChangeStreamEvent::full_document)
    /// field will be populated. By default, the field will be empty for updates.
    pub full_document: Option<FullDocumentType>,

    /// Where in the change feed the stream begins. Defaults to the current time.
    pub start_position: Option<StartPosition>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a change
    /// stream query.
    pub max_await_time: Option<Duration>,

    /// The number of documents to return per batch.
    pub batch_size: Option<u32>,

    /// Specifies a collation.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary [`Bson`] value to help trace the operation through the
    /// database profiler, currentOp and logs.
    pub comment: Option<Bson>,
}

impl ChangeStreamOptions {
    pub fn resume_after(&self) -> Option<&ResumeToken> {
        match self.start_position {
            Some(StartPosition::ResumeAfter(ref token)) => Some(token),
            _ => None,
        }
    }

    pub fn start_after(&self) -> Option<&ResumeToken> {
        match self.start_position {
            Some(StartPosition::StartAfter(ref token)) => Some(token),
            _ => None,
        }
    }

    pub fn start_at_operation_time(&self) -> Option<Timestamp> {
        match self.start_position {
            Some(StartPosition::StartAtOperationTime(time)) => Some(time),
            _ => None,
        }
    }
}

/// Where a change stream begins. The three are mutually exclusive on the server, so setting one
/// replaces any other.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum StartPosition {
    /// Resume after the event identified by the token.
    ResumeAfter(ResumeToken),

    /// Like `ResumeAfter`, but also accepts the token of an `invalidate` event, so that a
    /// dropped or renamed collection can be watched again. Requires MongoDB 4.2.
    StartAfter(ResumeToken),

    /// Only report changes at or after the given cluster time. Requires MongoDB 4.0.
    StartAtOperationTime(Timestamp),
}

/// Describes the modes for configuring the
/// [`ChangeStreamEvent::full_document`](crate::change_stream::event::ChangeStreamEvent::full_document)
/// field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FullDocumentType {
    /// Only insert and replace events carry the document.
    #[default]
    Default,

    /// The field will be populated with a copy of the entire document that was updated.
    UpdateLookup,

    /// The field will be populated for replace and update change events if the post-image for
    /// this event is available.
    WhenAvailable,

    /// The same behavior as `WhenAvailable` except that an error is raised if the post-image is
    /// not available.
    Required,

    /// User-defined other types for forward compatibility.
    #[serde(untagged)]
    Other(String),
}

impl FullDocumentType {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            FullDocumentType::Default => "default",
            FullDocumentType::UpdateLookup => "updateLookup",
            FullDocumentType::WhenAvailable => "whenAvailable",
            FullDocumentType::Required => "required",
            FullDocumentType::Other(ref other) => other.as_str(),
        }
    }
}
