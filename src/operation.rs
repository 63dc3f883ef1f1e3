//! The operations this crate can execute.
//!
//! Each operation is an immutable description of one request. Executing it builds a fresh
//! command for the connection's wire version, sends it and decodes the reply, so the same value
//! can be executed any number of times.

pub(crate) mod aggregate;
pub(crate) mod aggregate_to_collection;
pub(crate) mod bulk_write;
pub(crate) mod change_stream;
pub(crate) mod count;
pub(crate) mod create;
pub(crate) mod create_indexes;
pub(crate) mod distinct;
pub(crate) mod drop_collection;
pub(crate) mod find;
pub(crate) mod find_and_modify;
pub(crate) mod get_more;
pub(crate) mod kill_cursors;
pub(crate) mod list_collections;
pub(crate) mod list_indexes;
pub(crate) mod map_reduce;


use std::{collections::VecDeque, fmt::Debug};

use serde::{Deserialize, Serialize};

use crate::{
    bson::{self, Bson, Document, RawDocumentBuf, Timestamp},
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::{CommandError, Error, ErrorKind, Result, WriteConcernError, WriteFailure},
    options::WriteConcern,
    Namespace,
};

pub use self::{
    aggregate::{Aggregate, AggregateTarget},
    aggregate_to_collection::AggregateToCollection,
    bulk_write::{
        DeleteRequest,
        MixedBulkWrite,
        UpdateModifications,
        UpdateOrReplace,
        UpdateRequest,
        WriteRequest,
    },
    change_stream::{ChangeStreamOperation, ChangeStreamTarget},
    count::Count,
    create::CreateCollection,
    create_indexes::CreateIndexes,
    distinct::Distinct,
    drop_collection::DropCollection,
    find::Find,
    find_and_modify::FindAndModify,
    list_collections::ListCollections,
    list_indexes::ListIndexes,
    map_reduce::{MapReduceCursor, MapReduceToCollection, MapReduceWithInlineResults},
};
pub(crate) use self::{get_more::GetMore, kill_cursors::KillCursors};

pub(crate) const SERVER_3_2_0_WIRE_VERSION: i32 = 4;
pub(crate) const SERVER_3_4_0_WIRE_VERSION: i32 = 5;
pub(crate) const SERVER_3_6_0_WIRE_VERSION: i32 = 6;
pub(crate) const SERVER_4_0_0_WIRE_VERSION: i32 = 7;
pub(crate) const SERVER_4_2_0_WIRE_VERSION: i32 = 8;
pub(crate) const SERVER_4_4_0_WIRE_VERSION: i32 = 9;

// The amount of overhead bytes to account for when building a write batch.
pub(crate) const COMMAND_OVERHEAD_SIZE: usize = 16_000;

/// A trait modeling the behavior of a server side operation.
///
/// `build` is a pure function of the operation and the connection's capabilities; everything
/// that depends on the session (read concern, transactions) is layered on by the executor.
pub(crate) trait Operation: Send + Sync {
    /// The output type of this operation.
    type O;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    fn build(&self, description: &StreamDescription) -> Result<Command>;

    /// Interprets the server response to the command.
    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O>;

    /// Interpret an error encountered while sending the built command to the server, potentially
    /// recovering.
    fn handle_error(&self, error: Error, _description: &StreamDescription) -> Result<Self::O> {
        Err(error)
    }

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// Returns whether or not this command supports the `readConcern` field.
    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        false
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

/// Fails with an `InvalidArgument` error naming `feature` when the connection's wire version is
/// below `min_wire_version`.
pub(crate) fn check_feature(
    description: &StreamDescription,
    min_wire_version: i32,
    feature: &str,
) -> Result<()> {
    if description.supports(min_wire_version) {
        return Ok(());
    }
    Err(Error::invalid_argument(format!(
        "{} is not supported by wire version {}; MongoDB {} or later is required",
        feature,
        description.wire_version(),
        server_version_name(min_wire_version),
    )))
}

fn server_version_name(wire_version: i32) -> &'static str {
    match wire_version {
        SERVER_3_2_0_WIRE_VERSION => "3.2",
        SERVER_3_4_0_WIRE_VERSION => "3.4",
        SERVER_3_6_0_WIRE_VERSION => "3.6",
        SERVER_4_0_0_WIRE_VERSION => "4.0",
        SERVER_4_2_0_WIRE_VERSION => "4.2",
        SERVER_4_4_0_WIRE_VERSION => "4.4",
        _ => "a newer server",
    }
}

/// A response body useful for deserializing command errors.
#[derive(Deserialize, Debug)]
pub(crate) struct CommandErrorBody {
    #[serde(rename = "errorLabels")]
    pub(crate) error_labels: Option<Vec<String>>,

    #[serde(flatten)]
    pub(crate) command_error: CommandError,
}

impl From<CommandErrorBody> for Error {
    fn from(command_error_response: CommandErrorBody) -> Error {
        let kind = if command_error_response.command_error.code == 50 {
            ErrorKind::ExecutionTimeout(command_error_response.command_error)
        } else {
            ErrorKind::Command(command_error_response.command_error)
        };
        Error::new(kind, command_error_response.error_labels)
    }
}

/// Appends a serializable struct to the input document. The serializable struct MUST serialize to a
/// Document; otherwise, an error will be thrown.
pub(crate) fn append_options<T: Serialize + Debug>(
    doc: &mut Document,
    options: Option<&T>,
) -> Result<()> {
    if let Some(options) = options {
        let options_doc = bson::to_document(options)?;
        doc.extend(options_doc);
    }
    Ok(())
}

/// Inserts `maxTimeMS` when a time limit is set, saturating at `i32::MAX`.
pub(crate) fn append_max_time(doc: &mut Document, max_time: Option<std::time::Duration>) {
    if let Some(max_time) = max_time {
        doc.insert(
            "maxTimeMS",
            i32::try_from(max_time.as_millis()).unwrap_or(i32::MAX),
        );
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct EmptyBody {}

/// Body of a write response that could possibly have a write concern error but not write errors.
#[derive(Debug, Deserialize, Default, Clone)]
pub(crate) struct WriteConcernOnlyBody {
    #[serde(rename = "writeConcernError")]
    write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels")]
    labels: Option<Vec<String>>,
}

impl WriteConcernOnlyBody {
    pub(crate) fn validate(&self) -> Result<()> {
        match self.write_concern_error {
            Some(ref wc_error) => Err(Error::new(
                ErrorKind::Write(WriteFailure::WriteConcernError(wc_error.clone())),
                self.labels.clone(),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorBody {
    pub(crate) cursor: CursorInfo,

    pub(crate) operation_time: Option<Timestamp>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,

    pub(crate) ns: Namespace,

    #[serde(alias = "nextBatch")]
    pub(crate) first_batch: VecDeque<RawDocumentBuf>,

    pub(crate) post_batch_resume_token: Option<Document>,
}

macro_rules! remove_empty_write_concern {
    ($opts:expr) => {
        if let Some(ref mut options) = $opts {
            if let Some(ref write_concern) = options.write_concern {
                if write_concern.is_empty() {
                    options.write_concern = None;
                }
            }
        }
    };
}

pub(crate) use remove_empty_write_concern;

/// Fails when `pipeline` is empty. `operation` names the caller in the message.
pub(crate) fn check_pipeline_not_empty(pipeline: &[Document], operation: &str) -> Result<()> {
    if pipeline.is_empty() {
        return Err(Error::invalid_argument(format!(
            "{operation} requires a non-empty pipeline"
        )));
    }
    Ok(())
}

pub(crate) fn pipeline_to_bson(pipeline: &[Document]) -> Bson {
    Bson::Array(pipeline.iter().cloned().map(Bson::Document).collect())
}
