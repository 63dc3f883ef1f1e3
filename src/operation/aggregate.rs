#[cfg(test)]
mod test;

use std::{marker::PhantomData, sync::Arc, time::Duration};

use derive_where::derive_where;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::ReadBinding,
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, RawCommandResponse, StreamDescription},
    collation::Collation,
    concern::WriteConcern,
    cursor::{BatchCursor, CursorSpecification},
    error::Result,
    executor::{self, ReadOperation},
    operation::{
        append_options,
        check_feature,
        check_pipeline_not_empty,
        pipeline_to_bson,
        CursorBody,
        Operation,
        WriteConcernOnlyBody,
        SERVER_3_4_0_WIRE_VERSION,
        SERVER_4_2_0_WIRE_VERSION,
        SERVER_4_4_0_WIRE_VERSION,
    },
    options::Hint,
    serde_util,
    BoxFuture,
    Namespace,
};

/// Specifies the options to an [`Aggregate`] or
/// [`AggregateToCollection`](crate::operation::AggregateToCollection) operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Enables writing to temporary files by the server.
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server should return per cursor batch.
    #[serde(skip)]
    pub batch_size: Option<u32>,

    /// Opt out of document-level validation when writing with `$out` or `$merge`.
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for the operation. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary value to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Variables accessible in the pipeline as `$$<name>`.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a tailable
    /// await cursor. Only meaningful for change streams and tailable aggregations.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// The write concern for a pipeline ending in `$out` or `$merge`.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// What an aggregation runs against.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum AggregateTarget {
    /// A database-level aggregation, sent as `aggregate: 1`.
    Database(String),
    Collection(Namespace),
}

impl AggregateTarget {
    pub(crate) fn to_bson(&self) -> Bson {
        match self {
            AggregateTarget::Database(_) => Bson::Int32(1),
            AggregateTarget::Collection(ref ns) => Bson::String(ns.coll.to_string()),
        }
    }

    pub(crate) fn db_name(&self) -> &str {
        match self {
            AggregateTarget::Database(ref s) => s.as_str(),
            AggregateTarget::Collection(ref ns) => ns.db.as_str(),
        }
    }

    /// The namespace an empty cursor on this target reports.
    pub(crate) fn namespace(&self) -> Namespace {
        match self {
            AggregateTarget::Database(ref db) => Namespace::new(db.clone(), "$cmd.aggregate"),
            AggregateTarget::Collection(ref ns) => ns.clone(),
        }
    }
}

impl From<Namespace> for AggregateTarget {
    fn from(ns: Namespace) -> Self {
        AggregateTarget::Collection(ns)
    }
}

impl From<String> for AggregateTarget {
    fn from(db_name: String) -> Self {
        AggregateTarget::Database(db_name)
    }
}

impl From<&str> for AggregateTarget {
    fn from(db_name: &str) -> Self {
        AggregateTarget::Database(db_name.to_string())
    }
}

/// Whether the final stage of `pipeline` writes its output to a collection.
pub(crate) fn is_out_or_merge(pipeline: &[Document]) -> bool {
    pipeline
        .last()
        .map(|stage| {
            let stage = bson_util::first_key(stage);
            stage == Some("$out") || stage == Some("$merge")
        })
        .unwrap_or(false)
}

pub(crate) fn is_merge(pipeline: &[Document]) -> bool {
    pipeline
        .last()
        .is_some_and(|stage| bson_util::first_key(stage) == Some("$merge"))
}

/// The command shared by cursor-producing and collection-writing aggregations: target,
/// pipeline, cursor document and the serialized options.
pub(crate) fn build_aggregate_body(
    target: &AggregateTarget,
    pipeline: &[Document],
    options: Option<&AggregateOptions>,
    description: &StreamDescription,
) -> Result<Document> {
    if options.is_some_and(|o| o.collation.is_some()) {
        check_feature(description, SERVER_3_4_0_WIRE_VERSION, "Collation")?;
    }
    if is_merge(pipeline) {
        check_feature(description, SERVER_4_2_0_WIRE_VERSION, "$merge")?;
    }

    let mut cursor = Document::new();
    if let Some(batch_size) = options.and_then(|o| o.batch_size) {
        if !(batch_size == 0 && is_out_or_merge(pipeline)) {
            cursor.insert("batchSize", i32::try_from(batch_size).unwrap_or(i32::MAX));
        }
    }

    let mut body = doc! {
        "aggregate": target.to_bson(),
        "pipeline": pipeline_to_bson(pipeline),
        "cursor": cursor,
    };
    append_options(&mut body, options)?;
    Ok(body)
}

/// Runs an aggregation pipeline and returns a cursor over its results.
///
/// A pipeline ending in `$out` or `$merge` is allowed here too; its cursor is simply empty. Use
/// [`AggregateToCollection`](crate::operation::AggregateToCollection) when no results are
/// wanted.
#[derive_where(Debug)]
pub struct Aggregate<T> {
    target: AggregateTarget,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Aggregate<T> {
    pub fn new(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Self {
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options: options.into(),
            _phantom: PhantomData,
        }
    }

    fn is_out_or_merge(&self) -> bool {
        is_out_or_merge(&self.pipeline)
    }
}

impl<T> Operation for Aggregate<T> {
    type O = CursorSpecification;

    const NAME: &'static str = "aggregate";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        check_pipeline_not_empty(&self.pipeline, Self::NAME)?;
        let body = build_aggregate_body(
            &self.target,
            &self.pipeline,
            self.options.as_ref(),
            description,
        )?;
        let mut command = Command::new(Self::NAME, self.target.db_name(), body);
        if self.is_out_or_merge() && description.supports(SERVER_3_4_0_WIRE_VERSION) {
            command.set_write_concern(self.write_concern())?;
        }
        Ok(command)
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O> {
        if self.is_out_or_merge() {
            response.body::<WriteConcernOnlyBody>()?.validate()?;
        }

        let source = response.source_address().clone();
        let body: CursorBody = response.body()?;

        // getMore only accepts a comment from 4.4 on.
        let comment = if description.supports(SERVER_4_4_0_WIRE_VERSION) {
            self.options.as_ref().and_then(|opts| opts.comment.clone())
        } else {
            None
        };

        let batch_size = self
            .options
            .as_ref()
            .and_then(|opts| opts.batch_size)
            .map(|b| i32::try_from(b).unwrap_or(i32::MAX));
        Ok(CursorSpecification::new(
            body,
            source,
            batch_size,
            self.options.as_ref().and_then(|opts| opts.max_await_time),
        )
        .with_comment(comment))
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
            .filter(|wc| !wc.is_empty())
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        true
    }
}

impl<T: DeserializeOwned> ReadOperation for Aggregate<T> {
    type Output = BatchCursor<T>;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn ReadBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_cursor_operation(self, binding))
    }
}
