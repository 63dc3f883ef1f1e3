
use std::{marker::PhantomData, sync::Arc};

use derive_where::derive_where;
use serde::de::DeserializeOwned;

use crate::{
    binding::ReadBinding,
    bson::{doc, Bson, Document},
    change_stream::{
        event::{ChangeStreamEvent, ResumeToken},
        options::{ChangeStreamOptions, StartPosition},
        ChangeStream,
    },
    cmap::{Command, LeasedConnection, RawCommandResponse, StreamDescription},
    cursor::{BatchCursor, CursorSpecification},
    error::Result,
    executor::{self, ReadOperation},
    operation::{
        aggregate::{build_aggregate_body, AggregateOptions, AggregateTarget},
        check_feature,
        CursorBody,
        Operation,
        SERVER_3_6_0_WIRE_VERSION,
        SERVER_4_0_0_WIRE_VERSION,
        SERVER_4_2_0_WIRE_VERSION,
        SERVER_4_4_0_WIRE_VERSION,
    },
    BoxFuture,
    Namespace,
};

/// What a change stream watches.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ChangeStreamTarget {
    Collection(Namespace),

    /// Every collection of a database.
    Database(String),

    /// Every database of the deployment. Runs against `admin`.
    Cluster,
}

impl ChangeStreamTarget {
    fn aggregate_target(&self) -> AggregateTarget {
        match self {
            ChangeStreamTarget::Collection(ref ns) => AggregateTarget::Collection(ns.clone()),
            ChangeStreamTarget::Database(ref db) => AggregateTarget::Database(db.clone()),
            ChangeStreamTarget::Cluster => AggregateTarget::Database("admin".to_string()),
        }
    }
}

impl From<Namespace> for ChangeStreamTarget {
    fn from(ns: Namespace) -> Self {
        ChangeStreamTarget::Collection(ns)
    }
}

/// Opens a change stream: an aggregation whose first stage is `$changeStream`.
///
/// Executing it returns a [`ChangeStream`] that reissues this operation, adjusted to start
/// where the previous cursor left off, whenever the server cursor is lost to a resumable
/// error.
#[derive_where(Debug, Clone)]
pub struct ChangeStreamOperation<T = ChangeStreamEvent<Document>> {
    target: ChangeStreamTarget,
    pipeline: Vec<Document>,
    options: ChangeStreamOptions,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ChangeStreamOperation<T> {
    pub fn new(
        target: impl Into<ChangeStreamTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> Self {
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options: options.into().unwrap_or_default(),
            _phantom: PhantomData,
        }
    }

    pub fn target(&self) -> &ChangeStreamTarget {
        &self.target
    }

    pub fn options(&self) -> &ChangeStreamOptions {
        &self.options
    }

    pub(crate) fn set_start_position(&mut self, start_position: Option<StartPosition>) {
        self.options.start_position = start_position;
    }

    /// The operation to reissue after the cursor was lost. A token resumes right after the
    /// event it names; without one the stream can only restart from the operation time it was
    /// opened at, and only on servers that understand `startAtOperationTime`.
    pub(crate) fn for_resume(&self, token: Option<ResumeToken>, max_wire_version: i32) -> Self {
        let start_position = match token {
            Some(token) => Some(StartPosition::ResumeAfter(token)),
            None => match self.options.start_at_operation_time() {
                Some(time) if max_wire_version >= SERVER_4_0_0_WIRE_VERSION => {
                    Some(StartPosition::StartAtOperationTime(time))
                }
                _ => None,
            },
        };
        let mut resumed = self.clone();
        resumed.set_start_position(start_position);
        resumed
    }

    fn change_stream_stage(&self, description: &StreamDescription) -> Result<Document> {
        let full_document = self.options.full_document.clone().unwrap_or_default();
        let mut stage = doc! { "fullDocument": full_document.as_str() };
        if matches!(self.target, ChangeStreamTarget::Cluster) {
            stage.insert("allChangesForCluster", true);
        }
        match self.options.start_position {
            Some(StartPosition::ResumeAfter(ref token)) => {
                stage.insert("resumeAfter", token.0.clone());
            }
            Some(StartPosition::StartAfter(ref token)) => {
                check_feature(description, SERVER_4_2_0_WIRE_VERSION, "startAfter")?;
                stage.insert("startAfter", token.0.clone());
            }
            Some(StartPosition::StartAtOperationTime(time)) => {
                check_feature(description, SERVER_4_0_0_WIRE_VERSION, "startAtOperationTime")?;
                stage.insert("startAtOperationTime", Bson::Timestamp(time));
            }
            None => {}
        }
        Ok(stage)
    }

    fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            batch_size: self.options.batch_size,
            collation: self.options.collation.clone(),
            comment: self.options.comment.clone(),
            max_await_time: self.options.max_await_time,
            ..Default::default()
        }
    }
}

impl<T> Operation for ChangeStreamOperation<T> {
    type O = CursorSpecification;

    const NAME: &'static str = "aggregate";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        check_feature(description, SERVER_3_6_0_WIRE_VERSION, "Change streams")?;

        let mut pipeline = Vec::with_capacity(self.pipeline.len() + 1);
        pipeline.push(doc! { "$changeStream": self.change_stream_stage(description)? });
        pipeline.extend(self.pipeline.iter().cloned());

        let target = self.target.aggregate_target();
        let options = self.aggregate_options();
        let body = build_aggregate_body(&target, &pipeline, Some(&options), description)?;
        Ok(Command::new(Self::NAME, target.db_name(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O> {
        let source = response.source_address().clone();
        let body: CursorBody = response.body()?;

        let comment = if description.supports(SERVER_4_4_0_WIRE_VERSION) {
            self.options.comment.clone()
        } else {
            None
        };
        let batch_size = self
            .options
            .batch_size
            .map(|b| i32::try_from(b).unwrap_or(i32::MAX));

        Ok(
            CursorSpecification::new(body, source, batch_size, self.options.max_await_time)
                .with_cursor_type(true, true)
                .with_comment(comment),
        )
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        true
    }
}

impl<T: DeserializeOwned> ChangeStreamOperation<T> {
    /// Runs the aggregation and wraps its reply in a tailable cursor.
    pub(crate) async fn open_cursor(
        &self,
        binding: &Arc<dyn ReadBinding>,
    ) -> Result<BatchCursor<T>> {
        let source = binding.read_connection_source().await?;
        let mut connection = LeasedConnection::checkout(&source).await?;
        let spec = executor::execute_operation(
            self,
            &mut connection,
            binding.session_context(),
            Some(binding.read_preference()),
        )
        .await?;
        Ok(BatchCursor::new(spec, connection))
    }
}

impl<T: DeserializeOwned> ReadOperation for ChangeStreamOperation<T> {
    type Output = ChangeStream<T>;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn ReadBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let cursor = self.open_cursor(binding).await?;

            let mut operation = self.clone();
            let initial_token = match cursor.post_batch_resume_token() {
                Some(token) if cursor.is_first_batch_empty() => {
                    Some(ResumeToken::from(token.clone()))
                }
                _ => self
                    .options
                    .start_after()
                    .or_else(|| self.options.resume_after())
                    .cloned(),
            };

            if self.options.start_position.is_none()
                && cursor.max_wire_version() >= SERVER_4_0_0_WIRE_VERSION
                && cursor.is_first_batch_empty()
                && cursor.post_batch_resume_token().is_none()
            {
                if let Some(time) = cursor.operation_time() {
                    operation.set_start_position(Some(StartPosition::StartAtOperationTime(time)));
                }
            }

            Ok(ChangeStream::new(
                cursor,
                operation,
                binding.clone(),
                initial_token,
            ))
        })
    }
}
