//! Batch-at-a-time iteration over the results of a query.

mod common;

use std::{collections::VecDeque, marker::PhantomData, sync::Arc, time::Duration};

use derive_where::derive_where;
use futures_core::Stream;
use serde::de::DeserializeOwned;
#[cfg(test)]
use tokio::sync::oneshot;

use crate::{
    binding::SessionContext,
    bson::{Document, RawDocumentBuf, Timestamp},
    cmap::{ConnectionSource, LeasedConnection, LegacyGetMore},
    error::{Error, Result},
    executor,
    operation::{get_more::GetMoreResult, GetMore},
    runtime,
    sdam::{ServerAddress, ServerType},
    trace::CURSOR_TRACING_EVENT_TARGET,
};

pub(crate) use common::{
    kill_cursor,
    kill_cursor_in_background,
    CursorInformation,
    CursorSpecification,
    KillTarget,
};

// How long a tailable cursor that does not await data waits after an empty batch before asking
// the server again.
const TAILABLE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

const CLOSED_AS_CURSOR: &str = "Cursor has been closed";
const CLOSED_AS_ITERATOR: &str = "Iterator has been closed";

/// A cursor over the results of a query, yielding one batch of documents at a time.
///
/// The first batch comes from the reply of the command that opened the cursor; later batches are
/// fetched with get-mores on demand. A cursor that is dropped or [`close`](Self::close)d while
/// the server still holds results kills the server cursor in the background.
///
/// ```rust,no_run
/// # use mongodb_operation::{bson::Document, error::Result, BatchCursor};
/// # async fn run(mut cursor: BatchCursor<Document>) -> Result<()> {
/// cursor.set_batch_size(50);
/// while let Some(batch) = cursor.next_batch().await? {
///     for doc in batch {
///         println!("{}", doc);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive_where(Debug)]
pub struct BatchCursor<T> {
    info: CursorInformation,
    buffer: VecDeque<RawDocumentBuf>,

    /// Documents received from the server so far, the first batch included.
    count: i64,

    #[derive_where(skip)]
    source: Arc<dyn ConnectionSource>,

    /// Held for the cursor's lifetime when the server is a load balancer.
    pinned: Option<LeasedConnection>,

    max_wire_version: i32,
    post_batch_resume_token: Option<Document>,
    operation_time: Option<Timestamp>,
    first_batch_empty: bool,
    closed: bool,

    #[cfg(test)]
    kill_watcher: Option<oneshot::Sender<()>>,

    _phantom: PhantomData<fn() -> T>,
}

impl<T> BatchCursor<T> {
    /// Wraps the reply of a cursor-producing command. The connection that carried it is kept
    /// only if the cursor is open on a load balanced server; otherwise it goes straight back to
    /// its source.
    pub(crate) fn new(spec: CursorSpecification, connection: LeasedConnection) -> Self {
        let description = connection.description();
        let max_wire_version = description.wire_version();
        let pin = spec.id() != 0 && description.initial_server_type == ServerType::LoadBalancer;
        let source = connection.source().clone();
        let pinned = if pin {
            Some(connection)
        } else {
            connection.release();
            None
        };

        let count = spec.initial_buffer.len() as i64;
        let mut cursor = Self {
            first_batch_empty: spec.initial_buffer.is_empty(),
            info: spec.info,
            buffer: spec.initial_buffer,
            count,
            source,
            pinned,
            max_wire_version,
            post_batch_resume_token: spec.post_batch_resume_token,
            operation_time: spec.operation_time,
            closed: false,
            #[cfg(test)]
            kill_watcher: None,
            _phantom: PhantomData,
        };
        cursor.log_batch(count);

        if cursor.info.id != 0 && cursor.info.limit_reached(cursor.count) {
            cursor.kill_in_background();
        }
        cursor
    }

    /// Returns the next batch, fetching as many get-mores as it takes to get a non-empty one.
    ///
    /// Returns `None` once the server cursor is exhausted. For a tailable cursor this waits
    /// until new documents arrive or the cursor dies.
    pub(crate) async fn next_raw_batch(&mut self) -> Result<Option<VecDeque<RawDocumentBuf>>> {
        self.check_open(CLOSED_AS_CURSOR)?;
        loop {
            if !self.buffer.is_empty() {
                return Ok(Some(std::mem::take(&mut self.buffer)));
            }
            if self.info.id == 0 {
                return Ok(None);
            }
            self.get_more().await?;
            if self.buffer.is_empty()
                && self.info.id != 0
                && self.info.tailable
                && !self.info.await_data
            {
                runtime::delay_for(TAILABLE_RETRY_INTERVAL).await;
            }
        }
    }

    /// Returns the buffered batch, or the result of at most one get-more.
    pub(crate) async fn try_next_raw_batch(
        &mut self,
    ) -> Result<Option<VecDeque<RawDocumentBuf>>> {
        self.check_open(CLOSED_AS_CURSOR)?;
        if self.buffer.is_empty() && self.info.id != 0 {
            self.get_more().await?;
        }
        if self.buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(std::mem::take(&mut self.buffer)))
        }
    }

    async fn get_more(&mut self) -> Result<()> {
        let number_to_return = self.info.number_to_return(self.count);
        let result = if self.info.legacy {
            self.legacy_get_more(number_to_return).await
        } else {
            self.command_get_more(number_to_return).await
        };

        let result = match result {
            Ok(result) => result,
            Err(error) => {
                // The server no longer has the cursor, so there is nothing left to kill.
                if error.is_network_error() || error.is_cursor_not_found() {
                    self.info.id = 0;
                    self.pinned = None;
                }
                return Err(error);
            }
        };

        let received = result.batch.len() as i64;
        self.info.id = result.id;
        self.buffer = result.batch;
        self.count += received;
        self.post_batch_resume_token = result.post_batch_resume_token;
        if result.operation_time.is_some() {
            self.operation_time = result.operation_time;
        }
        self.log_batch(received);

        if self.info.id != 0 && self.info.limit_reached(self.count) {
            let target = self.kill_target();
            if let Err(error) = kill_cursor(target, &self.info).await {
                tracing::debug!(
                    target: CURSOR_TRACING_EVENT_TARGET,
                    cursorId = self.info.id,
                    error = %error,
                    "Failed to kill cursor after reaching its limit"
                );
            }
            self.info.id = 0;
        }
        if self.info.id == 0 {
            self.pinned = None;
        }
        Ok(())
    }

    async fn command_get_more(&mut self, number_to_return: i32) -> Result<GetMoreResult> {
        let op = GetMore::new(&self.info, number_to_return);
        let session = SessionContext::default();
        match self.pinned.as_mut() {
            Some(connection) => {
                executor::execute_operation(&op, connection, &session, None).await
            }
            None => {
                let mut connection = LeasedConnection::checkout(&self.source).await?;
                executor::execute_operation(&op, &mut connection, &session, None).await
            }
        }
    }

    async fn legacy_get_more(&mut self, number_to_return: i32) -> Result<GetMoreResult> {
        let message = LegacyGetMore {
            namespace: self.info.ns.clone(),
            cursor_id: self.info.id,
            number_to_return,
        };
        let reply = match self.pinned.as_mut() {
            Some(connection) => connection.get_more(message).await?,
            None => {
                let mut connection = LeasedConnection::checkout(&self.source).await?;
                connection.get_more(message).await?
            }
        }
        .validate()?;
        let batch = reply
            .documents
            .iter()
            .map(RawDocumentBuf::from_document)
            .collect::<std::result::Result<VecDeque<_>, _>>()?;
        Ok(GetMoreResult {
            batch,
            id: reply.cursor_id,
            post_batch_resume_token: None,
            operation_time: None,
        })
    }

    fn log_batch(&self, received: i64) {
        tracing::debug!(
            target: CURSOR_TRACING_EVENT_TARGET,
            cursorId = self.info.id,
            serverHost = self.info.address.host.as_str(),
            "Received batch of {} documents with cursorId {} from server {}",
            received,
            self.info.id,
            self.info.address,
        );
    }

    fn check_open(&self, message: &'static str) -> Result<()> {
        if self.closed {
            return Err(Error::illegal_state(message));
        }
        Ok(())
    }

    fn kill_target(&mut self) -> KillTarget {
        match self.pinned.take() {
            Some(connection) => KillTarget::Pinned(connection),
            None => KillTarget::Source(self.source.clone()),
        }
    }

    fn kill_in_background(&mut self) {
        if self.info.id != 0 {
            let target = self.kill_target();
            kill_cursor_in_background(
                target,
                self.info.clone(),
                #[cfg(test)]
                self.kill_watcher.take(),
            );
            self.info.id = 0;
        }
        self.pinned = None;
    }

    /// Closes the cursor. If the server still holds results, a kill is sent in the background;
    /// the call itself never waits on the network. Closing more than once is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.clear();
        self.kill_in_background();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The batch size used for subsequent get-mores.
    pub fn batch_size(&self) -> i32 {
        self.info.batch_size
    }

    /// Changes the batch size of subsequent get-mores. Batches already received are unaffected.
    pub fn set_batch_size(&mut self, batch_size: i32) {
        self.info.batch_size = batch_size;
    }

    /// The number of documents buffered locally. Always zero once the cursor is closed.
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// The id of the server cursor, or `None` once it is exhausted or killed. Fails once the
    /// cursor is closed.
    pub fn server_cursor(&self) -> Result<Option<i64>> {
        self.check_open(CLOSED_AS_ITERATOR)?;
        Ok(if self.info.id == 0 {
            None
        } else {
            Some(self.info.id)
        })
    }

    /// The address of the server holding the cursor. Fails once the cursor is closed.
    pub fn server_address(&self) -> Result<&ServerAddress> {
        self.check_open(CLOSED_AS_ITERATOR)?;
        Ok(&self.info.address)
    }

    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }

    /// The `postBatchResumeToken` of the most recent batch, if the server sent one.
    pub fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    /// The `operationTime` of the reply that opened the cursor.
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    pub fn is_first_batch_empty(&self) -> bool {
        self.first_batch_empty
    }

    pub fn max_wire_version(&self) -> i32 {
        self.max_wire_version
    }

    #[cfg(test)]
    pub(crate) fn set_kill_watcher(&mut self, tx: oneshot::Sender<()>) {
        assert!(
            self.kill_watcher.is_none(),
            "cannot set a kill_watcher more than once"
        );
        self.kill_watcher = Some(tx);
    }
}

impl<T: DeserializeOwned> BatchCursor<T> {
    /// Returns the next non-empty batch, or `None` when the cursor is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<T>>> {
        self.next_raw_batch()
            .await?
            .map(|batch| deserialize_batch(&batch))
            .transpose()
    }

    /// Like [`next_batch`](Self::next_batch), but issues at most one get-more and returns `None`
    /// if it comes back empty. Check [`server_cursor`](Self::server_cursor) to tell an idle
    /// tailable cursor from an exhausted one.
    pub async fn try_next_batch(&mut self) -> Result<Option<Vec<T>>> {
        self.try_next_raw_batch()
            .await?
            .map(|batch| deserialize_batch(&batch))
            .transpose()
    }

    /// Flattens the cursor into a stream of documents.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send
    where
        T: Send,
    {
        futures_util::stream::try_unfold(
            (self, VecDeque::new()),
            |(mut cursor, mut pending): (Self, VecDeque<T>)| async move {
                loop {
                    if let Some(doc) = pending.pop_front() {
                        return Ok(Some((doc, (cursor, pending))));
                    }
                    match cursor.next_batch().await? {
                        Some(batch) => pending.extend(batch),
                        None => return Ok(None),
                    }
                }
            },
        )
    }
}

impl<T> Drop for BatchCursor<T> {
    fn drop(&mut self) {
        if !self.closed {
            self.kill_in_background();
        }
    }
}

pub(crate) fn deserialize_batch<T: DeserializeOwned>(
    batch: &VecDeque<RawDocumentBuf>,
) -> Result<Vec<T>> {
    batch
        .iter()
        .map(|doc| crate::bson::from_slice(doc.as_bytes()).map_err(Error::from))
        .collect()
}
