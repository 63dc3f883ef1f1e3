//! Contains the functionality for change streams.
pub mod event;
pub(crate) mod options;

#[cfg(test)]
mod test;

use std::{collections::VecDeque, sync::Arc};

use derive_where::derive_where;
use futures_core::Stream;
use serde::de::DeserializeOwned;
#[cfg(test)]
use tokio::sync::oneshot;

use crate::{
    binding::ReadBinding,
    bson::{Bson, RawDocumentBuf},
    change_stream::event::ResumeToken,
    cursor::BatchCursor,
    error::{Error, ErrorKind, Result},
    operation::ChangeStreamOperation,
    trace::CURSOR_TRACING_EVENT_TARGET,
};

/// A `ChangeStream` streams the ongoing changes of its associated collection, database or
/// deployment. It is created by executing a
/// [`ChangeStreamOperation`](crate::operation::ChangeStreamOperation).
///
/// `ChangeStream`s are resumable: if the server cursor is lost to a
/// [resumable error](crate::error::Error::is_resumable), such as a network failure or a killed
/// cursor, the aggregation is reissued to start right after the last event delivered and
/// iteration continues as if nothing happened. Only one resume is attempted per delivered
/// event, so a stream that keeps failing before making progress surfaces the error.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use mongodb_operation::{
/// #     binding::ReadBinding, bson::Document, change_stream::event::ChangeStreamEvent,
/// #     error::Result, operation::ChangeStreamOperation, Namespace, ReadOperation,
/// # };
/// # async fn run(binding: Arc<dyn ReadBinding>) -> Result<()> {
/// let op = ChangeStreamOperation::<ChangeStreamEvent<Document>>::new(
///     Namespace::new("db", "coll"),
///     vec![],
///     None,
/// );
/// let mut stream = op.execute(&binding).await?;
/// while let Some(event) = stream.next().await? {
///     println!("{:?}: {:?}", event.operation_type, event.full_document);
/// }
/// # Ok(())
/// # }
/// ```
#[derive_where(Debug)]
pub struct ChangeStream<T> {
    cursor: BatchCursor<T>,

    /// The operation as it would be issued to resume right now.
    operation: ChangeStreamOperation<T>,

    #[derive_where(skip)]
    binding: Arc<dyn ReadBinding>,

    buffer: VecDeque<RawDocumentBuf>,
    resume_token: Option<ResumeToken>,
    resume_attempted: bool,
    closed: bool,
}

impl<T> ChangeStream<T> {
    pub(crate) fn new(
        cursor: BatchCursor<T>,
        operation: ChangeStreamOperation<T>,
        binding: Arc<dyn ReadBinding>,
        resume_token: Option<ResumeToken>,
    ) -> Self {
        Self {
            cursor,
            operation,
            binding,
            buffer: VecDeque::new(),
            resume_token,
            resume_attempted: false,
            closed: false,
        }
    }

    /// The token to resume after the most recently delivered event, or, once a batch has been
    /// drained, the server's post-batch resume token.
    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.resume_token.clone()
    }

    /// Whether the stream can still produce events.
    pub fn is_alive(&self) -> bool {
        !self.closed && (!self.buffer.is_empty() || self.cursor.id() != 0)
    }

    /// Closes the stream and kills its server cursor in the background. Closing more than once is
    /// a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.clear();
        self.cursor.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The cursor currently backing the stream. It is replaced on every resume.
    pub fn cursor(&self) -> &BatchCursor<T> {
        &self.cursor
    }

    /// Takes the next buffered event off the buffer and records its resume token.
    fn pop_event(&mut self) -> Result<Option<RawDocumentBuf>> {
        let Some(doc) = self.buffer.pop_front() else {
            return Ok(None);
        };
        let token = match doc.get("_id")? {
            Some(id) => ResumeToken(Bson::try_from(id.to_raw_bson())?),
            None => return Err(ErrorKind::MissingResumeToken.into()),
        };
        self.resume_token = match self.cursor.post_batch_resume_token() {
            Some(batch_token) if self.buffer.is_empty() => {
                Some(ResumeToken::from(batch_token.clone()))
            }
            _ => Some(token),
        };
        self.resume_attempted = false;
        Ok(Some(doc))
    }

    fn check_open(&self, message: &str) -> Result<()> {
        if self.closed {
            return Err(Error::illegal_state(message));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_kill_watcher(&mut self, tx: oneshot::Sender<()>) {
        self.cursor.set_kill_watcher(tx);
    }
}

impl<T: DeserializeOwned> ChangeStream<T> {
    /// Returns the next event, waiting on the server until one arrives. Returns `None` once
    /// the server closes the stream, for example after an `invalidate` event.
    pub async fn next(&mut self) -> Result<Option<T>> {
        self.check_open("Iterator has been closed")?;
        if self.buffer.is_empty() {
            self.fill_buffer(true).await?;
        }
        self.next_buffered()
    }

    /// Returns the next event if one is buffered or arrives with at most one get-more.
    ///
    /// Unlike [`next`](Self::next), `None` does not mean the stream is over; check
    /// [`is_alive`](Self::is_alive). The [`resume_token`](Self::resume_token) is kept current
    /// either way, which makes this the method to use when persisting tokens.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        self.check_open("Iterator has been closed")?;
        if self.buffer.is_empty() {
            self.fill_buffer(false).await?;
        }
        self.next_buffered()
    }

    /// Returns every buffered event, fetching a new batch first if none are buffered.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<T>>> {
        self.check_open("Cursor has been closed")?;
        if self.buffer.is_empty() {
            self.fill_buffer(true).await?;
        }
        self.drain_buffer()
    }

    /// Like [`next_batch`](Self::next_batch), but issues at most one get-more.
    pub async fn try_next_batch(&mut self) -> Result<Option<Vec<T>>> {
        self.check_open("Cursor has been closed")?;
        if self.buffer.is_empty() {
            self.fill_buffer(false).await?;
        }
        self.drain_buffer()
    }

    /// Flattens the change stream into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send
    where
        T: Send,
    {
        futures_util::stream::try_unfold(self, |mut stream| async move {
            Ok(stream.next().await?.map(|event| (event, stream)))
        })
    }

    /// Pulls the next batch from the server into the local buffer, resuming once if the cursor
    /// is lost. With `wait` the call blocks until documents arrive or the cursor dies; without
    /// it at most one get-more is issued.
    async fn fill_buffer(&mut self, wait: bool) -> Result<()> {
        loop {
            let result = if wait {
                self.cursor.next_raw_batch().await
            } else {
                self.cursor.try_next_raw_batch().await
            };
            match result {
                Ok(Some(batch)) => {
                    self.buffer = batch;
                    return Ok(());
                }
                Ok(None) => {
                    if let Some(token) = self.cursor.post_batch_resume_token() {
                        self.resume_token = Some(ResumeToken::from(token.clone()));
                    }
                    return Ok(());
                }
                Err(error) if error.is_resumable() && !self.resume_attempted => {
                    self.resume_attempted = true;
                    self.resume(&error).await?;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn resume(&mut self, error: &Error) -> Result<()> {
        let operation = self
            .operation
            .for_resume(self.resume_token.clone(), self.cursor.max_wire_version());
        tracing::debug!(
            target: CURSOR_TRACING_EVENT_TARGET,
            cursorId = self.cursor.id(),
            error = %error,
            "Resuming change stream"
        );
        self.cursor.close();
        self.cursor = operation.open_cursor(&self.binding).await?;
        self.operation = operation;
        Ok(())
    }

    fn next_buffered(&mut self) -> Result<Option<T>> {
        self.pop_event()?
            .map(|doc| crate::bson::from_slice(doc.as_bytes()).map_err(Error::from))
            .transpose()
    }

    fn drain_buffer(&mut self) -> Result<Option<Vec<T>>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let mut batch = Vec::with_capacity(self.buffer.len());
        while let Some(event) = self.next_buffered()? {
            batch.push(event);
        }
        Ok(Some(batch))
    }
}
