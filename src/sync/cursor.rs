use std::collections::VecDeque;

use serde::de::DeserializeOwned;

use crate::{
    cursor::BatchCursor as AsyncBatchCursor,
    error::Result,
    runtime,
    sdam::ServerAddress,
};

/// A blocking [`BatchCursor`](crate::BatchCursor).
///
/// Batches can be pulled one at a time with [`next_batch`](Self::next_batch), or the cursor can
/// be iterated document by document, issuing get-mores as needed:
///
/// ```rust,no_run
/// # use mongodb_operation::{bson::Document, error::Result, sync::BatchCursor};
/// # fn run(cursor: BatchCursor<Document>) -> Result<()> {
/// let docs: Vec<Document> = cursor.collect::<Result<_>>()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BatchCursor<T> {
    async_cursor: AsyncBatchCursor<T>,
    pending: VecDeque<T>,
}

impl<T> BatchCursor<T> {
    pub(crate) fn new(async_cursor: AsyncBatchCursor<T>) -> Self {
        Self {
            async_cursor,
            pending: VecDeque::new(),
        }
    }

    /// Closes the cursor. The kill is sent in the background.
    pub fn close(&mut self) {
        self.pending.clear();
        self.async_cursor.close();
    }

    pub fn is_closed(&self) -> bool {
        self.async_cursor.is_closed()
    }

    pub fn server_cursor(&self) -> Result<Option<i64>> {
        self.async_cursor.server_cursor()
    }

    pub fn server_address(&self) -> Result<&ServerAddress> {
        self.async_cursor.server_address()
    }

    pub fn batch_size(&self) -> i32 {
        self.async_cursor.batch_size()
    }

    pub fn set_batch_size(&mut self, batch_size: i32) {
        self.async_cursor.set_batch_size(batch_size);
    }

    /// Returns the underlying async cursor. Documents already pulled off a batch by the
    /// iterator are lost.
    pub fn into_async(self) -> AsyncBatchCursor<T> {
        self.async_cursor
    }
}

impl<T: DeserializeOwned> BatchCursor<T> {
    /// Blocks until the next non-empty batch arrives or the cursor is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Vec<T>>> {
        if !self.pending.is_empty() {
            return Ok(Some(self.pending.drain(..).collect()));
        }
        runtime::block_on(self.async_cursor.next_batch())
    }

    /// Blocks for at most one get-more.
    pub fn try_next_batch(&mut self) -> Result<Option<Vec<T>>> {
        if !self.pending.is_empty() {
            return Ok(Some(self.pending.drain(..).collect()));
        }
        runtime::block_on(self.async_cursor.try_next_batch())
    }
}

impl<T: DeserializeOwned> Iterator for BatchCursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.pending.pop_front() {
                return Some(Ok(doc));
            }
            match runtime::block_on(self.async_cursor.next_batch()) {
                Ok(Some(batch)) => self.pending.extend(batch),
                Ok(None) => return None,
                Err(error) => return Some(Err(error)),
            }
        }
    }
}
