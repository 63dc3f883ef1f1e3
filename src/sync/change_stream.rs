use serde::de::DeserializeOwned;

use crate::{
    change_stream::{event::ResumeToken, ChangeStream as AsyncChangeStream},
    error::Result,
    runtime,
};

/// A blocking [`ChangeStream`](crate::ChangeStream).
///
/// Iterating blocks until the next event arrives and ends when the server closes the stream.
/// Use [`try_next`](Self::try_next) to poll without waiting indefinitely.
#[derive(Debug)]
pub struct ChangeStream<T> {
    async_stream: AsyncChangeStream<T>,
}

impl<T> ChangeStream<T> {
    pub(crate) fn new(async_stream: AsyncChangeStream<T>) -> Self {
        Self { async_stream }
    }

    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.async_stream.resume_token()
    }

    pub fn is_alive(&self) -> bool {
        self.async_stream.is_alive()
    }

    pub fn close(&mut self) {
        self.async_stream.close();
    }

    pub fn into_async(self) -> AsyncChangeStream<T> {
        self.async_stream
    }
}

impl<T: DeserializeOwned> ChangeStream<T> {
    /// Blocks until the next event arrives.
    pub fn next(&mut self) -> Result<Option<T>> {
        runtime::block_on(self.async_stream.next())
    }

    /// Returns the next event if one is buffered or arrives with at most one get-more.
    pub fn try_next(&mut self) -> Result<Option<T>> {
        runtime::block_on(self.async_stream.try_next())
    }

    pub fn next_batch(&mut self) -> Result<Option<Vec<T>>> {
        runtime::block_on(self.async_stream.next_batch())
    }
}

impl<T: DeserializeOwned> Iterator for ChangeStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        ChangeStream::next(self).transpose()
    }
}
