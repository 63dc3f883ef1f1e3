//! Contains the blocking API: thin wrappers that drive the async operations, cursors and
//! change streams to completion on a runtime owned by this crate.
//!
//! None of these functions may be called from within an async context.

mod change_stream;
mod cursor;

#[cfg(test)]
mod test;

use std::sync::{Arc, LazyLock};

use serde::de::DeserializeOwned;

pub use change_stream::ChangeStream;
pub use cursor::BatchCursor;

use crate::{
    binding::{ReadBinding, WriteBinding},
    error::Result,
    operation::ChangeStreamOperation,
    runtime,
};

pub(crate) static TOKIO_RUNTIME: LazyLock<tokio::runtime::Runtime> =
    LazyLock::new(|| match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => panic!(
            "Error occurred when starting the underlying async runtime: {}",
            err
        ),
    });

/// Executes a read operation, blocking until its result is available.
pub fn execute_read<O>(operation: &O, binding: &Arc<dyn ReadBinding>) -> Result<O::Output>
where
    O: crate::ReadOperation,
{
    runtime::block_on(operation.execute(binding))
}

/// Executes a write operation, blocking until the server has replied.
pub fn execute_write<O>(operation: &O, binding: &Arc<dyn WriteBinding>) -> Result<O::Output>
where
    O: crate::WriteOperation,
{
    runtime::block_on(operation.execute(binding))
}

/// Executes a cursor-producing read operation and wraps the result in a blocking
/// [`BatchCursor`].
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use mongodb_operation::{
/// #     binding::ReadBinding, bson::Document, error::Result, operation::Find, sync, Namespace,
/// # };
/// # fn run(binding: Arc<dyn ReadBinding>) -> Result<()> {
/// let find = Find::<Document>::new(Namespace::new("db", "coll"), None, None);
/// for doc in sync::open_cursor(&find, &binding)? {
///     println!("{}", doc?);
/// }
/// # Ok(())
/// # }
/// ```
pub fn open_cursor<O, T>(operation: &O, binding: &Arc<dyn ReadBinding>) -> Result<BatchCursor<T>>
where
    O: crate::ReadOperation<Output = crate::BatchCursor<T>>,
    T: DeserializeOwned,
{
    execute_read(operation, binding).map(BatchCursor::new)
}

/// Opens a change stream and wraps it in a blocking [`ChangeStream`].
pub fn watch<T>(
    operation: &ChangeStreamOperation<T>,
    binding: &Arc<dyn ReadBinding>,
) -> Result<ChangeStream<T>>
where
    T: DeserializeOwned,
{
    execute_read(operation, binding).map(ChangeStream::new)
}
