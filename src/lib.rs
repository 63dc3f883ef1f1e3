//! The operation layer of a MongoDB driver.
//!
//! This crate turns high-level database operations (find, aggregate, count, bulk writes, change
//! streams, map-reduce and friends) into server command documents, executes them against a
//! connection obtained from a [`binding`], and decodes the replies into typed results or
//! [`BatchCursor`]s.
//!
//! Connection pooling, topology monitoring and wire framing are out of scope: callers plug them
//! in by implementing [`cmap::Connection`] and [`cmap::ConnectionSource`].
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use mongodb_operation::{
//! #     bson::{doc, Document},
//! #     binding::{ReadBinding, SourceBinding},
//! #     cmap::ConnectionSource,
//! #     operation::Find,
//! #     options::FindOptions,
//! #     BatchCursor, Namespace, ReadOperation,
//! # };
//! # async fn run(source: Arc<dyn ConnectionSource>) -> mongodb_operation::error::Result<()> {
//! let binding: Arc<dyn ReadBinding> = Arc::new(SourceBinding::new(source));
//! let find = Find::<Document>::new(
//!     Namespace::new("db", "coll"),
//!     doc! { "x": { "$gt": 1 } },
//!     FindOptions::builder().batch_size(2).build(),
//! );
//! let mut cursor: BatchCursor<Document> = find.execute(&binding).await?;
//! while let Some(batch) = cursor.next_batch().await? {
//!     println!("{} documents", batch.len());
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(
    feature = "cargo-clippy",
    allow(clippy::unreadable_literal, clippy::float_cmp)
)]

pub mod options;

pub use ::bson;

pub mod binding;
mod bson_util;
pub mod change_stream;
pub mod cmap;
mod collation;
mod concern;
pub mod cursor;
pub mod error;
mod executor;
mod index;
mod namespace;
pub mod operation;
pub mod results;
pub(crate) mod runtime;
mod sdam;
mod selection_criteria;
mod serde_util;
pub mod sync;
#[cfg(test)]
mod test;
mod trace;

pub use crate::{
    change_stream::ChangeStream,
    cursor::BatchCursor,
    executor::{ReadOperation, WriteOperation},
    index::IndexModel,
    namespace::Namespace,
};

pub use futures_util::future::BoxFuture;
