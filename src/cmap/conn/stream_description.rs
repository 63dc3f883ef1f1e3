use typed_builder::TypedBuilder;

use crate::sdam::{ServerAddress, ServerType};

/// What the server behind a connection supports, as learned from its handshake.
///
/// ```rust
/// # use mongodb_operation::{cmap::StreamDescription, options::ServerType};
/// let description = StreamDescription::builder()
///     .max_wire_version(8)
///     .initial_server_type(ServerType::RsPrimary)
///     .build();
/// assert_eq!(description.max_write_batch_size, 100_000);
/// ```
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct StreamDescription {
    /// The address of the server.
    pub server_address: ServerAddress,

    /// The type of the server when the handshake occurred.
    pub initial_server_type: ServerType,

    /// The maximum wire version that the server understands.
    #[builder(setter(strip_option))]
    pub max_wire_version: Option<i32>,

    /// The maximum size of a single document the server accepts.
    #[builder(default = 16 * 1024 * 1024)]
    pub max_bson_object_size: i64,

    /// The maximum number of inserts, updates, or deletes that can be included in a write batch.
    #[builder(default = 100_000)]
    pub max_write_batch_size: i64,

    /// The maximum permitted size of a BSON wire protocol message.
    #[builder(default = 48_000_000)]
    pub max_message_size_bytes: i32,
}

impl StreamDescription {
    pub(crate) fn wire_version(&self) -> i32 {
        self.max_wire_version.unwrap_or(0)
    }

    /// Whether the server speaks at least `wire_version`.
    pub(crate) fn supports(&self, wire_version: i32) -> bool {
        self.wire_version() >= wire_version
    }

    /// Gets a description of a stream for a 4.2 connection.
    #[cfg(test)]
    pub(crate) fn new_testing() -> Self {
        Self::with_wire_version(8)
    }

    /// Gets a description of a stream for a connection to a server with the provided
    /// maxWireVersion.
    #[cfg(test)]
    pub(crate) fn with_wire_version(max_wire_version: i32) -> Self {
        Self::builder().max_wire_version(max_wire_version).build()
    }
}
