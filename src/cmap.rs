//! The narrow boundary between operations and whatever owns the sockets.
//!
//! Operations never see a pool or a topology. They see a [`ConnectionSource`] that lends out
//! [`Connection`]s, and each connection describes what its server can do through a
//! [`StreamDescription`].

pub(crate) mod conn;

pub use self::conn::{
    command::{Command, RawCommandResponse},
    legacy::{LegacyGetMore, LegacyQuery, QueryFlags, QueryReply},
    stream_description::StreamDescription,
    Connection,
    ConnectionSource,
    LeasedConnection,
};
