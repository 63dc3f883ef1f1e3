pub(crate) mod command;
pub(crate) mod legacy;
pub(crate) mod stream_description;

use std::{fmt, sync::Arc};

use self::{
    command::{Command, RawCommandResponse},
    legacy::{LegacyGetMore, LegacyQuery, QueryReply},
    stream_description::StreamDescription,
};
use crate::{
    error::{Error, Result},
    BoxFuture,
    Namespace,
};

/// A single connection to a server.
///
/// Implementations are supplied by the caller (a pool, a test double, an embedded server). The
/// legacy OP_QUERY family only needs to be implemented by connections to servers older than 3.2;
/// the default implementations fail with `IncompatibleServer`.
pub trait Connection: Send {
    /// What the server on the other end of this connection supports.
    fn description(&self) -> &StreamDescription;

    /// An identifier for log events.
    fn id(&self) -> u32 {
        0
    }

    /// Sends a command and returns the server's reply, whether or not it reports success.
    fn send_command(&mut self, command: Command) -> BoxFuture<'_, Result<RawCommandResponse>>;

    /// Sends an OP_QUERY.
    fn query(&mut self, query: LegacyQuery) -> BoxFuture<'_, Result<QueryReply>> {
        let _ = query;
        Box::pin(async { Err(Error::incompatible_server("OP_QUERY is not supported")) })
    }

    /// Sends an OP_GET_MORE.
    fn get_more(&mut self, get_more: LegacyGetMore) -> BoxFuture<'_, Result<QueryReply>> {
        let _ = get_more;
        Box::pin(async { Err(Error::incompatible_server("OP_GET_MORE is not supported")) })
    }

    /// Sends an OP_KILL_CURSORS.
    fn kill_cursors(
        &mut self,
        ns: Namespace,
        cursor_ids: Vec<i64>,
    ) -> BoxFuture<'_, Result<()>> {
        let _ = (ns, cursor_ids);
        Box::pin(async { Err(Error::incompatible_server("OP_KILL_CURSORS is not supported")) })
    }
}

/// Lends out connections to a single server.
///
/// A source is shared as an `Arc<dyn ConnectionSource>`; cloning the `Arc` is how a cursor keeps
/// the source alive independently of the operation that created it.
pub trait ConnectionSource: Send + Sync {
    /// Waits for a connection to become available.
    fn get_connection(&self) -> BoxFuture<'_, Result<Box<dyn Connection>>>;

    /// Returns a connection obtained from [`get_connection`](Self::get_connection). Called
    /// exactly once per connection handed out.
    fn release_connection(&self, connection: Box<dyn Connection>);
}

/// A connection checked out of a [`ConnectionSource`].
///
/// The connection goes back to its source exactly once: when the lease is dropped or
/// [`release`](Self::release)d, whichever comes first. Holding a lease across an `await` is
/// therefore enough to guarantee release on success, on error and on cancellation.
pub struct LeasedConnection {
    connection: Option<Box<dyn Connection>>,
    description: StreamDescription,
    source: Arc<dyn ConnectionSource>,
}

impl LeasedConnection {
    pub async fn checkout(source: &Arc<dyn ConnectionSource>) -> Result<Self> {
        let connection = source.get_connection().await?;
        Ok(Self {
            description: connection.description().clone(),
            connection: Some(connection),
            source: source.clone(),
        })
    }

    pub fn description(&self) -> &StreamDescription {
        &self.description
    }

    pub(crate) fn id(&self) -> u32 {
        self.connection.as_ref().map(|c| c.id()).unwrap_or(0)
    }

    pub(crate) fn source(&self) -> &Arc<dyn ConnectionSource> {
        &self.source
    }

    fn connection(&mut self) -> Result<&mut Box<dyn Connection>> {
        self.connection
            .as_mut()
            .ok_or_else(|| Error::internal("connection used after it was released"))
    }

    pub async fn send_command(&mut self, command: Command) -> Result<RawCommandResponse> {
        self.connection()?.send_command(command).await
    }

    pub async fn query(&mut self, query: LegacyQuery) -> Result<QueryReply> {
        self.connection()?.query(query).await
    }

    pub async fn get_more(&mut self, get_more: LegacyGetMore) -> Result<QueryReply> {
        self.connection()?.get_more(get_more).await
    }

    pub async fn kill_cursors(&mut self, ns: Namespace, cursor_ids: Vec<i64>) -> Result<()> {
        self.connection()?.kill_cursors(ns, cursor_ids).await
    }

    /// Returns the connection to its source now rather than when the lease is dropped.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.source.release_connection(connection);
        }
    }
}

impl Drop for LeasedConnection {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LeasedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeasedConnection")
            .field("address", &self.description.server_address)
            .field("released", &self.connection.is_none())
            .finish()
    }
}
