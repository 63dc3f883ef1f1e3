use std::{collections::VecDeque, sync::Arc, time::Duration};

#[cfg(test)]
use tokio::sync::oneshot;

use crate::{
    binding::SessionContext,
    bson::{Bson, Document, RawDocumentBuf, Timestamp},
    cmap::{ConnectionSource, LeasedConnection, QueryReply},
    error::Result,
    executor,
    operation::{CursorBody, KillCursors},
    sdam::ServerAddress,
    trace::CURSOR_TRACING_EVENT_TARGET,
    Namespace,
};

/// Everything a cursor needs to know about the result of the command that opened it.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    pub(crate) info: CursorInformation,
    pub(crate) initial_buffer: VecDeque<RawDocumentBuf>,
    pub(crate) post_batch_resume_token: Option<Document>,
    pub(crate) operation_time: Option<Timestamp>,
}

impl CursorSpecification {
    pub(crate) fn new(
        body: CursorBody,
        address: ServerAddress,
        batch_size: impl Into<Option<i32>>,
        max_time: impl Into<Option<Duration>>,
    ) -> Self {
        Self {
            info: CursorInformation {
                ns: body.cursor.ns,
                id: body.cursor.id,
                address,
                batch_size: batch_size.into().unwrap_or(0),
                limit: 0,
                max_time: max_time.into(),
                comment: None,
                tailable: false,
                await_data: false,
                legacy: false,
            },
            initial_buffer: body.cursor.first_batch,
            post_batch_resume_token: body.cursor.post_batch_resume_token,
            operation_time: body.operation_time,
        }
    }

    /// An already exhausted cursor with no documents.
    pub(crate) fn empty(ns: Namespace, address: ServerAddress) -> Self {
        Self {
            info: CursorInformation {
                ns,
                id: 0,
                address,
                batch_size: 0,
                limit: 0,
                max_time: None,
                comment: None,
                tailable: false,
                await_data: false,
                legacy: false,
            },
            initial_buffer: VecDeque::new(),
            post_batch_resume_token: None,
            operation_time: None,
        }
    }

    /// The cursor opened by an OP_QUERY reply.
    pub(crate) fn legacy(
        ns: Namespace,
        reply: QueryReply,
        batch_size: i32,
        max_time: Option<Duration>,
    ) -> Result<Self> {
        let initial_buffer = reply
            .documents
            .iter()
            .map(RawDocumentBuf::from_document)
            .collect::<std::result::Result<VecDeque<_>, _>>()?;
        Ok(Self {
            info: CursorInformation {
                ns,
                id: reply.cursor_id,
                address: reply.source,
                batch_size,
                limit: 0,
                max_time,
                comment: None,
                tailable: false,
                await_data: false,
                legacy: true,
            },
            initial_buffer,
            post_batch_resume_token: None,
            operation_time: None,
        })
    }

    pub(crate) fn with_limit(mut self, limit: i32) -> Self {
        self.info.limit = limit;
        self
    }

    pub(crate) fn with_comment(mut self, comment: Option<Bson>) -> Self {
        self.info.comment = comment;
        self
    }

    pub(crate) fn with_cursor_type(mut self, tailable: bool, await_data: bool) -> Self {
        self.info.tailable = tailable;
        self.info.await_data = await_data;
        self
    }

    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }
}

/// Static information about a cursor.
#[derive(Clone, Debug)]
pub(crate) struct CursorInformation {
    pub(crate) ns: Namespace,
    pub(crate) address: ServerAddress,
    pub(crate) id: i64,

    /// Requested size of each batch; zero is the server default. Only its magnitude is sent.
    pub(crate) batch_size: i32,

    /// Total documents to return; zero is unlimited. Only its magnitude is used.
    pub(crate) limit: i32,

    /// Server-side wait for new data on each get-more of an await-data cursor.
    pub(crate) max_time: Option<Duration>,

    pub(crate) comment: Option<Bson>,
    pub(crate) tailable: bool,
    pub(crate) await_data: bool,

    /// Opened with OP_QUERY, so get-mores and kills must use the legacy messages too.
    pub(crate) legacy: bool,
}

impl CursorInformation {
    /// How many documents the next get-more should ask for, given that `returned` documents have
    /// been received so far. Never asks for more than the remaining limit.
    pub(crate) fn number_to_return(&self, returned: i64) -> i32 {
        let limit = i64::from(self.limit).abs();
        if limit == 0 {
            return self.batch_size;
        }
        let remaining = limit - returned;
        if self.batch_size != 0 && remaining > i64::from(self.batch_size).abs() {
            self.batch_size
        } else {
            i32::try_from(remaining).unwrap_or(i32::MAX)
        }
    }

    pub(crate) fn limit_reached(&self, returned: i64) -> bool {
        self.limit != 0 && returned >= i64::from(self.limit).abs()
    }
}

/// Where a kill should be sent: the connection the cursor is pinned to, or any connection from
/// its source.
pub(crate) enum KillTarget {
    Pinned(LeasedConnection),
    Source(Arc<dyn ConnectionSource>),
}

/// Kills a server cursor, then returns the connection used to its source.
pub(crate) async fn kill_cursor(target: KillTarget, info: &CursorInformation) -> Result<()> {
    let mut connection = match target {
        KillTarget::Pinned(connection) => connection,
        KillTarget::Source(source) => LeasedConnection::checkout(&source).await?,
    };
    tracing::debug!(
        target: CURSOR_TRACING_EVENT_TARGET,
        cursorId = info.id,
        namespace = %info.ns,
        serverHost = info.address.host.as_str(),
        "Killing cursor"
    );
    if info.legacy {
        connection
            .kill_cursors(info.ns.clone(), vec![info.id])
            .await
    } else {
        let op = KillCursors::new(info.ns.clone(), vec![info.id]);
        executor::execute_operation(&op, &mut connection, &SessionContext::default(), None).await
    }
}

/// Kills a server cursor in the background, ignoring the outcome.
pub(crate) fn kill_cursor_in_background(
    target: KillTarget,
    info: CursorInformation,
    #[cfg(test)] kill_watcher: Option<oneshot::Sender<()>>,
) {
    crate::runtime::execute(async move {
        if let Err(error) = kill_cursor(target, &info).await {
            tracing::debug!(
                target: CURSOR_TRACING_EVENT_TARGET,
                cursorId = info.id,
                error = %error,
                "Failed to kill cursor"
            );
        }
        #[cfg(test)]
        if let Some(tx) = kill_watcher {
            let _ = tx.send(());
        }
    });
}
