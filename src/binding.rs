//! Where operations get their connections from.
//!
//! A binding ties a [`ConnectionSource`] to the read preference and session state an operation
//! should run with. Server selection happens before the binding is built: by the time an
//! operation sees it, the source already points at the right server.

use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::{
    bson::Timestamp,
    cmap::ConnectionSource,
    concern::{ReadConcern, ReadConcernInternal},
    error::Result,
    selection_criteria::ReadPreference,
    BoxFuture,
};

/// The session state that shapes the commands an operation sends.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct SessionContext {
    /// The read concern configured for reads outside of a transaction.
    #[builder(setter(strip_option))]
    pub read_concern: Option<ReadConcern>,

    /// The latest operation time observed by the session.
    #[builder(setter(strip_option))]
    pub operation_time: Option<Timestamp>,

    /// Whether reads should wait for `operation_time` (`afterClusterTime`).
    pub causally_consistent: bool,

    /// Whether a transaction is active. Commands inside a transaction carry neither a read
    /// concern nor a write concern of their own.
    pub in_transaction: bool,
}

impl SessionContext {
    /// The read concern to attach to a command, or `None` to send none.
    pub(crate) fn read_concern_internal(&self) -> Option<ReadConcernInternal> {
        if self.in_transaction {
            return None;
        }
        let after_cluster_time = if self.causally_consistent {
            self.operation_time
        } else {
            None
        };
        let read_concern = ReadConcernInternal {
            level: self.read_concern.as_ref().map(|rc| rc.level.clone()),
            after_cluster_time,
        };
        if read_concern.is_empty() {
            None
        } else {
            Some(read_concern)
        }
    }
}

/// Provides connections for read operations.
pub trait ReadBinding: Send + Sync {
    fn read_preference(&self) -> &ReadPreference;

    fn read_connection_source(&self) -> BoxFuture<'_, Result<Arc<dyn ConnectionSource>>>;

    fn session_context(&self) -> &SessionContext;
}

/// Provides connections for write operations.
pub trait WriteBinding: Send + Sync {
    fn write_connection_source(&self) -> BoxFuture<'_, Result<Arc<dyn ConnectionSource>>>;

    fn session_context(&self) -> &SessionContext;
}

/// A binding that hands out a single, already selected connection source for both reads and
/// writes.
#[derive(Clone)]
pub struct SourceBinding {
    source: Arc<dyn ConnectionSource>,
    read_preference: ReadPreference,
    session_context: SessionContext,
}

impl SourceBinding {
    pub fn new(source: Arc<dyn ConnectionSource>) -> Self {
        Self {
            source,
            read_preference: ReadPreference::default(),
            session_context: SessionContext::default(),
        }
    }

    pub fn with_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = read_preference;
        self
    }

    pub fn with_session_context(mut self, session_context: SessionContext) -> Self {
        self.session_context = session_context;
        self
    }
}

impl std::fmt::Debug for SourceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBinding")
            .field("read_preference", &self.read_preference)
            .field("session_context", &self.session_context)
            .finish()
    }
}

impl ReadBinding for SourceBinding {
    fn read_preference(&self) -> &ReadPreference {
        &self.read_preference
    }

    fn read_connection_source(&self) -> BoxFuture<'_, Result<Arc<dyn ConnectionSource>>> {
        let source = self.source.clone();
        Box::pin(async move { Ok(source) })
    }

    fn session_context(&self) -> &SessionContext {
        &self.session_context
    }
}

impl WriteBinding for SourceBinding {
    fn write_connection_source(&self) -> BoxFuture<'_, Result<Arc<dyn ConnectionSource>>> {
        let source = self.source.clone();
        Box::pin(async move { Ok(source) })
    }

    fn session_context(&self) -> &SessionContext {
        &self.session_context
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::concern::ReadConcernLevel;

    #[test]
    fn transaction_suppresses_read_concern() {
        let context = SessionContext::builder()
            .read_concern(ReadConcern::majority())
            .in_transaction(true)
            .build();
        assert_eq!(context.read_concern_internal(), None);
    }

    #[test]
    fn causal_consistency_adds_after_cluster_time() {
        let time = Timestamp {
            time: 42,
            increment: 1,
        };
        let context = SessionContext::builder()
            .operation_time(time)
            .causally_consistent(true)
            .build();
        assert_eq!(
            context.read_concern_internal(),
            Some(ReadConcernInternal {
                level: None,
                after_cluster_time: Some(time),
            })
        );

        let context = SessionContext::builder()
            .read_concern(ReadConcern::local())
            .operation_time(time)
            .build();
        assert_eq!(
            context.read_concern_internal(),
            Some(ReadConcernInternal {
                level: Some(ReadConcernLevel::Local),
                after_cluster_time: None,
            })
        );
    }
}
