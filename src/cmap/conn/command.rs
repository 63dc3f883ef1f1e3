use std::sync::atomic::{AtomicI32, Ordering};

use serde::de::DeserializeOwned;

use crate::{
    bson::{Document, RawDocument, RawDocumentBuf},
    bson_util,
    concern::{ReadConcernInternal, WriteConcern},
    error::{Error, Result},
    sdam::ServerAddress,
    selection_criteria::ReadPreference,
};

/// Returns a monotonically increasing id used to correlate command log events.
pub(crate) fn next_request_id() -> i32 {
    static REQUEST_ID: AtomicI32 = AtomicI32::new(0);
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// A server command: the command document plus where and how to send it.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Command {
    /// The command name, i.e. the first key of `body`.
    pub name: String,

    /// The database the command runs against.
    pub target_db: String,

    /// Set on reads so that connections to mongos can forward it as `$readPreference`.
    pub read_pref: Option<ReadPreference>,

    pub body: Document,

    pub request_id: i32,
}

impl Command {
    pub(crate) fn new(name: impl Into<String>, target_db: impl Into<String>, body: Document) -> Self {
        Self {
            name: name.into(),
            target_db: target_db.into(),
            read_pref: None,
            body,
            request_id: next_request_id(),
        }
    }

    pub(crate) fn set_read_concern(&mut self, read_concern: &ReadConcernInternal) -> Result<()> {
        if !read_concern.is_empty() {
            self.body
                .insert("readConcern", crate::bson::to_document(read_concern)?);
        }
        Ok(())
    }

    pub(crate) fn set_write_concern(&mut self, write_concern: Option<&WriteConcern>) -> Result<()> {
        match write_concern {
            Some(wc) if !wc.is_empty() => {
                self.body
                    .insert("writeConcern", crate::bson::to_document(wc)?);
            }
            _ => {}
        }
        Ok(())
    }
}

/// A reply to a [`Command`], kept in its raw form until an operation decides how to read it.
#[derive(Debug, Clone)]
pub struct RawCommandResponse {
    source: ServerAddress,
    raw: RawDocumentBuf,
}

impl RawCommandResponse {
    pub fn new(source: ServerAddress, raw: RawDocumentBuf) -> Self {
        Self { source, raw }
    }

    pub fn with_document(source: ServerAddress, doc: &Document) -> Result<Self> {
        Ok(Self::new(source, RawDocumentBuf::from_document(doc)?))
    }

    /// Whether the reply says `ok: 1`.
    pub(crate) fn is_success(&self) -> bool {
        matches!(
            self.raw.get("ok").ok().flatten().and_then(bson_util::get_int_raw),
            Some(1)
        )
    }

    pub(crate) fn body<T: DeserializeOwned>(&self) -> Result<T> {
        crate::bson::from_slice(self.raw.as_bytes()).map_err(|e| {
            Error::invalid_response(format!("failed to deserialize server reply: {e}"))
        })
    }

    pub(crate) fn raw_body(&self) -> &RawDocument {
        &self.raw
    }

    pub(crate) fn to_document(&self) -> Result<Document> {
        Ok(self.raw.to_document()?)
    }

    pub(crate) fn source_address(&self) -> &ServerAddress {
        &self.source
    }
}
