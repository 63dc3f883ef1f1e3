//! Wire messages for servers that predate the `find`/`getMore`/`killCursors` commands.

use bitflags::bitflags;

use crate::{
    bson::{Bson, Document},
    error::{CommandError, Error, ErrorKind, Result},
    sdam::ServerAddress,
    Namespace,
};

bitflags! {
    /// The flags of an OP_QUERY message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueryFlags: u32 {
        const TAILABLE_CURSOR   = 0b0000_0010;
        const SECONDARY_OK      = 0b0000_0100;
        const OPLOG_REPLAY      = 0b0000_1000;
        const NO_CURSOR_TIMEOUT = 0b0001_0000;
        const AWAIT_DATA        = 0b0010_0000;
        const EXHAUST           = 0b0100_0000;
        const PARTIAL           = 0b1000_0000;
    }
}

/// An OP_QUERY against a collection.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct LegacyQuery {
    pub namespace: Namespace,

    /// Either the bare filter or a `$query` wrapper carrying query modifiers.
    pub query: Document,

    pub projection: Option<Document>,

    pub skip: i32,

    /// Negative values ask the server to close the cursor after one batch.
    pub number_to_return: i32,

    pub flags: QueryFlags,
}

/// An OP_GET_MORE for an open cursor.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct LegacyGetMore {
    pub namespace: Namespace,

    pub cursor_id: i64,

    pub number_to_return: i32,
}

/// An OP_REPLY.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct QueryReply {
    pub cursor_id: i64,

    pub documents: Vec<Document>,

    pub source: ServerAddress,

    /// Set when the server flagged the reply with `QueryFailure`; the single document then holds
    /// `$err` and `code`.
    pub query_failure: bool,

    /// Set when an OP_GET_MORE named a cursor the server no longer has.
    pub cursor_not_found: bool,
}

impl QueryReply {
    pub fn new(source: ServerAddress, cursor_id: i64, documents: Vec<Document>) -> Self {
        Self {
            cursor_id,
            documents,
            source,
            query_failure: false,
            cursor_not_found: false,
        }
    }

    /// Converts a flagged failure into the same error a command would have produced.
    pub(crate) fn validate(self) -> Result<Self> {
        if self.cursor_not_found {
            return Err(ErrorKind::Command(CommandError {
                code: 43,
                code_name: "CursorNotFound".to_string(),
                message: format!("cursor {} not found", self.cursor_id),
            })
            .into());
        }
        if !self.query_failure {
            return Ok(self);
        }
        let doc = self
            .documents
            .first()
            .ok_or_else(|| Error::invalid_response("query failure reply had no error document"))?;
        let message = match doc.get("$err") {
            Some(Bson::String(s)) => s.clone(),
            _ => String::new(),
        };
        let code = doc
            .get("code")
            .and_then(crate::bson_util::get_int)
            .unwrap_or(0) as i32;
        let error = CommandError {
            code,
            code_name: String::new(),
            message,
        };
        if code == 50 {
            Err(ErrorKind::ExecutionTimeout(error).into())
        } else {
            Err(ErrorKind::Command(error).into())
        }
    }
}
