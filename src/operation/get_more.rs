use std::{collections::VecDeque, time::Duration};

use crate::{
    bson::{doc, Bson, Document, RawDocumentBuf, Timestamp},
    cmap::{Command, RawCommandResponse, StreamDescription},
    cursor::CursorInformation,
    error::Result,
    operation::{append_max_time, CursorBody, Operation, SERVER_4_4_0_WIRE_VERSION},
    Namespace,
};

#[derive(Debug)]
pub(crate) struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    number_to_return: i32,
    max_time: Option<Duration>,
    comment: Option<Bson>,
}

impl GetMore {
    pub(crate) fn new(info: &CursorInformation, number_to_return: i32) -> Self {
        Self {
            ns: info.ns.clone(),
            cursor_id: info.id,
            number_to_return,
            max_time: info.max_time,
            comment: info.comment.clone(),
        }
    }
}

/// One batch fetched by a get-more.
#[derive(Debug, Clone)]
pub(crate) struct GetMoreResult {
    pub(crate) batch: VecDeque<RawDocumentBuf>,
    pub(crate) id: i64,
    pub(crate) post_batch_resume_token: Option<Document>,
    pub(crate) operation_time: Option<Timestamp>,
}

impl Operation for GetMore {
    type O = GetMoreResult;

    const NAME: &'static str = "getMore";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.cursor_id,
            "collection": self.ns.coll.clone(),
        };

        if self.number_to_return != 0 {
            body.insert("batchSize", self.number_to_return.saturating_abs());
        }

        append_max_time(&mut body, self.max_time);

        // The comment should only be propagated to getMore calls on 4.4+.
        if description.supports(SERVER_4_4_0_WIRE_VERSION) {
            if let Some(ref comment) = self.comment {
                body.insert("comment", comment.clone());
            }
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let response: CursorBody = response.body()?;
        Ok(GetMoreResult {
            batch: response.cursor.first_batch,
            id: response.cursor.id,
            post_batch_resume_token: response.cursor.post_batch_resume_token,
            operation_time: response.operation_time,
        })
    }
}
