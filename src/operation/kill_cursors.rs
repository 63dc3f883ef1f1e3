use crate::{
    bson::{doc, Bson},
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::Result,
    operation::Operation,
    Namespace,
};

#[derive(Debug)]
pub(crate) struct KillCursors {
    ns: Namespace,
    cursor_ids: Vec<i64>,
}

impl KillCursors {
    pub(crate) fn new(ns: Namespace, cursor_ids: Vec<i64>) -> Self {
        Self { ns, cursor_ids }
    }
}

impl Operation for KillCursors {
    type O = ();

    const NAME: &'static str = "killCursors";

    fn build(&self, _description: &StreamDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "cursors": self.cursor_ids.iter().copied().map(Bson::Int64).collect::<Vec<_>>(),
        };
        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        _response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(())
    }
}
