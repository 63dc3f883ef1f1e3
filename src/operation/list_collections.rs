use std::{marker::PhantomData, sync::Arc, time::Duration};

use derive_where::derive_where;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::ReadBinding,
    bson::{doc, Bson, Document},
    cmap::{Command, RawCommandResponse, StreamDescription},
    cursor::{BatchCursor, CursorSpecification},
    error::{Error, Result},
    executor::{self, ReadOperation},
    operation::{append_options, CursorBody, Operation},
    serde_util,
    BoxFuture,
    Namespace,
};

/// Specifies the options to a [`ListCollections`] operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ListCollectionsOptions {
    /// Only list the collections matching this filter.
    pub filter: Option<Document>,

    /// Return only the name and type of each collection. This lets the server skip taking
    /// collection locks.
    #[serde(skip)]
    pub name_only: Option<bool>,

    /// The maximum amount of time to allow the command to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// Only list the collections the user is privileged to see. Requires `name_only`.
    pub authorized_collections: Option<bool>,

    /// Tags the command so it can be found in the profiler and logs.
    pub comment: Option<Bson>,

    /// The number of collections the server should return per cursor batch.
    #[serde(skip)]
    pub batch_size: Option<i32>,
}

/// Lists the collections of a database. A database that does not exist has no collections.
#[derive_where(Debug)]
pub struct ListCollections<T> {
    db: String,
    options: Option<ListCollectionsOptions>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ListCollections<T> {
    pub fn new(db: impl Into<String>, options: impl Into<Option<ListCollectionsOptions>>) -> Self {
        Self {
            db: db.into(),
            options: options.into(),
            _phantom: PhantomData,
        }
    }

    fn batch_size(&self) -> Option<i32> {
        self.options.as_ref().and_then(|o| o.batch_size)
    }

    fn name_only(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|o| o.name_only)
            .unwrap_or(false)
    }

    /// The namespace the server reports for the listing cursor.
    fn cursor_namespace(&self) -> Namespace {
        Namespace::new(self.db.as_str(), "$cmd.listCollections")
    }
}

impl<T> Operation for ListCollections<T> {
    type O = CursorSpecification;

    const NAME: &'static str = "listCollections";

    fn build(&self, _description: &StreamDescription) -> Result<Command> {
        let mut cursor = Document::new();
        if let Some(size) = self.batch_size().filter(|s| *s != 0) {
            cursor.insert("batchSize", size.saturating_abs());
        }
        let mut body = doc! {
            Self::NAME: 1,
            "cursor": cursor,
        };
        if self.name_only() {
            body.insert("nameOnly", true);
        }
        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let source = response.source_address().clone();
        let body: CursorBody = response.body()?;
        Ok(CursorSpecification::new(
            body,
            source,
            self.batch_size(),
            None,
        ))
    }

    fn handle_error(&self, error: Error, description: &StreamDescription) -> Result<Self::O> {
        if error.is_ns_not_found() {
            Ok(CursorSpecification::empty(
                self.cursor_namespace(),
                description.server_address.clone(),
            ))
        } else {
            Err(error)
        }
    }
}

impl<T: DeserializeOwned> ReadOperation for ListCollections<T> {
    type Output = BatchCursor<T>;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn ReadBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_cursor_operation(self, binding))
    }
}
