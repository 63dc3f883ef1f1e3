use std::{marker::PhantomData, sync::Arc, time::Duration};

use derive_where::derive_where;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::ReadBinding,
    bson::doc,
    cmap::{Command, RawCommandResponse, StreamDescription},
    cursor::{BatchCursor, CursorSpecification},
    error::{Error, Result},
    executor::{self, ReadOperation},
    operation::{append_options, CursorBody, Operation},
    serde_util,
    BoxFuture,
    Namespace,
};

/// Specifies the options to a [`ListIndexes`] operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ListIndexesOptions {
    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// The number of indexes the server should return per cursor batch.
    #[serde(skip)]
    pub batch_size: Option<i32>,
}

/// Lists the indexes of a collection. Listing the indexes of a collection that does not exist
/// yields an empty cursor.
#[derive_where(Debug)]
pub struct ListIndexes<T> {
    ns: Namespace,
    options: Option<ListIndexesOptions>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ListIndexes<T> {
    pub fn new(ns: Namespace, options: impl Into<Option<ListIndexesOptions>>) -> Self {
        Self {
            ns,
            options: options.into(),
            _phantom: PhantomData,
        }
    }

    fn batch_size(&self) -> Option<i32> {
        self.options.as_ref().and_then(|o| o.batch_size)
    }
}

impl<T> Operation for ListIndexes<T> {
    type O = CursorSpecification;

    const NAME: &'static str = "listIndexes";

    fn build(&self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };
        if let Some(size) = self.batch_size().filter(|s| *s != 0) {
            body.insert("cursor", doc! { "batchSize": size.saturating_abs() });
        }
        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
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
                self.ns.clone(),
                description.server_address.clone(),
            ))
        } else {
            Err(error)
        }
    }
}

impl<T: DeserializeOwned> ReadOperation for ListIndexes<T> {
    type Output = BatchCursor<T>;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn ReadBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_cursor_operation(self, binding))
    }
}
