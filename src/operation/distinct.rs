use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::ReadBinding,
    bson::{doc, Bson, Document},
    cmap::{Command, RawCommandResponse, StreamDescription},
    collation::Collation,
    error::Result,
    executor::{self, ReadOperation},
    operation::{append_options, check_feature, Operation, SERVER_3_4_0_WIRE_VERSION},
    serde_util,
    BoxFuture,
    Namespace,
};

/// Specifies the options to a [`Distinct`] operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DistinctOptions {
    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// The collation to use for the operation. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary value to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,
}

/// Finds the distinct values of a field across the documents matching a filter.
#[derive(Debug, Clone)]
pub struct Distinct {
    ns: Namespace,
    field_name: String,
    query: Option<Document>,
    options: Option<DistinctOptions>,
}

impl Distinct {
    pub fn new(
        ns: Namespace,
        field_name: impl Into<String>,
        query: impl Into<Option<Document>>,
        options: impl Into<Option<DistinctOptions>>,
    ) -> Self {
        Self {
            ns,
            field_name: field_name.into(),
            query: query.into(),
            options: options.into(),
        }
    }
}

impl Operation for Distinct {
    type O = Vec<Bson>;

    const NAME: &'static str = "distinct";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        if self
            .options
            .as_ref()
            .is_some_and(|o| o.collation.is_some())
        {
            check_feature(description, SERVER_3_4_0_WIRE_VERSION, "Collation")?;
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "key": self.field_name.clone(),
        };
        if let Some(ref query) = self.query {
            body.insert("query", query.clone());
        }

        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let response: Response = response.body()?;
        Ok(response.values)
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        true
    }
}

impl ReadOperation for Distinct {
    type Output = Vec<Bson>;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn ReadBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_read(self, binding))
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    values: Vec<Bson>,
}
