use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::WriteBinding,
    bson::{doc, Document},
    cmap::{Command, RawCommandResponse, StreamDescription},
    collation::Collation,
    concern::WriteConcern,
    error::Result,
    executor::{self, WriteOperation},
    operation::{
        append_options,
        check_feature,
        remove_empty_write_concern,
        Operation,
        WriteConcernOnlyBody,
        SERVER_3_4_0_WIRE_VERSION,
    },
    BoxFuture,
    Namespace,
};

/// Specifies the options to a [`CreateCollection`] operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CreateCollectionOptions {
    /// Whether the collection should be capped. If true, `size` must also be set.
    pub capped: Option<bool>,

    /// The maximum size (in bytes) for a capped collection. This option is ignored if `capped`
    /// is not set to true.
    pub size: Option<u64>,

    /// The maximum number of documents in a capped collection. The `size` limit takes precedence
    /// over this option. If a capped collection reaches the size limit before it reaches the
    /// maximum number of documents, MongoDB removes old documents.
    pub max: Option<u64>,

    /// Whether an index on `_id` is created. Removed in MongoDB 4.0.
    pub auto_index_id: Option<bool>,

    /// The storage engine that the collection should use. The value should take the following
    /// form:
    ///
    /// `{ <storage-engine-name>: <options> }`
    pub storage_engine: Option<Document>,

    /// Default configuration for indexes created on this collection.
    pub index_option_defaults: Option<Document>,

    /// Specifies a validator to restrict the schema of documents which can exist in the
    /// collection. Expressions can be specified using any query operators except `$near`,
    /// `$nearSphere`, `$text`, and `$where`.
    pub validator: Option<Document>,

    /// Specifies how strictly the database should apply the validation rules to existing
    /// documents during an update.
    pub validation_level: Option<ValidationLevel>,

    /// Specifies whether the database should return an error or simply raise a warning if
    /// inserted documents do not pass the validation.
    pub validation_action: Option<ValidationAction>,

    /// The default collation for the collection. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// The write concern for the operation.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// Specifies how strictly the database should apply validation rules to existing documents
/// during an update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum ValidationLevel {
    /// Perform no validation for inserts and updates.
    Off,
    /// Perform validation on all inserts and updates.
    Strict,
    /// Perform validation on inserts as well as updates on existing valid documents, but do not
    /// perform validations on updates on existing invalid documents.
    Moderate,
}

/// Specifies whether the database should return an error or simply raise a warning if inserted
/// documents do not pass the validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum ValidationAction {
    /// Return an error if inserted documents do not pass the validation.
    Error,
    /// Raise a warning if inserted documents do not pass the validation.
    Warn,
}

/// Creates a collection.
#[derive(Debug, Clone)]
pub struct CreateCollection {
    ns: Namespace,
    options: Option<CreateCollectionOptions>,
}

impl CreateCollection {
    pub fn new(ns: Namespace, options: impl Into<Option<CreateCollectionOptions>>) -> Self {
        let mut options: Option<CreateCollectionOptions> = options.into();
        remove_empty_write_concern!(options);
        Self { ns, options }
    }
}

impl Operation for CreateCollection {
    type O = ();

    const NAME: &'static str = "create";

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
        };
        append_options(&mut body, self.options.as_ref())?;

        let mut command = Command::new(Self::NAME, self.ns.db.clone(), body);
        if description.supports(SERVER_3_4_0_WIRE_VERSION) {
            command.set_write_concern(self.write_concern())?;
        }
        Ok(command)
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let response: WriteConcernOnlyBody = response.body()?;
        response.validate()
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }
}

impl WriteOperation for CreateCollection {
    type Output = ();

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn WriteBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_write(self, binding))
    }
}
