use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::WriteBinding,
    bson::doc,
    cmap::{Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    error::{Error, Result},
    executor::{self, WriteOperation},
    operation::{
        remove_empty_write_concern,
        Operation,
        WriteConcernOnlyBody,
        SERVER_3_4_0_WIRE_VERSION,
    },
    BoxFuture,
    Namespace,
};

/// Specifies the options to a [`DropCollection`] operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DropCollectionOptions {
    /// The write concern for the operation.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// Drops a collection. Dropping a collection that does not exist succeeds.
#[derive(Debug, Clone)]
pub struct DropCollection {
    ns: Namespace,
    options: Option<DropCollectionOptions>,
}

impl DropCollection {
    pub fn new(ns: Namespace, options: impl Into<Option<DropCollectionOptions>>) -> Self {
        let mut options: Option<DropCollectionOptions> = options.into();
        remove_empty_write_concern!(options);
        Self { ns, options }
    }
}

impl Operation for DropCollection {
    type O = ();

    const NAME: &'static str = "drop";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };

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

    fn handle_error(&self, error: Error, _description: &StreamDescription) -> Result<Self::O> {
        if error.is_ns_not_found() {
            Ok(())
        } else {
            Err(error)
        }
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }
}

impl WriteOperation for DropCollection {
    type Output = ();

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn WriteBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_write(self, binding))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::{CommandError, ErrorKind};

    #[test]
    fn build() {
        let op = DropCollection::new(
            Namespace::new("db", "coll"),
            DropCollectionOptions::builder()
                .write_concern(WriteConcern::majority())
                .build(),
        );
        let cmd = op.build(&StreamDescription::new_testing()).unwrap();
        assert_eq!(cmd.name, "drop");
        assert_eq!(
            cmd.body,
            doc! { "drop": "coll", "writeConcern": { "w": "majority" } }
        );
    }

    #[test]
    fn missing_namespace_is_not_an_error() {
        let op = DropCollection::new(Namespace::new("db", "coll"), None);
        let error: Error = ErrorKind::Command(CommandError {
            code: 26,
            code_name: "NamespaceNotFound".to_string(),
            message: "ns not found".to_string(),
        })
        .into();
        op.handle_error(error, &StreamDescription::new_testing())
            .expect("ns not found should be ignored");

        let other: Error = ErrorKind::Command(CommandError {
            code: 13,
            code_name: "Unauthorized".to_string(),
            message: String::new(),
        })
        .into();
        assert!(op
            .handle_error(other, &StreamDescription::new_testing())
            .is_err());
    }
}
