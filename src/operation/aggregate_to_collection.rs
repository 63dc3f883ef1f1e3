use std::sync::Arc;

use crate::{
    binding::WriteBinding,
    bson::Document,
    cmap::{Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    error::{Error, Result},
    executor::{self, WriteOperation},
    operation::{
        aggregate::{build_aggregate_body, is_out_or_merge, AggregateOptions, AggregateTarget},
        check_pipeline_not_empty,
        remove_empty_write_concern,
        Operation,
        WriteConcernOnlyBody,
        SERVER_3_2_0_WIRE_VERSION,
        SERVER_3_4_0_WIRE_VERSION,
    },
    BoxFuture,
};

/// Runs an aggregation pipeline whose final stage writes the results to a collection with
/// `$out` or `$merge`.
#[derive(Debug, Clone)]
pub struct AggregateToCollection {
    target: AggregateTarget,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
}

impl AggregateToCollection {
    pub fn new(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Self {
        let mut options: Option<AggregateOptions> = options.into();
        remove_empty_write_concern!(options);
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options,
        }
    }

    fn validate(&self) -> Result<()> {
        check_pipeline_not_empty(&self.pipeline, Self::NAME)?;
        if !is_out_or_merge(&self.pipeline) {
            return Err(Error::invalid_argument(
                "the last stage of the aggregate pipeline must be $out or $merge",
            ));
        }
        Ok(())
    }
}

impl Operation for AggregateToCollection {
    type O = ();

    const NAME: &'static str = "aggregate";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        self.validate()?;

        let mut body = build_aggregate_body(
            &self.target,
            &self.pipeline,
            self.options.as_ref(),
            description,
        )?;
        if !description.supports(SERVER_3_2_0_WIRE_VERSION) {
            body.remove("bypassDocumentValidation");
        }

        let mut command = Command::new(Self::NAME, self.target.db_name(), body);
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

    fn supports_read_concern(&self, description: &StreamDescription) -> bool {
        description.supports(SERVER_3_4_0_WIRE_VERSION)
    }
}

impl WriteOperation for AggregateToCollection {
    type Output = ();

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn WriteBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_write(self, binding))
    }
}
