pub(crate) mod options;

use std::{fmt::Debug, marker::PhantomData, sync::Arc};

use derive_where::derive_where;
use serde::{de::DeserializeOwned, Deserialize};

use self::options::{
    FindAndDeleteOptions,
    FindAndModifyOptions,
    FindAndReplaceOptions,
    FindAndUpdateOptions,
    Modification,
};
use crate::{
    binding::WriteBinding,
    bson::{doc, from_slice, Document, RawBson},
    bson_util,
    cmap::{Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    error::{Error, Result},
    executor::{self, WriteOperation},
    operation::{
        append_options,
        bulk_write::UpdateModifications,
        check_feature,
        Operation,
        WriteConcernOnlyBody,
        SERVER_3_2_0_WIRE_VERSION,
        SERVER_3_4_0_WIRE_VERSION,
        SERVER_3_6_0_WIRE_VERSION,
        SERVER_4_2_0_WIRE_VERSION,
        SERVER_4_4_0_WIRE_VERSION,
    },
    BoxFuture,
    Namespace,
};

/// Atomically finds a single document and deletes, replaces or updates it, returning the
/// document as it was before (or, on request, after) the modification.
#[derive_where(Debug)]
pub struct FindAndModify<T> {
    ns: Namespace,
    query: Document,
    options: FindAndModifyOptions,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> FindAndModify<T> {
    /// Finds and deletes the first document matching `filter`.
    pub fn with_delete(
        ns: Namespace,
        filter: Document,
        options: impl Into<Option<FindAndDeleteOptions>>,
    ) -> Self {
        let options = FindAndModifyOptions::from_delete_options(
            options.into().unwrap_or_default(),
        );
        Self::new(ns, filter, options)
    }

    /// Finds the first document matching `filter` and replaces it. Fails if `replacement`
    /// contains update operators.
    pub fn with_replace(
        ns: Namespace,
        filter: Document,
        replacement: Document,
        options: impl Into<Option<FindAndReplaceOptions>>,
    ) -> Result<Self> {
        bson_util::replacement_document_check(&replacement)?;
        let options = FindAndModifyOptions::from_replace_options(
            replacement,
            options.into().unwrap_or_default(),
        );
        Ok(Self::new(ns, filter, options))
    }

    /// Finds the first document matching `filter` and updates it. An update document must
    /// consist solely of update operators.
    pub fn with_update(
        ns: Namespace,
        filter: Document,
        update: impl Into<UpdateModifications>,
        options: impl Into<Option<FindAndUpdateOptions>>,
    ) -> Result<Self> {
        let update = update.into();
        if let UpdateModifications::Document(ref d) = update {
            bson_util::update_document_check(d)?;
        }
        let options =
            FindAndModifyOptions::from_update_options(update, options.into().unwrap_or_default());
        Ok(Self::new(ns, filter, options))
    }

    fn new(ns: Namespace, query: Document, mut options: FindAndModifyOptions) -> Self {
        if options.write_concern.as_ref().is_some_and(|wc| wc.is_empty()) {
            options.write_concern = None;
        }
        Self {
            ns,
            query,
            options,
            _phantom: PhantomData,
        }
    }

    fn is_delete(&self) -> bool {
        matches!(self.options.modification, Modification::Delete)
    }

    fn check_unacknowledged(&self) -> Result<()> {
        let unacknowledged = self
            .options
            .write_concern
            .as_ref()
            .is_some_and(|wc| !wc.is_acknowledged());
        if !unacknowledged {
            return Ok(());
        }
        if self.options.collation.is_some() {
            return Err(Error::invalid_argument(
                "Specifying collation with an unacknowledged WriteConcern is not supported",
            ));
        }
        if self.options.bypass_document_validation.is_some() {
            return Err(Error::invalid_argument(
                "Specifying bypassDocumentValidation with an unacknowledged WriteConcern is not \
                 supported",
            ));
        }
        Ok(())
    }
}

impl<T: DeserializeOwned> Operation for FindAndModify<T> {
    type O = Option<T>;

    const NAME: &'static str = "findandmodify";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        let options = &self.options;
        self.check_unacknowledged()?;
        if options.collation.is_some() {
            check_feature(description, SERVER_3_4_0_WIRE_VERSION, "Collation")?;
        }
        if options.array_filters.is_some() {
            check_feature(description, SERVER_3_6_0_WIRE_VERSION, "Array filters")?;
        }
        if options.hint.is_some() {
            if self.is_delete() {
                check_feature(description, SERVER_4_4_0_WIRE_VERSION, "Hint")?;
            } else {
                check_feature(description, SERVER_4_2_0_WIRE_VERSION, "Hint")?;
            }
        }
        if let Modification::Update(UpdateModifications::Pipeline(_)) = options.modification {
            check_feature(description, SERVER_4_2_0_WIRE_VERSION, "Pipeline updates")?;
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "query": self.query.clone(),
        };
        append_options(&mut body, Some(options))?;

        let mut command = Command::new(Self::NAME, self.ns.db.clone(), body);
        if description.supports(SERVER_3_2_0_WIRE_VERSION) {
            command.set_write_concern(self.write_concern())?;
        }
        Ok(command)
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        response.body::<WriteConcernOnlyBody>()?.validate()?;

        #[derive(Debug, Deserialize)]
        struct Response {
            #[serde(default)]
            value: Option<RawBson>,
        }
        let response: Response = response.body()?;

        match response.value {
            Some(RawBson::Document(doc)) => Ok(Some(from_slice(doc.as_bytes())?)),
            Some(RawBson::Null) | None => Ok(None),
            Some(other) => Err(Error::invalid_response(format!(
                "expected document for value field of findAndModify response, but instead got \
                 {:?}",
                other
            ))),
        }
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.write_concern.as_ref()
    }
}

impl<T: DeserializeOwned> WriteOperation for FindAndModify<T> {
    type Output = Option<T>;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn WriteBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_write(self, binding))
    }
}
