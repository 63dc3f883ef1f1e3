#[cfg(test)]
mod test;

use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::WriteBinding,
    bson::{self, doc, oid::ObjectId, Bson, Document},
    bson_util::{self, array_entry_size_bytes, doc_size_bytes},
    cmap::{Command, LeasedConnection, RawCommandResponse, StreamDescription},
    collation::Collation,
    concern::WriteConcern,
    error::{BulkWriteFailure, Error, ErrorKind, IndexedWriteError, Result, WriteConcernError},
    executor::{self, WriteOperation},
    operation::{
        append_options,
        check_feature,
        Operation,
        COMMAND_OVERHEAD_SIZE,
        SERVER_3_4_0_WIRE_VERSION,
        SERVER_3_6_0_WIRE_VERSION,
        SERVER_4_2_0_WIRE_VERSION,
        SERVER_4_4_0_WIRE_VERSION,
    },
    options::Hint,
    results::{BulkWriteResult, UpsertedId},
    BoxFuture,
    Namespace,
};

/// Specifies the options to a [`MixedBulkWrite`] operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BulkWriteOptions {
    /// Whether the requests must be executed in order, stopping at the first failed request.
    /// Defaults to true.
    #[serde(skip)]
    pub ordered: Option<bool>,

    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The write concern for the operation.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    /// Tags the operation with an arbitrary value to help trace it through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,

    /// Variables accessible in filters and updates as `$$<name>`.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,
}

/// The modifications applied by an update: either an update document made of update operators,
/// or an aggregation pipeline (MongoDB 4.2+).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum UpdateModifications {
    Document(Document),
    Pipeline(Vec<Document>),
}

impl UpdateModifications {
    pub(crate) fn to_bson(&self) -> Bson {
        match self {
            UpdateModifications::Document(ref d) => Bson::Document(d.clone()),
            UpdateModifications::Pipeline(ref p) => bson_util::to_bson_array(p),
        }
    }
}

impl From<Document> for UpdateModifications {
    fn from(item: Document) -> Self {
        UpdateModifications::Document(item)
    }
}

impl From<Vec<Document>> for UpdateModifications {
    fn from(item: Vec<Document>) -> Self {
        UpdateModifications::Pipeline(item)
    }
}

/// What an [`UpdateRequest`] does to the documents it matches.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum UpdateOrReplace {
    UpdateModifications(UpdateModifications),
    Replacement(Document),
}

impl UpdateOrReplace {
    fn validate(&self) -> Result<()> {
        match self {
            UpdateOrReplace::UpdateModifications(UpdateModifications::Document(ref d)) => {
                bson_util::update_document_check(d)
            }
            UpdateOrReplace::UpdateModifications(UpdateModifications::Pipeline(_)) => Ok(()),
            UpdateOrReplace::Replacement(ref d) => bson_util::replacement_document_check(d),
        }
    }

    fn to_bson(&self) -> Bson {
        match self {
            UpdateOrReplace::UpdateModifications(ref m) => m.to_bson(),
            UpdateOrReplace::Replacement(ref d) => Bson::Document(d.clone()),
        }
    }

    fn is_pipeline(&self) -> bool {
        matches!(
            self,
            UpdateOrReplace::UpdateModifications(UpdateModifications::Pipeline(_))
        )
    }
}

impl From<UpdateModifications> for UpdateOrReplace {
    fn from(m: UpdateModifications) -> Self {
        UpdateOrReplace::UpdateModifications(m)
    }
}

/// An update or replacement of the documents matching a filter.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct UpdateRequest {
    #[builder(!default)]
    pub filter: Document,

    #[builder(!default)]
    pub update: UpdateOrReplace,

    /// Update every matching document rather than only the first. Not allowed for replacements.
    pub multi: bool,

    /// Insert a document when nothing matches the filter.
    pub upsert: bool,

    #[builder(setter(strip_option))]
    pub collation: Option<Collation>,

    #[builder(setter(strip_option))]
    pub array_filters: Option<Vec<Document>>,

    #[builder(setter(strip_option))]
    pub hint: Option<Hint>,
}

/// A deletion of the documents matching a filter.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DeleteRequest {
    #[builder(!default)]
    pub filter: Document,

    /// Delete every matching document rather than only the first.
    pub multi: bool,

    #[builder(setter(strip_option))]
    pub collation: Option<Collation>,

    #[builder(setter(strip_option))]
    pub hint: Option<Hint>,
}

/// One request of a [`MixedBulkWrite`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum WriteRequest {
    Insert(Document),
    Update(UpdateRequest),
    Delete(DeleteRequest),
}

impl WriteRequest {
    pub fn insert(document: Document) -> Self {
        WriteRequest::Insert(document)
    }

    pub fn update_one(filter: Document, update: impl Into<UpdateModifications>) -> Self {
        Self::update(filter, update.into(), false)
    }

    pub fn update_many(filter: Document, update: impl Into<UpdateModifications>) -> Self {
        Self::update(filter, update.into(), true)
    }

    fn update(filter: Document, update: UpdateModifications, multi: bool) -> Self {
        WriteRequest::Update(
            UpdateRequest::builder()
                .filter(filter)
                .update(UpdateOrReplace::UpdateModifications(update))
                .multi(multi)
                .build(),
        )
    }

    pub fn replace_one(filter: Document, replacement: Document) -> Self {
        WriteRequest::Update(
            UpdateRequest::builder()
                .filter(filter)
                .update(UpdateOrReplace::Replacement(replacement))
                .build(),
        )
    }

    pub fn delete_one(filter: Document) -> Self {
        WriteRequest::Delete(DeleteRequest::builder().filter(filter).build())
    }

    pub fn delete_many(filter: Document) -> Self {
        WriteRequest::Delete(DeleteRequest::builder().filter(filter).multi(true).build())
    }

    fn kind(&self) -> BatchKind {
        match self {
            WriteRequest::Insert(_) => BatchKind::Insert,
            WriteRequest::Update(_) => BatchKind::Update,
            WriteRequest::Delete(_) => BatchKind::Delete,
        }
    }

    fn collation(&self) -> Option<&Collation> {
        match self {
            WriteRequest::Insert(_) => None,
            WriteRequest::Update(u) => u.collation.as_ref(),
            WriteRequest::Delete(d) => d.collation.as_ref(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            WriteRequest::Insert(_) => Ok(()),
            WriteRequest::Update(u) => {
                if u.multi && matches!(u.update, UpdateOrReplace::Replacement(_)) {
                    return Err(Error::invalid_argument(
                        "a replacement cannot apply to multiple documents",
                    ));
                }
                u.update.validate()
            }
            WriteRequest::Delete(_) => Ok(()),
        }
    }

    /// The version gates of the options set on this request.
    fn check_features(&self, description: &StreamDescription) -> Result<()> {
        if self.collation().is_some() {
            check_feature(description, SERVER_3_4_0_WIRE_VERSION, "Collation")?;
        }
        match self {
            WriteRequest::Insert(_) => {}
            WriteRequest::Update(u) => {
                if u.array_filters.is_some() {
                    check_feature(description, SERVER_3_6_0_WIRE_VERSION, "Array filters")?;
                }
                if u.hint.is_some() {
                    check_feature(description, SERVER_4_2_0_WIRE_VERSION, "Hint")?;
                }
                if u.update.is_pipeline() {
                    check_feature(description, SERVER_4_2_0_WIRE_VERSION, "Pipeline updates")?;
                }
            }
            WriteRequest::Delete(d) => {
                if d.hint.is_some() {
                    check_feature(description, SERVER_4_4_0_WIRE_VERSION, "Hint")?;
                }
            }
        }
        Ok(())
    }

    /// The entry this request contributes to its command's `documents`, `updates` or `deletes`
    /// array.
    fn to_entry(&self) -> Result<Document> {
        let entry = match self {
            WriteRequest::Insert(d) => d.clone(),
            WriteRequest::Update(u) => {
                let mut entry = doc! {
                    "q": u.filter.clone(),
                    "u": u.update.to_bson(),
                };
                if u.multi {
                    entry.insert("multi", true);
                }
                if u.upsert {
                    entry.insert("upsert", true);
                }
                if let Some(ref collation) = u.collation {
                    entry.insert("collation", bson::to_bson(collation)?);
                }
                if let Some(ref array_filters) = u.array_filters {
                    entry.insert("arrayFilters", bson_util::to_bson_array(array_filters));
                }
                if let Some(ref hint) = u.hint {
                    entry.insert("hint", hint.to_bson());
                }
                entry
            }
            WriteRequest::Delete(d) => {
                let mut entry = doc! {
                    "q": d.filter.clone(),
                    "limit": if d.multi { 0 } else { 1 },
                };
                if let Some(ref collation) = d.collation {
                    entry.insert("collation", bson::to_bson(collation)?);
                }
                if let Some(ref hint) = d.hint {
                    entry.insert("hint", hint.to_bson());
                }
                entry
            }
        };
        Ok(entry)
    }
}

impl From<UpdateRequest> for WriteRequest {
    fn from(request: UpdateRequest) -> Self {
        WriteRequest::Update(request)
    }
}

impl From<DeleteRequest> for WriteRequest {
    fn from(request: DeleteRequest) -> Self {
        WriteRequest::Delete(request)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BatchKind {
    Insert,
    Update,
    Delete,
}

impl BatchKind {
    fn command_name(self) -> &'static str {
        match self {
            BatchKind::Insert => "insert",
            BatchKind::Update => "update",
            BatchKind::Delete => "delete",
        }
    }

    fn payload_name(self) -> &'static str {
        match self {
            BatchKind::Insert => "documents",
            BatchKind::Update => "updates",
            BatchKind::Delete => "deletes",
        }
    }
}

/// One command's worth of requests of a single kind. `indices[i]` is the position in the
/// original request list of the batch's `i`th entry.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Batch {
    pub(crate) kind: BatchKind,
    pub(crate) indices: Vec<usize>,
    entries: Vec<Document>,
}

/// Executes a list of inserts, updates and deletes, grouped into as few `insert`, `update` and
/// `delete` commands as the server's batch limits allow.
///
/// Ordered writes stop at the first batch that reports a write error. Unordered writes run every
/// batch and report all of the errors. Either way the errors are indexed by their position in
/// the list given to [`MixedBulkWrite::new`].
#[derive(Debug, Clone)]
pub struct MixedBulkWrite {
    ns: Namespace,
    requests: Vec<WriteRequest>,
    options: BulkWriteOptions,
}

impl MixedBulkWrite {
    /// Fails if `requests` is empty or contains a malformed update or replacement. Inserted
    /// documents without an `_id` get a generated one.
    pub fn new(
        ns: Namespace,
        requests: impl IntoIterator<Item = WriteRequest>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> Result<Self> {
        let mut requests: Vec<WriteRequest> = requests.into_iter().collect();
        if requests.is_empty() {
            return Err(Error::invalid_argument("write requests must not be empty"));
        }
        for request in requests.iter_mut() {
            request.validate()?;
            if let WriteRequest::Insert(ref mut document) = request {
                if !document.contains_key("_id") {
                    let mut with_id = doc! { "_id": ObjectId::new() };
                    with_id.extend(std::mem::take(document));
                    *document = with_id;
                }
            }
        }

        let mut options: BulkWriteOptions = options.into().unwrap_or_default();
        if options.write_concern.as_ref().is_some_and(|wc| wc.is_empty()) {
            options.write_concern = None;
        }

        Ok(Self {
            ns,
            requests,
            options,
        })
    }

    pub fn requests(&self) -> &[WriteRequest] {
        &self.requests
    }

    fn ordered(&self) -> bool {
        self.options.ordered.unwrap_or(true)
    }

    fn is_acknowledged(&self) -> bool {
        self.options
            .write_concern
            .as_ref()
            .map_or(true, WriteConcern::is_acknowledged)
    }

    /// The checks made before anything is sent.
    pub(crate) fn validate(&self, description: &StreamDescription) -> Result<()> {
        if !self.is_acknowledged() {
            if self.options.bypass_document_validation.is_some() {
                return Err(Error::invalid_argument(
                    "Specifying bypassDocumentValidation with an unacknowledged WriteConcern is \
                     not supported",
                ));
            }
            if self.requests.iter().any(|r| r.collation().is_some()) {
                return Err(Error::invalid_argument(
                    "Specifying collation with an unacknowledged WriteConcern is not supported",
                ));
            }
        }
        for request in &self.requests {
            request.check_features(description)?;
        }
        Ok(())
    }

    /// Groups the requests into batches. Ordered writes batch runs of consecutive requests of
    /// the same kind; unordered writes batch every request of a kind together. Each batch is
    /// then split so that neither the server's batch count nor its message size is exceeded.
    pub(crate) fn split(&self, description: &StreamDescription) -> Result<Vec<Batch>> {
        let max_count = usize::try_from(description.max_write_batch_size)
            .unwrap_or(usize::MAX)
            .max(1);
        let max_doc_size = usize::try_from(description.max_bson_object_size).unwrap_or(usize::MAX);
        let max_batch_size = usize::try_from(description.max_message_size_bytes)
            .unwrap_or(usize::MAX)
            .saturating_sub(COMMAND_OVERHEAD_SIZE)
            .max(max_doc_size);

        let mut groups: Vec<(BatchKind, Vec<usize>)> = Vec::new();
        if self.ordered() {
            for (index, request) in self.requests.iter().enumerate() {
                match groups.last_mut() {
                    Some((kind, indices)) if *kind == request.kind() => indices.push(index),
                    _ => groups.push((request.kind(), vec![index])),
                }
            }
        } else {
            for (index, request) in self.requests.iter().enumerate() {
                match groups.iter_mut().find(|(kind, _)| *kind == request.kind()) {
                    Some((_, indices)) => indices.push(index),
                    None => groups.push((request.kind(), vec![index])),
                }
            }
        }

        let mut batches = Vec::new();
        for (kind, indices) in groups {
            let mut current = Batch {
                kind,
                indices: Vec::new(),
                entries: Vec::new(),
            };
            let mut current_size = 0;
            for index in indices {
                let entry = self.requests[index].to_entry()?;
                let doc_size = doc_size_bytes(&entry)?;
                if doc_size > max_doc_size {
                    return Err(Error::invalid_argument(format!(
                        "write request at index {} is {} bytes, but the maximum document size \
                         is {} bytes",
                        index, doc_size, max_doc_size
                    )));
                }
                let entry_size = array_entry_size_bytes(current.entries.len(), doc_size);
                if !current.entries.is_empty()
                    && (current.entries.len() >= max_count
                        || current_size + entry_size > max_batch_size)
                {
                    batches.push(std::mem::replace(
                        &mut current,
                        Batch {
                            kind,
                            indices: Vec::new(),
                            entries: Vec::new(),
                        },
                    ));
                    current_size = 0;
                }
                current_size += array_entry_size_bytes(current.entries.len(), doc_size);
                current.indices.push(index);
                current.entries.push(entry);
            }
            if !current.entries.is_empty() {
                batches.push(current);
            }
        }
        Ok(batches)
    }

    async fn execute_batches(&self, binding: &Arc<dyn WriteBinding>) -> Result<BulkWriteResult> {
        let source = binding.write_connection_source().await?;
        let mut connection = LeasedConnection::checkout(&source).await?;
        let description = connection.description().clone();

        self.validate(&description)?;
        let batches = self.split(&description)?;

        let mut combiner = BulkWriteCombiner::new(self.ordered());
        for batch in batches {
            if combiner.should_stop_sending_batches() {
                break;
            }
            let op = BatchWrite {
                ns: &self.ns,
                batch: &batch,
                ordered: self.ordered(),
                options: &self.options,
            };
            let response = executor::execute_operation(
                &op,
                &mut connection,
                binding.session_context(),
                None,
            )
            .await?;
            combiner.add(&batch, response);
        }
        connection.release();

        if self.is_acknowledged() {
            combiner.finish()
        } else {
            Ok(BulkWriteResult::unacknowledged())
        }
    }
}

impl WriteOperation for MixedBulkWrite {
    type Output = BulkWriteResult;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn WriteBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(self.execute_batches(binding))
    }
}

/// The command for a single batch of a [`MixedBulkWrite`].
#[derive(Debug)]
pub(crate) struct BatchWrite<'a> {
    ns: &'a Namespace,
    batch: &'a Batch,
    ordered: bool,
    options: &'a BulkWriteOptions,
}

impl Operation for BatchWrite<'_> {
    type O = BatchResponse;

    const NAME: &'static str = "insert";

    fn build(&self, _description: &StreamDescription) -> Result<Command> {
        let kind = self.batch.kind;
        let mut body = doc! {
            kind.command_name(): self.ns.coll.clone(),
            kind.payload_name(): bson_util::to_bson_array(&self.batch.entries),
            "ordered": self.ordered,
        };
        append_options(&mut body, Some(self.options))?;

        let mut command = Command::new(kind.command_name(), self.ns.db.clone(), body);
        command.set_write_concern(self.write_concern())?;
        Ok(command)
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        response.body()
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.write_concern.as_ref()
    }

    fn name(&self) -> &str {
        self.batch.kind.command_name()
    }
}

/// The reply to an `insert`, `update` or `delete` command.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BatchResponse {
    #[serde(default)]
    n: u64,

    #[serde(default)]
    n_modified: u64,

    #[serde(default)]
    upserted: Vec<UpsertedId>,

    #[serde(default)]
    write_errors: Vec<IndexedWriteError>,

    write_concern_error: Option<WriteConcernError>,

    #[serde(default)]
    error_labels: Vec<String>,
}

/// Merges the replies of the batches of a bulk write, translating batch-local indices back to
/// positions in the original request list.
#[derive(Debug)]
pub(crate) struct BulkWriteCombiner {
    ordered: bool,
    result: BulkWriteResult,
    write_errors: Vec<IndexedWriteError>,
    write_concern_error: Option<WriteConcernError>,
    labels: HashSet<String>,
}

impl BulkWriteCombiner {
    pub(crate) fn new(ordered: bool) -> Self {
        Self {
            ordered,
            result: BulkWriteResult::acknowledged(),
            write_errors: Vec::new(),
            write_concern_error: None,
            labels: HashSet::new(),
        }
    }

    pub(crate) fn add(&mut self, batch: &Batch, response: BatchResponse) {
        let map_index = |local: usize| batch.indices.get(local).copied().unwrap_or(local);

        match batch.kind {
            BatchKind::Insert => {
                self.result.inserted_count += response.n;
                let failed: HashSet<usize> =
                    response.write_errors.iter().map(|e| e.index).collect();
                let first_failure = failed.iter().min().copied();
                for (local, entry) in batch.entries.iter().enumerate() {
                    let stopped = self.ordered && first_failure.is_some_and(|f| local >= f);
                    if failed.contains(&local) || stopped {
                        continue;
                    }
                    if let Some(id) = entry.get("_id") {
                        self.result.inserted_ids.insert(map_index(local), id.clone());
                    }
                }
            }
            BatchKind::Update => {
                let upserted = response.upserted.len() as u64;
                self.result.matched_count += response.n.saturating_sub(upserted);
                self.result.modified_count += response.n_modified;
                self.result
                    .upserts
                    .extend(response.upserted.into_iter().map(|mut upsert| {
                        upsert.index = map_index(upsert.index);
                        upsert
                    }));
            }
            BatchKind::Delete => {
                self.result.deleted_count += response.n;
            }
        }

        self.write_errors
            .extend(response.write_errors.into_iter().map(|mut error| {
                error.index = map_index(error.index);
                error
            }));
        if let Some(wc_error) = response.write_concern_error {
            self.write_concern_error = Some(wc_error);
        }
        self.labels.extend(response.error_labels);
    }

    /// Ordered writes stop after the first batch with a write error. Write concern errors never
    /// stop a bulk write.
    pub(crate) fn should_stop_sending_batches(&self) -> bool {
        self.ordered && !self.write_errors.is_empty()
    }

    pub(crate) fn finish(self) -> Result<BulkWriteResult> {
        if self.write_errors.is_empty() && self.write_concern_error.is_none() {
            return Ok(self.result);
        }
        Err(Error::new(
            ErrorKind::BulkWrite(BulkWriteFailure {
                write_errors: self.write_errors,
                write_concern_error: self.write_concern_error,
                partial_result: self.result,
            }),
            Some(self.labels),
        ))
    }
}
