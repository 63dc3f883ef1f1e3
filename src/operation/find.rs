
use std::{marker::PhantomData, sync::Arc, time::Duration};

use derive_where::derive_where;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::{ReadBinding, SessionContext},
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{
        Command,
        LeasedConnection,
        LegacyQuery,
        QueryFlags,
        RawCommandResponse,
        StreamDescription,
    },
    collation::Collation,
    cursor::{BatchCursor, CursorSpecification},
    error::Result,
    executor::{self, ReadOperation},
    operation::{
        append_options,
        check_feature,
        CursorBody,
        Operation,
        SERVER_3_2_0_WIRE_VERSION,
        SERVER_3_4_0_WIRE_VERSION,
    },
    options::{CursorType, Hint},
    sdam::ServerType,
    selection_criteria::ReadPreference,
    serde_util,
    BoxFuture,
    Namespace,
};

/// Specifies the options to a [`Find`] operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindOptions {
    /// Enables writing to temporary files by the server.
    pub allow_disk_use: Option<bool>,

    /// If true, partial results will be returned from a mongos rather than an error being
    /// returned if one or more shards is down.
    pub allow_partial_results: Option<bool>,

    /// The number of documents the server should return per cursor batch. A negative value asks
    /// for a single batch of at most that many documents, after which the cursor is closed.
    #[serde(skip)]
    pub batch_size: Option<i32>,

    /// The collation to use for the operation. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary value to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,

    /// The type of cursor to return.
    #[serde(skip)]
    pub cursor_type: Option<CursorType>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The maximum number of documents to return. A negative value returns at most that many
    /// documents in a single batch.
    #[serde(skip)]
    pub limit: Option<i32>,

    /// The exclusive upper bound for a specific index.
    pub max: Option<Document>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a tailable
    /// await cursor. Ignored for other cursor types.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// The inclusive lower bound for a specific index.
    pub min: Option<Document>,

    /// Legacy query modifiers such as `$orderby` or `$maxTimeMS`.
    ///
    /// Only consulted for options that are not set directly; prefer the typed options.
    #[serde(skip)]
    pub modifiers: Option<Document>,

    /// Whether the server should close the cursor after a period of inactivity.
    pub no_cursor_timeout: Option<bool>,

    /// Internal replication flag for tailing the oplog.
    pub oplog_replay: Option<bool>,

    /// Limits the fields of the document being returned.
    #[serde(skip)]
    pub projection: Option<Document>,

    /// Whether to return only the index keys in the documents.
    pub return_key: Option<bool>,

    /// Whether to return the record identifier for each document.
    pub show_record_id: Option<bool>,

    /// The number of documents to skip.
    #[serde(skip)]
    pub skip: Option<u32>,

    /// The order of the documents for the purposes of the operation.
    #[serde(skip)]
    pub sort: Option<Document>,
}

impl FindOptions {
    /// Copies legacy `modifiers` into the typed options they correspond to, without overriding
    /// any typed option that is already set.
    fn with_modifiers_folded(&self) -> Self {
        let mut options = self.clone();
        let modifiers = match options.modifiers.take() {
            Some(modifiers) => modifiers,
            None => return options,
        };
        for (key, value) in modifiers {
            match key.as_str() {
                "$orderby" => {
                    if let (true, Bson::Document(d)) = (options.sort.is_none(), &value) {
                        options.sort = Some(d.clone());
                    }
                }
                "$maxTimeMS" => {
                    if let (true, Some(ms)) = (options.max_time.is_none(), bson_util::get_u64(&value)) {
                        options.max_time = Some(Duration::from_millis(ms));
                    }
                }
                "$comment" => {
                    options.comment.get_or_insert(value);
                }
                "$hint" => {
                    if options.hint.is_none() {
                        options.hint = Hint::from_bson(&value);
                    }
                }
                "$max" => {
                    if let (true, Bson::Document(d)) = (options.max.is_none(), &value) {
                        options.max = Some(d.clone());
                    }
                }
                "$min" => {
                    if let (true, Bson::Document(d)) = (options.min.is_none(), &value) {
                        options.min = Some(d.clone());
                    }
                }
                "$returnKey" => {
                    if let (true, Bson::Boolean(b)) = (options.return_key.is_none(), &value) {
                        options.return_key = Some(*b);
                    }
                }
                "$showDiskLoc" => {
                    if let (true, Bson::Boolean(b)) = (options.show_record_id.is_none(), &value) {
                        options.show_record_id = Some(*b);
                    }
                }
                _ => {}
            }
        }
        options
    }

    fn cursor_type(&self) -> CursorType {
        self.cursor_type.unwrap_or_default()
    }
}

/// Queries a collection, returning a [`BatchCursor`] over the matching documents.
///
/// Servers older than 3.2 are queried with an OP_QUERY message instead of the `find` command.
#[derive_where(Debug)]
pub struct Find<T> {
    ns: Namespace,
    filter: Option<Document>,
    options: FindOptions,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Find<T> {
    pub fn new(
        ns: Namespace,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Self {
        let options: Option<FindOptions> = options.into();
        Self {
            ns,
            filter: filter.into(),
            options: options
                .map(|o| o.with_modifiers_folded())
                .unwrap_or_default(),
            _phantom: PhantomData,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    fn limit(&self) -> i32 {
        self.options.limit.unwrap_or(0)
    }

    fn batch_size(&self) -> i32 {
        self.options.batch_size.unwrap_or(0)
    }

    /// The get-more wait of an await-data cursor.
    fn max_await_time(&self) -> Option<Duration> {
        if self.options.cursor_type().is_await_data() {
            self.options.max_await_time
        } else {
            None
        }
    }

    fn cursor_spec(&self, spec: CursorSpecification) -> CursorSpecification {
        let cursor_type = self.options.cursor_type();
        spec.with_limit(self.limit())
            .with_comment(self.options.comment.clone())
            .with_cursor_type(cursor_type.is_tailable(), cursor_type.is_await_data())
    }

    /// The OP_QUERY document: the bare filter, or a `$query` wrapper when any modifier applies.
    fn legacy_query_document(
        &self,
        description: &StreamDescription,
        read_preference: &ReadPreference,
    ) -> Document {
        let options = &self.options;
        let mut document = Document::new();

        if let Some(ref sort) = options.sort {
            document.insert("$orderby", sort.clone());
        }
        if let Some(max_time) = options.max_time {
            document.insert(
                "$maxTimeMS",
                i64::try_from(max_time.as_millis()).unwrap_or(i64::MAX),
            );
        }
        if description.initial_server_type == ServerType::Mongos
            && *read_preference != ReadPreference::Primary
        {
            document.insert("$readPreference", read_preference.to_document());
        }
        if let Some(ref comment) = options.comment {
            document.insert("$comment", comment.clone());
        }
        if let Some(ref hint) = options.hint {
            document.insert("$hint", hint.to_bson());
        }
        if let Some(ref max) = options.max {
            document.insert("$max", max.clone());
        }
        if let Some(ref min) = options.min {
            document.insert("$min", min.clone());
        }
        if options.return_key == Some(true) {
            document.insert("$returnKey", true);
        }
        if options.show_record_id == Some(true) {
            document.insert("$showDiskLoc", true);
        }

        if document.is_empty() {
            return self.filter.clone().unwrap_or_default();
        }
        document.insert("$query", self.filter.clone().unwrap_or_default());
        document
    }

    fn legacy_query_flags(&self, read_preference: &ReadPreference) -> QueryFlags {
        let options = &self.options;
        let cursor_type = options.cursor_type();
        let mut flags = QueryFlags::empty();
        flags.set(QueryFlags::TAILABLE_CURSOR, cursor_type.is_tailable());
        flags.set(QueryFlags::AWAIT_DATA, cursor_type.is_await_data());
        flags.set(QueryFlags::SECONDARY_OK, read_preference.secondary_ok());
        flags.set(
            QueryFlags::NO_CURSOR_TIMEOUT,
            options.no_cursor_timeout == Some(true),
        );
        flags.set(
            QueryFlags::PARTIAL,
            options.allow_partial_results == Some(true),
        );
        flags.set(QueryFlags::OPLOG_REPLAY, options.oplog_replay == Some(true));
        flags
    }

    /// Builds the OP_QUERY used against servers older than 3.2.
    pub(crate) fn build_legacy(
        &self,
        description: &StreamDescription,
        session: &SessionContext,
        read_preference: &ReadPreference,
    ) -> Result<LegacyQuery> {
        if session
            .read_concern_internal()
            .is_some_and(|rc| rc.level.is_some())
        {
            check_feature(description, SERVER_3_2_0_WIRE_VERSION, "ReadConcern")?;
        }
        if self.options.collation.is_some() {
            check_feature(description, SERVER_3_4_0_WIRE_VERSION, "Collation")?;
        }

        Ok(LegacyQuery {
            namespace: self.ns.clone(),
            query: self.legacy_query_document(description, read_preference),
            projection: self.options.projection.clone().filter(|p| !p.is_empty()),
            skip: i32::try_from(self.options.skip.unwrap_or(0)).unwrap_or(i32::MAX),
            number_to_return: legacy_number_to_return(self.limit(), self.batch_size()),
            flags: self.legacy_query_flags(read_preference),
        })
    }

    async fn execute_legacy(
        &self,
        connection: &mut LeasedConnection,
        session: &SessionContext,
        read_preference: &ReadPreference,
    ) -> Result<CursorSpecification> {
        let query = self.build_legacy(connection.description(), session, read_preference)?;
        let reply = connection.query(query).await?.validate()?;
        let spec = CursorSpecification::legacy(
            self.ns.clone(),
            reply,
            self.batch_size(),
            self.max_await_time(),
        )?;
        Ok(self.cursor_spec(spec))
    }
}

/// The `numberToReturn` of an OP_QUERY for the given limit and batch size.
pub(crate) fn legacy_number_to_return(limit: i32, batch_size: i32) -> i32 {
    if limit < 0 {
        limit
    } else if limit == 0 {
        batch_size
    } else if batch_size == 0 {
        limit
    } else if limit < batch_size.saturating_abs() {
        limit
    } else {
        batch_size
    }
}

impl<T> Operation for Find<T> {
    type O = CursorSpecification;

    const NAME: &'static str = "find";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        let options = &self.options;
        if options.collation.is_some() {
            check_feature(description, SERVER_3_4_0_WIRE_VERSION, "Collation")?;
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };

        if let Some(ref filter) = self.filter {
            body.insert("filter", filter.clone());
        }
        if let Some(ref sort) = options.sort {
            if !sort.is_empty() {
                body.insert("sort", sort.clone());
            }
        }
        if let Some(ref projection) = options.projection {
            if !projection.is_empty() {
                body.insert("projection", projection.clone());
            }
        }
        if let Some(skip) = options.skip.filter(|s| *s > 0) {
            body.insert("skip", i64::from(skip));
        }

        let limit = self.limit();
        let batch_size = self.batch_size();
        if limit != 0 {
            body.insert("limit", limit.saturating_abs());
        }
        if limit >= 0 {
            if batch_size < 0 && batch_size.saturating_abs() < limit {
                body.insert("limit", batch_size.saturating_abs());
            } else if batch_size != 0 {
                body.insert("batchSize", batch_size.saturating_abs());
            }
        }
        // negative limits and batch sizes ask for a single batch.
        if limit < 0 || batch_size < 0 {
            body.insert("singleBatch", true);
        }

        let cursor_type = options.cursor_type();
        if cursor_type.is_tailable() {
            body.insert("tailable", true);
        }
        if cursor_type.is_await_data() {
            body.insert("awaitData", true);
        }

        append_options(&mut body, Some(options))?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let source = response.source_address().clone();
        let body: CursorBody = response.body()?;
        Ok(self.cursor_spec(CursorSpecification::new(
            body,
            source,
            self.batch_size(),
            self.max_await_time(),
        )))
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        true
    }
}

impl<T: DeserializeOwned> ReadOperation for Find<T> {
    type Output = BatchCursor<T>;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn ReadBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let source = binding.read_connection_source().await?;
            let mut connection = LeasedConnection::checkout(&source).await?;
            let spec = if connection.description().supports(SERVER_3_2_0_WIRE_VERSION) {
                executor::execute_operation(
                    self,
                    &mut connection,
                    binding.session_context(),
                    Some(binding.read_preference()),
                )
                .await?
            } else {
                self.execute_legacy(
                    &mut connection,
                    binding.session_context(),
                    binding.read_preference(),
                )
                .await?
            };
            Ok(BatchCursor::new(spec, connection))
        })
    }
}
