#[cfg(test)]
mod test;

use std::{collections::VecDeque, marker::PhantomData, sync::Arc, time::Duration};

use derive_where::derive_where;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    binding::{ReadBinding, WriteBinding},
    bson::{self, doc, Bson, Document, RawDocumentBuf},
    bson_util,
    cmap::{Command, LeasedConnection, RawCommandResponse, StreamDescription},
    collation::Collation,
    concern::WriteConcern,
    cursor::{BatchCursor, CursorSpecification},
    error::Result,
    executor::{self, ReadOperation, WriteOperation},
    operation::{
        append_max_time,
        check_feature,
        remove_empty_write_concern,
        Operation,
        WriteConcernOnlyBody,
        SERVER_3_2_0_WIRE_VERSION,
        SERVER_3_4_0_WIRE_VERSION,
        SERVER_4_4_0_WIRE_VERSION,
    },
    results::MapReduceStatistics,
    BoxFuture,
    Namespace,
};

/// What a map-reduce does with an output collection that already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum MapReduceAction {
    /// Drop the existing contents.
    #[default]
    Replace,

    /// Overwrite documents with the same key and keep the rest.
    Merge,

    /// Run the reduce function over the new result and the existing document with the same
    /// key.
    Reduce,
}

impl MapReduceAction {
    fn as_str(self) -> &'static str {
        match self {
            MapReduceAction::Replace => "replace",
            MapReduceAction::Merge => "merge",
            MapReduceAction::Reduce => "reduce",
        }
    }
}

/// Where a [`MapReduceToCollection`] writes its results.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct MapReduceOutput {
    /// The name of the output collection.
    #[builder(!default)]
    pub collection: String,

    pub action: MapReduceAction,

    /// The database of the output collection. Defaults to the input collection's database.
    #[builder(setter(strip_option))]
    pub database: Option<String>,

    /// Whether the output collection is sharded. Ignored by MongoDB 4.4+.
    pub sharded: bool,

    /// Whether the output is written without locking the database. Ignored by MongoDB 4.4+.
    pub non_atomic: bool,
}

impl MapReduceOutput {
    fn to_document(&self, description: &StreamDescription) -> Document {
        let mut out = doc! { self.action.as_str(): self.collection.clone() };
        if !description.supports(SERVER_4_4_0_WIRE_VERSION) {
            if self.sharded {
                out.insert("sharded", true);
            }
            if self.non_atomic {
                out.insert("nonAtomic", true);
            }
        }
        if let Some(ref database) = self.database {
            out.insert("db", database.clone());
        }
        out
    }
}

/// Specifies the options to a map-reduce.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct MapReduceOptions {
    /// Selects the input documents.
    pub filter: Option<Document>,

    /// Sorts the input documents.
    pub sort: Option<Document>,

    /// A JavaScript function applied to the output of the reduce function.
    pub finalize: Option<String>,

    /// Global variables accessible in the map, reduce and finalize functions.
    pub scope: Option<Document>,

    /// Whether timing information is included in the result.
    pub verbose: Option<bool>,

    /// The maximum number of input documents.
    pub limit: Option<i64>,

    /// The maximum amount of time to allow the operation to run.
    pub max_time: Option<Duration>,

    /// Keep intermediate data in JavaScript objects instead of converting it to BSON.
    pub js_mode: Option<bool>,

    /// The collation to use for the operation. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// Opt out of document-level validation of the output. Only used when writing to a
    /// collection.
    pub bypass_document_validation: Option<bool>,

    /// The write concern of the output. Only used when writing to a collection.
    pub write_concern: Option<WriteConcern>,
}

/// The `mapReduce` command shared by the inline and the to-collection flavors.
fn build_map_reduce_body(
    ns: &Namespace,
    map: &str,
    reduce: &str,
    out: Document,
    options: Option<&MapReduceOptions>,
    description: &StreamDescription,
) -> Result<Document> {
    let mut body = doc! {
        "mapReduce": ns.coll.clone(),
        "map": Bson::JavaScriptCode(map.to_string()),
        "reduce": Bson::JavaScriptCode(reduce.to_string()),
        "out": out,
    };

    let Some(options) = options else {
        return Ok(body);
    };

    if let Some(ref filter) = options.filter {
        body.insert("query", filter.clone());
    }
    if let Some(ref sort) = options.sort {
        body.insert("sort", sort.clone());
    }
    if let Some(ref finalize) = options.finalize {
        body.insert("finalize", Bson::JavaScriptCode(finalize.clone()));
    }
    if let Some(ref scope) = options.scope {
        body.insert("scope", scope.clone());
    }
    if options.verbose == Some(true) {
        body.insert("verbose", true);
    }
    if let Some(limit) = options.limit.filter(|l| *l != 0) {
        body.insert("limit", limit);
    }
    append_max_time(&mut body, options.max_time.filter(|t| !t.is_zero()));
    if options.js_mode == Some(true) {
        body.insert("jsMode", true);
    }
    if let Some(ref collation) = options.collation {
        check_feature(description, SERVER_3_4_0_WIRE_VERSION, "Collation")?;
        body.insert("collation", bson::to_bson(collation)?);
    }
    Ok(body)
}

/// The statistics every map-reduce reply carries. Servers from 4.4 on omit `counts`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatisticsBody {
    #[serde(default)]
    counts: Option<Document>,

    #[serde(default)]
    time_millis: Option<Bson>,
}

impl StatisticsBody {
    fn into_statistics(self) -> MapReduceStatistics {
        let count = |key: &str| {
            self.counts
                .as_ref()
                .and_then(|counts| counts.get(key))
                .and_then(bson_util::get_u64)
                .unwrap_or(0)
        };
        MapReduceStatistics {
            input_count: count("input"),
            emit_count: count("emit"),
            output_count: count("output"),
            duration: Duration::from_millis(
                self.time_millis
                    .as_ref()
                    .and_then(bson_util::get_u64)
                    .unwrap_or(0),
            ),
        }
    }
}

/// The results of a [`MapReduceWithInlineResults`]: an exhausted cursor over the `results` of
/// the reply, plus the server's statistics.
#[derive_where(Debug)]
pub struct MapReduceCursor<T> {
    cursor: BatchCursor<T>,
    statistics: MapReduceStatistics,
}

impl<T> MapReduceCursor<T> {
    pub fn statistics(&self) -> &MapReduceStatistics {
        &self.statistics
    }

    pub fn cursor(&mut self) -> &mut BatchCursor<T> {
        &mut self.cursor
    }

    pub fn into_parts(self) -> (BatchCursor<T>, MapReduceStatistics) {
        (self.cursor, self.statistics)
    }
}

impl<T: DeserializeOwned> MapReduceCursor<T> {
    /// Returns the next batch of results.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<T>>> {
        self.cursor.next_batch().await
    }
}

/// Runs a map-reduce whose results are returned in the command reply.
#[derive_where(Debug)]
pub struct MapReduceWithInlineResults<T> {
    ns: Namespace,
    map: String,
    reduce: String,
    options: Option<MapReduceOptions>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> MapReduceWithInlineResults<T> {
    /// `map` and `reduce` are the source of JavaScript functions.
    pub fn new(
        ns: Namespace,
        map: impl Into<String>,
        reduce: impl Into<String>,
        options: impl Into<Option<MapReduceOptions>>,
    ) -> Self {
        Self {
            ns,
            map: map.into(),
            reduce: reduce.into(),
            options: options.into(),
            _phantom: PhantomData,
        }
    }
}

impl<T> Operation for MapReduceWithInlineResults<T> {
    type O = (CursorSpecification, MapReduceStatistics);

    const NAME: &'static str = "mapReduce";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        let body = build_map_reduce_body(
            &self.ns,
            &self.map,
            &self.reduce,
            doc! { "inline": 1 },
            self.options.as_ref(),
            description,
        )?;
        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O> {
        #[derive(Debug, Deserialize)]
        struct Response {
            #[serde(default)]
            results: VecDeque<RawDocumentBuf>,
        }

        let statistics = response.body::<StatisticsBody>()?.into_statistics();
        let results: Response = response.body()?;

        let mut spec =
            CursorSpecification::empty(self.ns.clone(), description.server_address.clone());
        spec.initial_buffer = results.results;
        Ok((spec, statistics))
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        true
    }
}

impl<T: DeserializeOwned> ReadOperation for MapReduceWithInlineResults<T> {
    type Output = MapReduceCursor<T>;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn ReadBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let source = binding.read_connection_source().await?;
            let mut connection = LeasedConnection::checkout(&source).await?;
            let (spec, statistics) = executor::execute_operation(
                self,
                &mut connection,
                binding.session_context(),
                Some(binding.read_preference()),
            )
            .await?;
            Ok(MapReduceCursor {
                cursor: BatchCursor::new(spec, connection),
                statistics,
            })
        })
    }
}

/// Runs a map-reduce that writes its results to a collection.
#[derive(Debug, Clone)]
pub struct MapReduceToCollection {
    ns: Namespace,
    map: String,
    reduce: String,
    output: MapReduceOutput,
    options: Option<MapReduceOptions>,
}

impl MapReduceToCollection {
    pub fn new(
        ns: Namespace,
        map: impl Into<String>,
        reduce: impl Into<String>,
        output: MapReduceOutput,
        options: impl Into<Option<MapReduceOptions>>,
    ) -> Self {
        let mut options = options.into();
        remove_empty_write_concern!(options);
        Self {
            ns,
            map: map.into(),
            reduce: reduce.into(),
            output,
            options,
        }
    }

    /// The namespace the results are written to.
    pub fn output_namespace(&self) -> Namespace {
        Namespace {
            db: self
                .output
                .database
                .clone()
                .unwrap_or_else(|| self.ns.db.clone()),
            coll: self.output.collection.clone(),
        }
    }
}

impl Operation for MapReduceToCollection {
    type O = MapReduceStatistics;

    const NAME: &'static str = "mapReduce";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        let mut body = build_map_reduce_body(
            &self.ns,
            &self.map,
            &self.reduce,
            self.output.to_document(description),
            self.options.as_ref(),
            description,
        )?;
        if let Some(bypass) = self
            .options
            .as_ref()
            .and_then(|o| o.bypass_document_validation)
        {
            if description.supports(SERVER_3_2_0_WIRE_VERSION) {
                body.insert("bypassDocumentValidation", bypass);
            }
        }

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
        response.body::<WriteConcernOnlyBody>()?.validate()?;
        Ok(response.body::<StatisticsBody>()?.into_statistics())
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.as_ref().and_then(|o| o.write_concern.as_ref())
    }
}

impl WriteOperation for MapReduceToCollection {
    type Output = MapReduceStatistics;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn WriteBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_write(self, binding))
    }
}
