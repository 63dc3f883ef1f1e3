use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::WriteBinding,
    bson::{self, doc, Bson},
    cmap::{Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    error::{Error, Result},
    executor::{self, WriteOperation},
    index::IndexModel,
    operation::{
        append_options,
        check_feature,
        remove_empty_write_concern,
        Operation,
        WriteConcernOnlyBody,
        SERVER_3_4_0_WIRE_VERSION,
    },
    results::CreateIndexesResult,
    serde_util,
    BoxFuture,
    Namespace,
};

/// Specifies the options to a [`CreateIndexes`] operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CreateIndexOptions {
    /// The maximum amount of time to allow the index build to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// Tags the command so it can be found in the profiler and logs.
    pub comment: Option<Bson>,

    /// The write concern for the operation. Sent to MongoDB 3.4 and later only.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// Creates one or more indexes on a collection, creating the collection if it does not exist.
///
/// Indexes without a name are given the one the server would generate, so the names reported in
/// the result always match the server's.
#[derive(Debug, Clone)]
pub struct CreateIndexes {
    ns: Namespace,
    indexes: Vec<IndexModel>,
    options: Option<CreateIndexOptions>,
}

impl CreateIndexes {
    pub fn new(
        ns: Namespace,
        indexes: impl IntoIterator<Item = IndexModel>,
        options: impl Into<Option<CreateIndexOptions>>,
    ) -> Self {
        let mut options: Option<CreateIndexOptions> = options.into();
        remove_empty_write_concern!(options);
        Self {
            ns,
            indexes: indexes.into_iter().collect(),
            options,
        }
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.iter().map(IndexModel::name).collect()
    }
}

impl Operation for CreateIndexes {
    type O = CreateIndexesResult;

    const NAME: &'static str = "createIndexes";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        if self.indexes.is_empty() {
            return Err(Error::invalid_argument(
                "createIndexes requires at least one index",
            ));
        }
        if self.indexes.iter().any(|i| i.collation().is_some()) {
            check_feature(description, SERVER_3_4_0_WIRE_VERSION, "Collation")?;
        }

        let indexes: Vec<IndexModel> = self.indexes.iter().map(IndexModel::named).collect();
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "indexes": bson::to_bson(&indexes)?,
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
        response.validate()?;
        Ok(CreateIndexesResult {
            index_names: self.index_names(),
        })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }
}

impl WriteOperation for CreateIndexes {
    type Output = CreateIndexesResult;

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
    use crate::{
        collation::Collation,
        error::ErrorKind,
        options::IndexOptions,
        test::MockConnectionSource,
    };

    fn ns() -> Namespace {
        Namespace::new("db", "coll")
    }

    fn models() -> Vec<IndexModel> {
        vec![
            IndexModel::builder().keys(doc! { "a": 1, "b": -1 }).build(),
            IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(
                    IndexOptions::builder()
                        .name("unique_email".to_string())
                        .unique(true)
                        .build(),
                )
                .build(),
        ]
    }

    #[test]
    fn build() {
        let op = CreateIndexes::new(
            ns(),
            models(),
            CreateIndexOptions::builder()
                .max_time(Duration::from_millis(500))
                .write_concern(WriteConcern::majority())
                .build(),
        );
        let cmd = op.build(&StreamDescription::with_wire_version(8)).unwrap();
        assert_eq!(cmd.name, "createIndexes");
        assert_eq!(cmd.target_db, "db");
        assert_eq!(
            cmd.body,
            doc! {
                "createIndexes": "coll",
                "indexes": [
                    { "key": { "a": 1, "b": -1 }, "name": "a_1_b_-1" },
                    { "key": { "email": 1 }, "name": "unique_email", "unique": true },
                ],
                "maxTimeMS": 500_i64,
                "writeConcern": { "w": "majority" },
            }
        );
    }

    #[test]
    fn write_concern_omitted_before_3_4() {
        let op = CreateIndexes::new(
            ns(),
            models(),
            CreateIndexOptions::builder()
                .write_concern(WriteConcern::majority())
                .build(),
        );
        let cmd = op.build(&StreamDescription::with_wire_version(4)).unwrap();
        assert!(!cmd.body.contains_key("writeConcern"));
    }

    #[test]
    fn collation_requires_3_4() {
        let model = IndexModel::builder()
            .keys(doc! { "name": 1 })
            .options(
                IndexOptions::builder()
                    .collation(Collation::builder().locale("fr").build())
                    .build(),
            )
            .build();
        let op = CreateIndexes::new(ns(), vec![model], None);
        let error = op.build(&StreamDescription::with_wire_version(4)).unwrap_err();
        assert!(error.is_invalid_argument());
        op.build(&StreamDescription::with_wire_version(5)).unwrap();
    }

    #[test]
    fn no_indexes_is_rejected() {
        let op = CreateIndexes::new(ns(), Vec::new(), None);
        let error = op.build(&StreamDescription::new_testing()).unwrap_err();
        assert!(error.is_invalid_argument());
    }

    #[tokio::test]
    async fn execute_reports_index_names() {
        let mock = MockConnectionSource::with_wire_version(8);
        mock.reply(doc! {
            "ok": 1,
            "createdCollectionAutomatically": true,
            "numIndexesBefore": 1,
            "numIndexesAfter": 3,
        });

        let op = CreateIndexes::new(ns(), models(), None);
        let result = op.execute(&mock.write_binding()).await.unwrap();
        assert_eq!(result.index_names, vec!["a_1_b_-1", "unique_email"]);

        let sent = mock.commands();
        assert_eq!(sent.len(), 1);
        let indexes = sent[0].body.get_array("indexes").unwrap();
        assert_eq!(indexes.len(), 2);
        mock.assert_all_released();
    }

    #[tokio::test]
    async fn write_concern_error_is_reported() {
        let mock = MockConnectionSource::with_wire_version(8);
        mock.reply(doc! {
            "ok": 1,
            "writeConcernError": { "code": 64, "codeName": "WriteConcernFailed", "errmsg": "timed out" },
        });

        let op = CreateIndexes::new(ns(), models(), None);
        let error = op.execute(&mock.write_binding()).await.unwrap_err();
        assert!(matches!(*error.kind, ErrorKind::Write(_)));
        assert_eq!(error.code(), Some(64));
        mock.assert_all_released();
    }

    #[tokio::test]
    async fn command_failure_is_surfaced() {
        let mock = MockConnectionSource::with_wire_version(8);
        mock.reply(doc! {
            "ok": 0,
            "code": 85,
            "codeName": "IndexOptionsConflict",
            "errmsg": "index already exists with different options",
        });

        let op = CreateIndexes::new(ns(), models(), None);
        let error = op.execute(&mock.write_binding()).await.unwrap_err();
        assert_eq!(error.code(), Some(85));
        mock.assert_all_released();
    }
}
