use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    binding::ReadBinding,
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, RawCommandResponse, StreamDescription},
    collation::Collation,
    error::{Error, Result},
    executor::{self, ReadOperation},
    operation::{append_options, check_feature, Operation, SERVER_3_4_0_WIRE_VERSION},
    options::Hint,
    serde_util,
    BoxFuture,
    Namespace,
};

/// Specifies the options to a [`Count`] operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CountOptions {
    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The maximum number of documents to count.
    #[serde(skip)]
    pub limit: Option<i64>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// The number of documents to skip before counting.
    #[serde(skip)]
    pub skip: Option<i64>,

    /// The collation to use for the operation. Requires MongoDB 3.4.
    pub collation: Option<Collation>,
}

/// Counts the documents in a collection that match a filter, using the `count` command.
///
/// Counting a collection that does not exist yields zero.
#[derive(Debug, Clone)]
pub struct Count {
    ns: Namespace,
    filter: Option<Document>,
    options: Option<CountOptions>,
}

impl Count {
    pub fn new(ns: Namespace) -> Self {
        Self {
            ns,
            filter: None,
            options: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<Option<Document>>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_options(mut self, options: impl Into<Option<CountOptions>>) -> Self {
        self.options = options.into();
        self
    }
}

impl Operation for Count {
    type O = u64;

    const NAME: &'static str = "count";

    fn build(&self, description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };

        if let Some(ref filter) = self.filter {
            body.insert("query", filter.clone());
        }

        if let Some(ref options) = self.options {
            if options.collation.is_some() {
                check_feature(description, SERVER_3_4_0_WIRE_VERSION, "Collation")?;
            }
            if let Some(limit) = options.limit.filter(|l| *l != 0) {
                body.insert("limit", limit);
            }
            if let Some(skip) = options.skip.filter(|s| *s != 0) {
                body.insert("skip", skip);
            }
        }

        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let response_body: ResponseBody = response.body()?;
        bson_util::get_u64(&response_body.n)
            .ok_or_else(|| Error::invalid_response(format!("invalid count: {}", response_body.n)))
    }

    fn handle_error(&self, error: Error, _description: &StreamDescription) -> Result<Self::O> {
        if error.is_ns_not_found() {
            Ok(0)
        } else {
            Err(error)
        }
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        true
    }
}

impl ReadOperation for Count {
    type Output = u64;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn ReadBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(executor::execute_read(self, binding))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseBody {
    n: Bson,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{bson_util, error::ErrorKind};

    #[test]
    fn build() {
        let count = Count::new(Namespace::new("test_db", "test_coll"))
            .with_filter(doc! { "x": 1 })
            .with_options(
                CountOptions::builder()
                    .limit(10)
                    .skip(0)
                    .max_time(Duration::from_millis(50))
                    .hint(Hint::Name("x_1".to_string()))
                    .build(),
            );

        let mut cmd = count.build(&StreamDescription::new_testing()).unwrap();
        assert_eq!(cmd.name, "count");
        assert_eq!(cmd.target_db, "test_db");

        let mut expected = doc! {
            "count": "test_coll",
            "query": { "x": 1 },
            "limit": 10_i64,
            "maxTimeMS": 50_i64,
            "hint": "x_1",
        };
        bson_util::sort_document(&mut cmd.body);
        bson_util::sort_document(&mut expected);
        assert_eq!(cmd.body, expected);
    }

    #[test]
    fn build_without_filter() {
        let count = Count::new(Namespace::new("db", "coll"));
        let cmd = count.build(&StreamDescription::new_testing()).unwrap();
        assert_eq!(cmd.body, doc! { "count": "coll" });
    }

    #[test]
    fn collation_requires_3_4() {
        let count = Count::new(Namespace::new("db", "coll")).with_options(
            CountOptions::builder()
                .collation(Collation::builder().locale("en").build())
                .build(),
        );
        let err = count
            .build(&StreamDescription::with_wire_version(4))
            .unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::InvalidArgument { .. }));
        assert!(err.to_string().contains("Collation"));

        count
            .build(&StreamDescription::with_wire_version(5))
            .expect("collation is supported on 3.4");
    }

    #[test]
    fn handle_response_accepts_double_counts() {
        let count = Count::new(Namespace::new("db", "coll"));
        let response = RawCommandResponse::with_document(
            Default::default(),
            &doc! { "n": 5.0, "ok": 1.0 },
        )
        .unwrap();
        let n = count
            .handle_response(response, &StreamDescription::new_testing())
            .unwrap();
        assert_eq!(n, 5);
    }
}
