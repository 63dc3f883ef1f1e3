use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    error::{ErrorKind, WriteFailure},
    operation::{
        aggregate::{Aggregate, AggregateTarget},
        test::{build_test, handle_response_test, handle_response_test_with_wire_version},
        AggregateToCollection,
        Operation,
    },
    options::{AggregateOptions, Collation, WriteConcern},
    test::MockConnectionSource,
    Namespace,
    ReadOperation,
};

fn ns() -> Namespace {
    Namespace::new("test_db", "test_coll")
}

#[test]
fn build() {
    let pipeline = vec![doc! { "$match": { "x": 3 } }];
    let options = AggregateOptions::builder()
        .allow_disk_use(true)
        .batch_size(5)
        .max_time(Duration::from_millis(10))
        .comment(Bson::from("hi"))
        .build();
    let aggregate = Aggregate::<Document>::new(ns(), pipeline, options);

    let mut body = build_test(&aggregate, 8).unwrap();
    let mut expected = doc! {
        "aggregate": "test_coll",
        "pipeline": [{ "$match": { "x": 3 } }],
        "cursor": { "batchSize": 5 },
        "allowDiskUse": true,
        "maxTimeMS": 10_i64,
        "comment": "hi",
    };
    bson_util::sort_document(&mut body);
    bson_util::sort_document(&mut expected);
    assert_eq!(body, expected);
}

#[test]
fn build_database_target() {
    let aggregate = Aggregate::<Document>::new(
        "admin",
        vec![doc! { "$currentOp": {} }],
        None,
    );
    let cmd = aggregate
        .build(&crate::cmap::StreamDescription::new_testing())
        .unwrap();
    assert_eq!(cmd.target_db, "admin");
    assert_eq!(
        cmd.body,
        doc! {
            "aggregate": 1,
            "pipeline": [{ "$currentOp": {} }],
            "cursor": {},
        }
    );
}

#[test]
fn empty_pipeline_is_rejected() {
    let aggregate = Aggregate::<Document>::new(ns(), Vec::new(), None);
    let error = build_test(&aggregate, 8).unwrap_err();
    assert!(error.is_invalid_argument());
    assert!(error.to_string().contains("non-empty pipeline"));
}

#[tokio::test]
async fn empty_pipeline_never_reaches_the_server() {
    let mock = MockConnectionSource::with_wire_version(8);
    let aggregate = Aggregate::<Document>::new(ns(), Vec::new(), None);

    let error = aggregate.execute(&mock.read_binding()).await.unwrap_err();
    assert!(error.is_invalid_argument());
    assert!(mock.commands().is_empty());
    mock.assert_all_released();
}

#[test]
fn zero_batch_size_omitted_for_out() {
    let options = AggregateOptions::builder().batch_size(0).build();
    let aggregate = Aggregate::<Document>::new(
        ns(),
        vec![doc! { "$out": "other" }],
        options.clone(),
    );
    let body = build_test(&aggregate, 8).unwrap();
    assert_eq!(body.get_document("cursor").unwrap(), &doc! {});

    let aggregate = Aggregate::<Document>::new(ns(), vec![doc! { "$match": {} }], options);
    let body = build_test(&aggregate, 8).unwrap();
    assert_eq!(
        body.get_document("cursor").unwrap(),
        &doc! { "batchSize": 0 }
    );
}

#[test]
fn version_gates() {
    let options = AggregateOptions::builder()
        .collation(Collation::builder().locale("fr").build())
        .build();
    let aggregate = Aggregate::<Document>::new(ns(), vec![doc! { "$match": {} }], options);
    let error = build_test(&aggregate, 4).unwrap_err();
    assert!(error.to_string().contains("Collation"));
    build_test(&aggregate, 5).unwrap();

    let merge = Aggregate::<Document>::new(ns(), vec![doc! { "$merge": { "into": "a" } }], None);
    let error = build_test(&merge, 7).unwrap_err();
    assert!(error.is_invalid_argument());
    assert!(error.to_string().contains("MongoDB 4.2"));
    build_test(&merge, 8).unwrap();
}

#[test]
fn handle_max_await_time() {
    let response = doc! {
        "ok": 1,
        "cursor": {
            "id": 123,
            "ns": "a.b",
            "firstBatch": []
        }
    };

    let aggregate = Aggregate::<Document>::new(ns(), Vec::new(), None);
    let spec = handle_response_test(&aggregate, response.clone()).unwrap();
    assert!(spec.info.max_time.is_none());
    assert_eq!(spec.id(), 123);
    assert_eq!(spec.info.ns, Namespace::new("a", "b"));

    let max_await = Duration::from_millis(123);
    let options = AggregateOptions::builder()
        .max_await_time(max_await)
        .build();
    let aggregate = Aggregate::<Document>::new(ns(), Vec::new(), options);
    let spec = handle_response_test(&aggregate, response).unwrap();
    assert_eq!(spec.info.max_time, Some(max_await));
}

#[test]
fn comment_only_forwarded_to_get_more_on_4_4() {
    let response = doc! {
        "ok": 1,
        "cursor": { "id": 1, "ns": "a.b", "firstBatch": [] },
    };
    let options = AggregateOptions::builder().comment(Bson::from("c")).build();
    let aggregate = Aggregate::<Document>::new(ns(), Vec::new(), options);

    let spec = handle_response_test_with_wire_version(&aggregate, response.clone(), 8).unwrap();
    assert_eq!(spec.info.comment, None);

    let spec = handle_response_test_with_wire_version(&aggregate, response, 9).unwrap();
    assert_eq!(spec.info.comment, Some(Bson::from("c")));
}

#[test]
fn handle_write_concern_error() {
    let response = doc! {
        "ok": 1.0,
        "cursor": {
            "id": 0,
            "ns": "test.test",
            "firstBatch": [],
        },
        "writeConcernError": {
            "code": 64,
            "codeName": "WriteConcernFailed",
            "errmsg": "Waiting for replication timed out",
            "errInfo": {
                "wtimeout": true
            }
        }
    };

    let aggregate = Aggregate::<Document>::new(
        ns(),
        vec![doc! { "$merge": { "into": "a" } }],
        None,
    );

    let error = handle_response_test(&aggregate, response).unwrap_err();
    match *error.kind {
        ErrorKind::Write(WriteFailure::WriteConcernError(_)) => {}
        ref e => panic!("should have gotten WriteConcernError, got {:?} instead", e),
    }
}

#[test]
fn to_collection_requires_terminal_stage() {
    let empty = AggregateToCollection::new(ns(), Vec::new(), None);
    let error = build_test(&empty, 8).unwrap_err();
    assert!(error.is_invalid_argument());

    let no_out = AggregateToCollection::new(ns(), vec![doc! { "$match": {} }], None);
    let error = build_test(&no_out, 8).unwrap_err();
    assert!(error.to_string().contains("$out or $merge"));
}

#[test]
fn to_collection_build() {
    let options = AggregateOptions::builder()
        .bypass_document_validation(true)
        .write_concern(WriteConcern::majority())
        .build();
    let op = AggregateToCollection::new(
        ns(),
        vec![
            doc! { "$match": { "job": "plumber" } },
            doc! { "$out": "aggregateCollectionName" },
        ],
        options,
    );

    let mut body = build_test(&op, 8).unwrap();
    let mut expected = doc! {
        "aggregate": "test_coll",
        "pipeline": [
            { "$match": { "job": "plumber" } },
            { "$out": "aggregateCollectionName" },
        ],
        "cursor": {},
        "bypassDocumentValidation": true,
        "writeConcern": { "w": "majority" },
    };
    bson_util::sort_document(&mut body);
    bson_util::sort_document(&mut expected);
    assert_eq!(body, expected);

    // neither the write concern nor document validation bypass exist on 3.0.
    let body = build_test(&op, 3).unwrap();
    assert!(!body.contains_key("writeConcern"));
    assert!(!body.contains_key("bypassDocumentValidation"));
}

#[test]
fn target_namespace() {
    assert_eq!(AggregateTarget::from(ns()).namespace(), ns());
    assert_eq!(
        AggregateTarget::from("db").namespace(),
        Namespace::new("db", "$cmd.aggregate")
    );
}
