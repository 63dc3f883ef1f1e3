use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    error::{ErrorKind, WriteFailure},
    operation::{
        test::{build_test, handle_response_test},
        MapReduceToCollection,
        MapReduceWithInlineResults,
    },
    options::{
        Collation,
        MapReduceAction,
        MapReduceOptions,
        MapReduceOutput,
        WriteConcern,
    },
    results::MapReduceStatistics,
    Namespace,
};

const MAP: &str = "function() { emit(this.x, 1); }";
const REDUCE: &str = "function(key, values) { return Array.sum(values); }";

fn ns() -> Namespace {
    Namespace::new("test_db", "test_coll")
}

#[test]
fn build_inline() {
    let options = MapReduceOptions::builder()
        .filter(doc! { "x": { "$gt": 0 } })
        .sort(doc! { "x": 1 })
        .finalize("function(key, value) { return value; }")
        .scope(doc! { "factor": 2 })
        .verbose(true)
        .limit(10)
        .max_time(Duration::from_millis(500))
        .js_mode(false)
        .build();
    let op = MapReduceWithInlineResults::<Document>::new(ns(), MAP, REDUCE, options);

    let mut body = build_test(&op, 8).unwrap();
    let mut expected = doc! {
        "mapReduce": "test_coll",
        "map": Bson::JavaScriptCode(MAP.to_string()),
        "reduce": Bson::JavaScriptCode(REDUCE.to_string()),
        "out": { "inline": 1 },
        "query": { "x": { "$gt": 0 } },
        "sort": { "x": 1 },
        "finalize": Bson::JavaScriptCode("function(key, value) { return value; }".to_string()),
        "scope": { "factor": 2 },
        "verbose": true,
        "limit": 10_i64,
        "maxTimeMS": 500,
    };
    bson_util::sort_document(&mut body);
    bson_util::sort_document(&mut expected);
    assert_eq!(body, expected);
}

#[test]
fn defaults_are_not_sent() {
    let options = MapReduceOptions::builder()
        .verbose(false)
        .limit(0)
        .max_time(Duration::ZERO)
        .build();
    let op = MapReduceWithInlineResults::<Document>::new(ns(), MAP, REDUCE, options);

    let body = build_test(&op, 8).unwrap();
    let keys: Vec<&str> = body.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["mapReduce", "map", "reduce", "out"]);
}

#[test]
fn collation_requires_3_4() {
    let options = MapReduceOptions::builder()
        .collation(Collation::builder().locale("en").build())
        .build();
    let op = MapReduceWithInlineResults::<Document>::new(ns(), MAP, REDUCE, options);
    assert!(build_test(&op, 4).unwrap_err().is_invalid_argument());
    assert_eq!(
        build_test(&op, 5).unwrap().get_document("collation").unwrap(),
        &doc! { "locale": "en" }
    );
}

#[test]
fn handle_inline_response() {
    let op = MapReduceWithInlineResults::<Document>::new(ns(), MAP, REDUCE, None);
    let (spec, statistics) = handle_response_test(
        &op,
        doc! {
            "ok": 1,
            "results": [{ "_id": 1, "value": 3 }, { "_id": 2, "value": 1 }],
            "timeMillis": 12,
            "counts": { "input": 4, "emit": 4, "reduce": 1, "output": 2 },
        },
    )
    .unwrap();

    assert_eq!(spec.id(), 0);
    assert_eq!(spec.initial_buffer.len(), 2);
    assert_eq!(spec.info.ns, ns());
    assert_eq!(
        statistics,
        MapReduceStatistics {
            input_count: 4,
            emit_count: 4,
            output_count: 2,
            duration: Duration::from_millis(12),
        }
    );
}

#[test]
fn missing_counts_are_zero() {
    let op = MapReduceWithInlineResults::<Document>::new(ns(), MAP, REDUCE, None);
    let (spec, statistics) = handle_response_test(&op, doc! { "ok": 1, "results": [] }).unwrap();
    assert!(spec.initial_buffer.is_empty());
    assert_eq!(statistics, MapReduceStatistics::default());
}

#[test]
fn build_to_collection() {
    let output = MapReduceOutput::builder()
        .collection("out_coll")
        .action(MapReduceAction::Merge)
        .database("out_db")
        .sharded(true)
        .non_atomic(true)
        .build();
    let options = MapReduceOptions::builder()
        .bypass_document_validation(true)
        .write_concern(WriteConcern::majority())
        .build();
    let op = MapReduceToCollection::new(ns(), MAP, REDUCE, output, options);
    assert_eq!(op.output_namespace(), Namespace::new("out_db", "out_coll"));

    let body = build_test(&op, 8).unwrap();
    assert_eq!(
        body.get_document("out").unwrap(),
        &doc! { "merge": "out_coll", "sharded": true, "nonAtomic": true, "db": "out_db" }
    );
    assert!(body.get_bool("bypassDocumentValidation").unwrap());
    assert_eq!(
        body.get_document("writeConcern").unwrap(),
        &doc! { "w": "majority" }
    );

    let body = build_test(&op, 9).unwrap();
    assert_eq!(
        body.get_document("out").unwrap(),
        &doc! { "merge": "out_coll", "db": "out_db" }
    );

    let body = build_test(&op, 4).unwrap();
    assert!(!body.contains_key("writeConcern"));
    assert!(body.contains_key("bypassDocumentValidation"));

    let body = build_test(&op, 3).unwrap();
    assert!(!body.contains_key("bypassDocumentValidation"));
}

#[test]
fn handle_to_collection_response() {
    let output = MapReduceOutput::builder().collection("out_coll").build();
    let op = MapReduceToCollection::new(ns(), MAP, REDUCE, output, None);
    assert_eq!(op.output_namespace(), Namespace::new("test_db", "out_coll"));

    let statistics = handle_response_test(
        &op,
        doc! {
            "ok": 1,
            "result": "out_coll",
            "timeMillis": 30,
            "counts": { "input": 10, "emit": 10, "reduce": 2, "output": 5 },
        },
    )
    .unwrap();
    assert_eq!(statistics.input_count, 10);
    assert_eq!(statistics.output_count, 5);
    assert_eq!(statistics.duration, Duration::from_millis(30));

    let error = handle_response_test(
        &op,
        doc! {
            "ok": 1,
            "result": "out_coll",
            "writeConcernError": { "code": 100, "errmsg": "wtimeout" },
        },
    )
    .unwrap_err();
    assert!(matches!(
        *error.kind,
        ErrorKind::Write(WriteFailure::WriteConcernError(_))
    ));
}
