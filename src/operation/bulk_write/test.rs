use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{RawCommandResponse, StreamDescription},
    error::ErrorKind,
    operation::{
        bulk_write::{BatchKind, BatchResponse, BatchWrite, BulkWriteCombiner},
        test::build_test,
        DeleteRequest,
        MixedBulkWrite,
        Operation,
        UpdateRequest,
        WriteRequest,
    },
    options::{BulkWriteOptions, Collation, Hint, WriteConcern},
    Namespace,
};

fn ns() -> Namespace {
    Namespace::new("test_db", "test_coll")
}

fn ordered(ordered: bool) -> BulkWriteOptions {
    BulkWriteOptions::builder().ordered(ordered).build()
}

fn response(doc: Document) -> BatchResponse {
    RawCommandResponse::with_document(Default::default(), &doc)
        .unwrap()
        .body()
        .unwrap()
}

fn mixed_requests() -> Vec<WriteRequest> {
    vec![
        WriteRequest::insert(doc! { "_id": 0 }),
        WriteRequest::insert(doc! { "_id": 1 }),
        WriteRequest::update_one(doc! { "_id": 0 }, doc! { "$set": { "x": 1 } }),
        WriteRequest::insert(doc! { "_id": 2 }),
        WriteRequest::delete_one(doc! { "_id": 1 }),
        WriteRequest::replace_one(doc! { "_id": 2 }, doc! { "y": 1 }),
    ]
}

#[test]
fn empty_request_list_is_rejected() {
    let error = MixedBulkWrite::new(ns(), Vec::new(), None).unwrap_err();
    assert!(error.is_invalid_argument());
}

#[test]
fn malformed_updates_are_rejected() {
    let error = MixedBulkWrite::new(
        ns(),
        vec![WriteRequest::update_one(doc! {}, doc! { "x": 1 })],
        None,
    )
    .unwrap_err();
    assert!(error.is_invalid_argument());

    let error = MixedBulkWrite::new(
        ns(),
        vec![WriteRequest::replace_one(doc! {}, doc! { "$set": { "x": 1 } })],
        None,
    )
    .unwrap_err();
    assert!(error.is_invalid_argument());

    let multi_replace = UpdateRequest::builder()
        .filter(doc! {})
        .update(crate::operation::UpdateOrReplace::Replacement(doc! { "x": 1 }))
        .multi(true)
        .build();
    let error = MixedBulkWrite::new(ns(), vec![multi_replace.into()], None).unwrap_err();
    assert!(error.is_invalid_argument());
}

#[test]
fn inserts_without_id_get_one_first() {
    let op = MixedBulkWrite::new(
        ns(),
        vec![
            WriteRequest::insert(doc! { "x": 1 }),
            WriteRequest::insert(doc! { "_id": "mine", "x": 2 }),
        ],
        None,
    )
    .unwrap();

    match &op.requests()[0] {
        WriteRequest::Insert(document) => {
            assert_eq!(bson_util::first_key(document), Some("_id"));
            assert!(matches!(document.get("_id"), Some(Bson::ObjectId(_))));
            assert_eq!(document.get_i32("x").unwrap(), 1);
        }
        other => panic!("expected an insert, got {:?}", other),
    }
    assert_eq!(
        op.requests()[1],
        WriteRequest::insert(doc! { "_id": "mine", "x": 2 })
    );
}

#[test]
fn ordered_split_keeps_runs() {
    let op = MixedBulkWrite::new(ns(), mixed_requests(), None).unwrap();
    let batches = op.split(&StreamDescription::new_testing()).unwrap();

    let shape: Vec<(BatchKind, Vec<usize>)> = batches
        .into_iter()
        .map(|batch| (batch.kind, batch.indices))
        .collect();
    assert_eq!(
        shape,
        vec![
            (BatchKind::Insert, vec![0, 1]),
            (BatchKind::Update, vec![2]),
            (BatchKind::Insert, vec![3]),
            (BatchKind::Delete, vec![4]),
            (BatchKind::Update, vec![5]),
        ]
    );
}

#[test]
fn unordered_split_groups_by_kind() {
    let op = MixedBulkWrite::new(ns(), mixed_requests(), ordered(false)).unwrap();
    let batches = op.split(&StreamDescription::new_testing()).unwrap();

    let shape: Vec<(BatchKind, Vec<usize>)> = batches
        .into_iter()
        .map(|batch| (batch.kind, batch.indices))
        .collect();
    assert_eq!(
        shape,
        vec![
            (BatchKind::Insert, vec![0, 1, 3]),
            (BatchKind::Update, vec![2, 5]),
            (BatchKind::Delete, vec![4]),
        ]
    );
}

#[test]
fn split_respects_max_write_batch_size() {
    let requests = (0..5).map(|i| WriteRequest::insert(doc! { "_id": i }));
    let op = MixedBulkWrite::new(ns(), requests, None).unwrap();
    let description = StreamDescription::builder()
        .max_wire_version(8)
        .max_write_batch_size(2)
        .build();

    let indices: Vec<Vec<usize>> = op
        .split(&description)
        .unwrap()
        .into_iter()
        .map(|batch| batch.indices)
        .collect();
    assert_eq!(indices, vec![vec![0, 1], vec![2, 3], vec![4]]);
}

#[test]
fn split_respects_message_size() {
    // each document encodes to 42 bytes, 45 as an array entry
    let requests =
        (0..5).map(|i| WriteRequest::insert(doc! { "_id": i, "s": "x".repeat(20) }));
    let op = MixedBulkWrite::new(ns(), requests, None).unwrap();
    let description = StreamDescription::builder()
        .max_wire_version(8)
        .max_bson_object_size(50)
        .max_message_size_bytes(16_100)
        .build();

    let indices: Vec<Vec<usize>> = op
        .split(&description)
        .unwrap()
        .into_iter()
        .map(|batch| batch.indices)
        .collect();
    assert_eq!(indices, vec![vec![0, 1], vec![2, 3], vec![4]]);
}

#[test]
fn oversized_document_is_rejected() {
    let op = MixedBulkWrite::new(
        ns(),
        vec![
            WriteRequest::insert(doc! { "_id": 0 }),
            WriteRequest::insert(doc! { "_id": 1, "s": "x".repeat(100) }),
        ],
        None,
    )
    .unwrap();
    let description = StreamDescription::builder()
        .max_wire_version(8)
        .max_bson_object_size(50)
        .build();

    let error = op.split(&description).unwrap_err();
    assert!(error.is_invalid_argument());
    assert!(error.to_string().contains("index 1"));
}

#[test]
fn version_gates() {
    let check = |request: WriteRequest, ok_at: i32| {
        let op = MixedBulkWrite::new(ns(), vec![request], None).unwrap();
        assert!(op
            .validate(&StreamDescription::with_wire_version(ok_at - 1))
            .is_err());
        op.validate(&StreamDescription::with_wire_version(ok_at))
            .unwrap();
    };

    check(
        DeleteRequest::builder()
            .filter(doc! {})
            .collation(Collation::builder().locale("en").build())
            .build()
            .into(),
        5,
    );
    check(
        UpdateRequest::builder()
            .filter(doc! {})
            .update(crate::operation::UpdateModifications::from(
                doc! { "$set": { "a.$[e]": 1 } },
            ))
            .array_filters(vec![doc! { "e": 1 }])
            .build()
            .into(),
        6,
    );
    check(
        WriteRequest::update_one(doc! {}, vec![doc! { "$set": { "a": 1 } }]),
        8,
    );
    check(
        UpdateRequest::builder()
            .filter(doc! {})
            .update(crate::operation::UpdateModifications::from(
                doc! { "$inc": { "a": 1 } },
            ))
            .hint(Hint::Name("a_1".to_string()))
            .build()
            .into(),
        8,
    );
    check(
        DeleteRequest::builder()
            .filter(doc! {})
            .hint(Hint::Keys(doc! { "a": 1 }))
            .build()
            .into(),
        9,
    );
}

#[test]
fn unacknowledged_write_concern_rejects_collation_and_bypass() {
    let unacknowledged = |bypass: bool| {
        let mut options = BulkWriteOptions::builder()
            .write_concern(WriteConcern::unacknowledged())
            .build();
        if bypass {
            options.bypass_document_validation = Some(true);
        }
        options
    };

    let op = MixedBulkWrite::new(
        ns(),
        vec![WriteRequest::insert(doc! { "_id": 1 })],
        unacknowledged(true),
    )
    .unwrap();
    assert!(op
        .validate(&StreamDescription::new_testing())
        .unwrap_err()
        .is_invalid_argument());

    let op = MixedBulkWrite::new(
        ns(),
        vec![DeleteRequest::builder()
            .filter(doc! {})
            .collation(Collation::builder().locale("en").build())
            .build()
            .into()],
        unacknowledged(false),
    )
    .unwrap();
    assert!(op
        .validate(&StreamDescription::new_testing())
        .unwrap_err()
        .is_invalid_argument());
}

#[test]
fn build_batch_commands() {
    let options = BulkWriteOptions::builder()
        .bypass_document_validation(true)
        .write_concern(WriteConcern::majority())
        .build();
    let op = MixedBulkWrite::new(
        ns(),
        vec![
            WriteRequest::update_many(doc! { "a": 1 }, doc! { "$inc": { "b": 1 } }),
            WriteRequest::delete_many(doc! { "a": 2 }),
            WriteRequest::delete_one(doc! { "a": 3 }),
        ],
        options.clone(),
    )
    .unwrap();
    let batches = op.split(&StreamDescription::new_testing()).unwrap();
    assert_eq!(batches.len(), 2);
    let namespace = ns();

    let update = BatchWrite {
        ns: &namespace,
        batch: &batches[0],
        ordered: true,
        options: &options,
    };
    assert_eq!(update.name(), "update");
    let mut body = build_test(&update, 8).unwrap();
    let mut expected = doc! {
        "update": "test_coll",
        "updates": [{ "q": { "a": 1 }, "u": { "$inc": { "b": 1 } }, "multi": true }],
        "ordered": true,
        "bypassDocumentValidation": true,
        "writeConcern": { "w": "majority" },
    };
    bson_util::sort_document(&mut body);
    bson_util::sort_document(&mut expected);
    assert_eq!(body, expected);

    let delete = BatchWrite {
        ns: &namespace,
        batch: &batches[1],
        ordered: false,
        options: &options,
    };
    let body = build_test(&delete, 8).unwrap();
    assert_eq!(body.get_str("delete").unwrap(), "test_coll");
    assert_eq!(
        body.get_array("deletes").unwrap(),
        &vec![
            Bson::Document(doc! { "q": { "a": 2 }, "limit": 0 }),
            Bson::Document(doc! { "q": { "a": 3 }, "limit": 1 }),
        ]
    );
    assert!(!body.get_bool("ordered").unwrap());
}

#[test]
fn combiner_remaps_indices() {
    let op = MixedBulkWrite::new(ns(), mixed_requests(), ordered(false)).unwrap();
    let batches = op.split(&StreamDescription::new_testing()).unwrap();
    let mut combiner = BulkWriteCombiner::new(false);

    // inserts [0, 1, 3]: the third fails
    combiner.add(
        &batches[0],
        response(doc! {
            "ok": 1,
            "n": 2,
            "writeErrors": [{ "index": 2, "code": 11000, "errmsg": "duplicate key" }],
        }),
    );
    assert!(!combiner.should_stop_sending_batches());

    // updates [2, 5]: the replacement upserts
    combiner.add(
        &batches[1],
        response(doc! {
            "ok": 1,
            "n": 2,
            "nModified": 1,
            "upserted": [{ "index": 1, "_id": 2 }],
        }),
    );
    combiner.add(&batches[2], response(doc! { "ok": 1, "n": 1 }));

    let error = combiner.finish().unwrap_err();
    let failure = match *error.kind {
        ErrorKind::BulkWrite(ref failure) => failure.clone(),
        ref other => panic!("expected a bulk write error, got {:?}", other),
    };
    assert_eq!(failure.write_errors.len(), 1);
    assert_eq!(failure.write_errors[0].index, 3);
    assert_eq!(failure.write_errors[0].code, 11000);

    let result = failure.partial_result;
    assert!(result.acknowledged);
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 1);
    assert_eq!(result.deleted_count, 1);
    assert_eq!(result.upserted_id(5), Some(&Bson::Int32(2)));
    assert_eq!(result.inserted_ids.len(), 2);
    assert_eq!(result.inserted_ids.get(&0), Some(&Bson::Int32(0)));
    assert_eq!(result.inserted_ids.get(&1), Some(&Bson::Int32(1)));
}

#[test]
fn ordered_combiner_stops_on_write_error() {
    let requests = (0..4).map(|i| WriteRequest::insert(doc! { "_id": i }));
    let op = MixedBulkWrite::new(ns(), requests, None).unwrap();
    let batches = op.split(&StreamDescription::new_testing()).unwrap();
    let mut combiner = BulkWriteCombiner::new(true);

    combiner.add(
        &batches[0],
        response(doc! {
            "ok": 1,
            "n": 1,
            "writeErrors": [{ "index": 1, "code": 11000, "errmsg": "duplicate key" }],
        }),
    );
    assert!(combiner.should_stop_sending_batches());

    let error = combiner.finish().unwrap_err();
    match *error.kind {
        ErrorKind::BulkWrite(ref failure) => {
            assert_eq!(failure.partial_result.inserted_count, 1);
            let ids: Vec<usize> = failure.partial_result.inserted_ids.keys().copied().collect();
            assert_eq!(ids, vec![0]);
        }
        ref other => panic!("expected a bulk write error, got {:?}", other),
    }
}

#[test]
fn write_concern_error_does_not_stop_batches() {
    let op = MixedBulkWrite::new(ns(), mixed_requests(), None).unwrap();
    let batches = op.split(&StreamDescription::new_testing()).unwrap();
    let mut combiner = BulkWriteCombiner::new(true);

    combiner.add(
        &batches[0],
        response(doc! {
            "ok": 1,
            "n": 2,
            "writeConcernError": { "code": 64, "errmsg": "waiting for replication timed out" },
            "errorLabels": ["RetryableWriteError"],
        }),
    );
    assert!(!combiner.should_stop_sending_batches());

    let error = combiner.finish().unwrap_err();
    assert!(error.contains_label("RetryableWriteError"));
    match *error.kind {
        ErrorKind::BulkWrite(ref failure) => {
            assert!(failure.write_errors.is_empty());
            assert_eq!(failure.write_concern_error.as_ref().map(|e| e.code), Some(64));
            assert_eq!(failure.partial_result.inserted_count, 2);
        }
        ref other => panic!("expected a bulk write error, got {:?}", other),
    }
}

#[test]
fn clean_batches_finish_ok() {
    let op = MixedBulkWrite::new(ns(), vec![WriteRequest::delete_many(doc! {})], None).unwrap();
    let batches = op.split(&StreamDescription::new_testing()).unwrap();
    let mut combiner = BulkWriteCombiner::new(true);
    combiner.add(&batches[0], response(doc! { "ok": 1, "n": 7 }));

    let result = combiner.finish().unwrap();
    assert!(result.acknowledged);
    assert_eq!(result.deleted_count, 7);
}
