use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Document},
    change_stream::event::ChangeStreamEvent,
    error::Result,
    operation::{ChangeStreamOperation, Count, Find, MixedBulkWrite, WriteRequest},
    options::FindOptions,
    sync,
    test::FakeServer,
    Namespace,
};

fn ns() -> Namespace {
    Namespace::new("sync", "coll")
}

#[test]
fn write_then_read() {
    let server = FakeServer::new();
    let requests = (0..4).map(|i| WriteRequest::insert(doc! { "_id": i }));
    let op = MixedBulkWrite::new(ns(), requests, None).unwrap();

    let result = sync::execute_write(&op, &server.write_binding()).unwrap();
    assert_eq!(result.inserted_count, 4);

    let count = sync::execute_read(&Count::new(ns()), &server.read_binding()).unwrap();
    assert_eq!(count, 4);
    server.assert_all_released();
}

#[test]
fn cursor_iterates_across_batches() {
    let server = FakeServer::new();
    server.insert(&ns(), (0..7).map(|i| doc! { "_id": i }));

    let find = Find::<Document>::new(ns(), None, FindOptions::builder().batch_size(3).build());
    let cursor = sync::open_cursor(&find, &server.read_binding()).unwrap();
    let docs: Vec<Document> = cursor.collect::<Result<_>>().unwrap();

    assert_eq!(docs.len(), 7);
    assert_eq!(
        server.command_names(),
        vec!["find", "getMore", "getMore"]
    );
    server.assert_all_released();
}

#[test]
fn next_batch_returns_whole_batches() {
    let server = FakeServer::new();
    server.insert(&ns(), (0..5).map(|i| doc! { "_id": i }));

    let find = Find::<Document>::new(ns(), None, FindOptions::builder().batch_size(2).build());
    let mut cursor = sync::open_cursor(&find, &server.read_binding()).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap(), doc! { "_id": 0 });
    assert_eq!(cursor.next_batch().unwrap(), Some(vec![doc! { "_id": 1 }]));
    assert_eq!(cursor.next_batch().unwrap().map(|b| b.len()), Some(2));
    assert_eq!(cursor.server_cursor().unwrap(), Some(1));
    cursor.close();
    assert!(cursor.is_closed());
    assert!(cursor.server_cursor().unwrap_err().is_illegal_state());
}

#[test]
fn change_stream_blocks_for_events() {
    let server = FakeServer::new();
    let op = ChangeStreamOperation::<ChangeStreamEvent<Document>>::new(ns(), vec![], None);
    let mut stream = sync::watch(&op, &server.read_binding()).unwrap();

    server.insert(&ns(), vec![doc! { "_id": 1 }]);
    let event = stream.next().unwrap().unwrap();
    assert_eq!(event.full_document, Some(doc! { "_id": 1 }));
    assert!(stream.resume_token().is_some());
    assert!(stream.is_alive());

    server.insert(&ns(), vec![doc! { "_id": 2 }]);
    let event = Iterator::next(&mut stream).unwrap().unwrap();
    assert_eq!(event.full_document, Some(doc! { "_id": 2 }));
}
