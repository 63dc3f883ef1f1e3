use pretty_assertions::assert_eq;
use tokio::sync::oneshot;

use crate::{
    bson::{doc, Bson, Document},
    change_stream::{
        event::{ChangeStreamEvent, OperationType, ResumeToken},
        ChangeStream,
    },
    error::ErrorKind,
    operation::ChangeStreamOperation,
    test::MockConnectionSource,
    Namespace,
    ReadOperation,
};

type Event = ChangeStreamEvent<Document>;

fn token(position: i32) -> Document {
    doc! { "_data": position.to_string() }
}

fn insert_event(position: i32) -> Document {
    doc! {
        "_id": token(position),
        "operationType": "insert",
        "ns": { "db": "db", "coll": "coll" },
        "documentKey": { "_id": position },
        "fullDocument": { "_id": position },
    }
}

fn cursor_reply(batch_key: &str, id: i64, events: Vec<Document>, pbrt: i32) -> Document {
    doc! {
        "ok": 1,
        "cursor": {
            "id": id,
            "ns": "db.coll",
            batch_key: events,
            "postBatchResumeToken": token(pbrt),
        },
    }
}

fn first_batch(events: Vec<Document>, pbrt: i32) -> Document {
    cursor_reply("firstBatch", 9, events, pbrt)
}

fn next_batch(events: Vec<Document>, pbrt: i32) -> Document {
    cursor_reply("nextBatch", 9, events, pbrt)
}

fn command_error(code: i32) -> Document {
    doc! { "ok": 0, "code": code, "errmsg": "failed" }
}

async fn open(mock: &MockConnectionSource) -> ChangeStream<Event> {
    ChangeStreamOperation::<Event>::new(Namespace::new("db", "coll"), vec![], None)
        .execute(&mock.read_binding())
        .await
        .unwrap()
}

fn change_stream_stage(body: &Document) -> Document {
    body.get_array("pipeline").unwrap()[0]
        .as_document()
        .unwrap()
        .get_document("$changeStream")
        .unwrap()
        .clone()
}

fn full_document_id(event: &Event) -> i32 {
    event
        .full_document
        .as_ref()
        .and_then(|doc| doc.get_i32("_id").ok())
        .unwrap()
}

#[tokio::test]
async fn resume_token_tracks_events_then_post_batch_token() {
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(vec![], 0))
        .reply(next_batch(vec![insert_event(1), insert_event(2)], 3));
    let mut stream = open(&mock).await;
    assert_eq!(stream.resume_token(), Some(ResumeToken::from(token(0))));

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.operation_type, OperationType::Insert);
    assert_eq!(first.id, ResumeToken::from(token(1)));
    assert_eq!(stream.resume_token(), Some(ResumeToken::from(token(1))));

    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(full_document_id(&second), 2);
    assert_eq!(stream.resume_token(), Some(ResumeToken::from(token(3))));
    assert!(stream.is_alive());
}

#[tokio::test]
async fn empty_get_more_advances_to_post_batch_token() {
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(vec![], 0))
        .reply(next_batch(vec![], 4));
    let mut stream = open(&mock).await;

    assert!(stream.try_next().await.unwrap().is_none());
    assert_eq!(stream.resume_token(), Some(ResumeToken::from(token(4))));
    assert!(stream.is_alive());
}

#[tokio::test]
async fn resumes_after_cursor_not_found() {
    crate::test::init_tracing();
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(vec![], 0))
        .reply(next_batch(vec![insert_event(1)], 1))
        .reply(command_error(43))
        .reply(first_batch(vec![insert_event(2)], 2));
    let mut stream = open(&mock).await;

    let first = stream.next().await.unwrap().unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(full_document_id(&first), 1);
    assert_eq!(full_document_id(&second), 2);

    assert_eq!(
        mock.command_names(),
        vec!["aggregate", "getMore", "getMore", "aggregate"]
    );
    let resumed = &mock.commands()[3];
    assert_eq!(
        change_stream_stage(&resumed.body).get("resumeAfter"),
        Some(&Bson::Document(token(1)))
    );
    assert_eq!(mock.remaining(), 0);
}

#[tokio::test]
async fn resumes_after_network_error() {
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(vec![], 0))
        .fail(std::io::ErrorKind::ConnectionReset.into())
        .reply(first_batch(vec![insert_event(1)], 1));
    let mut stream = open(&mock).await;

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(full_document_id(&event), 1);
    assert_eq!(
        change_stream_stage(&mock.commands()[2].body).get("resumeAfter"),
        Some(&Bson::Document(token(0)))
    );
    mock.assert_all_released();
}

#[tokio::test]
async fn resumes_on_labeled_error_from_4_4() {
    let mock = MockConnectionSource::with_wire_version(9);
    mock.reply(first_batch(vec![], 0))
        .reply(doc! {
            "ok": 0,
            "code": 280,
            "errmsg": "transient",
            "errorLabels": ["ResumableChangeStreamError"],
        })
        .reply(first_batch(vec![insert_event(1)], 1));
    let mut stream = open(&mock).await;

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(full_document_id(&event), 1);
}

#[tokio::test]
async fn unlabeled_error_from_4_4_is_not_resumed() {
    let mock = MockConnectionSource::with_wire_version(9);
    mock.reply(first_batch(vec![], 0))
        .reply(command_error(11600));
    let mut stream = open(&mock).await;

    let error = stream.next().await.unwrap_err();
    assert_eq!(error.code(), Some(11600));
    assert_eq!(mock.command_names(), vec!["aggregate", "getMore"]);
}

#[tokio::test]
async fn second_failure_without_progress_is_surfaced() {
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(vec![], 0))
        .fail(std::io::ErrorKind::ConnectionReset.into())
        .reply(first_batch(vec![], 0))
        .fail(std::io::ErrorKind::ConnectionReset.into());
    let mut stream = open(&mock).await;

    let error = stream.next().await.unwrap_err();
    assert!(error.is_network_error());
    assert_eq!(
        mock.command_names(),
        vec!["aggregate", "getMore", "aggregate", "getMore"]
    );
    mock.assert_all_released();
}

#[tokio::test]
async fn delivering_an_event_allows_another_resume() {
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(vec![], 0))
        .fail(std::io::ErrorKind::ConnectionReset.into())
        .reply(first_batch(vec![insert_event(1)], 1))
        .fail(std::io::ErrorKind::ConnectionReset.into())
        .reply(first_batch(vec![insert_event(2)], 2));
    let mut stream = open(&mock).await;

    assert_eq!(full_document_id(&stream.next().await.unwrap().unwrap()), 1);
    assert_eq!(full_document_id(&stream.next().await.unwrap().unwrap()), 2);
    assert_eq!(mock.remaining(), 0);
}

#[tokio::test]
async fn non_resumable_error_is_surfaced() {
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(vec![], 0)).reply(command_error(2));
    let mut stream = open(&mock).await;

    let error = stream.next().await.unwrap_err();
    assert_eq!(error.code(), Some(2));
    assert_eq!(mock.command_names(), vec!["aggregate", "getMore"]);
}

#[tokio::test]
async fn event_without_id_is_missing_resume_token() {
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(
        vec![doc! { "operationType": "insert", "fullDocument": { "_id": 1 } }],
        1,
    ));
    let mut stream = open(&mock).await;

    let error = stream.next().await.unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::MissingResumeToken));
}

#[tokio::test]
async fn next_batch_drains_buffer() {
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(
        vec![insert_event(1), insert_event(2), insert_event(3)],
        3,
    ));
    let mut stream = open(&mock).await;

    let batch = stream.next_batch().await.unwrap().unwrap();
    assert_eq!(
        batch.iter().map(full_document_id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(stream.resume_token(), Some(ResumeToken::from(token(3))));
}

#[tokio::test]
async fn closed_stream_rejects_iteration() {
    let mock = MockConnectionSource::with_wire_version(8);
    mock.reply(first_batch(vec![insert_event(1)], 1))
        .reply(doc! { "ok": 1, "cursorsKilled": [9_i64] });
    let mut stream = open(&mock).await;

    let (tx, rx) = oneshot::channel();
    stream.set_kill_watcher(tx);
    stream.close();
    stream.close();
    rx.await.unwrap();

    assert!(stream.is_closed());
    assert!(!stream.is_alive());
    let error = stream.next().await.unwrap_err();
    assert!(error.is_illegal_state());
    assert!(error.to_string().contains("Iterator has been closed"));
    let error = stream.next_batch().await.unwrap_err();
    assert!(error.to_string().contains("Cursor has been closed"));

    assert_eq!(mock.command_names(), vec!["aggregate", "killCursors"]);
    mock.assert_all_released();
}
