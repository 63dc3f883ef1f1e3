use std::{sync::Arc, time::Instant};

use serde::de::DeserializeOwned;

use crate::{
    binding::{ReadBinding, SessionContext, WriteBinding},
    cmap::{LeasedConnection, RawCommandResponse},
    cursor::{BatchCursor, CursorSpecification},
    error::{Error, Result},
    operation::{
        check_feature,
        CommandErrorBody,
        Operation,
        SERVER_3_2_0_WIRE_VERSION,
        SERVER_3_6_0_WIRE_VERSION,
    },
    selection_criteria::ReadPreference,
    trace,
    BoxFuture,
};

/// An operation that reads from the server.
///
/// The returned future checks a connection out of the binding's read source, sends the
/// operation's command, and returns the connection to the source on every path before it
/// resolves. Cursor-producing operations instead hand the connection's source (or, for a load
/// balanced server, the connection itself) to the cursor they return.
pub trait ReadOperation {
    type Output;

    fn execute<'a>(&'a self, binding: &'a Arc<dyn ReadBinding>)
        -> BoxFuture<'a, Result<Self::Output>>;
}

/// An operation that writes to the server. See [`ReadOperation`] for the connection discipline.
pub trait WriteOperation {
    type Output;

    fn execute<'a>(
        &'a self,
        binding: &'a Arc<dyn WriteBinding>,
    ) -> BoxFuture<'a, Result<Self::Output>>;
}

/// Runs a single command round trip for `op` on an already checked out connection.
pub(crate) async fn execute_operation<Op: Operation>(
    op: &Op,
    connection: &mut LeasedConnection,
    session: &SessionContext,
    read_preference: Option<&ReadPreference>,
) -> Result<Op::O> {
    let description = connection.description().clone();
    let mut cmd = op.build(&description)?;

    if op.supports_read_concern(&description) {
        if let Some(mut read_concern) = session.read_concern_internal() {
            if read_concern.level.is_some() {
                check_feature(&description, SERVER_3_2_0_WIRE_VERSION, "ReadConcern")?;
            }
            if !description.supports(SERVER_3_6_0_WIRE_VERSION) {
                read_concern.after_cluster_time = None;
            }
            cmd.set_read_concern(&read_concern)?;
        }
    }

    if session.in_transaction {
        cmd.body.remove("writeConcern");
    }

    cmd.read_pref = read_preference.cloned();

    let connection_id = connection.id();
    let command_name = cmd.name.clone();
    let request_id = cmd.request_id;
    trace::command_started(&cmd, &description.server_address, connection_id);

    let start = Instant::now();
    let result = match connection.send_command(cmd).await {
        Ok(response) => parse_response(response),
        Err(error) => Err(error),
    };

    match result {
        Ok(response) => {
            trace::command_succeeded(
                &command_name,
                request_id,
                &response,
                connection_id,
                start.elapsed(),
            );
            op.handle_response(response, &description)
        }
        Err(error) => {
            let error = error.with_wire_version(description.max_wire_version);
            trace::command_failed(
                &command_name,
                request_id,
                &error,
                &description.server_address,
                connection_id,
                start.elapsed(),
            );
            op.handle_error(error, &description)
        }
    }
}

fn parse_response(response: RawCommandResponse) -> Result<RawCommandResponse> {
    if response.is_success() {
        return Ok(response);
    }
    Err(match response.body::<CommandErrorBody>() {
        Ok(error_body) => error_body.into(),
        Err(_) => Error::invalid_response("error deserializing command error"),
    })
}

pub(crate) async fn execute_read<Op: Operation>(
    op: &Op,
    binding: &Arc<dyn ReadBinding>,
) -> Result<Op::O> {
    let source = binding.read_connection_source().await?;
    let mut connection = LeasedConnection::checkout(&source).await?;
    execute_operation(
        op,
        &mut connection,
        binding.session_context(),
        Some(binding.read_preference()),
    )
    .await
}

pub(crate) async fn execute_write<Op: Operation>(
    op: &Op,
    binding: &Arc<dyn WriteBinding>,
) -> Result<Op::O> {
    let source = binding.write_connection_source().await?;
    let mut connection = LeasedConnection::checkout(&source).await?;
    execute_operation(op, &mut connection, binding.session_context(), None).await
}

/// Executes a cursor-producing operation and transfers the connection lease to the cursor.
pub(crate) async fn execute_cursor_operation<Op, T>(
    op: &Op,
    binding: &Arc<dyn ReadBinding>,
) -> Result<BatchCursor<T>>
where
    Op: Operation<O = CursorSpecification>,
    T: DeserializeOwned,
{
    let source = binding.read_connection_source().await?;
    let mut connection = LeasedConnection::checkout(&source).await?;
    let spec = execute_operation(
        op,
        &mut connection,
        binding.session_context(),
        Some(binding.read_preference()),
    )
    .await?;
    Ok(BatchCursor::new(spec, connection))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::{
        binding::SessionContext,
        bson::{doc, Timestamp},
        error::ErrorKind,
        operation::{Count, DropCollection},
        options::{ReadConcern, WriteConcern},
        test::MockConnectionSource,
        Namespace,
        ReadOperation,
        WriteOperation,
    };

    fn ns() -> Namespace {
        Namespace::new("db", "coll")
    }

    #[tokio::test]
    async fn read_concern_is_attached() {
        let mock = MockConnectionSource::with_wire_version(8);
        mock.reply(doc! { "ok": 1, "n": 3 });
        let session = SessionContext {
            read_concern: Some(ReadConcern::majority()),
            operation_time: Some(Timestamp {
                time: 4,
                increment: 1,
            }),
            causally_consistent: true,
            ..Default::default()
        };

        let count = Count::new(ns())
            .execute(&mock.read_binding_with_session(session))
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            mock.commands()[0].body.get_document("readConcern").unwrap(),
            &doc! {
                "level": "majority",
                "afterClusterTime": Timestamp { time: 4, increment: 1 },
            }
        );
        mock.assert_all_released();
    }

    #[tokio::test]
    async fn read_concern_level_requires_3_2() {
        let mock = MockConnectionSource::with_wire_version(3);
        let session = SessionContext {
            read_concern: Some(ReadConcern::majority()),
            ..Default::default()
        };

        let error = Count::new(ns())
            .execute(&mock.read_binding_with_session(session))
            .await
            .unwrap_err();
        assert!(error.is_invalid_argument());
        assert!(mock.commands().is_empty());
        mock.assert_all_released();
    }

    #[tokio::test]
    async fn transactions_drop_the_write_concern() {
        let mock = MockConnectionSource::with_wire_version(8);
        mock.reply(doc! { "ok": 1 });
        let options = crate::options::DropCollectionOptions::builder()
            .write_concern(WriteConcern::majority())
            .build();
        let session = SessionContext {
            in_transaction: true,
            ..Default::default()
        };
        let binding: std::sync::Arc<dyn crate::binding::WriteBinding> = std::sync::Arc::new(
            crate::binding::SourceBinding::new(mock.source()).with_session_context(session),
        );

        DropCollection::new(ns(), options)
            .execute(&binding)
            .await
            .unwrap();
        assert!(!mock.commands()[0].body.contains_key("writeConcern"));
    }

    #[tokio::test]
    async fn command_failure_releases_the_connection() {
        let mock = MockConnectionSource::with_wire_version(8);
        mock.reply(doc! {
            "ok": 0,
            "code": 13,
            "codeName": "Unauthorized",
            "errmsg": "not authorized",
            "errorLabels": ["SomeLabel"],
        });

        let error = Count::new(ns())
            .execute(&mock.read_binding())
            .await
            .unwrap_err();
        assert!(matches!(*error.kind, ErrorKind::Command(ref e) if e.code == 13));
        assert!(error.contains_label("SomeLabel"));
        assert_eq!((mock.checkouts(), mock.releases()), (1, 1));
    }

    #[tokio::test]
    async fn checkout_failure_is_surfaced() {
        let mock = MockConnectionSource::with_wire_version(8);
        mock.fail_checkout(std::io::ErrorKind::ConnectionRefused.into());

        let error = Count::new(ns())
            .execute(&mock.read_binding())
            .await
            .unwrap_err();
        assert!(error.is_network_error());
        assert_eq!(mock.checkouts(), 0);
    }

    #[tokio::test]
    async fn read_preference_travels_with_the_command() {
        let mock = MockConnectionSource::with_wire_version(8);
        mock.reply(doc! { "ok": 1, "n": 0 });
        let binding: std::sync::Arc<dyn crate::binding::ReadBinding> = std::sync::Arc::new(
            crate::binding::SourceBinding::new(mock.source())
                .with_read_preference(crate::options::ReadPreference::SecondaryPreferred),
        );

        Count::new(ns()).execute(&binding).await.unwrap();
        assert_eq!(
            mock.commands()[0].read_pref,
            Some(crate::options::ReadPreference::SecondaryPreferred)
        );
    }
}
