use std::time::Duration;

use crate::{
    bson::{Bson, Document},
    cmap::{Command, RawCommandResponse},
    error::Error,
    sdam::ServerAddress,
};

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "mongodb_operation::command";
pub(crate) const CURSOR_TRACING_EVENT_TARGET: &str = "mongodb_operation::cursor";

pub(crate) const DEFAULT_MAX_DOCUMENT_LENGTH_BYTES: usize = 1000;

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for Document {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        Bson::Document(self.clone())
            .into_relaxed_extjson()
            .to_string()
    }
}

impl TracingRepresentation for Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

/// Renders a command or reply as extended JSON, cut down to at most `max_length_bytes` bytes
/// followed by "..." when it is longer.
pub(crate) fn serialize_command_or_reply(doc: &Document, max_length_bytes: usize) -> String {
    let mut ext_json = doc.tracing_representation();
    truncate_on_char_boundary(&mut ext_json, max_length_bytes);
    ext_json
}

pub(crate) fn truncate_on_char_boundary(s: &mut String, new_len: usize) {
    let original_len = s.len();
    if original_len > new_len {
        // to avoid generating invalid UTF-8, find the first index >= max_length_bytes that is
        // the end of a character.
        let mut truncate_index = new_len;
        while !s.is_char_boundary(truncate_index) {
            truncate_index += 1;
        }
        s.truncate(truncate_index);
        // due to the "rounding up" behavior we might not actually end up truncating anything.
        if s.len() < original_len {
            s.push_str("...");
        }
    }
}

pub(crate) fn command_started(command: &Command, address: &ServerAddress, connection_id: u32) {
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        command = serialize_command_or_reply(&command.body, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES),
        databaseName = command.target_db.as_str(),
        commandName = command.name.as_str(),
        requestId = command.request_id,
        driverConnectionId = connection_id,
        serverHost = address.host.as_str(),
        serverPort = address.port_or_default(),
        "Command started"
    );
}

pub(crate) fn command_succeeded(
    command_name: &str,
    request_id: i32,
    reply: &RawCommandResponse,
    connection_id: u32,
    duration: Duration,
) {
    if !tracing::enabled!(target: COMMAND_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
        return;
    }
    let reply_json = match reply.to_document() {
        Ok(doc) => serialize_command_or_reply(&doc, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES),
        Err(e) => e.tracing_representation(),
    };
    let address = reply.source_address();
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        reply = reply_json,
        commandName = command_name,
        requestId = request_id,
        driverConnectionId = connection_id,
        serverHost = address.host.as_str(),
        serverPort = address.port_or_default(),
        durationMS = duration.as_millis(),
        "Command succeeded"
    );
}

pub(crate) fn command_failed(
    command_name: &str,
    request_id: i32,
    failure: &Error,
    address: &ServerAddress,
    connection_id: u32,
    duration: Duration,
) {
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        failure = failure.tracing_representation(),
        commandName = command_name,
        requestId = request_id,
        driverConnectionId = connection_id,
        serverHost = address.host.as_str(),
        serverPort = address.port_or_default(),
        durationMS = duration.as_millis(),
        "Command failed"
    );
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bson::doc;

    #[test]
    fn long_documents_are_truncated() {
        let doc = doc! { "x": "a".repeat(2000) };
        let rendered = serialize_command_or_reply(&doc, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES);
        assert_eq!(rendered.len(), DEFAULT_MAX_DOCUMENT_LENGTH_BYTES + 3);
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "aé".to_string();
        truncate_on_char_boundary(&mut s, 2);
        assert_eq!(s, "aé");

        let mut s = "héllo".to_string();
        truncate_on_char_boundary(&mut s, 1);
        assert_eq!(s, "h...");
    }
}
