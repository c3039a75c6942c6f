use std::sync::Mutex;

use serde::Serialize;

use super::Metadata;

/// A user-facing error surfaced to the front-end, identified by a stable
/// numeric id so repeated occurrences collapse into one entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "errorId")]
    pub error_id: i64,
    pub message: String,
    pub link: String,
}

impl ErrorMessage {
    pub fn new(error_id: i64, message: impl Into<String>) -> ErrorMessage {
        ErrorMessage {
            error_id,
            message: message.into(),
            link: String::new(),
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> ErrorMessage {
        self.link = link.into();
        self
    }
}

/// The append-only set of user-visible errors of one run, de-duplicated by
/// error id.
#[derive(Default)]
pub struct ErrorMessageSet {
    messages: Mutex<Vec<ErrorMessage>>,
}

impl ErrorMessageSet {
    pub fn new() -> ErrorMessageSet {
        ErrorMessageSet::default()
    }

    /// Appends `message` unless an entry with the same error id exists.
    pub fn add(&self, message: ErrorMessage) {
        let mut messages = self.messages.lock().unwrap();
        if messages.iter().any(|m| m.error_id == message.error_id) {
            return;
        }
        messages.push(message);
    }

    pub fn messages(&self) -> Vec<ErrorMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().unwrap().is_empty()
    }
}

impl Metadata for ErrorMessageSet {
    fn kind(&self) -> &'static str {
        "error"
    }

    fn to_serializable(&self) -> serde_json::Value {
        serde_json::to_value(self.messages()).expect("error messages serialize")
    }
}
