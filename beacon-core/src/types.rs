//! Core domain types for beacon
//!
//! An [`Event`] is a single tracked occurrence. Pending events are kept in an
//! [`EventBatch`], which is both the unit written to the backup file and the
//! body sent to the collector:
//!
//! ```json
//! {"events": [{"type": "click", "data": "btn1"}]}
//! ```

use serde::{Deserialize, Serialize};

/// A single tracked event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event type (e.g. "click", "level_start")
    #[serde(rename = "type")]
    pub event_type: String,

    /// Free-form payload, opaque to the buffer
    pub data: String,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }
}

/// Ordered set of events, in the order they were tracked
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    #[serde(default)]
    pub events: Vec<Event>,
}

impl EventBatch {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<Vec<Event>> for EventBatch {
    fn from(events: Vec<Event>) -> Self {
        Self { events }
    }
}
