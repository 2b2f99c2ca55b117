use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("invalid event: uid is empty")]
    MissingUid,

    #[error("invalid event: message is empty")]
    MissingMessage,

    #[error("invalid event: first timestamp is not set")]
    MissingFirstTimestamp,

    #[error("invalid event: count {0} is negative")]
    NegativeCount(i32),
}

/// The resource an event is about. Descriptive only, never used as a key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// Unvalidated event fields as read from an upstream object.
///
/// Turned into an [`Event`] with [`Event::try_from`]; that conversion is the
/// only way to obtain one.
#[derive(Clone, Debug, Default)]
pub struct EventDraft {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub reason: String,
    pub message: String,
    pub event_type: String,
    pub involved_object: ObjectRef,
    pub source: String,
    pub first_timestamp: Option<OffsetDateTime>,
    pub last_timestamp: Option<OffsetDateTime>,
    pub count: i32,
}

/// Canonical cluster event, independent of the upstream API that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    uid: String,
    name: String,
    namespace: String,
    reason: String,
    message: String,
    event_type: String,
    involved_object: ObjectRef,
    source: String,
    first_timestamp: OffsetDateTime,
    last_timestamp: Option<OffsetDateTime>,
    count: i32,
}

impl TryFrom<EventDraft> for Event {
    type Error = EventError;

    fn try_from(d: EventDraft) -> Result<Self, EventError> {
        if d.uid.is_empty() {
            return Err(EventError::MissingUid);
        }
        if d.message.is_empty() {
            return Err(EventError::MissingMessage);
        }
        let Some(first_timestamp) = d.first_timestamp else {
            return Err(EventError::MissingFirstTimestamp);
        };
        if d.count < 0 {
            return Err(EventError::NegativeCount(d.count));
        }

        Ok(Self {
            uid: d.uid,
            name: d.name,
            namespace: d.namespace,
            reason: d.reason,
            message: d.message,
            event_type: d.event_type,
            involved_object: d.involved_object,
            source: d.source,
            first_timestamp,
            last_timestamp: d.last_timestamp,
            count: d.count,
        })
    }
}

impl Event {
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Free-form; "Warning" and "Normal" are the values the API server uses.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn involved_object(&self) -> &ObjectRef {
        &self.involved_object
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn first_timestamp(&self) -> OffsetDateTime {
        self.first_timestamp
    }

    /// `None` when the event was never observed again.
    pub fn last_timestamp(&self) -> Option<OffsetDateTime> {
        self.last_timestamp
    }

    /// How many times upstream deduplicated this event.
    pub fn count(&self) -> i32 {
        self.count
    }
}
