//! Decoding of the two upstream event shapes into the canonical [`Event`].
//!
//! Both shapes are read leniently: every field is optional on the wire and
//! the canonical constructor decides what is acceptable.

use k8s_openapi::api::core::v1::{EventSource as ReportingSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::{Event, EventDraft, EventError, ObjectRef};

#[derive(Debug, Error)]
pub enum MapError {
    #[error("unrecognized event object: {0}")]
    Shape(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] EventError),
}

/// `core/v1` Event.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreV1Event {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    #[serde(default)]
    pub involved_object: ObjectReference,
    pub source: Option<ReportingSource>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub first_timestamp: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_timestamp: Option<OffsetDateTime>,
    pub count: Option<i32>,
}

/// `events.k8s.io/v1` Event.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsV1Event {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub note: Option<String>,
    pub reason: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub regarding: Option<ObjectReference>,
    pub reporting_controller: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub event_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deprecated_first_timestamp: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deprecated_last_timestamp: Option<OffsetDateTime>,
    pub deprecated_count: Option<i32>,
    pub series: Option<EventSeries>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSeries {
    #[serde(default)]
    pub count: i32,
}

pub fn map_core_v1(e: CoreV1Event) -> Result<Event, EventError> {
    let meta = e.metadata;

    Event::try_from(EventDraft {
        uid: meta.uid.unwrap_or_default(),
        name: meta.name.unwrap_or_default(),
        namespace: meta.namespace.unwrap_or_default(),
        reason: e.reason.unwrap_or_default(),
        message: e.message.unwrap_or_default(),
        event_type: e.type_.unwrap_or_default(),
        involved_object: object_ref(e.involved_object),
        source: e.source.and_then(|s| s.component).unwrap_or_default(),
        first_timestamp: e.first_timestamp,
        last_timestamp: e.last_timestamp,
        count: e.count.unwrap_or_default(),
    })
}

pub fn map_events_v1(e: EventsV1Event) -> Result<Event, EventError> {
    let first_timestamp = occurrence_time(&e);
    let count = occurrence_count(&e);
    let meta = e.metadata;

    Event::try_from(EventDraft {
        uid: meta.uid.unwrap_or_default(),
        name: meta.name.unwrap_or_default(),
        namespace: meta.namespace.unwrap_or_default(),
        reason: e.reason.unwrap_or_default(),
        message: e.note.unwrap_or_default(),
        event_type: e.type_.unwrap_or_default(),
        involved_object: e.regarding.map(object_ref).unwrap_or_default(),
        source: e.reporting_controller.unwrap_or_default(),
        first_timestamp: Some(first_timestamp),
        last_timestamp: e.deprecated_last_timestamp,
        count,
    })
}

/// eventTime, then the deprecated first timestamp, then now.
fn occurrence_time(e: &EventsV1Event) -> OffsetDateTime {
    e.event_time
        .or(e.deprecated_first_timestamp)
        .unwrap_or_else(OffsetDateTime::now_utc)
}

/// series.count, then a positive deprecated count, then 1.
fn occurrence_count(e: &EventsV1Event) -> i32 {
    if let Some(series) = &e.series {
        return series.count;
    }
    match e.deprecated_count {
        Some(n) if n > 0 => n,
        _ => 1,
    }
}

fn object_ref(r: ObjectReference) -> ObjectRef {
    ObjectRef {
        kind: r.kind.unwrap_or_default(),
        name: r.name.unwrap_or_default(),
        namespace: r.namespace.unwrap_or_default(),
    }
}
