//! Zone events as delivered by the edge pipeline and as written to the
//! durable log.
//!
//! An [`EventIn`] is the validated ingestion boundary: a closed struct with
//! explicit optional fields. Unknown JSON fields are ignored (the edge bridge
//! may attach diagnostics); missing required fields or blank identifiers are
//! rejected with [`InvalidEvent`] before the event reaches the queue.
//!
//! Once the pipeline resolves the run and stamps the receive time the event
//! becomes an immutable [`EventRecord`].

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{EventId, RunId};

/// Substring marking an event that moves an actor into a zone.
const ENTER_MARKER: &str = "ENTER";

/// Substring marking an event that moves an actor out of a zone.
const EXIT_MARKER: &str = "EXIT";

/// Zone membership effect of an event, derived from its `event_type`.
///
/// Classification is a case-sensitive substring match: `"HUMAN_ENTERED_ZONE"`
/// is an [`Transition::Enter`], `"ZONE_EXIT"` is an [`Transition::Exit`] and
/// anything else (`"ZONE_OBSERVATION"`, `"MOVE"`) leaves membership alone.
/// `ENTER` wins when both markers appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// The actor is now inside the zone.
    Enter,
    /// The actor is now outside the zone.
    Exit,
    /// Observation only; membership is unchanged.
    Observe,
}

impl Transition {
    /// Classify an event type string.
    pub fn classify(event_type: &str) -> Self {
        if event_type.contains(ENTER_MARKER) {
            Self::Enter
        } else if event_type.contains(EXIT_MARKER) {
            Self::Exit
        } else {
            Self::Observe
        }
    }

    /// Fold this transition over the previous inside/outside flag.
    pub const fn apply(self, inside: bool) -> bool {
        match self {
            Self::Enter => true,
            Self::Exit => false,
            Self::Observe => inside,
        }
    }

    /// Whether this transition can change zone blocking.
    pub const fn changes_membership(self) -> bool {
        matches!(self, Self::Enter | Self::Exit)
    }
}

/// Reasons an inbound event is rejected at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidEvent {
    /// `event_type` was empty or whitespace.
    #[error("event_type must not be blank")]
    BlankEventType,

    /// `actor_id` was empty or whitespace.
    #[error("actor_id must not be blank")]
    BlankActorId,

    /// `zone_id` was present but empty or whitespace.
    #[error("zone_id must not be blank when present")]
    BlankZoneId,

    /// `payload` was not a JSON object.
    #[error("payload must be a JSON object")]
    PayloadNotObject,
}

/// An event as submitted by a producer (edge bridge, video pipeline, tests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EventIn {
    /// Transition class, e.g. `"HUMAN_ENTERED_ZONE"` or `"ZONE_OBSERVATION"`.
    pub event_type: String,
    /// Observation time at the edge in Unix milliseconds (defaults to now).
    #[serde(default = "crate::time::now_ms")]
    pub ts_ms: u64,
    /// Tracked actor, e.g. `"person_3"` or `"robot_1"`.
    pub actor_id: String,
    /// Zone the event refers to, if any.
    #[serde(default)]
    pub zone_id: Option<String>,
    /// Run to file the event under; filled by the pipeline when absent.
    #[serde(default)]
    pub run_id: Option<RunId>,
    /// Free-form edge payload (bounding boxes, confidences, ...).
    #[serde(default = "empty_payload")]
    #[ts(type = "Record<string, unknown>")]
    pub payload: serde_json::Value,
}

impl EventIn {
    /// Build an event with an empty payload and no explicit run.
    pub fn new(event_type: &str, actor_id: &str, zone_id: Option<&str>, ts_ms: u64) -> Self {
        Self {
            event_type: event_type.to_owned(),
            ts_ms,
            actor_id: actor_id.to_owned(),
            zone_id: zone_id.map(ToOwned::to_owned),
            run_id: None,
            payload: empty_payload(),
        }
    }

    /// Check the fields serde cannot check on its own.
    pub fn validate(&self) -> Result<(), InvalidEvent> {
        if self.event_type.trim().is_empty() {
            return Err(InvalidEvent::BlankEventType);
        }
        if self.actor_id.trim().is_empty() {
            return Err(InvalidEvent::BlankActorId);
        }
        if self.zone_id.as_deref().is_some_and(|z| z.trim().is_empty()) {
            return Err(InvalidEvent::BlankZoneId);
        }
        if !self.payload.is_object() {
            return Err(InvalidEvent::PayloadNotObject);
        }
        Ok(())
    }

    /// The zone membership effect of this event.
    pub fn transition(&self) -> Transition {
        Transition::classify(&self.event_type)
    }
}

/// An ingested event with its run resolved and receive time stamped.
///
/// This is the shape written to the durable log, kept in the live ring
/// buffer and emitted during replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EventRecord {
    /// Log identifier assigned at ingestion.
    pub id: EventId,
    /// Transition class copied from the inbound event.
    pub event_type: String,
    /// Observation time at the edge in Unix milliseconds.
    pub ts_ms: u64,
    /// Tracked actor.
    pub actor_id: String,
    /// Zone the event refers to, if any.
    pub zone_id: Option<String>,
    /// Run the event was filed under.
    pub run_id: RunId,
    /// Time the consumer processed the event in Unix milliseconds.
    pub received_ms: u64,
    /// Free-form edge payload.
    #[ts(type = "Record<string, unknown>")]
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Seal an inbound event into a log record.
    pub fn from_ingested(event: EventIn, run_id: RunId, received_ms: u64) -> Self {
        Self {
            id: EventId::new(),
            event_type: event.event_type,
            ts_ms: event.ts_ms,
            actor_id: event.actor_id,
            zone_id: event.zone_id,
            run_id,
            received_ms,
            payload: event.payload,
        }
    }

    /// The zone membership effect of this event.
    pub fn transition(&self) -> Transition {
        Transition::classify(&self.event_type)
    }
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
