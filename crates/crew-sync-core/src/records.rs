//! Typed rows of the built-in families, in the event-scoped shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Row;
use crate::error::Result;
use crate::families::{EntityFamily, CLIP_MARKERS, DELIVERABLES, NOTES, STATION_COMPLETIONS};

/// A record that maps onto one row of a synced table.
pub trait SyncRecord: Serialize + DeserializeOwned {
    const FAMILY: &'static EntityFamily;

    fn to_row(&self) -> Result<Row> {
        match serde_json::to_value(self)? {
            Value::Object(row) => Ok(row),
            other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "record serialized to {} instead of an object",
                other
            ))
            .into()),
        }
    }

    fn from_row(row: Row) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(row))?)
    }
}

fn default_category() -> String {
    "general".to_string()
}

fn default_media_type() -> String {
    "video".to_string()
}

fn default_clip_status() -> String {
    "marked".to_string()
}

fn default_priority() -> String {
    "normal".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipMarker {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// When the clip was marked
    pub timestamp: String,
    #[serde(default)]
    pub timecode: Option<String>,
    #[serde(default)]
    pub timecode_in: Option<String>,
    #[serde(default)]
    pub timecode_out: Option<String>,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default = "default_media_type")]
    pub media_type: String,
    #[serde(default)]
    pub camera: Option<String>,
    #[serde(default)]
    pub crew_member: Option<String>,
    #[serde(default = "default_clip_status")]
    pub status: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl SyncRecord for ClipMarker {
    const FAMILY: &'static EntityFamily = &CLIP_MARKERS;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub content: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_user_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub resolved_at: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl SyncRecord for NoteRecord {
    const FAMILY: &'static EntityFamily = &NOTES;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverableRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default)]
    pub player_id: Option<String>,
    pub due_day: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub delivered_at: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_user_id: Option<String>,
}

impl SyncRecord for DeliverableRecord {
    const FAMILY: &'static EntityFamily = &DELIVERABLES;
}

/// Whether a player has finished a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub player_id: String,
    pub station_id: String,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub completed_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_user_id: Option<String>,
}

impl SyncRecord for CompletionRecord {
    const FAMILY: &'static EntityFamily = &STATION_COMPLETIONS;
}
