//! Static description of every synced table.

use serde_json::Value;

use crate::backend::Row;
use crate::schema::{
    from_legacy_label, legacy_numeric, timestamp_from_legacy_numeric, to_legacy_label,
    to_legacy_timestamp, SchemaMode,
};

/// Column whose value is shaped differently in the legacy layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyField {
    /// Internal station id, stored as a display label
    StationLabel(&'static str),
    /// ISO-8601 timestamp, stored as epoch milliseconds
    EpochMillis(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityFamily {
    /// Short name used in queue keys and logs
    pub name: &'static str,
    pub table: &'static str,
    /// Namespace for mapping legacy keys to identifiers
    pub id_namespace: &'static str,
    /// Columns identifying one row
    pub key_columns: &'static [&'static str],
    /// Whether the `id` column is UUID-typed
    pub uuid_ids: bool,
    pub actor_column: Option<&'static str>,
    /// Read ordering as `(column, ascending)`
    pub order_by: Option<(&'static str, bool)>,
    /// Set `updated_at` on every update
    pub stamp_updated_at: bool,
    /// Upsert conflict target in the event-scoped layout
    pub conflict_target: Option<&'static str>,
    pub legacy_fields: &'static [LegacyField],
}

pub const ID_COLUMN: &str = "id";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

pub const CLIP_MARKERS: EntityFamily = EntityFamily {
    name: "clip",
    table: "clip_markers",
    id_namespace: "clip",
    key_columns: &[ID_COLUMN],
    uuid_ids: true,
    actor_column: None,
    order_by: Some(("timestamp", false)),
    stamp_updated_at: true,
    conflict_target: None,
    legacy_fields: &[
        LegacyField::StationLabel("station_id"),
        LegacyField::EpochMillis("timestamp"),
    ],
};

pub const NOTES: EntityFamily = EntityFamily {
    name: "note",
    table: "notes",
    id_namespace: "note",
    key_columns: &[ID_COLUMN],
    uuid_ids: true,
    actor_column: Some("created_by_user_id"),
    order_by: Some(("created_at", false)),
    stamp_updated_at: false,
    conflict_target: None,
    legacy_fields: &[],
};

pub const DELIVERABLES: EntityFamily = EntityFamily {
    name: "deliverable",
    table: "deliverables",
    id_namespace: "deliverable",
    key_columns: &[ID_COLUMN],
    uuid_ids: true,
    actor_column: Some("created_by_user_id"),
    order_by: None,
    stamp_updated_at: false,
    conflict_target: None,
    legacy_fields: &[],
};

pub const STATION_COMPLETIONS: EntityFamily = EntityFamily {
    name: "completion",
    table: "player_station_completions",
    id_namespace: "completion",
    key_columns: &["player_id", "station_id"],
    uuid_ids: false,
    actor_column: Some("created_by_user_id"),
    order_by: None,
    stamp_updated_at: false,
    conflict_target: Some("event_id,player_id,station_id"),
    legacy_fields: &[],
};

/// Every family, in the order queues are drained.
pub const ALL_FAMILIES: [&EntityFamily; 4] =
    [&CLIP_MARKERS, &NOTES, &DELIVERABLES, &STATION_COMPLETIONS];

pub fn family_for_table(table: &str) -> Option<&'static EntityFamily> {
    ALL_FAMILIES.iter().copied().find(|f| f.table == table)
}

pub fn family_by_name(name: &str) -> Option<&'static EntityFamily> {
    ALL_FAMILIES
        .iter()
        .copied()
        .find(|f| f.name == name || f.table == name)
}

impl EntityFamily {
    /// Upsert conflict target for `mode`; the legacy layout has no tenant column.
    pub fn conflict_target_for(&self, mode: SchemaMode, tenant_column: &str) -> Option<String> {
        let target = self.conflict_target?;
        match mode {
            SchemaMode::EventScoped => Some(target.to_string()),
            SchemaMode::Legacy => {
                let columns: Vec<&str> = target
                    .split(',')
                    .map(str::trim)
                    .filter(|c| *c != tenant_column)
                    .collect();
                (!columns.is_empty()).then(|| columns.join(","))
            }
        }
    }

    /// Rewrite field values of an outgoing row into the legacy shape.
    pub fn to_legacy_row(&self, row: &mut Row) {
        for field in self.legacy_fields {
            match *field {
                LegacyField::StationLabel(column) => {
                    if let Some(value) = row.get_mut(column) {
                        *value = Value::from(to_legacy_label(value.as_str()));
                    }
                }
                LegacyField::EpochMillis(column) => {
                    if let Some(value) = row.get_mut(column) {
                        if !value.is_number() {
                            *value = Value::from(to_legacy_timestamp(value.as_str()));
                        }
                    }
                }
            }
        }
    }

    /// Rewrite field values of a row read from the legacy layout.
    pub fn from_legacy_row(&self, row: &mut Row) {
        for field in self.legacy_fields {
            match *field {
                LegacyField::StationLabel(column) => {
                    if let Some(value) = row.get_mut(column) {
                        *value = from_legacy_label(value.as_str())
                            .map(Value::from)
                            .unwrap_or(Value::Null);
                    }
                }
                LegacyField::EpochMillis(column) => {
                    if let Some(value) = row.get_mut(column) {
                        *value = Value::from(timestamp_from_legacy_numeric(legacy_numeric(value)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_lookup() {
        assert_eq!(family_for_table("notes"), Some(&NOTES));
        assert_eq!(family_for_table("schedule_slots"), None);
        assert_eq!(family_by_name("completion"), Some(&STATION_COMPLETIONS));
        assert_eq!(family_by_name("clip_markers"), Some(&CLIP_MARKERS));
    }

    #[test]
    fn test_conflict_target_drops_tenant_in_legacy_mode() {
        assert_eq!(
            STATION_COMPLETIONS.conflict_target_for(SchemaMode::EventScoped, "event_id").as_deref(),
            Some("event_id,player_id,station_id")
        );
        assert_eq!(
            STATION_COMPLETIONS.conflict_target_for(SchemaMode::Legacy, "event_id").as_deref(),
            Some("player_id,station_id")
        );
        assert_eq!(NOTES.conflict_target_for(SchemaMode::EventScoped, "event_id"), None);
    }

    #[test]
    fn test_clip_row_to_legacy_shape() {
        let mut clip = row(json!({
            "id": "c-1",
            "station_id": "tunnel",
            "timestamp": "2024-01-01T00:00:00.000Z",
        }));
        CLIP_MARKERS.to_legacy_row(&mut clip);

        assert_eq!(clip["station_id"], "LED Wall");
        assert_eq!(clip["timestamp"], 1_704_067_200_000i64);
    }

    #[test]
    fn test_clip_row_from_legacy_shape() {
        let mut clip = row(json!({
            "id": "c-1",
            "station_id": "Free",
            "timestamp": 1_700_000_000,
        }));
        CLIP_MARKERS.from_legacy_row(&mut clip);

        assert_eq!(clip["station_id"], Value::Null);
        assert_eq!(clip["timestamp"], "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn test_families_without_legacy_fields_are_untouched() {
        let original = row(json!({"id": "n-1", "station_id": "tunnel"}));
        let mut note = original.clone();
        NOTES.to_legacy_row(&mut note);
        assert_eq!(note, original);
    }
}
