//! Detection of the live backend layout and translation between layouts.
//!
//! Two relational layouts are in the field. The event-scoped layout carries a
//! tenant column on every synced table; the legacy layout lacks it and names
//! a few enum-like values differently. The detector probes once per process
//! and caches the answer.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::backend::{classify, Backend, BackendError, ErrorClass, Select};

/// Table probed to tell the layouts apart.
pub const PROBE_TABLE: &str = "notes";
/// Tenant-scoping column of the event-scoped layout.
pub const TENANT_COLUMN: &str = "event_id";

const PROBE_COLUMNS: [&str; 4] = ["id", TENANT_COLUMN, "content", "created_at"];

/// Values below this are epoch seconds, at or above it epoch milliseconds.
const MILLIS_THRESHOLD: f64 = 1e12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaMode {
    EventScoped,
    Legacy,
}

impl SchemaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaMode::EventScoped => "event-scoped",
            SchemaMode::Legacy => "legacy",
        }
    }

    pub fn is_event_scoped(&self) -> bool {
        matches!(self, SchemaMode::EventScoped)
    }
}

impl fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe the backend once, without caching.
///
/// A missing column or table means the legacy layout. Any other error is
/// returned so the caller can decide how to degrade.
pub async fn probe(backend: &dyn Backend) -> Result<SchemaMode, BackendError> {
    let query = Select::from(PROBE_TABLE).columns(PROBE_COLUMNS).limit(1);

    match backend.select(&query).await {
        Ok(_) => Ok(SchemaMode::EventScoped),
        Err(err) => match classify(&err) {
            ErrorClass::MissingColumn | ErrorClass::MissingTable => {
                debug!("Schema probe reported missing column/table: {}", err);
                Ok(SchemaMode::Legacy)
            }
            ErrorClass::Other => Err(err),
        },
    }
}

#[derive(Debug, Clone, Copy)]
struct Detection {
    mode: SchemaMode,
    /// Only conclusive detections are cached.
    conclusive: bool,
}

type ProbeFuture = Shared<BoxFuture<'static, Detection>>;

#[derive(Default)]
struct DetectorState {
    cached: Option<SchemaMode>,
    in_flight: Option<(u64, ProbeFuture)>,
    generation: u64,
}

/// Process-wide schema mode cache with a single shared in-flight probe.
pub struct SchemaDetector {
    backend: Arc<dyn Backend>,
    state: Mutex<DetectorState>,
}

impl SchemaDetector {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: Mutex::new(DetectorState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the schema mode.
    ///
    /// Returns the cached mode unless `force_refresh` is set. Concurrent
    /// callers share one probe. When the probe fails for a reason other than
    /// a missing column/table the result defaults to event-scoped and is not
    /// cached, so a later call probes again.
    pub async fn detect(&self, force_refresh: bool) -> SchemaMode {
        let (generation, probe) = {
            let mut state = self.state();
            if !force_refresh {
                if let Some(mode) = state.cached {
                    return mode;
                }
            }

            match &state.in_flight {
                Some((generation, probe)) if !force_refresh => (*generation, probe.clone()),
                _ => {
                    state.generation += 1;
                    let probe = Self::start_probe(Arc::clone(&self.backend));
                    state.in_flight = Some((state.generation, probe.clone()));
                    (state.generation, probe)
                }
            }
        };

        let detection = probe.await;

        let mut state = self.state();
        if matches!(&state.in_flight, Some((current, _)) if *current == generation) {
            state.in_flight = None;
            if detection.conclusive {
                info!("Detected {} backend schema", detection.mode);
                state.cached = Some(detection.mode);
            }
        }
        detection.mode
    }

    fn start_probe(backend: Arc<dyn Backend>) -> ProbeFuture {
        async move {
            match probe(backend.as_ref()).await {
                Ok(mode) => Detection {
                    mode,
                    conclusive: true,
                },
                Err(err) => {
                    // Treating a flaky backend as legacy would drop tenant scoping on writes.
                    warn!(
                        "Failed to detect backend schema, defaulting to event-scoped: {}",
                        err
                    );
                    Detection {
                        mode: SchemaMode::EventScoped,
                        conclusive: false,
                    }
                }
            }
        }
        .boxed()
        .shared()
    }

    /// The cached mode, without probing.
    pub fn cached_mode(&self) -> Option<SchemaMode> {
        self.state().cached
    }

    /// Forget the cached mode and any in-flight probe.
    pub fn invalidate(&self) {
        let mut state = self.state();
        state.cached = None;
        state.in_flight = None;
    }
}

/// Internal station ids and their labels in the legacy layout.
const LEGACY_STATIONS: [(&str, &str); 2] = [("tunnel", "LED Wall"), ("product", "Signing")];

/// Legacy label used for stations without a mapping.
pub const DEFAULT_LEGACY_LABEL: &str = "Free";

/// Translate an internal station id to its legacy label.
pub fn to_legacy_label(internal_id: Option<&str>) -> &'static str {
    internal_id
        .and_then(|id| LEGACY_STATIONS.iter().find(|(internal, _)| *internal == id))
        .map(|(_, label)| *label)
        .unwrap_or(DEFAULT_LEGACY_LABEL)
}

/// Translate a legacy label back to an internal station id, `None` when the
/// label has no mapping.
pub fn from_legacy_label(label: Option<&str>) -> Option<&'static str> {
    let label = label?;
    LEGACY_STATIONS
        .iter()
        .find(|(_, legacy)| *legacy == label)
        .map(|(internal, _)| *internal)
}

fn iso_millis(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Read a legacy numeric timestamp from a JSON number or numeric string.
pub fn legacy_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Convert an epoch timestamp in seconds or milliseconds to ISO-8601.
///
/// Feeds display-only fields, so missing or invalid input yields the current
/// time instead of an error.
pub fn timestamp_from_legacy_numeric(value: Option<f64>) -> String {
    let parsed = value
        .filter(|v| v.is_finite())
        .map(|v| if v < MILLIS_THRESHOLD { v * 1000.0 } else { v })
        .and_then(|millis| DateTime::<Utc>::from_timestamp_millis(millis as i64));

    iso_millis(parsed.unwrap_or_else(Utc::now))
}

/// Convert an ISO-8601 timestamp to epoch milliseconds, falling back to now.
pub fn to_legacy_timestamp(value: Option<&str>) -> i64 {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
        .map(|parsed| parsed.timestamp_millis())
        .unwrap_or_else(|| Utc::now().timestamp_millis())
}
