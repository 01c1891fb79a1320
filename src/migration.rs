//! Migration: saving a live instance and rebuilding it elsewhere
//!
//! A payload carries everything needed to continue an instance exactly where
//! it stopped: globals, the paused handler (if any), its script state and its
//! pending events. Payloads are JSON and opaque to callers. Persistence wraps a
//! payload in a [`StateEnvelope`] written to `<state_dir>/<instance>.state`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::capabilities::{sleep_deadline, MAX_SLEEP};
use crate::errors::MigrationError;
use crate::events::EventParams;
use crate::heap::value_size;
use crate::instance::{Mailbox, RunData, ScriptInstance};
use crate::types::InstanceId;
use crate::vm::{Continuation, Val, VM};

const STATE_EXTENSION: &str = "state";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPayload {
    pub version: u32,
    /// Hash of the compiled script the state belongs to
    pub fingerprint: String,
    pub state_code: usize,
    pub pending_state: Option<usize>,
    pub globals: Vec<Val>,
    /// Present only if a handler was paused
    pub continuation: Option<VM>,
    pub current_event: Option<EventParams>,
    pub events: Vec<EventParams>,
    /// Time left on an interrupted sleep
    pub sleep_remaining_ms: Option<u64>,
    pub needs_global_init: bool,
}

/// What a restore left behind, for picking the instance's first state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restored {
    pub paused: bool,
    pub sleeping: bool,
    pub has_events: bool,
}

/// Serialize an instance that is not running
///
/// The caller holds the mailbox and must have stopped the instance at a
/// checkpoint (or between events) first.
pub fn capture(
    instance: &ScriptInstance,
    mailbox: &Mailbox,
    version: u32,
) -> Result<Vec<u8>, MigrationError> {
    let run = instance.run_data();
    let now = Instant::now();
    let payload = MigrationPayload {
        version,
        fingerprint: instance.script().fingerprint().to_string(),
        state_code: run.state_code,
        pending_state: run.pending_state,
        globals: run.globals.clone(),
        continuation: run.continuation.snapshot().cloned(),
        current_event: run.current_event.clone(),
        events: mailbox.events.iter().cloned().collect(),
        sleep_remaining_ms: mailbox
            .sleep_until
            .map(|t| t.saturating_duration_since(now).as_millis() as u64),
        needs_global_init: run.needs_global_init,
    };
    Ok(serde_json::to_vec(&payload)?)
}

/// Decode and check a payload without touching any instance
pub fn decode(
    bytes: &[u8],
    expected_version: u32,
    fingerprint: &str,
    asset_id: &str,
) -> Result<MigrationPayload, MigrationError> {
    let payload: MigrationPayload = serde_json::from_slice(bytes)?;
    if payload.version != expected_version {
        return Err(MigrationError::VersionMismatch {
            found: payload.version,
            expected: expected_version,
        });
    }
    if payload.fingerprint != fingerprint {
        return Err(MigrationError::FingerprintMismatch {
            asset_id: asset_id.to_string(),
        });
    }
    Ok(payload)
}

/// Load a payload into a freshly constructed instance
///
/// Nothing is changed unless every check passes.
pub fn restore(
    instance: &ScriptInstance,
    mailbox: &mut Mailbox,
    bytes: &[u8],
    expected_version: u32,
) -> Result<Restored, MigrationError> {
    let script = instance.script();
    let payload = decode(
        bytes,
        expected_version,
        script.fingerprint(),
        script.asset_id(),
    )?;

    let slots = script.globals().len();
    if !payload.needs_global_init && payload.globals.len() != slots {
        return Err(MigrationError::Incompatible(format!(
            "{} globals saved, script has {}",
            payload.globals.len(),
            slots
        )));
    }
    let states = script.states().len();
    if payload.state_code >= states || payload.pending_state.is_some_and(|s| s >= states) {
        return Err(MigrationError::Incompatible(format!(
            "state {} out of range for {} states",
            payload.state_code, states
        )));
    }

    let heap_total: usize = payload.globals.iter().map(value_size).sum::<usize>()
        + payload
            .continuation
            .as_ref()
            .map(|vm| vm.env.tracked_size())
            .unwrap_or(0);
    let heap = instance.heap();
    if heap_total > heap.limit() {
        return Err(MigrationError::Incompatible(format!(
            "saved state needs {} heap bytes, limit is {}",
            heap_total,
            heap.limit()
        )));
    }

    let sleep_until = match payload.sleep_remaining_ms.map(Duration::from_millis) {
        Some(remaining) if remaining > MAX_SLEEP => {
            return Err(MigrationError::Incompatible(format!(
                "sleep of {} ms exceeds the longest allowed sleep",
                remaining.as_millis()
            )));
        }
        Some(remaining) => Some(sleep_deadline(remaining)),
        None => None,
    };

    let paused = payload.continuation.is_some();
    let mut run = instance.run_data();
    *run = RunData {
        globals: payload.globals,
        continuation: match payload.continuation {
            Some(vm) => Continuation::from_snapshot(vm),
            None => Continuation::new(),
        },
        state_code: payload.state_code,
        pending_state: payload.pending_state,
        current_event: payload.current_event,
        needs_global_init: payload.needs_global_init,
    };
    drop(run);
    heap.reset_to(heap_total);
    instance.set_paused(paused);

    mailbox.events.clear();
    for evt in payload.events {
        mailbox.events.push(evt);
    }
    mailbox.sleep_until = sleep_until;

    Ok(Restored {
        paused,
        sleeping: mailbox.sleep_until.is_some(),
        has_events: !mailbox.events.is_empty(),
    })
}

/* ===================== Persistence ===================== */

/// On-disk wrapper around a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEnvelope {
    pub engine_name: String,
    pub instance_id: InstanceId,
    pub script_asset_id: String,
    pub saved_at: DateTime<Utc>,
    /// JSON text of a [`MigrationPayload`]
    pub payload: String,
}

impl StateEnvelope {
    pub fn new(engine_name: &str, instance: &ScriptInstance, payload: Vec<u8>) -> Result<Self, MigrationError> {
        let payload = String::from_utf8(payload)
            .map_err(|_| MigrationError::Incompatible("payload is not UTF-8".into()))?;
        Ok(Self {
            engine_name: engine_name.to_string(),
            instance_id: instance.id,
            script_asset_id: instance.script().asset_id().to_string(),
            saved_at: Utc::now(),
            payload,
        })
    }

    /// Decode the payload inside, without version checks
    pub fn decode_payload(&self) -> Result<MigrationPayload, MigrationError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

pub fn state_path(dir: &Path, id: InstanceId) -> PathBuf {
    dir.join(format!("{}.{}", id, STATE_EXTENSION))
}

/// Write an envelope, replacing any earlier one for the same instance
pub fn save_state(dir: &Path, envelope: &StateEnvelope) -> Result<PathBuf, MigrationError> {
    fs::create_dir_all(dir)?;
    let path = state_path(dir, envelope.instance_id);
    let tmp = path.with_extension("state.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(envelope)?)?;
    fs::rename(&tmp, &path)?;
    Ok(path)
}

pub fn read_envelope(path: &Path) -> Result<StateEnvelope, MigrationError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read the saved envelope for `id`, if there is one
pub fn load_state(dir: &Path, id: InstanceId) -> Result<Option<StateEnvelope>, MigrationError> {
    let path = state_path(dir, id);
    if !path.exists() {
        return Ok(None);
    }
    read_envelope(&path).map(Some)
}
