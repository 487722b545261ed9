//! Snapshot / Restore: versioned serialization of the full model.
//!
//! The wire shape mirrors `TimetableModel` directly — `lines` keyed by `LineId`,
//! each station's `ArrDepForm` already distinguishing a flat slot list from explicit
//! time periods, so the "flat list means `[0, 3600)`" backward-compatibility rule
//! falls out of the existing enum rather than needing a translation pass. `serde_json`
//! accepts both string and integer map keys on the way in, so historical blobs with
//! string-typed line ids deserialize without extra coercion.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::model::TimetableModel;

pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    model: TimetableModel,
}

/// Serializes the model to a versioned JSON blob. Returns `(version, bytes)`;
/// the version is also embedded in the blob so `restore` can check it before
/// attempting to decode the rest.
pub fn snapshot(model: &TimetableModel) -> CoreResult<(u32, Vec<u8>)> {
    let envelope = SnapshotEnvelope {
        version: CURRENT_VERSION,
        model: model.clone(),
    };
    let bytes = serde_json::to_vec(&envelope)
        .map_err(|e| CoreError::InvariantViolation(format!("snapshot serialization failed: {e}")))?;
    Ok((CURRENT_VERSION, bytes))
}

/// Restores a model from a blob tagged with `version`. Any version other than
/// the one this build understands is rejected explicitly — version increments
/// require an explicit migration hook rather than an implicit best-effort decode.
pub fn restore(version: u32, blob: &[u8]) -> CoreResult<TimetableModel> {
    if version != CURRENT_VERSION {
        return Err(CoreError::VersionUnsupported(version));
    }
    let envelope: SnapshotEnvelope = serde_json::from_slice(blob)
        .map_err(|e| CoreError::InvariantViolation(format!("snapshot deserialization failed: {e}")))?;
    if envelope.version != version {
        return Err(CoreError::VersionUnsupported(envelope.version));
    }
    Ok(envelope.model)
}
