//! Snapshot pipeline (component C6, part 3).
//!
//! Grounded in the teacher's build-time snapshot step (`SnapshotBuilder`'s
//! `v8::Isolate::snapshot_creator`, which serializes a pre-warmed isolate
//! so the production binary skips re-running its bootstrap script on
//! every start). JSVM exposes that same creator/consumer pair as a public
//! operation instead of a private build step, since an embedder — not
//! just the crate's own build — may want to snapshot its bootstrap.

use thiserror::Error;

use crate::error::JsvmStatus;
use crate::vm::{CreateVMOptions, VM};

/// Failures validating a snapshot blob before it reaches the engine (spec
/// §4.2: "a blob whose checksum fails causes `INVALID_ARG`"). Kept as its
/// own `thiserror`-derived enum (rather than mapping straight to
/// `JsvmStatus`) because the two failure modes are worth telling apart in
/// logs even though both collapse to the same ABI status.
#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("snapshot blob is too short to contain a checksum header")]
  TooShort,
  #[error("snapshot blob checksum mismatch (truncated, corrupted, or from a different build)")]
  ChecksumMismatch,
}

impl From<SnapshotError> for JsvmStatus {
  fn from(_: SnapshotError) -> Self {
    JsvmStatus::InvalidArg
  }
}

const CHECKSUM_HEADER_LEN: usize = 8;

fn fnv1a(data: &[u8]) -> u64 {
  let mut hash: u64 = 0xcbf29ce484222325;
  for &byte in data {
    hash ^= u64::from(byte);
    hash = hash.wrapping_mul(0x100000001b3);
  }
  hash
}

/// Prepends an 8-byte FNV-1a checksum header to the engine's raw blob
/// bytes. This is JSVM's own wrapper, not something V8 provides: the spec
/// (§4.2) requires a checksum check on load, and the engine's snapshot
/// format has no such header of its own.
fn wrap_with_checksum(blob: Vec<u8>) -> Vec<u8> {
  let checksum = fnv1a(&blob);
  let mut out = Vec::with_capacity(CHECKSUM_HEADER_LEN + blob.len());
  out.extend_from_slice(&checksum.to_le_bytes());
  out.extend_from_slice(&blob);
  out
}

/// Validates and strips the header [`wrap_with_checksum`] wrote. Called
/// from `VM::new` before the remaining bytes are handed to
/// `v8::CreateParams::snapshot_blob`.
pub(crate) fn validate_and_strip_checksum(data: &[u8]) -> Result<&[u8], SnapshotError> {
  if data.len() < CHECKSUM_HEADER_LEN {
    return Err(SnapshotError::TooShort);
  }
  let (header, body) = data.split_at(CHECKSUM_HEADER_LEN);
  let expected = u64::from_le_bytes(header.try_into().unwrap());
  if fnv1a(body) != expected {
    return Err(SnapshotError::ChecksumMismatch);
  }
  Ok(body)
}

/// Result of `CreateSnapshot` (spec §4.6). `blob` is opaque to the host;
/// its only valid uses are round-tripping back through `CreateVM`'s
/// `snapshot_blob` option on a binary built against the same V8 version
/// (spec's "wire format" note: snapshots are not portable across engine
/// versions, unlike code caches, which at least self-report a version tag
/// and degrade to a miss instead of UB).
pub struct Snapshot {
  pub blob: Vec<u8>,
}

/// Builds a fresh isolate, runs one bootstrap closure per entry in
/// `contexts` to populate each context's global object however the host
/// wants, then serializes the result (spec §4.6.3: "`CreateSnapshot(vm,
/// contexts[])` ... each context in order, preserving the same index-order
/// that `CreateEnvFromSnapshot` later expects"). The first entry becomes
/// the isolate's default context (index 0); later entries are reachable
/// only by the index [`Env::from_snapshot`] is given.
///
/// Each bootstrap closure receives a raw `HandleScope` with no
/// `Env`/context-scope machinery wrapped around it: snapshot creation
/// happens before any `Env` exists, the same ordering constraint the
/// engine itself imposes (a `SnapshotCreator`'s contexts are set up
/// directly, not through whatever higher-level context type an embedder
/// layers on top).
pub fn create_snapshot(
  contexts: Vec<Box<dyn FnOnce(&mut v8::HandleScope)>>,
) -> Result<Snapshot, JsvmStatus> {
  if contexts.is_empty() {
    return Err(JsvmStatus::InvalidArg);
  }
  let params = v8::CreateParams::default();
  let mut creator = v8::Isolate::snapshot_creator(None, Some(params));
  for (index, bootstrap) in contexts.into_iter().enumerate() {
    let mut scope = v8::HandleScope::new(&mut creator);
    let context = v8::Context::new(&mut scope, Default::default());
    {
      let mut scope = v8::ContextScope::new(&mut scope, context);
      bootstrap(&mut scope);
    }
    if index == 0 {
      scope.set_default_context(context);
    } else {
      // Spec's index order: entry 0 is the default context (added above),
      // every later entry is recorded in the order given and retrieved by
      // that same index later via `v8::Context::from_snapshot`.
      let recorded_index = scope.add_context(context);
      debug_assert_eq!(recorded_index, index);
    }
  }

  let blob = creator
    .create_blob(v8::FunctionCodeHandling::Keep)
    .ok_or(JsvmStatus::GenericFailure)?;
  Ok(Snapshot {
    blob: wrap_with_checksum(blob.to_vec()),
  })
}

/// `CreateVMFromSnapshot`: thin helper over [`VM::new`] that fills in
/// `snapshot_blob`, kept separate so callers that only ever use snapshots
/// don't need to construct a full [`CreateVMOptions`] by hand.
pub fn create_vm_from_snapshot(blob: Vec<u8>) -> Result<VM, JsvmStatus> {
  VM::new(CreateVMOptions {
    snapshot_blob: Some(blob),
    ..Default::default()
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::vm::InitOptions;

  #[test]
  fn snapshot_round_trips_into_a_new_vm() {
    crate::vm::init(InitOptions::default());
    let snapshot = create_snapshot(vec![Box::new(|scope| {
      let global = scope.get_current_context().global(scope);
      let key = v8::String::new(scope, "fromSnapshot").unwrap();
      let value = v8::Boolean::new(scope, true);
      global.set(scope, key.into(), value.into());
    })])
    .unwrap();
    assert!(!snapshot.blob.is_empty());

    let vm = create_vm_from_snapshot(snapshot.blob).unwrap();
    assert!(!vm.is_locked());
  }

  #[test]
  fn a_second_context_is_recorded_at_index_one() {
    crate::vm::init(InitOptions::default());
    let snapshot = create_snapshot(vec![
      Box::new(|_scope| {}),
      Box::new(|scope| {
        let global = scope.get_current_context().global(scope);
        let key = v8::String::new(scope, "secondContext").unwrap();
        let value = v8::Boolean::new(scope, true);
        global.set(scope, key.into(), value.into());
      }),
    ])
    .unwrap();
    assert!(!snapshot.blob.is_empty());
  }

  #[test]
  fn empty_context_list_is_rejected() {
    crate::vm::init(InitOptions::default());
    assert_eq!(create_snapshot(vec![]).unwrap_err(), JsvmStatus::InvalidArg);
  }

  #[test]
  fn corrupted_blob_fails_checksum_validation() {
    crate::vm::init(InitOptions::default());
    let mut snapshot = create_snapshot(vec![Box::new(|_scope| {})]).unwrap();
    *snapshot.blob.last_mut().unwrap() ^= 0xFF;
    assert_eq!(
      create_vm_from_snapshot(snapshot.blob).unwrap_err(),
      JsvmStatus::InvalidArg
    );
  }

  #[test]
  fn too_short_blob_is_rejected() {
    assert!(matches!(validate_and_strip_checksum(&[0u8; 4]), Err(SnapshotError::TooShort)));
  }
}
