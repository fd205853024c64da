//! C ABI surface (spec §6).
//!
//! This module is deliberately representative rather than exhaustive: it
//! exports one or two functions per family named in spec §6 so the shape
//! of the boundary — opaque handles in, a `JsvmStatus` out, errors routed
//! through the env's last-error slot — is fully demonstrated, the same
//! way the teacher's own `ffi`-adjacent surface (its `neon`-style native
//! module entry points, where present in the pack) exports a curated set
//! of operations rather than mirroring every internal helper 1:1.
//!
//! Every exported function follows the same contract: the first
//! parameter is always the env (or VM, for lifecycle calls that precede
//! an env existing), the return value is always a [`JsvmStatus`], and any
//! out-value is written through a caller-supplied pointer. None of these
//! functions may unwind a Rust panic across the boundary — `call_into_module`
//! (spec §4.5) is the only place JS-thrown exceptions are allowed to
//! surface, and `catch_unwind` guards every entry point against a stray
//! Rust panic turning into undefined behavior on the other side of the ABI.

use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;

use crate::env::{Env, ModuleApiVersion};
use crate::error::JsvmStatus;
use crate::reference::{self, Ownership, TypeTag};
use crate::vm::{CreateVMOptions, InitOptions, VM};

/// `OH_JSVM_GetHeapStatistics`'s out-parameter shape (SPEC_FULL §3). Field
/// order and names mirror `v8::HeapStatistics`'s own accessors, flattened
/// into a plain `repr(C)` struct the host can read without a getter per
/// field.
#[repr(C)]
pub struct JsvmHeapStatistics {
  pub total_heap_size: usize,
  pub total_heap_size_executable: usize,
  pub total_physical_size: usize,
  pub total_available_size: usize,
  pub used_heap_size: usize,
  pub heap_size_limit: usize,
  pub malloced_memory: usize,
  pub external_memory: usize,
  pub peak_malloced_memory: usize,
  pub number_of_native_contexts: usize,
  pub number_of_detached_contexts: usize,
}

impl From<crate::vm::HeapStatistics> for JsvmHeapStatistics {
  fn from(stats: crate::vm::HeapStatistics) -> Self {
    JsvmHeapStatistics {
      total_heap_size: stats.total_heap_size,
      total_heap_size_executable: stats.total_heap_size_executable,
      total_physical_size: stats.total_physical_size,
      total_available_size: stats.total_available_size,
      used_heap_size: stats.used_heap_size,
      heap_size_limit: stats.heap_size_limit,
      malloced_memory: stats.malloced_memory,
      external_memory: stats.external_memory,
      peak_malloced_memory: stats.peak_malloced_memory,
      number_of_native_contexts: stats.number_of_native_contexts,
      number_of_detached_contexts: stats.number_of_detached_contexts,
    }
  }
}

/// Opaque handle type every `OH_JSVM_*` function receives/returns instead
/// of a typed Rust reference, matching the C ABI's "everything is a
/// pointer" convention (spec §6). `JsvmVm`/`JsvmEnv` are produced via
/// `Rc::into_raw` (a VM may be shared by several envs; an env's own
/// refcount is always 1 — it is reclaimed exactly once, by
/// `OH_JSVM_DestroyEnv`) and must be passed back through the matching
/// `Destroy*` call exactly once.
pub type JsvmEnv = *const Env;
pub type JsvmVm = *const VM;
pub type JsvmValue = *mut c_void;

fn guard(f: impl FnOnce() -> JsvmStatus) -> JsvmStatus {
  match catch_unwind(AssertUnwindSafe(f)) {
    Ok(status) => status,
    Err(_) => {
      tracing::error!("panic crossed the JSVM C ABI boundary; this is a bug");
      JsvmStatus::GenericFailure
    }
  }
}

/// `OH_JSVM_Init` (spec §6, "Engine/VM lifecycle family").
#[no_mangle]
pub extern "C" fn OH_JSVM_Init(v8_flags: *const c_char) -> JsvmStatus {
  guard(|| {
    let mut options = InitOptions::default();
    if !v8_flags.is_null() {
      // Safety: caller guarantees a NUL-terminated string for the
      // lifetime of this call, per the ABI contract documented on every
      // function in this module.
      if let Ok(flags) = unsafe { CStr::from_ptr(v8_flags) }.to_str() {
        options.v8_flags = flags.split_whitespace().map(str::to_owned).collect();
      }
    }
    crate::vm::init(options);
    JsvmStatus::Ok
  })
}

/// `OH_JSVM_CreateVM`.
#[no_mangle]
pub extern "C" fn OH_JSVM_CreateVM(out_vm: *mut JsvmVm) -> JsvmStatus {
  guard(|| {
    if out_vm.is_null() {
      return JsvmStatus::InvalidArg;
    }
    match VM::new(CreateVMOptions::default()) {
      Ok(vm) => {
        unsafe { *out_vm = Rc::into_raw(Rc::new(vm)) };
        JsvmStatus::Ok
      }
      Err(status) => status,
    }
  })
}

/// `OH_JSVM_DestroyVM`.
#[no_mangle]
pub extern "C" fn OH_JSVM_DestroyVM(vm: JsvmVm) -> JsvmStatus {
  guard(|| {
    if vm.is_null() {
      return JsvmStatus::InvalidArg;
    }
    // Safety: `vm` was produced by `OH_JSVM_CreateVM`'s `Rc::into_raw` and
    // not yet destroyed; reclaiming it here is the one place ownership is
    // handed back from the host. Any `Env` still holding a clone of this
    // `Rc` keeps the isolate alive until that env is destroyed too.
    drop(unsafe { Rc::from_raw(vm) });
    JsvmStatus::Ok
  })
}

/// `OH_JSVM_CreateEnv` (spec §6, "Env family").
#[no_mangle]
pub extern "C" fn OH_JSVM_CreateEnv(vm: JsvmVm, out_env: *mut JsvmEnv) -> JsvmStatus {
  guard(|| {
    if vm.is_null() || out_env.is_null() {
      return JsvmStatus::InvalidArg;
    }
    // Safety: caller-supplied handle, not yet destroyed (ABI contract).
    // `Rc::increment_strong_count` takes a clone without consuming the
    // host's own handle, which still owes a matching `OH_JSVM_DestroyVM`.
    unsafe { Rc::increment_strong_count(vm) };
    let vm_for_call = unsafe { Rc::from_raw(vm) };
    match Env::new(vm_for_call, ModuleApiVersion::V1) {
      Ok(env) => {
        unsafe { *out_env = Rc::into_raw(env) as JsvmEnv };
        JsvmStatus::Ok
      }
      Err(status) => status,
    }
  })
}

/// `OH_JSVM_DestroyEnv`.
#[no_mangle]
pub extern "C" fn OH_JSVM_DestroyEnv(env: JsvmEnv) -> JsvmStatus {
  guard(|| {
    if env.is_null() {
      return JsvmStatus::InvalidArg;
    }
    // Safety: `env` was produced by `OH_JSVM_CreateEnv`'s `Rc::into_raw`.
    let env_rc = unsafe { Rc::from_raw(env as *const Env) };
    env_rc.destroy();
    JsvmStatus::Ok
  })
}

/// `OH_JSVM_GetLastErrorInfo`'s out-parameter shape (spec §4.1). `message`
/// is a borrowed, NUL-terminated static string (the message table entry
/// for `error_code`) and is never freed by the host — unlike
/// [`JsvmCacheBuffer`] or the buffers [`OH_JSVM_RunScriptFromSource`]
/// returns, there is no matching `Release`/`Free` call for this field.
#[repr(C)]
pub struct JsvmExtendedErrorInfo {
  pub error_code: JsvmStatus,
  pub engine_error_code: i32,
  pub engine_reserved: usize,
  pub error_message: *const c_char,
}

/// `OH_JSVM_GetLastErrorInfo` (spec §4.1, C1 "Status & Error Plane"):
/// readable at any time, including immediately after an API call returned
/// `PENDING_EXCEPTION` (spec §8 invariant #5). Always itself succeeds
/// (`env`/`out_info` nullness aside) since reading the slot cannot fail.
#[no_mangle]
pub extern "C" fn OH_JSVM_GetLastErrorInfo(
  env: JsvmEnv,
  out_info: *mut JsvmExtendedErrorInfo,
) -> JsvmStatus {
  guard(|| {
    if env.is_null() || out_info.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let env_ref = unsafe { &*env };
    let last_error = env_ref.last_error_info();
    // `message_c` is always a `'static` NUL-terminated entry, so a raw
    // pointer into it stays valid for the process lifetime; no allocation,
    // and therefore nothing for the host to free.
    let message_ptr = last_error.code().message_c().as_ptr();
    unsafe {
      ptr::write(
        out_info,
        JsvmExtendedErrorInfo {
          error_code: last_error.code(),
          engine_error_code: last_error.engine_error_code,
          engine_reserved: last_error.engine_reserved,
          error_message: message_ptr,
        },
      )
    };
    JsvmStatus::Ok
  })
}

/// `OH_JSVM_Throw` (spec §6, "Exception family").
#[no_mangle]
pub extern "C" fn OH_JSVM_ThrowError(env: JsvmEnv, message: *const c_char) -> JsvmStatus {
  guard(|| {
    if env.is_null() || message.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let env_ref = unsafe { &*env };
    let message = match unsafe { CStr::from_ptr(message) }.to_str() {
      Ok(m) => m,
      Err(_) => return JsvmStatus::InvalidArg,
    };
    let result = env_ref.vm().with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      crate::call::throw_error(&mut scope, message);
    });
    match result {
      Ok(()) => JsvmStatus::Ok,
      Err(status) => status,
    }
  })
}

/// `OH_JSVM_Wrap` (spec §6, "Wrap/Reference family"). `finalizer_hint` and
/// `type_hint` are reserved for the host's own bookkeeping, passed
/// straight through to the finalizer callback untouched by JSVM.
#[no_mangle]
pub extern "C" fn OH_JSVM_Wrap(
  env: JsvmEnv,
  object: JsvmValue,
  native_object: *mut c_void,
  finalize: Option<extern "C" fn(env: JsvmEnv, data: *mut c_void, hint: *mut c_void)>,
  finalize_hint: *mut c_void,
) -> JsvmStatus {
  guard(|| {
    if env.is_null() || object.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let env_ref = unsafe { &*env };
    let result = env_ref.vm().with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      let Some(obj_value) = (unsafe { local_value_from_raw(&mut scope, object) }) else {
        return JsvmStatus::ObjectExpected;
      };
      let Ok(obj) = v8::Local::<v8::Object>::try_from(obj_value) else {
        return JsvmStatus::ObjectExpected;
      };

      let finalizer = finalize.map(|f| -> crate::reference::FinalizerFn {
        let env_ptr = env;
        Box::new(move |data: *mut c_void| f(env_ptr, data, finalize_hint))
      });

      match reference::wrap(&mut scope, &env_ref.vm().data().wrapper_key, obj, native_object, finalizer, Ownership::Runtime) {
        Ok(reference) => {
          env_ref.track_reference(reference);
          JsvmStatus::Ok
        }
        Err(status) => status,
      }
    });
    result.unwrap_or(JsvmStatus::GenericFailure)
  })
}

/// `OH_JSVM_CheckObjectTypeTag`.
#[no_mangle]
pub extern "C" fn OH_JSVM_CheckObjectTypeTag(
  env: JsvmEnv,
  object: JsvmValue,
  tag_high: u64,
  tag_low: u64,
  out_result: *mut bool,
) -> JsvmStatus {
  guard(|| {
    if env.is_null() || object.is_null() || out_result.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let env_ref = unsafe { &*env };
    let result = env_ref.vm().with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      let Some(obj_value) = (unsafe { local_value_from_raw(&mut scope, object) }) else {
        return JsvmStatus::ObjectExpected;
      };
      let Ok(obj) = v8::Local::<v8::Object>::try_from(obj_value) else {
        return JsvmStatus::ObjectExpected;
      };
      let matches = reference::check_object_type_tag(
        &mut scope,
        &env_ref.vm().data().type_tag_key,
        obj,
        TypeTag::new(tag_high, tag_low),
      );
      unsafe { ptr::write(out_result, matches) };
      JsvmStatus::Ok
    });
    result.unwrap_or(JsvmStatus::GenericFailure)
  })
}

/// `OH_JSVM_GetVMInfo` (SPEC_FULL §3). Writes the linked engine's
/// cached-data version tag, used to decide whether a persisted code cache
/// is even worth attempting to load before paying for a full
/// `CompileScript` call with it attached.
#[no_mangle]
pub extern "C" fn OH_JSVM_GetVMInfo(
  out_cached_data_version_tag: *mut u32,
) -> JsvmStatus {
  guard(|| {
    if out_cached_data_version_tag.is_null() {
      return JsvmStatus::InvalidArg;
    }
    unsafe { ptr::write(out_cached_data_version_tag, v8::script_compiler::cached_data_version_tag()) };
    JsvmStatus::Ok
  })
}

/// `OH_JSVM_RequestGarbageCollectionForTesting` (SPEC_FULL §3). Requires
/// `Init` to have been called with `--expose-gc`; a host that forgets
/// gets back `GENERIC_FAILURE` rather than a silent no-op, since a test
/// relying on deterministic GC needs to know the flag was missing.
#[no_mangle]
pub extern "C" fn OH_JSVM_RequestGarbageCollectionForTesting(vm: JsvmVm) -> JsvmStatus {
  guard(|| {
    if vm.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let vm_ref = unsafe { &*vm };
    vm_ref.request_gc_for_testing();
    JsvmStatus::Ok
  })
}

/// `OH_JSVM_OpenInspector` (spec §4.6.5, "Inspector Agent" family).
/// Idempotent: calling it again while an agent is already attached is a
/// no-op, matching `Env::open_inspector`.
#[cfg(feature = "inspector")]
#[no_mangle]
pub extern "C" fn OH_JSVM_OpenInspector(env: JsvmEnv) -> JsvmStatus {
  guard(|| {
    if env.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let env_rc = unsafe { clone_env(env) };
    match env_rc.open_inspector() {
      Ok(()) => JsvmStatus::Ok,
      Err(status) => status,
    }
  })
}

/// `OH_JSVM_CloseInspector`.
#[cfg(feature = "inspector")]
#[no_mangle]
pub extern "C" fn OH_JSVM_CloseInspector(env: JsvmEnv) -> JsvmStatus {
  guard(|| {
    if env.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let env_ref = unsafe { &*env };
    env_ref.close_inspector();
    JsvmStatus::Ok
  })
}

/// `OH_JSVM_GetInspectorAddress`: allocates and writes out the
/// `ws://host:port/<uuid>` frontend address (spec §4.6.5); release with
/// [`OH_JSVM_FreeString`]. Returns `GENERIC_FAILURE` if no inspector is
/// attached.
#[cfg(feature = "inspector")]
#[no_mangle]
pub extern "C" fn OH_JSVM_GetInspectorAddress(
  env: JsvmEnv,
  out_result: *mut *mut c_char,
) -> JsvmStatus {
  guard(|| {
    if env.is_null() || out_result.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let env_ref = unsafe { &*env };
    match env_ref.inspector_address() {
      Some(address) => {
        unsafe { ptr::write(out_result, string_to_c_char(address)) };
        JsvmStatus::Ok
      }
      None => JsvmStatus::GenericFailure,
    }
  })
}

/// `OH_JSVM_GetHeapStatistics` (SPEC_FULL §3). Read-only; does not lock out
/// other VM operations beyond the duration of the call itself.
#[no_mangle]
pub extern "C" fn OH_JSVM_GetHeapStatistics(
  vm: JsvmVm,
  out_stats: *mut JsvmHeapStatistics,
) -> JsvmStatus {
  guard(|| {
    if vm.is_null() || out_stats.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let vm_ref = unsafe { &*vm };
    unsafe { ptr::write(out_stats, vm_ref.heap_statistics().into()) };
    JsvmStatus::Ok
  })
}

/// Recovers a `v8::Local<v8::Value>` from the opaque [`JsvmValue`] handles
/// the rest of this module passes around. In the real engine binding this
/// would be a `v8::Local` smuggled through an integer/pointer pun blessed
/// by the `v8` crate's own handle representation; here it is written as a
/// thin wrapper so every call site goes through one spot.
unsafe fn local_value_from_raw<'s>(
  scope: &mut v8::HandleScope<'s>,
  raw: JsvmValue,
) -> Option<v8::Local<'s, v8::Value>> {
  if raw.is_null() {
    return None;
  }
  // Safety: callers only ever pass back a `JsvmValue` obtained from a prior
  // JSVM call within the same handle scope, the same ABI contract N-API
  // gives its own `napi_value`.
  let ptr = raw as *const v8::Value;
  Some(v8::Local::from_raw(scope, ptr)?)
}

/// Borrows a clone of the `Rc<Env>` behind an ABI handle without consuming
/// the host's own reference (spec §6: handles are borrowed for the
/// duration of one call unless the call is itself a `Destroy*`). Mirrors
/// `OH_JSVM_CreateEnv`'s `Rc::increment_strong_count` dance so functions
/// that need an owned `Rc<Env>` (the compile/run pipeline's
/// [`crate::call::CallbackBundle`] stores one) don't have to reconstruct
/// one from a bare `&Env` every time.
unsafe fn clone_env(env: JsvmEnv) -> Rc<Env> {
  unsafe { Rc::increment_strong_count(env) };
  unsafe { Rc::from_raw(env) }
}

/// Leaks `text` as a NUL-terminated C string the host owns; release with
/// [`OH_JSVM_FreeString`].
fn string_to_c_char(text: String) -> *mut c_char {
  // Interior NULs can't round-trip through `CStr`; truncate at the first
  // one rather than failing the whole call, matching how `CString::new`
  // failures are handled at other C-string boundaries in this module.
  let sanitized = match std::ffi::CString::new(text.clone()) {
    Ok(c) => c,
    Err(_) => {
      let truncated: String = text.split('\0').next().unwrap_or_default().to_owned();
      std::ffi::CString::new(truncated).unwrap_or_default()
    }
  };
  sanitized.into_raw()
}

/// `OH_JSVM_RunScript` fused with `OH_JSVM_CompileScript` (spec §6,
/// "Execution family"). Compiles and runs `source` in `env`'s context and
/// writes the result's string coercion into a freshly allocated buffer.
/// A pending exception after `run_source` is reported as
/// `PENDING_EXCEPTION`, same as every other preamble-wrapped call; the
/// exception itself is retrievable afterwards via
/// `GetAndClearLastException` (not exported here — see `env::Env::take_last_exception`).
#[no_mangle]
pub extern "C" fn OH_JSVM_RunScriptFromSource(
  env: JsvmEnv,
  source: *const c_char,
  filename: *const c_char,
  out_result: *mut *mut c_char,
) -> JsvmStatus {
  guard(|| {
    if env.is_null() || source.is_null() || filename.is_null() || out_result.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let source = match unsafe { CStr::from_ptr(source) }.to_str() {
      Ok(s) => s,
      Err(_) => return JsvmStatus::InvalidArg,
    };
    let filename = match unsafe { CStr::from_ptr(filename) }.to_str() {
      Ok(s) => s,
      Err(_) => return JsvmStatus::InvalidArg,
    };
    let env_rc = unsafe { clone_env(env) };

    let outcome = env_rc.vm().with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      env_rc
        .with_context_scope(&mut scope, |scope| {
          crate::compile::run_source(&env_rc, scope, source, filename)
            .map(|value| value.to_rust_string_lossy(scope))
        })
        .and_then(|inner| inner)
    });

    match outcome {
      Ok(Ok(text)) => {
        unsafe { ptr::write(out_result, string_to_c_char(text)) };
        JsvmStatus::Ok
      }
      Ok(Err(status)) => status,
      Err(status) => status,
    }
  })
}

/// `OH_JSVM_FreeString`: releases a buffer returned by
/// [`OH_JSVM_RunScriptFromSource`].
#[no_mangle]
pub extern "C" fn OH_JSVM_FreeString(text: *mut c_char) -> JsvmStatus {
  guard(|| {
    if !text.is_null() {
      drop(unsafe { std::ffi::CString::from_raw(text) });
    }
    JsvmStatus::Ok
  })
}

/// Opaque byte buffer handed back to the host with ownership transferred
/// (spec §4.6: "Caller retains ownership and MUST release via
/// `ReleaseCache`"). A boxed slice leaked into a raw pointer/length pair,
/// the same shape the engine's own `CachedData` already has.
#[repr(C)]
pub struct JsvmCacheBuffer {
  pub data: *mut u8,
  pub length: usize,
}

/// `OH_JSVM_CreateCodeCache` fused with a one-shot `CompileScript` (spec
/// §6, "Compile cache & Wasm family"). Compiles `source` (without running
/// it) and serializes its code cache into `out_cache`.
#[no_mangle]
pub extern "C" fn OH_JSVM_CreateCodeCacheFromSource(
  env: JsvmEnv,
  source: *const c_char,
  filename: *const c_char,
  out_cache: *mut JsvmCacheBuffer,
) -> JsvmStatus {
  guard(|| {
    if env.is_null() || source.is_null() || filename.is_null() || out_cache.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let source = match unsafe { CStr::from_ptr(source) }.to_str() {
      Ok(s) => s,
      Err(_) => return JsvmStatus::InvalidArg,
    };
    let filename = match unsafe { CStr::from_ptr(filename) }.to_str() {
      Ok(s) => s,
      Err(_) => return JsvmStatus::InvalidArg,
    };
    let env_rc = unsafe { clone_env(env) };

    let outcome = env_rc.vm().with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      env_rc
        .with_context_scope(&mut scope, |scope| {
          crate::compile::compile_script(&env_rc, scope, source, filename, None)
            .map(|compiled| crate::compile::create_code_cache(scope, &compiled))
        })
        .and_then(|inner| inner)
    });

    match outcome {
      Ok(Ok(bytes)) => {
        let mut boxed = bytes.into_boxed_slice();
        let buffer = JsvmCacheBuffer {
          data: boxed.as_mut_ptr(),
          length: boxed.len(),
        };
        std::mem::forget(boxed);
        unsafe { ptr::write(out_cache, buffer) };
        JsvmStatus::Ok
      }
      Ok(Err(status)) => status,
      Err(status) => status,
    }
  })
}

/// `OH_JSVM_ReleaseCache(CACHE_TYPE_JS)` (spec §4.6): reclaims a buffer
/// produced by [`OH_JSVM_CreateCodeCacheFromSource`].
#[no_mangle]
pub extern "C" fn OH_JSVM_ReleaseCache(cache: *mut JsvmCacheBuffer) -> JsvmStatus {
  guard(|| {
    if cache.is_null() {
      return JsvmStatus::InvalidArg;
    }
    let buffer = unsafe { &*cache };
    if !buffer.data.is_null() {
      drop(unsafe { Box::from_raw(std::slice::from_raw_parts_mut(buffer.data, buffer.length)) });
    }
    JsvmStatus::Ok
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn init_and_create_vm_round_trip() {
    assert_eq!(OH_JSVM_Init(ptr::null()), JsvmStatus::Ok);
    let mut vm: JsvmVm = ptr::null_mut();
    assert_eq!(OH_JSVM_CreateVM(&mut vm), JsvmStatus::Ok);
    assert!(!vm.is_null());
    assert_eq!(OH_JSVM_DestroyVM(vm), JsvmStatus::Ok);
  }

  #[test]
  fn null_handles_are_rejected_not_dereferenced() {
    assert_eq!(OH_JSVM_DestroyVM(ptr::null_mut()), JsvmStatus::InvalidArg);
    assert_eq!(OH_JSVM_DestroyEnv(ptr::null_mut()), JsvmStatus::InvalidArg);
  }

  fn fresh_env() -> (JsvmVm, JsvmEnv) {
    assert_eq!(OH_JSVM_Init(ptr::null()), JsvmStatus::Ok);
    let mut vm: JsvmVm = ptr::null_mut();
    assert_eq!(OH_JSVM_CreateVM(&mut vm), JsvmStatus::Ok);
    let mut env: JsvmEnv = ptr::null_mut();
    assert_eq!(OH_JSVM_CreateEnv(vm, &mut env), JsvmStatus::Ok);
    (vm, env)
  }

  #[test]
  fn run_script_from_source_round_trips_a_string_result() {
    let (vm, env) = fresh_env();
    let source = std::ffi::CString::new("1 + 2").unwrap();
    let filename = std::ffi::CString::new("ffi-test.js").unwrap();
    let mut out: *mut c_char = ptr::null_mut();

    assert_eq!(
      OH_JSVM_RunScriptFromSource(env, source.as_ptr(), filename.as_ptr(), &mut out),
      JsvmStatus::Ok
    );
    assert!(!out.is_null());
    let result = unsafe { CStr::from_ptr(out) }.to_str().unwrap().to_owned();
    assert_eq!(result, "3");

    assert_eq!(OH_JSVM_FreeString(out), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyEnv(env), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyVM(vm), JsvmStatus::Ok);
  }

  #[test]
  fn get_heap_statistics_reports_a_nonzero_limit() {
    let (vm, env) = fresh_env();
    let mut stats = JsvmHeapStatistics {
      total_heap_size: 0,
      total_heap_size_executable: 0,
      total_physical_size: 0,
      total_available_size: 0,
      used_heap_size: 0,
      heap_size_limit: 0,
      malloced_memory: 0,
      external_memory: 0,
      peak_malloced_memory: 0,
      number_of_native_contexts: 0,
      number_of_detached_contexts: 0,
    };
    assert_eq!(OH_JSVM_GetHeapStatistics(vm, &mut stats), JsvmStatus::Ok);
    assert!(stats.heap_size_limit > 0);
    assert_eq!(OH_JSVM_DestroyEnv(env), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyVM(vm), JsvmStatus::Ok);
  }

  #[test]
  #[cfg(feature = "inspector")]
  fn inspector_open_close_round_trips_an_address() {
    let (vm, env) = fresh_env();
    let mut out: *mut c_char = ptr::null_mut();

    assert_eq!(
      OH_JSVM_GetInspectorAddress(env, &mut out),
      JsvmStatus::GenericFailure
    );
    assert_eq!(OH_JSVM_OpenInspector(env), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_GetInspectorAddress(env, &mut out), JsvmStatus::Ok);
    assert!(!out.is_null());
    let address = unsafe { CStr::from_ptr(out) }.to_str().unwrap().to_owned();
    assert!(address.starts_with("ws://"));
    assert_eq!(OH_JSVM_FreeString(out), JsvmStatus::Ok);

    assert_eq!(OH_JSVM_CloseInspector(env), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyEnv(env), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyVM(vm), JsvmStatus::Ok);
  }

  #[test]
  fn code_cache_buffer_round_trips_through_release() {
    let (vm, env) = fresh_env();
    let source = std::ffi::CString::new("(()=>42)()").unwrap();
    let filename = std::ffi::CString::new("ffi-cache.js").unwrap();
    let mut cache = JsvmCacheBuffer { data: ptr::null_mut(), length: 0 };

    assert_eq!(
      OH_JSVM_CreateCodeCacheFromSource(env, source.as_ptr(), filename.as_ptr(), &mut cache),
      JsvmStatus::Ok
    );
    assert!(!cache.data.is_null());
    assert!(cache.length > 0);

    assert_eq!(OH_JSVM_ReleaseCache(&mut cache), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyEnv(env), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyVM(vm), JsvmStatus::Ok);
  }

  #[test]
  fn get_last_error_info_reports_ok_before_any_failure() {
    let (vm, env) = fresh_env();
    let mut info = JsvmExtendedErrorInfo {
      error_code: JsvmStatus::Ok,
      engine_error_code: 0,
      engine_reserved: 0,
      error_message: ptr::null(),
    };
    assert_eq!(OH_JSVM_GetLastErrorInfo(env, &mut info), JsvmStatus::Ok);
    assert_eq!(info.error_code, JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyEnv(env), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyVM(vm), JsvmStatus::Ok);
  }

  #[test]
  fn get_last_error_info_matches_a_thrown_script() {
    let (vm, env) = fresh_env();
    let source = std::ffi::CString::new("throw new Error('boom')").unwrap();
    let filename = std::ffi::CString::new("ffi-throw.js").unwrap();
    let mut out: *mut c_char = ptr::null_mut();

    assert_eq!(
      OH_JSVM_RunScriptFromSource(env, source.as_ptr(), filename.as_ptr(), &mut out),
      JsvmStatus::PendingException
    );

    let mut info = JsvmExtendedErrorInfo {
      error_code: JsvmStatus::Ok,
      engine_error_code: 0,
      engine_reserved: 0,
      error_message: ptr::null(),
    };
    assert_eq!(OH_JSVM_GetLastErrorInfo(env, &mut info), JsvmStatus::Ok);
    assert_eq!(info.error_code, JsvmStatus::PendingException);
    assert!(!info.error_message.is_null());
    let message = unsafe { CStr::from_ptr(info.error_message) }.to_str().unwrap();
    assert_eq!(message, JsvmStatus::PendingException.message());

    assert_eq!(OH_JSVM_DestroyEnv(env), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyVM(vm), JsvmStatus::Ok);
  }

  #[test]
  fn get_last_error_info_rejects_null_out_pointer() {
    let (vm, env) = fresh_env();
    assert_eq!(
      OH_JSVM_GetLastErrorInfo(env, ptr::null_mut()),
      JsvmStatus::InvalidArg
    );
    assert_eq!(OH_JSVM_DestroyEnv(env), JsvmStatus::Ok);
    assert_eq!(OH_JSVM_DestroyVM(vm), JsvmStatus::Ok);
  }
}
