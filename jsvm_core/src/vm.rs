//! VM lifecycle (component C2, part 1: the isolate).
//!
//! Grounded in the teacher's `init_v8_platform`/`IcuData` one-time-init
//! dance (guarded by a process-wide `std::sync::Once`) and in its
//! `JsRuntime::new` constructor, which builds an isolate with a
//! `v8::CreateParams` and installs a couple of private keys into
//! isolate-embedder data before any script runs.

use std::cell::{Cell, RefCell};
use std::sync::Once;

use crate::error::JsvmStatus;

static V8_PLATFORM_INIT: Once = Once::new();

/// `Init` options (spec §4.2). Flags are passed verbatim to
/// `v8::V8::set_flags_from_string`, same as the teacher's CLI-flag
/// passthrough for V8 (`--max-old-space-size`, `--expose-gc`, etc).
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
  pub v8_flags: Vec<String>,
}

/// Installs the V8 platform exactly once per process (spec §4.2 invariant:
/// "idempotent; a second call is a silent no-op"). Not thread-safe to call
/// concurrently with isolate creation, matching the engine's own
/// requirement that `V8::initialize_platform` happen before any isolate
/// exists.
pub fn init(options: InitOptions) {
  V8_PLATFORM_INIT.call_once(|| {
    for flag in &options.v8_flags {
      v8::V8::set_flags_from_string(flag);
    }
    let platform = v8::new_default_platform(0, false).make_shared();
    v8::V8::initialize_platform(platform);
    v8::V8::initialize();
    tracing::debug!(flags = ?options.v8_flags, "V8 platform initialized");
  });
}

/// Per-isolate embedder data installed once at VM creation: the private
/// symbols used to key `Wrap`/`TypeTag` (spec §4.4) so every `Env` sharing
/// this isolate uses the same keys.
pub struct IsolateData {
  pub wrapper_key: v8::Global<v8::Private>,
  pub type_tag_key: v8::Global<v8::Private>,
}

impl IsolateData {
  fn install(isolate: &mut v8::Isolate) -> Self {
    let mut scope = v8::HandleScope::new(isolate);
    let wrapper_key = {
      let name = v8::String::new(&mut scope, "jsvm::wrapper").unwrap();
      let private = v8::Private::new(&mut scope, Some(name));
      v8::Global::new(&mut scope, private)
    };
    let type_tag_key = {
      let name = v8::String::new(&mut scope, "jsvm::type_tag").unwrap();
      let private = v8::Private::new(&mut scope, Some(name));
      v8::Global::new(&mut scope, private)
    };
    IsolateData { wrapper_key, type_tag_key }
  }
}

/// `CreateVM` options (spec §4.2): heap limits and an optional startup
/// snapshot. `array_buffer_allocator` is always the default allocator; the
/// spec does not ask for a pluggable one.
#[derive(Default)]
pub struct CreateVMOptions {
  pub initial_heap_size_in_bytes: Option<usize>,
  pub maximum_heap_size_in_bytes: Option<usize>,
  pub snapshot_blob: Option<Vec<u8>>,
}

/// One JS engine instance (spec's "VM" / a V8 `Isolate`). Not `Send`: V8
/// isolates are single-threaded by construction, and JSVM never attempts
/// to move one across threads — the inspector I/O thread talks to the JS
/// thread only through the interrupt-driven queue in
/// [`crate::inspector`].
pub struct VM {
  isolate: RefCell<v8::OwnedIsolate>,
  pub(crate) data: IsolateData,
  lock_depth: Cell<u32>,
  terminating: Cell<bool>,
}

impl VM {
  /// `CreateVM`. Builds a fresh isolate (or one restored from a snapshot
  /// blob, spec §4.6) and installs [`IsolateData`].
  pub fn new(options: CreateVMOptions) -> Result<Self, JsvmStatus> {
    let mut params = v8::CreateParams::default().array_buffer_allocator(v8::new_default_allocator());
    if let Some(initial) = options.initial_heap_size_in_bytes {
      let max = options.maximum_heap_size_in_bytes.unwrap_or(initial * 4);
      params = params.heap_limits(initial, max);
    }
    let mut isolate = match options.snapshot_blob {
      // Spec §4.2: "a blob whose checksum fails causes `INVALID_ARG`".
      Some(blob) => {
        let validated = crate::snapshot::validate_and_strip_checksum(&blob)
          .map_err(JsvmStatus::from)?
          .to_vec();
        v8::Isolate::new(params.snapshot_blob(validated))
      }
      None => v8::Isolate::new(params),
    };
    let data = IsolateData::install(&mut isolate);
    Ok(VM {
      isolate: RefCell::new(isolate),
      data,
      lock_depth: Cell::new(0),
      terminating: Cell::new(false),
    })
  }

  /// Runs `f` with exclusive, reentrant access to the isolate (spec §4.2
  /// "AcquireLock"/"ReleaseLock": a JSVM VM lock is reentrant within one
  /// thread, unlike V8's own `Locker`, which only guards cross-thread
  /// access and does not nest cheaply).
  pub fn with_locked<R>(&self, f: impl FnOnce(&mut v8::Isolate) -> R) -> Result<R, JsvmStatus> {
    self.lock_depth.set(self.lock_depth.get() + 1);
    let result = {
      let mut isolate = self.isolate.borrow_mut();
      f(&mut isolate)
    };
    self.lock_depth.set(self.lock_depth.get() - 1);
    Ok(result)
  }

  pub fn is_locked(&self) -> bool {
    self.lock_depth.get() > 0
  }

  pub(crate) fn isolate_mut(&self) -> std::cell::RefMut<'_, v8::OwnedIsolate> {
    self.isolate.borrow_mut()
  }

  /// The private-key pair installed at construction (spec §4.4's
  /// `Wrap`/`TypeTag` storage keys).
  pub fn data(&self) -> &IsolateData {
    &self.data
  }

  /// A cloneable, `Send` handle that other threads use to wake the JS
  /// thread via `v8::Isolate::request_interrupt` (spec §4.7's inspector
  /// I/O thread is the only consumer today, but the handle itself is not
  /// inspector-specific).
  pub fn interrupt_waker(&self) -> v8::IsolateHandle {
    self.isolate.borrow().thread_safe_handle()
  }

  /// Engine primitive backing spec §5's "Cancellation": there is no
  /// cancellation API for in-flight JS, but a host thread may ask the
  /// isolate to unwind whatever script is currently running. Once called,
  /// [`VM::is_terminating`] reports `true` until [`VM::cancel_terminate_execution`]
  /// runs, and the preamble (`call::call_into_module`) starts rejecting
  /// work instead of entering the engine (spec §7 "Cannot run JS").
  pub fn terminate_execution(&self) {
    self.terminating.set(true);
    self.isolate.borrow_mut().terminate_execution();
  }

  /// Reverses [`VM::terminate_execution`], letting the preamble admit work
  /// again.
  pub fn cancel_terminate_execution(&self) {
    self.isolate.borrow_mut().cancel_terminate_execution();
    self.terminating.set(false);
  }

  pub fn is_terminating(&self) -> bool {
    self.terminating.get()
  }

  /// `RequestGarbageCollectionForTesting` (SPEC_FULL §3): forces a real GC
  /// pass, which is what actually fires the weak-with-finalizer callbacks
  /// [`crate::reference::Reference::arm_weak`] registers. Scenarios S3/S4
  /// (spec §8) rely on this instead of assuming a reference becomes
  /// finalizable the instant its refcount hits zero.
  pub fn request_gc_for_testing(&self) {
    self.isolate.borrow_mut().low_memory_notification();
  }

  /// `GetHeapStatistics` (SPEC_FULL §3): a read-only snapshot of the
  /// isolate's heap usage, used by a host deciding whether to force a GC
  /// pass (spec §8 scenarios S3/S4).
  pub fn heap_statistics(&self) -> HeapStatistics {
    let mut isolate = self.isolate.borrow_mut();
    let mut stats = v8::HeapStatistics::default();
    isolate.get_heap_statistics(&mut stats);
    HeapStatistics {
      total_heap_size: stats.total_heap_size(),
      total_heap_size_executable: stats.total_heap_size_executable(),
      total_physical_size: stats.total_physical_size(),
      total_available_size: stats.total_available_size(),
      used_heap_size: stats.used_heap_size(),
      heap_size_limit: stats.heap_size_limit(),
      malloced_memory: stats.malloced_memory(),
      external_memory: stats.external_memory(),
      peak_malloced_memory: stats.peak_malloced_memory(),
      number_of_native_contexts: stats.number_of_native_contexts(),
      number_of_detached_contexts: stats.number_of_detached_contexts(),
    }
  }
}

/// Plain snapshot of `v8::HeapStatistics` (SPEC_FULL §3's "Heap statistics
/// snapshot" family), copied out field-by-field rather than wrapping the
/// engine type directly, since the engine type borrows from the isolate
/// that produced it and a host wants to hold onto this after unlocking.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStatistics {
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

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn init_is_idempotent() {
    init(InitOptions::default());
    init(InitOptions::default());
  }

  #[test]
  fn vm_starts_unlocked() {
    init(InitOptions::default());
    let vm = VM::new(CreateVMOptions::default()).expect("vm creation");
    assert!(!vm.is_locked());
  }

  #[test]
  fn terminate_execution_round_trips() {
    init(InitOptions::default());
    let vm = VM::new(CreateVMOptions::default()).expect("vm creation");
    assert!(!vm.is_terminating());
    vm.terminate_execution();
    assert!(vm.is_terminating());
    vm.cancel_terminate_execution();
    assert!(!vm.is_terminating());
  }

  #[test]
  fn heap_statistics_reports_a_nonzero_limit() {
    init(InitOptions::default());
    let vm = VM::new(CreateVMOptions::default()).expect("vm creation");
    let stats = vm.heap_statistics();
    assert!(stats.heap_size_limit > 0);
    assert!(stats.used_heap_size <= stats.total_heap_size);
  }
}
