//! Global process memory allocator for the JSVM demo host.
//!
//! This is independent of V8's own `ArrayBuffer` allocator (installed per
//! isolate in `jsvm_core::vm::VM::new`), which governs memory for
//! JS-visible buffers rather than the process as a whole.

#[cfg(all(
  target_family = "unix",
  not(target_os = "macos"),
  not(target_os = "emscripten"),
  feature = "jemalloc"
))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(all(target_family = "unix", target_os = "macos", feature = "jemalloc"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;
