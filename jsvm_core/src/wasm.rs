//! WASM compile pipeline (component C6, part 4).
//!
//! The teacher has no WASM support of its own; this module is grounded
//! instead in V8's own `WasmModuleObject` compile/cache API as exposed
//! through the `v8` crate, following the same "compile once, instantiate
//! many times" shape the teacher already uses for its unbound/bound
//! script split in [`crate::compile`].
//!
//! The distilled spec also names a `CompileWasmFunction(module, index,
//! optLevel)` operation that recompiles one function at a requested
//! tier. The `v8` crate exposes no such per-function entry point —
//! Liftoff→TurboFan tier-up is an engine-internal decision driven by the
//! isolate's own heuristics and flags (`--wasm-tier-up`, `--liftoff`),
//! not something a `WasmModuleObject` lets an embedder trigger or query
//! per function index. There is nothing in this crate or the sibling
//! example repos to ground a Rust implementation of it against, so it is
//! not implemented here; see `DESIGN.md`.

use std::rc::Rc;

use crate::call::call_into_module;
use crate::env::Env;
use crate::error::JsvmStatus;

pub struct CompiledWasmModule {
  module: v8::Global<v8::WasmModuleObject>,
}

/// `CompileWasmModule` (spec §4.6).
pub fn compile_wasm_module(
  env: &Rc<Env>,
  scope: &mut v8::HandleScope,
  bytes: &[u8],
) -> Result<CompiledWasmModule, JsvmStatus> {
  env.with_context_scope(scope, |scope| {
    call_into_module(env, scope, |scope| {
      let module = v8::WasmModuleObject::compile(scope, bytes)?;
      Some(CompiledWasmModule {
        module: v8::Global::new(scope, module),
      })
    })
  })?
}

/// `CreateWasmCache` (spec §4.6): serializes compiled-module cache data,
/// the WASM analogue of [`crate::compile::create_code_cache`].
pub fn create_wasm_cache(scope: &mut v8::HandleScope, module: &CompiledWasmModule) -> Vec<u8> {
  let module_local = v8::Local::new(scope, &module.module);
  module_local
    .get_compiled_module()
    .serialize()
    .unwrap_or_default()
}
