//! Compile, cache & run pipeline (component C6, part 1).
//!
//! Grounded in the teacher's `execute_script`, which builds a
//! `v8::Script` from source, runs it inside a `TryCatch`, and — where the
//! teacher precompiles for its startup snapshot — records a
//! `v8::ScriptCompiler::CachedData` blob. JSVM exposes that same
//! compile/run/cache triad as three independent operations instead of one
//! fused helper, since a host may compile once and run many times.

use std::rc::Rc;

use crate::call::call_into_module;
use crate::env::Env;
use crate::error::JsvmStatus;

/// A compiled, not-yet-run script (spec §4.6 "CompileScript"). Holds the
/// `v8::Global<v8::UnboundScript>` so it can be bound into any context
/// sharing the isolate, matching the engine's own unbound/bound script
/// split.
pub struct CompiledScript {
  unbound: v8::Global<v8::UnboundScript>,
}

/// `CompileScript`/`CompileScriptWithSourceMapUrl` (spec §4.6). `cache`, if
/// supplied, is passed to the engine as `CachedData`; a version mismatch
/// falls back to a full parse rather than failing the call, same as the
/// engine's own "reject stale cache, recompile" behavior.
pub fn compile_script(
  env: &Rc<Env>,
  scope: &mut v8::HandleScope,
  source: &str,
  filename: &str,
  cache: Option<&[u8]>,
) -> Result<CompiledScript, JsvmStatus> {
  call_into_module(env, scope, |scope| {
    let source_str = v8::String::new(scope, source)?;
    let name = v8::String::new(scope, filename)?;
    let origin = script_origin(scope, name);

    let mut script_source = match cache {
      Some(data) => {
        let cached = v8::script_compiler::CachedData::new(data);
        v8::script_compiler::Source::new_with_cached_data(source_str, Some(&origin), cached)
      }
      None => v8::script_compiler::Source::new(source_str, Some(&origin)),
    };

    let unbound = v8::script_compiler::compile_unbound_script(
      scope,
      &mut script_source,
      v8::script_compiler::CompileOptions::NoCompileOptions,
      v8::script_compiler::NoCacheReason::NoReason,
    )?;

    if cache.is_some() && script_source.get_cached_data().map(|d| d.rejected()).unwrap_or(false) {
      tracing::debug!(filename, "rejected stale code cache, recompiled from source");
    }

    Some(CompiledScript {
      unbound: v8::Global::new(scope, unbound),
    })
  })
}

fn script_origin<'s>(scope: &mut v8::HandleScope<'s>, name: v8::Local<'s, v8::String>) -> v8::ScriptOrigin<'s> {
  v8::ScriptOrigin::new(
    scope,
    name.into(),
    0,
    0,
    false,
    -1,
    None,
    false,
    false,
    false,
    None,
  )
}

/// `CreateCodeCache` (spec §4.6): serializes a compiled script's cache
/// data so the host can persist it and pass it back into a later
/// `compile_script` call.
pub fn create_code_cache(scope: &mut v8::HandleScope, compiled: &CompiledScript) -> Vec<u8> {
  let unbound = v8::Local::new(scope, &compiled.unbound);
  unbound
    .create_code_cache()
    .map(|data| data.as_slice().to_vec())
    .unwrap_or_default()
}

/// `RunScript` (spec §4.6): binds the compiled script into `env`'s context
/// and runs it once. Running the same `CompiledScript` again creates a
/// fresh `v8::Script` binding each time; V8 does not allow re-running one
/// bound script instance.
pub fn run_script<'s>(
  env: &Rc<Env>,
  scope: &mut v8::HandleScope<'s>,
  compiled: &CompiledScript,
) -> Result<v8::Local<'s, v8::Value>, JsvmStatus> {
  env.with_context_scope(scope, |context_scope| {
    call_into_module(env, context_scope, |scope| {
      let unbound = v8::Local::new(scope, &compiled.unbound);
      let script = unbound.bind_to_current_context(scope);
      script.run(scope)
    })
  })?
}

/// Convenience one-shot matching the teacher's fused `execute_script`:
/// compile and run without keeping the intermediate [`CompiledScript`]
/// around. Most hosts that do not need caching call this instead of
/// `compile_script` + `run_script` separately.
pub fn run_source<'s>(
  env: &Rc<Env>,
  scope: &mut v8::HandleScope<'s>,
  source: &str,
  filename: &str,
) -> Result<v8::Local<'s, v8::Value>, JsvmStatus> {
  let compiled = compile_script(env, scope, source, filename, None)?;
  run_script(env, scope, &compiled)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::env::ModuleApiVersion;
  use crate::vm::{CreateVMOptions, InitOptions, VM};

  #[test]
  fn compiles_and_runs_simple_expression() {
    crate::vm::init(InitOptions::default());
    let vm = Rc::new(VM::new(CreateVMOptions::default()).unwrap());
    let env = Env::new(vm.clone(), ModuleApiVersion::Experimental).unwrap();

    let result = vm.with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      let value = run_source(&env, &mut scope, "1 + 2", "test.js").unwrap();
      value.int32_value(&mut scope).unwrap()
    });
    assert_eq!(result.unwrap(), 3);
  }

  #[test]
  fn code_cache_round_trips_through_recompile() {
    crate::vm::init(InitOptions::default());
    let vm = Rc::new(VM::new(CreateVMOptions::default()).unwrap());
    let env = Env::new(vm.clone(), ModuleApiVersion::Experimental).unwrap();

    vm.with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      let compiled = compile_script(&env, &mut scope, "40 + 2", "cache.js", None).unwrap();
      let cache = create_code_cache(&mut scope, &compiled);
      assert!(!cache.is_empty());

      let recompiled = compile_script(&env, &mut scope, "40 + 2", "cache.js", Some(&cache)).unwrap();
      let value = run_script(&env, &mut scope, &recompiled).unwrap();
      assert_eq!(value.int32_value(&mut scope).unwrap(), 42);
    })
    .unwrap();
  }
}
