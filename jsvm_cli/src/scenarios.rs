//! The scenario suite from spec §8, run as a smoke test for the whole
//! crate rather than as part of its own automated test runner — these
//! exercise the exported `ffi` surface via the `jsvm_core` Rust API
//! directly, the way a real embedder's own integration tests would.

use std::rc::Rc;

use anyhow::{anyhow, Result};
use jsvm_core::env::{Env, ModuleApiVersion};
use jsvm_core::error::JsvmStatus;
use jsvm_core::reference::{self, Ownership, TypeTag};
use jsvm_core::vm::{CreateVMOptions, VM};

pub fn run_all() -> Result<()> {
  let scenarios: Vec<(&str, fn() -> Result<()>)> = vec![
    ("S1 hello world", scenario_hello_world),
    ("S2 exception propagation", scenario_exception_propagation),
    ("S3 wrap lifecycle", scenario_wrap_lifecycle),
    ("S4 reference strengthening", scenario_reference_strengthening),
    ("S5 code cache", scenario_code_cache),
    ("S6 type tag mismatch", scenario_type_tag_mismatch),
  ];

  let mut failures = 0;
  for (name, scenario) in scenarios {
    match scenario() {
      Ok(()) => println!("ok   - {name}"),
      Err(err) => {
        println!("FAIL - {name}: {err}");
        failures += 1;
      }
    }
  }

  if failures > 0 {
    anyhow::bail!("{failures} scenario(s) failed");
  }
  println!("all scenarios passed");
  Ok(())
}

fn fresh_env() -> Result<(Rc<VM>, Rc<Env>)> {
  let vm = Rc::new(VM::new(CreateVMOptions::default())?);
  let env = Env::new(vm.clone(), ModuleApiVersion::V1)?;
  Ok((vm, env))
}

fn scenario_hello_world() -> Result<()> {
  let (vm, env) = fresh_env()?;
  let value = vm.with_locked(|isolate| -> Result<i32> {
    let mut scope = v8::HandleScope::new(isolate);
    env.with_context_scope(&mut scope, |scope| -> Result<i32> {
      let value = jsvm_core::compile::run_source(&env, scope, "1 + 2", "s1.js")
        .map_err(|status| anyhow!("compile/run failed: {status}"))?;
      value
        .int32_value(scope)
        .ok_or_else(|| anyhow!("result was not an int32"))
    })?
  })??;

  anyhow::ensure!(value == 3, "expected 3, got {value}");
  env.destroy();
  Ok(())
}

fn scenario_exception_propagation() -> Result<()> {
  let (vm, env) = fresh_env()?;
  let message = vm.with_locked(|isolate| -> Result<String> {
    let mut scope = v8::HandleScope::new(isolate);
    env.with_context_scope(&mut scope, |scope| -> Result<String> {
      let result = jsvm_core::compile::run_source(&env, scope, "throw new Error('x')", "s2.js");
      anyhow::ensure!(
        result == Err(JsvmStatus::PendingException),
        "expected PENDING_EXCEPTION, got {result:?}"
      );
      let exception = env
        .take_last_exception(scope)
        .ok_or_else(|| anyhow!("no exception was recorded"))?;
      let obj = v8::Local::<v8::Object>::try_from(exception)?;
      let key = v8::String::new(scope, "message").unwrap();
      let message = obj
        .get(scope, key.into())
        .ok_or_else(|| anyhow!("exception had no .message"))?;
      Ok(message.to_rust_string_lossy(scope))
    })?
  })??;

  anyhow::ensure!(message == "x", "expected message \"x\", got {message:?}");
  env.destroy();
  Ok(())
}

fn scenario_wrap_lifecycle() -> Result<()> {
  let (vm, env) = fresh_env()?;
  let finalized = Rc::new(std::cell::Cell::new(0u32));
  let finalized_for_closure = finalized.clone();
  const NATIVE_POINTER: usize = 0xDEADBEEF;

  vm.with_locked(|isolate| -> Result<()> {
    let mut scope = v8::HandleScope::new(isolate);
    env.with_context_scope(&mut scope, |scope| -> Result<()> {
      let object = v8::Object::new(scope);
      let native_ptr = NATIVE_POINTER as *mut std::ffi::c_void;

      let finalizer: jsvm_core::reference::FinalizerFn = Box::new(move |_data| {
        finalized_for_closure.set(finalized_for_closure.get() + 1);
      });

      let reference = reference::wrap(
        scope,
        &env.vm().data().wrapper_key,
        object,
        native_ptr,
        Some(finalizer),
        Ownership::Runtime,
      )
      .map_err(|status| anyhow!("wrap failed: {status}"))?;

      let unwrapped = reference::unwrap(scope, &env.vm().data().wrapper_key, object)
        .map_err(|status| anyhow!("unwrap failed: {status}"))?;
      anyhow::ensure!(unwrapped == native_ptr, "unwrap returned a different pointer");

      env.track_reference(reference);
      Ok(())
    })?
  })??;

  // The object handle scope above already closed with nothing else holding
  // `object` reachable; force a real GC pass so the engine's weak callback
  // actually fires, then drain the queue it deferred its work onto.
  vm.request_gc_for_testing();
  env.drain_pending_finalizers();
  anyhow::ensure!(finalized.get() == 1, "finalizer ran {} times, expected 1", finalized.get());

  env.destroy();
  anyhow::ensure!(finalized.get() == 1, "destroy must not re-invoke an already-run finalizer");
  Ok(())
}

fn scenario_reference_strengthening() -> Result<()> {
  let (vm, env) = fresh_env()?;
  vm.with_locked(|isolate| -> Result<()> {
    let mut scope = v8::HandleScope::new(isolate);
    env.with_context_scope(&mut scope, |scope| -> Result<()> {
      let value: v8::Local<v8::Value> = v8::Object::new(scope).into();
      let weak_ref = reference::create_reference(scope, value, 0);
      anyhow::ensure!(weak_ref.refcount() == 0, "expected a weak (refcount 0) reference");

      let value2: v8::Local<v8::Value> = v8::Object::new(scope).into();
      let strong_ref = reference::create_reference(scope, value2, 1);
      anyhow::ensure!(strong_ref.refcount() == 1, "expected refcount 1 after creation");

      strong_ref.remove_ref(scope);
      anyhow::ensure!(strong_ref.refcount() == 0, "expected refcount 0 after Unref");
      Ok(())
    })?
  })??;

  env.destroy();
  Ok(())
}

fn scenario_code_cache() -> Result<()> {
  let (vm, env) = fresh_env()?;
  let cache = vm.with_locked(|isolate| -> Result<Vec<u8>> {
    let mut scope = v8::HandleScope::new(isolate);
    env.with_context_scope(&mut scope, |scope| -> Result<Vec<u8>> {
      let compiled = jsvm_core::compile::compile_script(&env, scope, "(()=>42)()", "s5.js", None)
        .map_err(|status| anyhow!("compile failed: {status}"))?;
      Ok(jsvm_core::compile::create_code_cache(scope, &compiled))
    })?
  })??;
  anyhow::ensure!(!cache.is_empty(), "code cache was empty");
  env.destroy();

  let (vm2, env2) = fresh_env()?;
  let value = vm2.with_locked(|isolate| -> Result<i32> {
    let mut scope = v8::HandleScope::new(isolate);
    env2.with_context_scope(&mut scope, |scope| -> Result<i32> {
      let compiled = jsvm_core::compile::compile_script(&env2, scope, "(()=>42)()", "s5.js", Some(&cache))
        .map_err(|status| anyhow!("recompile failed: {status}"))?;
      let result = jsvm_core::compile::run_script(&env2, scope, &compiled)
        .map_err(|status| anyhow!("run failed: {status}"))?;
      result.int32_value(scope).ok_or_else(|| anyhow!("result was not an int32"))
    })?
  })??;

  anyhow::ensure!(value == 42, "expected 42, got {value}");
  env2.destroy();
  Ok(())
}

fn scenario_type_tag_mismatch() -> Result<()> {
  let (vm, env) = fresh_env()?;
  vm.with_locked(|isolate| -> Result<()> {
    let mut scope = v8::HandleScope::new(isolate);
    env.with_context_scope(&mut scope, |scope| -> Result<()> {
      let object = v8::Object::new(scope);
      reference::type_tag(scope, &env.vm().data().type_tag_key, object, TypeTag::new(1, 2))
        .map_err(|status| anyhow!("type_tag failed: {status}"))?;

      let mismatch = reference::check_object_type_tag(scope, &env.vm().data().type_tag_key, object, TypeTag::new(1, 3));
      anyhow::ensure!(!mismatch, "expected {{1,3}} to mismatch {{1,2}}");

      let exact = reference::check_object_type_tag(scope, &env.vm().data().type_tag_key, object, TypeTag::new(1, 2));
      anyhow::ensure!(exact, "expected {{1,2}} to match itself");
      Ok(())
    })?
  })??;

  env.destroy();
  Ok(())
}
