//! Integration tests for the acceptance scenarios named in spec §8.
//! Unit tests colocated with each module cover individual invariants;
//! these exercise the same call sequences a host actually makes, end to
//! end, the way the teacher's own `tests/` integration suite drives a
//! whole `JsRuntime` rather than one function at a time.

use std::rc::Rc;

use jsvm_core::env::{Env, ModuleApiVersion};
use jsvm_core::error::JsvmStatus;
use jsvm_core::reference::{self, Ownership, TypeTag};
use jsvm_core::vm::{CreateVMOptions, InitOptions, VM};

fn fresh_env() -> (Rc<VM>, Rc<Env>) {
  jsvm_core::vm::init(InitOptions::default());
  let vm = Rc::new(VM::new(CreateVMOptions::default()).unwrap());
  let env = Env::new(vm.clone(), ModuleApiVersion::V1).unwrap();
  (vm, env)
}

#[test]
fn s1_hello_world() {
  let (vm, env) = fresh_env();
  let result = vm
    .with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      env
        .with_context_scope(&mut scope, |scope| {
          let value = jsvm_core::compile::run_source(&env, scope, "1 + 2", "s1.js").unwrap();
          value.int32_value(scope).unwrap()
        })
        .unwrap()
    })
    .unwrap();
  assert_eq!(result, 3);
  env.destroy();
}

#[test]
fn s2_exception_propagation() {
  let (vm, env) = fresh_env();
  let message = vm
    .with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      env
        .with_context_scope(&mut scope, |scope| {
          let result = jsvm_core::compile::run_source(&env, scope, "throw new Error('x')", "s2.js");
          assert_eq!(result, Err(JsvmStatus::PendingException));
          let exception = env.take_last_exception(scope).expect("an exception was recorded");
          let obj = v8::Local::<v8::Object>::try_from(exception).unwrap();
          let key = v8::String::new(scope, "message").unwrap();
          obj.get(scope, key.into()).unwrap().to_rust_string_lossy(scope)
        })
        .unwrap()
    })
    .unwrap();
  assert_eq!(message, "x");
  env.destroy();
}

#[test]
fn s3_wrap_lifecycle_finalizes_exactly_once() {
  let (vm, env) = fresh_env();
  let finalized = Rc::new(std::cell::Cell::new(0u32));
  let finalized_in_callback = finalized.clone();
  let native_ptr = 0xDEADBEEFusize as *mut std::ffi::c_void;

  vm.with_locked(|isolate| {
    let mut scope = v8::HandleScope::new(isolate);
    env
      .with_context_scope(&mut scope, |scope| {
        let object = v8::Object::new(scope);
        let finalizer: jsvm_core::reference::FinalizerFn =
          Box::new(move |_| finalized_in_callback.set(finalized_in_callback.get() + 1));
        let reference = reference::wrap(
          scope,
          &env.vm().data().wrapper_key,
          object,
          native_ptr,
          Some(finalizer),
          Ownership::Runtime,
        )
        .unwrap();

        let unwrapped = reference::unwrap(scope, &env.vm().data().wrapper_key, object).unwrap();
        assert_eq!(unwrapped, native_ptr);
        env.track_reference(reference);
      })
      .unwrap();
  })
  .unwrap();

  // Force a real GC pass so the object's weak callback actually fires
  // before draining the deferred-finalizer queue it feeds.
  vm.request_gc_for_testing();
  env.drain_pending_finalizers();
  assert_eq!(finalized.get(), 1);

  env.destroy();
  assert_eq!(finalized.get(), 1, "destroy must not re-run a finalizer that already ran");
}

#[test]
fn s4_reference_strengthening() {
  let (vm, env) = fresh_env();
  vm.with_locked(|isolate| {
    let mut scope = v8::HandleScope::new(isolate);
    env
      .with_context_scope(&mut scope, |scope| {
        let value: v8::Local<v8::Value> = v8::Object::new(scope).into();
        let weak = reference::create_reference(scope, value, 0);
        assert_eq!(weak.refcount(), 0);

        let value2: v8::Local<v8::Value> = v8::Object::new(scope).into();
        let strong = reference::create_reference(scope, value2, 1);
        assert_eq!(strong.refcount(), 1);
        strong.remove_ref(scope);
        assert_eq!(strong.refcount(), 0);
      })
      .unwrap();
  })
  .unwrap();
  env.destroy();
}

#[test]
fn s5_code_cache_round_trips_into_a_fresh_env() {
  let (vm, env) = fresh_env();
  let cache = vm
    .with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      env
        .with_context_scope(&mut scope, |scope| {
          let compiled = jsvm_core::compile::compile_script(&env, scope, "(()=>42)()", "s5.js", None).unwrap();
          jsvm_core::compile::create_code_cache(scope, &compiled)
        })
        .unwrap()
    })
    .unwrap();
  assert!(!cache.is_empty());
  env.destroy();

  let (vm2, env2) = fresh_env();
  let value = vm2
    .with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      env2
        .with_context_scope(&mut scope, |scope| {
          let compiled =
            jsvm_core::compile::compile_script(&env2, scope, "(()=>42)()", "s5.js", Some(&cache)).unwrap();
          let result = jsvm_core::compile::run_script(&env2, scope, &compiled).unwrap();
          result.int32_value(scope).unwrap()
        })
        .unwrap()
    })
    .unwrap();
  assert_eq!(value, 42);
  env2.destroy();
}

#[test]
fn s6_type_tag_mismatch() {
  let (vm, env) = fresh_env();
  vm.with_locked(|isolate| {
    let mut scope = v8::HandleScope::new(isolate);
    env
      .with_context_scope(&mut scope, |scope| {
        let object = v8::Object::new(scope);
        reference::type_tag(scope, &env.vm().data().type_tag_key, object, TypeTag::new(1, 2)).unwrap();

        assert!(!reference::check_object_type_tag(
          scope,
          &env.vm().data().type_tag_key,
          object,
          TypeTag::new(1, 3)
        ));
        assert!(reference::check_object_type_tag(
          scope,
          &env.vm().data().type_tag_key,
          object,
          TypeTag::new(1, 2)
        ));
      })
      .unwrap();
  })
  .unwrap();
  env.destroy();
}
