//! Call & exception discipline (component C5).
//!
//! Grounded in the teacher's `call_function`/`execute_script` pair, which
//! wrap every entry into V8 in a `v8::TryCatch` and translate a caught
//! exception into an `anyhow::Error` carrying the formatted JS message.
//! JSVM does the same translation, but into a [`JsvmStatus`] plus an env
//! exception slot rather than a host-language error, since callbacks here
//! cross a C ABI instead of staying inside one Rust process.

use std::rc::Rc;

use crate::env::{Env, ModuleApiVersion};
use crate::error::JsvmStatus;
use crate::scope::CallbackScopeGuard;

/// Runs `f` with a `TryCatch` around it, translating any pending JS
/// exception into `env`'s last-exception slot and returning
/// `PENDING_EXCEPTION` (spec §4.5 "Preamble"/"Postamble").
///
/// This is the single chokepoint every `ffi` entry point that can run JS
/// goes through; it also pushes a [`CallbackScopeGuard`] so a buggy host
/// callback that leaks or double-closes a handle scope is caught instead
/// of corrupting the scope stack for the rest of the program.
///
/// Implements all four preamble steps from spec §4.5 in order: (1) reject
/// if a previous exception is still pending, (2) reject if the isolate
/// cannot run JS right now (`CANNOT_RUN_JS` under the `EXPERIMENTAL`
/// module-api, `PENDING_EXCEPTION` otherwise, for backward compatibility),
/// (3) clear `env`'s last-error slot, (4) install the `TryCatch` sentinel.
/// Every exit path runs the postamble's other half — spec §8 invariant #5,
/// "after any API call that returns non-OK, `GetLastErrorInfo` reports the
/// same code" — by recording its own status in `env`'s last-error slot
/// before returning.
pub fn call_into_module<'s, R>(
  env: &Rc<Env>,
  scope: &mut v8::HandleScope<'s>,
  f: impl FnOnce(&mut v8::TryCatch<v8::HandleScope<'s>>) -> Option<R>,
) -> Result<R, JsvmStatus> {
  let fail = |status: JsvmStatus| -> Result<R, JsvmStatus> {
    env.set_last_error(status);
    Err(status)
  };

  if env.is_closing() {
    return fail(JsvmStatus::Closing);
  }
  if env.has_pending_exception() {
    return fail(JsvmStatus::PendingException);
  }
  if env.vm().is_terminating() {
    let status = match env.module_api_version() {
      ModuleApiVersion::Experimental => JsvmStatus::CannotRunJs,
      ModuleApiVersion::V1 => JsvmStatus::PendingException,
    };
    return fail(status);
  }
  env.set_last_error(JsvmStatus::Ok);

  let _callback_scope = CallbackScopeGuard::new(env.scope_stack.clone());
  let mut try_catch = v8::TryCatch::new(scope);

  match f(&mut try_catch) {
    Some(value) => {
      env.set_last_error(JsvmStatus::Ok);
      Ok(value)
    }
    None => {
      if try_catch.has_caught() {
        let exception = try_catch.exception().map(|exc| v8::Global::new(&mut try_catch, exc));
        env.set_last_exception(exception);
        fail(JsvmStatus::PendingException)
      } else {
        // `f` returned `None` without an exception: the callback itself
        // signalled a non-exception failure (e.g. a type check). Treat it
        // as a generic failure rather than fabricating an exception.
        fail(JsvmStatus::GenericFailure)
      }
    }
  }
}

/// `Throw`: sets `value` as the pending exception by constructing and
/// throwing it in the current scope (spec §4.5).
pub fn throw(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) {
  scope.throw_exception(value);
}

/// `ThrowError`/`ThrowTypeError`/`ThrowRangeError`: convenience wrappers
/// that build the matching `Error` subclass from a message string before
/// throwing it, mirroring the engine's own `Exception::error` family.
pub fn throw_error(scope: &mut v8::HandleScope, message: &str) {
  let message = v8::String::new(scope, message).unwrap();
  let error = v8::Exception::error(scope, message);
  throw(scope, error);
}

pub fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
  let message = v8::String::new(scope, message).unwrap();
  let error = v8::Exception::type_error(scope, message);
  throw(scope, error);
}

pub fn throw_range_error(scope: &mut v8::HandleScope, message: &str) {
  let message = v8::String::new(scope, message).unwrap();
  let error = v8::Exception::range_error(scope, message);
  throw(scope, error);
}

/// Bundle passed to a V8 function callback as a `v8::External`. Carries
/// everything the trampoline (below) needs to invoke the host closure and
/// thread back into [`Env`] for exception/scope bookkeeping, matching the
/// teacher's `GlobalOpFn`/`OpCtx` pointer-plus-context convention for
/// op registrations.
pub struct CallbackBundle {
  pub env: Rc<Env>,
  pub callback: Box<dyn Fn(&mut v8::HandleScope, v8::FunctionCallbackArguments, &mut v8::ReturnValue)>,
}

/// The trampoline installed as every `v8::Function`'s native callback
/// (spec §4.5 "function trampoline"). Recovers the [`CallbackBundle`] from
/// the function's embedder data, runs it inside [`call_into_module`], and
/// lets any exception the host callback threw propagate to the caller as
/// a pending JS exception — the trampoline itself never needs to know
/// what the callback did.
pub extern "C" fn function_trampoline(info: *const v8::FunctionCallbackInfo) {
  // Safety: `info` is only ever supplied by V8 itself when invoking a
  // function created via `function_template_with_bundle`.
  let mut scope = unsafe { v8::CallbackScope::new(&*info) };
  let args = unsafe { v8::FunctionCallbackArguments::from_function_callback_info(&*info) };
  let mut rv = unsafe { v8::ReturnValue::from_function_callback_info(&*info) };

  let external = match v8::Local::<v8::External>::try_from(args.data()) {
    Ok(external) => external,
    Err(_) => return,
  };
  // Safety: the only `External` ever installed as callback data here is
  // produced by `function_template_with_bundle`, which leaks a
  // `Box<CallbackBundle>` into exactly this pointer.
  let bundle = unsafe { &*(external.value() as *const CallbackBundle) };

  let env = bundle.env.clone();
  let _ = call_into_module(&env, &mut scope, |try_catch| {
    (bundle.callback)(try_catch, args, &mut rv);
    Some(())
  });
}

/// Builds a `v8::FunctionTemplate` whose native callback is
/// [`function_trampoline`] and whose callback data is a boxed
/// [`CallbackBundle`]. The bundle is intentionally leaked for the
/// isolate's lifetime (spec does not ask for per-function teardown;
/// functions are expected to live as long as the template that created
/// them, same as the engine's own `FunctionTemplate` instances).
pub fn function_template_with_bundle<'s>(
  scope: &mut v8::HandleScope<'s>,
  bundle: CallbackBundle,
) -> v8::Local<'s, v8::FunctionTemplate> {
  let boxed = Box::into_raw(Box::new(bundle));
  let external = v8::External::new(scope, boxed as *mut std::ffi::c_void);
  v8::FunctionTemplate::builder_raw(function_trampoline)
    .data(external.into())
    .build(scope)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::env::ModuleApiVersion;
  use crate::vm::{CreateVMOptions, InitOptions, VM};

  #[test]
  fn call_into_module_rejects_when_closing() {
    crate::vm::init(InitOptions::default());
    let vm = Rc::new(VM::new(CreateVMOptions::default()).unwrap());
    let env = Env::new(vm.clone(), ModuleApiVersion::Experimental).unwrap();
    env.destroy();

    let result = vm.with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      call_into_module(&env, &mut scope, |_| Some(()))
    });
    assert_eq!(result.unwrap(), Err(JsvmStatus::Closing));
  }

  #[test]
  fn call_into_module_rejects_while_an_exception_is_pending() {
    crate::vm::init(InitOptions::default());
    let vm = Rc::new(VM::new(CreateVMOptions::default()).unwrap());
    let env = Env::new(vm.clone(), ModuleApiVersion::Experimental).unwrap();

    vm.with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      let value = v8::undefined(&mut scope).into();
      env.set_last_exception(Some(v8::Global::new(&mut scope, value)));

      // Spec §4.5 preamble step 1: a pending exception blocks the call
      // outright, before `f` ever runs.
      let mut ran = false;
      let result = call_into_module(&env, &mut scope, |_| {
        ran = true;
        Some(())
      });
      assert_eq!(result, Err(JsvmStatus::PendingException));
      assert!(!ran, "f must not run while an exception is pending");
    })
    .unwrap();
  }

  #[test]
  fn terminating_vm_yields_cannot_run_js_under_experimental_api() {
    crate::vm::init(InitOptions::default());
    let vm = Rc::new(VM::new(CreateVMOptions::default()).unwrap());
    let env = Env::new(vm.clone(), ModuleApiVersion::Experimental).unwrap();
    vm.terminate_execution();

    let result = vm.with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      call_into_module(&env, &mut scope, |_| Some(()))
    });
    assert_eq!(result.unwrap(), Err(JsvmStatus::CannotRunJs));
  }

  #[test]
  fn terminating_vm_yields_pending_exception_under_v1_api() {
    crate::vm::init(InitOptions::default());
    let vm = Rc::new(VM::new(CreateVMOptions::default()).unwrap());
    let env = Env::new(vm.clone(), ModuleApiVersion::V1).unwrap();
    vm.terminate_execution();

    let result = vm.with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      call_into_module(&env, &mut scope, |_| Some(()))
    });
    assert_eq!(result.unwrap(), Err(JsvmStatus::PendingException));
  }

  #[test]
  fn last_error_matches_the_returned_status() {
    crate::vm::init(InitOptions::default());
    let vm = Rc::new(VM::new(CreateVMOptions::default()).unwrap());
    let env = Env::new(vm.clone(), ModuleApiVersion::Experimental).unwrap();

    vm.with_locked(|isolate| {
      let mut scope = v8::HandleScope::new(isolate);
      let result = call_into_module(&env, &mut scope, |_: &mut v8::TryCatch<v8::HandleScope>| -> Option<()> { None });
      assert_eq!(result, Err(JsvmStatus::GenericFailure));
    })
    .unwrap();

    assert_eq!(env.last_error_info().code(), JsvmStatus::GenericFailure);
    assert!(env.last_error_info().message().is_some());
  }
}
