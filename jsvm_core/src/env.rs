//! VM lifecycle (component C2, part 2: the environment).
//!
//! Grounded in the teacher's `JsRuntime`/`JsRuntimeState`, which bundles a
//! `v8::Global<v8::Context>` together with the module map, pending-ops
//! queue, and exception state behind a single struct threaded through
//! every callback. `Env` plays the same role here, scoped to one V8
//! context instead of one whole runtime.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{JsvmStatus, LastError};
use crate::reference::Reference;
use crate::scope::ScopeStack;
use crate::vm::VM;

/// Which ABI surface a module was compiled against (SPEC_FULL §3,
/// supplementing the distilled spec with the original's
/// `napi_module_register`-style version gate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleApiVersion {
  /// Unstable surface; every status code and struct layout may change.
  #[default]
  Experimental,
  /// The frozen v1 surface.
  V1,
}

/// One JS execution context and everything scoped to it (spec §3 "Env").
/// Lives for as long as the host keeps it open; `DestroyEnv` runs the
/// teardown order spec §4.4 requires (finalizing list first, then the
/// live list, then the context itself).
pub struct Env {
  vm: Rc<VM>,
  context: RefCell<Option<v8::Global<v8::Context>>>,
  pub(crate) scope_stack: Rc<ScopeStack>,
  /// References with no finalizer attached (spec §4.4 "reflist") —
  /// `CreateReference`-style refs kept around purely for their refcount.
  reflist: RefCell<Vec<Rc<Reference>>>,
  /// References carrying a finalizer, routed here at `track_reference`
  /// time regardless of refcount (spec §4.4 "finalizing_reflist"); drained
  /// before `reflist` on teardown and on `drain_pending_finalizers`, so a
  /// finalizer that releases other refs runs before those refs are torn
  /// down.
  finalizing_reflist: RefCell<Vec<Rc<Reference>>>,
  pub(crate) last_error: RefCell<LastError>,
  last_exception: RefCell<Option<v8::Global<v8::Value>>>,
  in_gc_finalizer: Cell<bool>,
  closing: Cell<bool>,
  pub(crate) module_api_version: ModuleApiVersion,
  #[cfg(feature = "inspector")]
  pub(crate) inspector: RefCell<Option<crate::inspector::InspectorAgent>>,
}

impl Env {
  /// `CreateEnv` (spec §4.2). Builds a fresh `v8::Context` in `vm`.
  pub fn new(vm: Rc<VM>, module_api_version: ModuleApiVersion) -> Result<Rc<Env>, JsvmStatus> {
    let context_global = vm
      .with_locked(|isolate| {
        let mut scope = v8::HandleScope::new(isolate);
        let context = v8::Context::new(&mut scope, Default::default());
        v8::Global::new(&mut scope, context)
      })
      .map_err(|_| JsvmStatus::GenericFailure)?;

    Ok(Rc::new(Env {
      vm,
      context: RefCell::new(Some(context_global)),
      scope_stack: ScopeStack::new(),
      reflist: RefCell::new(Vec::new()),
      finalizing_reflist: RefCell::new(Vec::new()),
      last_error: RefCell::new(LastError::default()),
      last_exception: RefCell::new(None),
      in_gc_finalizer: Cell::new(false),
      closing: Cell::new(false),
      module_api_version,
      #[cfg(feature = "inspector")]
      inspector: RefCell::new(None),
    }))
  }

  /// `CreateEnvFromSnapshot(vm, index)`: same as [`Env::new`] but `vm`'s
  /// isolate was itself restored from a snapshot blob, so this reconstructs
  /// the context that was recorded at `index` by
  /// [`crate::snapshot::create_snapshot`] (spec §4.6: "reconstructs a
  /// Context previously added at position `index` in a snapshot") instead
  /// of building a brand-new empty one.
  pub fn from_snapshot(
    vm: Rc<VM>,
    module_api_version: ModuleApiVersion,
    index: usize,
  ) -> Result<Rc<Env>, JsvmStatus> {
    let context_global = vm
      .with_locked(|isolate| {
        let mut scope = v8::HandleScope::new(isolate);
        v8::Context::from_snapshot(&mut scope, index, Default::default())
          .map(|context| v8::Global::new(&mut scope, context))
      })
      .map_err(|_| JsvmStatus::GenericFailure)?
      .ok_or(JsvmStatus::InvalidArg)?;

    Ok(Rc::new(Env {
      vm,
      context: RefCell::new(Some(context_global)),
      scope_stack: ScopeStack::new(),
      reflist: RefCell::new(Vec::new()),
      finalizing_reflist: RefCell::new(Vec::new()),
      last_error: RefCell::new(LastError::default()),
      last_exception: RefCell::new(None),
      in_gc_finalizer: Cell::new(false),
      closing: Cell::new(false),
      module_api_version,
      #[cfg(feature = "inspector")]
      inspector: RefCell::new(None),
    }))
  }

  pub fn vm(&self) -> &Rc<VM> {
    &self.vm
  }

  pub fn is_closing(&self) -> bool {
    self.closing.get()
  }

  pub fn module_api_version(&self) -> ModuleApiVersion {
    self.module_api_version
  }

  /// `OpenEnvScope`: returns a [`crate::scope::HandleScopeGuard`]-compatible
  /// context scope bound to this env's context. Callers combine this with a
  /// `HandleScopeGuard` the same way the engine itself nests
  /// `HandleScope`/`ContextScope`.
  pub fn with_context_scope<R>(
    &self,
    scope: &mut v8::HandleScope,
    f: impl FnOnce(&mut v8::ContextScope<v8::HandleScope>) -> R,
  ) -> Result<R, JsvmStatus> {
    let context_ref = self.context.borrow();
    let context_global = context_ref.as_ref().ok_or(JsvmStatus::Closing)?;
    let context = v8::Local::new(scope, context_global);
    let mut context_scope = v8::ContextScope::new(scope, context);
    Ok(f(&mut context_scope))
  }

  pub(crate) fn set_last_exception(&self, exception: Option<v8::Global<v8::Value>>) {
    *self.last_exception.borrow_mut() = exception;
  }

  /// Records `status` in the per-env last-error slot (spec §4.1: "any
  /// non-OK return sets it before returning"; `OK` clears it instead). The
  /// sole writer is [`crate::call::call_into_module`]'s postamble, so every
  /// preamble-wrapped API call keeps this in sync without each call site
  /// remembering to do it itself.
  pub(crate) fn set_last_error(&self, status: JsvmStatus) {
    self.last_error.borrow_mut().set(status);
  }

  /// `GetLastErrorInfo` (spec §4.1): a snapshot of the last-error slot,
  /// readable at any time, including while a JS exception is pending.
  pub fn last_error_info(&self) -> LastError {
    self.last_error.borrow().clone()
  }

  pub fn has_pending_exception(&self) -> bool {
    self.last_exception.borrow().is_some()
  }

  /// `GetAndClearLastException` (spec §4.5).
  pub fn take_last_exception<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> Option<v8::Local<'s, v8::Value>> {
    self
      .last_exception
      .borrow_mut()
      .take()
      .map(|global| v8::Local::new(scope, &global))
  }

  /// Registers `reference` with the env (spec §4.4 "reflist"/
  /// "finalizing_reflist"). Called after a successful
  /// `Wrap`/`AddFinalizer`/`CreateReference` so the env's teardown and
  /// GC-finalizer drain both know about it. References that carry a
  /// finalizer go straight into `finalizing_reflist`, not `reflist` — that
  /// is what makes `destroy`'s "finalizing list first" teardown ordering
  /// (spec §4.4) meaningful instead of vacuous, since a finalizer's own
  /// callback may itself release other references still sitting in
  /// `reflist`.
  pub fn track_reference(&self, reference: Rc<Reference>) {
    if reference.has_finalizer() {
      self.finalizing_reflist.borrow_mut().push(reference);
    } else {
      self.reflist.borrow_mut().push(reference);
    }
  }

  /// Runs the deferred weak callbacks the engine queued since the last
  /// call, then runs every finalizer whose reference is now due (spec
  /// §4.4 invariant: "no finalizer runs while the engine is inside a
  /// weak-callback pass"; this is the safe point after that pass).
  /// `finalizing_reflist` is drained before `reflist`, matching `destroy`'s
  /// ordering guarantee.
  pub fn drain_pending_finalizers(&self) {
    crate::reference::drain_weak_callbacks();

    self.in_gc_finalizer.set(true);

    let due_finalizing: Vec<Rc<Reference>> = {
      let mut list = self.finalizing_reflist.borrow_mut();
      let (due, still_pending): (Vec<_>, Vec<_>) =
        list.drain(..).partition(|r| r.is_finalizable());
      *list = still_pending;
      due
    };
    let due_plain: Vec<Rc<Reference>> = {
      let mut list = self.reflist.borrow_mut();
      let (due, still_live): (Vec<_>, Vec<_>) =
        list.drain(..).partition(|r| r.is_finalizable());
      *list = still_live;
      due
    };

    for reference in &due_finalizing {
      reference.run_finalizer();
    }
    for reference in &due_plain {
      reference.run_finalizer();
    }

    self.in_gc_finalizer.set(false);
  }

  pub fn in_gc_finalizer(&self) -> bool {
    self.in_gc_finalizer.get()
  }

  /// `OpenInspector` (spec §4.6.5). A no-op if an agent is already attached
  /// — spec does not describe re-opening a second agent on the same env.
  #[cfg(feature = "inspector")]
  pub fn open_inspector(self: &Rc<Self>) -> Result<(), JsvmStatus> {
    if self.is_closing() {
      return Err(JsvmStatus::Closing);
    }
    let mut slot = self.inspector.borrow_mut();
    if slot.is_some() {
      return Ok(());
    }
    *slot = Some(crate::inspector::InspectorAgent::open(self)?);
    Ok(())
  }

  /// `CloseInspector`: stops the I/O thread and drops the agent. Also run
  /// automatically by `destroy` (spec §4.2 "DestroyEnv ... tears down
  /// inspector if present").
  #[cfg(feature = "inspector")]
  pub fn close_inspector(&self) {
    self.inspector.borrow_mut().take();
  }

  /// The `ws://host:port/<uuid>` address a front-end connects to, or `None`
  /// if no inspector is attached (spec §4.6.5 "Frontend address").
  #[cfg(feature = "inspector")]
  pub fn inspector_address(&self) -> Option<String> {
    self
      .inspector
      .borrow()
      .as_ref()
      .map(|agent| format!("ws://{}/{}", agent.local_addr(), agent.session_id()))
  }

  /// `DestroyEnv` (spec §4.2). Drains `finalizing_reflist` first, then
  /// whatever remains of `reflist`, then drops the context itself. Marks
  /// `closing` up front so any reentrant API call during teardown gets
  /// `CLOSING` instead of touching freed state.
  pub fn destroy(&self) {
    self.closing.set(true);

    for reference in self.finalizing_reflist.borrow_mut().drain(..) {
      reference.run_finalizer();
    }
    for reference in self.reflist.borrow_mut().drain(..) {
      reference.run_finalizer();
    }

    #[cfg(feature = "inspector")]
    {
      self.inspector.borrow_mut().take();
    }

    self.context.borrow_mut().take();
  }
}

impl Drop for Env {
  fn drop(&mut self) {
    if !self.closing.get() {
      self.destroy();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::vm::{CreateVMOptions, InitOptions};

  fn test_env() -> Rc<Env> {
    crate::vm::init(InitOptions::default());
    let vm = Rc::new(VM::new(CreateVMOptions::default()).unwrap());
    Env::new(vm, ModuleApiVersion::Experimental).unwrap()
  }

  #[test]
  fn destroy_marks_closing_and_is_idempotent() {
    let env = test_env();
    assert!(!env.is_closing());
    env.destroy();
    assert!(env.is_closing());
    // A second destroy (e.g. via Drop after an explicit DestroyEnv) must
    // not double-run finalizers or panic.
    env.destroy();
  }

  #[test]
  fn fresh_env_has_no_pending_exception() {
    let env = test_env();
    assert!(!env.has_pending_exception());
  }

  #[test]
  #[cfg(feature = "inspector")]
  fn inspector_opens_and_reports_an_address() {
    let env = test_env();
    assert!(env.inspector_address().is_none());
    env.open_inspector().expect("inspector should open");
    let address = env.inspector_address().expect("address after open");
    assert!(address.starts_with("ws://"));
    env.close_inspector();
    assert!(env.inspector_address().is_none());
  }

  #[test]
  #[cfg(feature = "inspector")]
  fn destroy_closes_a_still_open_inspector() {
    let env = test_env();
    env.open_inspector().expect("inspector should open");
    env.destroy();
    assert!(env.inspector_address().is_none());
  }
}
