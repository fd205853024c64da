//! A stable C-ABI runtime façade over an embeddable JavaScript engine.
//!
//! `jsvm_core` wraps a V8 isolate and context behind the opaque
//! handle/status-code discipline exported in [`ffi`], so an embedder
//! links against a fixed surface rather than the engine's own C++ API.
//! See each module for the spec component it implements:
//!
//! - [`error`] — status codes and the per-env last-error slot (C1)
//! - [`vm`], [`env`] — VM/Env lifecycle (C2)
//! - [`scope`] — handle & scope stack (C3)
//! - [`reference`] — wrap/unwrap, type tags, and the finalizer graph (C4)
//! - [`call`] — exception discipline and the function trampoline (C5)
//! - [`compile`], [`sourcemap`], [`snapshot`], [`wasm`] — compile/run/cache,
//!   stack traces, snapshots, and WASM (C6)
//! - [`inspector`] — the debugger transport (C6), gated behind the
//!   `inspector` feature
//! - [`ffi`] — the exported `OH_JSVM_*` functions themselves

pub mod call;
pub mod compile;
pub mod env;
pub mod error;
pub mod ffi;
#[cfg(feature = "inspector")]
pub mod inspector;
pub mod reference;
pub mod scope;
pub mod snapshot;
pub mod sourcemap;
pub mod vm;
pub mod wasm;

/// Re-exports the types most host code needs without chasing individual
/// module paths, the same convenience the teacher's own `prelude` module
/// provides for its op/state types.
pub mod prelude {
  pub use crate::call::{call_into_module, throw_error, throw_range_error, throw_type_error};
  pub use crate::compile::{compile_script, run_script, run_source, CompiledScript};
  pub use crate::env::{Env, ModuleApiVersion};
  pub use crate::error::{JsvmStatus, LastError};
  pub use crate::reference::{Ownership, Reference, TypeTag};
  pub use crate::vm::{CreateVMOptions, InitOptions, VM};
}
