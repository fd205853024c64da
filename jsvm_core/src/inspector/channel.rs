//! CDP message envelope and the small fixed set of domains JSVM answers
//! directly, versus what it hands off to the host.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw Chrome DevTools Protocol message — either a request from the
/// front-end (`id` set) or a notification/response JSVM sends back
/// (`id` echoed back on a response, absent on an event).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpMessage {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub method: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub params: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub result: Option<Value>,
}

impl CdpMessage {
  pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
    CdpMessage {
      id: Some(id),
      method: Some(method.into()),
      params: Some(params),
      result: None,
    }
  }

  pub fn response(id: u64, result: Value) -> Self {
    CdpMessage {
      id: Some(id),
      method: None,
      params: None,
      result: Some(result),
    }
  }

  pub fn event(method: impl Into<String>, params: Value) -> Self {
    CdpMessage {
      id: None,
      method: Some(method.into()),
      params: Some(params),
      result: None,
    }
  }

  pub fn to_json(&self) -> String {
    serde_json::to_string(self).unwrap_or_default()
  }

  pub fn from_json(text: &str) -> Option<Self> {
    serde_json::from_str(text).ok()
  }
}

/// Domains JSVM answers without involving the JS thread at all (spec
/// §4.7: "`Schema.getDomains`/`Runtime.enable` round-trip locally so a
/// front-end's initial handshake doesn't need a live env"). Everything
/// else — most notably `Runtime.evaluate` — is queued for the JS thread
/// via [`super::InspectorAgent::drain_incoming`].
pub fn handle_locally(message: &CdpMessage) -> Option<CdpMessage> {
  let id = message.id?;
  match message.method.as_deref()? {
    "Runtime.enable" | "Debugger.enable" | "Profiler.enable" => {
      Some(CdpMessage::response(id, serde_json::json!({})))
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_json() {
    let msg = CdpMessage::request(1, "Runtime.evaluate", serde_json::json!({"expression": "1+1"}));
    let json = msg.to_json();
    let parsed = CdpMessage::from_json(&json).unwrap();
    assert_eq!(parsed.id, Some(1));
    assert_eq!(parsed.method.as_deref(), Some("Runtime.evaluate"));
  }

  #[test]
  fn enable_methods_are_handled_locally() {
    let msg = CdpMessage::request(2, "Runtime.enable", serde_json::json!({}));
    assert!(handle_locally(&msg).is_some());

    let evaluate = CdpMessage::request(3, "Runtime.evaluate", serde_json::json!({}));
    assert!(handle_locally(&evaluate).is_none());
  }
}
