use serde::Serialize;

use crate::{Result, SaveOutcome};

/// The structured result handed back to the UI layer for a save.
///
/// Serialises as `{"success": true, "message": ...}` or
/// `{"success": false, "error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveStatus {
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:   Option<String>,
}

impl SaveStatus {
  pub fn ok(message: impl Into<String>) -> Self {
    Self {
      success: true,
      message: Some(message.into()),
      error:   None,
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self {
      success: false,
      message: None,
      error:   Some(error.into()),
    }
  }
}

impl From<Result<SaveOutcome>> for SaveStatus {
  fn from(result: Result<SaveOutcome>) -> Self {
    match result {
      Ok(SaveOutcome { evicted: None, .. }) => Self::ok("saved"),
      Ok(SaveOutcome {
        evicted: Some(n), ..
      }) => Self::ok(format!("saved after freeing space ({n} items cleaned up)")),
      Err(e) => Self::failed(e.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::Error;

  #[test]
  fn renders_ui_shapes() {
    let ok = SaveStatus::from(Ok(SaveOutcome {
      id:      "x".into(),
      evicted: None,
    }));
    assert_eq!(
      serde_json::to_value(&ok).unwrap(),
      json!({ "success": true, "message": "saved" })
    );

    let failed = SaveStatus::from(Err(Error::QuotaExceeded { evicted: 3 }));
    let value = serde_json::to_value(&failed).unwrap();
    assert_eq!(value["success"], false);
    assert!(value["error"].as_str().unwrap().contains("evicting 3"));
    assert!(value.get("message").is_none());
  }

  #[test]
  fn mentions_eviction_on_recovered_save() {
    let status = SaveStatus::from(Ok(SaveOutcome {
      id:      "x".into(),
      evicted: Some(4),
    }));
    assert!(status.success);
    assert!(status.message.unwrap().contains("4 items"));
  }
}
