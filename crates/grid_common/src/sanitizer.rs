//! Credential screening for upload payloads
//!
//! Synced change payloads must never carry credential material. The screen
//! rejects payloads whose field names mark them as secrets, and string
//! values shaped like API keys or bearer tokens.

use regex::Regex;
use std::sync::OnceLock;

static SECRET_FIELDS: OnceLock<Regex> = OnceLock::new();
static SECRET_VALUES: OnceLock<Vec<Regex>> = OnceLock::new();

fn secret_fields() -> &'static Regex {
    SECRET_FIELDS.get_or_init(|| {
        Regex::new(r"(?i)^(password|passwd|secret|api_key|apikey|ssh_key|private_key|access_token|auth_token)$")
            .unwrap()
    })
}

fn secret_values() -> &'static Vec<Regex> {
    SECRET_VALUES.get_or_init(|| {
        vec![
            Regex::new(r"^(sk|pk)-[a-zA-Z0-9]{20,}$").unwrap(),
            Regex::new(r"^Bearer\s+\S{16,}$").unwrap(),
            Regex::new(r"^AKIA[0-9A-Z]{16}$").unwrap(),
            Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").unwrap(),
        ]
    })
}

/// Screens upload payloads for credential material
#[derive(Default)]
pub struct UploadSanitizer;

impl UploadSanitizer {
    pub fn new() -> Self {
        Self
    }

    /// Check one value tree. Returns the offending field path on rejection.
    pub fn screen(&self, value: &serde_json::Value) -> std::result::Result<(), String> {
        self.walk(value, "")
    }

    fn walk(
        &self,
        value: &serde_json::Value,
        path: &str,
    ) -> std::result::Result<(), String> {
        match value {
            serde_json::Value::Object(map) => {
                for (key, child) in map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };

                    if secret_fields().is_match(key) && !is_empty(child) {
                        return Err(child_path);
                    }
                    self.walk(child, &child_path)?;
                }
                Ok(())
            }
            serde_json::Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    self.walk(child, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            serde_json::Value::String(s) => {
                if secret_values().iter().any(|p| p.is_match(s)) {
                    return Err(path.to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn is_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_password_field_rejected() {
        let sanitizer = UploadSanitizer::new();
        let payload = json!({"host": "db.internal", "password": "hunter2"});
        assert_eq!(sanitizer.screen(&payload), Err("password".to_string()));
    }

    #[test]
    fn test_empty_password_field_allowed() {
        let sanitizer = UploadSanitizer::new();
        let payload = json!({"host": "db.internal", "password": ""});
        assert!(sanitizer.screen(&payload).is_ok());
    }

    #[test]
    fn test_nested_ssh_key_rejected() {
        let sanitizer = UploadSanitizer::new();
        let payload = json!({"tunnel": {"ssh_key": "AAAAB3NzaC1yc2E"}});
        assert_eq!(sanitizer.screen(&payload), Err("tunnel.ssh_key".to_string()));
    }

    #[test]
    fn test_api_key_shaped_value_rejected() {
        let sanitizer = UploadSanitizer::new();
        let payload = json!({"note": "sk-12345678901234567890abcdef"});
        assert!(sanitizer.screen(&payload).is_err());
    }

    #[test]
    fn test_ordinary_payload_allowed() {
        let sanitizer = UploadSanitizer::new();
        let payload = json!({"title": "Q3 report", "count": 12, "tags": ["a", "b"]});
        assert!(sanitizer.screen(&payload).is_ok());
    }
}
