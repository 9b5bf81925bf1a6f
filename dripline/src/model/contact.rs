//! Contact records, the read-only source of merge variables.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Merge variables handed to the content transformer.
pub type Variables = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    /// Arbitrary per-contact fields, key set not known ahead of time
    #[serde(default)]
    pub custom_fields: BTreeMap<String, Value>,
}

impl Contact {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            name: None,
            company: None,
            custom_fields: BTreeMap::new(),
        }
    }

    /// Build the variable map for `{{placeholders}}`.
    ///
    /// `name` falls back to the email address. `nombre` and `empresa` alias
    /// `name` and `company` for Spanish templates. Custom fields are applied
    /// last and may shadow the built-in keys.
    pub fn merge_variables(&self) -> Variables {
        let mut vars = Variables::new();
        let name = self
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.email);
        let company = self.company.clone().unwrap_or_default();
        vars.insert("name".to_string(), name.to_string());
        vars.insert("nombre".to_string(), name.to_string());
        vars.insert("email".to_string(), self.email.clone());
        vars.insert("empresa".to_string(), company.clone());
        vars.insert("company".to_string(), company);

        for (key, value) in &self.custom_fields {
            let rendered = match value {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            vars.insert(key.clone(), rendered);
        }

        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_variables_defaults() {
        let contact = Contact::new("ada@example.com");
        let vars = contact.merge_variables();
        assert_eq!(vars["name"], "ada@example.com");
        assert_eq!(vars["email"], "ada@example.com");
        assert_eq!(vars["company"], "");
    }

    #[test]
    fn test_spanish_aliases() {
        let mut contact = Contact::new("ada@example.com");
        contact.name = Some("Ada".to_string());
        contact.company = Some("Analytical Engines".to_string());

        let vars = contact.merge_variables();
        assert_eq!(vars["nombre"], "Ada");
        assert_eq!(vars["empresa"], "Analytical Engines");

        let anonymous = Contact::new("grace@example.com").merge_variables();
        assert_eq!(anonymous["nombre"], "grace@example.com");
        assert_eq!(anonymous["empresa"], "");
    }

    #[test]
    fn test_merge_variables_custom_fields() {
        let mut contact = Contact::new("ada@example.com");
        contact.name = Some("Ada".to_string());
        contact.custom_fields.insert("plan".to_string(), json!("pro"));
        contact.custom_fields.insert("seats".to_string(), json!(12));
        contact.custom_fields.insert("note".to_string(), Value::Null);

        let vars = contact.merge_variables();
        assert_eq!(vars["name"], "Ada");
        assert_eq!(vars["plan"], "pro");
        assert_eq!(vars["seats"], "12");
        assert_eq!(vars["note"], "");
    }
}
