//! Enumerated URL values
//!
//! A [`StringUnion`] only ever exposes one of its allowed values. Anything
//! else found in the query string is overwritten with the default using
//! `replace`, so the correction never becomes a navigable history entry.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use vs_core::{HistoryAction, UrlParameter, UrlState};

pub struct StringUnion {
    parameter: UrlParameter<Value>,
    allowed: Vec<String>,
    default: String,
}

impl StringUnion {
    /// `default` falls back to the first allowed value when absent or not allowed
    pub fn new<S: AsRef<str>>(
        state: &UrlState,
        key: &str,
        allowed: &[S],
        default: Option<&str>,
    ) -> Self {
        let allowed: Vec<String> = allowed.iter().map(|value| value.as_ref().to_string()).collect();
        let first = allowed.first().cloned().unwrap_or_default();
        let default = match default {
            Some(value) if allowed.iter().any(|allowed| allowed == value) => value.to_string(),
            Some(value) => {
                warn!(key, "Default {:?} is not an allowed value, using {:?}", value, first);
                first
            }
            None => first,
        };

        Self {
            parameter: state
                .parameter(key, Value::String(default.clone()))
                .keep_default(),
            allowed,
            default,
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn default_value(&self) -> &str {
        &self.default
    }

    fn allows(&self, value: &str) -> bool {
        self.allowed.iter().any(|allowed| allowed == value)
    }

    /// Current value, healing the URL when it holds something else
    pub fn value(&self) -> String {
        let Some(raw) = self.parameter.raw() else {
            return self.default.clone();
        };
        if let Value::String(text) = &raw {
            if self.allows(text) {
                return text.clone();
            }
        }

        debug!(key = self.parameter.key(), "Healing invalid value {}", raw);
        self.parameter
            .set_with(Value::String(self.default.clone()), HistoryAction::Replace);
        self.default.clone()
    }

    /// Write `candidate` if it is one of the allowed values.
    ///
    /// Returns whether anything was written.
    pub fn set<V: Serialize + ?Sized>(&self, candidate: &V, action: HistoryAction) -> bool {
        match serde_json::to_value(candidate) {
            Ok(Value::String(text)) if self.allows(&text) => {
                self.parameter.set_with(Value::String(text), action);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use vs_core::{HistoryBackend, MemoryHistory};

    const VALUES: [&str; 3] = ["Alpha", "Beta", "Delta"];

    fn setup(search: &str) -> (Arc<MemoryHistory>, StringUnion) {
        let history = Arc::new(MemoryHistory::with_search(search));
        let state = UrlState::new(history.clone());
        (history, StringUnion::new(&state, "k", &VALUES, None))
    }

    #[test]
    fn test_defaults_to_first_value() {
        let (history, union) = setup("");
        assert_eq!(union.value(), "Alpha");
        assert_eq!(history.search(), "");
    }

    #[test]
    fn test_explicit_default() {
        let history = Arc::new(MemoryHistory::new());
        let state = UrlState::new(history);
        assert_eq!(StringUnion::new(&state, "k", &VALUES, Some("Beta")).value(), "Beta");
        assert_eq!(StringUnion::new(&state, "k", &VALUES, Some("Omega")).value(), "Alpha");
    }

    #[test]
    fn test_reads_allowed_value() {
        let (history, union) = setup("k=Delta");
        assert_eq!(union.value(), "Delta");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_invalid_value_heals_with_replace() {
        let (history, union) = setup("k=Bogus");
        assert_eq!(union.value(), "Alpha");
        assert_eq!(history.entries(), vec!["k=Alpha"]);
    }

    #[test]
    fn test_nested_value_heals() {
        let (history, union) = setup("other=1&k[a]=Beta");
        assert_eq!(union.value(), "Alpha");
        assert_eq!(history.entries(), vec!["other=1&k=Alpha"]);
    }

    #[test]
    fn test_set_allowed_value() {
        let (history, union) = setup("");
        assert!(union.set("Beta", HistoryAction::Push));
        assert_eq!(union.value(), "Beta");
        assert_eq!(history.entries(), vec!["", "k=Beta"]);
    }

    #[test]
    fn test_set_rejects_anything_else() {
        let (history, union) = setup("k=Beta");

        assert!(!union.set("Omega", HistoryAction::Push));
        assert!(!union.set("beta", HistoryAction::Push));
        assert!(!union.set(&3, HistoryAction::Push));
        assert!(!union.set(&json!({ "value": "Alpha" }), HistoryAction::Push));
        assert!(!union.set(&json!(["Alpha"]), HistoryAction::Push));
        assert!(!union.set(&Value::Null, HistoryAction::Push));
        assert!(!union.set(&None::<String>, HistoryAction::Push));

        assert_eq!(union.value(), "Beta");
        assert_eq!(history.entries(), vec!["k=Beta"]);
    }
}
