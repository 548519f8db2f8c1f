//! URL parameter store
//!
//! [`UrlState`] wraps the history backend. [`UrlParameter`] reads one typed
//! value out of the query string and writes it back. Every write decodes the
//! latest query string inside a [`Transaction`], so writes to different keys
//! never clobber each other and siblings stay untouched.

use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::codec::{self, lenient, KeyPath, QueryObject};
use crate::location::{HistoryAction, HistoryBackend, LocationSubscriber};
use crate::settings::SyncSettings;
use crate::stable::{Snapshot, StableCell};

struct StateInner {
    history: Arc<dyn HistoryBackend>,
    settings: SyncSettings,
    /// Serializes read-modify-write cycles. Reentrant so subscribers notified
    /// during a commit may write back.
    write_guard: ReentrantMutex<()>,
}

/// Handle to the query string shared by every parameter of a page
#[derive(Clone)]
pub struct UrlState {
    inner: Arc<StateInner>,
}

impl UrlState {
    pub fn new(history: Arc<dyn HistoryBackend>) -> Self {
        Self::with_settings(history, SyncSettings::default())
    }

    pub fn with_settings(history: Arc<dyn HistoryBackend>, settings: SyncSettings) -> Self {
        Self {
            inner: Arc::new(StateInner {
                history,
                settings,
                write_guard: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Current raw query string
    pub fn search(&self) -> String {
        self.inner.history.search()
    }

    /// Current query string, decoded
    pub fn query(&self) -> QueryObject {
        codec::decode_with(&self.search(), self.inner.settings.codec_options())
    }

    /// Create a typed parameter for `key` falling back to `default`
    pub fn parameter<T>(&self, key: &str, default: T) -> UrlParameter<T>
    where
        T: Serialize + DeserializeOwned + PartialEq,
    {
        UrlParameter::new(self.clone(), key, default)
    }

    /// Stage writes against the latest query string and commit them as one
    /// history operation.
    ///
    /// Nothing is committed when no write was staged or the staged writes
    /// leave the decoded query unchanged.
    pub fn transaction<R>(&self, build: impl FnOnce(&mut Transaction) -> R) -> R {
        let _guard = self.inner.write_guard.lock();

        let original = self.query();
        let mut transaction = Transaction {
            query: original.clone(),
            action: None,
        };
        let result = build(&mut transaction);

        let Some(action) = transaction.action else {
            return result;
        };
        // Staged values are typed while decoded ones are text, so compare
        // what the new query string would decode to
        let search = codec::encode(&transaction.query);
        if codec::decode_with(&search, self.inner.settings.codec_options()) == original {
            trace!("Query unchanged, skipping history commit");
            return result;
        }

        debug!(?action, "Committing query string {:?}", search);
        self.inner.history.commit(&search, action);
        result
    }

    /// Register for notifications after every commit or navigation
    pub fn subscribe(&self, subscriber: Arc<dyn LocationSubscriber>) {
        self.inner.history.subscribe(subscriber);
    }
}

/// Writes staged against one decoded query string
pub struct Transaction {
    query: QueryObject,
    action: Option<HistoryAction>,
}

impl Transaction {
    /// The query as it will be committed
    pub fn query(&self) -> &QueryObject {
        &self.query
    }

    /// Stage `value` at `path`; `null` removes the key instead
    pub fn set(&mut self, path: &KeyPath, value: Value, action: HistoryAction) {
        if value.is_null() {
            self.remove(path, action);
            return;
        }
        path.set(&mut self.query, value);
        self.stage(action);
    }

    /// Stage removal of `path` and nothing else
    pub fn remove(&mut self, path: &KeyPath, action: HistoryAction) {
        path.remove(&mut self.query);
        self.stage(action);
    }

    fn stage(&mut self, action: HistoryAction) {
        self.action = Some(match self.action {
            Some(staged) => staged.merge(action),
            None => action,
        });
    }
}

/// One typed value stored in the query string
pub struct UrlParameter<T> {
    state: UrlState,
    key: String,
    path: KeyPath,
    default: Arc<T>,
    default_raw: Value,
    keep_default: bool,
    cell: StableCell<T>,
}

impl<T> UrlParameter<T>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    fn new(state: UrlState, key: &str, default: T) -> Self {
        let default_raw = serde_json::to_value(&default).unwrap_or_else(|err| {
            warn!(key, "Default value is not serializable: {}", err);
            Value::Null
        });

        let path = KeyPath::parse_with(key, state.settings().array_limit);
        Self {
            state,
            key: key.to_string(),
            path,
            default: Arc::new(default),
            default_raw,
            keep_default: false,
            cell: StableCell::new(),
        }
    }

    /// Write the default value explicitly instead of omitting the key
    pub fn keep_default(mut self) -> Self {
        self.keep_default = true;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    pub fn state(&self) -> &UrlState {
        &self.state
    }

    /// The undecoded value at this key, if present
    pub fn raw(&self) -> Option<Value> {
        self.path.get(&self.state.query()).cloned()
    }

    /// Current value with its identity token.
    ///
    /// The same `Arc` is returned until the decoded content changes.
    pub fn snapshot(&self) -> Snapshot<T> {
        let next = match self.raw() {
            None => Arc::clone(&self.default),
            Some(raw) => match lenient::from_value::<T>(&raw) {
                Ok(value) => Arc::new(value),
                Err(err) => {
                    debug!(key = %self.key, "Unreadable query value, using default: {}", err);
                    Arc::clone(&self.default)
                }
            },
        };
        self.cell.settle_arc(next)
    }

    /// Current value
    pub fn get(&self) -> Arc<T> {
        self.snapshot().value
    }

    /// Write `value` with the configured default history action
    pub fn set(&self, value: T) {
        self.set_with(value, self.state.settings().default_history_action);
    }

    pub fn set_with(&self, value: T, action: HistoryAction) {
        self.state
            .transaction(|transaction| self.stage(transaction, Some(&value), action));
    }

    /// Remove this key from the query string
    pub fn clear(&self, action: HistoryAction) {
        self.state
            .transaction(|transaction| self.stage(transaction, None, action));
    }

    /// Stage a write into a caller-owned transaction; `None` removes the key
    pub fn stage(&self, transaction: &mut Transaction, value: Option<&T>, action: HistoryAction) {
        let raw = match value.map(serde_json::to_value).transpose() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %self.key, "Value is not serializable, ignoring write: {}", err);
                return;
            }
        };

        match raw {
            Some(raw) if self.keep_default || raw != self.default_raw => {
                transaction.set(&self.path, raw, action)
            }
            _ => transaction.remove(&self.path, action),
        }
    }
}
