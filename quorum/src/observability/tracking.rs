use std::any::Any;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use tracing::warn;
use uuid::Uuid;

use crate::cluster::Node;
use crate::observability::history::TimePoint;
use crate::statement::Statement;

type Item = Arc<dyn Any + Send + Sync>;

/// Per-request context shared by all observer callbacks of one logical request.
///
/// Besides the statement and the start time, it carries a map of items.
/// Observers use it to pass their own state between callbacks, e.g. a tracing span
/// opened in `on_request_start` and closed in `on_request_success`.
///
/// Keys are plain strings. Observers should prefix them with something unique to them.
/// State that belongs to a single attempt should be stored under
/// [`HostTrackingInfo::item_key`], which makes the key unique among
/// concurrent attempts of the same request.
pub struct RequestTrackingInfo<'a> {
    statement: Option<&'a Statement>,
    started_at: TimePoint,
    items: Mutex<HashMap<String, Item>>,
}

impl<'a> RequestTrackingInfo<'a> {
    /// Creates tracking info of a request that starts now.
    pub fn new(statement: Option<&'a Statement>) -> Self {
        Self {
            statement,
            started_at: SystemTime::now().into(),
            items: Mutex::new(HashMap::new()),
        }
    }

    /// The statement being executed, if known.
    pub fn statement(&self) -> Option<&'a Statement> {
        self.statement
    }

    /// When the request started.
    pub fn started_at(&self) -> TimePoint {
        self.started_at
    }

    /// Stores `value` under `key`, returning the previous item if there was one.
    pub fn insert_item<T>(&self, key: impl Into<String>, value: T) -> Option<Arc<dyn Any + Send + Sync>>
    where
        T: Any + Send + Sync,
    {
        self.lock_items().insert(key.into(), Arc::new(value))
    }

    /// Returns the item stored under `key`, provided it is a `T`.
    pub fn get_item<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let item = self.lock_items().get(key).cloned()?;
        item.downcast::<T>().ok()
    }

    /// Removes the item stored under `key` and returns it, provided it is a `T`.
    ///
    /// An item of another type is left in place.
    pub fn take_item<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let mut items = self.lock_items();
        if !items.get(key)?.is::<T>() {
            return None;
        }
        items.remove(key)?.downcast::<T>().ok()
    }

    /// Whether anything is stored under `key`.
    pub fn contains_item(&self, key: &str) -> bool {
        self.lock_items().contains_key(key)
    }

    fn lock_items(&self) -> MutexGuard<'_, HashMap<String, Item>> {
        self.items.lock().unwrap_or_else(|poison_error| {
            warn!("RequestTrackingInfo - items mutex poisoned, recovering");
            poison_error.into_inner()
        })
    }
}

impl std::fmt::Debug for RequestTrackingInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.lock_items().keys().cloned().collect();
        keys.sort();
        f.debug_struct("RequestTrackingInfo")
            .field("statement", &self.statement.map(|s| s.contents.as_str()))
            .field("started_at", &self.started_at)
            .field("item_keys", &keys)
            .finish()
    }
}

/// The host an attempt (or a speculative execution) is directed to.
///
/// Two values are equal when they refer to the same host, regardless of
/// which execution or attempt they describe.
#[derive(Debug, Clone)]
pub struct HostTrackingInfo {
    node: Arc<Node>,
    execution_index: usize,
    attempt_number: usize,
}

impl HostTrackingInfo {
    pub(crate) fn new(node: Arc<Node>, execution_index: usize, attempt_number: usize) -> Self {
        Self {
            node,
            execution_index,
            attempt_number,
        }
    }

    /// The targeted node.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Host id of the targeted node.
    pub fn host_id(&self) -> Uuid {
        self.node.host_id
    }

    /// 0 for the initial execution, n for the n-th speculative one.
    pub fn execution_index(&self) -> usize {
        self.execution_index
    }

    /// Number of the attempt within its execution, starting from 1.
    pub fn attempt_number(&self) -> usize {
        self.attempt_number
    }

    /// Key under which state specific to this host is stored in [`RequestTrackingInfo`].
    pub fn item_key(&self, base: &str) -> String {
        format!("{}.{}", base, self.node.host_id)
    }
}

impl PartialEq for HostTrackingInfo {
    fn eq(&self, other: &Self) -> bool {
        self.node.host_id == other.node.host_id
    }
}

impl Eq for HostTrackingInfo {}

impl Hash for HostTrackingInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.host_id.hash(state);
    }
}
