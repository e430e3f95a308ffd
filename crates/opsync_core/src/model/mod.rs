//! Observable property bags and their persisted stores.
//!
//! A [`Model`] is a shared handle to a JSON property map. Every mutation
//! fires exactly one [`ModelChangedArgs`] to the model's subscribers,
//! tagged with where the change came from:
//!
//! - [`ModelChangeTag::Normal`]: a local change that must reach the backend
//! - [`ModelChangeTag::Hydrate`]: remote-origin or bulk state that must not
//!   be sent back
//!
//! Models do not know which store holds them. A [`ModelStore`] subscribes to
//! every model it owns, persists itself on each change and re-fires the
//! change to its own subscribers.

mod events;
mod singleton;
mod store;

pub use events::EventProducer;
pub use singleton::{SingletonModelStore, SingletonModelStoreChangeHandler, SINGLETON_ID};
pub use store::{ModelStore, ModelStoreChangeHandler};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Property holding a model's identifier.
pub(crate) const ID_PROPERTY: &str = "id";

/// Origin of a model change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelChangeTag {
    /// Locally driven change; listeners turn it into operations.
    Normal,
    /// Remote-origin or bulk replacement; listeners ignore it.
    Hydrate,
}

impl ModelChangeTag {
    /// Returns true if this change should propagate to the backend.
    pub fn propagates(&self) -> bool {
        matches!(self, ModelChangeTag::Normal)
    }
}

/// Description of one property change.
#[derive(Debug, Clone)]
pub struct ModelChangedArgs {
    /// The model that changed.
    pub model: Model,
    /// Full property path, `"<map>.<key>"` for nested map entries.
    pub path: String,
    /// The property (or map key) that changed.
    pub property: String,
    /// Value before the change, `None` if absent.
    pub old_value: Option<Value>,
    /// Value after the change, `None` if removed.
    pub new_value: Option<Value>,
}

impl ModelChangedArgs {
    /// Returns the map property for a nested change, e.g. `tags` for `tags.k`.
    pub fn parent(&self) -> Option<&str> {
        self.path
            .strip_suffix(self.property.as_str())
            .and_then(|p| p.strip_suffix('.'))
    }
}

/// Receives property changes of a [`Model`].
pub trait ModelChangedHandler: Send + Sync {
    /// Called once per mutation, after the new value is visible.
    fn on_changed(&self, args: &ModelChangedArgs, tag: ModelChangeTag);
}

impl<F> ModelChangedHandler for F
where
    F: Fn(&ModelChangedArgs, ModelChangeTag) + Send + Sync,
{
    fn on_changed(&self, args: &ModelChangedArgs, tag: ModelChangeTag) {
        self(args, tag)
    }
}

struct ModelInner {
    data: RwLock<Map<String, Value>>,
    changes: EventProducer<dyn ModelChangedHandler>,
}

/// A named, observable property bag.
///
/// Cloning a `Model` clones the handle; all clones see the same properties.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::from_map(Map::new())
    }

    /// Creates a model from a raw property map.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                data: RwLock::new(map),
                changes: EventProducer::new(),
            }),
        }
    }

    /// Sets a property while building a model, without notifying anyone.
    #[must_use]
    pub fn with(self, property: &str, value: impl Into<Value>) -> Self {
        self.inner
            .data
            .write()
            .insert(property.to_string(), value.into());
        self
    }

    pub(crate) fn put_silent(&self, property: &str, value: Value) {
        self.inner.data.write().insert(property.to_string(), value);
    }

    /// Returns the model identifier.
    pub fn id(&self) -> Option<String> {
        self.get_string(ID_PROPERTY)
    }

    /// Returns a property value.
    pub fn get(&self, property: &str) -> Option<Value> {
        self.inner.data.read().get(property).cloned()
    }

    /// Returns a string property; non-string values read as `None`.
    pub fn get_string(&self, property: &str) -> Option<String> {
        match self.inner.data.read().get(property) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Returns a boolean property.
    pub fn get_bool(&self, property: &str) -> Option<bool> {
        self.inner.data.read().get(property).and_then(Value::as_bool)
    }

    /// Returns an entry of a nested map property.
    pub fn get_in(&self, map_property: &str, key: &str) -> Option<Value> {
        self.inner
            .data
            .read()
            .get(map_property)
            .and_then(Value::as_object)
            .and_then(|m| m.get(key).cloned())
    }

    /// Returns a copy of a nested map property (empty if absent).
    pub fn map_entries(&self, map_property: &str) -> Map<String, Value> {
        self.inner
            .data
            .read()
            .get(map_property)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// Sets a property and notifies subscribers.
    ///
    /// Setting a property to its current value still notifies.
    pub fn set(&self, property: &str, value: impl Into<Value>, tag: ModelChangeTag) {
        let new_value = value.into();
        let old_value = self
            .inner
            .data
            .write()
            .insert(property.to_string(), new_value.clone());
        self.notify(property.to_string(), property, old_value, Some(new_value), tag);
    }

    /// Removes a property and notifies subscribers.
    pub fn remove(&self, property: &str, tag: ModelChangeTag) {
        let old_value = self.inner.data.write().remove(property);
        self.notify(property.to_string(), property, old_value, None, tag);
    }

    /// Sets an entry of a nested map property and notifies subscribers.
    pub fn set_in(&self, map_property: &str, key: &str, value: impl Into<Value>, tag: ModelChangeTag) {
        let new_value = value.into();
        let old_value = {
            let mut data = self.inner.data.write();
            let entry = data
                .entry(map_property.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            entry
                .as_object_mut()
                .and_then(|m| m.insert(key.to_string(), new_value.clone()))
        };
        self.notify(
            format!("{map_property}.{key}"),
            key,
            old_value,
            Some(new_value),
            tag,
        );
    }

    /// Removes an entry of a nested map property and notifies subscribers.
    pub fn remove_in(&self, map_property: &str, key: &str, tag: ModelChangeTag) {
        let old_value = self
            .inner
            .data
            .write()
            .get_mut(map_property)
            .and_then(Value::as_object_mut)
            .and_then(|m| m.remove(key));
        self.notify(format!("{map_property}.{key}"), key, old_value, None, tag);
    }

    /// Replaces every property with those of `other`, without notifying.
    pub fn initialize_from(&self, other: &Model) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        let copied = other.to_map();
        *self.inner.data.write() = copied;
    }

    /// Returns a copy of the raw property map.
    pub fn to_map(&self) -> Map<String, Value> {
        self.inner.data.read().clone()
    }

    /// Registers a change handler.
    pub fn subscribe(&self, handler: Arc<dyn ModelChangedHandler>) {
        self.inner.changes.subscribe(handler);
    }

    /// Removes a change handler registered with [`Model::subscribe`].
    pub fn unsubscribe(&self, handler: &Arc<dyn ModelChangedHandler>) {
        self.inner.changes.unsubscribe(handler);
    }

    /// Returns true if both handles point to the same model.
    pub fn same_model(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn notify(
        &self,
        path: String,
        property: &str,
        old_value: Option<Value>,
        new_value: Option<Value>,
        tag: ModelChangeTag,
    ) {
        let args = ModelChangedArgs {
            model: self.clone(),
            path,
            property: property.to_string(),
            old_value,
            new_value,
        };
        self.inner.changes.fire(|h| h.on_changed(&args, tag));
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Model").field(&*self.inner.data.read()).finish()
    }
}

impl Serialize for Model {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.data.read().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Model {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Model::from_map)
    }
}

/// A typed view over a [`Model`], stored by [`ModelStore`].
///
/// Implementors are thin newtypes exposing typed accessors; the property
/// map stays the single source of truth.
pub trait TypedModel: Clone + Send + Sync + 'static {
    /// Wraps an untyped model.
    fn from_model(model: Model) -> Self;

    /// Returns the underlying model.
    fn model(&self) -> &Model;

    /// Returns the model identifier.
    fn id(&self) -> Option<String> {
        self.model().id()
    }
}

impl TypedModel for Model {
    fn from_model(model: Model) -> Self {
        model
    }

    fn model(&self) -> &Model {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<(String, ModelChangeTag)>>>, Arc<dyn ModelChangedHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Arc<dyn ModelChangedHandler> =
            Arc::new(move |args: &ModelChangedArgs, tag: ModelChangeTag| {
                sink.lock().push((args.path.clone(), tag));
            });
        (seen, handler)
    }

    #[test]
    fn set_fires_once_with_old_and_new() {
        let model = Model::new().with("language", "en");
        let captured = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&captured);
        model.subscribe(Arc::new(move |args: &ModelChangedArgs, tag: ModelChangeTag| {
            *sink.lock() = Some((args.clone(), tag));
        }));

        model.set("language", "fr", ModelChangeTag::Normal);

        let (args, tag) = captured.lock().take().unwrap();
        assert_eq!(tag, ModelChangeTag::Normal);
        assert_eq!(args.path, "language");
        assert_eq!(args.old_value, Some(json!("en")));
        assert_eq!(args.new_value, Some(json!("fr")));
        assert!(args.model.same_model(&model));
    }

    #[test]
    fn same_value_still_notifies() {
        let model = Model::new().with("language", "en");
        let (seen, handler) = recorder();
        model.subscribe(handler);

        model.set("language", "en", ModelChangeTag::Normal);
        model.set("language", "en", ModelChangeTag::Hydrate);

        assert_eq!(
            *seen.lock(),
            vec![
                ("language".to_string(), ModelChangeTag::Normal),
                ("language".to_string(), ModelChangeTag::Hydrate)
            ]
        );
    }

    #[test]
    fn nested_map_paths() {
        let model = Model::new();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        model.subscribe(Arc::new(move |args: &ModelChangedArgs, _tag: ModelChangeTag| {
            sink.lock().push(args.clone());
        }));

        model.set_in("tags", "level", "3", ModelChangeTag::Normal);
        model.remove_in("tags", "level", ModelChangeTag::Normal);

        let events = captured.lock();
        assert_eq!(events[0].path, "tags.level");
        assert_eq!(events[0].property, "level");
        assert_eq!(events[0].parent(), Some("tags"));
        assert_eq!(events[1].old_value, Some(json!("3")));
        assert_eq!(events[1].new_value, None);
        assert!(model.map_entries("tags").is_empty());
    }

    #[test]
    fn multiple_subscribers_and_unsubscribe() {
        let model = Model::new();
        let (first, first_handler) = recorder();
        let (second, second_handler) = recorder();
        model.subscribe(Arc::clone(&first_handler));
        model.subscribe(second_handler);

        model.set("a", 1, ModelChangeTag::Normal);
        model.unsubscribe(&first_handler);
        model.set("a", 2, ModelChangeTag::Normal);

        assert_eq!(first.lock().len(), 1);
        assert_eq!(second.lock().len(), 2);
    }

    #[test]
    fn initialize_from_is_silent() {
        let model = Model::new().with("id", "x").with("a", 1);
        let other = Model::new().with("id", "y").with("b", 2);
        let (seen, handler) = recorder();
        model.subscribe(handler);

        model.initialize_from(&other);

        assert!(seen.lock().is_empty());
        assert_eq!(model.id().as_deref(), Some("y"));
        assert_eq!(model.get("a"), None);
        assert_eq!(model.get("b"), Some(json!(2)));
    }

    #[test]
    fn serde_uses_property_map() {
        let model = Model::new().with("id", "sub-1").with("enabled", true);
        let text = serde_json::to_string(&model).unwrap();
        let back: Model = serde_json::from_str(&text).unwrap();
        assert_eq!(back.id().as_deref(), Some("sub-1"));
        assert_eq!(back.get_bool("enabled"), Some(true));
    }
}
