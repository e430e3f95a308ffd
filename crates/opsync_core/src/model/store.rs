//! Persisted keyed collection of models.

use super::events::EventProducer;
use super::{Model, ModelChangeTag, ModelChangedArgs, ModelChangedHandler, TypedModel, ID_PROPERTY};
use crate::error::{SyncError, SyncResult};
use opsync_storage::StorageBackend;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, error};
use uuid::Uuid;

/// Receives change events of a [`ModelStore`].
///
/// All methods default to no-ops so handlers only implement what they need.
pub trait ModelStoreChangeHandler<T>: Send + Sync {
    /// A model was added to the store.
    fn on_model_added(&self, _model: &T, _tag: ModelChangeTag) {}

    /// A property of a model in the store changed.
    fn on_model_updated(&self, _args: &ModelChangedArgs, _tag: ModelChangeTag) {}

    /// A model was removed from the store.
    fn on_model_removed(&self, _model: &T, _tag: ModelChangeTag) {}
}

struct StoreInner<T: TypedModel> {
    name: String,
    storage: Option<Arc<dyn StorageBackend>>,
    models: RwLock<Vec<T>>,
    forwarders: Mutex<Vec<(Model, Arc<dyn ModelChangedHandler>)>>,
    changes: EventProducer<dyn ModelStoreChangeHandler<T>>,
}

/// Re-fires property changes of a contained model as store updates.
struct StoreForwarder<T: TypedModel> {
    store: Weak<StoreInner<T>>,
}

impl<T: TypedModel> ModelChangedHandler for StoreForwarder<T> {
    fn on_changed(&self, args: &ModelChangedArgs, tag: ModelChangeTag) {
        if let Some(store) = self.store.upgrade() {
            store.persist_logged();
            store.changes.fire(|h| h.on_model_updated(args, tag));
        }
    }
}

/// A persisted collection of models keyed by their `id` property.
///
/// Every mutation persists the whole store under its name and notifies
/// subscribers with the originating tag. Cloning the store clones the handle.
///
/// # Example
///
/// ```rust
/// use opsync_core::{Model, ModelChangeTag, ModelStore};
///
/// let store: ModelStore<Model> = ModelStore::in_memory("subscriptions");
/// store.add(Model::new().with("id", "sub-1"), ModelChangeTag::Normal);
/// assert!(store.get("sub-1").is_some());
/// ```
pub struct ModelStore<T: TypedModel> {
    inner: Arc<StoreInner<T>>,
}

impl<T: TypedModel> Clone for ModelStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TypedModel> ModelStore<T> {
    /// Opens a store named `name`, loading any models persisted under it.
    ///
    /// Loading does not fire events.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted blob cannot be read or is not a
    /// JSON array of property maps.
    pub fn open(name: impl Into<String>, storage: Arc<dyn StorageBackend>) -> SyncResult<Self> {
        let name = name.into();
        let models = match storage.read(&name)? {
            Some(bytes) => decode_models(&name, &bytes)?,
            None => Vec::new(),
        };
        debug!(store = %name, count = models.len(), "model store loaded");

        let store = Self::build(name, Some(storage));
        for model in models {
            store.attach(&model);
            store.inner.models.write().push(T::from_model(model));
        }
        Ok(store)
    }

    /// Creates a store that is never persisted.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    fn build(name: String, storage: Option<Arc<dyn StorageBackend>>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name,
                storage,
                models: RwLock::new(Vec::new()),
                forwarders: Mutex::new(Vec::new()),
                changes: EventProducer::new(),
            }),
        }
    }

    /// Returns the store name (also its storage key).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Adds a model at the end of the store.
    ///
    /// A model without an `id` gets a generated one. An existing model with
    /// the same id is removed first, firing a removal.
    pub fn add(&self, model: T, tag: ModelChangeTag) {
        self.insert(None, model, tag);
    }

    /// Adds a model at `index` (clamped to the store length).
    pub fn add_at(&self, index: usize, model: T, tag: ModelChangeTag) {
        self.insert(Some(index), model, tag);
    }

    fn insert(&self, index: Option<usize>, model: T, tag: ModelChangeTag) {
        let id = match model.id() {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                model.model().put_silent(ID_PROPERTY, Value::String(id.clone()));
                id
            }
        };

        if self.get(&id).is_some() {
            self.remove(&id, tag);
        }

        {
            let mut models = self.inner.models.write();
            match index {
                Some(i) => {
                    let i = i.min(models.len());
                    models.insert(i, model.clone());
                }
                None => models.push(model.clone()),
            }
        }
        self.attach(model.model());
        self.inner.persist_logged();
        self.inner.changes.fire(|h| h.on_model_added(&model, tag));
    }

    /// Returns the model with the given id.
    pub fn get(&self, id: &str) -> Option<T> {
        self.inner
            .models
            .read()
            .iter()
            .find(|m| m.id().as_deref() == Some(id))
            .cloned()
    }

    /// Returns every model in store order.
    pub fn list(&self) -> Vec<T> {
        self.inner.models.read().clone()
    }

    /// Returns the number of models.
    pub fn len(&self) -> usize {
        self.inner.models.read().len()
    }

    /// Returns true if the store holds no models.
    pub fn is_empty(&self) -> bool {
        self.inner.models.read().is_empty()
    }

    /// Removes the model with the given id. Returns it if it existed.
    pub fn remove(&self, id: &str, tag: ModelChangeTag) -> Option<T> {
        let removed = {
            let mut models = self.inner.models.write();
            let pos = models.iter().position(|m| m.id().as_deref() == Some(id))?;
            models.remove(pos)
        };
        self.detach(removed.model());
        self.inner.persist_logged();
        self.inner.changes.fire(|h| h.on_model_removed(&removed, tag));
        Some(removed)
    }

    /// Removes every model, firing a removal for each.
    pub fn clear(&self, tag: ModelChangeTag) {
        let removed = std::mem::take(&mut *self.inner.models.write());
        for model in &removed {
            self.detach(model.model());
        }
        self.inner.persist_logged();
        for model in &removed {
            self.inner.changes.fire(|h| h.on_model_removed(model, tag));
        }
    }

    /// Replaces the whole content: clears, then adds every model.
    pub fn replace_all(&self, models: Vec<T>, tag: ModelChangeTag) {
        self.clear(tag);
        for model in models {
            self.add(model, tag);
        }
    }

    /// Writes the current content to storage.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the storage write fails.
    pub fn persist(&self) -> SyncResult<()> {
        self.inner.persist()
    }

    /// Registers a change handler.
    pub fn subscribe(&self, handler: Arc<dyn ModelStoreChangeHandler<T>>) {
        self.inner.changes.subscribe(handler);
    }

    /// Removes a change handler.
    pub fn unsubscribe(&self, handler: &Arc<dyn ModelStoreChangeHandler<T>>) {
        self.inner.changes.unsubscribe(handler);
    }

    fn attach(&self, model: &Model) {
        self.detach(model);
        let forwarder: Arc<dyn ModelChangedHandler> = Arc::new(StoreForwarder {
            store: Arc::downgrade(&self.inner),
        });
        model.subscribe(Arc::clone(&forwarder));
        self.inner
            .forwarders
            .lock()
            .push((model.clone(), forwarder));
    }

    // Keyed by model identity, not id: the id property itself may change.
    fn detach(&self, model: &Model) {
        let mut forwarders = self.inner.forwarders.lock();
        if let Some(pos) = forwarders.iter().position(|(m, _)| m.same_model(model)) {
            let (_, forwarder) = forwarders.remove(pos);
            model.unsubscribe(&forwarder);
        }
    }
}

impl<T: TypedModel> StoreInner<T> {
    fn persist(&self) -> SyncResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let maps: Vec<Map<String, Value>> = self
            .models
            .read()
            .iter()
            .map(|m| m.model().to_map())
            .collect();
        let bytes = serde_json::to_vec(&maps)?;
        storage.write(&self.name, &bytes)?;
        Ok(())
    }

    fn persist_logged(&self) {
        if let Err(e) = self.persist() {
            error!(store = %self.name, error = %e, "failed to persist model store");
        }
    }
}

fn decode_models(store: &str, bytes: &[u8]) -> SyncResult<Vec<Model>> {
    let values: Vec<Value> = serde_json::from_slice(bytes)?;
    values
        .into_iter()
        .map(|value| match value {
            Value::Object(map) => Ok(Model::from_map(map)),
            other => Err(SyncError::InvalidModel {
                store: store.to_string(),
                message: format!("expected an object, found {other}"),
            }),
        })
        .collect()
}
