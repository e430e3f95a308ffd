//! A store holding exactly one model.

use super::events::EventProducer;
use super::store::{ModelStore, ModelStoreChangeHandler};
use super::{ModelChangeTag, ModelChangedArgs, TypedModel, ID_PROPERTY};
use crate::error::SyncResult;
use opsync_storage::StorageBackend;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::error;

/// Fixed id of the single model held by a [`SingletonModelStore`].
pub const SINGLETON_ID: &str = "-singleton-";

/// Receives change events of a [`SingletonModelStore`].
pub trait SingletonModelStoreChangeHandler<T>: Send + Sync {
    /// The whole model was replaced.
    fn on_model_replaced(&self, _model: &T, _tag: ModelChangeTag) {}

    /// A property of the model changed.
    fn on_model_updated(&self, _args: &ModelChangedArgs, _tag: ModelChangeTag) {}
}

struct SingletonInner<T: TypedModel> {
    store: ModelStore<T>,
    factory: Arc<dyn Fn() -> T + Send + Sync>,
    create_lock: Mutex<()>,
    changes: EventProducer<dyn SingletonModelStoreChangeHandler<T>>,
}

struct UpdateForwarder<T: TypedModel> {
    singleton: Weak<SingletonInner<T>>,
}

impl<T: TypedModel> ModelStoreChangeHandler<T> for UpdateForwarder<T> {
    fn on_model_updated(&self, args: &ModelChangedArgs, tag: ModelChangeTag) {
        if let Some(singleton) = self.singleton.upgrade() {
            singleton.changes.fire(|h| h.on_model_updated(args, tag));
        }
    }
}

/// A persisted store holding a single model, created on first access.
///
/// ```rust
/// use opsync_core::{Model, ModelChangeTag, SingletonModelStore};
///
/// let identity = SingletonModelStore::in_memory("identity", Model::new);
/// identity.model().set("external_id", "alice", ModelChangeTag::Normal);
/// assert_eq!(identity.model().get_string("external_id").as_deref(), Some("alice"));
/// ```
pub struct SingletonModelStore<T: TypedModel> {
    inner: Arc<SingletonInner<T>>,
}

impl<T: TypedModel> Clone for SingletonModelStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TypedModel> SingletonModelStore<T> {
    /// Opens a singleton store, loading the persisted model if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted blob cannot be decoded.
    pub fn open<F>(
        name: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        factory: F,
    ) -> SyncResult<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Ok(Self::wrap(ModelStore::open(name, storage)?, Arc::new(factory)))
    }

    /// Creates a singleton store that is never persisted.
    pub fn in_memory<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::wrap(ModelStore::in_memory(name), Arc::new(factory))
    }

    fn wrap(store: ModelStore<T>, factory: Arc<dyn Fn() -> T + Send + Sync>) -> Self {
        let inner = Arc::new(SingletonInner {
            store,
            factory,
            create_lock: Mutex::new(()),
            changes: EventProducer::new(),
        });
        inner.store.subscribe(Arc::new(UpdateForwarder {
            singleton: Arc::downgrade(&inner),
        }));
        Self { inner }
    }

    /// Returns the store name.
    pub fn name(&self) -> &str {
        self.inner.store.name()
    }

    /// Returns the model, creating it with the factory on first access.
    ///
    /// Creation is not announced to listeners.
    pub fn model(&self) -> T {
        let _guard = self.inner.create_lock.lock();
        if let Some(existing) = self.inner.store.list().into_iter().next() {
            return existing;
        }
        let created = (self.inner.factory)();
        created
            .model()
            .put_silent(ID_PROPERTY, Value::String(SINGLETON_ID.to_string()));
        self.inner.store.add(created.clone(), ModelChangeTag::Hydrate);
        created
    }

    /// Replaces the content of the model with `model`, keeping the handle.
    pub fn replace(&self, model: &T, tag: ModelChangeTag) {
        let existing = self.model();
        existing.model().initialize_from(model.model());
        existing
            .model()
            .put_silent(ID_PROPERTY, Value::String(SINGLETON_ID.to_string()));
        if let Err(e) = self.inner.store.persist() {
            error!(store = %self.name(), error = %e, "failed to persist singleton store");
        }
        self.inner.changes.fire(|h| h.on_model_replaced(&existing, tag));
    }

    /// Writes the current model to storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage write fails.
    pub fn persist(&self) -> SyncResult<()> {
        self.inner.store.persist()
    }

    /// Registers a change handler.
    pub fn subscribe(&self, handler: Arc<dyn SingletonModelStoreChangeHandler<T>>) {
        self.inner.changes.subscribe(handler);
    }

    /// Removes a change handler.
    pub fn unsubscribe(&self, handler: &Arc<dyn SingletonModelStoreChangeHandler<T>>) {
        self.inner.changes.unsubscribe(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use opsync_storage::InMemoryBackend;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SingletonModelStoreChangeHandler<Model> for Recorder {
        fn on_model_replaced(&self, _model: &Model, tag: ModelChangeTag) {
            self.events.lock().push(format!("replaced {tag:?}"));
        }

        fn on_model_updated(&self, args: &ModelChangedArgs, tag: ModelChangeTag) {
            self.events.lock().push(format!("updated {} {tag:?}", args.path));
        }
    }

    #[test]
    fn model_is_created_once() {
        let store = SingletonModelStore::in_memory("identity", || Model::new().with("n", 1));
        let first = store.model();
        let second = store.model();
        assert!(first.same_model(&second));
        assert_eq!(first.id().as_deref(), Some(SINGLETON_ID));
    }

    #[test]
    fn replace_keeps_handle_and_fires_replaced() {
        let store = SingletonModelStore::in_memory("identity", Model::new);
        let recorder = Arc::new(Recorder::default());
        store.subscribe(recorder.clone());

        let handle = store.model();
        store.replace(&Model::new().with("external_id", "bob"), ModelChangeTag::Hydrate);

        assert_eq!(handle.get_string("external_id").as_deref(), Some("bob"));
        assert_eq!(handle.id().as_deref(), Some(SINGLETON_ID));
        assert_eq!(*recorder.events.lock(), vec!["replaced Hydrate".to_string()]);
    }

    #[test]
    fn updates_pass_through() {
        let store = SingletonModelStore::in_memory("properties", Model::new);
        let recorder = Arc::new(Recorder::default());
        store.subscribe(recorder.clone());

        store.model().set_in("tags", "k", "v", ModelChangeTag::Normal);

        assert_eq!(*recorder.events.lock(), vec!["updated tags.k Normal".to_string()]);
    }

    #[test]
    fn persisted_model_survives_reopen() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let store = SingletonModelStore::open("identity", Arc::clone(&storage), Model::new).unwrap();
        store.model().set("external_id", "alice", ModelChangeTag::Normal);

        let reopened = SingletonModelStore::open("identity", storage, Model::new).unwrap();
        assert_eq!(
            reopened.model().get_string("external_id").as_deref(),
            Some("alice")
        );
    }
}
