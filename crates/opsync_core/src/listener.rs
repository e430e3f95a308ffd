//! Listeners turning model store events into queued operations.

use crate::model::{
    ModelChangeTag, ModelChangedArgs, ModelStore, ModelStoreChangeHandler, SingletonModelStore,
    SingletonModelStoreChangeHandler, TypedModel,
};
use crate::operation::Operation;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The enqueue side of the operation repository.
#[async_trait]
pub trait OperationQueue<O: Operation>: Send + Sync {
    /// Queues an operation. With `flush` the execution loop skips its idle wait.
    fn enqueue(&self, operation: O, flush: bool);

    /// Queues an operation and waits for its terminal outcome.
    async fn enqueue_and_wait(&self, operation: O, flush: bool) -> bool;

    /// Returns true if an operation of `kind` is queued or executing.
    fn contains_instance_of(&self, kind: O::Kind) -> bool;
}

/// Derives operations from the events of a [`ModelStore`].
///
/// Returning `None` means the event needs no backend work.
pub trait ModelStoreListener<T: TypedModel>: Send + Sync + 'static {
    /// Operation type produced by this listener.
    type Operation: Operation;

    /// Operation for a model added to the store.
    fn add_operation(&self, model: &T) -> Option<Self::Operation>;

    /// Operation for a property change of a model in the store.
    fn update_operation(&self, model: &T, args: &ModelChangedArgs) -> Option<Self::Operation>;

    /// Operation for a model removed from the store.
    fn remove_operation(&self, model: &T) -> Option<Self::Operation>;
}

/// Derives operations from the events of a [`SingletonModelStore`].
pub trait SingletonModelStoreListener<T: TypedModel>: Send + Sync + 'static {
    /// Operation type produced by this listener.
    type Operation: Operation;

    /// Operation for a wholesale replacement of the model.
    fn replace_operation(&self, model: &T) -> Option<Self::Operation>;

    /// Operation for a property change of the model.
    fn update_operation(&self, model: &T, args: &ModelChangedArgs) -> Option<Self::Operation>;
}

/// Keeps a listener attached to its store until closed.
pub struct ListenerHandle {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Detaches the listener from its store.
    pub fn close(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

struct StoreBinding<L: ModelStoreListener<T>, T: TypedModel> {
    listener: L,
    queue: Arc<dyn OperationQueue<L::Operation>>,
    _model: std::marker::PhantomData<fn() -> T>,
}

impl<L: ModelStoreListener<T>, T: TypedModel> StoreBinding<L, T> {
    fn submit(&self, tag: ModelChangeTag, derive: impl FnOnce(&L) -> Option<L::Operation>) {
        if !tag.propagates() {
            return;
        }
        if let Some(operation) = derive(&self.listener) {
            debug!(operation = %operation.kind(), "model change produced operation");
            self.queue.enqueue(operation, false);
        }
    }
}

impl<L: ModelStoreListener<T>, T: TypedModel> ModelStoreChangeHandler<T> for StoreBinding<L, T> {
    fn on_model_added(&self, model: &T, tag: ModelChangeTag) {
        self.submit(tag, |l| l.add_operation(model));
    }

    fn on_model_updated(&self, args: &ModelChangedArgs, tag: ModelChangeTag) {
        self.submit(tag, |l| {
            l.update_operation(&T::from_model(args.model.clone()), args)
        });
    }

    fn on_model_removed(&self, model: &T, tag: ModelChangeTag) {
        self.submit(tag, |l| l.remove_operation(model));
    }
}

struct SingletonBinding<L: SingletonModelStoreListener<T>, T: TypedModel> {
    listener: L,
    queue: Arc<dyn OperationQueue<L::Operation>>,
    _model: std::marker::PhantomData<fn() -> T>,
}

impl<L: SingletonModelStoreListener<T>, T: TypedModel> SingletonBinding<L, T> {
    fn submit(&self, tag: ModelChangeTag, derive: impl FnOnce(&L) -> Option<L::Operation>) {
        if !tag.propagates() {
            return;
        }
        if let Some(operation) = derive(&self.listener) {
            debug!(operation = %operation.kind(), "model change produced operation");
            self.queue.enqueue(operation, false);
        }
    }
}

impl<L: SingletonModelStoreListener<T>, T: TypedModel> SingletonModelStoreChangeHandler<T>
    for SingletonBinding<L, T>
{
    fn on_model_replaced(&self, model: &T, tag: ModelChangeTag) {
        self.submit(tag, |l| l.replace_operation(model));
    }

    fn on_model_updated(&self, args: &ModelChangedArgs, tag: ModelChangeTag) {
        self.submit(tag, |l| {
            l.update_operation(&T::from_model(args.model.clone()), args)
        });
    }
}

/// Attaches `listener` to `store`; derived operations go to `queue`.
///
/// `Hydrate` tagged events are ignored and operations are enqueued without
/// flushing, so quick successive edits can be grouped.
pub fn bootstrap_listener<T, L>(
    store: &ModelStore<T>,
    listener: L,
    queue: Arc<dyn OperationQueue<L::Operation>>,
) -> ListenerHandle
where
    T: TypedModel,
    L: ModelStoreListener<T>,
{
    let binding: Arc<dyn ModelStoreChangeHandler<T>> = Arc::new(StoreBinding {
        listener,
        queue,
        _model: std::marker::PhantomData,
    });
    store.subscribe(Arc::clone(&binding));
    let store = store.clone();
    ListenerHandle::new(move || store.unsubscribe(&binding))
}

/// Attaches a singleton listener to `store`; see [`bootstrap_listener`].
pub fn bootstrap_singleton_listener<T, L>(
    store: &SingletonModelStore<T>,
    listener: L,
    queue: Arc<dyn OperationQueue<L::Operation>>,
) -> ListenerHandle
where
    T: TypedModel,
    L: SingletonModelStoreListener<T>,
{
    let binding: Arc<dyn SingletonModelStoreChangeHandler<T>> = Arc::new(SingletonBinding {
        listener,
        queue,
        _model: std::marker::PhantomData,
    });
    store.subscribe(Arc::clone(&binding));
    let store = store.clone();
    ListenerHandle::new(move || store.unsubscribe(&binding))
}
