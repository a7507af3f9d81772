//! Observer-list signal dispatch.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{ReceiverError, SignalError};

type ReceiverFn<M, C> = dyn Fn(&M, &C) -> Result<(), ReceiverError> + Send + Sync;

/// A connected callback. Cloning yields a handle to the same callback, which
/// is how [`Signal::disconnect`] identifies it.
pub struct Receiver<M, C = ()> {
    f: Arc<ReceiverFn<M, C>>,
}

impl<M, C> Receiver<M, C> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&M, &C) -> Result<(), ReceiverError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Whether both handles refer to the same callback.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }

    fn call(&self, instance: &M, context: &C) -> Result<(), ReceiverError> {
        (self.f)(instance, context)
    }
}

impl<M, C> Clone for Receiver<M, C> {
    fn clone(&self) -> Self {
        Self { f: Arc::clone(&self.f) }
    }
}

impl<M, C> fmt::Debug for Receiver<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Receiver({:p})", Arc::as_ptr(&self.f))
    }
}

/// An ordered list of receivers invoked with an instance and a context.
///
/// ```
/// use tether_models::Signal;
///
/// static GREETED: Signal<String> = Signal::new("greeted");
///
/// let receiver = GREETED.connect(|name: &String, _: &()| {
///     println!("hello {name}");
///     Ok(())
/// });
/// GREETED.send(&"world".to_string(), &()).unwrap();
/// GREETED.disconnect(&receiver).unwrap();
/// ```
pub struct Signal<M, C = ()> {
    name: &'static str,
    receivers: RwLock<Vec<Receiver<M, C>>>,
}

impl<M, C> Signal<M, C> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            receivers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends a receiver and returns its handle.
    pub fn connect<F>(&self, f: F) -> Receiver<M, C>
    where
        F: Fn(&M, &C) -> Result<(), ReceiverError> + Send + Sync + 'static,
    {
        let receiver = Receiver::new(f);
        self.connect_receiver(receiver.clone());
        receiver
    }

    /// Appends an existing handle. The same handle may be connected more
    /// than once; it is then invoked once per connection.
    pub fn connect_receiver(&self, receiver: Receiver<M, C>) {
        self.write().push(receiver);
    }

    /// Removes the first connection of `receiver`.
    ///
    /// # Errors
    ///
    /// Returns `SignalError::UnknownReceiver` if it is not connected.
    pub fn disconnect(&self, receiver: &Receiver<M, C>) -> Result<(), SignalError> {
        let mut receivers = self.write();
        let pos = receivers
            .iter()
            .position(|r| r.same(receiver))
            .ok_or(SignalError::UnknownReceiver { signal: self.name })?;
        receivers.remove(pos);
        Ok(())
    }

    /// Invokes every receiver in connection order.
    ///
    /// Dispatch runs over a snapshot taken on entry, so receivers connected
    /// or disconnected during dispatch take effect from the next `send`.
    ///
    /// # Errors
    ///
    /// Returns `SignalError::Receiver` with the first receiver error;
    /// receivers after it are not invoked.
    pub fn send(&self, instance: &M, context: &C) -> Result<(), SignalError> {
        let snapshot = self.receivers();
        if snapshot.is_empty() {
            return Ok(());
        }
        tracing::trace!(signal = self.name, receivers = snapshot.len(), "dispatching signal");
        for receiver in &snapshot {
            receiver
                .call(instance, context)
                .map_err(|source| SignalError::Receiver {
                    signal: self.name,
                    source,
                })?;
        }
        Ok(())
    }

    /// Snapshot of the connected receivers, in order.
    pub fn receivers(&self) -> Vec<Receiver<M, C>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Disconnects every receiver.
    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Receiver<M, C>>> {
        self.receivers.read().unwrap_or_else(|poisoned| {
            tracing::error!(signal = self.name, "signal lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Receiver<M, C>>> {
        self.receivers.write().unwrap_or_else(|poisoned| {
            tracing::error!(signal = self.name, "signal lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl<M, C> fmt::Debug for Signal<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("receivers", &self.len())
            .finish()
    }
}
