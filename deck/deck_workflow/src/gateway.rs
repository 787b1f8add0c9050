//! UI-thread gateway.
//!
//! Workflow state lives on one owner thread. Work that finishes elsewhere
//! (a credential check on a worker thread, a timer) hands a job to the
//! `UiGateway`, and the owner thread runs it by pumping its `UiContext`.
//!
//! The gateway is an explicit object with an `init`/`teardown` lifecycle.
//! `init` registers the calling thread as the owner and returns the
//! `UiContext` that receives jobs; dropping the context tears the
//! registration down again.
//!
//! Values that must stay on the owner thread, such as triggers, are stashed
//! in the context. The returned `LocalKey` is `Send`, so a job can carry it
//! across threads and look the value up once it runs on the owner.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use deck_core::error::GatewayError;
use parking_lot::RwLock;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce(&UiContext) + Send>;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Registration {
    sender: Sender<Job>,
    owner: ThreadId,
    epoch: u64,
}

/// Handle for scheduling work on the UI owner thread.
///
/// Cheap to clone and safe to share between threads.
#[derive(Clone, Default)]
pub struct UiGateway {
    registration: Arc<RwLock<Option<Registration>>>,
    epochs: Arc<AtomicU64>,
}

impl UiGateway {
    /// Create a gateway with no execution context registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling thread as the owner thread.
    pub fn init(&self) -> Result<UiContext, GatewayError> {
        let mut registration = self.registration.write();
        if registration.is_some() {
            return Err(GatewayError::AlreadyInitialized);
        }

        let (sender, receiver) = crossbeam_channel::unbounded();
        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let owner = thread::current().id();
        *registration = Some(Registration {
            sender,
            owner,
            epoch,
        });
        log::info!("UI execution context registered on thread {:?}", owner);

        Ok(UiContext {
            receiver,
            gateway: self.clone(),
            epoch,
            locals: RefCell::new(HashMap::new()),
            next_key: Cell::new(1),
        })
    }

    /// Unregister the execution context. Returns whether one was registered.
    ///
    /// Jobs already queued stay with the context; new jobs fail with
    /// `NotInitialized`.
    pub fn teardown(&self) -> bool {
        let removed = self.registration.write().take();
        if removed.is_some() {
            log::info!("UI execution context torn down");
        }
        removed.is_some()
    }

    fn release(&self, epoch: u64) {
        let mut registration = self.registration.write();
        if registration.as_ref().map(|r| r.epoch) == Some(epoch) {
            *registration = None;
            log::debug!("UI execution context released by its owner");
        }
    }

    /// Whether an execution context is registered.
    pub fn is_initialized(&self) -> bool {
        self.registration.read().is_some()
    }

    /// Whether the calling thread owns the registered execution context.
    pub fn is_owner_thread(&self) -> bool {
        self.registration
            .read()
            .as_ref()
            .is_some_and(|r| r.owner == thread::current().id())
    }

    fn endpoint(&self) -> Result<(Sender<Job>, ThreadId), GatewayError> {
        let registration = self.registration.read();
        let registration = registration.as_ref().ok_or(GatewayError::NotInitialized)?;
        Ok((registration.sender.clone(), registration.owner))
    }

    /// Queue `job` for the owner thread and return immediately.
    pub fn post<F>(&self, job: F) -> Result<(), GatewayError>
    where
        F: FnOnce(&UiContext) + Send + 'static,
    {
        let (sender, _) = self.endpoint()?;
        sender
            .send(Box::new(job))
            .map_err(|_| GatewayError::Disconnected)
    }

    /// Run `job` on the owner thread and wait for its result.
    ///
    /// Calling this on the owner thread would wait for itself and fails
    /// with `OwnerThread` instead.
    pub fn invoke<F, R>(&self, job: F) -> Result<R, GatewayError>
    where
        F: FnOnce(&UiContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, owner) = self.endpoint()?;
        if thread::current().id() == owner {
            return Err(GatewayError::OwnerThread);
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        sender
            .send(Box::new(move |ctx: &UiContext| {
                let _ = reply_tx.send(job(ctx));
            }))
            .map_err(|_| GatewayError::Disconnected)?;

        reply_rx.recv().map_err(|_| GatewayError::Disconnected)
    }
}

impl fmt::Debug for UiGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registration = self.registration.read();
        f.debug_struct("UiGateway")
            .field("initialized", &registration.is_some())
            .field("owner", &registration.as_ref().map(|r| r.owner))
            .finish()
    }
}

/// Typed key for a value stashed in a `UiContext`.
pub struct LocalKey<T> {
    id: u64,
    epoch: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for LocalKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for LocalKey<T> {}

impl<T> fmt::Debug for LocalKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalKey({}@{})", self.id, self.epoch)
    }
}

/// The owner-thread side of a `UiGateway`.
pub struct UiContext {
    receiver: Receiver<Job>,
    gateway: UiGateway,
    epoch: u64,
    locals: RefCell<HashMap<u64, Rc<dyn Any>>>,
    next_key: Cell<u64>,
}

impl UiContext {
    /// The gateway this context is registered with.
    pub fn gateway(&self) -> UiGateway {
        self.gateway.clone()
    }

    /// Keep `value` on the owner thread and return a key that can travel.
    pub fn stash<T: 'static>(&self, value: T) -> LocalKey<T> {
        let id = self.next_key.get();
        self.next_key.set(id + 1);
        self.locals.borrow_mut().insert(id, Rc::new(value));
        LocalKey {
            id,
            epoch: self.epoch,
            _marker: PhantomData,
        }
    }

    /// Look a stashed value up.
    pub fn get<T: 'static>(&self, key: LocalKey<T>) -> Option<Rc<T>> {
        if key.epoch != self.epoch {
            return None;
        }
        let value = self.locals.borrow().get(&key.id).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Remove a stashed value, returning it.
    pub fn remove<T: 'static>(&self, key: LocalKey<T>) -> Option<Rc<T>> {
        if key.epoch != self.epoch {
            return None;
        }
        let value = self.locals.borrow_mut().remove(&key.id)?;
        value.downcast::<T>().ok()
    }

    /// Number of stashed values.
    pub fn stashed(&self) -> usize {
        self.locals.borrow().len()
    }

    /// Run every queued job without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job(self);
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one job and run it.
    pub fn run_one(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                job(self);
                true
            }
            Err(_) => false,
        }
    }

    /// Pump jobs until `done` returns true or `timeout` passes.
    ///
    /// Returns the final value of `done`.
    pub fn run_until<P>(&self, mut done: P, timeout: Duration) -> bool
    where
        P: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.receiver.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                Ok(job) => job(self),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }
}

impl Drop for UiContext {
    fn drop(&mut self) {
        self.gateway.release(self.epoch);
    }
}

impl fmt::Debug for UiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiContext")
            .field("epoch", &self.epoch)
            .field("stashed", &self.locals.borrow().len())
            .finish()
    }
}
