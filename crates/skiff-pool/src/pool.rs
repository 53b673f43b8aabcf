//! Container pool
//!
//! Owns every tracked container, bounds how many are checked out at once,
//! caches initialized containers by action identity and reclaims idle ones by
//! count (on release) and by age (the GC sweeper).

use crate::admission::{self, Reservation};
use crate::gc;
use crate::state::{Checkout, PoolState, Slot};
use parking_lot::Mutex;
use skiff_core::{
    ActionDescriptor, ActionIdentity, ActivationId, AuthKey, ContainerDriver, ContainerId,
    CreateSpec, InitResult, PoolConfig, Result, RunResult, SandboxHandle, SkiffError,
    SlotSummary,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Environment variable carrying the caller's credential into action containers
pub const AUTH_KEY_ENV: &str = "AUTH_KEY";

/// A container checked out of the pool
///
/// Hand it back with [`ContainerPool::release`]; a container that is never
/// released keeps counting against `max_active`.
#[derive(Debug)]
#[must_use = "containers must be released back to the pool"]
pub struct Container {
    id: ContainerId,
    handle: SandboxHandle,
    key: Option<ActionIdentity>,
}

impl Container {
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    pub const fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    /// Action this container is bound to, `None` for ad hoc containers
    pub const fn key(&self) -> Option<&ActionIdentity> {
        self.key.as_ref()
    }
}

impl From<Checkout> for Container {
    fn from(checkout: Checkout) -> Self {
        Self {
            id: checkout.id,
            handle: checkout.handle,
            key: Some(checkout.key),
        }
    }
}

/// State shared between the pool handle and its sweeper task
pub(crate) struct Shared {
    pub state: Mutex<PoolState>,
    /// Signalled whenever capacity may have freed up
    pub capacity: Notify,
    pub driver: Arc<dyn ContainerDriver>,
}

impl Shared {
    /// Run one age-based sweep and return how many slots it removed.
    pub async fn sweep(&self) -> usize {
        let expired = self.state.lock().take_expired(Instant::now());
        let removed = expired.len();
        self.teardown(expired, "idle past gc threshold").await;
        removed
    }

    /// Destroy untracked slots. Failures are logged and absorbed.
    pub async fn teardown(&self, slots: Vec<Slot>, reason: &'static str) {
        for slot in slots {
            tracing::info!(
                container = %slot.id,
                reason,
                lifetime_ms = u64::try_from(slot.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                "removing container"
            );
            if let Err(e) = self.driver.destroy(&slot.handle).await {
                tracing::warn!(container = %slot.id, error = %e, "teardown failed, dropping container anyway");
            }
        }
    }

    async fn discard(&self, checkout: Checkout, reservation: &mut Reservation<'_>, reason: &'static str) {
        let slot = {
            let mut state = self.state.lock();
            reservation.rearm(&mut state);
            state.remove(checkout.id.seq())
        };
        self.teardown(slot.into_iter().collect(), reason).await;
    }
}

/// An active slot that has not been handed to the caller yet
///
/// Dropped while still armed (the acquiring future was cancelled), it
/// untracks the slot, frees its capacity and destroys the sandbox on a
/// background task.
#[must_use]
struct Provisional {
    shared: Arc<Shared>,
    seq: u64,
    armed: bool,
}

impl Provisional {
    fn new(shared: &Arc<Shared>, seq: u64) -> Self {
        Self {
            shared: Arc::clone(shared),
            seq,
            armed: true,
        }
    }

    /// The slot stays with whoever holds it now.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Provisional {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(slot) = self.shared.state.lock().remove(self.seq) else {
            return;
        };
        self.shared.capacity.notify_one();
        tracing::debug!(container = %slot.id, "acquire cancelled, discarding container");

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::clone(&self.shared);
                runtime.spawn(async move {
                    shared.teardown(vec![slot], "acquire cancelled").await;
                });
            }
            Err(_) => {
                tracing::warn!(container = %slot.id, "no runtime to destroy container on, leaking it");
            }
        }
    }
}

/// Concurrency-bounded cache of sandboxed containers
///
/// Constructed once with its configuration and a driver; wrap it in an
/// [`Arc`] to share it between callers. Dropping the pool stops the sweeper
/// but does not destroy idle containers, call [`ContainerPool::drain`] first.
pub struct ContainerPool {
    shared: Arc<Shared>,
    sweeper: JoinHandle<()>,
}

impl ContainerPool {
    /// Create a pool and start its background sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: PoolConfig, driver: Arc<dyn ContainerDriver>) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            max_active = config.max_active,
            max_idle = config.max_idle,
            gc_enabled = config.gc_enabled,
            gc_threshold_secs = config.gc_threshold.as_secs(),
            "container pool initialized"
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::new(config)),
            capacity: Notify::new(),
            driver,
        });
        let sweeper = gc::spawn_sweeper(Arc::downgrade(&shared));

        Ok(Self { shared, sweeper })
    }

    /// Create a fresh, unkeyed container from `image`.
    ///
    /// Waits while the pool is at `max_active`. Returns `None` if the driver
    /// cannot create the container.
    pub async fn acquire_by_image(&self, image: &str, args: &[String]) -> Option<Container> {
        let mut reservation = admission::admit(&self.shared).await;

        let id = self.shared.state.lock().next_id(None);
        let spec = CreateSpec::new(id.name(), image).args(args.iter().cloned());
        let handle = self.create(&spec).await?;

        let mut state = self.shared.state.lock();
        reservation.fulfil(&mut state);
        state.insert_active(id.clone(), handle.clone(), None, Instant::now());
        tracing::info!(container = %id, image, "created ad hoc container");

        Some(Container {
            id,
            handle,
            key: None,
        })
    }

    /// Check out a container initialized with `action`'s code.
    ///
    /// An idle container already bound to the action's identity is reused
    /// without re-initializing, and the returned [`InitResult`] is `None`.
    /// Otherwise a new container is created and initialized. Returns `None`
    /// if the driver cannot create the container.
    ///
    /// A container whose initialization failed is still returned (so its logs
    /// can be read), but it is never reused.
    ///
    /// # Cancel safety
    ///
    /// Cancelling at any point gives the capacity back. A container that was
    /// already checked out or created for this call (cancelled during its
    /// health check or initialization) is untracked and destroyed in the
    /// background.
    pub async fn acquire_for_action(
        &self,
        action: &ActionDescriptor,
        auth_key: &AuthKey,
    ) -> Option<(Container, Option<InitResult>)> {
        let key = &action.identity;
        let mut reservation = admission::admit(&self.shared).await;

        loop {
            let checkout = {
                let mut state = self.shared.state.lock();
                let checkout = state.take_idle_for(key);
                if checkout.is_some() {
                    reservation.fulfil(&mut state);
                }
                checkout
            };
            let Some(checkout) = checkout else { break };

            let provisional = Provisional::new(&self.shared, checkout.id.seq());
            let healthy = self.shared.driver.is_healthy(&checkout.handle).await;
            provisional.disarm();

            if healthy {
                tracing::debug!(container = %checkout.id, action = %key, "reusing warm container");
                return Some((checkout.into(), None));
            }

            tracing::warn!(container = %checkout.id, action = %key, "container died while idle, replacing it");
            self.shared.state.lock().mark_unhealthy(checkout.id.seq());
            self.shared.discard(checkout, &mut reservation, "crashed while idle").await;
        }

        let (id, init_timeout) = {
            let mut state = self.shared.state.lock();
            (state.next_id(Some(key)), state.init_timeout)
        };
        let spec = CreateSpec::new(id.name(), &action.image)
            .args(action.args.iter().cloned())
            .env(AUTH_KEY_ENV, auth_key.expose());
        let handle = self.create(&spec).await?;

        let provisional = {
            let mut state = self.shared.state.lock();
            reservation.fulfil(&mut state);
            state.insert_active(id.clone(), handle.clone(), Some(key.clone()), Instant::now());
            Provisional::new(&self.shared, id.seq())
        };
        let init = self.initialize(&handle, action, init_timeout).await;
        provisional.disarm();

        let mut state = self.shared.state.lock();
        if init.ok {
            tracing::info!(container = %id, action = %key, init = ?init.duration, "created action container");
        } else {
            state.mark_unhealthy(id.seq());
            tracing::warn!(container = %id, action = %key, error = ?init.error, "action initialization failed");
        }

        Some((
            Container {
                id,
                handle,
                key: Some(key.clone()),
            },
            Some(init),
        ))
    }

    async fn create(&self, spec: &CreateSpec) -> Option<SandboxHandle> {
        match self.shared.driver.create(spec).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(container = %spec.name, image = %spec.image, error = %e, "failed to create container");
                None
            }
        }
    }

    async fn initialize(
        &self,
        handle: &SandboxHandle,
        action: &ActionDescriptor,
        limit: Duration,
    ) -> InitResult {
        let start = Instant::now();
        match tokio::time::timeout(limit, self.shared.driver.run_init(handle, action)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => InitResult::failure(start.elapsed(), e.to_string()),
            Err(_) => InitResult::failure(
                start.elapsed(),
                SkiffError::Timeout(limit.as_secs()).to_string(),
            ),
        }
    }

    /// Return a container to the idle set.
    ///
    /// A container marked unhealthy (failed initialization or a failed run)
    /// is destroyed instead of parked. If parking pushes the idle count over
    /// `max_idle`, the longest-idle containers are destroyed before this
    /// returns. Wakes one caller waiting for capacity.
    pub async fn release(&self, container: Container) {
        let seq = container.id.seq();
        let (doomed, reason) = {
            let mut state = self.shared.state.lock();
            if let Some(slot) = state.remove_if_unhealthy(seq) {
                (vec![slot], "released unhealthy")
            } else {
                if let Err(e) = state.park(seq, Instant::now()) {
                    tracing::warn!(container = %container.id, error = %e, "ignoring release");
                    return;
                }
                (state.evict_overflow(), "idle limit reached")
            }
        };
        self.shared.capacity.notify_one();
        tracing::debug!(container = %container.id, "container released");

        self.shared.teardown(doomed, reason).await;
    }

    /// Invoke the action in a checked-out container.
    ///
    /// A driver error marks the container unhealthy so it is discarded
    /// instead of reused once released.
    pub async fn run(
        &self,
        container: &Container,
        payload: &serde_json::Value,
        activation_id: ActivationId,
    ) -> Result<RunResult> {
        let result = self
            .shared
            .driver
            .run(&container.handle, payload, activation_id)
            .await;
        if let Err(e) = &result {
            tracing::warn!(container = %container.id, activation = %activation_id, error = %e, "run failed");
            self.shared.state.lock().mark_unhealthy(container.id.seq());
        }
        result
    }

    /// Output captured from a checked-out container.
    pub async fn logs(&self, container: &Container) -> Result<String> {
        self.shared.driver.get_logs(&container.handle).await
    }

    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle_count()
    }

    pub fn active_count(&self) -> usize {
        self.shared.state.lock().active_count()
    }

    /// Snapshot of every tracked container, ordered by creation
    pub fn list_all(&self) -> Vec<SlotSummary> {
        self.shared.state.lock().summaries()
    }

    /// Find a tracked container by its human-readable name.
    pub fn lookup(&self, name: &str) -> Option<SlotSummary> {
        self.shared.state.lock().find(name)
    }

    pub fn enable_gc(&self) {
        self.shared.state.lock().gc_enabled = true;
    }

    pub fn disable_gc(&self) {
        self.shared.state.lock().gc_enabled = false;
    }

    /// Run one sweep now and wait for it to finish.
    ///
    /// Returns the number of containers removed, or
    /// [`SkiffError::GcDisabled`] if GC is off.
    pub async fn force_gc(&self) -> Result<usize> {
        if !self.shared.state.lock().gc_enabled {
            return Err(SkiffError::GcDisabled);
        }
        Ok(self.shared.sweep().await)
    }

    /// Destroy every idle container. Checked-out containers are untouched.
    pub async fn drain(&self) -> usize {
        let idle = self.shared.state.lock().take_all_idle();
        let removed = idle.len();
        self.shared.teardown(idle, "pool drained").await;
        removed
    }

    /// Applies from the next release on.
    pub fn set_max_idle(&self, n: usize) {
        self.shared.state.lock().max_idle = n;
    }

    pub fn reset_max_idle(&self) {
        let mut state = self.shared.state.lock();
        state.max_idle = state.defaults().max_idle;
    }

    /// Change the bound on checked-out containers. Lowering it never revokes
    /// containers already checked out.
    pub fn set_max_active(&self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(SkiffError::Config("max_active must be at least 1".into()));
        }
        self.shared.state.lock().max_active = n;
        admission::wake_all(&self.shared.capacity);
        Ok(())
    }

    pub fn reset_max_active(&self) {
        {
            let mut state = self.shared.state.lock();
            state.max_active = state.defaults().max_active;
        }
        admission::wake_all(&self.shared.capacity);
    }

    pub fn set_gc_threshold(&self, threshold: Duration) {
        self.shared.state.lock().gc_threshold = threshold;
    }

    pub fn reset_gc_threshold(&self) {
        let mut state = self.shared.state.lock();
        state.gc_threshold = state.defaults().gc_threshold;
    }
}

impl Drop for ContainerPool {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
