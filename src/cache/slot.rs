//! Single-slot, time-boxed surface cache.
//!
//! Holds at most one surface. A fetch for the same key returns the cached
//! surface while it is fresh; anything else tears the old one down and builds
//! a new one. Surfaces are built and destroyed on the UI context only, and
//! the slot lock is never held while either happens.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::surface::{LoadMode, Surface, SurfaceFactory, SurfaceHandle};
use crate::config::PreloadingConfig;
use crate::error::Result;
use crate::ui::{UiExecutor, run_blocking};

/// What the next detach does with the cached surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetainDirective {
    /// Keep it regardless of age.
    AlwaysRetain,
    /// Keep it only if still fresh.
    RetainIfFresh,
    /// Destroy it.
    #[default]
    NoRetainDefault,
}

/// The cached surface and its freshness bookkeeping.
pub struct CacheEntry<S> {
    key: String,
    handle: SurfaceHandle<S>,
    created_at: Instant,
    ttl: Duration,
    invalidated: bool,
}

impl<S> Clone for CacheEntry<S> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            handle: self.handle.clone(),
            created_at: self.created_at,
            ttl: self.ttl,
            invalidated: self.invalidated,
        }
    }
}

impl<S> fmt::Debug for CacheEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("surface", &self.handle.id())
            .field("ttl", &self.ttl)
            .field("invalidated", &self.invalidated)
            .finish()
    }
}

impl<S> CacheEntry<S> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handle(&self) -> &SurfaceHandle<S> {
        &self.handle
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// A zero ttl is always stale.
    pub fn is_stale(&self, now: Instant) -> bool {
        self.invalidated || now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

struct Slot<S> {
    entry: Option<CacheEntry<S>>,
    retain: RetainDirective,
    attached: bool,
}

impl<S> Default for Slot<S> {
    fn default() -> Self {
        Self {
            entry: None,
            retain: RetainDirective::default(),
            attached: false,
        }
    }
}

/// Cache holding at most one surface built by `F`.
pub struct SurfaceCache<F: SurfaceFactory> {
    factory: Arc<F>,
    ui: Arc<dyn UiExecutor>,
    clock: Arc<dyn Clock>,
    preloading: Mutex<PreloadingConfig>,
    slot: Mutex<Slot<F::Surface>>,
}

impl<F: SurfaceFactory> fmt::Debug for SurfaceCache<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.lock_slot();
        f.debug_struct("SurfaceCache")
            .field("entry", &slot.entry)
            .field("retain", &slot.retain)
            .field("attached", &slot.attached)
            .finish()
    }
}

impl<F: SurfaceFactory> SurfaceCache<F> {
    pub fn new(factory: Arc<F>, ui: Arc<dyn UiExecutor>) -> Self {
        Self {
            factory,
            ui,
            clock: Arc::new(SystemClock),
            preloading: Mutex::new(PreloadingConfig::default()),
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_preloading(self, preloading: PreloadingConfig) -> Self {
        *self.preloading.lock().unwrap_or_else(PoisonError::into_inner) = preloading;
        self
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot<F::Surface>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn preloading(&self) -> PreloadingConfig {
        self.preloading.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Return the cached surface for `key` if fresh, else build a new one.
    pub fn fetch_or_create(&self, key: &str, ttl: Duration) -> Result<SurfaceHandle<F::Surface>> {
        self.fetch_or_create_with(key, ttl, LoadMode::Present)
    }

    /// Like [`fetch_or_create`](Self::fetch_or_create), telling the factory
    /// why the surface is built. Blocks until the UI context has built it.
    pub fn fetch_or_create_with(
        &self,
        key: &str,
        ttl: Duration,
        mode: LoadMode,
    ) -> Result<SurfaceHandle<F::Surface>> {
        let evicted = {
            let mut slot = self.lock_slot();
            if let Some(entry) = &slot.entry {
                if entry.key == key && !entry.is_stale(self.clock.now()) {
                    log::debug!("Cache hit for {} ({})", key, entry.handle.id());
                    return Ok(entry.handle.clone());
                }
            }
            slot.attached = false;
            slot.entry.take()
        };
        if let Some(old) = evicted {
            log::debug!("Evicting {} for {} ({:?} requested)", old.handle.id(), old.key, key);
            self.destroy(old.handle);
        }

        let factory = Arc::clone(&self.factory);
        let build_key = key.to_string();
        let surface = run_blocking(self.ui.as_ref(), move || factory.create(&build_key, mode))??;
        let handle = SurfaceHandle::new(key, surface);
        log::info!("Created {} for {} ({:?})", handle.id(), key, mode);

        let displaced = {
            let mut slot = self.lock_slot();
            let now = self.clock.now();
            if let Some(entry) = &slot.entry {
                if entry.key == key && !entry.is_stale(now) {
                    // Another caller installed a fresh surface for the same key while we were building.
                    let winner = entry.handle.clone();
                    drop(slot);
                    self.destroy(handle);
                    return Ok(winner);
                }
            }
            slot.attached = false;
            slot.entry.replace(CacheEntry {
                key: key.to_string(),
                handle: handle.clone(),
                created_at: now,
                ttl,
                invalidated: false,
            })
        };
        if let Some(old) = displaced {
            self.destroy(old.handle);
        }
        Ok(handle)
    }

    /// Build or reuse a surface to show now, using the preloading policy.
    pub fn present(&self, key: &str) -> Result<SurfaceHandle<F::Surface>> {
        self.fetch_or_create_with(key, self.preloading().ttl(), LoadMode::Present)
    }

    /// Warm up a surface for `key` ahead of presenting it.
    ///
    /// Does nothing when preloading is disabled. If the cached surface is
    /// currently attached it is reloaded in place rather than replaced, and
    /// marked stale when the key changed.
    pub fn preload(&self, key: &str) -> Result<Option<SurfaceHandle<F::Surface>>> {
        let preloading = self.preloading();
        if !preloading.enabled {
            log::debug!("Preloading disabled, skipping {}", key);
            return Ok(None);
        }

        let attached = {
            let slot = self.lock_slot();
            match &slot.entry {
                Some(entry) if slot.attached => Some((entry.handle.clone(), entry.key != key)),
                _ => None,
            }
        };

        if let Some((handle, key_changed)) = attached {
            log::debug!("Reloading attached {} with {}", handle.id(), key);
            let target = handle.clone();
            let reload_key = key.to_string();
            run_blocking(self.ui.as_ref(), move || target.surface().reload(&reload_key))??;
            if key_changed {
                let mut slot = self.lock_slot();
                if let Some(entry) = slot.entry.as_mut().filter(|e| e.handle == handle) {
                    entry.invalidated = true;
                }
            }
            return Ok(Some(handle));
        }

        self.fetch_or_create_with(key, preloading.ttl(), LoadMode::Preload)
            .map(Some)
    }

    /// Mark the cached surface stale without destroying it.
    pub fn invalidate(&self) {
        if let Some(entry) = self.lock_slot().entry.as_mut() {
            log::debug!("Invalidating {}", entry.handle.id());
            entry.invalidated = true;
        }
    }

    /// Destroy the cached surface, if any.
    pub fn clear(&self) {
        let evicted = {
            let mut slot = self.lock_slot();
            slot.attached = false;
            slot.entry.take()
        };
        if let Some(entry) = evicted {
            log::debug!("Clearing {}", entry.handle.id());
            self.destroy(entry.handle);
        }
    }

    /// Override what the next detach does. Consumed by that detach.
    pub fn retain_next_detach(&self, directive: RetainDirective) {
        self.lock_slot().retain = directive;
    }

    /// The cached surface was attached to the visible view tree.
    pub fn on_attach(&self) {
        self.lock_slot().attached = true;
    }

    pub fn is_attached(&self) -> bool {
        self.lock_slot().attached
    }

    /// The cached surface left the visible view tree.
    ///
    /// A directive stored with [`retain_next_detach`](Self::retain_next_detach)
    /// wins over `directive`, and is reset either way. Returns whether the
    /// surface was kept.
    pub fn on_detach(&self, directive: RetainDirective) -> bool {
        let evicted = {
            let mut slot = self.lock_slot();
            let stored = std::mem::take(&mut slot.retain);
            let effective = if stored != RetainDirective::NoRetainDefault {
                stored
            } else {
                directive
            };
            slot.attached = false;

            let keep = match (&slot.entry, effective) {
                (None, _) => return false,
                (Some(_), RetainDirective::AlwaysRetain) => true,
                (Some(entry), RetainDirective::RetainIfFresh) => !entry.is_stale(self.clock.now()),
                (Some(_), RetainDirective::NoRetainDefault) => false,
            };
            if keep {
                log::debug!("Retaining surface on detach ({:?})", effective);
                return true;
            }
            slot.entry.take()
        };
        if let Some(entry) = evicted {
            log::debug!("Destroying {} on detach", entry.handle.id());
            self.destroy(entry.handle);
        }
        false
    }

    /// Switch preloading policy. Drops the cached surface since it was
    /// built under the old one.
    pub fn reconfigure(&self, preloading: PreloadingConfig) {
        log::info!(
            "Reconfiguring surface cache (preloading: {}, ttl: {:?})",
            preloading.enabled,
            preloading.ttl()
        );
        *self.preloading.lock().unwrap_or_else(PoisonError::into_inner) = preloading;
        self.clear();
    }

    /// Peek at the cached entry without touching it.
    pub fn current(&self) -> Option<CacheEntry<F::Surface>> {
        self.lock_slot().entry.clone()
    }

    /// Release and destroy `handle` on the UI context.
    fn destroy(&self, handle: SurfaceHandle<F::Surface>) {
        if !handle.mark_destroyed() {
            return;
        }
        let factory = Arc::clone(&self.factory);
        let id = handle.id();
        let job = Box::new(move || {
            handle.surface().release();
            factory.destroy(handle.surface());
            log::debug!("Destroyed {}", handle.id());
        });
        if let Err(e) = self.ui.execute(job) {
            log::error!("Failed to destroy {}: {}", id, e);
        }
    }
}
