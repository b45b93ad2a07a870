//! Render surfaces and the handles the cache hands out.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::Result;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one constructed surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    fn next() -> Self {
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Why a surface is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// About to be shown.
    Present,
    /// Warmed up ahead of being shown.
    Preload,
}

/// An expensive, UI-bound render surface.
pub trait Surface: Send + Sync + 'static {
    /// Fail pending requests and detach from the channel. Called on the UI
    /// context right before the factory destroys the surface.
    fn release(&self) {}

    /// Navigate to `key` in place, keeping the surface.
    fn reload(&self, key: &str) -> Result<()> {
        let _ = key;
        Ok(())
    }
}

/// Builds and destroys surfaces. Both are only called on the UI context.
pub trait SurfaceFactory: Send + Sync + 'static {
    type Surface: Surface;

    fn create(&self, key: &str, mode: LoadMode) -> Result<Self::Surface>;

    fn destroy(&self, surface: &Self::Surface) {
        let _ = surface;
    }
}

struct HandleInner<S> {
    id: SurfaceId,
    key: String,
    surface: S,
    destroyed: AtomicBool,
}

/// Shared handle to a constructed surface.
///
/// Two handles are equal iff they refer to the same construction.
pub struct SurfaceHandle<S> {
    inner: Arc<HandleInner<S>>,
}

impl<S> SurfaceHandle<S> {
    pub(crate) fn new(key: impl Into<String>, surface: S) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: SurfaceId::next(),
                key: key.into(),
                surface,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.inner.id
    }

    /// Key the surface was constructed for.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn surface(&self) -> &S {
        &self.inner.surface
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Returns true only for the first caller.
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.inner.destroyed.swap(true, Ordering::AcqRel)
    }
}

impl<S> Clone for SurfaceHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> PartialEq for SurfaceHandle<S> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<S> Eq for SurfaceHandle<S> {}

impl<S> Deref for SurfaceHandle<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner.surface
    }
}

impl<S> fmt::Debug for SurfaceHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
