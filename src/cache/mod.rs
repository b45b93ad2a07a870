//! Render-surface cache.
//!
//! - `slot`: the single-slot TTL cache and its retain policy
//! - `surface`: surface/factory traits and shared handles
//! - `clock`: injectable time source

pub mod clock;
pub mod slot;
pub mod surface;

pub use clock::{Clock, ManualClock, SystemClock};
pub use slot::{CacheEntry, RetainDirective, SurfaceCache};
pub use surface::{LoadMode, Surface, SurfaceFactory, SurfaceHandle, SurfaceId};
