//! Host-side bookkeeping for buffers that are copied on the device and then
//! mapped without stalling a frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where a readback buffer is in its copy and map cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MapStage {
    /// Free: no copy recorded, not mapped.
    Idle = 0,
    /// A copy into the buffer sits in an encoder that was not submitted yet.
    Copied = 1,
    /// The copy was submitted. Mapping may start.
    Submitted = 2,
    /// `map_async` was issued and has not called back yet.
    Pending = 3,
    Mapped = 4,
    Failed = 5,
}

impl MapStage {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => MapStage::Idle,
            1 => MapStage::Copied,
            2 => MapStage::Submitted,
            3 => MapStage::Pending,
            4 => MapStage::Mapped,
            _ => MapStage::Failed,
        }
    }
}

/// Stage shared between the main world, the render world and the map callback.
#[derive(Clone, Debug, Default)]
pub struct MapState(Arc<AtomicU8>);

impl MapState {
    pub fn stage(&self) -> MapStage {
        MapStage::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `from -> to`. False if another party moved the stage first.
    pub fn advance(&self, from: MapStage, to: MapStage) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Callback for `map_async`. Settles a pending map.
    pub fn callback<E>(&self) -> impl FnOnce(Result<(), E>) + Send + 'static {
        let state = self.0.clone();
        move |result| {
            let to = if result.is_ok() {
                MapStage::Mapped
            } else {
                MapStage::Failed
            };
            let _ = state.compare_exchange(
                MapStage::Pending as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    pub fn reset(&self) {
        self.0.store(MapStage::Idle as u8, Ordering::Release);
    }
}

/// Outcome of polling a readback without blocking.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadbackPoll<T> {
    /// Nothing was requested.
    Idle,
    Pending,
    Ready(T),
    Failed,
}

impl<T> ReadbackPoll<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, ReadbackPoll::Pending)
    }
}
