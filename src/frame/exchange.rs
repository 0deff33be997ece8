//! Double-buffered frame hand-off between a decoder and the renderer.
//!
//! The exchange owns a two-slot arena of [`PlanarFrameBuffer`]s. One slot is
//! labeled front (last complete frame) and the other back (being written).
//! The decoder fills the back slot through a [`BackFrame`] and publishes it,
//! which only flips the label under the state lock. The renderer takes a
//! [`FrontFrame`] view under the same lock and uploads from it.
//!
//! Lock order is always state lock, then slot lock. Slots are read-write
//! locks: any number of readers can hold views of the front slot at once,
//! and the producer takes the write side of the back slot only. The producer
//! never holds the state lock while writing and never holds a slot while it
//! is labeled front, so `read_front` never waits on another reader or on the
//! producer.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use thiserror::Error;

use super::planar_buffer::{FrameSize, PlanarFrameBuffer, Plane};
use crate::redraw::{NoRedraw, RedrawRequester};

/// Errors reported by the frame exchange and its buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Dimensions were non-positive or odd.
    #[error("Invalid frame dimensions {width}x{height}")]
    ConfigurationError { width: i32, height: i32 },

    /// A frame was written before the first `configure()`.
    #[error("Frame exchange is not configured")]
    NotConfiguredError,

    /// A frame was written or published after `teardown()`.
    #[error("Frame exchange was torn down")]
    UseAfterTeardownError,

    /// Another back buffer handle is still alive.
    #[error("Back buffer is already being written")]
    ProducerBusyError,

    /// The handle belongs to buffers that were replaced by `configure()`.
    #[error("Back buffer handle is stale")]
    StaleFrameError,

    /// Plane data did not match the configured plane size.
    #[error("Plane {plane} size mismatch: expected {expected} bytes, got {actual}")]
    PlaneSizeMismatch {
        plane: Plane,
        expected: usize,
        actual: usize,
    },
}

pub type ExchangeResult<T = ()> = std::result::Result<T, ExchangeError>;

type Slot = Arc<RwLock<PlanarFrameBuffer>>;
type WriteGuard = ArcRwLockWriteGuard<RawRwLock, PlanarFrameBuffer>;
type ReadGuard = ArcRwLockReadGuard<RawRwLock, PlanarFrameBuffer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Unconfigured,
    Configured,
    TornDown,
}

/// Both buffers of one configuration. Always the same size.
struct Arena {
    slots: [Slot; 2],
}

impl Arena {
    fn new(size: FrameSize) -> Self {
        Self {
            slots: [
                Arc::new(RwLock::new(PlanarFrameBuffer::new(size))),
                Arc::new(RwLock::new(PlanarFrameBuffer::new(size))),
            ],
        }
    }
}

struct ExchangeState {
    arena: Option<Arena>,
    /// Index of the slot labeled front. The back slot is `1 - front`.
    front: usize,
    /// Whether `front` holds a frame published since the last configure.
    published: bool,
    /// Bumped on every configure and teardown so handles taken before can
    /// be told apart from the current buffers.
    generation: u64,
    lifecycle: Lifecycle,
    size: Option<FrameSize>,
    publishes: u64,
}

impl ExchangeState {
    fn arena(&self) -> ExchangeResult<&Arena> {
        match (self.lifecycle, self.arena.as_ref()) {
            (Lifecycle::Configured, Some(arena)) => Ok(arena),
            (Lifecycle::TornDown, _) => Err(ExchangeError::UseAfterTeardownError),
            _ => Err(ExchangeError::NotConfiguredError),
        }
    }
}

/// The front/back buffer pair shared by the decoder and the renderer.
pub struct FrameExchange {
    state: Mutex<ExchangeState>,
    writer_active: AtomicBool,
    redraw: Arc<dyn RedrawRequester>,
}

impl fmt::Debug for FrameExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameExchange")
            .field("size", &state.size)
            .field("lifecycle", &state.lifecycle)
            .field("published", &state.published)
            .field("generation", &state.generation)
            .finish()
    }
}

impl Default for FrameExchange {
    fn default() -> Self {
        Self::new(Arc::new(NoRedraw))
    }
}

impl FrameExchange {
    /// Creates an unconfigured exchange. `redraw` is asked for a repaint
    /// after every publish, configure and teardown.
    pub fn new(redraw: Arc<dyn RedrawRequester>) -> Self {
        Self {
            state: Mutex::new(ExchangeState {
                arena: None,
                front: 0,
                published: false,
                generation: 0,
                lifecycle: Lifecycle::Unconfigured,
                size: None,
                publishes: 0,
            }),
            writer_active: AtomicBool::new(false),
            redraw,
        }
    }

    /// Replaces both buffers with new ones of the given size.
    ///
    /// Invalid dimensions fail with `ConfigurationError` and leave the
    /// current buffers untouched. Nothing is visible to readers until the
    /// first publish after this call.
    pub fn configure(&self, width: i32, height: i32) -> ExchangeResult<FrameSize> {
        let size = FrameSize::new(width, height)?;
        let arena = Arena::new(size);

        let previous = {
            let mut state = self.state.lock();
            let previous = state.arena.replace(arena);
            state.front = 0;
            state.published = false;
            state.generation += 1;
            state.lifecycle = Lifecycle::Configured;
            state.size = Some(size);
            previous
        };
        // Readers still holding a view keep their slot alive until they drop it.
        drop(previous);

        log::info!("FrameExchange::configure: {}x{}", size.width(), size.height());
        self.redraw.request_redraw();
        Ok(size)
    }

    /// Releases both buffers. Calling it again, or before any configure, is
    /// a no-op.
    pub fn teardown(&self) {
        let previous = {
            let mut state = self.state.lock();
            if state.arena.is_none() {
                return;
            }
            state.published = false;
            state.generation += 1;
            state.lifecycle = Lifecycle::TornDown;
            state.size = None;
            state.arena.take()
        };
        drop(previous);

        log::info!("FrameExchange::teardown");
        self.redraw.request_redraw();
    }

    /// Hands the producer exclusive write access to the back buffer.
    ///
    /// Only one handle can exist at a time. If the renderer is still
    /// uploading from this slot (it was front before the last publish) the
    /// call waits for that upload to finish.
    pub fn write_into_back(&self) -> ExchangeResult<BackFrame<'_>> {
        if self.writer_active.swap(true, Ordering::AcqRel) {
            return Err(ExchangeError::ProducerBusyError);
        }

        let result = self.acquire_back();
        if result.is_err() {
            self.writer_active.store(false, Ordering::Release);
        }
        result
    }

    fn acquire_back(&self) -> ExchangeResult<BackFrame<'_>> {
        loop {
            let (slot, index, generation) = {
                let state = self.state.lock();
                let arena = state.arena()?;
                let index = 1 - state.front;
                (arena.slots[index].clone(), index, state.generation)
            };

            let guard = slot.write_arc();

            // Only a publish through our own handle can relabel the slot, so
            // a matching generation means it is still the back buffer.
            if self.state.lock().generation == generation {
                return Ok(BackFrame {
                    exchange: self,
                    guard: Some(guard),
                    index,
                    generation,
                });
            }
            log::debug!("FrameExchange::write_into_back: reconfigured while waiting, retrying");
        }
    }

    /// Makes the frame written through `frame` the new front buffer.
    ///
    /// The label flip is O(1) and copies nothing. A redraw is requested
    /// afterwards.
    pub fn publish(&self, mut frame: BackFrame<'_>) -> ExchangeResult {
        if !std::ptr::eq(frame.exchange, self) {
            return Err(ExchangeError::StaleFrameError);
        }

        // Release the slot before it becomes front. The writer flag stays set
        // until the relabel is done so no second producer can grab it.
        drop(frame.guard.take());

        let result = {
            let mut state = self.state.lock();
            match state.lifecycle {
                Lifecycle::TornDown => Err(ExchangeError::UseAfterTeardownError),
                Lifecycle::Unconfigured => Err(ExchangeError::NotConfiguredError),
                Lifecycle::Configured if state.generation != frame.generation => {
                    Err(ExchangeError::StaleFrameError)
                }
                Lifecycle::Configured => {
                    state.front = frame.index;
                    state.published = true;
                    state.publishes += 1;
                    Ok(())
                }
            }
        };
        drop(frame);

        match &result {
            Ok(()) => self.redraw.request_redraw(),
            Err(e) => log::warn!("FrameExchange::publish: {e}"),
        }
        result
    }

    /// Returns a read-only view of the last published frame, or `None` when
    /// nothing has been published since the last configure (or the exchange
    /// is unconfigured or torn down).
    ///
    /// The view holds a read lock on the slot, so the producer cannot reuse
    /// it until the view is dropped. Drop it as soon as the upload is done
    /// and never keep it across draws. Several views may be held at once.
    pub fn read_front(&self) -> Option<FrontFrame> {
        let state = self.state.lock();
        if !state.published {
            return None;
        }
        let arena = state.arena.as_ref()?;
        let guard = arena.slots[state.front].read_arc();

        Some(FrontFrame {
            guard,
            generation: state.generation,
            sequence: state.publishes,
        })
    }

    /// Current frame size, if configured.
    pub fn size(&self) -> Option<FrameSize> {
        self.state.lock().size
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().lifecycle == Lifecycle::Configured
    }
}

/// Exclusive write access to the back buffer. Fill the planes, then pass it
/// to [`FrameExchange::publish`]. Dropping it without publishing discards the
/// write.
pub struct BackFrame<'a> {
    exchange: &'a FrameExchange,
    guard: Option<WriteGuard>,
    index: usize,
    generation: u64,
}

impl BackFrame<'_> {
    /// Shorthand for `exchange.publish(frame)`.
    pub fn publish(self) -> ExchangeResult {
        let exchange = self.exchange;
        exchange.publish(self)
    }
}

impl fmt::Debug for BackFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackFrame")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Deref for BackFrame<'_> {
    type Target = PlanarFrameBuffer;

    fn deref(&self) -> &Self::Target {
        // The guard is only taken out inside `publish`, which consumes self.
        self.guard.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for BackFrame<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for BackFrame<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.exchange.writer_active.store(false, Ordering::Release);
    }
}

/// Read-only view of the front buffer.
pub struct FrontFrame {
    guard: ReadGuard,
    generation: u64,
    sequence: u64,
}

impl FrontFrame {
    /// Configuration the frame belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of publishes that had happened when this view was taken.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Debug for FrontFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrontFrame")
            .field("buffer", &*self.guard)
            .field("generation", &self.generation)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Deref for FrontFrame {
    type Target = PlanarFrameBuffer;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}
