//! Redraw requests from the frame producer to the display host.
//!
//! Every publish asks the host for a repaint. Hosts usually coalesce these
//! themselves, but the producer can run far ahead of the display, so
//! `CoalescingRedraw` keeps at most one request outstanding until the host
//! reports that it has started painting.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Something that can schedule a repaint of the video surface.
///
/// Implementations must be cheap and must not block: `request_redraw` is
/// called from the producer thread right after every publish.
pub trait RedrawRequester: Send + Sync {
    fn request_redraw(&self);
}

/// Requester for exchanges that have no display attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRedraw;

impl RedrawRequester for NoRedraw {
    fn request_redraw(&self) {}
}

/// Forwards the first of a burst of redraw requests to the host and drops
/// the rest until [`CoalescingRedraw::redraw_serviced`] is called.
pub struct CoalescingRedraw {
    pending: AtomicBool,
    requested: AtomicU64,
    forwarded: AtomicU64,
    notify: Box<dyn Fn() + Send + Sync>,
}

impl fmt::Debug for CoalescingRedraw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingRedraw")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("requested", &self.requested.load(Ordering::Relaxed))
            .field("forwarded", &self.forwarded.load(Ordering::Relaxed))
            .finish()
    }
}

impl CoalescingRedraw {
    /// Creates a coalescer that calls `notify` whenever a request has to
    /// reach the host.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            pending: AtomicBool::new(false),
            requested: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            notify: Box::new(notify),
        }
    }

    /// Called by the host at the start of a paint. Requests arriving after
    /// this point schedule another paint.
    pub fn redraw_serviced(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Total number of requests received.
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::Relaxed)
    }

    /// Number of requests that reached the host.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }
}

impl RedrawRequester for CoalescingRedraw {
    fn request_redraw(&self) {
        self.requested.fetch_add(1, Ordering::Relaxed);
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        (self.notify)();
    }
}
