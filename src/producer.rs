//! Synthetic decoder thread feeding the exchange with moving color bars.
//!
//! Stands in for a real decoder: configures the exchange, then fills and
//! publishes one frame per tick. With `alternate_every` set, it switches
//! between the full and the half frame size to exercise reconfiguration.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::exchange::{ExchangeError, FrameExchange};
use crate::frame::planar_buffer::fill_color_bars;

/// Parameters of the synthetic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSettings {
    pub width: i32,
    pub height: i32,
    pub fps: u32,
    /// Switch frame size every this many frames. Zero keeps a fixed size.
    pub alternate_every: u64,
}

impl ProducerSettings {
    /// Frame size to use for frame number `frame_num`.
    fn size_for(&self, frame_num: u64) -> (i32, i32) {
        if self.alternate_every == 0 || (frame_num / self.alternate_every) % 2 == 0 {
            return (self.width, self.height);
        }
        // Half size, rounded down to even and never below the 2x2 minimum
        let half = |side: i32| ((side / 2) & !1).max(2);
        (half(self.width), half(self.height))
    }
}

enum ProducerMessage {
    Stop,
}

/// Handle to the running producer thread. Dropping it stops the thread.
pub struct SyntheticProducer {
    tx: Sender<ProducerMessage>,
    thread: Option<JoinHandle<()>>,
}

impl SyntheticProducer {
    /// Configures `exchange` and starts publishing frames.
    pub fn start(
        exchange: Arc<FrameExchange>,
        settings: ProducerSettings,
    ) -> Result<Self, ExchangeError> {
        exchange.configure(settings.width, settings.height)?;
        log::info!("SyntheticProducer::start: {settings:?}");

        let (tx, rx) = mpsc::channel();
        let thread = std::thread::spawn(move || run(exchange, settings, rx));

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.tx.send(ProducerMessage::Stop);
            let _ = handle.join();
        }
    }
}

impl Drop for SyntheticProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(exchange: Arc<FrameExchange>, settings: ProducerSettings, rx: Receiver<ProducerMessage>) {
    let frame_duration = Duration::from_micros(1_000_000 / settings.fps.max(1) as u64);
    let mut current_size = (settings.width, settings.height);
    let mut frame_num = 0u64;

    loop {
        let frame_start = Instant::now();

        match rx.try_recv() {
            Ok(ProducerMessage::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        let size = settings.size_for(frame_num);
        if size != current_size {
            if let Err(e) = exchange.configure(size.0, size.1) {
                log::error!("SyntheticProducer: configure {}x{} failed: {e}", size.0, size.1);
                break;
            }
            current_size = size;
        }

        let result = exchange.write_into_back().and_then(|mut frame| {
            fill_color_bars(&mut frame, frame_num);
            frame.publish()
        });
        match result {
            Ok(()) => {}
            Err(ExchangeError::UseAfterTeardownError) => {
                log::info!("SyntheticProducer: exchange torn down, stopping");
                break;
            }
            Err(e) => log::warn!("SyntheticProducer: frame {frame_num} dropped: {e}"),
        }
        frame_num += 1;

        let elapsed = frame_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }

    log::info!("SyntheticProducer: thread exiting after {frame_num} frames");
}
