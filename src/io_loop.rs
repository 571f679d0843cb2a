//! Background receive/transmit threads around a [`Device`].
//!
//! The receive thread owns the device and pushes frames into a bounded queue,
//! dropping the newest frame when the queue is full. The transmit thread owns
//! a duplicated descriptor and writes whatever is queued to it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, trace, warn};

use crate::api::{Device, Interface, Result, Writer};
use crate::buffer_pool::{
    DEFAULT_POOL_CAPACITY, FramePool, TimestampedFrame, TimestampedFramePool,
};
use crate::errors::Error;
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct IoConfig {
    /// Frames each queue holds before the receive side starts dropping and
    /// the transmit side starts refusing. Must be non-zero.
    pub queue_capacity: usize,
    /// Buffers kept for reuse by each pool.
    pub pool_capacity: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_POOL_CAPACITY,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

/// Caller side of a running receive/transmit thread pair.
///
/// Dropping the handle stops the transmit thread once its queue drains. The
/// receive thread stops, closing the device, when it next has a frame and
/// nobody left to deliver it to.
pub struct IoHandle {
    interface: Interface,
    received: Receiver<TimestampedFrame>,
    outgoing: Sender<Frame>,
    received_pool: Arc<TimestampedFramePool>,
    outgoing_pool: Arc<FramePool>,
    dropped: Arc<AtomicU64>,
    transmitter: Option<JoinHandle<()>>,
}

/// Starts the receive and transmit threads for `device`.
pub fn spawn(device: Device, config: IoConfig) -> Result<IoHandle> {
    let interface = device.interface().clone();
    let writer = device.try_clone_writer()?;
    let received_pool = Arc::new(TimestampedFramePool::new(config.pool_capacity));
    let outgoing_pool = Arc::new(FramePool::new(config.pool_capacity));
    let (rx_queue, received) = flume::bounded(config.queue_capacity);
    let (outgoing, tx_queue) = flume::bounded(config.queue_capacity);

    let pool = outgoing_pool.clone();
    let transmitter = thread::Builder::new()
        .name(format!("{}-tx", interface.name))
        .spawn(move || transmit_loop(writer, tx_queue, pool))?;

    let pool = received_pool.clone();
    let dropped = Arc::new(AtomicU64::new(0));
    let drop_count = dropped.clone();
    thread::Builder::new()
        .name(format!("{}-rx", interface.name))
        .spawn(move || receive_loop(device, rx_queue, pool, drop_count))?;

    debug!(interface = %interface.name, ?config, "io threads started");
    Ok(IoHandle {
        interface,
        received,
        outgoing,
        received_pool,
        outgoing_pool,
        dropped,
        transmitter: Some(transmitter),
    })
}

fn receive_loop(
    mut device: Device,
    queue: Sender<TimestampedFrame>,
    pool: Arc<TimestampedFramePool>,
    dropped: Arc<AtomicU64>,
) {
    let max_frame_size = device.max_frame_size();
    // Drops since the queue last accepted a frame; reported once it does.
    let mut overflow = 0u64;
    loop {
        let mut entry = pool.acquire(max_frame_size);
        match device.read_timestamped(&mut entry) {
            Ok(()) => {}
            Err(Error::MalformedCapture { offset }) => {
                warn!(interface = %device.name(), offset, "skipping malformed capture batch");
                pool.release(entry);
                continue;
            }
            Err(e) => {
                warn!(interface = %device.name(), error = %e, "receive loop stopped");
                break;
            }
        }
        match queue.try_send(entry) {
            Ok(()) if overflow > 0 => {
                warn!(interface = %device.name(), dropped = overflow, "receive queue overflowed");
                overflow = 0;
            }
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                trace!(interface = %device.name(), "receive queue full, dropping frame");
                pool.release(entry);
                overflow += 1;
                dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    if let Err(e) = device.close() {
        debug!(error = %e, "device already closed");
    }
}

fn transmit_loop(writer: Writer, queue: Receiver<Frame>, pool: Arc<FramePool>) {
    for frame in queue.iter() {
        if let Err(e) = writer.write(&frame) {
            warn!(len = frame.len(), error = %e, "frame not sent");
        }
        pool.release(frame);
    }
}

impl IoHandle {
    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    /// Blocks for the next received frame. `None` once the receive thread
    /// has stopped and the queue is empty.
    pub fn recv(&self) -> Option<TimestampedFrame> {
        self.received.recv().ok()
    }

    /// Frames the receive thread dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn try_recv(&self) -> Option<TimestampedFrame> {
        self.received.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<TimestampedFrame> {
        self.received.recv_timeout(timeout).ok()
    }

    /// Queues `frame` for transmission without blocking.
    ///
    /// Hands the frame back if the queue is full or the transmit thread is
    /// gone.
    pub fn send(&self, frame: Frame) -> std::result::Result<(), Frame> {
        self.outgoing.try_send(frame).map_err(|e| e.into_inner())
    }

    /// A frame buffer of `size` bytes from the transmit pool.
    pub fn alloc_frame(&self, size: usize) -> Frame {
        self.outgoing_pool.acquire(size)
    }

    /// Returns a received frame for reuse by the receive thread.
    pub fn recycle(&self, entry: TimestampedFrame) {
        self.received_pool.release(entry);
    }

    /// Stops accepting frames and waits for the queued ones to be written.
    pub fn shutdown(mut self) {
        self.join_transmitter();
    }

    fn join_transmitter(&mut self) {
        let Some(transmitter) = self.transmitter.take() else {
            return;
        };
        // Disconnect the queue so the transmit loop ends.
        let (closed, _) = flume::bounded(1);
        drop(std::mem::replace(&mut self.outgoing, closed));
        if transmitter.join().is_err() {
            warn!(interface = %self.interface.name, "transmit thread panicked");
        }
    }
}

impl Drop for IoHandle {
    fn drop(&mut self) {
        self.join_transmitter();
    }
}
