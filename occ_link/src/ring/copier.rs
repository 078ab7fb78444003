//! Background thread copying transport data into a local ring.

use super::local::{RingConsumer, RingProducer, local_ring};
use crate::error::{LinkError, LinkResult};
use crate::transport::{OccHandle, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// Back-off while the local ring is full.
pub const FULL_BACKOFF: Duration = Duration::from_millis(100);

/// Default transport poll interval.
pub const DEFAULT_POLL: Duration = Duration::from_millis(100);

/// Drains an [`OccHandle`] into a local ring on a dedicated thread.
///
/// Consumer stalls then only fill the local ring instead of stalling the
/// DMA. The first transport error is recorded in the ring, where the
/// consumer sees it on its next `wait`; the ring reports `Shutdown` once
/// the thread is gone.
pub struct DmaCopier {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<OccHandle>>,
}

impl DmaCopier {
    /// Move `handle` to a new copier thread feeding a ring of `ring_size`
    /// bytes, returning the copier and the ring's consumer half.
    ///
    /// Receive must already be enabled on `handle`.
    pub fn start(
        handle: OccHandle,
        ring_size: usize,
        poll: Duration,
    ) -> LinkResult<(Self, RingConsumer)> {
        let (producer, consumer) = local_ring(ring_size)?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("occ-dma-copier".to_string())
            .spawn(move || copy_loop(handle, producer, thread_stop, poll))
            .map_err(|e| LinkError::OutOfMemory {
                what: format!("copier thread: {e}"),
            })?;
        info!("DMA copier started with {} byte ring", ring_size);
        Ok((
            Self {
                stop,
                thread: Some(thread),
            },
            consumer,
        ))
    }

    /// True while the copier thread runs.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the thread and take the transport handle back.
    pub fn stop(mut self) -> Option<OccHandle> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<OccHandle> {
        self.stop.store(true, Ordering::Release);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(handle) => Some(handle),
            Err(_) => {
                error!("DMA copier thread panicked");
                None
            }
        }
    }
}

impl Drop for DmaCopier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn copy_loop(
    mut handle: OccHandle,
    mut producer: RingProducer,
    stop: Arc<AtomicBool>,
    poll: Duration,
) -> OccHandle {
    let mut copied: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        if producer.is_full() {
            producer.notify();
            std::thread::sleep(FULL_BACKOFF);
            continue;
        }

        let data = match handle.wait_for_data(Some(poll)) {
            Ok(data) => data,
            Err(LinkError::Timeout) => continue,
            Err(e) => {
                error!("DMA copier stopping: {}", e);
                producer.set_error(e);
                break;
            }
        };
        if data.is_empty() {
            continue;
        }

        let accepted = producer.push(data);
        if accepted == 0 {
            break;
        }
        if let Err(e) = handle.acknowledge(accepted) {
            error!("DMA copier acknowledge failed: {}", e);
            producer.set_error(e);
            break;
        }
        copied += accepted as u64;
    }
    debug!("DMA copier exiting after {} bytes", copied);
    producer.set_error(LinkError::Shutdown);
    handle
}
