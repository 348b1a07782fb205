// vfs/src/rendezvous.rs

//! Synchronous hand-off between a blocking caller and the fetch backend.
//!
//! Each consumer owns a [`SharedRegion`]: a payload buffer of
//! `max_page_size` bytes plus one result word. The caller arms the word
//! with [`PENDING`], posts the request and parks on the region's condition
//! variable until the backend writes a different value or the timeout
//! expires. Payload and word are written under the same lock before the
//! notification, so a woken caller always sees the payload of its result.

use httpvfs_core::Request;
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Result word while a request is outstanding. No valid result uses it.
pub const PENDING: i32 = 0x00ff_ffff;

/// The caller gave up waiting.
pub const TIMED_OUT: i32 = -1;

/// The backend endpoint is gone.
pub const DISCONNECTED: i32 = -2;

/// A request tagged with the ticket its result must answer.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub ticket: u64,
    pub request: Request,
}

struct Slot {
    word: i32,
    ticket: u64,
    len: usize,
    data: Box<[u8]>,
}

pub struct SharedRegion {
    slot: Mutex<Slot>,
    signal: Condvar,
    capacity: usize,
}

impl SharedRegion {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot {
                word: PENDING,
                ticket: 0,
                len: 0,
                data: vec![0u8; capacity].into_boxed_slice(),
            }),
            signal: Condvar::new(),
            capacity,
        })
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Starts a new request and returns its ticket.
    pub fn arm(&self) -> u64 {
        let mut slot = self.slot.lock();
        slot.ticket += 1;
        slot.word = PENDING;
        slot.len = 0;
        slot.ticket
    }

    /// Blocks until the request `ticket` has a result or `timeout` passes.
    pub fn wait(&self, ticket: u64, timeout: Duration) -> i32 {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();

        loop {
            if slot.ticket != ticket {
                warn!("ticket {} was superseded by {}", ticket, slot.ticket);
                return TIMED_OUT;
            }
            if slot.word != PENDING {
                return slot.word;
            }
            if self.signal.wait_until(&mut slot, deadline).timed_out() {
                // The result may have landed right at the deadline
                return if slot.word != PENDING { slot.word } else { TIMED_OUT };
            }
            // Woken with the word still pending: spurious, wait again
        }
    }

    /// Publishes the result of `ticket`. Returns `false` when the caller
    /// has already moved on to another request.
    pub fn complete(&self, ticket: u64, word: i32, payload: &[u8]) -> bool {
        debug_assert_ne!(word, PENDING);
        let mut slot = self.slot.lock();
        if slot.ticket != ticket || slot.word != PENDING {
            return false;
        }

        let len = payload.len().min(self.capacity);
        if len < payload.len() {
            error!(
                "payload of {} bytes truncated to region capacity {}",
                payload.len(),
                self.capacity
            );
        }
        slot.data[..len].copy_from_slice(&payload[..len]);
        slot.len = len;
        slot.word = word;
        drop(slot);

        self.signal.notify_all();
        true
    }

    /// Fails the outstanding request, if any, with [`DISCONNECTED`].
    pub fn abort(&self) {
        let mut slot = self.slot.lock();
        if slot.word == PENDING {
            slot.word = DISCONNECTED;
            drop(slot);
            self.signal.notify_all();
        }
    }

    /// Runs `f` over the payload of the last result.
    pub fn read_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let slot = self.slot.lock();
        f(&slot.data[..slot.len])
    }
}

/// Caller side of one consumer channel.
pub struct Rendezvous {
    endpoint: UnboundedSender<Envelope>,
    region: Arc<SharedRegion>,
    timeout: Duration,
}

impl Rendezvous {
    pub fn new(endpoint: UnboundedSender<Envelope>, region: Arc<SharedRegion>, timeout: Duration) -> Self {
        Self {
            endpoint,
            region,
            timeout,
        }
    }

    /// Posts `request` and blocks until the backend answers. Returns the
    /// result word: `0` on success, a positive error status, or
    /// [`TIMED_OUT`] / [`DISCONNECTED`].
    pub fn send_and_wait(&self, request: Request) -> i32 {
        let ticket = self.region.arm();
        debug!("sending {} as ticket {}", request, ticket);

        let envelope = Envelope { ticket, request };
        if let Err(err) = self.endpoint.send(envelope) {
            error!("Backend is gone, dropping {}", err.0.request);
            return DISCONNECTED;
        }

        let word = self.region.wait(ticket, self.timeout);
        if word == TIMED_OUT {
            error!("Backend timeout after {:?} on ticket {}", self.timeout, ticket);
        }
        word
    }

    pub fn read_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.region.read_payload(f)
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }
}
