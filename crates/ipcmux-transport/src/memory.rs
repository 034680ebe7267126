//! In-process message pipe pair for host-side testing and embedding.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{MessagePipe, Packet};

#[derive(Default)]
struct QueueState {
    packets: VecDeque<Packet>,
    /// The end owning this queue was closed.
    closed: bool,
    /// The opposite end was closed.
    peer_closed: bool,
}

#[derive(Default)]
struct Queue {
    state: Mutex<QueueState>,
    readable: Condvar,
}

/// One end of an in-memory duplex message pipe.
///
/// Packets written on one end are read, in order, from the other. Handles
/// (including other pipe ends) are moved without copying.
pub struct MemoryPipe {
    incoming: Arc<Queue>,
    outgoing: Arc<Queue>,
}

impl MemoryPipe {
    /// Create a connected pair of pipe ends.
    pub fn pair() -> (MemoryPipe, MemoryPipe) {
        let a = Arc::new(Queue::default());
        let b = Arc::new(Queue::default());
        (
            MemoryPipe {
                incoming: Arc::clone(&a),
                outgoing: Arc::clone(&b),
            },
            MemoryPipe {
                incoming: b,
                outgoing: a,
            },
        )
    }

    /// Read the next packet without blocking.
    ///
    /// Returns `Ok(None)` when nothing is queued and the pipe is still open.
    pub fn try_read(&self) -> Result<Option<Packet>> {
        let mut state = self.incoming.state.lock();
        Self::take_packet(&mut state)
    }

    /// Read the next packet, waiting at most `timeout`.
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<Packet>> {
        let mut state = self.incoming.state.lock();
        loop {
            if let Some(packet) = Self::take_packet(&mut state)? {
                return Ok(Some(packet));
            }
            if self
                .incoming
                .readable
                .wait_for(&mut state, timeout)
                .timed_out()
            {
                return Self::take_packet(&mut state);
            }
        }
    }

    /// Number of packets waiting to be read on this end.
    pub fn queued(&self) -> usize {
        self.incoming.state.lock().packets.len()
    }

    fn take_packet(state: &mut QueueState) -> Result<Option<Packet>> {
        if state.closed {
            return Err(TransportError::Closed);
        }
        if let Some(packet) = state.packets.pop_front() {
            return Ok(Some(packet));
        }
        if state.peer_closed {
            return Err(TransportError::Closed);
        }
        Ok(None)
    }
}

impl MessagePipe for MemoryPipe {
    fn write(&self, packet: Packet) -> Result<()> {
        if self.incoming.state.lock().closed {
            return Err(TransportError::Closed);
        }
        let mut peer = self.outgoing.state.lock();
        if peer.closed {
            return Err(TransportError::Closed);
        }
        trace!(
            bytes = packet.data.len(),
            handles = packet.handles.len(),
            "memory pipe write"
        );
        peer.packets.push_back(packet);
        drop(peer);
        self.outgoing.readable.notify_all();
        Ok(())
    }

    fn read(&self) -> Result<Packet> {
        let mut state = self.incoming.state.lock();
        loop {
            if let Some(packet) = Self::take_packet(&mut state)? {
                return Ok(packet);
            }
            self.incoming.readable.wait(&mut state);
        }
    }

    fn close(&self) {
        let undelivered = {
            let mut state = self.incoming.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.packets)
        };
        self.incoming.readable.notify_all();
        // Handles stuck in undelivered packets are released outside the lock.
        drop(undelivered);

        self.outgoing.state.lock().peer_closed = true;
        self.outgoing.readable.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.incoming.state.lock().closed
    }
}

impl Drop for MemoryPipe {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for MemoryPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.incoming.state.lock();
        f.debug_struct("MemoryPipe")
            .field("queued", &state.packets.len())
            .field("closed", &state.closed)
            .field("peer_closed", &state.peer_closed)
            .finish()
    }
}
