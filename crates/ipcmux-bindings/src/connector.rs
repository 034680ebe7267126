//! Owns the message pipe under a router: the outgoing queue and the reader
//! thread feeding inbound packets back to the router.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use ipcmux_transport::MessagePipe;
use ipcmux_wire::Message;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::endpoint::AssociatedGroupController;
use crate::error::{BindingsError, Result};
use crate::router::MultiplexRouter;

#[derive(Default)]
struct Outgoing {
    paused: bool,
    queue: VecDeque<Message>,
}

pub(crate) struct Connector {
    pipe: Arc<dyn MessagePipe>,
    outgoing: Mutex<Outgoing>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connector {
    pub(crate) fn new(pipe: Arc<dyn MessagePipe>) -> Self {
        Self {
            pipe,
            outgoing: Mutex::new(Outgoing::default()),
            reader: Mutex::new(None),
        }
    }

    /// Spawn the reader thread. It holds the router weakly and exits once
    /// the pipe closes or the router is gone.
    pub(crate) fn start(
        &self,
        router: Weak<MultiplexRouter>,
        thread_name: String,
        max_message_size: usize,
    ) -> Result<()> {
        let pipe = Arc::clone(&self.pipe);
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || read_loop(pipe, router, max_message_size))
            .map_err(|err| BindingsError::Transport(err.into()))?;
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    /// Write `message`, or queue it while outgoing traffic is paused.
    pub(crate) fn send(&self, message: Message) -> bool {
        let mut outgoing = self.outgoing.lock();
        if outgoing.paused {
            outgoing.queue.push_back(message);
            return true;
        }
        self.write(message)
    }

    fn write(&self, message: Message) -> bool {
        let id = message.interface_id();
        match self.pipe.write(message.into_packet()) {
            Ok(()) => true,
            Err(err) => {
                debug!(interface_id = %id, error = %err, "write failed");
                false
            }
        }
    }

    pub(crate) fn pause(&self) {
        self.outgoing.lock().paused = true;
    }

    /// Flush queued messages in order and stop queueing.
    pub(crate) fn resume(&self) {
        let mut outgoing = self.outgoing.lock();
        outgoing.paused = false;
        while let Some(message) = outgoing.queue.pop_front() {
            if !self.write(message) {
                outgoing.queue.clear();
                break;
            }
        }
    }

    pub(crate) fn close(&self) {
        self.pipe.close();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.pipe.is_closed()
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.pipe.close();
        if let Some(handle) = self.reader.lock().take() {
            // The last router reference can be released by the reader itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("router reader thread panicked");
            }
        }
    }
}

fn read_loop(pipe: Arc<dyn MessagePipe>, router: Weak<MultiplexRouter>, max_message_size: usize) {
    loop {
        let packet = match pipe.read() {
            Ok(packet) => packet,
            Err(err) => {
                if !err.is_disconnect() {
                    warn!(error = %err, "pipe read failed");
                }
                if let Some(router) = router.upgrade() {
                    router.on_pipe_connection_error();
                }
                return;
            }
        };
        let Some(router) = router.upgrade() else {
            return;
        };
        if packet.data.len() > max_message_size {
            warn!(
                size = packet.data.len(),
                max = max_message_size,
                "inbound message too large"
            );
            router.raise_error();
            continue;
        }
        match Message::from_packet(packet) {
            Ok(message) => {
                trace!(
                    interface_id = %message.interface_id(),
                    name = message.name(),
                    "message received"
                );
                router.accept(message);
            }
            Err(err) => {
                warn!(error = %err, code = err.code(), "invalid message header");
                router.raise_error();
            }
        }
    }
}
