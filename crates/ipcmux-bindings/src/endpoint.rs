//! Endpoint handles and the seam between endpoints and their router.

use std::sync::{Arc, Weak};

use ipcmux_wire::{InterfaceId, Message};

use crate::pipe_control::DisconnectReason;
use crate::sync::SyncKey;
use crate::task::TaskRunner;

/// What an endpoint handle needs from the router that owns its id.
pub trait AssociatedGroupController: Send + Sync {
    /// Called when a handle for `id` goes away. `is_local` is false for the
    /// remote half of a pair that was never sent.
    fn close_endpoint_handle(
        &self,
        id: InterfaceId,
        is_local: bool,
        reason: Option<DisconnectReason>,
    );

    /// Bind `client` to the endpoint behind `handle`. Must be called on
    /// `runner`. Returns the key of the endpoint's sync event, registered
    /// with the calling thread's registry.
    fn attach_endpoint_client(
        &self,
        handle: &ScopedInterfaceEndpointHandle,
        client: Weak<dyn EndpointClient>,
        runner: Arc<dyn TaskRunner>,
        expects_sync_requests: bool,
    ) -> SyncKey;

    /// Unbind the client. Unknown or already detached endpoints are ignored.
    fn detach_endpoint_client(&self, handle: &ScopedInterfaceEndpointHandle);

    /// Queue `message` on the pipe. Returns `false` once the pipe is gone.
    fn send_message(&self, message: Message) -> bool;

    /// Treat the pipe as broken.
    fn raise_error(&self);

    fn is_peer_closed(&self, id: InterfaceId) -> bool;
}

/// The receiving side of an attached endpoint. All methods are called on
/// the task runner the client was attached with.
pub trait EndpointClient: Send + Sync {
    /// Returns `false` when the message is malformed for the interface,
    /// which tears the pipe down.
    fn handle_incoming_message(&self, message: Message) -> bool;

    /// The peer closed its end or the pipe failed.
    fn notify_error(&self, reason: Option<DisconnectReason>);

    /// The peer closed while this side was blocked in a sync wait.
    fn on_sync_peer_closed(&self);
}

/// Owns one end of an associated interface.
///
/// A local handle is used where it was created. The remote half of a fresh
/// pair is meant to be serialized with [`release_for_sending`]; dropping it
/// instead tells the peer the id was closed before being sent.
///
/// [`release_for_sending`]: ScopedInterfaceEndpointHandle::release_for_sending
pub struct ScopedInterfaceEndpointHandle {
    id: InterfaceId,
    is_local: bool,
    controller: Option<Arc<dyn AssociatedGroupController>>,
}

impl ScopedInterfaceEndpointHandle {
    pub fn new(
        id: InterfaceId,
        is_local: bool,
        controller: Arc<dyn AssociatedGroupController>,
    ) -> Self {
        Self {
            id,
            is_local,
            controller: Some(controller),
        }
    }

    /// A handle bound to nothing.
    pub fn invalid() -> Self {
        Self {
            id: InterfaceId::INVALID,
            is_local: true,
            controller: None,
        }
    }

    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_valid() && self.controller.is_some()
    }

    pub fn group_controller(&self) -> Option<&Arc<dyn AssociatedGroupController>> {
        self.controller.as_ref()
    }

    /// Give up ownership without notifying anyone and return the id to put
    /// on the wire.
    ///
    /// # Panics
    ///
    /// Panics on a local handle; only the remote half of a pair travels.
    pub fn release_for_sending(mut self) -> InterfaceId {
        assert!(!self.is_local, "local endpoint handles cannot be sent");
        self.controller = None;
        std::mem::replace(&mut self.id, InterfaceId::INVALID)
    }

    pub fn reset(&mut self) {
        self.reset_with_reason(None);
    }

    /// Close the endpoint, passing `reason` on to the peer.
    pub fn reset_with_reason(&mut self, reason: Option<DisconnectReason>) {
        let id = std::mem::replace(&mut self.id, InterfaceId::INVALID);
        if let Some(controller) = self.controller.take() {
            if id.is_valid() {
                controller.close_endpoint_handle(id, self.is_local, reason);
            }
        }
    }
}

impl Drop for ScopedInterfaceEndpointHandle {
    fn drop(&mut self) {
        self.reset();
    }
}

impl std::fmt::Debug for ScopedInterfaceEndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedInterfaceEndpointHandle")
            .field("id", &self.id)
            .field("is_local", &self.is_local)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        closed: Mutex<Vec<(InterfaceId, bool, Option<DisconnectReason>)>>,
    }

    impl AssociatedGroupController for Recorder {
        fn close_endpoint_handle(
            &self,
            id: InterfaceId,
            is_local: bool,
            reason: Option<DisconnectReason>,
        ) {
            self.closed.lock().push((id, is_local, reason));
        }

        fn attach_endpoint_client(
            &self,
            _handle: &ScopedInterfaceEndpointHandle,
            _client: Weak<dyn EndpointClient>,
            _runner: Arc<dyn TaskRunner>,
            _expects_sync_requests: bool,
        ) -> SyncKey {
            unreachable!()
        }

        fn detach_endpoint_client(&self, _handle: &ScopedInterfaceEndpointHandle) {}

        fn send_message(&self, _message: Message) -> bool {
            true
        }

        fn raise_error(&self) {}

        fn is_peer_closed(&self, _id: InterfaceId) -> bool {
            false
        }
    }

    #[test]
    fn drop_closes_once() {
        let recorder = Arc::new(Recorder::default());
        let mut handle =
            ScopedInterfaceEndpointHandle::new(InterfaceId::from_raw(2), true, recorder.clone());
        assert!(handle.is_valid());
        handle.reset_with_reason(Some(DisconnectReason::new(1, "bye")));
        assert!(!handle.is_valid());
        drop(handle);

        let closed = recorder.closed.lock();
        assert_eq!(
            *closed,
            vec![(
                InterfaceId::from_raw(2),
                true,
                Some(DisconnectReason::new(1, "bye"))
            )]
        );
    }

    #[test]
    fn released_handle_does_not_close() {
        let recorder = Arc::new(Recorder::default());
        let handle =
            ScopedInterfaceEndpointHandle::new(InterfaceId::from_raw(5), false, recorder.clone());
        assert_eq!(handle.release_for_sending(), InterfaceId::from_raw(5));
        assert!(recorder.closed.lock().is_empty());
    }

    #[test]
    fn unsent_remote_handle_reports_non_local_close() {
        let recorder = Arc::new(Recorder::default());
        drop(ScopedInterfaceEndpointHandle::new(
            InterfaceId::from_raw(5),
            false,
            recorder.clone(),
        ));
        assert_eq!(
            *recorder.closed.lock(),
            vec![(InterfaceId::from_raw(5), false, None)]
        );
    }

    #[test]
    #[should_panic(expected = "cannot be sent")]
    fn local_handle_cannot_be_released() {
        let recorder = Arc::new(Recorder::default());
        ScopedInterfaceEndpointHandle::new(InterfaceId::from_raw(1), true, recorder)
            .release_for_sending();
    }

    #[test]
    fn invalid_handle_is_inert() {
        let handle = ScopedInterfaceEndpointHandle::invalid();
        assert!(!handle.is_valid());
        assert!(handle.group_controller().is_none());
    }
}
