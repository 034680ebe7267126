//! The per-endpoint client: sends requests, matches responses, answers
//! interface control messages and hands everything else to a receiver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ipcmux_wire::{InterfaceId, Message, MessageFlags, WireStruct};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::endpoint::{AssociatedGroupController, EndpointClient, ScopedInterfaceEndpointHandle};
use crate::error::{BindingsError, Result};
use crate::interface_control::{
    self, ControlMessage, QueryVersionResult, RunInput, RunOrClosePipeInput, RunOutput,
};
use crate::pipe_control::DisconnectReason;
use crate::sync::SyncRegistry;
use crate::task::TaskRunner;

/// Checks an inbound payload before it reaches the receiver.
pub type PayloadValidator = Arc<dyn Fn(&Message) -> ipcmux_wire::Result<()> + Send + Sync>;

type ResponseCallback = Box<dyn FnOnce(Message) -> bool + Send>;
type ErrorHandler = Box<dyn FnOnce(Option<DisconnectReason>) + Send>;

/// Client configuration.
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Version of the interface implemented or expected on this side.
    pub interface_version: u32,
    /// Let this endpoint's sync requests run during any sync wait on its
    /// thread, not only waits for its own replies.
    pub expects_sync_requests: bool,
    pub validator: Option<PayloadValidator>,
}

impl ClientConfig {
    pub fn with_interface_version(mut self, version: u32) -> Self {
        self.interface_version = version;
        self
    }

    pub fn with_expects_sync_requests(mut self, expects: bool) -> Self {
        self.expects_sync_requests = expects;
        self
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(&Message) -> ipcmux_wire::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("interface_version", &self.interface_version)
            .field("expects_sync_requests", &self.expects_sync_requests)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Application side of an endpoint. Called on the client's task runner.
pub trait MessageReceiver: Send + Sync {
    /// A request that expects no response. Returning `false` marks the
    /// message as malformed and tears the pipe down.
    fn accept(&self, message: Message) -> bool;

    /// A request that expects a response, to be sent through `responder`.
    fn accept_with_responder(&self, message: Message, responder: Responder) -> bool {
        let _ = (message, responder);
        false
    }
}

/// Sends the one response owed for a request.
pub struct Responder {
    controller: Arc<dyn AssociatedGroupController>,
    interface_id: InterfaceId,
    request_id: u64,
    is_sync: bool,
}

impl Responder {
    pub fn is_sync(&self) -> bool {
        self.is_sync
    }

    /// Serialize `payload` as the response to the request.
    pub fn respond<S: WireStruct>(self, name: u32, payload: S) -> bool {
        let mut flags = MessageFlags::IS_RESPONSE;
        if self.is_sync {
            flags |= MessageFlags::IS_SYNC;
        }
        let mut message = Message::new(name, flags, payload);
        message.set_interface_id(self.interface_id);
        message.set_request_id(self.request_id);
        self.controller.send_message(message)
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("interface_id", &self.interface_id)
            .field("request_id", &self.request_id)
            .field("is_sync", &self.is_sync)
            .finish()
    }
}

struct SyncResponse {
    done: AtomicBool,
    response: Mutex<Option<Message>>,
    registry: Arc<SyncRegistry>,
}

impl SyncResponse {
    fn complete(&self, response: Option<Message>) {
        *self.response.lock() = response;
        self.done.store(true, Ordering::Release);
        self.registry.notify();
    }
}

#[derive(Default)]
struct ClientState {
    next_request_id: u64,
    async_responders: HashMap<u64, ResponseCallback>,
    sync_responses: HashMap<u64, Arc<SyncResponse>>,
    encountered_error: bool,
    error_handler: Option<ErrorHandler>,
}

impl ClientState {
    fn next_request_id(&mut self) -> u64 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        // 0 is left for messages that never get a response
        if self.next_request_id == 0 {
            self.next_request_id = 1;
        }
        self.next_request_id
    }
}

struct ClientInner {
    id: InterfaceId,
    handle: Mutex<ScopedInterfaceEndpointHandle>,
    controller: Arc<dyn AssociatedGroupController>,
    receiver: Arc<dyn MessageReceiver>,
    runner: Arc<dyn TaskRunner>,
    config: ClientConfig,
    sync_key: AtomicU64,
    state: Mutex<ClientState>,
}

/// Binds a [`MessageReceiver`] to an endpoint and sends on its behalf.
///
/// Must be created, used for sync calls, and dropped on `runner`.
pub struct InterfaceEndpointClient {
    inner: Arc<ClientInner>,
}

impl InterfaceEndpointClient {
    pub fn new(
        handle: ScopedInterfaceEndpointHandle,
        receiver: Arc<dyn MessageReceiver>,
        runner: Arc<dyn TaskRunner>,
        config: ClientConfig,
    ) -> Result<Self> {
        if !handle.is_valid() || !handle.is_local() {
            return Err(BindingsError::InvalidInterfaceId(handle.id()));
        }
        let Some(controller) = handle.group_controller().cloned() else {
            return Err(BindingsError::InvalidInterfaceId(handle.id()));
        };
        let expects_sync_requests = config.expects_sync_requests;
        let inner = Arc::new(ClientInner {
            id: handle.id(),
            handle: Mutex::new(handle),
            controller,
            receiver,
            runner: Arc::clone(&runner),
            config,
            sync_key: AtomicU64::new(0),
            state: Mutex::new(ClientState::default()),
        });

        let as_client: Arc<dyn EndpointClient> = inner.clone();
        let key = {
            let handle = inner.handle.lock();
            inner.controller.attach_endpoint_client(
                &handle,
                Arc::downgrade(&as_client),
                runner,
                expects_sync_requests,
            )
        };
        inner.sync_key.store(key, Ordering::Release);
        Ok(Self { inner })
    }

    pub fn interface_id(&self) -> InterfaceId {
        self.inner.id
    }

    pub fn encountered_error(&self) -> bool {
        self.inner.state.lock().encountered_error
    }

    /// Called at most once, when the peer closes or the pipe fails.
    pub fn set_connection_error_handler(
        &self,
        handler: impl FnOnce(Option<DisconnectReason>) + Send + 'static,
    ) {
        self.inner.state.lock().error_handler = Some(Box::new(handler));
    }

    /// Send a message that expects no response.
    pub fn accept(&self, mut message: Message) -> bool {
        if self.encountered_error() {
            return false;
        }
        message.set_interface_id(self.inner.id);
        self.inner.controller.send_message(message)
    }

    /// Send a request; `callback` runs on the runner with the response.
    /// Returning `false` from it marks the response as malformed.
    pub fn accept_with_responder(
        &self,
        mut message: Message,
        callback: impl FnOnce(Message) -> bool + Send + 'static,
    ) -> bool {
        assert!(
            message.expects_response() && !message.is_sync(),
            "accept_with_responder takes async requests"
        );
        let request_id = {
            let mut state = self.inner.state.lock();
            if state.encountered_error {
                return false;
            }
            let request_id = state.next_request_id();
            state
                .async_responders
                .insert(request_id, Box::new(callback));
            request_id
        };
        message.set_interface_id(self.inner.id);
        message.set_request_id(request_id);
        if self.inner.controller.send_message(message) {
            return true;
        }
        self.inner
            .state
            .lock()
            .async_responders
            .remove(&request_id);
        false
    }

    /// Send a sync request and block until its response arrives.
    ///
    /// While blocked, sync messages for endpoints of this thread keep being
    /// dispatched, so the peer may call back into us.
    ///
    /// # Panics
    ///
    /// Panics when called off the client's runner or with a message that is
    /// not a sync request.
    pub fn accept_sync(&self, mut message: Message) -> Result<Message> {
        assert!(
            message.expects_response() && message.is_sync(),
            "accept_sync takes sync requests"
        );
        assert!(
            self.inner.runner.runs_tasks_on_current_thread(),
            "sync calls must be made on the client's task runner"
        );
        let id = self.inner.id;
        let slot = Arc::new(SyncResponse {
            done: AtomicBool::new(false),
            response: Mutex::new(None),
            registry: SyncRegistry::current(),
        });
        let request_id = {
            let mut state = self.inner.state.lock();
            if state.encountered_error {
                return Err(BindingsError::Disconnected);
            }
            let request_id = state.next_request_id();
            state.sync_responses.insert(request_id, Arc::clone(&slot));
            request_id
        };
        let forget = || {
            self.inner.state.lock().sync_responses.remove(&request_id);
        };

        if self.inner.controller.is_peer_closed(id) {
            forget();
            return Err(BindingsError::Disconnected);
        }
        message.set_interface_id(id);
        message.set_request_id(request_id);
        if !self.inner.controller.send_message(message) {
            forget();
            return Err(BindingsError::SendFailed(id));
        }

        let key = self.inner.sync_key.load(Ordering::Acquire);
        slot.registry.wait(&[key], &[&slot.done]);
        forget();
        let response = slot.response.lock().take();
        response.ok_or(BindingsError::Disconnected)
    }

    /// Ask the peer for its interface version.
    pub fn query_version(&self, callback: impl FnOnce(u32) + Send + 'static) -> bool {
        self.accept_with_responder(interface_control::query_version_request(), move |mut response| {
            match interface_control::parse(&mut response) {
                Ok(ControlMessage::RunResponse(output)) => {
                    let version = match output {
                        Some(RunOutput::QueryVersionResult(result)) => result.version,
                        None => 0,
                    };
                    callback(version);
                    true
                }
                _ => false,
            }
        })
    }

    /// Tell the peer to close the endpoint unless it implements `version`.
    pub fn require_version(&self, version: u32) -> bool {
        self.accept(interface_control::require_version_message(version))
    }

    /// Round trip through the peer; returns once everything sent before has
    /// been dispatched there.
    pub fn flush_for_testing(&self) -> Result<()> {
        self.accept_sync(interface_control::flush_for_testing_request())
            .map(|_| ())
    }

    /// Close the endpoint, reporting `reason` to the peer.
    pub fn close_with_reason(&self, custom_reason: u32, description: impl Into<String>) {
        self.inner
            .close(Some(DisconnectReason::new(custom_reason, description)));
    }
}

impl Drop for InterfaceEndpointClient {
    fn drop(&mut self) {
        self.inner.close(None);
    }
}

impl std::fmt::Debug for InterfaceEndpointClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceEndpointClient")
            .field("interface_id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn close(&self, reason: Option<DisconnectReason>) {
        let mut handle = self.handle.lock();
        if handle.is_valid() {
            self.controller.detach_endpoint_client(&handle);
            handle.reset_with_reason(reason);
        }
        drop(handle);
        self.state.lock().encountered_error = true;
    }

    fn handle_response(&self, message: Message) -> bool {
        let Some(request_id) = message.request_id() else {
            return false;
        };
        if message.is_sync() {
            let slot = self.state.lock().sync_responses.get(&request_id).cloned();
            return match slot {
                Some(slot) => {
                    slot.complete(Some(message));
                    true
                }
                None => {
                    warn!(interface_id = %self.id, request_id, "unexpected sync response");
                    false
                }
            };
        }
        let callback = self.state.lock().async_responders.remove(&request_id);
        match callback {
            Some(callback) => callback(message),
            None => {
                warn!(interface_id = %self.id, request_id, "response to unknown request");
                false
            }
        }
    }

    fn handle_control_request(&self, mut message: Message) -> bool {
        let control = match interface_control::parse(&mut message) {
            Ok(control) => control,
            Err(err) => {
                warn!(interface_id = %self.id, error = %err, "invalid control message");
                return false;
            }
        };
        match control {
            ControlMessage::Run(input) => {
                let output = match input {
                    RunInput::QueryVersion => Some(RunOutput::QueryVersionResult(
                        QueryVersionResult {
                            version: self.config.interface_version,
                        },
                    )),
                    RunInput::FlushForTesting => None,
                };
                self.controller
                    .send_message(interface_control::run_response(&message, output));
                true
            }
            ControlMessage::RunOrClosePipe(RunOrClosePipeInput::RequireVersion(required)) => {
                if required.version > self.config.interface_version {
                    debug!(
                        interface_id = %self.id,
                        required = required.version,
                        implemented = self.config.interface_version,
                        "peer requires a newer version; closing endpoint"
                    );
                    let reason = DisconnectReason::new(
                        0,
                        format!(
                            "version {} required, {} implemented",
                            required.version, self.config.interface_version
                        ),
                    );
                    self.close(Some(reason.clone()));
                    self.fail(Some(reason));
                }
                true
            }
            ControlMessage::RunResponse(_) => false,
        }
    }

    /// Fail pending calls and run the error handler, once.
    fn fail(&self, reason: Option<DisconnectReason>) {
        let (handler, slots, callbacks) = {
            let mut state = self.state.lock();
            state.encountered_error = true;
            (
                state.error_handler.take(),
                std::mem::take(&mut state.sync_responses),
                std::mem::take(&mut state.async_responders),
            )
        };
        for slot in slots.into_values() {
            slot.complete(None);
        }
        drop(callbacks);
        if let Some(handler) = handler {
            handler(reason);
        }
    }
}

impl EndpointClient for ClientInner {
    fn handle_incoming_message(&self, message: Message) -> bool {
        if let Some(validator) = &self.config.validator {
            if !interface_control::is_control_message(&message) {
                if let Err(err) = validator(&message) {
                    warn!(
                        interface_id = %self.id,
                        name = message.name(),
                        error = %err,
                        code = err.code(),
                        "payload rejected"
                    );
                    return false;
                }
            }
        }
        if message.is_response() {
            return self.handle_response(message);
        }
        if interface_control::is_control_message(&message) {
            return self.handle_control_request(message);
        }
        if message.expects_response() {
            let Some(request_id) = message.request_id() else {
                return false;
            };
            let responder = Responder {
                controller: Arc::clone(&self.controller),
                interface_id: self.id,
                request_id,
                is_sync: message.is_sync(),
            };
            return self.receiver.accept_with_responder(message, responder);
        }
        self.receiver.accept(message)
    }

    fn notify_error(&self, reason: Option<DisconnectReason>) {
        debug!(interface_id = %self.id, ?reason, "endpoint error");
        self.fail(reason);
    }

    fn on_sync_peer_closed(&self) {
        let slots = std::mem::take(&mut self.state.lock().sync_responses);
        for slot in slots.into_values() {
            slot.complete(None);
        }
    }
}
