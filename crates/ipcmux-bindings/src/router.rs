//! Demultiplexes one message pipe into many associated endpoints.
//!
//! The router owns the endpoint table and a queue of pending dispatch
//! tasks, both behind one lock. Clients are only ever called with the lock
//! released, on their own task runner. An endpoint is forgotten once it is
//! both closed locally and closed by the peer, so an id is never reused
//! while a message for it may still be in flight.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use ipcmux_transport::{MessagePipe, DEFAULT_MAX_PACKET};
use ipcmux_wire::{InterfaceId, Message};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::connector::Connector;
use crate::endpoint::{AssociatedGroupController, EndpointClient, ScopedInterfaceEndpointHandle};
use crate::error::{BindingsError, Result};
use crate::pipe_control::{self, DisconnectReason, PipeControlInput};
use crate::sync::{SyncEvent, SyncKey, SyncRegistry};
use crate::task::TaskRunner;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Set the namespace bit on ids minted here. Exactly one side of a pipe
    /// must set it.
    pub set_interface_id_namespace_bit: bool,
    /// Log protocol errors instead of closing the pipe.
    pub testing_mode: bool,
    /// Inbound messages larger than this are a protocol error.
    pub max_message_size: usize,
    pub reader_thread_name: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            set_interface_id_namespace_bit: false,
            testing_mode: false,
            max_message_size: DEFAULT_MAX_PACKET,
            reader_thread_name: "ipcmux-router".to_string(),
        }
    }
}

impl RouterConfig {
    pub fn with_namespace_bit(mut self, set: bool) -> Self {
        self.set_interface_id_namespace_bit = set;
        self
    }

    pub fn with_testing_mode(mut self, testing_mode: bool) -> Self {
        self.testing_mode = testing_mode;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_reader_thread_name(mut self, name: impl Into<String>) -> Self {
        self.reader_thread_name = name.into();
        self
    }
}

/// Snapshot of one endpoint's lifecycle flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointStatus {
    pub closed: bool,
    pub peer_closed: bool,
    pub has_client: bool,
}

#[derive(Default)]
struct Endpoint {
    closed: bool,
    peer_closed: bool,
    handle_created: bool,
    disconnect_reason: Option<DisconnectReason>,
    client: Option<Weak<dyn EndpointClient>>,
    runner: Option<Arc<dyn TaskRunner>>,
    sync_event: Option<SyncEvent>,
    /// Sequence numbers of queued sync messages, oldest first.
    sync_tasks: VecDeque<u64>,
}

enum QueuedTask {
    Message(Message),
    NotifyError(InterfaceId),
}

impl QueuedTask {
    fn interface_id(&self) -> InterfaceId {
        match self {
            QueuedTask::Message(message) => message.interface_id(),
            QueuedTask::NotifyError(id) => *id,
        }
    }
}

enum Dispatch {
    Message(Message),
    Error(Option<DisconnectReason>),
}

#[derive(Clone, Copy)]
enum StateUpdate {
    Closed,
    PeerClosed,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ClientCalls {
    /// Clients whose runner is the current thread are called inline.
    AllowDirect,
    /// Every dispatch is posted to the client's runner.
    PostOnly,
}

struct RouterState {
    endpoints: HashMap<InterfaceId, Endpoint>,
    /// Pending dispatches keyed by arrival order.
    tasks: BTreeMap<u64, QueuedTask>,
    next_seq: u64,
    next_interface_id: u32,
    encountered_error: bool,
    paused_incoming: bool,
    /// Client calls currently running with the lock released.
    in_flight: usize,
    /// Runners with a dispatch task already posted.
    posted: Vec<Arc<dyn TaskRunner>>,
}

impl RouterState {
    fn push_task(&mut self, task: QueuedTask) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert(seq, task);
        seq
    }

    /// Rebuild the sync queue of `id` from the pending tasks, picking up sync
    /// messages that arrived before the endpoint existed. Returns whether
    /// any are queued.
    fn requeue_sync_tasks(&mut self, id: InterfaceId) -> bool {
        let seqs: VecDeque<u64> = self
            .tasks
            .iter()
            .filter_map(|(seq, task)| match task {
                QueuedTask::Message(message)
                    if message.interface_id() == id && message.is_sync() =>
                {
                    Some(*seq)
                }
                _ => None,
            })
            .collect();
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return false;
        };
        endpoint.sync_tasks = seqs;
        !endpoint.sync_tasks.is_empty()
    }

    fn update_endpoint(&mut self, id: InterfaceId, update: StateUpdate) {
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return;
        };
        match update {
            StateUpdate::Closed => endpoint.closed = true,
            StateUpdate::PeerClosed => {
                endpoint.peer_closed = true;
                if let Some(event) = &endpoint.sync_event {
                    event.signal();
                }
            }
        }
        if endpoint.closed && endpoint.peer_closed {
            self.endpoints.remove(&id);
            self.tasks.retain(|_, task| task.interface_id() != id);
            debug!(interface_id = %id, "endpoint removed");
        }
    }
}

/// The [`AssociatedGroupController`] for one message pipe.
pub struct MultiplexRouter {
    weak_self: Weak<MultiplexRouter>,
    config: RouterConfig,
    connector: Connector,
    state: Mutex<RouterState>,
}

impl MultiplexRouter {
    /// Take ownership of `pipe` and start reading from it.
    pub fn new(pipe: impl MessagePipe, config: RouterConfig) -> Result<Arc<Self>> {
        let router = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            connector: Connector::new(Arc::new(pipe)),
            state: Mutex::new(RouterState {
                endpoints: HashMap::new(),
                tasks: BTreeMap::new(),
                next_seq: 0,
                next_interface_id: 1,
                encountered_error: false,
                paused_incoming: false,
                in_flight: 0,
                posted: Vec::new(),
            }),
            config,
        });
        router.connector.start(
            Arc::downgrade(&router),
            router.config.reader_thread_name.clone(),
            router.config.max_message_size,
        )?;
        debug!(
            namespace_bit = router.config.set_interface_id_namespace_bit,
            testing_mode = router.config.testing_mode,
            "router started"
        );
        Ok(router)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Mint a fresh id and return its local handle and the remote handle
    /// meant to be sent to the peer.
    pub fn create_endpoint_pair(
        self: &Arc<Self>,
    ) -> (ScopedInterfaceEndpointHandle, ScopedInterfaceEndpointHandle) {
        let id = {
            let mut state = self.state.lock();
            let id = loop {
                let raw = state.next_interface_id;
                // The top value with the namespace bit set is the invalid id.
                state.next_interface_id = if raw + 1 >= InterfaceId::NAMESPACE_MASK - 1 {
                    1
                } else {
                    raw + 1
                };
                let raw = if self.config.set_interface_id_namespace_bit {
                    raw | InterfaceId::NAMESPACE_MASK
                } else {
                    raw
                };
                let id = InterfaceId::from_raw(raw);
                if !state.endpoints.contains_key(&id) {
                    break id;
                }
            };
            let endpoint = Endpoint {
                handle_created: true,
                peer_closed: state.encountered_error,
                ..Endpoint::default()
            };
            state.endpoints.insert(id, endpoint);
            id
        };
        debug!(interface_id = %id, "endpoint pair created");
        let controller: Arc<dyn AssociatedGroupController> = self.clone();
        (
            ScopedInterfaceEndpointHandle::new(id, true, Arc::clone(&controller)),
            ScopedInterfaceEndpointHandle::new(id, false, controller),
        )
    }

    /// Claim `id`, received from the peer, as a local endpoint.
    ///
    /// Fails, and raises a pipe error, for ids the peer could not have
    /// minted or that were already claimed.
    pub fn create_local_endpoint_handle(
        self: &Arc<Self>,
        id: InterfaceId,
    ) -> Result<ScopedInterfaceEndpointHandle> {
        let claimed = self.claim_endpoint(id);
        if !claimed {
            warn!(interface_id = %id, "rejected interface id");
            self.raise_error();
            return Err(BindingsError::InvalidInterfaceId(id));
        }
        debug!(interface_id = %id, "local endpoint handle created");
        // Messages for the id may have been waiting for it to exist.
        self.process_tasks(ClientCalls::PostOnly);
        Ok(ScopedInterfaceEndpointHandle::new(id, true, self.clone()))
    }

    fn claim_endpoint(&self, id: InterfaceId) -> bool {
        if !id.is_valid() {
            return false;
        }
        // Apart from the primary interface, ids come from the other side and
        // carry the other side's namespace bit.
        if !id.is_master()
            && id.has_namespace_bit() == self.config.set_interface_id_namespace_bit
        {
            return false;
        }
        let mut state = self.state.lock();
        let encountered_error = state.encountered_error;
        let endpoint = state.endpoints.entry(id).or_insert_with(|| Endpoint {
            peer_closed: encountered_error,
            ..Endpoint::default()
        });
        if endpoint.closed || endpoint.handle_created {
            return false;
        }
        endpoint.handle_created = true;
        state.requeue_sync_tasks(id);
        true
    }

    /// Lifecycle flags of `id`, or `None` once the router forgot it.
    pub fn endpoint_status(&self, id: InterfaceId) -> Option<EndpointStatus> {
        self.state.lock().endpoints.get(&id).map(|endpoint| EndpointStatus {
            closed: endpoint.closed,
            peer_closed: endpoint.peer_closed,
            has_client: endpoint.client.is_some(),
        })
    }

    pub fn encountered_error(&self) -> bool {
        self.state.lock().encountered_error
    }

    /// Hold inbound dispatch. Messages keep queueing.
    pub fn pause_incoming_method_call_processing(&self) {
        self.state.lock().paused_incoming = true;
        debug!("incoming dispatch paused");
    }

    pub fn resume_incoming_method_call_processing(&self) {
        self.state.lock().paused_incoming = false;
        debug!("incoming dispatch resumed");
        self.process_tasks(ClientCalls::PostOnly);
    }

    /// Queue outbound messages instead of writing them.
    pub fn pause_outgoing(&self) {
        self.connector.pause();
    }

    /// Write everything queued while paused, in order.
    pub fn resume_outgoing(&self) {
        self.connector.resume();
    }

    /// Close the pipe and fail every endpoint.
    pub fn close_pipe(&self) {
        self.connector.close();
        self.on_pipe_connection_error();
    }

    /// Entry point for every inbound message.
    pub(crate) fn accept(&self, mut message: Message) {
        if message.is_pipe_control() {
            if !self.on_pipe_control_message(&mut message) {
                self.raise_error();
            }
            self.process_tasks(ClientCalls::PostOnly);
            return;
        }

        {
            let mut state = self.state.lock();
            if state.encountered_error {
                trace!("dropping message after pipe error");
                return;
            }
            let id = message.interface_id();
            let is_sync = message.is_sync();
            let seq = state.push_task(QueuedTask::Message(message));
            if is_sync {
                if let Some(endpoint) = state.endpoints.get_mut(&id) {
                    endpoint.sync_tasks.push_back(seq);
                    if let Some(event) = &endpoint.sync_event {
                        event.signal();
                    }
                }
            }
        }
        self.process_tasks(ClientCalls::PostOnly);
    }

    fn on_pipe_control_message(&self, message: &mut Message) -> bool {
        let input = match pipe_control::parse(message) {
            Ok(input) => input,
            Err(err) => {
                warn!(error = %err, code = err.code(), "invalid pipe control message");
                return false;
            }
        };

        let mut state = self.state.lock();
        if state.encountered_error {
            return true;
        }
        match input {
            PipeControlInput::PeerAssociatedEndpointClosed(event) => {
                let id = event.id;
                if !id.is_valid() {
                    return false;
                }
                debug!(interface_id = %id, "peer closed endpoint");
                let endpoint = state.endpoints.entry(id).or_default();
                if event.disconnect_reason.is_some() {
                    endpoint.disconnect_reason = event.disconnect_reason;
                }
                if !endpoint.peer_closed {
                    if endpoint.client.is_some() {
                        state.push_task(QueuedTask::NotifyError(id));
                    }
                    state.update_endpoint(id, StateUpdate::PeerClosed);
                }
                true
            }
            PipeControlInput::AssociatedEndpointClosedBeforeSent(event) => {
                let id = event.id;
                if !id.is_valid() || id.is_master() {
                    return false;
                }
                // Only ids the peer minted, and never claimed here, can have
                // been closed before sending.
                if id.has_namespace_bit() == self.config.set_interface_id_namespace_bit {
                    warn!(interface_id = %id, "closed-before-sent for a locally minted id");
                    return false;
                }
                debug!(interface_id = %id, "peer closed endpoint before sending it");
                let endpoint = state.endpoints.entry(id).or_default();
                if endpoint.closed || endpoint.handle_created {
                    return false;
                }
                state.update_endpoint(id, StateUpdate::Closed);
                drop(state);
                self.connector
                    .send(pipe_control::peer_associated_endpoint_closed(id, None));
                true
            }
        }
    }

    /// Mark every endpoint peer-closed and queue one error notification per
    /// attached client. Runs at most once.
    pub(crate) fn on_pipe_connection_error(&self) {
        {
            let mut state = self.state.lock();
            if state.encountered_error {
                return;
            }
            state.encountered_error = true;
            warn!(endpoints = state.endpoints.len(), "pipe connection error");

            let ids: Vec<InterfaceId> = state.endpoints.keys().copied().collect();
            for id in ids {
                let Some(endpoint) = state.endpoints.get(&id) else {
                    continue;
                };
                if endpoint.peer_closed {
                    continue;
                }
                if endpoint.client.is_some() {
                    state.push_task(QueuedTask::NotifyError(id));
                }
                state.update_endpoint(id, StateUpdate::PeerClosed);
            }
        }
        self.process_tasks(ClientCalls::PostOnly);
    }

    fn tombstone(&self, state: &mut RouterState, id: InterfaceId) {
        // A message for an id nobody claimed: the carrying message was
        // dropped, or the peer is misbehaving. Tell the peer it is closed.
        debug!(interface_id = %id, "message for unknown endpoint");
        state.endpoints.insert(
            id,
            Endpoint {
                closed: true,
                ..Endpoint::default()
            },
        );
        self.connector
            .send(pipe_control::peer_associated_endpoint_closed(id, None));
    }

    fn process_tasks(&self, calls: ClientCalls) {
        let mut to_post = Vec::new();
        let mut state = self.state.lock();
        while !state.paused_incoming {
            let Some((client, dispatch)) = self.next_dispatch(&mut state, calls, &mut to_post)
            else {
                break;
            };
            state.in_flight += 1;
            drop(state);
            let handled = match dispatch {
                Dispatch::Message(message) => client.handle_incoming_message(message),
                Dispatch::Error(reason) => {
                    client.notify_error(reason);
                    true
                }
            };
            if !handled {
                warn!("endpoint client rejected a message");
                self.raise_error();
            }
            state = self.state.lock();
            state.in_flight -= 1;
        }
        drop(state);

        for runner in to_post {
            self.post_dispatch(runner);
        }
    }

    /// Find the oldest task that can be delivered right now. Tasks of an
    /// endpoint that cannot take delivery block the later tasks of that
    /// endpoint only.
    fn next_dispatch(
        &self,
        state: &mut RouterState,
        calls: ClientCalls,
        to_post: &mut Vec<Arc<dyn TaskRunner>>,
    ) -> Option<(Arc<dyn EndpointClient>, Dispatch)> {
        let mut blocked: HashSet<InterfaceId> = HashSet::new();
        let seqs: Vec<u64> = state.tasks.keys().copied().collect();
        for seq in seqs {
            let Some(task) = state.tasks.get(&seq) else {
                continue;
            };
            let id = task.interface_id();
            let is_error = matches!(task, QueuedTask::NotifyError(_));
            if blocked.contains(&id) {
                continue;
            }

            let Some(endpoint) = state.endpoints.get(&id) else {
                if is_error {
                    state.tasks.remove(&seq);
                    continue;
                }
                // The primary interface is claimed locally on both sides. For
                // other ids, an earlier message, or one being dispatched, may
                // carry the id and claim it.
                if id.is_master() || !blocked.is_empty() || state.in_flight > 0 {
                    blocked.insert(id);
                    continue;
                }
                state.tasks.remove(&seq);
                self.tombstone(state, id);
                continue;
            };

            if endpoint.closed {
                state.tasks.remove(&seq);
                continue;
            }
            let client = endpoint.client.as_ref().and_then(Weak::upgrade);
            let (Some(client), Some(runner)) = (client, endpoint.runner.clone()) else {
                if is_error {
                    state.tasks.remove(&seq);
                } else {
                    blocked.insert(id);
                }
                continue;
            };
            if calls == ClientCalls::PostOnly || !runner.runs_tasks_on_current_thread() {
                if !state.posted.iter().any(|posted| Arc::ptr_eq(posted, &runner)) {
                    state.posted.push(Arc::clone(&runner));
                    to_post.push(runner);
                }
                blocked.insert(id);
                continue;
            }

            let reason = endpoint.disconnect_reason.clone();
            let dispatch = match state.tasks.remove(&seq)? {
                QueuedTask::Message(message) => {
                    if let Some(endpoint) = state.endpoints.get_mut(&id) {
                        endpoint.sync_tasks.retain(|queued| *queued != seq);
                    }
                    Dispatch::Message(message)
                }
                QueuedTask::NotifyError(_) => Dispatch::Error(reason),
            };
            return Some((client, dispatch));
        }
        None
    }

    fn post_dispatch(&self, runner: Arc<dyn TaskRunner>) {
        let router = self.weak_self.clone();
        let posted = runner.post_task(Box::new(move || {
            let Some(router) = router.upgrade() else {
                return;
            };
            router
                .state
                .lock()
                .posted
                .retain(|runner| !runner.runs_tasks_on_current_thread());
            router.process_tasks(ClientCalls::AllowDirect);
        }));
        if !posted {
            warn!("task runner stopped; dispatch dropped");
            self.state
                .lock()
                .posted
                .retain(|queued| !Arc::ptr_eq(queued, &runner));
        }
    }

    /// Dispatch the oldest queued sync message of `id` inline. Called from a
    /// sync wait on the endpoint's runner.
    fn process_first_sync_message(&self, id: InterfaceId) -> bool {
        let (client, message) = {
            let mut state = self.state.lock();
            let Some(endpoint) = state.endpoints.get_mut(&id) else {
                return false;
            };
            let Some(seq) = endpoint.sync_tasks.pop_front() else {
                return false;
            };
            if !endpoint.sync_tasks.is_empty() {
                if let Some(event) = &endpoint.sync_event {
                    event.signal();
                }
            }
            let client = endpoint.client.as_ref().and_then(Weak::upgrade);
            let closed = endpoint.closed;
            let Some(QueuedTask::Message(message)) = state.tasks.remove(&seq) else {
                return false;
            };
            if closed {
                return true;
            }
            let Some(client) = client else {
                // Detached while signaled; leave it for the next client.
                state.tasks.insert(seq, QueuedTask::Message(message));
                if let Some(endpoint) = state.endpoints.get_mut(&id) {
                    endpoint.sync_tasks.push_front(seq);
                }
                return false;
            };
            state.in_flight += 1;
            (client, message)
        };

        trace!(interface_id = %id, "dispatching sync message inline");
        if !client.handle_incoming_message(message) {
            warn!(interface_id = %id, "endpoint client rejected a sync message");
            self.raise_error();
        }
        self.state.lock().in_flight -= 1;
        // Anything held back while the call ran goes out through the runners.
        self.process_tasks(ClientCalls::PostOnly);
        true
    }

    fn handle_sync_event(&self, id: InterfaceId) {
        if self.process_first_sync_message(id) {
            return;
        }
        let client = {
            let state = self.state.lock();
            state
                .endpoints
                .get(&id)
                .filter(|endpoint| endpoint.peer_closed && endpoint.sync_tasks.is_empty())
                .and_then(|endpoint| endpoint.client.as_ref())
                .and_then(Weak::upgrade)
        };
        if let Some(client) = client {
            client.on_sync_peer_closed();
        }
    }
}

impl AssociatedGroupController for MultiplexRouter {
    fn close_endpoint_handle(
        &self,
        id: InterfaceId,
        is_local: bool,
        reason: Option<DisconnectReason>,
    ) {
        if !id.is_valid() {
            return;
        }
        if !is_local {
            debug!(interface_id = %id, "remote endpoint handle dropped before sending");
            if !self.encountered_error() {
                self.connector
                    .send(pipe_control::associated_endpoint_closed_before_sent(id));
            }
            return;
        }

        let (event, send_notice) = {
            let mut state = self.state.lock();
            let endpoint = state.endpoints.get_mut(&id);
            let Some(endpoint) = endpoint.filter(|endpoint| !endpoint.closed) else {
                panic!("endpoint {id} closed twice");
            };
            endpoint.client = None;
            endpoint.runner = None;
            let event = endpoint.sync_event.take();
            state.update_endpoint(id, StateUpdate::Closed);
            let send_notice = !state.encountered_error && (!id.is_master() || reason.is_some());
            (event, send_notice)
        };
        drop(event);
        debug!(interface_id = %id, "endpoint closed");

        if send_notice {
            self.connector
                .send(pipe_control::peer_associated_endpoint_closed(id, reason));
        }
        self.process_tasks(ClientCalls::PostOnly);
    }

    fn attach_endpoint_client(
        &self,
        handle: &ScopedInterfaceEndpointHandle,
        client: Weak<dyn EndpointClient>,
        runner: Arc<dyn TaskRunner>,
        expects_sync_requests: bool,
    ) -> SyncKey {
        assert!(
            runner.runs_tasks_on_current_thread(),
            "endpoint clients must be attached on their task runner"
        );
        let id = handle.id();
        let router = self.weak_self.clone();
        let event = SyncRegistry::current().register(
            move || {
                if let Some(router) = router.upgrade() {
                    router.handle_sync_event(id);
                }
            },
            expects_sync_requests,
        );
        let key = event.key();

        {
            let mut state = self.state.lock();
            let has_sync_tasks = state.requeue_sync_tasks(id);
            let Some(endpoint) = state.endpoints.get_mut(&id) else {
                panic!("attaching a client to unknown endpoint {id}");
            };
            assert!(!endpoint.closed, "attaching a client to closed endpoint {id}");
            assert!(
                endpoint.client.is_none(),
                "endpoint {id} already has a client"
            );
            endpoint.client = Some(client);
            endpoint.runner = Some(runner);
            if has_sync_tasks {
                event.signal();
            }
            endpoint.sync_event = Some(event);
            if endpoint.peer_closed {
                state.push_task(QueuedTask::NotifyError(id));
            }
        }
        debug!(interface_id = %id, "client attached");

        self.process_tasks(ClientCalls::PostOnly);
        key
    }

    fn detach_endpoint_client(&self, handle: &ScopedInterfaceEndpointHandle) {
        let event = {
            let mut state = self.state.lock();
            let Some(endpoint) = state.endpoints.get_mut(&handle.id()) else {
                return;
            };
            endpoint.client = None;
            endpoint.runner = None;
            endpoint.sync_event.take()
        };
        drop(event);
        debug!(interface_id = %handle.id(), "client detached");
    }

    fn send_message(&self, message: Message) -> bool {
        if self.encountered_error() {
            debug!(
                interface_id = %message.interface_id(),
                name = message.name(),
                "dropping send after pipe error"
            );
            return false;
        }
        self.connector.send(message)
    }

    fn raise_error(&self) {
        if self.config.testing_mode {
            warn!("pipe error swallowed in testing mode");
            return;
        }
        if !self.connector.is_closed() {
            self.connector.close();
        }
        self.on_pipe_connection_error();
    }

    fn is_peer_closed(&self, id: InterfaceId) -> bool {
        self.state
            .lock()
            .endpoints
            .get(&id)
            .is_none_or(|endpoint| endpoint.peer_closed)
    }
}

impl std::fmt::Debug for MultiplexRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexRouter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
