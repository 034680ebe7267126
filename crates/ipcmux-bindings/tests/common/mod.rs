#![allow(dead_code)]

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use ipcmux_bindings::{
    ClientConfig, InterfaceEndpointClient, MessageReceiver, MultiplexRouter, Responder,
    RouterConfig, ThreadTaskRunner,
};
use ipcmux_transport::MemoryPipe;
use ipcmux_wire::{
    AssociatedInterfaceRequest, Decoder, Encoder, InterfaceId, Message, MessageFlags,
    StructHeader, StructVersion, ValidateParams, ValidationContext, Wire, WireStruct,
};
use parking_lot::Mutex;

pub const VALUE: u32 = 1;
pub const BIND: u32 = 2;
pub const CALL: u32 = 3;
pub const DOUBLE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub n: u32,
}

impl WireStruct for Value {
    const VERSIONS: &'static [StructVersion] = &[StructVersion::new(0, 16)];

    fn encode_fields(self, enc: &mut Encoder<'_>, base: usize) {
        self.n.encode(enc, base + 8);
    }

    fn validate_fields(
        _ctx: &mut ValidationContext<'_>,
        _base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<()> {
        Ok(())
    }

    fn decode_fields(
        dec: &mut Decoder<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<Self> {
        Ok(Value {
            n: u32::decode(dec, base + 8)?,
        })
    }
}

/// Carries the remote half of an endpoint pair.
#[derive(Debug, Clone, Copy)]
pub struct Bind {
    pub request: AssociatedInterfaceRequest,
}

impl WireStruct for Bind {
    const VERSIONS: &'static [StructVersion] = &[StructVersion::new(0, 16)];

    fn encode_fields(self, enc: &mut Encoder<'_>, base: usize) {
        self.request.encode(enc, base + 8);
    }

    fn validate_fields(
        ctx: &mut ValidationContext<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<()> {
        AssociatedInterfaceRequest::validate(ctx, base + 8, &ValidateParams::DEFAULT)
    }

    fn decode_fields(
        dec: &mut Decoder<'_>,
        base: usize,
        _header: &StructHeader,
    ) -> ipcmux_wire::Result<Self> {
        Ok(Bind {
            request: AssociatedInterfaceRequest::decode(dec, base + 8)?,
        })
    }
}

pub fn value(n: u32) -> Message {
    Message::new(VALUE, MessageFlags::empty(), Value { n })
}

pub fn sync_request(name: u32, n: u32) -> Message {
    Message::new(
        name,
        MessageFlags::EXPECTS_RESPONSE | MessageFlags::IS_SYNC,
        Value { n },
    )
}

pub fn bind(id: InterfaceId) -> Message {
    Message::new(
        BIND,
        MessageFlags::empty(),
        Bind {
            request: AssociatedInterfaceRequest { id },
        },
    )
}

/// One side of a connected pair of routers.
pub struct Side {
    pub router: Arc<MultiplexRouter>,
    pub runner: Arc<ThreadTaskRunner>,
}

impl Side {
    /// Build a client for `handle` on this side's runner.
    pub fn client(
        &self,
        handle: ipcmux_bindings::ScopedInterfaceEndpointHandle,
        receiver: Arc<dyn MessageReceiver>,
        config: ClientConfig,
    ) -> Arc<InterfaceEndpointClient> {
        let runner = Arc::clone(&self.runner);
        self.runner
            .run_blocking(move || InterfaceEndpointClient::new(handle, receiver, runner, config))
            .expect("runner should be alive")
            .map(Arc::new)
            .expect("client should attach")
    }

    pub fn master(
        &self,
        receiver: Arc<dyn MessageReceiver>,
        config: ClientConfig,
    ) -> Arc<InterfaceEndpointClient> {
        let handle = self
            .router
            .create_local_endpoint_handle(InterfaceId::MASTER)
            .expect("master id should be claimable");
        self.client(handle, receiver, config)
    }

    pub fn on_runner<R, F>(&self, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.runner.run_blocking(f).expect("runner should be alive")
    }
}

pub fn connected_pair(config: RouterConfig) -> (Side, Side) {
    let (a, b) = MemoryPipe::pair();
    let side = |pipe: MemoryPipe, namespace_bit: bool, name: &str| Side {
        router: MultiplexRouter::new(
            pipe,
            config
                .clone()
                .with_namespace_bit(namespace_bit)
                .with_reader_thread_name(format!("{name}-reader")),
        )
        .expect("router should start"),
        runner: ThreadTaskRunner::new(format!("{name}-runner")).expect("runner should start"),
    };
    (side(a, true, "a"), side(b, false, "b"))
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Ignores everything.
pub struct Null;

impl MessageReceiver for Null {
    fn accept(&self, _message: Message) -> bool {
        true
    }
}

/// Records `(interface id, value)` for every one-way [`VALUE`] message.
#[derive(Default)]
pub struct Recorder {
    pub seen: Mutex<Vec<(InterfaceId, u32)>>,
}

impl Recorder {
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn values_for(&self, id: InterfaceId) -> Vec<u32> {
        self.seen
            .lock()
            .iter()
            .filter(|(seen_id, _)| *seen_id == id)
            .map(|(_, n)| *n)
            .collect()
    }
}

impl MessageReceiver for Recorder {
    fn accept(&self, mut message: Message) -> bool {
        let id = message.interface_id();
        match message.read_payload::<Value>() {
            Ok(value) => {
                self.seen.lock().push((id, value.n));
                true
            }
            Err(_) => false,
        }
    }
}

/// Answers [`DOUBLE`] with twice the value.
pub struct Doubler;

impl MessageReceiver for Doubler {
    fn accept(&self, _message: Message) -> bool {
        false
    }

    fn accept_with_responder(&self, mut message: Message, responder: Responder) -> bool {
        let Ok(value) = message.read_payload::<Value>() else {
            return false;
        };
        responder.respond(DOUBLE, Value { n: value.n * 2 })
    }
}

/// Primary-interface receiver that claims endpoints sent with [`BIND`],
/// records values, and answers [`CALL`] by calling back over the most
/// recently bound endpoint.
pub struct Acceptor {
    router: Weak<MultiplexRouter>,
    runner: Arc<ThreadTaskRunner>,
    pub recorder: Arc<Recorder>,
    pub bound: Mutex<Vec<Arc<InterfaceEndpointClient>>>,
    bound_config: ClientConfig,
}

impl Acceptor {
    pub fn new(side: &Side, recorder: Arc<Recorder>, bound_config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            router: Arc::downgrade(&side.router),
            runner: Arc::clone(&side.runner),
            recorder,
            bound: Mutex::new(Vec::new()),
            bound_config,
        })
    }
}

impl MessageReceiver for Acceptor {
    fn accept(&self, mut message: Message) -> bool {
        match message.name() {
            BIND => {
                let Ok(bind) = message.read_payload::<Bind>() else {
                    return false;
                };
                let Some(router) = self.router.upgrade() else {
                    return false;
                };
                let Ok(handle) = router.create_local_endpoint_handle(bind.request.id) else {
                    return false;
                };
                let runner: Arc<ThreadTaskRunner> = Arc::clone(&self.runner);
                match InterfaceEndpointClient::new(
                    handle,
                    self.recorder.clone(),
                    runner,
                    self.bound_config.clone(),
                ) {
                    Ok(client) => {
                        self.bound.lock().push(Arc::new(client));
                        true
                    }
                    Err(_) => false,
                }
            }
            _ => self.recorder.accept(message),
        }
    }

    fn accept_with_responder(&self, mut message: Message, responder: Responder) -> bool {
        if message.name() != CALL {
            return false;
        }
        let Ok(value) = message.read_payload::<Value>() else {
            return false;
        };
        let Some(callback) = self.bound.lock().last().cloned() else {
            return false;
        };
        let Ok(mut reply) = callback.accept_sync(sync_request(DOUBLE, value.n)) else {
            return false;
        };
        let Ok(doubled) = reply.read_payload::<Value>() else {
            return false;
        };
        responder.respond(CALL, Value { n: doubled.n + 1 })
    }
}
