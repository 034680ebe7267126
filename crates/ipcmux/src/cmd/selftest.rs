use std::sync::{mpsc, Arc, Weak};
use std::time::{Duration, Instant};

use ipcmux_bindings::{
    ClientConfig, DisconnectReason, InterfaceEndpointClient, MessageReceiver, MultiplexRouter,
    Responder, RouterConfig, TaskRunner, ThreadTaskRunner,
};
use ipcmux_transport::MemoryPipe;
use ipcmux_wire::{
    AssociatedInterfaceRequest, Decoder, Encoder, InterfaceId, Message, MessageFlags,
    StructHeader, StructVersion, ValidateParams, ValidationContext, Wire, WireStruct,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::{parse_duration, SelftestArgs};
use crate::exit::{
    bindings_error, CliError, CliResult, HEALTH_CHECK_FAILED, INTERNAL, SUCCESS, TIMEOUT,
};
use crate::output::{print_json, OutputFormat};

const SERVICE_VERSION: u32 = 3;
const DOUBLE: u32 = 1;
const BIND: u32 = 2;
const CLOSE_REASON: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Number {
    value: u32,
}

impl WireStruct for Number {
    const VERSIONS: &'static [StructVersion] = &[StructVersion::new(0, 16)];

    fn encode_fields(self, enc: &mut Encoder<'_>, base: usize) {
        self.value.encode(enc, base + 8);
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
        Ok(Number {
            value: u32::decode(dec, base + 8)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Bind {
    request: AssociatedInterfaceRequest,
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

/// Receiver for endpoints that only ever see the error path.
struct Idle;

impl MessageReceiver for Idle {
    fn accept(&self, _message: Message) -> bool {
        true
    }
}

/// The remote side: doubles numbers and binds endpoints sent to it.
struct Service {
    router: Weak<MultiplexRouter>,
    runner: Arc<ThreadTaskRunner>,
    closed: mpsc::Sender<Option<DisconnectReason>>,
    bound: Mutex<Vec<InterfaceEndpointClient>>,
}

impl MessageReceiver for Service {
    fn accept(&self, mut message: Message) -> bool {
        if message.name() != BIND {
            return false;
        }
        let Ok(bind) = message.read_payload::<Bind>() else {
            return false;
        };
        let Some(router) = self.router.upgrade() else {
            return false;
        };
        let Ok(handle) = router.create_local_endpoint_handle(bind.request.id) else {
            return false;
        };
        let runner: Arc<dyn TaskRunner> = self.runner.clone();
        let Ok(client) =
            InterfaceEndpointClient::new(handle, Arc::new(Idle), runner, ClientConfig::default())
        else {
            return false;
        };
        let closed = self.closed.clone();
        client.set_connection_error_handler(move |reason| {
            let _ = closed.send(reason);
        });
        debug!(interface_id = %bind.request.id, "selftest endpoint bound");
        self.bound.lock().push(client);
        true
    }

    fn accept_with_responder(&self, mut message: Message, responder: Responder) -> bool {
        if message.name() != DOUBLE {
            return false;
        }
        let Ok(number) = message.read_payload::<Number>() else {
            return false;
        };
        responder.respond(
            DOUBLE,
            Number {
                value: number.value.wrapping_mul(2),
            },
        )
    }
}

struct Side {
    router: Arc<MultiplexRouter>,
    runner: Arc<ThreadTaskRunner>,
}

impl Side {
    fn start(pipe: MemoryPipe, namespace_bit: bool, name: &str) -> CliResult<Self> {
        let config = RouterConfig::default()
            .with_namespace_bit(namespace_bit)
            .with_reader_thread_name(format!("selftest-{name}-reader"));
        let router =
            MultiplexRouter::new(pipe, config).map_err(|err| bindings_error("start router", err))?;
        let runner = ThreadTaskRunner::new(format!("selftest-{name}"))
            .map_err(|err| bindings_error("start runner", err))?;
        Ok(Self { router, runner })
    }

    fn master(
        &self,
        receiver: Arc<dyn MessageReceiver>,
        config: ClientConfig,
    ) -> CliResult<Arc<InterfaceEndpointClient>> {
        let handle = self
            .router
            .create_local_endpoint_handle(InterfaceId::MASTER)
            .map_err(|err| bindings_error("claim primary interface", err))?;
        let runner: Arc<dyn TaskRunner> = self.runner.clone();
        self.runner
            .run_blocking(move || InterfaceEndpointClient::new(handle, receiver, runner, config))
            .and_then(|client| client)
            .map(Arc::new)
            .map_err(|err| bindings_error("attach client", err))
    }
}

impl Drop for Side {
    fn drop(&mut self) {
        self.router.close_pipe();
        self.runner.shutdown();
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
    elapsed_ms: f64,
}

#[derive(Debug, Serialize)]
struct SelftestOutput {
    schema_id: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: SelftestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let checks = run_checks(timeout)?;

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = SelftestOutput {
        schema_id: "https://schemas.3leaps.dev/ipcmux/cli/v1/selftest-report.schema.json",
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };
    print_selftest(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn run_checks(timeout: Duration) -> CliResult<Vec<CheckResult>> {
    let (pipe_a, pipe_b) = MemoryPipe::pair();
    let a = Side::start(pipe_a, true, "a")?;
    let b = Side::start(pipe_b, false, "b")?;

    let (closed_tx, closed_rx) = mpsc::channel();
    let service = Arc::new(Service {
        router: Arc::downgrade(&b.router),
        runner: Arc::clone(&b.runner),
        closed: closed_tx,
        bound: Mutex::new(Vec::new()),
    });
    let b_master = b.master(
        service.clone(),
        ClientConfig::default().with_interface_version(SERVICE_VERSION),
    )?;
    let a_master = a.master(Arc::new(Idle), ClientConfig::default())?;

    let checks = vec![
        check("sync_call", || sync_call(&a, &a_master, timeout)),
        check("query_version", || query_version(&a_master, timeout)),
        check("associated_close", || {
            associated_close(&a, &a_master, &closed_rx, timeout)
        }),
    ];

    let bound = std::mem::take(&mut *service.bound.lock());
    let _ = b.runner.run_blocking(move || drop(bound));
    drop_on(&b.runner, b_master);
    drop_on(&a.runner, a_master);
    Ok(checks)
}

fn check(name: &'static str, f: impl FnOnce() -> Result<String, String>) -> CheckResult {
    let start = Instant::now();
    let result = f();
    let elapsed_ms = (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
    match result {
        Ok(detail) => {
            info!(check = name, elapsed_ms, "selftest check passed");
            CheckResult {
                name,
                status: CheckStatus::Pass,
                detail,
                elapsed_ms,
            }
        }
        Err(detail) => CheckResult {
            name,
            status: CheckStatus::Fail,
            detail,
            elapsed_ms,
        },
    }
}

fn sync_call(
    side: &Side,
    client: &Arc<InterfaceEndpointClient>,
    timeout: Duration,
) -> Result<String, String> {
    let client = Arc::clone(client);
    let request = Message::new(
        DOUBLE,
        MessageFlags::EXPECTS_RESPONSE | MessageFlags::IS_SYNC,
        Number { value: 21 },
    );
    let reply = on_runner(&side.runner, timeout, move || {
        client
            .accept_sync(request)
            .and_then(|mut reply| Ok(reply.read_payload::<Number>()?))
    })
    .map_err(|err| err.to_string())?
    .map_err(|err| format!("sync call failed: {err}"))?;

    if reply.value == 42 {
        Ok("21 doubled to 42".to_string())
    } else {
        Err(format!("expected 42, got {}", reply.value))
    }
}

fn query_version(
    client: &Arc<InterfaceEndpointClient>,
    timeout: Duration,
) -> Result<String, String> {
    let (tx, rx) = mpsc::channel();
    if !client.query_version(move |version| {
        let _ = tx.send(version);
    }) {
        return Err("query could not be sent".to_string());
    }
    match rx.recv_timeout(timeout) {
        Ok(SERVICE_VERSION) => Ok(format!("peer implements version {SERVICE_VERSION}")),
        Ok(other) => Err(format!("expected version {SERVICE_VERSION}, got {other}")),
        Err(_) => Err(format!("no answer within {timeout:?}")),
    }
}

fn associated_close(
    side: &Side,
    master: &Arc<InterfaceEndpointClient>,
    closed: &mpsc::Receiver<Option<DisconnectReason>>,
    timeout: Duration,
) -> Result<String, String> {
    let (local, remote) = side.router.create_endpoint_pair();
    let id = local.id();
    let runner: Arc<dyn TaskRunner> = side.runner.clone();
    let client = side
        .runner
        .run_blocking(move || {
            InterfaceEndpointClient::new(local, Arc::new(Idle), runner, ClientConfig::default())
        })
        .and_then(|client| client)
        .map_err(|err| format!("attach failed: {err}"))?;

    let bind = Message::new(
        BIND,
        MessageFlags::empty(),
        Bind {
            request: AssociatedInterfaceRequest {
                id: remote.release_for_sending(),
            },
        },
    );
    if !master.accept(bind) {
        return Err("bind could not be sent".to_string());
    }

    on_runner(&side.runner, timeout, move || {
        client.close_with_reason(CLOSE_REASON, "selftest complete");
    })
    .map_err(|err| err.to_string())?;

    match closed.recv_timeout(timeout) {
        Ok(Some(reason)) if reason.custom_reason == CLOSE_REASON => Ok(format!(
            "endpoint {id} closed with \"{}\"",
            reason.description
        )),
        Ok(reason) => Err(format!("unexpected disconnect reason {reason:?}")),
        Err(_) => Err(format!("peer did not see the close within {timeout:?}")),
    }
}

/// Run `f` on `runner`, giving up after `timeout`.
fn on_runner<R, F>(runner: &ThreadTaskRunner, timeout: Duration, f: F) -> CliResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    if !runner.post_task(Box::new(move || {
        let _ = tx.send(f());
    })) {
        return Err(CliError::new(INTERNAL, format!("{} stopped", runner.name())));
    }
    rx.recv_timeout(timeout).map_err(|_| {
        CliError::new(
            TIMEOUT,
            format!("{} did not finish within {timeout:?}", runner.name()),
        )
    })
}

fn drop_on(runner: &ThreadTaskRunner, client: Arc<InterfaceEndpointClient>) {
    let _ = runner.run_blocking(move || drop(client));
}

fn print_selftest(output: &SelftestOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("ipcmux selftest\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {:>8.2}ms  {}",
                    status_text(c.status),
                    c.name,
                    c.elapsed_ms,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
    }
}
