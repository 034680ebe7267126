mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::*;
use ipcmux_bindings::{
    BindingsError, ClientConfig, InterfaceEndpointClient, MultiplexRouter, RouterConfig,
    TaskRunner, ThreadTaskRunner,
};
use ipcmux_transport::{MemoryPipe, MessagePipe, Packet};
use ipcmux_wire::{InterfaceId, Message, MessageFlags, ValidationError};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn messages_keep_their_order_per_endpoint() {
    let (a, b) = connected_pair(RouterConfig::default());
    let recorder = Arc::new(Recorder::default());
    let acceptor = Acceptor::new(&b, recorder.clone(), ClientConfig::default());
    let _b_master = b.master(acceptor.clone(), ClientConfig::default());

    let a_master = a.master(Arc::new(Null), ClientConfig::default());
    let (local, remote) = a.router.create_endpoint_pair();
    let associated_id = local.id();
    let associated = a.client(local, Arc::new(Null), ClientConfig::default());

    assert!(a_master.accept(bind(remote.release_for_sending())));
    for n in 0..50 {
        assert!(a_master.accept(value(n)));
        assert!(associated.accept(value(n)));
    }

    assert!(wait_until(TIMEOUT, || recorder.len() == 100));
    assert_eq!(
        recorder.values_for(InterfaceId::MASTER),
        (0..50).collect::<Vec<_>>()
    );
    assert_eq!(
        recorder.values_for(associated_id),
        (0..50).collect::<Vec<_>>()
    );
}

#[test]
fn nested_sync_calls_do_not_deadlock() {
    let (a, b) = connected_pair(RouterConfig::default());
    let acceptor = Acceptor::new(
        &b,
        Arc::new(Recorder::default()),
        ClientConfig::default(),
    );
    let _b_master = b.master(acceptor, ClientConfig::default());

    let a_master = a.master(Arc::new(Null), ClientConfig::default());
    let (local, remote) = a.router.create_endpoint_pair();
    // Runs while a's runner is blocked on its own call.
    let _doubler = a.client(
        local,
        Arc::new(Doubler),
        ClientConfig::default().with_expects_sync_requests(true),
    );
    assert!(a_master.accept(bind(remote.release_for_sending())));

    let caller = Arc::clone(&a_master);
    let result = a.on_runner(move || {
        caller
            .accept_sync(sync_request(CALL, 20))
            .and_then(|mut reply| Ok(reply.read_payload::<Value>()?))
    });
    assert_eq!(result.unwrap(), Value { n: 41 });
}

#[test]
fn dropping_an_unsent_endpoint_reaches_the_peer() {
    let (a, b) = connected_pair(RouterConfig::default());
    let _a_master = a.master(Arc::new(Null), ClientConfig::default());
    let _b_master = b.master(Arc::new(Null), ClientConfig::default());

    let (local, remote) = a.router.create_endpoint_pair();
    let id = local.id();
    let client = a.client(local, Arc::new(Null), ClientConfig::default());
    let (tx, rx) = mpsc::channel();
    client.set_connection_error_handler(move |reason| {
        let _ = tx.send(reason);
    });

    drop(remote);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), None);
    assert!(client.encountered_error());
    assert!(wait_until(TIMEOUT, || b
        .router
        .endpoint_status(id)
        .is_some_and(|status| status.closed && !status.peer_closed)));

    // Closing the local end completes the handshake on both sides.
    drop(client);
    assert!(wait_until(TIMEOUT, || a.router.endpoint_status(id).is_none()));
    assert!(wait_until(TIMEOUT, || b.router.endpoint_status(id).is_none()));
}

#[test]
fn ids_from_both_sides_never_collide() {
    let (a, b) = connected_pair(RouterConfig::default());
    let mint = |router: Arc<MultiplexRouter>| {
        thread::spawn(move || {
            (0..200)
                .map(|_| {
                    let (local, remote) = router.create_endpoint_pair();
                    let id = remote.release_for_sending();
                    (id, local)
                })
                .collect::<Vec<_>>()
        })
    };
    let from_a = mint(Arc::clone(&a.router));
    let from_b = mint(Arc::clone(&b.router));
    let from_a = from_a.join().unwrap();
    let from_b = from_b.join().unwrap();

    let ids_a: HashSet<InterfaceId> = from_a.iter().map(|(id, _)| *id).collect();
    let ids_b: HashSet<InterfaceId> = from_b.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids_a.len(), 200);
    assert_eq!(ids_b.len(), 200);
    assert!(ids_a.is_disjoint(&ids_b));
    assert!(ids_a.iter().all(|id| id.has_namespace_bit()));
    assert!(ids_b.iter().all(|id| !id.has_namespace_bit()));
}

#[test]
fn require_version_above_implementation_closes_endpoint() {
    let (a, b) = connected_pair(RouterConfig::default());
    let recorder = Arc::new(Recorder::default());
    let b_master = b.master(
        recorder.clone(),
        ClientConfig::default().with_interface_version(3),
    );
    let a_master = a.master(Arc::new(Null), ClientConfig::default());
    let (tx, rx) = mpsc::channel();
    a_master.set_connection_error_handler(move |reason| {
        let _ = tx.send(reason);
    });

    assert!(a_master.require_version(5));
    assert!(a_master.accept(value(1)));

    let reason = rx.recv_timeout(TIMEOUT).unwrap().expect("reason should be sent");
    assert!(reason.description.contains("version 5 required"));
    assert!(b_master.encountered_error());
    assert_eq!(recorder.len(), 0);
}

#[test]
fn version_query_and_flush() {
    let (a, b) = connected_pair(RouterConfig::default());
    let _b_master = b.master(
        Arc::new(Null),
        ClientConfig::default().with_interface_version(7),
    );
    let a_master = a.master(Arc::new(Null), ClientConfig::default());

    let (tx, rx) = mpsc::channel();
    assert!(a_master.query_version(move |version| {
        let _ = tx.send(version);
    }));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 7);

    let flusher = Arc::clone(&a_master);
    a.on_runner(move || flusher.flush_for_testing()).unwrap();
}

#[test]
fn pipe_error_reaches_every_client_once() {
    let (a, b) = connected_pair(RouterConfig::default());
    let recorder = Arc::new(Recorder::default());
    let acceptor = Acceptor::new(&b, recorder, ClientConfig::default());
    let b_master = b.master(acceptor.clone(), ClientConfig::default());
    let a_master = a.master(Arc::new(Null), ClientConfig::default());
    let (local, remote) = a.router.create_endpoint_pair();
    let _a_associated = a.client(local, Arc::new(Null), ClientConfig::default());
    assert!(a_master.accept(bind(remote.release_for_sending())));
    assert!(wait_until(TIMEOUT, || acceptor.bound.lock().len() == 1));

    let errors = Arc::new(AtomicUsize::new(0));
    let watch = |client: &ipcmux_bindings::InterfaceEndpointClient| {
        let errors = Arc::clone(&errors);
        client.set_connection_error_handler(move |_| {
            errors.fetch_add(1, Ordering::SeqCst);
        });
    };
    watch(&b_master);
    let b_associated = acceptor.bound.lock()[0].clone();
    watch(&b_associated);

    a.router.close_pipe();
    assert!(wait_until(TIMEOUT, || errors.load(Ordering::SeqCst) == 2));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(errors.load(Ordering::SeqCst), 2);
    assert!(b.router.encountered_error());
    assert!(!b_master.accept(value(1)));
}

#[test]
fn malformed_input_closes_the_pipe() {
    let (ours, peer) = MemoryPipe::pair();
    let router = MultiplexRouter::new(ours, RouterConfig::default()).unwrap();
    peer.write(Packet::new(vec![0u8; 4])).unwrap();
    assert!(wait_until(TIMEOUT, || router.encountered_error()));
    assert!(peer.read().is_err());
}

#[test]
fn testing_mode_swallows_malformed_input() {
    let (ours, peer) = MemoryPipe::pair();
    let router =
        MultiplexRouter::new(ours, RouterConfig::default().with_testing_mode(true)).unwrap();
    peer.write(Packet::new(vec![0u8; 4])).unwrap();
    // A valid message after the bad one is still read.
    let control = ipcmux_bindings::pipe_control::associated_endpoint_closed_before_sent(
        InterfaceId::from_raw(0x8000_0001),
    );
    peer.write(control.into_packet()).unwrap();

    assert!(wait_until(TIMEOUT, || router
        .endpoint_status(InterfaceId::from_raw(0x8000_0001))
        .is_some()));
    assert!(!router.encountered_error());
}

#[test]
fn rejected_payload_tears_down_the_pipe() {
    let (a, b) = connected_pair(RouterConfig::default());
    let _b_master = b.master(
        Arc::new(Recorder::default()),
        ClientConfig::default().with_validator(|_| Err(ValidationError::IllegalPointer)),
    );
    let a_master = a.master(Arc::new(Null), ClientConfig::default());
    let (tx, rx) = mpsc::channel();
    a_master.set_connection_error_handler(move |_| {
        let _ = tx.send(());
    });

    assert!(a_master.accept(value(9)));
    rx.recv_timeout(TIMEOUT).unwrap();
    assert!(b.router.encountered_error());
    assert!(a.router.encountered_error());
}

#[test]
fn paused_dispatch_holds_messages() {
    let (a, b) = connected_pair(RouterConfig::default());
    let recorder = Arc::new(Recorder::default());
    let _b_master = b.master(recorder.clone(), ClientConfig::default());
    let a_master = a.master(Arc::new(Null), ClientConfig::default());

    b.router.pause_incoming_method_call_processing();
    for n in 0..3 {
        assert!(a_master.accept(value(n)));
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.len(), 0);

    b.router.resume_incoming_method_call_processing();
    assert!(wait_until(TIMEOUT, || recorder.len() == 3));
    assert_eq!(recorder.values_for(InterfaceId::MASTER), vec![0, 1, 2]);
}

#[test]
fn messages_wait_for_a_late_client() {
    let (a, b) = connected_pair(RouterConfig::default());
    let a_master = a.master(Arc::new(Null), ClientConfig::default());
    for n in 0..3 {
        assert!(a_master.accept(value(n)));
    }
    thread::sleep(Duration::from_millis(50));
    assert!(b.router.endpoint_status(InterfaceId::MASTER).is_none());
    assert!(!b.router.encountered_error());

    let recorder = Arc::new(Recorder::default());
    let _b_master = b.master(recorder.clone(), ClientConfig::default());
    assert!(wait_until(TIMEOUT, || recorder.len() == 3));
    assert_eq!(recorder.values_for(InterfaceId::MASTER), vec![0, 1, 2]);
}

#[test]
fn sync_messages_sent_before_the_claim_run_during_a_wait() {
    let (ours, peer) = MemoryPipe::pair();
    let side = Side {
        router: MultiplexRouter::new(ours, RouterConfig::default()).expect("router should start"),
        runner: ThreadTaskRunner::new("late-claim-runner").expect("runner should start"),
    };
    let associated = InterfaceId::from_raw(0x8000_0001);

    peer.write(value(1).into_packet()).unwrap();
    let mut double = sync_request(DOUBLE, 4);
    double.set_interface_id(associated);
    double.set_request_id(1);
    peer.write(double.into_packet()).unwrap();
    // Both are queued before either id is claimed.
    thread::sleep(Duration::from_millis(50));

    // The peer answers CALL only once its own DOUBLE was answered.
    let answering = thread::spawn(move || {
        let mut call_id = None;
        let mut doubled = None;
        while call_id.is_none() || doubled.is_none() {
            let Ok(Some(packet)) = peer.read_timeout(TIMEOUT) else {
                return (peer, None);
            };
            let mut message = Message::from_packet(packet).expect("packet should parse");
            match message.name() {
                CALL if message.expects_response() => call_id = message.request_id(),
                DOUBLE if message.is_response() => {
                    doubled = message.read_payload::<Value>().ok().map(|value| value.n);
                }
                _ => {}
            }
        }
        let (Some(call_id), Some(doubled)) = (call_id, doubled) else {
            return (peer, None);
        };
        let mut reply = Message::new(
            CALL,
            MessageFlags::IS_RESPONSE | MessageFlags::IS_SYNC,
            Value { n: doubled + 1 },
        );
        reply.set_request_id(call_id);
        peer.write(reply.into_packet()).unwrap();
        (peer, Some(doubled))
    });

    let router = Arc::clone(&side.router);
    let runner: Arc<dyn TaskRunner> = side.runner.clone();
    let result = side.on_runner(move || {
        let doubler = InterfaceEndpointClient::new(
            router.create_local_endpoint_handle(associated)?,
            Arc::new(Doubler),
            Arc::clone(&runner),
            ClientConfig::default().with_expects_sync_requests(true),
        )?;
        let master = InterfaceEndpointClient::new(
            router.create_local_endpoint_handle(InterfaceId::MASTER)?,
            Arc::new(Null),
            runner,
            ClientConfig::default(),
        )?;
        let mut reply = master.accept_sync(sync_request(CALL, 4))?;
        let n = reply.read_payload::<Value>()?.n;
        drop(doubler);
        Ok::<_, BindingsError>(n)
    });

    let (_peer, doubled) = answering.join().unwrap();
    assert_eq!(doubled, Some(8));
    assert_eq!(result.unwrap(), 9);
}
