//! HAL session and daemon endpoint talking over real abstract sockets.

use std::io;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use btipc_frame::service::{BLUETOOTH, CORE};
use btipc_frame::{FrameReader, FrameWriter, Status, OP_STATUS};
use btipc_peer::{
    CommandRegistry, DaemonConfig, DaemonEndpoint, Event, EventRegistry, HandlerDescriptor,
    IpcError, ListenerState, Notifier, ReplyExpectation, Response, ServiceTable, Session,
    SessionConfig, ThreadHooks,
};
use btipc_transport::{SeqPacket, SocketPath};
use bytes::Bytes;

const OP_ECHO: u8 = 0x02;
const OP_NOT_READY: u8 = 0x03;
const OP_OPEN_SOCKET: u8 = 0x04;
const EV_ADAPTER_STATE: u8 = 0x81;

fn unique_socket(tag: &str) -> SocketPath {
    SocketPath::abstract_name(format!(
        "btipc-e2e-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

fn session_config(tag: &str) -> SessionConfig {
    SessionConfig::default()
        .with_socket(unique_socket(tag))
        .with_accept_timeout(Duration::from_secs(2))
}

fn daemon_commands() -> CommandRegistry {
    let registry = CommandRegistry::commands();
    registry
        .register(
            CORE,
            ServiceTable::new()
                .with(HandlerDescriptor::fixed_command(1, |payload| {
                    if payload[0] == BLUETOOTH {
                        Response::success()
                    } else {
                        Response::Status(Status::Unsupported)
                    }
                }))
                .with(HandlerDescriptor::variable_command(0, |payload| {
                    Response::payload(Bytes::copy_from_slice(payload))
                }))
                .with(HandlerDescriptor::fixed_command(0, |_| {
                    Response::Status(Status::NotReady)
                }))
                .with(HandlerDescriptor::fixed_command(0, |_| {
                    let (local, _remote) =
                        std::os::unix::net::UnixStream::pair().expect("socketpair");
                    Response::with_fd(&b"sock"[..], OwnedFd::from(local))
                })),
        )
        .expect("core service registers");
    registry
}

struct Daemon {
    notifier: Notifier,
    handle: thread::JoinHandle<btipc_peer::Result<()>>,
}

/// Establish a session whose activator starts an in-process daemon.
fn start(config: SessionConfig, events: Arc<EventRegistry>) -> (Session, Daemon) {
    let socket = config.socket.clone();
    let (tx, rx) = mpsc::channel();
    let slot = Mutex::new(None);

    let activator = || -> io::Result<()> {
        let config = DaemonConfig::default().with_socket(socket.clone());
        let tx = tx.clone();
        let handle = thread::spawn(move || {
            let mut endpoint = DaemonEndpoint::connect(&config)?;
            let _ = tx.send(endpoint.notifier());
            endpoint.serve(&daemon_commands())
        });
        *slot.lock().unwrap() = Some(handle);
        Ok(())
    };

    let session = Session::connect(config, events, &activator).expect("session connects");
    let notifier = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("daemon publishes notifier");
    let handle = slot.lock().unwrap().take().expect("daemon started");
    (session, Daemon { notifier, handle })
}

/// Establish a session against a hand-written daemon running `daemon` with
/// its command and notification sockets.
fn start_raw<F>(config: SessionConfig, daemon: F) -> btipc_peer::Result<(Session, thread::JoinHandle<()>)>
where
    F: FnOnce(SeqPacket, SeqPacket) + Send + 'static,
{
    start_raw_with_events(config, Arc::new(EventRegistry::events()), daemon)
}

fn start_raw_with_events<F>(
    config: SessionConfig,
    events: Arc<EventRegistry>,
    daemon: F,
) -> btipc_peer::Result<(Session, thread::JoinHandle<()>)>
where
    F: FnOnce(SeqPacket, SeqPacket) + Send + 'static,
{
    let socket = config.socket.clone();
    let pending = Mutex::new(Some(daemon));
    let slot = Mutex::new(None);

    let activator = || -> io::Result<()> {
        let daemon = pending.lock().unwrap().take().expect("activated once");
        let socket = socket.clone();
        let handle = thread::spawn(move || {
            let command = SeqPacket::connect(&socket).unwrap();
            let notification = SeqPacket::connect(&socket).unwrap();
            daemon(command, notification);
        });
        *slot.lock().unwrap() = Some(handle);
        Ok(())
    };

    let session = Session::connect(config, events, &activator);
    let handle = slot.lock().unwrap().take().expect("daemon started");
    session.map(|session| (session, handle))
}

fn wait_for_listener_exit(session: &Session) -> ListenerState {
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.listener_state() == ListenerState::Running && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    session.listener_state()
}

#[test]
fn register_module_then_receive_event() {
    let events = Arc::new(EventRegistry::events());
    let (tx, rx) = mpsc::channel::<Event>();
    let tx = Mutex::new(tx);
    events
        .register(
            BLUETOOTH,
            ServiceTable::new().with(HandlerDescriptor::fixed_event(4, move |event| {
                let _ = tx.lock().unwrap().send(event);
            })),
        )
        .unwrap();

    let (session, daemon) = start(session_config("event"), events);

    assert_eq!(session.execute(CORE, 0x01, &[BLUETOOTH]).unwrap(), Status::Success);

    daemon
        .notifier
        .send(BLUETOOTH, EV_ADAPTER_STATE, &[1, 0, 0, 0])
        .unwrap();
    let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(event.service_id, BLUETOOTH);
    assert_eq!(event.opcode, EV_ADAPTER_STATE);
    assert_eq!(event.payload.as_ref(), &[1, 0, 0, 0]);
    assert!(event.fd.is_none());

    assert_eq!(session.close(), ListenerState::Stopped);
    assert!(daemon.handle.join().unwrap().is_ok());
}

#[test]
fn failure_status_keeps_session_usable() {
    let (session, daemon) = start(session_config("status"), Arc::new(EventRegistry::events()));

    assert_eq!(session.execute(CORE, OP_NOT_READY, &[]).unwrap(), Status::NotReady);
    assert_eq!(session.execute(CORE, 0x01, &[9]).unwrap(), Status::Unsupported);
    assert!(session.is_open());
    assert_eq!(session.execute(CORE, 0x01, &[BLUETOOTH]).unwrap(), Status::Success);

    drop(session);
    assert!(daemon.handle.join().unwrap().is_ok());
}

#[test]
fn reply_carries_descriptor() {
    let (session, daemon) = start(session_config("fd"), Arc::new(EventRegistry::events()));

    let reply = session
        .execute_with_reply(CORE, OP_OPEN_SOCKET, &[], ReplyExpectation::payload(8).with_fd())
        .unwrap();
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.payload.as_ref(), b"sock");
    assert!(reply.fd.is_some());

    let reply = session
        .execute_with_reply(CORE, OP_OPEN_SOCKET, &[], ReplyExpectation::payload(8))
        .unwrap();
    assert!(reply.fd.is_none());

    drop(session);
    assert!(daemon.handle.join().unwrap().is_ok());
}

#[test]
fn concurrent_commands_get_their_own_replies() {
    let (session, daemon) = start(session_config("concurrent"), Arc::new(EventRegistry::events()));
    let session = Arc::new(session);

    let workers: Vec<_> = (0..8u8)
        .map(|worker| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for round in 0..50u8 {
                    let payload = [worker, round, worker ^ round];
                    let reply = session
                        .execute_with_reply(CORE, OP_ECHO, &payload, ReplyExpectation::payload(16))
                        .unwrap();
                    assert_eq!(reply.payload.as_ref(), &payload);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let session = Arc::into_inner(session).expect("workers released the session");
    assert_eq!(session.close(), ListenerState::Stopped);
    assert!(daemon.handle.join().unwrap().is_ok());
}

#[test]
fn event_handler_can_issue_commands() {
    let events = Arc::new(EventRegistry::events());
    let (session, daemon) = start(session_config("reentrant"), Arc::clone(&events));

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let commands = session.commands();
    events
        .register(
            BLUETOOTH,
            ServiceTable::new().with(HandlerDescriptor::variable_event(0, move |event| {
                let reply = commands.execute_with_reply(
                    CORE,
                    OP_ECHO,
                    &event.payload,
                    ReplyExpectation::payload(16),
                );
                let _ = tx.lock().unwrap().send(reply.map(|r| r.payload));
            })),
        )
        .unwrap();

    daemon.notifier.send(BLUETOOTH, EV_ADAPTER_STATE, b"ping").unwrap();
    let echoed = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(echoed.as_ref(), b"ping");

    assert_eq!(session.close(), ListenerState::Stopped);
    assert!(daemon.handle.join().unwrap().is_ok());
}

#[test]
fn wrong_reply_opcode_tears_session_down() {
    let (session, daemon) = start_raw(session_config("badopcode"), |command, notification| {
        let mut reader = FrameReader::new(command.try_clone().unwrap());
        let writer = FrameWriter::new(command);
        let request = reader.read_frame().unwrap();
        writer
            .send(request.header.service_id, request.header.opcode + 1, &[])
            .unwrap();
        // Hold both channels until the HAL hangs up.
        let _ = reader.read_frame();
        drop(notification);
    })
    .unwrap();

    let err = session.execute(CORE, 0x01, &[BLUETOOTH]).unwrap_err();
    assert!(matches!(err, IpcError::Protocol(_)));
    assert!(!session.is_open());
    assert_eq!(session.listener_state(), ListenerState::Stopped);
    assert!(matches!(
        session.execute(CORE, 0x01, &[BLUETOOTH]),
        Err(IpcError::SessionClosed)
    ));

    drop(session);
    daemon.join().unwrap();
}

#[test]
fn status_reply_with_success_is_a_violation() {
    let (session, daemon) = start_raw(session_config("badstatus"), |command, _notification| {
        let mut reader = FrameReader::new(command.try_clone().unwrap());
        let writer = FrameWriter::new(command);
        let request = reader.read_frame().unwrap();
        writer
            .send(request.header.service_id, OP_STATUS, &Status::Success.to_payload())
            .unwrap();
        let _ = reader.read_frame();
    })
    .unwrap();

    let err = session.execute(CORE, 0x01, &[BLUETOOTH]).unwrap_err();
    assert!(err.is_fatal());
    assert!(!session.is_open());

    drop(session);
    daemon.join().unwrap();
}

#[test]
fn daemon_closing_notifications_aborts_listener() {
    let faults = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&faults);
    let config = session_config("abort").with_fault_callback(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let (session, daemon) = start_raw(config, |command, notification| {
        drop(notification);
        let mut buf = [0u8; 16];
        // Wait for the HAL to shut the command channel down.
        let _ = command.recv(&mut buf);
    })
    .unwrap();

    assert_eq!(wait_for_listener_exit(&session), ListenerState::Aborted);
    assert_eq!(faults.load(Ordering::SeqCst), 1);
    assert!(matches!(
        session.execute(CORE, 0x01, &[BLUETOOTH]),
        Err(IpcError::SessionClosed)
    ));

    drop(session);
    daemon.join().unwrap();
}

#[test]
fn panicking_event_handler_aborts_session() {
    let events = Arc::new(EventRegistry::events());
    events
        .register(
            BLUETOOTH,
            ServiceTable::new().with(HandlerDescriptor::variable_event(0, |_| {
                panic!("adapter state handler failed");
            })),
        )
        .unwrap();
    let faults = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&faults);
    let config = session_config("panic").with_fault_callback(move |err| {
        assert!(matches!(err, IpcError::HandlerPanicked { .. }));
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let (session, daemon) = start(config, events);
    daemon.notifier.send(BLUETOOTH, EV_ADAPTER_STATE, &[]).unwrap();

    assert_eq!(wait_for_listener_exit(&session), ListenerState::Aborted);
    assert_eq!(faults.load(Ordering::SeqCst), 1);
    assert!(!session.is_open());
    assert!(matches!(
        session.execute(CORE, 0x01, &[BLUETOOTH]),
        Err(IpcError::SessionClosed)
    ));

    assert_eq!(session.close(), ListenerState::Aborted);
    assert!(daemon.handle.join().unwrap().is_ok());
}

#[test]
fn handler_can_use_session_while_owner_tears_down() {
    let events = Arc::new(EventRegistry::events());
    let slot: Arc<OnceLock<Weak<Session>>> = Arc::new(OnceLock::new());
    let (started_tx, started_rx) = mpsc::channel();
    let (result_tx, result_rx) = mpsc::channel();
    let started_tx = Mutex::new(started_tx);
    let result_tx = Mutex::new(result_tx);

    let handler_slot = Arc::clone(&slot);
    events
        .register(
            BLUETOOTH,
            ServiceTable::new().with(HandlerDescriptor::variable_event(0, move |_| {
                let deadline = Instant::now() + Duration::from_secs(5);
                while handler_slot.get().is_none() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
                let session = handler_slot.get().and_then(Weak::upgrade).expect("session set");
                let _ = started_tx.lock().unwrap().send(());
                while session.is_open() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
                // Give the owner time to start waiting on this thread.
                thread::sleep(Duration::from_millis(50));
                let state = session.listener_state();
                let executed = session.execute(CORE, 0x01, &[BLUETOOTH]);
                let _ = result_tx.lock().unwrap().send((state, executed));
            })),
        )
        .unwrap();

    let config = session_config("handler-teardown");
    let (session, daemon) = start_raw_with_events(config, events, |command, notification| {
        let events = FrameWriter::new(notification);
        events.send(BLUETOOTH, EV_ADAPTER_STATE, &[]).unwrap();

        let mut reader = FrameReader::new(command.try_clone().unwrap());
        let writer = FrameWriter::new(command);
        let request = reader.read_frame().unwrap();
        writer
            .send(request.header.service_id, request.header.opcode + 1, &[])
            .unwrap();
        let _ = reader.read_frame();
        drop(events);
    })
    .unwrap();
    let session = Arc::new(session);
    slot.set(Arc::downgrade(&session)).unwrap();

    // Only issue the failing command once the handler holds the session.
    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let err = session.execute(CORE, 0x01, &[BLUETOOTH]).unwrap_err();
    assert!(matches!(err, IpcError::Protocol(_)));

    let (state, executed) = result_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(state, ListenerState::Running);
    assert!(matches!(executed, Err(IpcError::SessionClosed)));
    assert_eq!(session.listener_state(), ListenerState::Stopped);

    drop(session);
    daemon.join().unwrap();
}

#[test]
fn single_connection_times_out() {
    let config = session_config("timeout").with_accept_timeout(Duration::from_millis(200));
    let socket = config.socket.clone();
    let daemon = Mutex::new(None);

    let activator = || -> io::Result<()> {
        let socket = socket.clone();
        *daemon.lock().unwrap() = Some(thread::spawn(move || {
            let command = SeqPacket::connect(&socket).unwrap();
            thread::sleep(Duration::from_millis(600));
            drop(command);
        }));
        Ok(())
    };

    let started = Instant::now();
    let err = Session::connect(config, Arc::new(EventRegistry::events()), &activator).unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(200));

    daemon.lock().unwrap().take().unwrap().join().unwrap();
}

#[test]
fn activation_failure_is_reported() {
    let activator =
        || -> io::Result<()> { Err(io::Error::new(io::ErrorKind::NotFound, "no daemon binary")) };
    let err = Session::connect(
        session_config("activation"),
        Arc::new(EventRegistry::events()),
        &activator,
    )
    .unwrap_err();
    assert!(matches!(err, IpcError::Activation(_)));
}

#[derive(Default)]
struct CountingHooks {
    associated: AtomicUsize,
    disassociated: AtomicUsize,
}

impl ThreadHooks for CountingHooks {
    fn associate(&self) {
        self.associated.fetch_add(1, Ordering::SeqCst);
    }

    fn disassociate(&self) {
        self.disassociated.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn listener_thread_runs_hooks() {
    let hooks = Arc::new(CountingHooks::default());
    let config = session_config("hooks").with_thread_hooks(hooks.clone());

    let (session, daemon) = start(config, Arc::new(EventRegistry::events()));
    assert_eq!(session.close(), ListenerState::Stopped);

    assert_eq!(hooks.associated.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.disassociated.load(Ordering::SeqCst), 1);
    assert!(daemon.handle.join().unwrap().is_ok());
}
