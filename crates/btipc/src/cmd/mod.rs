use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use btipc_frame::service::{is_valid_service, service_name};
use btipc_frame::{Status, MINIMUM_EVENT, SERVICE_ID_MAX};
use btipc_peer::{
    CommandActivator, Event, EventRegistry, HandlerDescriptor, NoopActivator, ServiceTable,
    Session, SessionConfig,
};
use btipc_transport::SocketPath;
use clap::{Args, Subcommand};

use crate::exit::{ipc_error, CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod command;
pub mod monitor;
pub mod stub_daemon;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept a daemon, execute one command and print the reply.
    Command(CommandArgs),
    /// Accept a daemon and print its notifications.
    Monitor(MonitorArgs),
    /// Connect as a daemon and answer every command.
    StubDaemon(StubDaemonArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, socket: SocketPath, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Command(args) => command::run(args, socket, format),
        Command::Monitor(args) => monitor::run(args, socket, format),
        Command::StubDaemon(args) => stub_daemon::run(args, socket),
        Command::Version(args) => version::run(args),
    }
}

/// How the HAL side obtains its daemon.
#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Time to wait for each daemon connection (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub accept_timeout: Duration,
    /// Program to start once the socket is listening.
    #[arg(long, value_name = "PROGRAM", conflicts_with = "spawn_stub")]
    pub daemon: Option<PathBuf>,
    /// Argument for --daemon (repeatable).
    #[arg(
        long = "daemon-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        requires = "daemon"
    )]
    pub daemon_args: Vec<String>,
    /// Start this binary's stub-daemon on the same socket.
    #[arg(long)]
    pub spawn_stub: bool,
}

#[derive(Args, Debug)]
pub struct CommandArgs {
    /// Service id or name (e.g. 1, bluetooth).
    #[arg(value_parser = parse_service)]
    pub service: u8,
    /// Command opcode (e.g. 0x01).
    #[arg(value_parser = parse_opcode)]
    pub opcode: u8,
    /// Hex-encoded payload.
    #[arg(long, value_name = "HEX")]
    pub data: Option<String>,
    /// Accept a reply payload of up to N bytes instead of a status-only reply.
    #[arg(long, value_name = "N")]
    pub reply_max: Option<usize>,
    /// Keep a descriptor passed with the reply.
    #[arg(long, requires = "reply_max")]
    pub want_fd: bool,
    /// Print up to N notifications after the reply.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub watch: usize,
    /// Stop watching after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub watch_timeout: Duration,
    #[command(flatten)]
    pub daemon: DaemonArgs,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Exit after printing N notifications.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub daemon: DaemonArgs,
}

#[derive(Args, Debug)]
pub struct StubDaemonArgs {
    /// Status answered to every command (name or code).
    #[arg(long, default_value = "success", value_parser = parse_status)]
    pub status: Status,
    /// Echo each command payload back as the reply.
    #[arg(long, conflicts_with = "status")]
    pub echo: bool,
    /// Push an event with this opcode on the command's service for every
    /// command, carrying the command payload.
    #[arg(long, value_name = "OPCODE", value_parser = parse_event_opcode)]
    pub notify: Option<u8>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Listen, start the daemon as requested and accept it.
pub fn connect_session(
    socket: &SocketPath,
    args: &DaemonArgs,
    registry: Arc<EventRegistry>,
) -> CliResult<Session> {
    let config = SessionConfig::default()
        .with_socket(socket.clone())
        .with_accept_timeout(args.accept_timeout);

    let session = if args.spawn_stub {
        let exe = std::env::current_exe()
            .map_err(|err| CliError::new(INTERNAL, format!("cannot locate executable: {err}")))?;
        let socket_arg = socket.to_string();
        let activator = CommandActivator::new(exe).args([
            "--log-level",
            "error",
            "stub-daemon",
            "--socket",
            socket_arg.as_str(),
        ]);
        Session::connect(config, registry, &activator)
    } else if let Some(program) = &args.daemon {
        let activator = CommandActivator::new(program).args(&args.daemon_args);
        Session::connect(config, registry, &activator)
    } else {
        Session::connect(config, registry, &NoopActivator)
    };

    session.map_err(|err| ipc_error("session failed", err))
}

/// A registry that forwards every event of every service to a channel.
pub fn capture_registry() -> CliResult<(Arc<EventRegistry>, mpsc::Receiver<Event>)> {
    let (tx, rx) = mpsc::channel();
    let registry = EventRegistry::events();

    for service_id in 0..=SERVICE_ID_MAX {
        let table: ServiceTable<_> = (MINIMUM_EVENT..=u8::MAX)
            .map(|_| {
                let tx = tx.clone();
                HandlerDescriptor::variable_event(0, move |event| {
                    let _ = tx.send(event);
                })
            })
            .collect();
        registry
            .register(service_id, table)
            .map_err(|err| CliError::new(INTERNAL, err.to_string()))?;
    }

    Ok((Arc::new(registry), rx))
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;

    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

fn parse_u8(input: &str) -> Option<u8> {
    match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => input.parse().ok(),
    }
}

pub fn parse_service(input: &str) -> Result<u8, String> {
    if let Some(id) = parse_u8(input) {
        return if is_valid_service(id) {
            Ok(id)
        } else {
            Err(format!("service id {id} is above {SERVICE_ID_MAX}"))
        };
    }
    (0..=SERVICE_ID_MAX)
        .find(|id| service_name(*id).eq_ignore_ascii_case(input))
        .ok_or_else(|| format!("unknown service: {input}"))
}

pub fn parse_opcode(input: &str) -> Result<u8, String> {
    parse_u8(input).ok_or_else(|| format!("invalid opcode: {input}"))
}

fn parse_event_opcode(input: &str) -> Result<u8, String> {
    let opcode = parse_opcode(input)?;
    if opcode < MINIMUM_EVENT {
        return Err(format!(
            "event opcodes start at 0x{MINIMUM_EVENT:02x}, got 0x{opcode:02x}"
        ));
    }
    Ok(opcode)
}

pub fn parse_status(input: &str) -> Result<Status, String> {
    if let Some(code) = parse_u8(input) {
        return Ok(Status::from(code));
    }
    (0x00..=0x0a)
        .map(Status::from)
        .find(|status| status.to_string().eq_ignore_ascii_case(input))
        .ok_or_else(|| format!("unknown status: {input}"))
}
