use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use btipc_peer::ListenerState;
use btipc_transport::SocketPath;
use tracing::info;

use crate::cmd::{capture_registry, connect_session, install_ctrlc_handler, MonitorArgs};
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: MonitorArgs, socket: SocketPath, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (registry, events) = capture_registry()?;
    let session = connect_session(&socket, &args.daemon, registry)?;
    info!(%socket, "monitoring notifications");

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                print_event(&event, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if session.listener_state() != ListenerState::Running {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    match session.close() {
        ListenerState::Aborted => Err(CliError::new(
            FAILURE,
            format!("notification channel failed after {printed} events"),
        )),
        _ => Ok(SUCCESS),
    }
}
