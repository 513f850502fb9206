use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use btipc_frame::Status;
use btipc_peer::{Event, ReplyExpectation};
use btipc_transport::SocketPath;
use tracing::{debug, warn};

use crate::cmd::{capture_registry, connect_session, CommandArgs};
use crate::exit::{ipc_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_event, print_reply, print_status, OutputFormat};

pub fn run(args: CommandArgs, socket: SocketPath, format: OutputFormat) -> CliResult<i32> {
    let payload = match &args.data {
        Some(data) => hex::decode(data)
            .map_err(|err| CliError::new(USAGE, format!("--data is not valid hex: {err}")))?,
        None => Vec::new(),
    };

    let (registry, events) = capture_registry()?;
    let session = connect_session(&socket, &args.daemon, registry)?;

    let status = match args.reply_max {
        Some(max_len) => {
            let mut expect = ReplyExpectation::payload(max_len);
            if args.want_fd {
                expect = expect.with_fd();
            }
            let reply = session
                .execute_with_reply(args.service, args.opcode, &payload, expect)
                .map_err(|err| ipc_error("command failed", err))?;
            print_reply(args.service, args.opcode, &reply, format);
            reply.status
        }
        None => {
            let status = session
                .execute(args.service, args.opcode, &payload)
                .map_err(|err| ipc_error("command failed", err))?;
            print_status(args.service, args.opcode, status, format);
            status
        }
    };

    if args.watch > 0 {
        let seen = watch(&events, args.watch, args.watch_timeout, format);
        if seen < args.watch {
            warn!(seen, expected = args.watch, "stopped watching before all notifications arrived");
        }
    }

    let state = session.close();
    debug!(?state, "session closed");

    Ok(exit_code(status))
}

fn exit_code(status: Status) -> i32 {
    if status.is_success() {
        SUCCESS
    } else {
        FAILURE
    }
}

fn watch(
    events: &mpsc::Receiver<Event>,
    count: usize,
    timeout: Duration,
    format: OutputFormat,
) -> usize {
    let deadline = Instant::now() + timeout;
    let mut seen = 0;
    while seen < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) => {
                print_event(&event, format);
                seen += 1;
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    seen
}
