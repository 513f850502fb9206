use btipc_frame::service::OP_REGISTER_MODULE;
use btipc_frame::{Status, MINIMUM_EVENT, SERVICE_ID_MAX};
use btipc_peer::{
    CommandRegistry, DaemonConfig, DaemonEndpoint, HandlerDescriptor, Notifier, Response,
    ServiceTable,
};
use btipc_transport::SocketPath;
use bytes::Bytes;
use tracing::{info, warn};

use crate::cmd::StubDaemonArgs;
use crate::exit::{ipc_error, CliError, CliResult, INTERNAL, SUCCESS};

#[derive(Clone, Copy)]
enum Answer {
    Status(Status),
    Echo,
}

pub fn run(args: StubDaemonArgs, socket: SocketPath) -> CliResult<i32> {
    let config = DaemonConfig::default().with_socket(socket);
    let mut endpoint =
        DaemonEndpoint::connect(&config).map_err(|err| ipc_error("connect failed", err))?;

    let answer = if args.echo {
        Answer::Echo
    } else {
        Answer::Status(args.status)
    };
    let registry = stub_registry(answer, args.notify.map(|op| (endpoint.notifier(), op)))?;

    endpoint
        .serve(&registry)
        .map_err(|err| ipc_error("serve failed", err))?;
    info!("HAL closed the session");
    Ok(SUCCESS)
}

/// Answer every command opcode of every service the same way.
fn stub_registry(answer: Answer, notify: Option<(Notifier, u8)>) -> CliResult<CommandRegistry> {
    let registry = CommandRegistry::commands();

    for service_id in 0..=SERVICE_ID_MAX {
        let table: ServiceTable<_> = (OP_REGISTER_MODULE..MINIMUM_EVENT)
            .map(|opcode| {
                let notify = notify.clone();
                HandlerDescriptor::variable_command(0, move |payload| {
                    info!(service_id, opcode, len = payload.len(), "command received");
                    if let Some((notifier, event)) = &notify {
                        if let Err(err) = notifier.send(service_id, *event, payload) {
                            warn!(error = %err, "failed to push notification");
                        }
                    }
                    match answer {
                        Answer::Status(status) => Response::Status(status),
                        Answer::Echo => Response::payload(Bytes::copy_from_slice(payload)),
                    }
                })
            })
            .collect();
        registry
            .register(service_id, table)
            .map_err(|err| CliError::new(INTERNAL, err.to_string()))?;
    }

    Ok(registry)
}
