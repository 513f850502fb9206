use std::ffi::{OsStr, OsString};
use std::io;
use std::process::Command;

use tracing::{debug, info, warn};

/// Asks the environment to start the daemon once the HAL is listening.
pub trait PeerActivator {
    fn request_start(&self) -> io::Result<()>;
}

/// The daemon is started by someone else.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivator;

impl PeerActivator for NoopActivator {
    fn request_start(&self) -> io::Result<()> {
        Ok(())
    }
}

impl<F> PeerActivator for F
where
    F: Fn() -> io::Result<()>,
{
    fn request_start(&self) -> io::Result<()> {
        self()
    }
}

/// Starts the daemon by spawning a program.
///
/// The child is not supervised: it is reaped in the background and its exit
/// status is only logged.
#[derive(Debug, Clone)]
pub struct CommandActivator {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl CommandActivator {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }
}

impl PeerActivator for CommandActivator {
    fn request_start(&self) -> io::Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .spawn()?;

        let pid = child.id();
        info!(program = ?self.program, pid, "spawned daemon");

        std::thread::Builder::new()
            .name("btipc-reaper".into())
            .spawn(move || match child.wait() {
                Ok(status) => debug!(pid, %status, "daemon exited"),
                Err(err) => warn!(pid, error = %err, "failed to wait for daemon"),
            })?;
        Ok(())
    }
}
