use std::sync::Arc;

/// Callbacks run on the notification listener thread as it starts and stops.
///
/// Hosts that must attach foreign runtimes to every thread delivering
/// callbacks (a VM, a thread-local logger) do so here.
pub trait ThreadHooks: Send + Sync {
    fn associate(&self) {}
    fn disassociate(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ThreadHooks for NoopHooks {}

/// Calls `associate` on creation and `disassociate` on drop, including
/// during unwinding.
pub(crate) struct HookGuard {
    hooks: Arc<dyn ThreadHooks>,
}

impl HookGuard {
    pub(crate) fn new(hooks: Arc<dyn ThreadHooks>) -> Self {
        hooks.associate();
        Self { hooks }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        self.hooks.disassociate();
    }
}
