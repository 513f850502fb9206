//! Routing of received frames to per-opcode handlers.
//!
//! A registry has one slot per service id. A registered slot holds a
//! [`ServiceTable`] whose entries are addressed by `opcode - opcode_base`.
//! Event registries start at [`MINIMUM_EVENT`]; command registries start at
//! opcode 1 so the status opcode can never be dispatched.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use btipc_frame::service::{is_valid_service, OP_REGISTER_MODULE};
use btipc_frame::{MINIMUM_EVENT, SERVICE_COUNT};
use tracing::debug;

use crate::daemon::Response;
use crate::error::DispatchError;
use crate::notification::Event;

/// Payload length contract of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLength {
    /// The payload must be exactly this long.
    Fixed(usize),
    /// The payload must be at least this long.
    AtLeast(usize),
}

impl PayloadLength {
    pub fn accepts(self, len: usize) -> bool {
        match self {
            PayloadLength::Fixed(n) => len == n,
            PayloadLength::AtLeast(n) => len >= n,
        }
    }
}

impl fmt::Display for PayloadLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadLength::Fixed(n) => write!(f, "exactly {n}"),
            PayloadLength::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// Handler invoked on the notification listener thread.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Handler invoked by the daemon endpoint for each command.
pub type CommandCallback = Arc<dyn Fn(&[u8]) -> Response + Send + Sync>;

/// A callback with its payload length contract.
#[derive(Clone)]
pub struct HandlerDescriptor<C> {
    pub callback: C,
    pub length: PayloadLength,
}

impl<C> HandlerDescriptor<C> {
    pub fn new(callback: C, length: PayloadLength) -> Self {
        Self { callback, length }
    }
}

impl HandlerDescriptor<EventCallback> {
    /// Event handler for a payload of exactly `len` bytes.
    pub fn fixed_event(len: usize, f: impl Fn(Event) + Send + Sync + 'static) -> Self {
        Self::new(Arc::new(f), PayloadLength::Fixed(len))
    }

    /// Event handler for a payload of at least `min` bytes.
    pub fn variable_event(min: usize, f: impl Fn(Event) + Send + Sync + 'static) -> Self {
        Self::new(Arc::new(f), PayloadLength::AtLeast(min))
    }
}

impl HandlerDescriptor<CommandCallback> {
    /// Command handler for a payload of exactly `len` bytes.
    pub fn fixed_command(len: usize, f: impl Fn(&[u8]) -> Response + Send + Sync + 'static) -> Self {
        Self::new(Arc::new(f), PayloadLength::Fixed(len))
    }

    /// Command handler for a payload of at least `min` bytes.
    pub fn variable_command(
        min: usize,
        f: impl Fn(&[u8]) -> Response + Send + Sync + 'static,
    ) -> Self {
        Self::new(Arc::new(f), PayloadLength::AtLeast(min))
    }
}

impl<C> fmt::Debug for HandlerDescriptor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Ordered handlers of one service; position 0 serves the registry's first
/// opcode.
pub struct ServiceTable<C> {
    handlers: Vec<HandlerDescriptor<C>>,
}

impl<C> ServiceTable<C> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Append the handler for the next opcode.
    pub fn with(mut self, handler: HandlerDescriptor<C>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<C> Default for ServiceTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> From<Vec<HandlerDescriptor<C>>> for ServiceTable<C> {
    fn from(handlers: Vec<HandlerDescriptor<C>>) -> Self {
        Self { handlers }
    }
}

impl<C> FromIterator<HandlerDescriptor<C>> for ServiceTable<C> {
    fn from_iter<I: IntoIterator<Item = HandlerDescriptor<C>>>(iter: I) -> Self {
        Self {
            handlers: iter.into_iter().collect(),
        }
    }
}

/// Service-indexed handler tables.
///
/// Lookups clone the resolved descriptor so callbacks always run without
/// the registry lock held.
pub struct Registry<C> {
    slots: RwLock<Vec<Option<Arc<ServiceTable<C>>>>>,
    opcode_base: u8,
}

/// Registry of event handlers used by the notification listener.
pub type EventRegistry = Registry<EventCallback>;

/// Registry of command handlers used by the daemon endpoint.
pub type CommandRegistry = Registry<CommandCallback>;

impl<C> Registry<C> {
    /// Create an empty registry whose tables start at `opcode_base`.
    pub fn with_opcode_base(opcode_base: u8) -> Self {
        let mut slots = Vec::with_capacity(SERVICE_COUNT);
        slots.resize_with(SERVICE_COUNT, || None);
        Self {
            slots: RwLock::new(slots),
            opcode_base,
        }
    }

    /// Registry for events (`opcode >= 0x81`).
    pub fn events() -> Self {
        Self::with_opcode_base(MINIMUM_EVENT)
    }

    /// Registry for commands (`opcode >= 1`).
    pub fn commands() -> Self {
        Self::with_opcode_base(OP_REGISTER_MODULE)
    }

    pub fn opcode_base(&self) -> u8 {
        self.opcode_base
    }

    /// Install `table` for `service_id`, replacing any previous table.
    pub fn register(&self, service_id: u8, table: ServiceTable<C>) -> Result<(), DispatchError> {
        if !is_valid_service(service_id) {
            return Err(DispatchError::InvalidService(service_id));
        }
        debug!(service_id, handlers = table.len(), "registering service");
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots[service_id as usize] = Some(Arc::new(table));
        Ok(())
    }

    /// Remove the table for `service_id`. Unknown ids are ignored.
    pub fn unregister(&self, service_id: u8) {
        if !is_valid_service(service_id) {
            return;
        }
        debug!(service_id, "unregistering service");
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots[service_id as usize] = None;
    }

    pub fn is_registered(&self, service_id: u8) -> bool {
        is_valid_service(service_id)
            && self.slots.read().unwrap_or_else(PoisonError::into_inner)[service_id as usize]
                .is_some()
    }

    /// Find the handler for a frame and check its payload length.
    pub fn resolve(
        &self,
        service_id: u8,
        opcode: u8,
        payload_len: usize,
    ) -> Result<HandlerDescriptor<C>, DispatchError>
    where
        C: Clone,
    {
        if !is_valid_service(service_id) {
            return Err(DispatchError::InvalidService(service_id));
        }

        let table = self.slots.read().unwrap_or_else(PoisonError::into_inner)
            [service_id as usize]
            .clone()
            .ok_or(DispatchError::Unregistered(service_id))?;

        let index = opcode
            .checked_sub(self.opcode_base)
            .ok_or(DispatchError::OpcodeBelowBase {
                service_id,
                opcode,
                base: self.opcode_base,
            })?;

        let handler = table
            .handlers
            .get(index as usize)
            .ok_or(DispatchError::UnknownOpcode { service_id, opcode })?;

        if !handler.length.accepts(payload_len) {
            return Err(DispatchError::InvalidLength {
                service_id,
                opcode,
                len: payload_len,
                expected: handler.length,
            });
        }

        Ok(handler.clone())
    }
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<usize> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
            .collect();
        f.debug_struct("Registry")
            .field("opcode_base", &self.opcode_base)
            .field("registered", &registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use btipc_frame::service::{BLUETOOTH, GATT};
    use btipc_frame::{Status, SERVICE_ID_MAX};

    use super::*;

    fn noop_table(lengths: &[PayloadLength]) -> ServiceTable<EventCallback> {
        lengths
            .iter()
            .map(|length| HandlerDescriptor::new(Arc::new(|_event: Event| {}) as EventCallback, *length))
            .collect()
    }

    #[test]
    fn payload_length_rules() {
        assert!(PayloadLength::Fixed(4).accepts(4));
        assert!(!PayloadLength::Fixed(4).accepts(3));
        assert!(!PayloadLength::Fixed(4).accepts(5));
        assert!(PayloadLength::AtLeast(2).accepts(2));
        assert!(PayloadLength::AtLeast(2).accepts(100));
        assert!(!PayloadLength::AtLeast(2).accepts(1));
    }

    #[test]
    fn resolve_fixed_and_variable() {
        let registry = EventRegistry::events();
        registry
            .register(
                BLUETOOTH,
                noop_table(&[PayloadLength::Fixed(4), PayloadLength::AtLeast(2)]),
            )
            .unwrap();

        assert!(registry.resolve(BLUETOOTH, 0x81, 4).is_ok());
        assert!(matches!(
            registry.resolve(BLUETOOTH, 0x81, 5),
            Err(DispatchError::InvalidLength { len: 5, .. })
        ));
        assert!(registry.resolve(BLUETOOTH, 0x82, 2).is_ok());
        assert!(registry.resolve(BLUETOOTH, 0x82, 300).is_ok());
        assert!(matches!(
            registry.resolve(BLUETOOTH, 0x82, 1),
            Err(DispatchError::InvalidLength { .. })
        ));
    }

    #[test]
    fn resolve_rejects_unknown_service_and_opcodes() {
        let registry = EventRegistry::events();
        registry
            .register(BLUETOOTH, noop_table(&[PayloadLength::Fixed(0)]))
            .unwrap();

        assert!(matches!(
            registry.resolve(SERVICE_ID_MAX + 1, 0x81, 0),
            Err(DispatchError::InvalidService(_))
        ));
        assert!(matches!(
            registry.resolve(GATT, 0x81, 0),
            Err(DispatchError::Unregistered(GATT))
        ));
        assert!(matches!(
            registry.resolve(BLUETOOTH, 0x80, 0),
            Err(DispatchError::OpcodeBelowBase { base: 0x81, .. })
        ));
        assert!(matches!(
            registry.resolve(BLUETOOTH, 0x82, 0),
            Err(DispatchError::UnknownOpcode { opcode: 0x82, .. })
        ));
    }

    #[test]
    fn register_out_of_range_fails() {
        let registry = EventRegistry::events();
        assert!(matches!(
            registry.register(SERVICE_ID_MAX + 1, ServiceTable::new()),
            Err(DispatchError::InvalidService(_))
        ));
    }

    #[test]
    fn register_overwrites_and_unregister_clears() {
        let registry = EventRegistry::events();
        registry
            .register(BLUETOOTH, noop_table(&[PayloadLength::Fixed(1)]))
            .unwrap();
        registry
            .register(
                BLUETOOTH,
                noop_table(&[PayloadLength::Fixed(1), PayloadLength::Fixed(2)]),
            )
            .unwrap();
        assert!(registry.resolve(BLUETOOTH, 0x82, 2).is_ok());

        registry.unregister(BLUETOOTH);
        assert!(!registry.is_registered(BLUETOOTH));
        assert!(matches!(
            registry.resolve(BLUETOOTH, 0x81, 1),
            Err(DispatchError::Unregistered(BLUETOOTH))
        ));
    }

    #[test]
    fn resolved_callback_runs_outside_lock() {
        let registry = Arc::new(EventRegistry::events());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_registry = Arc::clone(&registry);
        let inner_hits = Arc::clone(&hits);
        registry
            .register(
                BLUETOOTH,
                ServiceTable::new().with(HandlerDescriptor::fixed_event(0, move |_| {
                    // Re-entrant registration must not deadlock.
                    inner_registry.unregister(GATT);
                    inner_hits.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        let handler = registry.resolve(BLUETOOTH, 0x81, 0).unwrap();
        (handler.callback)(Event {
            service_id: BLUETOOTH,
            opcode: 0x81,
            payload: bytes::Bytes::new(),
            fd: None,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn command_registry_never_dispatches_status() {
        let registry = CommandRegistry::commands();
        registry
            .register(
                BLUETOOTH,
                ServiceTable::new()
                    .with(HandlerDescriptor::fixed_command(0, |_| Response::Status(Status::Success))),
            )
            .unwrap();

        assert!(matches!(
            registry.resolve(BLUETOOTH, 0x00, 0),
            Err(DispatchError::OpcodeBelowBase { base: 1, .. })
        ));
        assert!(registry.resolve(BLUETOOTH, 0x01, 0).is_ok());
    }
}
