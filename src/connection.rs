use futures::future::LocalBoxFuture;
use futures::task::{LocalSpawn, LocalSpawnExt};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::shell::ToggleView;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("device {0} is not available")]
    DeviceUnavailable(String),
    #[error("bus call failed: {0}")]
    Bus(String),
    #[error("could not schedule operation: {0}")]
    Spawn(String),
}

pub type OperationFuture = LocalBoxFuture<'static, Result<(), OperationError>>;

/// Performs connect/disconnect for a device path.
pub trait ConnectionOperator {
    fn connect(&self, path: &str) -> OperationFuture;
    fn disconnect(&self, path: &str) -> OperationFuture;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Disconnecting,
    Connecting,
}

impl ConnectionState {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// An operation is outstanding.
    pub fn is_pending(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Disconnecting)
    }

    /// Position the switch shows: the target of a pending operation.
    pub fn shows_on(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Connecting)
    }

    fn status(self) -> Option<&'static str> {
        match self {
            ConnectionState::Connecting => Some("connecting..."),
            ConnectionState::Disconnecting => Some("disconnecting..."),
            ConnectionState::Connected | ConnectionState::Disconnected => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Connect,
    Disconnect,
}

impl Operation {
    fn settle(self, succeeded: bool) -> ConnectionState {
        match (self, succeeded) {
            (Operation::Connect, true) | (Operation::Disconnect, false) => {
                ConnectionState::Connected
            }
            (Operation::Connect, false) | (Operation::Disconnect, true) => {
                ConnectionState::Disconnected
            }
        }
    }
}

struct Inner {
    path: String,
    state: Cell<ConnectionState>,
    toggle: RefCell<Option<Rc<dyn ToggleView>>>,
    operator: Rc<dyn ConnectionOperator>,
    spawner: Rc<dyn LocalSpawn>,
}

/// Connection toggle state machine for one device entry.
///
/// The entry owns the only strong handle. Spawned operations and UI
/// callbacks hold [`WeakConnectionController`]s, so dropping the entry
/// turns late results into no-ops.
pub struct ConnectionController {
    inner: Rc<Inner>,
}

#[derive(Clone)]
pub struct WeakConnectionController {
    inner: Weak<Inner>,
}

impl WeakConnectionController {
    pub fn upgrade(&self) -> Option<ConnectionController> {
        self.inner.upgrade().map(|inner| ConnectionController { inner })
    }
}

impl ConnectionController {
    pub fn new(
        path: &str,
        connected: bool,
        operator: Rc<dyn ConnectionOperator>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                path: path.to_string(),
                state: Cell::new(ConnectionState::from_connected(connected)),
                toggle: RefCell::new(None),
                operator,
                spawner,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn downgrade(&self) -> WeakConnectionController {
        WeakConnectionController {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Bind the switch that displays this controller, replacing any
    /// previous one.
    pub fn attach_toggle(&self, toggle: Rc<dyn ToggleView>) {
        self.inner.toggle.replace(Some(toggle));
        self.inner.render();
    }

    pub fn detach_toggle(&self) {
        self.inner.toggle.replace(None);
    }

    /// Mirror the provider's connected flag. Ignored while an operation is
    /// outstanding; its result settles the state.
    pub fn sync_from_device(&self, connected: bool) {
        let state = self.inner.state.get();
        if state.is_pending() {
            debug!("{}: ignoring provider state while {:?}", self.inner.path, state);
            return;
        }
        self.inner.state.set(ConnectionState::from_connected(connected));
        self.inner.render();
    }

    /// Handle a user flip of the switch. Returns whether an operation was
    /// started; a rejected flip while pending is `Ok(false)`.
    pub fn request_toggle(&self) -> Result<bool, OperationError> {
        let inner = &self.inner;
        let operation = match inner.state.get() {
            ConnectionState::Disconnected => Operation::Connect,
            ConnectionState::Connected => Operation::Disconnect,
            state @ (ConnectionState::Connecting | ConnectionState::Disconnecting) => {
                debug!("{}: toggle rejected, already {:?}", inner.path, state);
                inner.render();
                return Ok(false);
            }
        };

        let (pending, future) = match operation {
            Operation::Connect => (
                ConnectionState::Connecting,
                inner.operator.connect(&inner.path),
            ),
            Operation::Disconnect => (
                ConnectionState::Disconnecting,
                inner.operator.disconnect(&inner.path),
            ),
        };
        inner.state.set(pending);
        inner.render();
        info!("{}: {:?} requested", inner.path, operation);

        let weak = self.downgrade();
        let path = inner.path.clone();
        let task = async move {
            let result = future.await;
            match weak.upgrade() {
                Some(controller) => controller.inner.finish(operation, result),
                None => debug!("{}: entry gone, dropping {:?} result", path, operation),
            }
        };

        if let Err(e) = inner.spawner.spawn_local(task) {
            error!("{}: failed to spawn {:?}: {}", inner.path, operation, e);
            inner.finish(operation, Err(OperationError::Spawn(e.to_string())));
            return Err(OperationError::Spawn(e.to_string()));
        }
        Ok(true)
    }
}

impl Inner {
    fn finish(&self, operation: Operation, result: Result<(), OperationError>) {
        if let Err(e) = &result {
            warn!("{}: {:?} failed, reverting: {}", self.path, operation, e);
        }
        self.state.set(operation.settle(result.is_ok()));
        self.render();
    }

    fn render(&self) {
        let toggle = self.toggle.borrow().clone();
        if let Some(toggle) = toggle {
            let state = self.state.get();
            toggle.set_toggle_state(state.shows_on());
            toggle.set_status(state.status());
        }
    }
}
