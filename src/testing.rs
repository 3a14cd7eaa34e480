//! In-memory collaborators for unit tests.

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};
use futures::FutureExt;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::connection::{ConnectionOperator, OperationError, OperationFuture};
use crate::device::{Capabilities, Device, DeviceKind};
use crate::entry_store::EntryContext;
use crate::shell::{
    AppLauncher, DeviceProvider, EntryView, Handler, IndicatorShell, KillswitchState, ToggleView,
};

pub fn device(path: &str, can_connect: bool, connected: bool) -> Device {
    Device {
        path: path.to_string(),
        display_name: format!("Device {}", path),
        address: format!("00:00:00:00:00:0{}", path),
        capabilities: Capabilities::NONE,
        can_connect,
        kind: DeviceKind::None,
        connected,
    }
}

#[derive(Default)]
pub struct FakeToggle {
    on: Cell<bool>,
    status: RefCell<Option<String>>,
    renders: Cell<usize>,
}

impl FakeToggle {
    pub fn is_on(&self) -> bool {
        self.on.get()
    }

    pub fn status(&self) -> Option<String> {
        self.status.borrow().clone()
    }

    pub fn render_count(&self) -> usize {
        self.renders.get()
    }
}

impl ToggleView for FakeToggle {
    fn set_toggle_state(&self, on: bool) {
        self.on.set(on);
        self.renders.set(self.renders.get() + 1);
    }

    fn set_status(&self, status: Option<&str>) {
        self.status.replace(status.map(str::to_string));
    }
}

pub struct FakeEntryView {
    label: RefCell<String>,
    position: Cell<usize>,
    visible: Cell<bool>,
    destroyed: Cell<bool>,
    rebuilds: Cell<usize>,
    toggle: RefCell<Option<(Rc<FakeToggle>, Rc<Handler>)>>,
    actions: RefCell<Vec<(String, Rc<Handler>)>>,
}

impl FakeEntryView {
    fn new(label: &str, position: usize) -> Self {
        Self {
            label: RefCell::new(label.to_string()),
            position: Cell::new(position),
            visible: Cell::new(true),
            destroyed: Cell::new(false),
            rebuilds: Cell::new(0),
            toggle: RefCell::new(None),
            actions: RefCell::new(Vec::new()),
        }
    }

    pub fn label(&self) -> String {
        self.label.borrow().clone()
    }

    pub fn position(&self) -> usize {
        self.position.get()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds.get()
    }

    pub fn has_toggle(&self) -> bool {
        self.toggle.borrow().is_some()
    }

    pub fn toggle(&self) -> Rc<FakeToggle> {
        let toggle = self.toggle.borrow();
        let (toggle, _) = toggle.as_ref().expect("entry has no connection toggle");
        toggle.clone()
    }

    /// Flip the switch the way a user click does, then notify the handler.
    pub fn click_toggle(&self) {
        let (toggle, handler) = self
            .toggle
            .borrow()
            .clone()
            .expect("entry has no connection toggle");
        toggle.on.set(!toggle.on.get());
        handler();
    }

    pub fn action_labels(&self) -> Vec<String> {
        self.actions.borrow().iter().map(|(label, _)| label.clone()).collect()
    }

    pub fn activate(&self, label: &str) {
        let handler = self
            .actions
            .borrow()
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, handler)| handler.clone())
            .expect("no such action");
        handler();
    }
}

impl EntryView for FakeEntryView {
    fn set_label(&self, label: &str) {
        self.label.replace(label.to_string());
    }

    fn move_to(&self, position: usize) {
        self.position.set(position);
    }

    fn clear_actions(&self) {
        self.rebuilds.set(self.rebuilds.get() + 1);
        self.toggle.replace(None);
        self.actions.borrow_mut().clear();
    }

    fn add_connection_toggle(&self, on: bool, on_toggled: Handler) -> Rc<dyn ToggleView> {
        let toggle = Rc::new(FakeToggle::default());
        toggle.on.set(on);
        self.toggle.replace(Some((toggle.clone(), Rc::new(on_toggled))));
        toggle
    }

    fn add_action(&self, label: &str, on_activate: Handler) {
        self.actions
            .borrow_mut()
            .push((label.to_string(), Rc::new(on_activate)));
    }

    fn show(&self) {
        self.visible.set(true);
    }

    fn hide(&self) {
        self.visible.set(false);
    }

    fn destroy(&self) {
        self.destroyed.set(true);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillswitchView {
    pub on: bool,
    pub status: Option<String>,
}

pub struct FakeShell {
    views: RefCell<Vec<(String, Rc<FakeEntryView>)>>,
    pub killswitch: RefCell<KillswitchView>,
    pub discoverable: Cell<bool>,
    pub discoverable_visible: Cell<bool>,
    pub indicator_visible: Cell<bool>,
    pub icon: RefCell<String>,
    pub full_menu_visible: Cell<bool>,
    pub connected_count: Cell<usize>,
}

impl Default for FakeShell {
    fn default() -> Self {
        Self {
            views: RefCell::new(Vec::new()),
            killswitch: RefCell::new(KillswitchView { on: false, status: None }),
            discoverable: Cell::new(false),
            discoverable_visible: Cell::new(false),
            indicator_visible: Cell::new(false),
            icon: RefCell::new(String::new()),
            full_menu_visible: Cell::new(false),
            connected_count: Cell::new(0),
        }
    }
}

impl FakeShell {
    /// Latest view inserted for the device whose label is `Device <path>`.
    pub fn view(&self, path: &str) -> Rc<FakeEntryView> {
        let label = format!("Device {}", path);
        self.views
            .borrow()
            .iter()
            .rev()
            .find(|(initial, _)| *initial == label)
            .map(|(_, view)| view.clone())
            .expect("no view for device")
    }

    pub fn inserted_count(&self) -> usize {
        self.views.borrow().len()
    }
}

impl IndicatorShell for FakeShell {
    fn insert_entry(&self, label: &str, position: usize) -> Rc<dyn EntryView> {
        let view = Rc::new(FakeEntryView::new(label, position));
        self.views.borrow_mut().push((label.to_string(), view.clone()));
        view
    }

    fn set_killswitch(&self, on: bool, status: Option<&str>) {
        self.killswitch.replace(KillswitchView {
            on,
            status: status.map(str::to_string),
        });
    }

    fn set_discoverable(&self, on: bool) {
        self.discoverable.set(on);
    }

    fn set_discoverable_visible(&self, visible: bool) {
        self.discoverable_visible.set(visible);
    }

    fn set_indicator_visible(&self, visible: bool) {
        self.indicator_visible.set(visible);
    }

    fn set_icon(&self, icon_name: &str) {
        self.icon.replace(icon_name.to_string());
    }

    fn set_full_menu_visible(&self, visible: bool) {
        self.full_menu_visible.set(visible);
    }

    fn set_connected_count(&self, count: usize) {
        self.connected_count.set(count);
    }
}

/// Operator whose results are released by the test, oldest call first.
#[derive(Default)]
pub struct ScriptedOperator {
    calls: RefCell<Vec<String>>,
    pending: RefCell<VecDeque<oneshot::Sender<Result<(), OperationError>>>>,
}

impl ScriptedOperator {
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn resolve(&self, result: Result<(), OperationError>) {
        let sender = self
            .pending
            .borrow_mut()
            .pop_front()
            .expect("no operation in flight");
        let _ = sender.send(result);
    }

    fn start(&self, call: String) -> OperationFuture {
        let (tx, rx) = oneshot::channel();
        self.calls.borrow_mut().push(call);
        self.pending.borrow_mut().push_back(tx);
        rx.map(|result| {
            result.unwrap_or_else(|_| Err(OperationError::Bus("operator dropped".into())))
        })
        .boxed_local()
    }
}

impl ConnectionOperator for ScriptedOperator {
    fn connect(&self, path: &str) -> OperationFuture {
        self.start(format!("connect {}", path))
    }

    fn disconnect(&self, path: &str) -> OperationFuture {
        self.start(format!("disconnect {}", path))
    }
}

/// Executor that has shut down and accepts no tasks.
pub struct RefusingSpawner;

impl LocalSpawn for RefusingSpawner {
    fn spawn_local_obj(&self, _future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        Err(SpawnError::shutdown())
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    launched: RefCell<Vec<String>>,
}

impl RecordingLauncher {
    pub fn launched(&self) -> Vec<String> {
        self.launched.borrow().clone()
    }
}

impl AppLauncher for RecordingLauncher {
    fn launch_desktop(&self, desktop_id: &str) {
        self.launched.borrow_mut().push(format!("desktop {}", desktop_id));
    }

    fn run_command(&self, command_line: &str) {
        self.launched.borrow_mut().push(format!("run {}", command_line));
    }

    fn send_files(&self, address: &str, name: &str) {
        self.launched
            .borrow_mut()
            .push(format!("send-files {} {}", address, name));
    }

    fn browse_files(&self, address: &str) {
        self.launched.borrow_mut().push(format!("browse {}", address));
    }
}

pub struct FakeProvider {
    pub devices: RefCell<Vec<Device>>,
    pub killswitch: Cell<KillswitchState>,
    pub discoverable: Cell<bool>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            devices: RefCell::new(Vec::new()),
            killswitch: Cell::new(KillswitchState::Unblocked),
            discoverable: Cell::new(false),
        }
    }
}

impl DeviceProvider for FakeProvider {
    fn devices(&self) -> Vec<Device> {
        self.devices.borrow().clone()
    }

    fn killswitch_state(&self) -> KillswitchState {
        self.killswitch.get()
    }

    fn set_killswitch_state(&self, state: KillswitchState) {
        self.killswitch.set(state);
    }

    fn discoverable(&self) -> bool {
        self.discoverable.get()
    }

    fn set_discoverable(&self, discoverable: bool) {
        self.discoverable.set(discoverable);
    }

    fn show_full_menu(&self) -> bool {
        self.killswitch.get().is_on()
    }
}

/// Fakes wired together around a single-threaded executor.
pub struct Harness {
    pub pool: LocalPool,
    pub shell: Rc<FakeShell>,
    pub operator: Rc<ScriptedOperator>,
    pub launcher: Rc<RecordingLauncher>,
    pub provider: Rc<FakeProvider>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            pool: LocalPool::new(),
            shell: Rc::new(FakeShell::default()),
            operator: Rc::new(ScriptedOperator::default()),
            launcher: Rc::new(RecordingLauncher::default()),
            provider: Rc::new(FakeProvider::default()),
        }
    }

    pub fn ctx(&self) -> EntryContext {
        EntryContext {
            shell: self.shell.clone(),
            operator: self.operator.clone(),
            spawner: Rc::new(self.pool.spawner()),
            launcher: self.launcher.clone(),
        }
    }
}
