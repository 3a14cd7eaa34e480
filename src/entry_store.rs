use futures::task::LocalSpawn;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::{debug, info};

use crate::connection::{ConnectionController, ConnectionOperator, ConnectionState};
use crate::device::{Device, DeviceAction};
use crate::shell::{AppLauncher, EntryView, IndicatorShell};

/// Collaborators every entry needs when it builds its submenu.
#[derive(Clone)]
pub struct EntryContext {
    pub shell: Rc<dyn IndicatorShell>,
    pub operator: Rc<dyn ConnectionOperator>,
    pub spawner: Rc<dyn LocalSpawn>,
    pub launcher: Rc<dyn AppLauncher>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub destroyed: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum EntryUpdate {
    Retained,
    Disqualified,
}

/// Menu entry for one qualifying device.
pub struct DeviceEntry {
    device: Rc<RefCell<Device>>,
    view: Rc<dyn EntryView>,
    controller: Option<ConnectionController>,
    position: usize,
}

impl DeviceEntry {
    fn create(device: &Device, position: usize, ctx: &EntryContext) -> Self {
        let view = ctx.shell.insert_entry(&device.display_name, position);
        let mut entry = Self {
            device: Rc::new(RefCell::new(device.clone())),
            view,
            controller: None,
            position,
        };
        entry.build_actions(ctx);
        info!("Added device entry {} ({})", device.display_name, device.path);
        entry
    }

    pub fn path(&self) -> String {
        self.device.borrow().path.clone()
    }

    pub fn display_name(&self) -> String {
        self.device.borrow().display_name.clone()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.controller.as_ref().map(ConnectionController::state)
    }

    pub fn controller(&self) -> Option<&ConnectionController> {
        self.controller.as_ref()
    }

    fn update(&mut self, device: &Device, ctx: &EntryContext) -> EntryUpdate {
        if !device.qualifies() {
            return EntryUpdate::Disqualified;
        }

        let previous = self.device.replace(device.clone());
        self.view.set_label(&device.display_name);

        if previous.capabilities != device.capabilities
            || previous.can_connect != device.can_connect
        {
            debug!(
                "{}: capabilities {} -> {}, rebuilding submenu",
                device.path, previous.capabilities, device.capabilities
            );
            self.build_actions(ctx);
        } else if let Some(controller) = &self.controller {
            controller.sync_from_device(device.connected);
        }
        EntryUpdate::Retained
    }

    fn build_actions(&mut self, ctx: &EntryContext) {
        self.view.clear_actions();
        let device = self.device.borrow().clone();

        if device.can_connect {
            let controller = match self.controller.take() {
                Some(existing) => {
                    existing.sync_from_device(device.connected);
                    existing
                }
                None => ConnectionController::new(
                    &device.path,
                    device.connected,
                    ctx.operator.clone(),
                    ctx.spawner.clone(),
                ),
            };
            let weak = controller.downgrade();
            let toggle = self.view.add_connection_toggle(
                controller.state().shows_on(),
                Box::new(move || {
                    if let Some(controller) = weak.upgrade() {
                        if let Err(e) = controller.request_toggle() {
                            debug!("{}: toggle not started: {}", controller.path(), e);
                        }
                    }
                }),
            );
            controller.attach_toggle(toggle);
            self.controller = Some(controller);
        } else {
            self.controller = None;
        }

        for action in DeviceAction::for_device(&device) {
            let device = Rc::downgrade(&self.device);
            let launcher = ctx.launcher.clone();
            self.view.add_action(
                action.label(),
                Box::new(move || {
                    if let Some(device) = device.upgrade() {
                        run_action(action, &device.borrow(), launcher.as_ref());
                    }
                }),
            );
        }
    }

    fn place(&mut self, position: usize) {
        if self.position != position {
            self.position = position;
            self.view.move_to(position);
        }
    }

    fn destroy(mut self) {
        info!("Removing device entry {}", self.path());
        if let Some(controller) = self.controller.take() {
            controller.detach_toggle();
        }
        self.view.destroy();
    }
}

fn run_action(action: DeviceAction, device: &Device, launcher: &dyn AppLauncher) {
    match action {
        DeviceAction::SendFiles => launcher.send_files(&device.address, &device.display_name),
        DeviceAction::BrowseFiles => launcher.browse_files(&device.address),
        DeviceAction::Settings(panel) => launcher.launch_desktop(panel.desktop_id()),
    }
}

/// Ordered device entries, kept in step with the provider's snapshots.
pub struct DeviceEntryStore {
    ctx: EntryContext,
    base_offset: usize,
    entries: Vec<DeviceEntry>,
    visible: bool,
}

impl DeviceEntryStore {
    pub fn new(ctx: EntryContext, base_offset: usize) -> Self {
        Self {
            ctx,
            base_offset,
            entries: Vec::new(),
            visible: true,
        }
    }

    pub fn reconcile(&mut self, snapshot: &[Device]) -> ReconcileReport {
        let mut by_path: HashMap<&str, &Device> = HashMap::with_capacity(snapshot.len());
        for device in snapshot {
            by_path.entry(device.path.as_str()).or_insert(device);
        }

        let mut report = ReconcileReport::default();
        let mut retained = Vec::with_capacity(self.entries.len());
        for mut entry in std::mem::take(&mut self.entries) {
            let path = entry.path();
            let outcome = by_path
                .get(path.as_str())
                .map(|device| entry.update(device, &self.ctx));
            match outcome {
                Some(EntryUpdate::Retained) => {
                    report.updated += 1;
                    retained.push(entry);
                }
                Some(EntryUpdate::Disqualified) | None => {
                    report.destroyed += 1;
                    entry.destroy();
                }
            }
        }

        for (index, entry) in retained.iter_mut().enumerate() {
            entry.place(self.base_offset + index);
        }
        let mut bound: HashSet<String> = retained.iter().map(DeviceEntry::path).collect();
        self.entries = retained;

        for device in snapshot {
            if !device.qualifies() || !bound.insert(device.path.clone()) {
                continue;
            }
            let position = self.base_offset + self.entries.len();
            let entry = DeviceEntry::create(device, position, &self.ctx);
            if !self.visible {
                entry.view.hide();
            }
            self.entries.push(entry);
            report.created += 1;
        }

        debug!(
            "Reconciled {} devices: {} created, {} updated, {} destroyed",
            snapshot.len(),
            report.created,
            report.updated,
            report.destroyed
        );
        report
    }

    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn find(&self, path: &str) -> Option<&DeviceEntry> {
        self.entries.iter().find(|entry| entry.device.borrow().path == path)
    }

    pub fn show_all(&mut self) {
        self.visible = true;
        for entry in &self.entries {
            entry.view.show();
        }
    }

    pub fn hide_all(&mut self) {
        self.visible = false;
        for entry in &self.entries {
            entry.view.hide();
        }
    }

    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            entry.destroy();
        }
    }
}
