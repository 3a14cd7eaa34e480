use anyhow::{anyhow, Result};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

use crate::config::IndicatorConfig;
use crate::connection::ConnectionState;
use crate::entry_store::{DeviceEntryStore, EntryContext};
use crate::shell::{AppLauncher, DeviceProvider, IndicatorShell, KillswitchState, ProviderEvent};

/// Menu rows that precede the device block: killswitch, visibility, separator.
pub const DEVICE_ITEM_POSITION: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub path: String,
    pub name: String,
    pub state: Option<ConnectionState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndicatorStatus {
    pub killswitch: KillswitchState,
    pub discoverable: bool,
    pub full_menu: bool,
    pub entries: Vec<EntryStatus>,
}

/// Wires provider state into the shell: radio mirrors, full-menu policy and
/// the device entry store.
pub struct Indicator {
    provider: Rc<dyn DeviceProvider>,
    shell: Rc<dyn IndicatorShell>,
    launcher: Rc<dyn AppLauncher>,
    store: RefCell<DeviceEntryStore>,
    sendto_command: String,
    wizard_command: String,
    settings_desktop_id: String,
}

impl Indicator {
    pub fn new(
        provider: Rc<dyn DeviceProvider>,
        ctx: EntryContext,
        config: &IndicatorConfig,
    ) -> Rc<Self> {
        let indicator = Rc::new(Self {
            provider,
            shell: ctx.shell.clone(),
            launcher: ctx.launcher.clone(),
            store: RefCell::new(DeviceEntryStore::new(ctx, DEVICE_ITEM_POSITION)),
            sendto_command: config.sendto_command.clone(),
            wizard_command: config.wizard_command.clone(),
            settings_desktop_id: config.settings_desktop_id.clone(),
        });

        indicator.update_killswitch();
        indicator.update_discoverable();
        indicator.update_devices();
        indicator.update_full_menu();
        indicator
    }

    pub fn handle_event(&self, event: ProviderEvent) {
        debug!("Provider event: {:?}", event);
        match event {
            ProviderEvent::DevicesChanged => self.update_devices(),
            ProviderEvent::KillswitchChanged => self.update_killswitch(),
            ProviderEvent::DiscoverableChanged => self.update_discoverable(),
            ProviderEvent::FullMenuChanged => self.update_full_menu(),
        }
    }

    fn update_killswitch(&self) {
        let state = self.provider.killswitch_state();
        let status = if state.can_toggle() {
            None
        } else {
            Some("hardware disabled")
        };
        self.shell.set_killswitch(state.is_on(), status);
        self.shell.set_indicator_visible(state.has_adapter());
        self.shell.set_discoverable_visible(state.is_on());
        self.shell.set_icon(if state.is_on() {
            "bluetooth-active-symbolic"
        } else {
            "bluetooth-disabled-symbolic"
        });
    }

    fn update_discoverable(&self) {
        self.shell.set_discoverable(self.provider.discoverable());
    }

    fn update_devices(&self) {
        let devices = self.provider.devices();
        let report = self.store.borrow_mut().reconcile(&devices);
        if report.created > 0 || report.destroyed > 0 {
            info!(
                "Device entries changed: {} added, {} removed",
                report.created, report.destroyed
            );
        }
        self.shell
            .set_connected_count(devices.iter().filter(|d| d.connected).count());
    }

    fn update_full_menu(&self) {
        let mut store = self.store.borrow_mut();
        if self.provider.show_full_menu() {
            self.shell.set_full_menu_visible(true);
            // Marks the store visible even while it is empty
            store.show_all();
        } else {
            self.shell.set_full_menu_visible(false);
            store.hide_all();
        }
    }

    /// The user flipped the radio switch.
    pub fn killswitch_toggled(&self, on: bool) {
        let state = self.provider.killswitch_state();
        if state.can_toggle() {
            let requested = if on {
                KillswitchState::Unblocked
            } else {
                KillswitchState::SoftBlocked
            };
            info!("Setting Bluetooth killswitch to {:?}", requested);
            self.provider.set_killswitch_state(requested);
        } else {
            self.shell.set_killswitch(false, Some("hardware disabled"));
        }
    }

    pub fn discoverable_toggled(&self, on: bool) {
        info!("Setting adapter visibility to {}", on);
        self.provider.set_discoverable(on);
    }

    pub fn send_files(&self) {
        self.launcher.run_command(&self.sendto_command);
    }

    pub fn setup_new_device(&self) {
        self.launcher.run_command(&self.wizard_command);
    }

    pub fn open_settings(&self) {
        self.launcher.launch_desktop(&self.settings_desktop_id);
    }

    /// Flip a device's connection as if its switch were clicked.
    pub fn toggle_device(&self, path: &str) -> Result<bool> {
        let weak = {
            let store = self.store.borrow();
            let entry = store
                .find(path)
                .ok_or_else(|| anyhow!("no device entry for {}", path))?;
            entry
                .controller()
                .ok_or_else(|| anyhow!("device {} cannot connect", path))?
                .downgrade()
        };
        // The store is released here; the operator may report changes back
        // synchronously.
        let controller = weak
            .upgrade()
            .ok_or_else(|| anyhow!("device entry for {} went away", path))?;
        Ok(controller.request_toggle()?)
    }

    pub fn status(&self) -> IndicatorStatus {
        let store = self.store.borrow();
        IndicatorStatus {
            killswitch: self.provider.killswitch_state(),
            discoverable: self.provider.discoverable(),
            full_menu: self.provider.show_full_menu(),
            entries: store
                .entries()
                .iter()
                .map(|entry| EntryStatus {
                    path: entry.path(),
                    name: entry.display_name(),
                    state: entry.connection_state(),
                })
                .collect(),
        }
    }
}

impl Drop for Indicator {
    fn drop(&mut self) {
        self.store.get_mut().clear();
    }
}
