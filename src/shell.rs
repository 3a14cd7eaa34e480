//! Seams between the indicator core and its collaborators: the menu shell
//! that displays entries, the service that supplies devices, and the
//! launcher for companion applications.

use std::rc::Rc;

use crate::device::Device;

/// Callback invoked from the UI on user interaction.
pub type Handler = Box<dyn Fn()>;

/// The connection switch inside a device submenu.
pub trait ToggleView {
    fn set_toggle_state(&self, on: bool);
    fn set_status(&self, status: Option<&str>);
}

/// One device entry placed in the menu.
pub trait EntryView {
    fn set_label(&self, label: &str);
    fn move_to(&self, position: usize);
    fn clear_actions(&self);
    fn add_connection_toggle(&self, on: bool, on_toggled: Handler) -> Rc<dyn ToggleView>;
    fn add_action(&self, label: &str, on_activate: Handler);
    fn show(&self);
    fn hide(&self);
    fn destroy(&self);
}

/// The panel button and its menu.
pub trait IndicatorShell {
    fn insert_entry(&self, label: &str, position: usize) -> Rc<dyn EntryView>;
    fn set_killswitch(&self, on: bool, status: Option<&str>);
    fn set_discoverable(&self, on: bool);
    fn set_discoverable_visible(&self, visible: bool);
    fn set_indicator_visible(&self, visible: bool);
    fn set_icon(&self, icon_name: &str);
    fn set_full_menu_visible(&self, visible: bool);
    fn set_connected_count(&self, count: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KillswitchState {
    NoAdapter,
    HardBlocked,
    SoftBlocked,
    Unblocked,
}

impl KillswitchState {
    pub fn is_on(self) -> bool {
        self == KillswitchState::Unblocked
    }

    pub fn has_adapter(self) -> bool {
        self != KillswitchState::NoAdapter
    }

    pub fn can_toggle(self) -> bool {
        !matches!(self, KillswitchState::NoAdapter | KillswitchState::HardBlocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEvent {
    DevicesChanged,
    KillswitchChanged,
    DiscoverableChanged,
    FullMenuChanged,
}

/// Source of device snapshots and adapter state.
pub trait DeviceProvider {
    fn devices(&self) -> Vec<Device>;
    fn killswitch_state(&self) -> KillswitchState;
    fn set_killswitch_state(&self, state: KillswitchState);
    fn discoverable(&self) -> bool;
    fn set_discoverable(&self, discoverable: bool);
    fn show_full_menu(&self) -> bool;
}

/// Fire-and-forget launcher for companion applications.
pub trait AppLauncher {
    fn launch_desktop(&self, desktop_id: &str);
    fn run_command(&self, command_line: &str);
    fn send_files(&self, address: &str, name: &str);
    fn browse_files(&self, address: &str);
}
