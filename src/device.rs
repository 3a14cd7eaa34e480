use serde::Serialize;
use std::fmt;

/// Capability flags reported for a paired device, apart from connect-ability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const OBEX_PUSH: Capabilities = Capabilities(1 << 0);
    pub const OBEX_FILE_TRANSFER: Capabilities = Capabilities(1 << 1);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Capabilities) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Capabilities::OBEX_PUSH) {
            names.push("obex-push");
        }
        if self.contains(Capabilities::OBEX_FILE_TRANSFER) {
            names.push("obex-file-transfer");
        }
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    Keyboard,
    Mouse,
    Headset,
    Headphones,
    OtherAudio,
    Other,
    None,
}

impl DeviceKind {
    /// Classify a device from the freedesktop icon name BlueZ reports.
    pub fn from_icon(icon: &str) -> Self {
        match icon {
            "" => DeviceKind::None,
            s if s.contains("keyboard") => DeviceKind::Keyboard,
            s if s.contains("mouse") || s.contains("tablet") => DeviceKind::Mouse,
            s if s.contains("headset") => DeviceKind::Headset,
            s if s.contains("headphones") => DeviceKind::Headphones,
            s if s.starts_with("audio") => DeviceKind::OtherAudio,
            _ => DeviceKind::Other,
        }
    }

    pub fn settings_panel(self) -> Option<SettingsPanel> {
        match self {
            DeviceKind::Keyboard => Some(SettingsPanel::Keyboard),
            DeviceKind::Mouse => Some(SettingsPanel::Mouse),
            DeviceKind::Headset | DeviceKind::Headphones | DeviceKind::OtherAudio => {
                Some(SettingsPanel::Sound)
            }
            DeviceKind::Other | DeviceKind::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsPanel {
    Keyboard,
    Mouse,
    Sound,
}

impl SettingsPanel {
    pub fn label(self) -> &'static str {
        match self {
            SettingsPanel::Keyboard => "Keyboard Settings",
            SettingsPanel::Mouse => "Mouse Settings",
            SettingsPanel::Sound => "Sound Settings",
        }
    }

    pub fn desktop_id(self) -> &'static str {
        match self {
            SettingsPanel::Keyboard => "gnome-keyboard-panel.desktop",
            SettingsPanel::Mouse => "gnome-mouse-panel.desktop",
            SettingsPanel::Sound => "gnome-sound-panel.desktop",
        }
    }
}

/// One device as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub path: String,
    pub display_name: String,
    pub address: String,
    pub capabilities: Capabilities,
    pub can_connect: bool,
    pub kind: DeviceKind,
    pub connected: bool,
}

impl Device {
    /// Whether the device earns a menu entry.
    pub fn qualifies(&self) -> bool {
        self.can_connect || !self.capabilities.is_empty()
    }
}

/// Actions offered in a device submenu, besides the connection toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    SendFiles,
    BrowseFiles,
    Settings(SettingsPanel),
}

impl DeviceAction {
    /// Capability-gated actions for `device`, in menu order.
    pub fn for_device(device: &Device) -> Vec<DeviceAction> {
        let mut actions = Vec::new();
        if device.capabilities.contains(Capabilities::OBEX_PUSH) {
            actions.push(DeviceAction::SendFiles);
        }
        if device.capabilities.contains(Capabilities::OBEX_FILE_TRANSFER) {
            actions.push(DeviceAction::BrowseFiles);
        }
        if let Some(panel) = device.kind.settings_panel() {
            actions.push(DeviceAction::Settings(panel));
        }
        actions
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceAction::SendFiles => "Send Files...",
            DeviceAction::BrowseFiles => "Browse Files...",
            DeviceAction::Settings(panel) => panel.label(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::device;

    #[test]
    fn qualification_needs_connect_or_capability() {
        let mut d = device("/dev_A", false, false);
        assert!(!d.qualifies());

        d.capabilities = Capabilities::OBEX_PUSH;
        assert!(d.qualifies());

        d.capabilities = Capabilities::NONE;
        d.can_connect = true;
        assert!(d.qualifies());
    }

    #[test]
    fn kind_from_bluez_icons() {
        assert_eq!(DeviceKind::from_icon("input-keyboard"), DeviceKind::Keyboard);
        assert_eq!(DeviceKind::from_icon("input-mouse"), DeviceKind::Mouse);
        assert_eq!(DeviceKind::from_icon("audio-headset"), DeviceKind::Headset);
        assert_eq!(DeviceKind::from_icon("audio-headphones"), DeviceKind::Headphones);
        assert_eq!(DeviceKind::from_icon("audio-card"), DeviceKind::OtherAudio);
        assert_eq!(DeviceKind::from_icon("phone"), DeviceKind::Other);
        assert_eq!(DeviceKind::from_icon(""), DeviceKind::None);
    }

    #[test]
    fn actions_follow_capabilities_then_kind() {
        let mut d = device("/dev_A", true, false);
        d.capabilities = Capabilities::OBEX_PUSH | Capabilities::OBEX_FILE_TRANSFER;
        d.kind = DeviceKind::Headphones;

        assert_eq!(
            DeviceAction::for_device(&d),
            vec![
                DeviceAction::SendFiles,
                DeviceAction::BrowseFiles,
                DeviceAction::Settings(SettingsPanel::Sound),
            ]
        );

        d.capabilities = Capabilities::NONE;
        d.kind = DeviceKind::Other;
        assert!(DeviceAction::for_device(&d).is_empty());
    }

    #[test]
    fn settings_table_is_exhaustive() {
        assert_eq!(
            DeviceKind::Keyboard.settings_panel().map(SettingsPanel::desktop_id),
            Some("gnome-keyboard-panel.desktop")
        );
        assert_eq!(
            DeviceKind::Mouse.settings_panel().map(SettingsPanel::desktop_id),
            Some("gnome-mouse-panel.desktop")
        );
        assert_eq!(DeviceKind::Headset.settings_panel(), Some(SettingsPanel::Sound));
        assert_eq!(DeviceKind::None.settings_panel(), None);
    }

    #[test]
    fn capabilities_display() {
        assert_eq!(Capabilities::NONE.to_string(), "none");
        assert_eq!(
            (Capabilities::OBEX_PUSH | Capabilities::OBEX_FILE_TRANSFER).to_string(),
            "obex-push|obex-file-transfer"
        );
    }
}
