//! BlueZ over the system D-Bus: device snapshots, adapter state, and
//! connect/disconnect for the indicator.
//!
//! All calls run on the GLib main context. Property and object-manager
//! signals trigger a debounced `GetManagedObjects` refresh; the refreshed
//! state is diffed against the cached one and only the matching
//! [`ProviderEvent`]s are emitted.

use futures::FutureExt;
use glib::{ToVariant, Variant, VariantTy};
use gtk4::gio::{
    self, BusType, DBusCallFlags, DBusConnection, DBusSignalFlags, SignalSubscriptionId,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::IndicatorConfig;
use crate::connection::{ConnectionOperator, OperationError, OperationFuture};
use crate::device::{Capabilities, Device, DeviceKind};
use crate::shell::{DeviceProvider, KillswitchState, ProviderEvent};

const BLUEZ_SERVICE: &str = "org.bluez";
const ADAPTER_IFACE: &str = "org.bluez.Adapter1";
const DEVICE_IFACE: &str = "org.bluez.Device1";
const OBJECT_MANAGER_IFACE: &str = "org.freedesktop.DBus.ObjectManager";
const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";
const MANAGED_OBJECTS_TYPE: &str = "(a{oa{sa{sv}}})";
const RFKILL_ROOT: &str = "/sys/class/rfkill";

const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";
const OBEX_OBJECT_PUSH: u16 = 0x1105;
const OBEX_FILE_TRANSFER: u16 = 0x1106;
/// Profiles the Device1 Connect method can bring up.
const CONNECTABLE_PROFILES: &[u16] = &[
    0x1108, // Headset
    0x110a, // Audio source
    0x110b, // Audio sink
    0x110e, // A/V remote control
    0x1115, // PANU
    0x1116, // NAP
    0x111e, // Handsfree
    0x1124, // HID
    0x1812, // HID over GATT
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct AdapterInfo {
    path: String,
    powered: bool,
    discoverable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct BluezState {
    adapter: Option<AdapterInfo>,
    devices: Vec<Device>,
    hard_blocked: bool,
}

impl BluezState {
    fn killswitch(&self) -> KillswitchState {
        match &self.adapter {
            None => KillswitchState::NoAdapter,
            Some(_) if self.hard_blocked => KillswitchState::HardBlocked,
            Some(adapter) if adapter.powered => KillswitchState::Unblocked,
            Some(_) => KillswitchState::SoftBlocked,
        }
    }

    fn discoverable(&self) -> bool {
        self.adapter.as_ref().map(|a| a.discoverable).unwrap_or(false)
    }

    fn show_full_menu(&self) -> bool {
        self.killswitch().is_on()
    }
}

fn diff_events(old: &BluezState, new: &BluezState) -> Vec<ProviderEvent> {
    let mut events = Vec::new();
    if old.killswitch() != new.killswitch() {
        events.push(ProviderEvent::KillswitchChanged);
    }
    if old.discoverable() != new.discoverable() {
        events.push(ProviderEvent::DiscoverableChanged);
    }
    if old.devices != new.devices {
        events.push(ProviderEvent::DevicesChanged);
    }
    if old.show_full_menu() != new.show_full_menu() {
        events.push(ProviderEvent::FullMenuChanged);
    }
    events
}

type EventCallback = Rc<dyn Fn(ProviderEvent)>;

/// Identifies a listener added with [`BluezService::connect_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandlerId(u64);

#[derive(Default)]
struct EventListeners {
    next_id: Cell<u64>,
    callbacks: RefCell<Vec<(EventHandlerId, EventCallback)>>,
}

impl EventListeners {
    fn connect(&self, callback: EventCallback) -> EventHandlerId {
        let id = EventHandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.callbacks.borrow_mut().push((id, callback));
        id
    }

    fn disconnect(&self, id: EventHandlerId) -> bool {
        let mut callbacks = self.callbacks.borrow_mut();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    // Listeners may disconnect while an event is being delivered
    fn emit(&self, event: ProviderEvent) {
        let callbacks: Vec<EventCallback> = self
            .callbacks
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }
}

/// BlueZ-backed device provider and connection operator.
pub struct BluezService {
    connection: RefCell<Option<DBusConnection>>,
    state: RefCell<BluezState>,
    listeners: EventListeners,
    debounce_id: RefCell<Option<glib::SourceId>>,
    subscriptions: RefCell<Vec<SignalSubscriptionId>>,
    connect_timeout_ms: i32,
    debounce: Duration,
    rfkill_root: PathBuf,
}

impl BluezService {
    pub fn new(config: &IndicatorConfig) -> Rc<Self> {
        let service = Rc::new(Self {
            connection: RefCell::new(None),
            state: RefCell::new(BluezState::default()),
            listeners: EventListeners::default(),
            debounce_id: RefCell::new(None),
            subscriptions: RefCell::new(Vec::new()),
            connect_timeout_ms: config.connect_timeout_ms,
            debounce: Duration::from_millis(config.refresh_debounce_ms),
            rfkill_root: PathBuf::from(RFKILL_ROOT),
        });

        let weak = Rc::downgrade(&service);
        glib::MainContext::default().spawn_local(async move {
            let connection = match gio::bus_get_future(BusType::System).await {
                Ok(connection) => connection,
                Err(e) => {
                    error!("Failed to get system bus: {}", e);
                    return;
                }
            };
            if let Some(service) = weak.upgrade() {
                service.attach(connection);
            }
        });

        service
    }

    /// Register a listener for state changes.
    pub fn connect_events<F>(&self, callback: F) -> EventHandlerId
    where
        F: Fn(ProviderEvent) + 'static,
    {
        self.listeners.connect(Rc::new(callback))
    }

    pub fn disconnect_events(&self, id: EventHandlerId) {
        if !self.listeners.disconnect(id) {
            debug!("Event listener {:?} was already removed", id);
        }
    }

    fn attach(self: &Rc<Self>, connection: DBusConnection) {
        info!("Connected to system bus, watching {}", BLUEZ_SERVICE);
        let mut subscriptions = Vec::new();
        for (interface, member) in [
            (PROPERTIES_IFACE, "PropertiesChanged"),
            (OBJECT_MANAGER_IFACE, "InterfacesAdded"),
            (OBJECT_MANAGER_IFACE, "InterfacesRemoved"),
        ] {
            let weak = Rc::downgrade(self);
            let id = connection.signal_subscribe(
                Some(BLUEZ_SERVICE),
                Some(interface),
                Some(member),
                None,
                None,
                DBusSignalFlags::NONE,
                move |_, _, _, _, _, _| {
                    if let Some(service) = weak.upgrade() {
                        service.schedule_refresh();
                    }
                },
            );
            subscriptions.push(id);
        }
        self.subscriptions.replace(subscriptions);
        self.connection.replace(Some(connection));
        self.refresh();
    }

    fn schedule_refresh(self: &Rc<Self>) {
        if self.debounce_id.borrow().is_some() {
            return;
        }
        let weak = Rc::downgrade(self);
        let id = glib::timeout_add_local(self.debounce, move || {
            if let Some(service) = weak.upgrade() {
                service.debounce_id.replace(None);
                service.refresh();
            }
            glib::ControlFlow::Break
        });
        self.debounce_id.replace(Some(id));
    }

    fn refresh(self: &Rc<Self>) {
        let Some(connection) = self.connection.borrow().clone() else {
            return;
        };
        let weak = Rc::downgrade(self);
        glib::MainContext::default().spawn_local(async move {
            let reply_type = VariantTy::new(MANAGED_OBJECTS_TYPE).ok();
            let result = connection
                .call_future(
                    Some(BLUEZ_SERVICE),
                    "/",
                    OBJECT_MANAGER_IFACE,
                    "GetManagedObjects",
                    None,
                    reply_type,
                    DBusCallFlags::NONE,
                    -1,
                )
                .await;
            let Some(service) = weak.upgrade() else {
                return;
            };
            let mut state = match result {
                Ok(reply) => parse_managed_objects(&reply),
                Err(e) => {
                    error!("GetManagedObjects failed: {}", e);
                    BluezState::default()
                }
            };
            state.hard_blocked = rfkill_hard_blocked(&service.rfkill_root);
            service.apply(state);
        });
    }

    fn apply(&self, state: BluezState) {
        let events = diff_events(&self.state.borrow(), &state);
        self.state.replace(state);
        if events.is_empty() {
            return;
        }
        debug!("BlueZ state changed: {:?}", events);

        for event in events {
            self.listeners.emit(event);
        }
    }

    fn set_adapter_property(&self, name: &'static str, value: bool) {
        let Some(connection) = self.connection.borrow().clone() else {
            warn!("Cannot set {}: not connected to the system bus", name);
            return;
        };
        let Some(adapter) = self.state.borrow().adapter.clone() else {
            warn!("Cannot set {}: no adapter", name);
            return;
        };

        let parameters = Variant::tuple_from_iter([
            ADAPTER_IFACE.to_variant(),
            name.to_variant(),
            Variant::from_variant(&value.to_variant()),
        ]);
        connection.call(
            Some(BLUEZ_SERVICE),
            &adapter.path,
            PROPERTIES_IFACE,
            "Set",
            Some(&parameters),
            None,
            DBusCallFlags::NONE,
            -1,
            None::<&gio::Cancellable>,
            move |res| {
                if let Err(e) = res {
                    error!("Setting adapter {} to {} failed: {}", name, value, e);
                }
            },
        );
    }

    fn device_call(&self, path: &str, method: &'static str) -> OperationFuture {
        let connection = self.connection.borrow().clone();
        let path = path.to_string();
        let timeout = self.connect_timeout_ms;
        async move {
            let connection =
                connection.ok_or_else(|| OperationError::DeviceUnavailable(path.clone()))?;
            connection
                .call_future(
                    Some(BLUEZ_SERVICE),
                    &path,
                    DEVICE_IFACE,
                    method,
                    None,
                    None,
                    DBusCallFlags::NONE,
                    timeout,
                )
                .await
                .map(|_| ())
                .map_err(|e| OperationError::Bus(e.to_string()))
        }
        .boxed_local()
    }
}

impl Drop for BluezService {
    fn drop(&mut self) {
        if let Some(id) = self.debounce_id.get_mut().take() {
            id.remove();
        }
        if let Some(connection) = self.connection.get_mut().take() {
            for id in self.subscriptions.get_mut().drain(..) {
                connection.signal_unsubscribe(id);
            }
        }
    }
}

impl DeviceProvider for BluezService {
    fn devices(&self) -> Vec<Device> {
        self.state.borrow().devices.clone()
    }

    fn killswitch_state(&self) -> KillswitchState {
        self.state.borrow().killswitch()
    }

    fn set_killswitch_state(&self, state: KillswitchState) {
        match state {
            KillswitchState::Unblocked => self.set_adapter_property("Powered", true),
            KillswitchState::SoftBlocked => self.set_adapter_property("Powered", false),
            KillswitchState::NoAdapter | KillswitchState::HardBlocked => {
                warn!("Ignoring request for killswitch state {:?}", state)
            }
        }
    }

    fn discoverable(&self) -> bool {
        self.state.borrow().discoverable()
    }

    fn set_discoverable(&self, discoverable: bool) {
        self.set_adapter_property("Discoverable", discoverable);
    }

    fn show_full_menu(&self) -> bool {
        self.state.borrow().show_full_menu()
    }
}

impl ConnectionOperator for BluezService {
    fn connect(&self, path: &str) -> OperationFuture {
        self.device_call(path, "Connect")
    }

    fn disconnect(&self, path: &str) -> OperationFuture {
        self.device_call(path, "Disconnect")
    }
}

fn parse_managed_objects(reply: &Variant) -> BluezState {
    let mut state = BluezState::default();
    if reply.type_().as_str() != MANAGED_OBJECTS_TYPE {
        warn!("Unexpected GetManagedObjects reply type {}", reply.type_().as_str());
        return state;
    }

    for object in reply.child_value(0).iter() {
        let Some(path) = object.child_value(0).str().map(str::to_string) else {
            continue;
        };
        for interface in object.child_value(1).iter() {
            let name = interface.child_value(0);
            let properties = properties(&interface.child_value(1));
            match name.str() {
                Some(ADAPTER_IFACE) if state.adapter.is_none() => {
                    state.adapter = Some(AdapterInfo {
                        path: path.clone(),
                        powered: bool_property(&properties, "Powered"),
                        discoverable: bool_property(&properties, "Discoverable"),
                    });
                }
                Some(DEVICE_IFACE) => {
                    if let Some(device) = device_from_properties(&path, &properties) {
                        state.devices.push(device);
                    }
                }
                _ => {}
            }
        }
    }

    state.devices.sort_by(|a, b| a.path.cmp(&b.path));
    state
}

fn properties(dict: &Variant) -> HashMap<String, Variant> {
    dict.iter()
        .filter_map(|entry| {
            let key = entry.child_value(0).str()?.to_string();
            let value = entry.child_value(1).as_variant()?;
            Some((key, value))
        })
        .collect()
}

fn bool_property(properties: &HashMap<String, Variant>, key: &str) -> bool {
    properties
        .get(key)
        .and_then(|v| v.get::<bool>())
        .unwrap_or(false)
}

fn string_property(properties: &HashMap<String, Variant>, key: &str) -> Option<String> {
    properties
        .get(key)
        .and_then(|v| v.str().map(str::to_string))
        .filter(|s| !s.is_empty())
}

/// Build a device from Device1 properties. Unpaired devices are skipped.
fn device_from_properties(path: &str, properties: &HashMap<String, Variant>) -> Option<Device> {
    if !bool_property(properties, "Paired") {
        return None;
    }

    let address = string_property(properties, "Address").unwrap_or_default();
    let display_name = string_property(properties, "Alias")
        .or_else(|| string_property(properties, "Name"))
        .unwrap_or_else(|| address.clone());
    let uuids = properties
        .get("UUIDs")
        .and_then(|v| v.get::<Vec<String>>())
        .unwrap_or_default();
    let kind = DeviceKind::from_icon(string_property(properties, "Icon").as_deref().unwrap_or(""));

    let mut capabilities = Capabilities::NONE;
    let mut connectable = matches!(
        kind,
        DeviceKind::Keyboard
            | DeviceKind::Mouse
            | DeviceKind::Headset
            | DeviceKind::Headphones
            | DeviceKind::OtherAudio
    );
    for profile in uuids.iter().filter_map(|uuid| short_uuid(uuid)) {
        match profile {
            OBEX_OBJECT_PUSH => capabilities.insert(Capabilities::OBEX_PUSH),
            OBEX_FILE_TRANSFER => capabilities.insert(Capabilities::OBEX_FILE_TRANSFER),
            p if CONNECTABLE_PROFILES.contains(&p) => connectable = true,
            _ => {}
        }
    }

    Some(Device {
        path: path.to_string(),
        display_name,
        address,
        capabilities,
        can_connect: connectable,
        kind,
        connected: bool_property(properties, "Connected"),
    })
}

fn short_uuid(uuid: &str) -> Option<u16> {
    let uuid = uuid.to_ascii_lowercase();
    let short = uuid.strip_suffix(BASE_UUID_SUFFIX)?.strip_prefix("0000")?;
    u16::from_str_radix(short, 16).ok()
}

/// Whether any Bluetooth rfkill switch under `root` is hard-blocked.
fn rfkill_hard_blocked(root: &Path) -> bool {
    let Ok(entries) = fs::read_dir(root) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let dir = entry.path();
        let kind = fs::read_to_string(dir.join("type")).unwrap_or_default();
        let hard = fs::read_to_string(dir.join("hard")).unwrap_or_default();
        kind.trim() == "bluetooth" && hard.trim() == "1"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managed_objects(text: &str) -> Variant {
        let ty = VariantTy::new(MANAGED_OBJECTS_TYPE).unwrap();
        Variant::parse(Some(ty), text).unwrap()
    }

    const OBJECTS: &str = "({
        '/org/bluez/hci0': {'org.bluez.Adapter1': {'Powered': <true>, 'Discoverable': <false>}},
        '/org/bluez/hci0/dev_BB': {'org.bluez.Device1': {
            'Address': <'BB:BB:BB:BB:BB:BB'>,
            'Name': <'Phone'>,
            'Alias': <'My Phone'>,
            'Icon': <'phone'>,
            'Paired': <true>,
            'Connected': <false>,
            'UUIDs': <['00001105-0000-1000-8000-00805f9b34fb',
                       '00001106-0000-1000-8000-00805F9B34FB']>
        }},
        '/org/bluez/hci0/dev_AA': {'org.bluez.Device1': {
            'Address': <'AA:AA:AA:AA:AA:AA'>,
            'Name': <'Headphones'>,
            'Icon': <'audio-headphones'>,
            'Paired': <true>,
            'Connected': <true>,
            'UUIDs': <['0000110b-0000-1000-8000-00805f9b34fb']>
        }},
        '/org/bluez/hci0/dev_CC': {'org.bluez.Device1': {
            'Address': <'CC:CC:CC:CC:CC:CC'>,
            'Paired': <false>
        }}
    },)";

    #[test]
    fn parses_adapter_and_paired_devices() {
        let state = parse_managed_objects(&managed_objects(OBJECTS));

        assert_eq!(
            state.adapter,
            Some(AdapterInfo {
                path: "/org/bluez/hci0".into(),
                powered: true,
                discoverable: false,
            })
        );
        let paths: Vec<&str> = state.devices.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["/org/bluez/hci0/dev_AA", "/org/bluez/hci0/dev_BB"]);

        let headphones = &state.devices[0];
        assert_eq!(headphones.display_name, "Headphones");
        assert_eq!(headphones.kind, DeviceKind::Headphones);
        assert!(headphones.can_connect);
        assert!(headphones.connected);
        assert!(headphones.capabilities.is_empty());

        let phone = &state.devices[1];
        assert_eq!(phone.display_name, "My Phone");
        assert_eq!(phone.address, "BB:BB:BB:BB:BB:BB");
        assert!(!phone.can_connect);
        assert_eq!(
            phone.capabilities,
            Capabilities::OBEX_PUSH | Capabilities::OBEX_FILE_TRANSFER
        );
    }

    #[test]
    fn name_falls_back_to_address() {
        let state = parse_managed_objects(&managed_objects(
            "({'/org/bluez/hci0/dev_DD': {'org.bluez.Device1': {
                'Address': <'DD:DD:DD:DD:DD:DD'>, 'Alias': <''>, 'Paired': <true>
            }}},)",
        ));
        assert_eq!(state.devices[0].display_name, "DD:DD:DD:DD:DD:DD");
        assert!(!state.devices[0].qualifies());
        assert_eq!(state.killswitch(), KillswitchState::NoAdapter);
    }

    #[test]
    fn unexpected_reply_type_yields_empty_state() {
        let state = parse_managed_objects(&"nope".to_variant());
        assert_eq!(state, BluezState::default());
    }

    #[test]
    fn short_uuids() {
        assert_eq!(short_uuid("00001124-0000-1000-8000-00805f9b34fb"), Some(0x1124));
        assert_eq!(short_uuid("0000FE2C-0000-1000-8000-00805F9B34FB"), Some(0xfe2c));
        assert_eq!(short_uuid("6e400001-b5a3-f393-e0a9-e50e24dcca9e"), None);
    }

    #[test]
    fn killswitch_from_adapter_and_rfkill() {
        let mut state = BluezState {
            adapter: Some(AdapterInfo {
                path: "/org/bluez/hci0".into(),
                powered: false,
                discoverable: true,
            }),
            ..BluezState::default()
        };
        assert_eq!(state.killswitch(), KillswitchState::SoftBlocked);
        assert!(state.discoverable());

        state.hard_blocked = true;
        assert_eq!(state.killswitch(), KillswitchState::HardBlocked);
        assert!(!state.show_full_menu());
    }

    #[test]
    fn diff_reports_only_changes() {
        let old = parse_managed_objects(&managed_objects(OBJECTS));
        assert!(diff_events(&old, &old.clone()).is_empty());

        let mut new = old.clone();
        new.devices[0].connected = false;
        assert_eq!(diff_events(&old, &new), vec![ProviderEvent::DevicesChanged]);

        new.adapter = None;
        assert_eq!(
            diff_events(&old, &new),
            vec![
                ProviderEvent::KillswitchChanged,
                ProviderEvent::DevicesChanged,
                ProviderEvent::FullMenuChanged,
            ]
        );
    }

    #[test]
    fn rfkill_scan() {
        let root =
            std::env::temp_dir().join(format!("bt-indicator-rfkill-{}", std::process::id()));
        let wifi = root.join("rfkill0");
        let bt = root.join("rfkill1");
        fs::create_dir_all(&wifi).unwrap();
        fs::create_dir_all(&bt).unwrap();
        fs::write(wifi.join("type"), "wlan\n").unwrap();
        fs::write(wifi.join("hard"), "1\n").unwrap();
        fs::write(bt.join("type"), "bluetooth\n").unwrap();
        fs::write(bt.join("hard"), "0\n").unwrap();
        assert!(!rfkill_hard_blocked(&root));

        fs::write(bt.join("hard"), "1\n").unwrap();
        assert!(rfkill_hard_blocked(&root));

        fs::remove_dir_all(&root).unwrap();
        assert!(!rfkill_hard_blocked(&root));
    }

    #[test]
    fn disconnected_listeners_are_dropped() {
        let listeners = EventListeners::default();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let first = {
            let seen = seen.clone();
            listeners.connect(Rc::new(move |event: ProviderEvent| {
                seen.borrow_mut().push(("first", event))
            }))
        };
        {
            let seen = seen.clone();
            listeners.connect(Rc::new(move |event: ProviderEvent| {
                seen.borrow_mut().push(("second", event))
            }));
        }

        listeners.emit(ProviderEvent::DevicesChanged);
        assert!(listeners.disconnect(first));
        assert!(!listeners.disconnect(first));
        listeners.emit(ProviderEvent::KillswitchChanged);

        assert_eq!(listeners.len(), 1);
        assert_eq!(
            *seen.borrow(),
            vec![
                ("first", ProviderEvent::DevicesChanged),
                ("second", ProviderEvent::DevicesChanged),
                ("second", ProviderEvent::KillswitchChanged),
            ]
        );
    }

    #[test]
    fn listener_can_disconnect_itself_during_emit() {
        let listeners = Rc::new(EventListeners::default());
        let own_id = Rc::new(Cell::new(None));
        let id = {
            let weak = Rc::downgrade(&listeners);
            let own_id = own_id.clone();
            listeners.connect(Rc::new(move |_: ProviderEvent| {
                if let (Some(listeners), Some(id)) = (weak.upgrade(), own_id.get()) {
                    listeners.disconnect(id);
                }
            }))
        };
        own_id.set(Some(id));

        listeners.emit(ProviderEvent::FullMenuChanged);
        assert_eq!(listeners.len(), 0);
    }
}
