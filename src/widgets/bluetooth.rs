use anyhow::Result;
use gtk4::glib::{self, SignalHandlerId};
use gtk4::prelude::*;
use gtk4::{Box, Button, Expander, Image, Label, Orientation, Popover, Separator, Switch, Widget};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{info, warn};

use super::KeyboardModeManager;
use crate::bluez::{BluezService, EventHandlerId};
use crate::config::IndicatorConfig;
use crate::entry_store::EntryContext;
use crate::indicator::Indicator;
use crate::launcher::SystemLauncher;
use crate::shell::{EntryView, Handler, IndicatorShell, ToggleView};

/// Panel button with the Bluetooth menu.
pub struct Bluetooth {
    button: Button,
    popover: Popover,
    indicator: Rc<Indicator>,
    service: Rc<BluezService>,
    events: EventHandlerId,
}

impl Bluetooth {
    pub fn new(
        config: &IndicatorConfig,
        service: &Rc<BluezService>,
        keyboard_mode: &KeyboardModeManager,
    ) -> Result<Self> {
        let button = Button::new();
        button.add_css_class("bluetooth");

        let container = Box::new(Orientation::Horizontal, 5);
        let icon = Image::from_icon_name("bluetooth-disabled-symbolic");
        icon.set_icon_size(gtk4::IconSize::Large);
        let count_label = Label::new(None);
        count_label.add_css_class("bluetooth-status");
        count_label.set_visible(false);
        container.append(&icon);
        container.append(&count_label);
        button.set_child(Some(&container));

        let popover = Popover::new();
        popover.set_parent(&button);
        popover.add_css_class("bluetooth-popover");
        popover.set_has_arrow(false);
        popover.set_autohide(true);
        keyboard_mode.connect_to_popover(&popover, "bluetooth");

        let menu = Box::new(Orientation::Vertical, 6);
        menu.set_margin_top(15);
        menu.set_margin_bottom(15);
        menu.set_margin_start(15);
        menu.set_margin_end(15);
        menu.set_size_request(320, -1);

        // Killswitch, visibility and a separator come first; device entries
        // are inserted right after them.
        let (killswitch_row, killswitch, killswitch_status) = switch_row("Bluetooth");
        let (discoverable_row, discoverable, _) = switch_row("Visibility");
        menu.append(&killswitch_row);
        menu.append(&discoverable_row);
        menu.append(&Separator::new(Orientation::Horizontal));

        let send_button = menu_button("Send Files to Device...");
        let setup_button = menu_button("Set up a New Device...");
        let full_menu_items: Vec<Widget> = vec![
            Separator::new(Orientation::Horizontal).upcast(),
            send_button.clone().upcast(),
            setup_button.clone().upcast(),
            Separator::new(Orientation::Horizontal).upcast(),
        ];
        for item in &full_menu_items {
            menu.append(item);
        }

        let settings_button = menu_button("Bluetooth Settings");
        menu.append(&settings_button);
        popover.set_child(Some(&menu));

        let shell = Rc::new(GtkShell {
            menu,
            button: button.clone(),
            icon,
            count_label,
            show_count: config.show_connected_count,
            killswitch,
            killswitch_status,
            killswitch_handler: RefCell::new(None),
            discoverable_row,
            discoverable,
            discoverable_handler: RefCell::new(None),
            full_menu_items,
        });

        let ctx = EntryContext {
            shell: shell.clone(),
            operator: service.clone(),
            spawner: Rc::new(glib::MainContext::default()),
            launcher: Rc::new(SystemLauncher::new(config)),
        };
        let indicator = Indicator::new(service.clone(), ctx, config);

        let weak = Rc::downgrade(&indicator);
        let events = service.connect_events(move |event| {
            if let Some(indicator) = weak.upgrade() {
                indicator.handle_event(event);
            }
        });

        let weak = Rc::downgrade(&indicator);
        let id = shell.killswitch.connect_state_set(move |_, state| {
            if let Some(indicator) = weak.upgrade() {
                indicator.killswitch_toggled(state);
            }
            glib::Propagation::Stop
        });
        shell.killswitch_handler.replace(Some(id));

        let weak = Rc::downgrade(&indicator);
        let id = shell.discoverable.connect_state_set(move |_, state| {
            if let Some(indicator) = weak.upgrade() {
                indicator.discoverable_toggled(state);
            }
            glib::Propagation::Stop
        });
        shell.discoverable_handler.replace(Some(id));

        connect_menu_action(&send_button, &popover, &indicator, Indicator::send_files);
        connect_menu_action(&setup_button, &popover, &indicator, Indicator::setup_new_device);
        connect_menu_action(&settings_button, &popover, &indicator, Indicator::open_settings);

        // Handle Escape key
        let escape_controller = gtk4::EventControllerKey::new();
        let popover_weak = popover.downgrade();
        escape_controller.connect_key_pressed(move |_, key, _, _| {
            if key == gtk4::gdk::Key::Escape {
                if let Some(popover) = popover_weak.upgrade() {
                    popover.popdown();
                }
                glib::Propagation::Stop
            } else {
                glib::Propagation::Proceed
            }
        });
        popover.add_controller(escape_controller);

        let popover_weak = popover.downgrade();
        button.connect_clicked(move |_| {
            if let Some(popover) = popover_weak.upgrade() {
                popover.popup();
            }
        });

        info!("Bluetooth indicator ready");
        Ok(Self {
            button,
            popover,
            indicator,
            service: service.clone(),
            events,
        })
    }

    pub fn widget(&self) -> &Button {
        &self.button
    }

    pub fn indicator(&self) -> &Rc<Indicator> {
        &self.indicator
    }

    pub fn show_menu(&self) {
        self.popover.popup();
    }

    pub fn hide_menu(&self) {
        self.popover.popdown();
    }
}

impl Drop for Bluetooth {
    fn drop(&mut self) {
        self.service.disconnect_events(self.events);
        self.popover.unparent();
    }
}

fn switch_row(title: &str) -> (Box, Switch, Label) {
    let row = Box::new(Orientation::Horizontal, 10);
    let label = Label::new(Some(title));
    label.set_hexpand(true);
    label.set_halign(gtk4::Align::Start);
    label.add_css_class("bluetooth-toggle-label");

    let status = Label::new(None);
    status.add_css_class("dim-label");
    status.set_visible(false);

    let switch = Switch::new();
    switch.set_valign(gtk4::Align::Center);

    row.append(&label);
    row.append(&status);
    row.append(&switch);
    (row, switch, status)
}

fn menu_button(title: &str) -> Button {
    let button = Button::with_label(title);
    button.add_css_class("flat");
    button.add_css_class("bluetooth-menu-item");
    if let Some(label) = button.child().and_downcast::<Label>() {
        label.set_halign(gtk4::Align::Start);
    }
    button
}

fn connect_menu_action(
    button: &Button,
    popover: &Popover,
    indicator: &Rc<Indicator>,
    action: fn(&Indicator),
) {
    let weak = Rc::downgrade(indicator);
    let popover_weak = popover.downgrade();
    button.connect_clicked(move |_| {
        if let Some(popover) = popover_weak.upgrade() {
            popover.popdown();
        }
        if let Some(indicator) = weak.upgrade() {
            action(&indicator);
        }
    });
}

/// Update a switch without re-entering its own state-set handler.
fn set_switch(switch: &Switch, handler: &RefCell<Option<SignalHandlerId>>, on: bool) {
    let handler = handler.borrow();
    if let Some(id) = handler.as_ref() {
        switch.block_signal(id);
    }
    switch.set_active(on);
    switch.set_state(on);
    if let Some(id) = handler.as_ref() {
        switch.unblock_signal(id);
    }
}

fn set_status(label: &Label, status: Option<&str>) {
    match status {
        Some(text) => {
            label.set_text(text);
            label.set_visible(true);
        }
        None => label.set_visible(false),
    }
}

fn child_at(container: &Box, index: usize, skip: Option<&Widget>) -> Option<Widget> {
    let mut child = container.first_child();
    let mut seen = 0;
    while let Some(widget) = child {
        if Some(&widget) != skip {
            if seen == index {
                return Some(widget);
            }
            seen += 1;
        }
        child = widget.next_sibling();
    }
    None
}

struct GtkShell {
    menu: Box,
    button: Button,
    icon: Image,
    count_label: Label,
    show_count: bool,
    killswitch: Switch,
    killswitch_status: Label,
    killswitch_handler: RefCell<Option<SignalHandlerId>>,
    discoverable_row: Box,
    discoverable: Switch,
    discoverable_handler: RefCell<Option<SignalHandlerId>>,
    full_menu_items: Vec<Widget>,
}

impl IndicatorShell for GtkShell {
    fn insert_entry(&self, label: &str, position: usize) -> Rc<dyn EntryView> {
        let expander = Expander::new(Some(label));
        expander.add_css_class("bluetooth-device");
        let actions = Box::new(Orientation::Vertical, 4);
        actions.set_margin_start(12);
        actions.add_css_class("bluetooth-device-actions");
        expander.set_child(Some(&actions));

        match position.checked_sub(1).and_then(|i| child_at(&self.menu, i, None)) {
            Some(sibling) => self.menu.insert_child_after(&expander, Some(&sibling)),
            None if position == 0 => self.menu.prepend(&expander),
            None => self.menu.append(&expander),
        }

        Rc::new(GtkEntryView {
            menu: self.menu.clone(),
            expander,
            actions,
        })
    }

    fn set_killswitch(&self, on: bool, status: Option<&str>) {
        set_switch(&self.killswitch, &self.killswitch_handler, on);
        set_status(&self.killswitch_status, status);
    }

    fn set_discoverable(&self, on: bool) {
        set_switch(&self.discoverable, &self.discoverable_handler, on);
    }

    fn set_discoverable_visible(&self, visible: bool) {
        self.discoverable_row.set_visible(visible);
    }

    fn set_indicator_visible(&self, visible: bool) {
        self.button.set_visible(visible);
    }

    fn set_icon(&self, icon_name: &str) {
        self.icon.set_from_icon_name(Some(icon_name));
        if icon_name == "bluetooth-active-symbolic" {
            self.icon.add_css_class("bluetooth-active");
            self.icon.remove_css_class("bluetooth-disabled");
        } else {
            self.icon.add_css_class("bluetooth-disabled");
            self.icon.remove_css_class("bluetooth-active");
        }
    }

    fn set_full_menu_visible(&self, visible: bool) {
        for item in &self.full_menu_items {
            item.set_visible(visible);
        }
    }

    fn set_connected_count(&self, count: usize) {
        self.count_label.set_text(&count.to_string());
        self.count_label.set_visible(self.show_count && count > 0);
    }
}

struct GtkEntryView {
    menu: Box,
    expander: Expander,
    actions: Box,
}

impl EntryView for GtkEntryView {
    fn set_label(&self, label: &str) {
        self.expander.set_label(Some(label));
    }

    fn move_to(&self, position: usize) {
        let widget = self.expander.clone().upcast::<Widget>();
        match position.checked_sub(1) {
            None => self.menu.reorder_child_after(&widget, None::<&Widget>),
            Some(i) => match child_at(&self.menu, i, Some(&widget)) {
                Some(sibling) => self.menu.reorder_child_after(&widget, Some(&sibling)),
                None => warn!("No menu slot at position {}", position),
            },
        }
    }

    fn clear_actions(&self) {
        while let Some(child) = self.actions.first_child() {
            self.actions.remove(&child);
        }
    }

    fn add_connection_toggle(&self, on: bool, on_toggled: Handler) -> Rc<dyn ToggleView> {
        let (row, switch, status) = switch_row("Connection");
        self.actions.append(&row);

        let toggle = Rc::new(GtkToggle {
            switch,
            status,
            handler: RefCell::new(None),
        });
        toggle.set_toggle_state(on);

        let id = toggle.switch.connect_state_set(move |_, _| {
            on_toggled();
            glib::Propagation::Stop
        });
        toggle.handler.replace(Some(id));
        toggle
    }

    fn add_action(&self, label: &str, on_activate: Handler) {
        let button = menu_button(label);
        button.connect_clicked(move |_| on_activate());
        self.actions.append(&button);
    }

    fn show(&self) {
        self.expander.set_visible(true);
    }

    fn hide(&self) {
        self.expander.set_visible(false);
    }

    fn destroy(&self) {
        if self.expander.parent().is_some() {
            self.menu.remove(&self.expander);
        }
    }
}

struct GtkToggle {
    switch: Switch,
    status: Label,
    handler: RefCell<Option<SignalHandlerId>>,
}

impl ToggleView for GtkToggle {
    fn set_toggle_state(&self, on: bool) {
        set_switch(&self.switch, &self.handler, on);
    }

    fn set_status(&self, status: Option<&str>) {
        set_status(&self.status, status);
    }
}
