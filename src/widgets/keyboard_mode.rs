use gtk4::glib::WeakRef;
use gtk4::prelude::*;
use gtk4::{ApplicationWindow, Popover};
use gtk4_layer_shell::{KeyboardMode, LayerShell};
use std::cell::Cell;
use std::rc::Rc;
use tracing::info;

/// Grants the layer-shell window keyboard focus while any popover is open.
#[derive(Clone)]
pub struct KeyboardModeManager {
    window_weak: WeakRef<ApplicationWindow>,
    active_popovers: Rc<Cell<i32>>,
}

impl KeyboardModeManager {
    pub fn new(window_weak: WeakRef<ApplicationWindow>, active_popovers: Rc<Cell<i32>>) -> Self {
        Self {
            window_weak,
            active_popovers,
        }
    }

    pub fn connect_to_popover(&self, popover: &Popover, widget_name: &str) {
        let manager = self.clone();
        let name = widget_name.to_string();
        popover.connect_show(move |_| {
            let count = manager.active_popovers.get() + 1;
            manager.active_popovers.set(count);
            if let Some(window) = manager.window_weak.upgrade() {
                window.set_keyboard_mode(KeyboardMode::OnDemand);
                info!("{} popover shown (active popovers: {})", name, count);
            }
        });

        let manager = self.clone();
        let name = widget_name.to_string();
        popover.connect_hide(move |_| {
            let count = (manager.active_popovers.get() - 1).max(0);
            manager.active_popovers.set(count);
            if count == 0 {
                if let Some(window) = manager.window_weak.upgrade() {
                    window.set_keyboard_mode(KeyboardMode::None);
                    info!("{} popover hidden - keyboard mode set to None", name);
                }
            }
        });
    }
}
