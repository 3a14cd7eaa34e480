use anyhow::Result;
use gtk4::glib::WeakRef;
use gtk4::prelude::*;
use gtk4::{ApplicationWindow, Box, Orientation};
use std::cell::Cell;
use std::rc::Rc;

use crate::bluez::BluezService;
use crate::config::IndicatorConfig;
use crate::widgets::{Bluetooth, KeyboardModeManager};

/// Top-level container holding the Bluetooth indicator button.
pub struct Panel {
    container: Box,
    bluetooth: Bluetooth,
}

impl Panel {
    pub fn new(
        config: &IndicatorConfig,
        service: &Rc<BluezService>,
        window_weak: WeakRef<ApplicationWindow>,
    ) -> Result<Self> {
        let container = Box::new(Orientation::Horizontal, 0);
        container.add_css_class("panel");
        container.set_halign(gtk4::Align::End);
        container.set_height_request(config.height);

        let keyboard_mode = KeyboardModeManager::new(window_weak, Rc::new(Cell::new(0)));
        let bluetooth = Bluetooth::new(config, service, &keyboard_mode)?;
        container.append(bluetooth.widget());

        Ok(Self {
            container,
            bluetooth,
        })
    }

    pub fn container(&self) -> &Box {
        &self.container
    }

    pub fn bluetooth(&self) -> &Bluetooth {
        &self.bluetooth
    }
}
