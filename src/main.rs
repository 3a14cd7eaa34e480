use gtk4::prelude::*;
use gtk4::{Application, ApplicationWindow};
use gtk4_layer_shell::{Layer, LayerShell};
use notify::{Event, EventKind};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{error, info, warn};

use bt_indicator::bluez::BluezService;
use bt_indicator::config::IndicatorConfig;
use bt_indicator::ipc::{IpcReply, IpcRequest, IpcServer};
use bt_indicator::panel::Panel;

type SharedPanel = Rc<RefCell<Option<Panel>>>;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting bt-indicator");

    let app = Application::builder()
        .application_id("org.btindicator.Indicator")
        .build();

    app.connect_activate(|app| {
        if let Err(e) = build_ui(app) {
            error!("Failed to build UI: {}", e);
        }
    });

    app.run();
    Ok(())
}

fn build_ui(app: &Application) -> anyhow::Result<()> {
    let config = IndicatorConfig::load()?;

    let window = ApplicationWindow::builder()
        .application(app)
        .title("Bluetooth Indicator")
        .build();

    // Sits in the top-right corner without reserving space
    window.init_layer_shell();
    window.set_layer(Layer::Top);
    window.set_anchor(gtk4_layer_shell::Edge::Top, true);
    window.set_anchor(gtk4_layer_shell::Edge::Right, true);
    window.set_keyboard_mode(gtk4_layer_shell::KeyboardMode::None);
    window.set_margin(gtk4_layer_shell::Edge::Top, 0);
    window.set_margin(gtk4_layer_shell::Edge::Right, config.margin_end);
    window.set_height_request(config.height);

    // One BlueZ connection for the lifetime of the process
    let service = BluezService::new(&config);

    let panel = Panel::new(&config, &service, window.downgrade())?;
    window.set_child(Some(panel.container()));
    let shared: SharedPanel = Rc::new(RefCell::new(Some(panel)));

    load_css();
    start_ipc(&shared);
    watch_config(&window, &service, &shared);

    window.present();

    info!("bt-indicator initialized successfully");
    Ok(())
}

fn load_css() {
    let css_provider = gtk4::CssProvider::new();
    match std::str::from_utf8(include_bytes!("../assets/style.css")) {
        Ok(css_data) => {
            css_provider.load_from_data(css_data);
            if let Some(display) = gtk4::gdk::Display::default() {
                gtk4::style_context_add_provider_for_display(
                    &display,
                    &css_provider,
                    gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
                );
                info!("CSS styles loaded successfully");
            } else {
                warn!("Could not get default display for CSS styling");
            }
        }
        Err(e) => error!("Failed to load CSS data: {}", e),
    }
}

fn start_ipc(shared: &SharedPanel) {
    let server = match IpcServer::new() {
        Ok(server) => server,
        Err(e) => {
            warn!("IPC disabled: {}", e);
            return;
        }
    };

    let shared = shared.clone();
    let result = server.start(move |request| {
        let panel = shared.borrow();
        let Some(panel) = panel.as_ref() else {
            return IpcReply::Error("indicator not ready".to_string());
        };
        let bluetooth = panel.bluetooth();
        match request {
            IpcRequest::Show => {
                bluetooth.show_menu();
                IpcReply::Ok
            }
            IpcRequest::Hide => {
                bluetooth.hide_menu();
                IpcReply::Ok
            }
            IpcRequest::Status => match serde_json::to_string(&bluetooth.indicator().status()) {
                Ok(json) => IpcReply::Json(json),
                Err(e) => IpcReply::Error(e.to_string()),
            },
            IpcRequest::Toggle(path) => {
                let indicator = bluetooth.indicator().clone();
                match indicator.toggle_device(&path) {
                    Ok(true) => IpcReply::Ok,
                    Ok(false) => IpcReply::Error("operation already in progress".to_string()),
                    Err(e) => IpcReply::Error(e.to_string()),
                }
            }
        }
    });

    if let Err(e) = result {
        error!("Failed to start IPC server: {}", e);
    }
}

fn watch_config(window: &ApplicationWindow, service: &Rc<BluezService>, shared: &SharedPanel) {
    let (watcher, rx) = match IndicatorConfig::watch_config_changes() {
        Ok(watch) => watch,
        Err(e) => {
            warn!("Failed to set up config file watcher: {}", e);
            return;
        }
    };

    let (sender, receiver) = gtk4::glib::MainContext::channel(gtk4::glib::Priority::DEFAULT);

    // The watcher lives as long as the forwarding thread
    std::thread::spawn(move || {
        let _watcher = watcher;
        while let Ok(event) = rx.recv() {
            if sender.send(event).is_err() {
                break;
            }
        }
    });

    let window_weak = window.downgrade();
    let service = service.clone();
    let shared = shared.clone();
    receiver.attach(None, move |event: Event| {
        let Some(window) = window_weak.upgrade() else {
            return gtk4::glib::ControlFlow::Break;
        };
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return gtk4::glib::ControlFlow::Continue;
        }
        if !event.paths.iter().any(|path| path.ends_with("config.toml")) {
            return gtk4::glib::ControlFlow::Continue;
        }

        info!("Config file changed, reloading");
        match IndicatorConfig::load() {
            Ok(config) => match Panel::new(&config, &service, window.downgrade()) {
                Ok(panel) => {
                    window.set_height_request(config.height);
                    window.set_margin(gtk4_layer_shell::Edge::Right, config.margin_end);
                    window.set_child(Some(panel.container()));
                    // The previous indicator is dropped here and tears down its entries
                    shared.replace(Some(panel));
                    info!("Indicator reloaded with new configuration");
                }
                Err(e) => error!("Failed to rebuild indicator: {}", e),
            },
            Err(e) => error!("Failed to load new configuration: {}", e),
        }
        gtk4::glib::ControlFlow::Continue
    });

    match IndicatorConfig::config_path() {
        Ok(path) => info!("Watching for changes to {:?}", path),
        Err(_) => info!("Watching for config changes"),
    }
}
