use gtk4::gio::{self, prelude::*};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{error, info, warn};

use crate::config::IndicatorConfig;
use crate::shell::AppLauncher;

/// Launches companion applications through GIO and plain child processes.
pub struct SystemLauncher {
    sendto_command: String,
}

impl SystemLauncher {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            sendto_command: config.sendto_command.clone(),
        }
    }

    fn spawn(program: String, args: Vec<String>) {
        Self::run_in_background(move || {
            match Command::new(&program)
                .args(&args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(mut child) => {
                    info!("Launched {}", program);
                    if let Err(e) = child.wait() {
                        warn!("Failed to wait for {}: {}", program, e);
                    }
                }
                Err(e) => error!("Failed to launch {}: {}", program, e),
            }
        });
    }

    // Children are reaped off the main loop
    fn run_in_background<F>(f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        thread::spawn(f);
    }
}

/// Split a configured command line into program and arguments.
fn split_command(command_line: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

fn sendto_args(command_line: &str, address: &str, name: &str) -> Option<(String, Vec<String>)> {
    let (program, mut args) = split_command(command_line)?;
    args.push(format!("--device={}", address));
    args.push(format!("--name={}", name));
    Some((program, args))
}

fn obex_uri(address: &str) -> String {
    format!("obex://[{}]/", address)
}

impl AppLauncher for SystemLauncher {
    fn launch_desktop(&self, desktop_id: &str) {
        match gio::DesktopAppInfo::new(desktop_id) {
            Some(app) => {
                if let Err(e) = app.launch(&[], None::<&gio::AppLaunchContext>) {
                    error!("Failed to launch {}: {}", desktop_id, e);
                }
            }
            None => {
                warn!("{} not installed, trying gtk-launch", desktop_id);
                let id = desktop_id.trim_end_matches(".desktop").to_string();
                Self::spawn("gtk-launch".to_string(), vec![id]);
            }
        }
    }

    fn run_command(&self, command_line: &str) {
        match split_command(command_line) {
            Some((program, args)) => Self::spawn(program, args),
            None => warn!("Empty command configured"),
        }
    }

    fn send_files(&self, address: &str, name: &str) {
        match sendto_args(&self.sendto_command, address, name) {
            Some((program, args)) => Self::spawn(program, args),
            None => warn!("No send-to command configured"),
        }
    }

    fn browse_files(&self, address: &str) {
        let uri = obex_uri(address);
        if let Err(e) = gio::AppInfo::launch_default_for_uri(&uri, None::<&gio::AppLaunchContext>) {
            error!("Failed to browse {}: {}", uri, e);
        }
    }
}
