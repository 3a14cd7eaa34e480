pub mod bluez;
pub mod config;
pub mod connection;
pub mod device;
pub mod entry_store;
pub mod indicator;
pub mod ipc;
pub mod launcher;
pub mod panel;
pub mod shell;
pub mod widgets;

#[cfg(test)]
mod testing;
