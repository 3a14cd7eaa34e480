mod bluetooth;
mod keyboard_mode;

pub use bluetooth::Bluetooth;
pub use keyboard_mode::KeyboardModeManager;
