pub mod config;
pub mod ipc;
pub mod keymap;
pub mod prefs;
