use crate::closer::VIRTUAL_DEVICE_NAME;
use anyhow::{Context, Result};
use deadtab_core::keymap::KeyId;
use evdev::{Device, EventType};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A key press or release observed on some keyboard.
#[derive(Debug, Clone, Copy)]
pub struct KeyTransition {
    pub key: KeyId,
    pub pressed: bool,
}

/// Find all keyboard devices under /dev/input/.
pub fn find_keyboards() -> Result<Vec<PathBuf>> {
    let mut keyboards = Vec::new();
    let input_dir = Path::new("/dev/input");

    for entry in std::fs::read_dir(input_dir).context("reading /dev/input")? {
        let entry = entry?;
        let path = entry.path();

        // Only look at eventN devices
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !name.starts_with("event") {
            continue;
        }

        match Device::open(&path) {
            Ok(dev) => {
                // Skip our own virtual device: it emits the close chord,
                // which must never feed back into the monitor
                if dev.name().map_or(false, |n| n.contains(VIRTUAL_DEVICE_NAME)) {
                    debug!(path = %path.display(), "skipping own virtual device");
                    continue;
                }
                if is_keyboard(&dev) {
                    info!(path = %path.display(), name = ?dev.name(), "found keyboard");
                    keyboards.push(path);
                }
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping device");
            }
        }
    }

    Ok(keyboards)
}

/// Heuristic: a device is a keyboard if it has KEY events and supports
/// common letter keys.
fn is_keyboard(dev: &Device) -> bool {
    let Some(keys) = dev.supported_keys() else {
        return false;
    };

    keys.contains(evdev::Key::KEY_A)
        && keys.contains(evdev::Key::KEY_Z)
        && keys.contains(evdev::Key::KEY_ENTER)
}

/// Observe a keyboard and forward key transitions to the channel. The
/// device is deliberately NOT grabbed: keys must keep flowing to the
/// focused application, and an evdev read is global anyway — focus sitting
/// inside an input field cannot swallow events from us.
///
/// Runs until the receiver is dropped or the device errors.
pub async fn watch_device(path: PathBuf, tx: mpsc::UnboundedSender<KeyTransition>) -> Result<()> {
    let dev = Device::open(&path).with_context(|| format!("opening {}", path.display()))?;

    let dev_name = dev.name().unwrap_or("unknown").to_string();
    info!(device = %dev_name, path = %path.display(), "watching device");

    let mut stream = dev.into_event_stream().context("creating event stream")?;

    loop {
        match stream.next_event().await {
            Ok(event) => {
                if event.event_type() != EventType::KEY {
                    continue;
                }
                // 0=release, 1=press; autorepeat (2) is noise for us
                let pressed = match event.value() {
                    0 => false,
                    1 => true,
                    _ => continue,
                };
                let transition = KeyTransition {
                    key: KeyId(event.code()),
                    pressed,
                };
                if tx.send(transition).is_err() {
                    // Receiver dropped, shut down
                    break;
                }
            }
            Err(e) => {
                warn!(device = %dev_name, error = %e, "device error, stopping watch");
                break;
            }
        }
    }

    Ok(())
}
