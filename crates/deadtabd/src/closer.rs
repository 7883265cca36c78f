use anyhow::{Context, Result};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key};
use std::time::Duration;
use tracing::info;

/// Name of our uinput device; the watcher skips it to avoid a feedback loop.
pub const VIRTUAL_DEVICE_NAME: &str = "deadtab virtual keyboard";

/// Host primitive for "close the currently focused tab".
pub trait TabCloser {
    fn close_active_tab(&mut self) -> Result<()>;
}

/// Closes the focused browser tab by typing Ctrl+W on a virtual keyboard.
/// Works for anything that honours the chord (browsers, most tabbed apps);
/// if the focused window ignores it, the failure mode is a no-op, which is
/// the acceptable one here.
pub struct UinputCloser {
    vdev: VirtualDevice,
}

/// Each state change needs its own emit so the kernel registers the
/// modifier before the W arrives.
const DELAY_BETWEEN_EMITS: Duration = Duration::from_millis(3);

const CODE_LEFTCTRL: u16 = 29;
const CODE_W: u16 = 17;

/// Ctrl down, W tap, Ctrl up. (code, value) pairs, value 1=press 0=release.
const CTRL_W_CHORD: [(u16, i32); 4] = [
    (CODE_LEFTCTRL, 1),
    (CODE_W, 1),
    (CODE_W, 0),
    (CODE_LEFTCTRL, 0),
];

fn syn() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)
}

impl UinputCloser {
    pub fn new() -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        keys.insert(Key::KEY_LEFTCTRL);
        keys.insert(Key::KEY_W);

        let vdev = VirtualDeviceBuilder::new()
            .context("creating VirtualDeviceBuilder")?
            .name(VIRTUAL_DEVICE_NAME)
            .with_keys(&keys)
            .context("setting keys")?
            .build()
            .context("building virtual device")?;

        info!("virtual uinput device created");
        Ok(Self { vdev })
    }
}

impl TabCloser for UinputCloser {
    fn close_active_tab(&mut self) -> Result<()> {
        for (code, value) in CTRL_W_CHORD {
            self.vdev
                .emit(&[InputEvent::new(EventType::KEY, code, value), syn()])
                .context("emitting close chord")?;
            std::thread::sleep(DELAY_BETWEEN_EMITS);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chord_is_a_balanced_ctrl_w_tap() {
        // Codes match the evdev constants
        assert_eq!(CODE_LEFTCTRL, Key::KEY_LEFTCTRL.code());
        assert_eq!(CODE_W, Key::KEY_W.code());
        // Ctrl wraps the W tap, and every press has its release
        assert_eq!(CTRL_W_CHORD[0], (CODE_LEFTCTRL, 1));
        assert_eq!(CTRL_W_CHORD[1], (CODE_W, 1));
        assert_eq!(CTRL_W_CHORD[2], (CODE_W, 0));
        assert_eq!(CTRL_W_CHORD[3], (CODE_LEFTCTRL, 0));
    }
}
