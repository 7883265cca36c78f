mod capture;
mod closer;
mod monitor;
mod supervisor;
mod watcher;

use anyhow::{Context, Result};
use capture::{CaptureEvent, CaptureSession};
use closer::TabCloser;
use deadtab_core::config::{self, Config};
use deadtab_core::ipc::{self, ClientMsg, DaemonMsg};
use deadtab_core::keymap;
use deadtab_core::prefs::Prefs;
use monitor::{Action, Monitor};
use std::sync::Arc;
use std::time::Instant;
use supervisor::Supervisor;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{error, info, warn};
use watcher::KeyTransition;

/// Shared state between the event loop and IPC handlers.
struct Shared {
    config: Config,
    monitor: Monitor,
    capture: Option<CaptureSession>,
    supervisor: Supervisor,
    closer: Box<dyn TabCloser + Send>,
    /// Channels to connected subscriber clients (status + capture events).
    subscriber_txs: Vec<mpsc::UnboundedSender<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("deadtabd=info".parse().unwrap()),
        )
        .init();

    info!("deadtabd starting");

    let config = Config::load().context("loading config")?;

    let keyboards = watcher::find_keyboards().context("finding keyboards")?;
    if keyboards.is_empty() {
        anyhow::bail!("no keyboards found — check permissions (group 'input' or udev rules)");
    }

    let closer = closer::UinputCloser::new().context("creating virtual device")?;

    let shared = Arc::new(Mutex::new(Shared {
        monitor: Monitor::new(&config),
        capture: None,
        supervisor: Supervisor::new(),
        closer: Box::new(closer),
        subscriber_txs: Vec::new(),
        config,
    }));

    // Key transitions from all watched keyboards
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    for path in keyboards {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher::watch_device(path.clone(), tx).await {
                error!(path = %path.display(), error = %e, "watcher task failed");
            }
        });
    }
    drop(event_tx); // Close our copy so the channel closes when all watchers exit

    // IPC listener
    let socket_path = config::socket_path();
    // Remove stale socket
    let _ = std::fs::remove_file(&socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding socket {}", socket_path.display()))?;
    info!(path = %socket_path.display(), "IPC socket listening");

    // IPC handlers mutate deadline-bearing state from outside the event
    // loop; they nudge this to get the sleep recomputed.
    let wake = Arc::new(Notify::new());

    let shared_ipc = Arc::clone(&shared);
    let wake_ipc = Arc::clone(&wake);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let shared = Arc::clone(&shared_ipc);
                    let wake = Arc::clone(&wake_ipc);
                    tokio::spawn(handle_ipc_client(stream, shared, wake));
                }
                Err(e) => {
                    warn!(error = %e, "IPC accept error");
                }
            }
        }
    });

    run_event_loop(Arc::clone(&shared), event_rx, wake).await;

    info!("deadtabd shutting down");
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Main event loop: event-driven timer (no idle wakeups). The safety poll
/// and the capture countdown both schedule through next_deadline, so a
/// disarmed, idle daemon sleeps. A deadline created over IPC (arm with no
/// key traffic, a capture nobody touches) arrives via `wake`, not via the
/// key channel, so the loop must also listen for the nudge.
async fn run_event_loop(
    shared: Arc<Mutex<Shared>>,
    mut event_rx: mpsc::UnboundedReceiver<KeyTransition>,
    wake: Arc<Notify>,
) {
    loop {
        let deadline = {
            let shared = shared.lock().await;
            let poll = shared.monitor.next_deadline();
            let tick = shared.capture.as_ref().and_then(|s| s.next_deadline());
            match (poll, tick) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        };
        let sleep_fut = match deadline {
            Some(dl) => tokio::time::sleep_until(tokio::time::Instant::from_std(dl)),
            None => tokio::time::sleep_until(
                tokio::time::Instant::now() + std::time::Duration::from_secs(86400),
            ),
        };
        let has_deadline = deadline.is_some();

        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(transition) => {
                        let mut shared = shared.lock().await;
                        handle_key(&mut shared, transition);
                    }
                    // All watcher tasks are gone
                    None => break,
                }
            }
            _ = wake.notified() => {
                // Nothing to do here; loop around and recompute the deadline
            }
            _ = sleep_fut, if has_deadline => {
                let mut shared = shared.lock().await;
                run_timers(&mut shared);
            }
        }
    }
}

/// Route a key transition. A running capture session owns the keyboard
/// exclusively — the monitor must not see the keys used to pick its own
/// watched key.
fn handle_key(shared: &mut Shared, transition: KeyTransition) {
    if let Some(session) = shared.capture.as_mut() {
        let event = if transition.pressed {
            session.on_key_down(transition.key)
        } else {
            session.on_key_up(transition.key)
        };
        if let Some(event) = event {
            process_capture_event(shared, event);
        }
        return;
    }

    if transition.pressed {
        shared.monitor.on_key_down(transition.key);
    } else {
        let actions = shared.monitor.on_key_up(transition.key);
        process_actions(shared, actions);
    }
}

/// Fire whichever timers are due. Both check their own due-ness, so the
/// one that merely shares a wakeup with the other is a no-op.
fn run_timers(shared: &mut Shared) {
    let now = Instant::now();

    if shared.monitor.next_deadline().map_or(false, |d| d <= now) {
        let actions = shared.monitor.safety_poll();
        process_actions(shared, actions);
    }

    let capture_event = match shared.capture.as_mut() {
        Some(session) if session.next_deadline().map_or(false, |d| d <= now) => {
            Some(session.on_tick())
        }
        _ => None,
    };
    if let Some(event) = capture_event {
        process_capture_event(shared, event);
    }
}

fn process_actions(shared: &mut Shared, actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::RequestClosure => {
                shared.supervisor.relay_closure(shared.closer.as_mut());
            }
            Action::StatusChanged { armed } => {
                shared.supervisor.set_status(armed);
                broadcast(shared, &DaemonMsg::StatusChanged { armed });
            }
        }
    }
}

fn process_capture_event(shared: &mut Shared, event: CaptureEvent) {
    match event {
        CaptureEvent::Progress {
            ticks_remaining,
            fraction,
            candidate,
        } => {
            broadcast(
                shared,
                &DaemonMsg::CaptureProgress {
                    ticks_remaining,
                    fraction,
                    candidate: candidate.map(keymap::display_name),
                },
            );
        }
        CaptureEvent::Committed(key) => {
            shared.capture = None;
            // Persist the choice; a failed store is a degraded preference,
            // not a failed capture
            let prefs = Prefs {
                watched_key: Some(key),
            };
            if let Err(e) = prefs.store() {
                warn!(error = %e, "storing key preference failed");
            }
            let actions = if shared.monitor.is_armed() {
                shared.monitor.update_key(key);
                Vec::new()
            } else {
                shared.monitor.arm(key)
            };
            info!(key = %keymap::display_name(key), "capture committed");
            broadcast(
                shared,
                &DaemonMsg::CaptureCommitted {
                    key,
                    key_name: keymap::display_name(key),
                },
            );
            process_actions(shared, actions);
        }
        CaptureEvent::Cancelled => {
            shared.capture = None;
            // The session consumed every key transition while it ran, so a
            // hold the monitor still tracks may have been released unseen
            shared.monitor.assume_key_released();
            info!("capture cancelled: no key chosen within the window");
            broadcast(shared, &DaemonMsg::CaptureCancelled);
        }
    }
}

fn broadcast(shared: &mut Shared, msg: &DaemonMsg) {
    let line = ipc::encode(msg);
    shared.subscriber_txs.retain(|tx| tx.send(line.clone()).is_ok());
}

async fn handle_ipc_client(stream: UnixStream, shared: Arc<Mutex<Shared>>, wake: Arc<Notify>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // Channel for sending messages back to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Writer task
    let write_handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut is_subscriber = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let Some(msg) = ipc::decode_client(&line) else {
            continue;
        };

        // These commands create or destroy a timer deadline; the event loop
        // may be parked on the old one and has to be told to look again
        let needs_wake = matches!(
            msg,
            ClientMsg::Arm { .. }
                | ClientMsg::Disarm
                | ClientMsg::StartCapture
                | ClientMsg::CancelCapture
        );

        let mut shared = shared.lock().await;

        match msg {
            ClientMsg::Subscribe => {
                is_subscriber = true;
                shared.subscriber_txs.push(tx.clone());
                let ack = DaemonMsg::Ack {
                    ok: true,
                    message: "subscribed".into(),
                };
                let _ = tx.send(ipc::encode(&ack));
            }
            ClientMsg::Arm { key } => {
                info!(key = %keymap::display_name(key), "arm via IPC");
                let actions = shared.monitor.arm(key);
                process_actions(&mut shared, actions);
                let ack = DaemonMsg::Ack {
                    ok: true,
                    message: format!("armed — hold {} or the tab closes", keymap::display_name(key)),
                };
                let _ = tx.send(ipc::encode(&ack));
            }
            ClientMsg::Disarm => {
                info!("disarm via IPC");
                let actions = shared.monitor.disarm();
                process_actions(&mut shared, actions);
                let ack = DaemonMsg::Ack {
                    ok: true,
                    message: "disarmed".into(),
                };
                let _ = tx.send(ipc::encode(&ack));
            }
            ClientMsg::UpdateKey { key } => {
                let ack = if shared.monitor.update_key(key) {
                    DaemonMsg::Ack {
                        ok: true,
                        message: format!("now watching {}", keymap::display_name(key)),
                    }
                } else {
                    DaemonMsg::Ack {
                        ok: false,
                        message: "not armed".into(),
                    }
                };
                let _ = tx.send(ipc::encode(&ack));
            }
            ClientMsg::StartCapture => {
                if shared.capture.is_some() {
                    let ack = DaemonMsg::Ack {
                        ok: false,
                        message: "capture already in progress".into(),
                    };
                    let _ = tx.send(ipc::encode(&ack));
                } else {
                    let session = CaptureSession::new(&shared.config);
                    let initial = session.progress();
                    shared.capture = Some(session);
                    let ack = DaemonMsg::Ack {
                        ok: true,
                        message: "capture started".into(),
                    };
                    let _ = tx.send(ipc::encode(&ack));
                    process_capture_event(&mut shared, initial);
                }
            }
            ClientMsg::CancelCapture => {
                let ack = if shared.capture.take().is_some() {
                    broadcast(&mut shared, &DaemonMsg::CaptureCancelled);
                    DaemonMsg::Ack {
                        ok: true,
                        message: "capture cancelled".into(),
                    }
                } else {
                    DaemonMsg::Ack {
                        ok: false,
                        message: "no capture in progress".into(),
                    }
                };
                let _ = tx.send(ipc::encode(&ack));
            }
            ClientMsg::GetStatus => {
                let key = shared.monitor.watched_key();
                let status = DaemonMsg::Status {
                    armed: shared.supervisor.status(),
                    key,
                    key_name: key.map(keymap::display_name),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                };
                let _ = tx.send(ipc::encode(&status));
            }
        }

        drop(shared);
        if needs_wake {
            wake.notify_one();
        }
    }

    // Client disconnected — drop its subscription if it had one
    if is_subscriber {
        let mut shared = shared.lock().await;
        shared.subscriber_txs.retain(|t| !t.is_closed());
    }

    write_handle.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use deadtab_core::keymap::KeyId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const KEY_SPACE: KeyId = KeyId(57);

    struct CountingCloser(Arc<AtomicUsize>);

    impl TabCloser for CountingCloser {
        fn close_active_tab(&mut self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.general.poll_interval_ms = 10;
        config.general.grace_period_ms = 50;
        config.capture.tick_ms = 20;
        config
    }

    fn make_shared(config: Config, closes: Arc<AtomicUsize>) -> Arc<Mutex<Shared>> {
        Arc::new(Mutex::new(Shared {
            monitor: Monitor::new(&config),
            capture: None,
            supervisor: Supervisor::new(),
            closer: Box::new(CountingCloser(closes)),
            subscriber_txs: Vec::new(),
            config,
        }))
    }

    fn spawn_loop(
        shared: &Arc<Mutex<Shared>>,
        wake: &Arc<Notify>,
    ) -> (tokio::task::JoinHandle<()>, mpsc::UnboundedSender<KeyTransition>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_event_loop(
            Arc::clone(shared),
            event_rx,
            Arc::clone(wake),
        ));
        (handle, event_tx)
    }

    // The loop may be parked on an empty deadline when a client arms the
    // switch; the nudge must get the grace failsafe scheduled anyway.
    #[tokio::test]
    async fn arming_over_ipc_alone_still_fires_the_grace_failsafe() {
        let closes = Arc::new(AtomicUsize::new(0));
        let shared = make_shared(fast_config(), Arc::clone(&closes));
        let wake = Arc::new(Notify::new());
        let (loop_task, _event_tx) = spawn_loop(&shared, &wake);

        // What the Arm handler does, minus the socket plumbing
        {
            let mut shared = shared.lock().await;
            let actions = shared.monitor.arm(KEY_SPACE);
            process_actions(&mut shared, actions);
        }
        wake.notify_one();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        loop_task.abort();
    }

    // A capture nobody touches must still count down and cancel.
    #[tokio::test]
    async fn untouched_capture_ticks_down_to_cancellation() {
        let closes = Arc::new(AtomicUsize::new(0));
        let shared = make_shared(fast_config(), Arc::clone(&closes));
        let wake = Arc::new(Notify::new());
        let (loop_task, _event_tx) = spawn_loop(&shared, &wake);

        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel();
        {
            let mut shared = shared.lock().await;
            shared.subscriber_txs.push(sub_tx);
            shared.capture = Some(CaptureSession::new(&shared.config));
        }
        wake.notify_one();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut cancelled = false;
        while let Ok(line) = sub_rx.try_recv() {
            if matches!(ipc::decode_daemon(&line), Some(DaemonMsg::CaptureCancelled)) {
                cancelled = true;
            }
        }
        assert!(cancelled, "countdown never expired");
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        loop_task.abort();
    }

    // Starting a capture while armed and holding the watched key diverts
    // the release into the session. When the session cancels, the monitor
    // must not stay wedged on the hold it never saw end.
    #[tokio::test]
    async fn cancelled_capture_while_armed_does_not_wedge_the_switch() {
        let closes = Arc::new(AtomicUsize::new(0));
        let shared = make_shared(fast_config(), Arc::clone(&closes));
        let wake = Arc::new(Notify::new());
        let (loop_task, _event_tx) = spawn_loop(&shared, &wake);

        {
            let mut shared = shared.lock().await;
            let actions = shared.monitor.arm(KEY_SPACE);
            process_actions(&mut shared, actions);
            shared.monitor.on_key_down(KEY_SPACE);
            shared.capture = Some(CaptureSession::new(&shared.config));
        }
        wake.notify_one();

        // 3 ticks of 20 ms expire the capture, then the next poll closes
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        loop_task.abort();
    }
}
