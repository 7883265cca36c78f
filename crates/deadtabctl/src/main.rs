use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use deadtab_core::config::{self, Config};
use deadtab_core::ipc::{self, ClientMsg, DaemonMsg};
use deadtab_core::keymap::{self, KeyId};
use deadtab_core::prefs::Prefs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "deadtabctl", about = "Control the deadtabd dead man's switch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show switch status
    Status,
    /// Arm the switch on the saved (or given) key
    Arm {
        /// Key name (e.g. space, enter, left-shift, a)
        #[arg(long)]
        key: Option<String>,
    },
    /// Disarm the switch
    Disarm,
    /// Save the watched-key preference, updating a running armed switch
    SetKey {
        /// Key name (e.g. space, enter, left-shift, a)
        key: String,
    },
    /// Pick the watched key interactively, then arm on it
    Capture,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Status => status(),
        Command::Arm { key } => arm(key),
        Command::Disarm => disarm(),
        Command::SetKey { key } => set_key(&key),
        Command::Capture => capture(),
    }
}

fn connect() -> Result<UnixStream> {
    let socket_path = config::socket_path();
    UnixStream::connect(&socket_path)
        .with_context(|| format!("connecting to deadtabd at {}", socket_path.display()))
}

/// Connect, starting the daemon first if nothing is listening. Mirrors the
/// arm semantics: an arm request against a page with no monitor installs
/// one and retries.
fn connect_or_spawn() -> Result<UnixStream> {
    let socket_path = config::socket_path();
    if let Ok(stream) = UnixStream::connect(&socket_path) {
        return Ok(stream);
    }

    std::process::Command::new("deadtabd")
        .spawn()
        .context("spawning deadtabd (is it on PATH?)")?;

    for _ in 0..10 {
        std::thread::sleep(Duration::from_millis(100));
        if let Ok(stream) = UnixStream::connect(&socket_path) {
            return Ok(stream);
        }
    }
    bail!("deadtabd did not come up at {}", socket_path.display())
}

fn send(stream: &UnixStream, msg: &ClientMsg) -> Result<()> {
    let mut writer = stream.try_clone().context("cloning stream")?;
    writer
        .write_all(ipc::encode(msg).as_bytes())
        .context("sending command")
}

fn read_response(reader: &mut impl BufRead) -> Result<DaemonMsg> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).context("reading response")?;
        if n == 0 {
            bail!("daemon closed the connection");
        }
        if let Some(msg) = ipc::decode_daemon(&line) {
            return Ok(msg);
        }
    }
}

fn print_ack(msg: DaemonMsg) -> Result<()> {
    match msg {
        DaemonMsg::Ack { ok: true, message } => {
            println!("{}", message);
            Ok(())
        }
        DaemonMsg::Ack { ok: false, message } => {
            eprintln!("error: {}", message);
            std::process::exit(1);
        }
        other => bail!("unexpected response: {:?}", other),
    }
}

fn parse_key(name: &str) -> Result<KeyId> {
    keymap::parse_name(name)
        .with_context(|| format!("unknown key name '{}' (try space, enter, left-shift, a..z)", name))
}

fn status() -> Result<()> {
    let stream = match connect() {
        Ok(stream) => stream,
        Err(_) => {
            println!("inactive (deadtabd not running)");
            return Ok(());
        }
    };
    send(&stream, &ClientMsg::GetStatus)?;
    let mut reader = BufReader::new(stream);
    match read_response(&mut reader)? {
        DaemonMsg::Status {
            armed,
            key_name,
            version,
            ..
        } => {
            println!("deadtabd v{}", version);
            if armed {
                println!("  ACTIVE — watching {}", key_name.as_deref().unwrap_or("?"));
            } else {
                println!("  inactive");
            }
            Ok(())
        }
        other => bail!("unexpected response: {:?}", other),
    }
}

fn arm(key_flag: Option<String>) -> Result<()> {
    let key = match key_flag {
        Some(name) => parse_key(&name)?,
        None => match Prefs::load().watched_key {
            Some(key) => key,
            None => bail!(
                "no key chosen yet — run `deadtabctl capture` or pass --key"
            ),
        },
    };

    let stream = connect_or_spawn()?;
    send(&stream, &ClientMsg::Arm { key })?;
    let mut reader = BufReader::new(stream);
    print_ack(read_response(&mut reader)?)
}

fn disarm() -> Result<()> {
    let stream = match connect() {
        Ok(stream) => stream,
        Err(_) => {
            println!("deadtabd not running — nothing to disarm");
            return Ok(());
        }
    };
    send(&stream, &ClientMsg::Disarm)?;
    let mut reader = BufReader::new(stream);
    print_ack(read_response(&mut reader)?)
}

fn set_key(name: &str) -> Result<()> {
    let key = parse_key(name)?;
    Prefs {
        watched_key: Some(key),
    }
    .store()
    .context("saving key preference")?;

    // Push the new key to a running, armed switch; otherwise the saved
    // preference is all there is to do
    if let Ok(stream) = connect() {
        send(&stream, &ClientMsg::UpdateKey { key })?;
        let mut reader = BufReader::new(stream);
        if let DaemonMsg::Ack { ok: true, message } = read_response(&mut reader)? {
            println!("{}", message);
            return Ok(());
        }
    }
    println!("watched key preference saved: {}", keymap::display_name(key));
    Ok(())
}

/// One countdown line. Remaining time comes from the configured tick
/// length; ticks are not necessarily seconds.
fn format_progress(
    ticks_remaining: u8,
    tick: Duration,
    fraction: f32,
    candidate: Option<&str>,
) -> String {
    let left = tick * u32::from(ticks_remaining);
    format!(
        "  {:.1}s left  [{:3.0}%]  candidate: {}",
        left.as_secs_f32(),
        fraction * 100.0,
        candidate.unwrap_or("none")
    )
}

fn capture() -> Result<()> {
    // The daemon ticks at whatever the shared config file says
    let tick = Duration::from_millis(Config::load().unwrap_or_default().capture.tick_ms);
    let stream = connect_or_spawn()?;
    send(&stream, &ClientMsg::Subscribe)?;
    let mut reader = BufReader::new(stream.try_clone().context("cloning stream")?);
    match read_response(&mut reader)? {
        DaemonMsg::Ack { ok: true, .. } => {}
        other => bail!("subscribe failed: {:?}", other),
    }

    send(&stream, &ClientMsg::StartCapture)?;
    match read_response(&mut reader)? {
        DaemonMsg::Ack { ok: true, .. } => {
            println!("press and hold the key to watch (release or Enter confirms)...");
        }
        DaemonMsg::Ack { ok: false, message } => bail!("{}", message),
        other => bail!("unexpected response: {:?}", other),
    }

    loop {
        match read_response(&mut reader)? {
            DaemonMsg::CaptureProgress {
                ticks_remaining,
                fraction,
                candidate,
            } => {
                println!(
                    "{}",
                    format_progress(ticks_remaining, tick, fraction, candidate.as_deref())
                );
            }
            DaemonMsg::CaptureCommitted { key_name, .. } => {
                println!("watched key set to {} — switch armed, keep holding it!", key_name);
                return Ok(());
            }
            DaemonMsg::CaptureCancelled => {
                eprintln!("capture cancelled: no key pressed within the window");
                std::process::exit(1);
            }
            // Status broadcasts ride the same subscription; not our concern here
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_time_follows_the_configured_tick_length() {
        let line = format_progress(4, Duration::from_millis(500), 0.2, None);
        assert!(line.contains("2.0s left"), "got: {}", line);
        let line = format_progress(2, Duration::from_millis(1000), 0.5, None);
        assert!(line.contains("2.0s left"), "got: {}", line);
    }

    #[test]
    fn progress_names_the_candidate_or_none() {
        let line = format_progress(2, Duration::from_millis(1000), 0.5, Some("Space"));
        assert!(line.contains("candidate: Space"), "got: {}", line);
        let line = format_progress(3, Duration::from_millis(1000), 0.0, None);
        assert!(line.contains("candidate: none"), "got: {}", line);
    }
}
