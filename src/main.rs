use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use opendmx::commands::{detect_dmx_ports, find_dmx_port, OutputSession, OutputStatus};
use opendmx::dmx::{DmxDevice, InterpacketPeriod, SimulatedTransport};
use opendmx::settings::{OutputSettings, SettingsManager};

/// Interval between status polls while sending.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "opendmx", version, about = "DMX512 output over a serial adapter")]
struct Cli {
    /// Directory holding output_settings.json
    #[arg(long, global = true)]
    settings_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports that could carry DMX output
    Ports,

    /// Send DMX frames for a while
    Send {
        /// Port to open; defaults to the last port used, then the first one found
        port: Option<String>,

        /// Slot level as SLOT=VALUE (slot 0-511), repeatable
        #[arg(short, long = "level", value_parser = parse_level)]
        levels: Vec<(usize, u8)>,

        #[command(flatten)]
        output: OutputArgs,

        /// How long to send for
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Use an in-memory transport instead of a real port
        #[arg(long)]
        simulate: bool,
    },

    /// Show or update the saved output settings
    Settings {
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    /// Start code byte
    #[arg(long)]
    start_code: Option<u8>,

    /// Frame rate preset
    #[arg(long, value_enum, conflicts_with = "period_us")]
    rate: Option<Rate>,

    /// Raw interpacket gap in microseconds
    #[arg(long)]
    period_us: Option<u64>,
}

impl OutputArgs {
    fn apply(&self, settings: &mut OutputSettings) -> bool {
        let mut changed = false;
        if let Some(start_code) = self.start_code {
            settings.start_code = start_code;
            changed = true;
        }
        if let Some(rate) = self.rate {
            settings.interpacket_period = rate.into();
            changed = true;
        }
        if let Some(us) = self.period_us {
            settings.interpacket_period = InterpacketPeriod::from_duration(Duration::from_micros(us));
            changed = true;
        }
        changed
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Rate {
    /// ~40 frames per second
    High,
    /// ~30 frames per second
    Mid,
    /// ~20 frames per second
    Low,
}

impl From<Rate> for InterpacketPeriod {
    fn from(rate: Rate) -> Self {
        match rate {
            Rate::High => InterpacketPeriod::High,
            Rate::Mid => InterpacketPeriod::Mid,
            Rate::Low => InterpacketPeriod::Low,
        }
    }
}

fn parse_level(arg: &str) -> Result<(usize, u8), String> {
    let (slot, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=VALUE, got '{}'", arg))?;
    let slot = slot
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid slot '{}': {}", slot, e))?;
    let value = value
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("invalid value '{}': {}", value, e))?;
    Ok((slot, value))
}

fn default_settings_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config").join("opendmx"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn print_status(status: &OutputStatus) {
    println!(
        "{}: running={} error={} frames={} start_code=0x{:02X} ~{:.1} fps",
        status.port,
        status.running,
        status.has_error,
        status.frames_sent,
        status.start_code,
        status.frames_per_second
    );
}

async fn list_ports() -> Result<()> {
    let ports = detect_dmx_ports().await.map_err(|e| anyhow!(e))?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        println!("{:<32} {}", port.port, port.label);
    }
    Ok(())
}

/// The last port used, if it is still plugged in.
async fn saved_port(last_port: Option<String>) -> Result<Option<String>> {
    let Some(last_port) = last_port else {
        return Ok(None);
    };
    match find_dmx_port(last_port.clone()).await.map_err(|e| anyhow!(e))? {
        Some(info) => {
            tracing::info!("Using last port {}", info.label);
            Ok(Some(info.port))
        }
        None => {
            tracing::warn!("Last used port {} is not present, looking for another", last_port);
            Ok(None)
        }
    }
}

async fn send(
    manager: &SettingsManager,
    port: Option<String>,
    levels: Vec<(usize, u8)>,
    output: OutputArgs,
    seconds: u64,
    simulate: bool,
) -> Result<()> {
    let mut settings = manager.load()?;
    output.apply(&mut settings);

    let session = OutputSession::new();
    let status = if simulate {
        let (transport, _handle) = SimulatedTransport::new();
        let device = DmxDevice::with_transport("simulated", Box::new(transport), settings.output_config());
        session.attach(device).await.map_err(|e| anyhow!(e))?
    } else {
        let port = match port {
            Some(port) => Some(port),
            None => saved_port(settings.last_port.clone()).await?,
        };
        let port = match port {
            Some(port) => port,
            None => detect_dmx_ports()
                .await
                .map_err(|e| anyhow!(e))?
                .into_iter()
                .next()
                .map(|p| p.port)
                .ok_or_else(|| anyhow!("No serial ports found; pass a port explicitly"))?,
        };
        let status = session
            .open_output(port.clone(), settings.clone())
            .await
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("Could not start output on {}", port))?;
        settings.last_port = Some(port);
        manager.save(&settings)?;
        status
    };

    for (slot, value) in levels {
        session.set_channel(slot, value).map_err(|e| anyhow!(e))?;
    }

    tracing::info!("Sending on {} for {}s", status.port, seconds);
    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        if let Some(status) = session.status() {
            if status.has_error {
                print_status(&status);
                session.close_output().await.map_err(|e| anyhow!(e))?;
                bail!("Output on {} halted after repeated send failures", status.port);
            }
        }
    }

    if let Some(status) = session.status() {
        print_status(&status);
    }
    session.close_output().await.map_err(|e| anyhow!(e))?;
    Ok(())
}

fn settings(manager: &SettingsManager, output: OutputArgs) -> Result<()> {
    let mut settings = manager.load()?;
    if output.apply(&mut settings) {
        manager.save(&settings)?;
        println!("Saved {}", manager.settings_path().display());
    }
    if !settings.has_non_default_settings() {
        println!("Using default output settings");
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let manager = SettingsManager::new(&cli.settings_dir.unwrap_or_else(default_settings_dir));

    match cli.command {
        Command::Ports => list_ports().await,
        Command::Send {
            port,
            levels,
            output,
            seconds,
            simulate,
        } => send(&manager, port, levels, output, seconds, simulate).await,
        Command::Settings { output } => settings(&manager, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("0=255").unwrap(), (0, 255));
        assert_eq!(parse_level(" 511 = 7 ").unwrap(), (511, 7));
        assert!(parse_level("12").is_err());
        assert!(parse_level("1=256").is_err());
        assert!(parse_level("x=1").is_err());
    }

    #[test]
    fn test_output_args_apply() {
        let mut settings = OutputSettings::default();
        let args = OutputArgs {
            start_code: Some(0x17),
            rate: Some(Rate::High),
            period_us: None,
        };
        assert!(args.apply(&mut settings));
        assert_eq!(settings.start_code, 0x17);
        assert_eq!(settings.interpacket_period, InterpacketPeriod::High);

        let args = OutputArgs {
            start_code: None,
            rate: None,
            period_us: Some(29_350),
        };
        assert!(args.apply(&mut settings));
        assert_eq!(settings.interpacket_period, InterpacketPeriod::Low);
    }

    #[tokio::test]
    async fn test_saved_port_skips_missing_port() {
        assert_eq!(saved_port(None).await.unwrap(), None);
        let port = saved_port(Some("/dev/opendmx-missing".to_string())).await.unwrap();
        assert_eq!(port, None);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["opendmx", "send", "/dev/ttyUSB0", "-l", "0=255", "--rate", "low"]);
        match cli.command {
            Command::Send { port, levels, output, .. } => {
                assert_eq!(port.as_deref(), Some("/dev/ttyUSB0"));
                assert_eq!(levels, vec![(0, 255)]);
                assert!(matches!(output.rate, Some(Rate::Low)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
