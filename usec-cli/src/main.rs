//! usec CLI - Command-line tool for USB e-paper display controllers.
//!
//! ## Features
//!
//! - Show controller, panel and firmware information
//! - Read panel temperature, read and program VCOM
//! - Upload raw 8 bpp grayscale images and refresh with any waveform mode
//! - Fill or clear panel areas
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use usec::{Device, Region, Transport, UpdateMode};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments the parser could not catch (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Missing or invalid configuration (exit 3).
    #[error("{0}")]
    Config(String),
    /// Device node missing or unusable (exit 4).
    #[error("{0}")]
    DeviceNotFound(String),
    /// Stopped by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<usec::Error>() {
        Some(usec::Error::Interrupted) => 130,
        Some(usec::Error::Config(_)) => 3,
        Some(usec::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => 4,
        _ => 1,
    }
}

/// usec - drive USB e-paper display controllers over SCSI pass-through.
///
/// Environment variables:
///   USEC_DEVICE             - SCSI generic node of the controller (e.g. /dev/sg2)
///   USEC_TIMEOUT            - Command timeout in milliseconds (default: 50000)
///   USEC_MODE               - Default waveform mode (default: gc16)
///   USEC_NON_INTERACTIVE    - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "usec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    usec -d /dev/sg2 info\n  \
    usec -d /dev/sg2 show page.gray --width 1872 --height 1404 --mode gc16\n  \
    usec -d /dev/sg2 fill 0x00 --width 200 --height 100 --mode du")]
pub(crate) struct Cli {
    /// SCSI generic device node of the controller.
    #[arg(short, long, global = true, env = "USEC_DEVICE")]
    pub device: Option<String>,

    /// Command timeout in milliseconds.
    #[arg(long, global = true, value_name = "MS", env = "USEC_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Acknowledge every upload block instead of only at address jumps.
    #[arg(long, global = true)]
    pub no_fast_write: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "USEC_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Panel area; unset edges default to the whole panel.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct AreaArgs {
    /// Left edge in pixels.
    #[arg(long)]
    pub x: Option<u32>,
    /// Top edge in pixels.
    #[arg(long)]
    pub y: Option<u32>,
    /// Width in pixels (default: to the right panel edge).
    #[arg(long)]
    pub width: Option<u32>,
    /// Height in pixels (default: to the bottom panel edge).
    #[arg(long)]
    pub height: Option<u32>,
}

impl AreaArgs {
    /// Resolve against the panel size.
    pub fn region(&self, panel_width: u32, panel_height: u32) -> Region {
        let x = self.x.unwrap_or(0);
        let y = self.y.unwrap_or(0);
        Region::new(
            x,
            y,
            self.width
                .unwrap_or_else(|| panel_width.saturating_sub(x)),
            self.height
                .unwrap_or_else(|| panel_height.saturating_sub(y)),
        )
    }
}

/// Refresh options.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct RefreshArgs {
    /// Waveform mode (init, du, gc16, gl16, glr16, gld16, a2, du4 or 0-7).
    #[arg(short, long, env = "USEC_MODE", value_parser = parse_mode)]
    pub mode: Option<UpdateMode>,

    /// Return right after starting the refresh.
    #[arg(long)]
    pub no_wait: bool,
}

impl RefreshArgs {
    /// Mode from the flag, then the config file, then GC16.
    pub fn resolve_mode(&self, config: &Config) -> UpdateMode {
        self.mode
            .or_else(|| config.update_mode())
            .unwrap_or_default()
    }

    /// Whether to wait for the refresh to finish.
    pub fn wait_ready(&self, config: &Config) -> bool {
        !self.no_wait && config.wait_ready()
    }
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Show controller, panel and firmware information.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read the panel temperature.
    Temp {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read or program the VCOM voltage.
    Vcom {
        /// New VCOM magnitude in millivolts (1530 means -1.53 V).
        #[arg(long, value_name = "MV")]
        set: Option<u16>,

        /// Do not ask for confirmation before programming VCOM.
        #[arg(short, long)]
        yes: bool,

        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Erase the whole panel to white (INIT waveform).
    Clear {
        /// Return right after starting the refresh.
        #[arg(long)]
        no_wait: bool,
    },

    /// Upload a raw 8 bpp grayscale image and display it.
    Show {
        /// Raw image file, one byte per pixel, row-major.
        file: PathBuf,

        /// Image width in pixels.
        #[arg(long)]
        width: u32,

        /// Image height in pixels.
        #[arg(long)]
        height: u32,

        /// Left edge on the panel.
        #[arg(long, default_value_t = 0)]
        x: u32,

        /// Top edge on the panel.
        #[arg(long, default_value_t = 0)]
        y: u32,

        #[command(flatten)]
        refresh: RefreshArgs,

        /// Only upload, do not refresh the display.
        #[arg(long)]
        no_update: bool,
    },

    /// Fill a panel area with one gray level and display it.
    Fill {
        /// Gray level (0 = black, 255 = white; hex with 0x prefix).
        #[arg(value_parser = parse_level)]
        level: u8,

        #[command(flatten)]
        area: AreaArgs,

        #[command(flatten)]
        refresh: RefreshArgs,
    },

    /// Refresh a panel area from the controller image buffer.
    Update {
        #[command(flatten)]
        area: AreaArgs,

        #[command(flatten)]
        refresh: RefreshArgs,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a waveform mode name or ordinal.
fn parse_mode(s: &str) -> Result<UpdateMode, String> {
    UpdateMode::from_name(s.trim()).ok_or_else(|| {
        format!(
            "Invalid mode '{s}'. Expected one of: {}",
            UpdateMode::ALL
                .iter()
                .map(|m| m.to_string().to_lowercase())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })
}

/// Parse a gray level (decimal or 0x-prefixed hex).
fn parse_level(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = match s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("Invalid gray level '{s}': {e}"))
}

/// A controller opened through whatever transport the platform offers.
pub(crate) type Controller = Device<Box<dyn Transport>>;

/// Open the controller named on the command line or in the config.
pub(crate) fn open_device(cli: &Cli, config: &Config) -> Result<Controller> {
    let path = cli
        .device
        .clone()
        .or_else(|| config.device.path.clone())
        .ok_or_else(|| {
            CliError::Config(
                "No device specified. Use --device, USEC_DEVICE or [device] path in usec.toml"
                    .to_string(),
            )
        })?;

    let device_config = config.device_config(cli.timeout, cli.no_fast_write);
    device_config
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;

    if !cli.quiet {
        eprintln!("{} Opening {}", style("🔌").cyan(), style(&path).bold());
    }
    let transport = open_transport(&path)?;
    let device = Device::with_transport(transport, device_config)
        .with_context(|| format!("Failed to identify controller on {path}"))?;
    Ok(device)
}

#[cfg(target_os = "linux")]
fn open_transport(path: &str) -> Result<Box<dyn Transport>> {
    match usec::SgDevice::open(path) {
        Ok(sg) => Ok(Box::new(sg)),
        Err(usec::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            Err(CliError::DeviceNotFound(format!("Device {path} not found")).into())
        },
        Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to open {path}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn open_transport(path: &str) -> Result<Box<dyn Transport>> {
    Err(CliError::DeviceNotFound(format!(
        "Cannot open {path}: SCSI pass-through is only supported on Linux"
    ))
    .into())
}

fn main() {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "usec v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    usec::set_interrupt_checker(was_interrupted);

    let code = match run(&cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code_for(&err)
        },
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Info { json } => commands::info::cmd_info(cli, &config, *json),
        Commands::Temp { json } => commands::info::cmd_temp(cli, &config, *json),
        Commands::Vcom { set, yes, json } => {
            commands::info::cmd_vcom(cli, &config, *set, *yes, *json)
        },
        Commands::Clear { no_wait } => commands::display::cmd_clear(cli, &config, !*no_wait),
        Commands::Show {
            file,
            width,
            height,
            x,
            y,
            refresh,
            no_update,
        } => commands::display::cmd_show(
            cli,
            &config,
            file,
            Region::new(*x, *y, *width, *height),
            refresh,
            *no_update,
        ),
        Commands::Fill {
            level,
            area,
            refresh,
        } => commands::display::cmd_fill(cli, &config, *level, area, refresh),
        Commands::Update { area, refresh } => {
            commands::display::cmd_update(cli, &config, area, refresh)
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_show() {
        let cli = Cli::try_parse_from([
            "usec", "-d", "/dev/sg2", "show", "page.gray", "--width", "64", "--height", "32",
            "--x", "8", "--mode", "du",
        ])
        .unwrap();
        assert_eq!(cli.device.as_deref(), Some("/dev/sg2"));
        match cli.command {
            Commands::Show {
                file,
                width,
                height,
                x,
                y,
                refresh,
                no_update,
            } => {
                assert_eq!(file, PathBuf::from("page.gray"));
                assert_eq!((width, height, x, y), (64, 32, 8, 0));
                assert_eq!(refresh.mode, Some(UpdateMode::Du));
                assert!(!refresh.no_wait);
                assert!(!no_update);
            },
            _ => panic!("expected show"),
        }
    }

    #[test]
    fn test_cli_parse_show_requires_geometry() {
        assert!(Cli::try_parse_from(["usec", "show", "page.gray", "--width", "64"]).is_err());
    }

    #[test]
    fn test_cli_parse_fill() {
        let cli = Cli::try_parse_from([
            "usec", "fill", "0x80", "--width", "100", "--height", "50", "--no-wait",
        ])
        .unwrap();
        match cli.command {
            Commands::Fill {
                level,
                area,
                refresh,
            } => {
                assert_eq!(level, 0x80);
                assert_eq!(area.width, Some(100));
                assert!(area.x.is_none());
                assert!(refresh.no_wait);
            },
            _ => panic!("expected fill"),
        }
    }

    #[test]
    fn test_cli_parse_vcom_set() {
        let cli = Cli::try_parse_from(["usec", "vcom", "--set", "1530", "--yes"]).unwrap();
        match cli.command {
            Commands::Vcom { set, yes, json } => {
                assert_eq!(set, Some(1530));
                assert!(yes);
                assert!(!json);
            },
            _ => panic!("expected vcom"),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "usec",
            "info",
            "--timeout",
            "1000",
            "--no-fast-write",
            "-vv",
            "--config",
            "/tmp/usec.toml",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Some(1000));
        assert!(cli.no_fast_write);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/usec.toml")));
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["usec"]).is_err());
    }

    #[test]
    fn test_cli_invalid_mode() {
        assert!(Cli::try_parse_from(["usec", "update", "--mode", "gc4"]).is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("gc16"), Ok(UpdateMode::Gc16));
        assert_eq!(parse_mode(" A2 "), Ok(UpdateMode::A2));
        assert_eq!(parse_mode("0"), Ok(UpdateMode::Init));
        let err = parse_mode("fast").unwrap_err();
        assert!(err.contains("glr16"));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("0"), Ok(0));
        assert_eq!(parse_level("255"), Ok(255));
        assert_eq!(parse_level("0xF0"), Ok(0xF0));
        assert_eq!(parse_level("0XaA"), Ok(0xAA));
        assert!(parse_level("256").is_err());
        assert!(parse_level("0x100").is_err());
        assert!(parse_level("white").is_err());
    }

    #[test]
    fn test_area_defaults_to_rest_of_panel() {
        let area = AreaArgs {
            x: Some(100),
            y: None,
            width: None,
            height: Some(40),
        };
        assert_eq!(area.region(960, 540), Region::new(100, 0, 860, 40));
        assert_eq!(AreaArgs::default().region(960, 540), Region::full(960, 540));
    }

    #[test]
    fn test_refresh_args_resolution() {
        let mut config = Config::default();
        let args = RefreshArgs::default();
        assert_eq!(args.resolve_mode(&config), UpdateMode::Gc16);
        assert!(args.wait_ready(&config));

        config.update.mode = Some("a2".to_string());
        config.update.wait_ready = Some(false);
        assert_eq!(args.resolve_mode(&config), UpdateMode::A2);
        assert!(!args.wait_ready(&config));

        let args = RefreshArgs {
            mode: Some(UpdateMode::Du4),
            no_wait: false,
        };
        assert_eq!(args.resolve_mode(&config), UpdateMode::Du4);
    }

    #[test]
    fn test_exit_codes() {
        let err: anyhow::Error = CliError::Usage("bad".into()).into();
        assert_eq!(exit_code_for(&err), 2);
        let err: anyhow::Error = CliError::Config("none".into()).into();
        assert_eq!(exit_code_for(&err), 3);
        let err: anyhow::Error = CliError::DeviceNotFound("gone".into()).into();
        assert_eq!(exit_code_for(&err), 4);
        let err: anyhow::Error = CliError::Cancelled("stop".into()).into();
        assert_eq!(exit_code_for(&err), 130);

        let err = anyhow::Error::new(usec::Error::Interrupted).context("uploading");
        assert_eq!(exit_code_for(&err), 130);
        let err = anyhow::Error::new(usec::Error::Timeout("busy".into()));
        assert_eq!(exit_code_for(&err), 1);
        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&err), 1);
    }
}
