//! xfermodem CLI - command-line serial file transfer (XMODEM/YMODEM/ZMODEM).

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use env_logger::Env;
use std::path::PathBuf;

mod commands;
mod config;

use config::Config;

/// xfermodem - serial file transfer over XMODEM, YMODEM, or ZMODEM.
#[derive(Parser)]
#[command(name = "xfermodem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if there is exactly one).
    #[arg(short, long, env = "XFERMODEM_PORT", global = true)]
    pub(crate) port: Option<String>,

    /// Baud rate for data transfer.
    #[arg(short, long, env = "XFERMODEM_BAUD", global = true)]
    pub(crate) baud: Option<u32>,

    /// Suppress human-readable status output (errors still go to stderr).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Fail instead of prompting when a choice (e.g. port selection) is ambiguous.
    #[arg(long, global = true)]
    pub(crate) non_interactive: bool,

    /// Verbose output level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Which wire protocol to speak.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProtocolArg {
    /// XMODEM with the original 8-bit checksum trailer.
    Xmodem,
    /// XMODEM with a CRC-16 trailer, 128-byte blocks.
    XmodemCrc,
    /// XMODEM-1K: CRC-16 trailer, 1024-byte blocks.
    Xmodem1k,
    /// YMODEM batch transfer.
    Ymodem,
    /// ZMODEM framed streaming.
    Zmodem,
}

impl From<ProtocolArg> for xfermodem::Protocol {
    fn from(protocol: ProtocolArg) -> Self {
        match protocol {
            ProtocolArg::Xmodem => Self::XmodemChecksum,
            ProtocolArg::XmodemCrc => Self::XmodemCrc,
            ProtocolArg::Xmodem1k => Self::Xmodem1k,
            ProtocolArg::Ymodem => Self::Ymodem,
            ProtocolArg::Zmodem => Self::Zmodem,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Send a file to the peer.
    Send {
        /// File to send.
        file: PathBuf,

        /// Protocol variant to speak.
        #[arg(long, default_value = "xmodem-crc")]
        protocol: ProtocolArg,
    },

    /// Receive a file from the peer.
    Receive {
        /// Destination path. For YMODEM/ZMODEM, used as a directory if it
        /// already exists; otherwise treated as the exact output file path.
        output: PathBuf,

        /// Protocol variant to speak.
        #[arg(long, default_value = "xmodem-crc")]
        protocol: ProtocolArg,
    },

    /// List available serial ports.
    ListPorts {
        /// Emit a machine-readable JSON array to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate or install shell completions.
    Completions {
        /// Target shell. Detected from $SHELL if omitted.
        shell: Option<Shell>,

        /// Install the completion script instead of printing it to stdout.
        #[arg(long)]
        install: bool,
    },
}

/// Errors surfaced directly by the CLI layer, distinct from engine/host I/O
/// errors (which arrive wrapped in `anyhow::Error`).
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// The operation was interrupted (Ctrl-C) before it could finish.
    #[error("{0}")]
    Cancelled(String),
    /// The user's invocation was ambiguous or incomplete.
    #[error("{0}")]
    Usage(String),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    ctrlc::set_handler(xfermodem::set_interrupt_flag).ok();

    let config = Config::load();

    match &cli.command {
        Commands::Send { file, protocol } => {
            commands::send::run(&cli, &config, file, (*protocol).into())?;
        },
        Commands::Receive { output, protocol } => {
            commands::receive::run(&cli, &config, output, (*protocol).into())?;
        },
        Commands::ListPorts { json } => {
            commands::list_ports::run(*json)?;
        },
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)?;
            } else {
                let shell = shell
                    .or_else(commands::completions::detect_shell_type)
                    .ok_or_else(|| {
                        CliError::Usage(
                            "could not detect your shell; pass one explicitly".to_string(),
                        )
                    })?;
                commands::completions::cmd_completions(shell);
            }
        },
    }

    Ok(())
}

/// Resolve the serial port to use: explicit flag, then local config, then
/// auto-detection when exactly one port is present.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(port) = &cli.port {
        return Ok(port.clone());
    }
    if let Some(port) = &config.port {
        return Ok(port.clone());
    }

    let ports = xfermodem::NativePortEnumerator::list_ports()
        .map_err(|e| anyhow::anyhow!("failed to list serial ports: {e}"))?;

    match ports.len() {
        0 => Err(CliError::Usage(
            "no serial ports found; use --port to specify one".to_string(),
        )
        .into()),
        1 => Ok(ports[0].name.clone()),
        _ => {
            let names: Vec<&str> = ports
                .iter()
                .map(|p| p.name.as_str())
                .collect();
            let suffix = if cli.non_interactive {
                " (non-interactive mode, no prompt available)"
            } else {
                ""
            };
            Err(CliError::Usage(format!(
                "multiple serial ports found ({}); use --port to specify one{suffix}",
                names.join(", ")
            ))
            .into())
        },
    }
}

/// The baud rate to use: explicit flag, then local config, then a
/// conservative default suitable for any UART.
pub(crate) fn get_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.baud)
        .unwrap_or(115_200)
}

/// Whether to draw progress bars / colored output (suppressed when quiet or
/// when stderr is not an interactive terminal).
pub(crate) fn use_fancy_output(cli: &Cli) -> bool {
    use std::io::IsTerminal;
    !cli.quiet && std::io::stderr().is_terminal()
}

/// Whether Ctrl-C has been requested since the process started.
pub(crate) fn was_interrupted() -> bool {
    xfermodem::is_interrupted_requested()
}
