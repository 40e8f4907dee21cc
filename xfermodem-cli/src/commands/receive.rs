//! `receive` command: pull a file from the peer over a serial port.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use xfermodem::port::Port;
use xfermodem::{Event, EventSink, NativePort, Protocol, SerialConfig, Session};

use crate::{CliError, config::Config, get_baud, get_port, use_fancy_output, was_interrupted};

enum Outcome {
    Completed,
    Failed(String),
    Cancelled,
}

struct PortSink<'p> {
    port: &'p mut NativePort,
    pb: ProgressBar,
    quiet: bool,
    outcome: Option<Outcome>,
    io_error: Option<std::io::Error>,
}

impl EventSink for PortSink<'_> {
    fn on_event(&mut self, event: Event<'_>) {
        match event {
            Event::SendData { bytes } => {
                if let Err(e) = self
                    .port
                    .write_all(bytes)
                {
                    self.io_error = Some(e);
                }
            },
            Event::Started {
                file_name,
                file_size,
            } => {
                if file_size > 0 {
                    self.pb
                        .set_length(file_size);
                }
                if !self.quiet {
                    eprintln!(
                        "{} receiving {}",
                        style("<-").cyan(),
                        file_name
                            .as_deref()
                            .unwrap_or("<unnamed>")
                    );
                }
            },
            Event::Progress {
                bytes_transferred,
                total_bytes,
                error_count,
                ..
            } => {
                if total_bytes > 0 {
                    self.pb
                        .set_length(total_bytes);
                }
                self.pb
                    .set_position(bytes_transferred);
                if error_count > 0 {
                    self.pb
                        .set_message(format!("{error_count} retries"));
                }
            },
            Event::Completed => self.outcome = Some(Outcome::Completed),
            Event::Failed { message } => self.outcome = Some(Outcome::Failed(message.to_string())),
            Event::Cancelled => self.outcome = Some(Outcome::Cancelled),
        }
    }
}

pub(crate) fn run(
    cli: &crate::Cli,
    config: &Config,
    output: &Path,
    protocol: Protocol,
) -> Result<()> {
    let port_name = get_port(cli, config)?;
    let baud = get_baud(cli, config);

    if !cli.quiet {
        eprintln!(
            "{} using port {} @ {baud} baud",
            style("*").cyan(),
            port_name
        );
    }

    let serial_config = SerialConfig::new(&port_name, baud).with_timeout(Duration::from_millis(3000));
    let mut port = NativePort::open(&serial_config)
        .with_context(|| format!("failed to open serial port {port_name}"))?;

    let pb = ProgressBar::new(0);
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if use_fancy_output(cli) {
        #[allow(clippy::unwrap_used)]
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
    } else {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut session = Session::new_receiver(protocol);
    let mut sink = PortSink {
        port: &mut port,
        pb: pb.clone(),
        quiet: cli.quiet,
        outcome: None,
        io_error: None,
    };

    session.start_receive(&mut sink);
    if let Some(e) = sink.io_error.take() {
        port.close().ok();
        return Err(e).context("write to serial port failed");
    }

    let mut buf = [0u8; 4096];
    let outcome = loop {
        if was_interrupted() {
            session.cancel(&mut sink);
        }
        if let Some(outcome) = sink.outcome.take() {
            break outcome;
        }
        match port.read(&mut buf) {
            Ok(0) => {},
            Ok(n) => session.process_data(&mut sink, &buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
            Err(e) => {
                port.close().ok();
                return Err(e).context("read from serial port failed");
            },
        }
        if let Some(e) = sink.io_error.take() {
            port.close().ok();
            return Err(e).context("write to serial port failed");
        }
    };

    pb.finish_and_clear();
    port.close()
        .context("failed to close serial port")?;

    match outcome {
        Outcome::Completed => {
            let dest = resolve_output_path(output, session.file_name());
            std::fs::write(&dest, session.received_data())
                .with_context(|| format!("failed to write {}", dest.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} wrote {} ({} bytes)",
                    style("done").green().bold(),
                    dest.display(),
                    session
                        .received_data()
                        .len()
                );
            }
            Ok(())
        },
        Outcome::Failed(message) => Err(CliError::Cancelled(format!("transfer failed: {message}")).into()),
        Outcome::Cancelled => Err(CliError::Cancelled("transfer cancelled".to_string()).into()),
    }
}

/// Resolve the destination file path: if `output` is an existing directory,
/// the peer-declared file name is appended; otherwise `output` is used as-is.
fn resolve_output_path(output: &Path, peer_file_name: Option<&str>) -> PathBuf {
    if output.is_dir() {
        let name = peer_file_name.unwrap_or("received.bin");
        output.join(name)
    } else {
        output.to_path_buf()
    }
}
