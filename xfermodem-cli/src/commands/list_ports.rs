//! `list-ports` command: enumerate available serial ports.

use anyhow::{Context, Result};
use console::style;

use xfermodem::{NativePortEnumerator, PortEnumerator};

pub(crate) fn run(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().context("failed to list serial ports")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).context("failed to serialize port list")?
        );
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("{}", style("no serial ports found").dim());
        return Ok(());
    }

    eprintln!("{}", style("available serial ports").bold());
    for port in &ports {
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04x}:{pid:04x})"),
            _ => String::new(),
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();
        eprintln!(
            "  {} {}{vid_pid}{product}",
            style("*").green(),
            style(&port.name).cyan()
        );
    }

    Ok(())
}
