/* revadisplay-replay CLI: offline analysis of a captured host<->device
 * transcript against the Rev-A wire format, without touching any hardware. */
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use revadisplay_rs::replay::{parse_transcript, run_replay};

/// revadisplay-replay — classify a captured transcript against the
/// Rev-A wire protocol.
#[derive(Parser)]
#[command(name = "revadisplay-replay", version, about)]
struct Cli {
    /// Path to a line-delimited JSON transcript file.
    transcript: PathBuf,

    /// Fail (and report) if HELLO, orientation, or window markers are
    /// never observed.
    #[arg(long)]
    strict: bool,

    /// Emit the report as JSON instead of a human-readable summary.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let events = parse_transcript(&cli.transcript)
        .with_context(|| format!("failed to parse transcript {}", cli.transcript.display()))?;
    let report = run_replay(&events, cli.strict);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("events:        {}", report.total_events);
        println!("  host->device: {}", report.host_to_device_events);
        println!("  device->host: {}", report.device_to_host_events);
        println!("hello:         {}", report.hello_count);
        println!("orientation:   {}", report.orientation_count);
        println!("window:        {}", report.window_count);
        println!("payload pkts:  {}", report.payload_packets);
        println!("raw bytes:     {}", report.raw_bytes_total);
        if !report.command_counts.is_empty() {
            println!("commands:");
            let mut names: Vec<&String> = report.command_counts.keys().collect();
            names.sort();
            for name in names {
                println!("  {name}: {}", report.command_counts[name]);
            }
        }
        if !report.errors.is_empty() {
            println!("errors:");
            for error in &report.errors {
                println!("  {error}");
            }
        }
    }

    if cli.strict && !report.errors.is_empty() {
        anyhow::bail!("strict replay found {} error(s)", report.errors.len());
    }

    Ok(())
}
