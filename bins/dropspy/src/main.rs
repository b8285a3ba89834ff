//! dropspy - watch kernel packet drops.
//!
//! Puts the kernel drop monitor into packet alert mode, subscribes to its
//! multicast group, and prints each dropped packet that passes the filter
//! chain. Needs CAP_NET_ADMIN and the `drop_monitor` module.

mod filter;
mod output;

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use dropmon::Session;
use regex::Regex;
use tokio::time::{Duration, Instant, sleep};
use tracing_subscriber::EnvFilter;

use filter::DropFilter;

#[derive(Parser)]
#[command(name = "dropspy", version, about = "Watch kernel packet drops")]
struct Cli {
    /// Show only drops on this interface (may be repeated).
    #[arg(long = "iface", value_name = "NAME")]
    ifaces: Vec<String>,

    /// Exclude drops from symbols matching this regex (may be repeated).
    #[arg(long = "xsym", value_name = "REGEX", conflicts_with = "isyms")]
    xsyms: Vec<String>,

    /// Include only drops from symbols matching this regex (may be repeated).
    #[arg(long = "isym", value_name = "REGEX")]
    isyms: Vec<String>,

    /// Minimum original packet length for drops.
    #[arg(long, value_name = "BYTES")]
    minlen: Option<u32>,

    /// Maximum original packet length for drops.
    #[arg(long, value_name = "BYTES")]
    maxlen: Option<u32>,

    /// Show only drops whose payload contains these hex bytes.
    #[arg(long, value_name = "HEX")]
    payload: Option<String>,

    /// Maximum drops to record.
    #[arg(long, short = 'c', value_name = "N")]
    count: Option<u64>,

    /// Duration to capture for, in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Don't record software drops.
    #[arg(long)]
    no_sw: bool,

    /// Don't record hardware drops.
    #[arg(long)]
    no_hw: bool,

    /// Print hex dumps of matching packets.
    #[arg(long)]
    hex: bool,

    /// Print one JSON record per matching drop.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dropspy: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let names = dropmon::link::interface_names().await?;
    let drop_filter = build_filter(&cli, &names)?;

    let mut session = match Session::new().await {
        Ok(session) => session,
        Err(e) if e.is_not_found() => {
            return Err(format!("{e} (is the drop_monitor module loaded?)").into());
        }
        Err(e) => return Err(e.into()),
    };

    // A crashed capture can leave kernel alerting on, which makes the mode
    // switch below fail with EBUSY. Clear it first; from Idle this is a no-op.
    if let Err(e) = session.stop(true, true).await {
        tracing::debug!(error = %e, "pre-capture stop failed");
    }

    let (sw, hw) = (!cli.no_sw, !cli.no_hw);
    if let Err(e) = session.start(sw, hw).await {
        if e.is_permission_denied() {
            return Err(format!("{e} (packet-mode alerting needs CAP_NET_ADMIN)").into());
        }
        return Err(e.into());
    }

    let deadline = cli.timeout.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut recorded = 0u64;

    let result = tokio::select! {
        r = capture(&mut session, &cli, &drop_filter, &names, deadline, &mut recorded) => r,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("got C-c: cleaning up and exiting");
            Ok(())
        }
    };

    // Cleanup on every exit path; stop is idempotent and never waits for a
    // reply, so this is safe even right after a read error.
    if let Err(e) = session.stop(true, true).await {
        tracing::debug!(error = %e, "cleanup stop failed");
    }

    eprintln!("{recorded} drops recorded");
    result.map_err(Into::into)
}

/// Read alerts until the deadline (if any) elapses or the drop count limit
/// is reached. Transient receive failures back off briefly and resume; restart
/// policy lives here, not in the session.
async fn capture(
    session: &mut Session,
    cli: &Cli,
    drop_filter: &DropFilter,
    names: &HashMap<u32, String>,
    deadline: Option<Instant>,
    recorded: &mut u64,
) -> dropmon::Result<()> {
    loop {
        let result = session
            .read_until(deadline, |event| {
                if !drop_filter.matches(&event) {
                    return true;
                }
                *recorded += 1;

                if cli.json {
                    println!("{}", output::json_line(&event, names));
                } else {
                    println!("{}", output::drop_line(&event, names));
                    if cli.hex {
                        print!("{}", output::hex_dump(event.l3_packet()));
                    }
                }

                if let Some(max) = cli.count
                    && *recorded >= max
                {
                    eprintln!("maximum drops reached, exiting");
                    return false;
                }
                true
            })
            .await;

        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "read failed, retrying");
                sleep(Duration::from_millis(250)).await;
            }
        }
    }
}

fn build_filter(cli: &Cli, names: &HashMap<u32, String>) -> Result<DropFilter, Box<dyn Error>> {
    let mut ifaces = HashSet::new();
    for want in &cli.ifaces {
        let index = names
            .iter()
            .find(|(_, name)| name.as_str() == want.as_str())
            .map(|(index, _)| *index)
            .ok_or_else(|| format!("no such interface '{want}'"))?;
        ifaces.insert(index);
    }

    Ok(DropFilter {
        ifaces,
        min_len: cli.minlen,
        max_len: cli.maxlen,
        include_syms: compile_all(&cli.isyms)?,
        exclude_syms: compile_all(&cli.xsyms)?,
        payload: cli.payload.as_deref().map(parse_hex).transpose()?,
    })
}

fn compile_all(exprs: &[String]) -> Result<Vec<Regex>, Box<dyn Error>> {
    exprs
        .iter()
        .map(|expr| Regex::new(expr).map_err(|e| format!("regexp compile {expr}: {e}").into()))
        .collect()
}

/// Parse a hex byte pattern, tolerating whitespace and `:` separators.
fn parse_hex(s: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if cleaned.len() % 2 != 0 {
        return Err(format!("odd-length hex pattern '{s}'").into());
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|e| format!("bad hex pattern '{s}': {e}").into())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("dead beef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parse_hex("0a:0b").unwrap(), vec![0x0A, 0x0B]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
