// Startup module - displays banner and component status
//
// Shows version info, where configuration and data live, how the previous
// run ended, and the address sensors should send pings to.

use crate::config::{Config, VERSION};
use crate::liveness::PriorShutdown;

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// What the daemon knows once the store and tracker are up
pub struct StartupInfo<'a> {
    pub config: &'a Config,
    pub prior: &'a PriorShutdown,
    pub generation: i64,
    pub schema_version: u32,
}

/// Short description of how the previous run ended
fn describe_prior(prior: &PriorShutdown) -> String {
    match prior {
        PriorShutdown::Clean => "clean".to_string(),
        PriorShutdown::Unclean {
            last_heartbeat_ms: Some(at),
        } => {
            let when = chrono::DateTime::from_timestamp_millis(*at)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| at.to_string());
            format!("unclean (last heartbeat {})", when)
        }
        PriorShutdown::Unclean {
            last_heartbeat_ms: None,
        } => "unclean (no heartbeat recorded)".to_string(),
    }
}

/// Print the startup banner
pub fn print_startup(info: &StartupInfo<'_>) {
    use colors::*;

    let config = info.config;

    // Banner
    println!();
    println!("  {BOLD}{CYAN}attentd{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Attention tracking daemon{RESET}");
    println!();

    // Config file status
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET}   {GREEN}+{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET}   {DIM}(using defaults){RESET}");
        }
    }
    println!(
        "  {DIM}Database:{RESET} {} {DIM}(schema v{}){RESET}",
        config.db_path().display(),
        info.schema_version
    );
    println!(
        "  {DIM}Tracker:{RESET}  flush every {} pings, merge gap {} ms",
        config.tracker.flush_threshold, config.tracker.merge_gap_ms
    );
    println!();

    // Generation and restart status
    if info.prior.is_clean() {
        println!(
            "  {GREEN}>{RESET} Generation {} {DIM}(previous run: clean){RESET}",
            info.generation
        );
    } else {
        println!(
            "  {YELLOW}>{RESET} Generation {} {YELLOW}(previous run: {}){RESET}",
            info.generation,
            describe_prior(info.prior)
        );
    }
    println!(
        "  {MAGENTA}>{RESET} Accepting pings on {BOLD}http://{}{RESET}",
        config.bind_addr
    );
    println!();
}

/// Log the same startup summary through tracing (lands in the JSON log file)
pub fn log_startup(info: &StartupInfo<'_>) {
    tracing::info!(
        version = VERSION,
        db_path = %info.config.db_path().display(),
        schema_version = info.schema_version,
        generation = info.generation,
        previous_run = %describe_prior(info.prior),
        "attentd starting"
    );
    tracing::info!("Ready. Listening on {}", info.config.bind_addr);
}
