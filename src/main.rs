use clap::Parser;
use memguard::bytes::{format_bytes, ByteSize};
use memguard::config::MemguardConfig;
use memguard::session::{self, SessionResult};
use memguard::signals::SignalHandler;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Run a command (or watch a running process) and kill it when its PSS
/// memory usage exceeds a limit.
#[derive(Parser, Debug)]
#[command(name = "memguard", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "memguard.toml")]
    config: PathBuf,

    /// Memory limit, e.g. 512MiB or 2G (overrides config)
    #[arg(short, long)]
    limit: Option<ByteSize>,

    /// Watch an existing process instead of spawning a command
    #[arg(
        long,
        conflicts_with = "command",
        value_parser = clap::value_parser!(u32).range(1..=i32::MAX as i64)
    )]
    pid: Option<u32>,

    /// Name used in log lines instead of the pid (overrides config)
    #[arg(short, long)]
    name: Option<String>,

    /// Milliseconds between samples (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Seconds between status lines (overrides config)
    #[arg(long)]
    stats_secs: Option<u64>,

    /// Report breaches without killing the process
    #[arg(long)]
    alert_only: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (samples, status lines)
    #[arg(short, long)]
    verbose: bool,

    /// Only errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Command to run under the guard
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

/// Merge CLI overrides into the loaded config.
fn apply_overrides(cli: &Cli, config: &mut MemguardConfig) {
    if let Some(limit) = cli.limit {
        config.guard.limit = Some(limit);
    }
    if let Some(name) = &cli.name {
        config.guard.name = Some(name.clone());
    }
    if let Some(ms) = cli.interval_ms {
        config.guard.interval_ms = ms;
    }
    if let Some(secs) = cli.stats_secs {
        config.guard.stats_secs = secs;
    }
    if cli.alert_only {
        config.guard.alert_only = true;
    }
    if let Some((program, args)) = cli.command.split_first() {
        config.command.program = Some(program.clone());
        config.command.args = args.to_vec();
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "memguard=debug"
    } else if quiet {
        "memguard=error"
    } else {
        "memguard=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn print_settings(config: &MemguardConfig, limit: u64, pid: Option<u32>) {
    let guard = &config.guard;
    println!("limit:        {} ({} bytes)", format_bytes(limit), limit);
    println!("interval:     {} ms", guard.interval_ms);
    println!("status every: {} s", guard.stats_secs);
    println!("alert only:   {}", guard.alert_only);
    println!("kill group:   {}", guard.kill_group);
    if let Some(name) = &guard.name {
        println!("name:         {name}");
    }
    match (pid, &config.command.program) {
        (Some(pid), _) => println!("watch pid:    {pid}"),
        (None, Some(program)) => {
            println!("command:      {} {}", program, config.command.args.join(" "))
        }
        (None, None) => println!("command:      <none>"),
    }
}

async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let mut config = MemguardConfig::load(&cli.config)?;
    apply_overrides(&cli, &mut config);
    let limit = config.validate()?;

    if cli.dry_run {
        print_settings(&config, limit, cli.pid);
        return Ok(0);
    }

    let mut signals = SignalHandler::install()?;
    let shutdown = async move {
        let signal = signals.recv().await;
        tracing::info!(?signal, "shutdown signal received");
    };

    if let Some(pid) = cli.pid {
        let result = session::watch_pid(pid, &config.guard, limit, shutdown).await?;
        return Ok(if result.breached { 1 } else { 0 });
    }

    let result: SessionResult =
        session::run_session(&config.command, &config.guard, limit, shutdown).await?;
    Ok(result.shell_exit_code())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "memguard failed");
            2
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_command_after_separator() {
        let cli = Cli::parse_from(["memguard", "--limit", "64MiB", "--", "python3", "-m", "w"]);
        assert_eq!(cli.limit, Some(ByteSize(64 << 20)));
        assert_eq!(cli.command, vec!["python3", "-m", "w"]);
    }

    #[test]
    fn test_cli_rejects_bad_limit() {
        assert!(Cli::try_parse_from(["memguard", "--limit", "lots"]).is_err());
    }

    #[test]
    fn test_cli_rejects_pids_that_target_groups() {
        assert!(Cli::try_parse_from(["memguard", "--pid", "0"]).is_err());
        assert!(Cli::try_parse_from(["memguard", "--pid", "4294967295"]).is_err());
        let cli = Cli::parse_from(["memguard", "--pid", "2147483647"]);
        assert_eq!(cli.pid, Some(i32::MAX as u32));
    }

    #[test]
    fn test_cli_pid_conflicts_with_command() {
        assert!(Cli::try_parse_from(["memguard", "--pid", "1", "--", "true"]).is_err());
    }

    #[test]
    fn test_overrides_win_over_config() {
        let cli = Cli::parse_from([
            "memguard",
            "--limit",
            "1G",
            "--interval-ms",
            "50",
            "--stats-secs",
            "5",
            "--name",
            "job",
            "--alert-only",
            "--",
            "sleep",
            "1",
        ]);
        let mut config = MemguardConfig::default();
        config.guard.limit = Some(ByteSize(1));
        config.command.program = Some("other".to_string());

        apply_overrides(&cli, &mut config);
        assert_eq!(config.guard.limit, Some(ByteSize(1 << 30)));
        assert_eq!(config.guard.interval_ms, 50);
        assert_eq!(config.guard.stats_secs, 5);
        assert_eq!(config.guard.name.as_deref(), Some("job"));
        assert!(config.guard.alert_only);
        assert_eq!(config.command.program.as_deref(), Some("sleep"));
        assert_eq!(config.command.args, vec!["1"]);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let cli = Cli::parse_from(["memguard"]);
        let mut config = MemguardConfig::default();
        config.guard.interval_ms = 300;
        apply_overrides(&cli, &mut config);
        assert_eq!(config.guard.interval_ms, 300);
        assert!(config.command.program.is_none());
    }
}
