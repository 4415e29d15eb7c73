use std::env;
use std::future::Future;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug, info, warn};
use tokio::sync::mpsc;

use pomo::commands::ConsoleCommand;
use pomo::config::{self, AppConfig, ConfigSources};
use pomo::duration::format_duration;
use pomo::{NotifyInfo, SessionOutcome, SessionRegistry, User};

/// Conversation id used for notifications delivered to the console.
const CONSOLE_TITLE: &str = "console";

/// How long shutdown waits for cancelled sessions to deliver their notices.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// Lines buffered between the stdin thread and the console loop.
const LINE_BUFFER: usize = 16;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_run(ctx: RuntimeContext) -> Result<()> {
    handle_run(&ctx).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common)?;
    ctx.init_logging();
    debug!("config sources: {:?}", ctx.sources);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => async_run(ctx),
        Command::Config { command } => handle_config(&ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Pomo - per-user focus timer engine.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", env = "POMO_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Override the secrets file path
    #[arg(long, value_name = "PATH", env = "POMO_SECRETS", global = true)]
    secrets: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read start/stop commands from stdin and run sessions (default)
    Run,
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the resolved configuration with secrets masked
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug)]
struct RuntimeContext {
    common: CommonOpts,
    sources: ConfigSources,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let sources = ConfigSources::discover(common.config.clone(), common.secrets.clone())
            .context("resolving config paths")?;
        let config = AppConfig::load(&sources).context("loading configuration")?;
        Ok(Self {
            common,
            sources,
            config,
        })
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return;
        }

        let level = self.effective_log_level().to_string().to_lowercase();
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("pomo={level}")));

        // Library code logs through `log`; tracing-subscriber bridges it on init.
        if self.common.json || self.config.logging.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let disable_color = env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color),
                )
                .try_init()
                .ok();
        }
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            return LevelFilter::Trace;
        }
        if self.common.debug {
            return LevelFilter::Debug;
        }

        let configured = self
            .config
            .logging
            .level
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::Info);
        match self.common.verbose {
            0 => configured,
            1 => configured.max(LevelFilter::Debug),
            _ => LevelFilter::Trace,
        }
    }
}

async fn handle_run(ctx: &RuntimeContext) -> Result<()> {
    let limits = Limits::from_config(&ctx.config)?;

    let registry: SessionRegistry<String> = SessionRegistry::new();
    info!(
        "Ready (profile {}, default session {})",
        ctx.config.profile,
        format_duration(limits.default)
    );
    println!("{}", ConsoleCommand::HELP);

    let lines = spawn_line_reader(io::BufReader::new(io::stdin()))
        .context("starting stdin reader")?;
    let result = run_console(&registry, &limits, lines, interrupted()).await;

    let cancelled = registry.cancel_all();
    if cancelled > 0 {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    }
    info!("Shutdown complete");
    result
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}

/// Forward lines from `reader` over a channel from a dedicated OS thread.
///
/// A blocked read on this thread does not hold up runtime shutdown; the
/// thread is simply abandoned when the process exits.
fn spawn_line_reader<R>(reader: R) -> io::Result<mpsc::Receiver<io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Dispatch console lines until `quit`, end of input, or `shutdown` resolves.
async fn run_console<S>(
    registry: &SessionRegistry<String>,
    limits: &Limits,
    mut lines: mpsc::Receiver<io::Result<String>>,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            () = &mut shutdown => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        };
        let Some(line) = line else {
            debug!("End of input");
            return Ok(());
        };
        let line = line.context("reading stdin")?;

        match ConsoleCommand::parse(&line) {
            Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
            Ok(Some(command)) => dispatch(registry, limits, command),
            Ok(None) => {}
            Err(err) => println!("{err}"),
        }
    }
}

#[derive(Debug)]
struct Limits {
    default: Duration,
    max: Duration,
}

impl Limits {
    /// Timer bounds for the console driver. Chat credentials are not needed
    /// here, so their absence is only reported.
    fn from_config(config: &AppConfig) -> Result<Self> {
        if let Err(err) = config.validate_credentials() {
            warn!("{err}");
        }
        Ok(Self {
            default: config.timer.default_duration()?,
            max: config.timer.max_duration()?,
        })
    }
}

fn dispatch(registry: &SessionRegistry<String>, limits: &Limits, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Start { user, duration } => {
            let duration = duration.unwrap_or(limits.default);
            if duration > limits.max {
                println!(
                    "{} is longer than the {} limit.",
                    format_duration(duration),
                    format_duration(limits.max)
                );
                return;
            }

            let notify = NotifyInfo::new(CONSOLE_TITLE, User::new(user.as_str(), user.as_str()));
            let key = notify.key().to_string();
            if registry.create_if_absent(key, duration, deliver, notify) {
                println!("Started a {} pomodoro for {user}.", format_duration(duration));
            } else {
                println!("{user} already has a pomodoro running.");
            }
        }
        ConsoleCommand::Stop { user } => {
            if !registry.remove_if_exists(user.as_str()) {
                println!("{user} has no pomodoro running.");
            }
        }
        ConsoleCommand::Status => println!("{} active session(s)", registry.count()),
        ConsoleCommand::Help => println!("{}", ConsoleCommand::HELP),
        ConsoleCommand::Quit => {}
    }
}

/// Notification sink for the console.
fn deliver(notify: NotifyInfo, outcome: SessionOutcome) {
    info!("Session for user {} {}", notify.user.id, outcome);
    println!("[{}] {}", notify.title_id, notify.message(outcome));
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if let Err(err) = ctx.config.validate() {
                warn!("{err}");
            }
            print!("{}", ctx.config.redacted().to_toml()?);
            Ok(())
        }
        ConfigCommand::Init { force } => {
            let Some(path) = ctx.sources.config_file.as_deref() else {
                bail!("no config file path resolved");
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config::write_default(path)
                .with_context(|| format!("writing config file to {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn limits() -> Limits {
        Limits {
            default: Duration::from_secs(60),
            max: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_limits_do_not_require_credentials() {
        let config = AppConfig::default();
        assert!(config.validate_credentials().is_err());

        let limits = Limits::from_config(&config).unwrap();
        assert_eq!(limits.default, Duration::from_secs(25 * 60));
        assert_eq!(limits.max, Duration::from_secs(4 * 3600));
    }

    #[test]
    fn test_limits_reject_bad_duration() {
        let mut config = AppConfig::default();
        config.timer.max_duration = "forever".into();
        assert!(Limits::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_line_reader_forwards_lines_then_closes() {
        let mut lines = spawn_line_reader(Cursor::new("start ada\nstatus\n")).unwrap();

        assert_eq!(lines.recv().await.unwrap().unwrap(), "start ada");
        assert_eq!(lines.recv().await.unwrap().unwrap(), "status");
        assert!(lines.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_console_returns_on_shutdown_while_input_stays_open() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        tx.send(Ok("start ada 10m".to_string())).await.unwrap();

        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            run_console(&registry, &limits(), rx, shutdown),
        )
        .await
        .expect("console loop ignored shutdown");

        result.unwrap();
        assert!(registry.contains("ada"));
        assert_eq!(registry.cancel_all(), 1);
        // The sender is still open, as with a terminal nobody types into.
        drop(tx);
    }

    #[tokio::test]
    async fn test_console_stops_at_quit() {
        let registry = SessionRegistry::new();
        let lines = spawn_line_reader(Cursor::new("start ada\nquit\nstart bob\n")).unwrap();

        run_console(&registry, &limits(), lines, std::future::pending())
            .await
            .unwrap();

        assert!(registry.contains("ada"));
        assert!(!registry.contains("bob"));
        registry.cancel_all();
    }

    #[tokio::test]
    async fn test_console_rejects_over_limit_start() {
        let registry = SessionRegistry::new();
        let lines = spawn_line_reader(Cursor::new("start ada 2h\n")).unwrap();

        run_console(&registry, &limits(), lines, std::future::pending())
            .await
            .unwrap();

        assert_eq!(registry.count(), 0);
    }
}
