use crate::config::{ClientConfig, Overrides};
use crate::model::{ScrapeParams, ValidationConfig, BETWEEN_DELAY_PRESETS, RETRY_DELAY_PRESETS};
use crate::orchestrator::{
    run_controller, watch, ConsoleSettings, Session, SessionEvent, Trigger, UiCommand,
    WatchUntil, CONSOLE_HELP,
};
use crate::storage::{csv_name_for, download_export, VALIDATED_CSV};
use crate::text_summary::{build_status_lines, business_line_lines, cache_line, json_line};
use crate::backend::ExportKind;
use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::debug;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "leadctl",
    version,
    about = "Drive and watch a company lead collection backend"
)]
pub struct Cli {
    /// Base URL of the backend API
    #[arg(long, env = "LEADCTL_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Status poll cadence [default: 1s]
    #[arg(long, global = true)]
    pub poll_interval: Option<humantime::Duration>,

    /// Per-request timeout [default: 10s]
    #[arg(long, global = true)]
    pub request_timeout: Option<humantime::Duration>,

    /// JSON config file (defaults to the per-user config dir when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print one JSON object per update instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Poll the backend and print the pipeline state until Ctrl-C
    Watch {
        /// Exit once no phase is running
        #[arg(long)]
        until_idle: bool,
    },
    /// Start company discovery
    Scrape {
        #[command(flatten)]
        params: ScrapeArgs,
        /// Keep polling until the scrape finishes
        #[arg(long)]
        follow: bool,
    },
    /// Start contact enrichment of the current results
    Enrich {
        #[command(flatten)]
        key: ApiKeyArgs,
        /// Keep polling until enrichment finishes
        #[arg(long)]
        follow: bool,
    },
    /// Start third-party validation of the current results
    Validate {
        #[command(flatten)]
        backoff: BackoffArgs,
        /// Keep polling until validation finishes
        #[arg(long)]
        follow: bool,
    },
    /// Clear the backend enrichment cache
    ClearCache,
    /// Show backend cache size
    CacheStats,
    /// List known business line codes
    BusinessLines,
    /// Save a backend export to a local file
    Download {
        /// Results file name on the backend
        #[arg(default_value = "companies_leads.json")]
        filename: String,
        /// Fetch the CSV export instead of JSON
        #[arg(long)]
        csv: bool,
        /// Fetch the validated CSV export
        #[arg(long, conflicts_with_all = ["csv", "filename"])]
        validated: bool,
        /// Local destination (defaults to the export name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Interactive console: type commands while the pipeline is polled
    Console {
        #[command(flatten)]
        params: ScrapeArgs,
        #[command(flatten)]
        key: ApiKeyArgs,
        #[command(flatten)]
        backoff: BackoffArgs,
    },
}

#[derive(Debug, Args, Clone)]
pub struct ScrapeArgs {
    /// Main business line (TOL 2008 code)
    #[arg(long, default_value = "6201")]
    pub business_line: String,

    /// Registered municipality
    #[arg(long, default_value = "Kuopio")]
    pub location: String,

    /// Company form
    #[arg(long, default_value = "OY")]
    pub company_form: String,

    /// Maximum number of companies to collect
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub max_companies: u32,

    /// Backend-side output file
    #[arg(long, default_value = "companies_leads.json")]
    pub output_file: String,
}

impl From<ScrapeArgs> for ScrapeParams {
    fn from(a: ScrapeArgs) -> Self {
        ScrapeParams {
            main_business_line: a.business_line,
            location: a.location,
            company_form: a.company_form,
            max_companies: a.max_companies,
            output_file: a.output_file,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct ApiKeyArgs {
    /// OpenAI API key used by the enrichment agent
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct BackoffArgs {
    /// Seconds to wait before retrying a rate-limited lookup
    #[arg(long, default_value_t = 5, value_parser = parse_retry_delay)]
    pub retry_delay: u32,

    /// Seconds to wait between lookups
    #[arg(long, default_value_t = 4, value_parser = parse_between_delay)]
    pub between_delay: u32,
}

impl BackoffArgs {
    fn config(&self) -> Result<ValidationConfig> {
        Ok(ValidationConfig::new(self.retry_delay, self.between_delay)?)
    }
}

fn parse_preset(s: &str, presets: &[u32]) -> Result<u32, String> {
    let v: u32 = s.parse().map_err(|e| format!("{e}"))?;
    if presets.contains(&v) {
        Ok(v)
    } else {
        Err(format!("must be one of {presets:?}"))
    }
}

fn parse_retry_delay(s: &str) -> Result<u32, String> {
    parse_preset(s, &RETRY_DELAY_PRESETS)
}

fn parse_between_delay(s: &str) -> Result<u32, String> {
    parse_preset(s, &BETWEEN_DELAY_PRESETS)
}

/// Build the effective client configuration from CLI arguments.
pub fn build_config(args: &Cli) -> Result<ClientConfig> {
    ClientConfig::load(
        args.config.as_deref(),
        Overrides {
            base_url: args.base_url.clone(),
            poll_interval: args.poll_interval.map(Duration::from),
            request_timeout: args.request_timeout.map(Duration::from),
        },
    )
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    debug!(base_url = %cfg.base_url, poll_interval = ?cfg.poll_interval, "configuration resolved");
    let session = Session::new(&cfg)?;

    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let printer = tokio::spawn(print_events(event_rx, out_tx.clone(), args.json));

    let res = run_command(args, &session, &out_tx, event_tx).await;

    let _ = printer.await;
    drop(out_tx);
    let _ = out_handle.await;
    res
}

/// Render controller events as text or JSON lines.
async fn print_events(
    mut event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    out_tx: mpsc::UnboundedSender<OutputLine>,
    json: bool,
) {
    while let Some(ev) = event_rx.recv().await {
        match ev {
            SessionEvent::Update(p) if json => match json_line(&p, OffsetDateTime::now_utc()) {
                Ok(line) => {
                    let _ = out_tx.send(OutputLine::Stdout(line));
                }
                Err(e) => {
                    let _ = out_tx.send(OutputLine::Stderr(format!("encode update: {e:#}")));
                }
            },
            SessionEvent::Update(p) => {
                for line in build_status_lines(&p) {
                    let _ = out_tx.send(OutputLine::Stdout(line));
                }
                let _ = out_tx.send(OutputLine::Stdout(String::new()));
            }
            SessionEvent::Message(msg) if json => {
                let _ = out_tx.send(OutputLine::Stderr(msg));
            }
            SessionEvent::Message(msg) => {
                let _ = out_tx.send(OutputLine::Stdout(msg));
            }
            SessionEvent::Failed(msg) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("error: {msg}")));
            }
        }
    }
}

async fn run_command(
    args: Cli,
    session: &Session,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) -> Result<()> {
    let json = args.json;
    match args.command {
        Command::Watch { until_idle } => {
            let until = if until_idle {
                WatchUntil::AllIdle
            } else {
                WatchUntil::Interrupted
            };
            watch(session, until, event_tx).await
        }
        Command::Scrape { params, follow } => {
            let trigger = Trigger::Scrape(params.into());
            start_phase(session, trigger, follow, event_tx).await
        }
        Command::Enrich { key, follow } => {
            session.refresh().await?;
            let trigger = Trigger::Enrich {
                api_key: key.api_key.unwrap_or_default(),
            };
            start_phase(session, trigger, follow, event_tx).await
        }
        Command::Validate { backoff, follow } => {
            let config = backoff.config()?;
            session.refresh().await?;
            start_phase(session, Trigger::Validate(config), follow, event_tx).await
        }
        Command::ClearCache => {
            let cleared = session.clear_cache().await.context("clear cache")?;
            if json {
                let body = serde_json::json!({ "message": cleared.message, "stats": cleared.stats });
                let _ = out_tx.send(OutputLine::Stdout(body.to_string()));
            } else {
                let _ = out_tx.send(OutputLine::Stdout(cleared.message));
                if let Some(stats) = cleared.stats {
                    let _ = out_tx.send(OutputLine::Stdout(cache_line(&stats)));
                }
            }
            Ok(())
        }
        Command::CacheStats => {
            let stats = session
                .client()
                .cache_stats()
                .await
                .context("fetch cache stats")?;
            let line = if json {
                serde_json::to_string(&stats)?
            } else {
                cache_line(&stats)
            };
            let _ = out_tx.send(OutputLine::Stdout(line));
            Ok(())
        }
        Command::BusinessLines => {
            let lines = session
                .client()
                .business_lines()
                .await
                .context("fetch business lines")?;
            if json {
                let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string(&lines)?));
            } else {
                for line in business_line_lines(&lines) {
                    let _ = out_tx.send(OutputLine::Stdout(line));
                }
            }
            Ok(())
        }
        Command::Download {
            filename,
            csv,
            validated,
            output,
        } => {
            let (kind, name) = if validated {
                (ExportKind::Csv, VALIDATED_CSV.to_string())
            } else if csv {
                (ExportKind::Csv, csv_name_for(&filename))
            } else {
                (ExportKind::Json, filename)
            };
            let dest = output.unwrap_or_else(|| PathBuf::from(&name));
            let (path, size) = download_export(session.client(), kind, &name, &dest).await?;
            let _ = out_tx.send(OutputLine::Stderr(format!(
                "Saved: {} ({size} bytes)",
                path.display()
            )));
            Ok(())
        }
        Command::Console {
            params,
            key,
            backoff,
        } => {
            let settings = ConsoleSettings {
                scrape: params.into(),
                api_key: key.api_key,
                validation: backoff.config()?,
            };
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
            let _ = event_tx.send(SessionEvent::Message(CONSOLE_HELP.into()));
            let reader = tokio::spawn(read_commands(cmd_tx, event_tx.clone()));
            let res = run_controller(session, settings, event_tx, cmd_rx).await;
            reader.abort();
            res
        }
    }
}

/// Fire a trigger, report the acknowledgement, and optionally follow the phase.
async fn start_phase(
    session: &Session,
    trigger: Trigger,
    follow: bool,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) -> Result<()> {
    let phase = trigger.phase();
    let ack = session
        .trigger(&trigger)
        .await
        .with_context(|| format!("start {phase}"))?;
    let _ = event_tx.send(SessionEvent::Message(
        ack.message.unwrap_or_else(|| format!("{phase} started")),
    ));
    if follow {
        watch(session, WatchUntil::PhaseDone(phase), event_tx).await?;
    }
    Ok(())
}

/// Forward stdin lines to the controller as commands. EOF quits.
async fn read_commands(
    cmd_tx: mpsc::UnboundedSender<UiCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match line.parse::<UiCommand>() {
                Ok(cmd) => {
                    if cmd_tx.send(cmd).is_err() {
                        break;
                    }
                }
                Err(msg) => {
                    let _ = event_tx.send(SessionEvent::Failed(msg));
                }
            },
            Ok(None) => {
                let _ = cmd_tx.send(UiCommand::Quit);
                break;
            }
            Err(e) => {
                let _ = event_tx.send(SessionEvent::Failed(format!("read stdin: {e}")));
                let _ = cmd_tx.send(UiCommand::Quit);
                break;
            }
        }
    }
}
