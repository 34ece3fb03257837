use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use scribe::replay::{PageHost, ReplayReport, Replayer, ScriptNavigator, render_html};
use scribe::script::Script;
use scribe_engine::backend::{BackendError, NullCapture, RecorderBackends, StateBackend};
use scribe_engine::config::{ConfigLoader, ScribeConfig};
use scribe_engine::dom::DocumentSpec;
use scribe_engine::formatter::format_steps;
use scribe_engine::host::HostService;
use scribe_engine::protocol::{ContextId, Step};
use scribe_engine::store::{FileStateBackend, MemoryStateBackend};
use scribe_h::HeadlessHost;
use scribe_r::RemoteHost;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scribe", version, about = "Interaction recorder")]
struct Args {
    /// Configuration file (defaults to ./scribe.yaml, then ~/.scribe/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a scripted session and print the resulting step log
    Replay {
        script: PathBuf,

        /// Where screenshots come from
        #[arg(long, value_enum, default_value_t = CaptureMode::Null)]
        capture: CaptureMode,

        /// Launch the browser in visible mode (headless capture only)
        #[arg(long)]
        visible: bool,

        /// WebSocket port (remote capture only)
        #[arg(long, default_value_t = 9001)]
        port: u16,

        /// Persist session state to this JSON file instead of memory
        #[arg(long)]
        state: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the step log held in a persisted state file
    Show {
        state: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CaptureMode {
    /// No screenshots
    Null,
    /// Headless Chromium via CDP
    Headless,
    /// Browser extension via WebSocket
    Remote,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

struct HeadlessPages(Arc<HeadlessHost>);

#[async_trait]
impl PageHost for HeadlessPages {
    async fn show(&self, spec: &DocumentSpec) -> Result<(), BackendError> {
        self.0.set_content(&render_html(spec)).await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the step log
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ConfigLoader::load_from(path).await,
        None => ConfigLoader::load_default().await,
    }
    .context("Failed to load configuration")?;

    match args.command {
        Command::Replay {
            script,
            capture,
            visible,
            port,
            state,
            format,
        } => {
            let script = Script::load(&script)
                .await
                .with_context(|| format!("Failed to load {}", script.display()))?;
            let report = replay(config, &script, capture, visible, port, state).await?;
            print_steps(&report.steps, format)?;
            if report.unpersisted > 0 {
                anyhow::bail!("{} step(s) were not persisted", report.unpersisted);
            }
        }
        Command::Show { state, format } => {
            let persisted = FileStateBackend::new(state).load().await?;
            info!(recording = persisted.is_recording, "Loaded session state");
            print_steps(&persisted.steps, format)?;
        }
    }
    Ok(())
}

async fn replay(
    config: ScribeConfig,
    script: &Script,
    capture: CaptureMode,
    visible: bool,
    port: u16,
    state_path: Option<PathBuf>,
) -> anyhow::Result<ReplayReport> {
    let state: Arc<dyn StateBackend> = match state_path.as_deref() {
        Some(path) => Arc::new(file_state(path).await?),
        None => Arc::new(MemoryStateBackend::default()),
    };

    match capture {
        CaptureMode::Null => {
            let navigator = Arc::new(ScriptNavigator::default());
            let host = Arc::new(HostService::new(
                state.clone(),
                Arc::new(NullCapture),
                navigator.clone(),
            ));
            let context = Arc::new(host.context(ContextId(script.context)));
            let backends = RecorderBackends {
                capture: context.clone(),
                state,
                navigator: context.clone(),
                bridge: context,
            };
            let report = Replayer::new(config, backends).run(script).await?;
            info!(navigations = navigator.targets().len(), "Deferred navigations");
            Ok(report)
        }
        CaptureMode::Headless => {
            let host = Arc::new(HeadlessHost::launch(visible).await?);
            let backends = RecorderBackends {
                capture: host.clone(),
                state,
                navigator: host.clone(),
                bridge: host.clone(),
            };
            let result = Replayer::new(config, backends)
                .with_pages(Arc::new(HeadlessPages(host.clone())))
                .run(script)
                .await;
            host.close().await?;
            result
        }
        CaptureMode::Remote => {
            let host = Arc::new(RemoteHost::launch(port).await?);
            info!(
                "Connect the browser extension to ws://{}",
                host.local_addr()
            );
            let backends = RecorderBackends {
                capture: host.clone(),
                state,
                navigator: host.clone(),
                bridge: host,
            };
            Replayer::new(config, backends).run(script).await
        }
    }
}

/// A fresh file backend, so earlier sessions in the same file do not leak in.
async fn file_state(path: &Path) -> anyhow::Result<FileStateBackend> {
    let backend = FileStateBackend::new(path);
    backend.save(&Default::default()).await?;
    Ok(backend)
}

fn print_steps(steps: &[Step], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", format_steps(steps)),
        OutputFormat::Json => {
            let mut ordered = steps.to_vec();
            ordered.sort_by_key(|s| s.sequence);
            println!("{}", serde_json::to_string_pretty(&ordered)?);
        }
    }
    Ok(())
}
