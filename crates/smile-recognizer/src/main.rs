use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use smile_core::config::AppConfig;
use smile_core::lifecycle;
use smile_core::store::FileStore;
use smile_core::wait::{CancelToken, Clock, SystemClock};
use smile_ipc::open_publisher;
use smile_recognizer::engine::{self, EngineSettings, RecognitionEngine, Verdict};
use smile_recognizer::{enroll, shutdown, vision, Gallery};

#[derive(Parser)]
#[command(name = "smile-recognizer", about = "Smile2Unlock face recognizer")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Recognize)]
    mode: Mode,

    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// User to enroll in register mode
    #[arg(long, required_if_eq("mode", "register"))]
    username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Match faces against the gallery and report the verdict
    Recognize,
    /// Report as soon as a face is in front of the camera
    Warmup,
    /// Capture samples for a new user
    Register,
}

fn main() -> Result<ExitCode> {
    lifecycle::init_tracing();
    let cli = Cli::parse();
    lifecycle::log_startup("recognizer");

    let config = AppConfig::load_or_default(cli.config.as_deref());
    let stop = CancelToken::new();
    shutdown::install(&stop).context("failed to install signal handlers")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let code = match cli.mode {
        Mode::Recognize | Mode::Warmup => capture(cli.mode, &config, clock, stop)?,
        Mode::Register => {
            let username = cli.username.as_deref().unwrap_or_default();
            register(username, &config, clock.as_ref(), &stop)?
        }
    };

    if shutdown::requested() {
        tracing::info!("exiting on termination signal");
    }
    lifecycle::log_shutdown("recognizer");
    Ok(code)
}

fn capture(mode: Mode, config: &AppConfig, clock: Arc<dyn Clock>, stop: CancelToken) -> Result<ExitCode> {
    let mut publisher = open_publisher(&config.channel).context("failed to open status channel")?;

    let (backend, gallery) = match prepare(mode, config) {
        Ok(parts) => parts,
        Err(e) => {
            engine::publish_fault(publisher.as_mut());
            publisher.shutdown();
            return Err(e);
        }
    };

    let mut engine = RecognitionEngine::new(
        EngineSettings::from(&config.recognition),
        gallery,
        backend,
        publisher,
        clock,
        stop,
    );
    let verdict = match mode {
        Mode::Warmup => engine.warmup(),
        _ => engine.recognize(),
    };
    engine.finish();

    tracing::info!(?verdict, "capture finished");
    Ok(match verdict {
        Verdict::Success(_) | Verdict::FaceDetected | Verdict::Stopped => ExitCode::SUCCESS,
        Verdict::Failed => ExitCode::from(1),
        Verdict::Error => ExitCode::from(2),
    })
}

/// Everything the capture loop needs besides the channel.
fn prepare(mode: Mode, config: &AppConfig) -> Result<(vision::Backend, Gallery)> {
    let backend = vision::open_backend(&config.recognition).context("vision backend unavailable")?;
    let gallery = match mode {
        Mode::Recognize => Gallery::load(&config.recognition.gallery_dir).context("failed to load face gallery")?,
        _ => Gallery::default(),
    };
    Ok((backend, gallery))
}

fn register(username: &str, config: &AppConfig, clock: &dyn Clock, stop: &CancelToken) -> Result<ExitCode> {
    let backend = vision::open_backend(&config.recognition).context("vision backend unavailable")?;
    let written = enroll::enroll(
        username,
        &config.recognition.gallery_dir,
        backend,
        &EngineSettings::from(&config.recognition),
        clock,
        stop,
    )
    .with_context(|| format!("enrollment of {username} failed"))?;

    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let install_dir = exe.parent().context("own executable has no parent directory")?;
    let store = FileStore::open(config.store.path.clone());
    enroll::register_install_dir(&store, install_dir).context("failed to record install directory")?;

    println!("enrolled {username}: {} samples", written.len());
    Ok(ExitCode::SUCCESS)
}
