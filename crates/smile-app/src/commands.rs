use std::io::BufRead;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use smile_auth::{secrets, AuthError, CredentialOrchestrator};
use smile_core::config::AppConfig;
use smile_core::store::{keys, parse_bool, ConfigStore, FileStore};
use smile_core::wait::{BoundedWait, SystemClock, WaitOutcome};
use smile_core::StatusMessage;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Entries `config set` may change.
const EDITABLE: [&str; 3] = [keys::PATH, keys::AUTO_START, keys::WARMUP];
const TOGGLES: [&str; 2] = [keys::AUTO_START, keys::WARMUP];
/// Entries only `set-password` writes; never printed.
const SECRET: [&str; 3] = [keys::PASSWORD, keys::KEY, keys::IV];

const LISTEN_POLL: Duration = Duration::from_millis(100);

fn open_store(config: &AppConfig) -> FileStore {
    FileStore::open(config.store.path.clone())
}

enum Outcome {
    Ready(Option<String>),
    Failed(AuthError),
}

pub fn authenticate(config: &AppConfig, on_show: bool) -> Result<()> {
    let store: Arc<dyn ConfigStore> = Arc::new(open_store(config));
    if on_show && !store.get_bool(keys::AUTO_START, false)? {
        println!("auto_start is off; not starting recognition");
        return Ok(());
    }
    if !secrets::has_password(store.as_ref())? {
        bail!("no password enrolled; run `smile2unlock set-password` first");
    }

    info!(on_show, config = ?config.source, "starting face logon");
    let orchestrator = CredentialOrchestrator::new(config, store);
    let (tx, rx) = mpsc::channel();
    let tx_failed = tx.clone();
    let started = orchestrator.begin(
        move |user| {
            let _ = tx.send(Outcome::Ready(user));
        },
        move |err| {
            let _ = tx_failed.send(Outcome::Failed(err));
        },
    );
    if !started {
        bail!("recognition could not be started");
    }

    let outcome = rx.recv().context("recognition worker exited without a verdict")?;
    orchestrator.join();
    match outcome {
        Outcome::Ready(user) => {
            let credential = orchestrator
                .take_credential()
                .context("credential field empty after success")?;
            let user = user.unwrap_or_else(|| "<unknown>".into());
            info!(%user, "logon credential released");
            println!("recognized {user}; credential ready ({} chars)", credential.chars().count());
            Ok(())
        }
        Outcome::Failed(err) => {
            warn!(error = %err, state = ?orchestrator.state(), "face logon failed");
            Err(anyhow!(err)).context("authentication failed")
        }
    }
}

pub fn set_password(config: &AppConfig, from_stdin: bool) -> Result<()> {
    let (first, second) = if from_stdin {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        let mut next = || -> Result<Zeroizing<String>> {
            let line = lines.next().context("expected two lines on stdin")??;
            Ok(Zeroizing::new(line))
        };
        (next()?, next()?)
    } else {
        (
            Zeroizing::new(rpassword::prompt_password("New logon password: ")?),
            Zeroizing::new(rpassword::prompt_password("Confirm password: ")?),
        )
    };

    if first.is_empty() {
        bail!("password cannot be empty");
    }
    if *first != *second {
        bail!("passwords do not match");
    }

    let store = open_store(config);
    secrets::store_password(&store, &first)?;
    info!(store = %store.path().display(), "logon password replaced");
    println!("Password saved to {}", store.path().display());
    Ok(())
}

pub fn listen(config: &AppConfig, count: Option<usize>, timeout_secs: Option<u64>) -> Result<()> {
    let mut subscriber = smile_ipc::open_subscriber(&config.channel).context("failed to open status channel")?;
    println!("listening on {}", config.channel.address());

    let clock = SystemClock::new();
    let mut wait = BoundedWait::new(&clock, LISTEN_POLL);
    let mut deadline = None;
    if let Some(secs) = timeout_secs {
        wait = wait.timeout(Duration::from_secs(secs));
        deadline = Instant::now().checked_add(Duration::from_secs(secs));
    }
    info!(address = %config.channel.address(), ?count, ?timeout_secs, "listening for status messages");

    let mut seen = 0usize;
    let outcome = wait.run(|slice| -> Result<Option<()>> {
        while let Some(message) = subscriber.try_receive(slice)? {
            println!("{}", format_message(&message));
            seen += 1;
            if count.is_some_and(|n| seen >= n) {
                return Ok(Some(()));
            }
            // A steady stream must not hold us past the deadline.
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
        }
        Ok(None)
    })?;
    subscriber.shutdown();

    if matches!(outcome, WaitOutcome::TimedOut) {
        println!("({seen} messages)");
    }
    Ok(())
}

fn format_message(message: &StatusMessage) -> String {
    let when = i64::try_from(message.timestamp_ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| message.timestamp_ms.to_string());
    match message.username() {
        Some(user) => format!("{when}\t{}\t{user}", message.status),
        None => format!("{when}\t{}", message.status),
    }
}

pub fn config_show(config: &AppConfig) -> Result<()> {
    let store = open_store(config);
    for key in EDITABLE.iter().chain(SECRET.iter()) {
        println!("{key}\t{}", describe(&store, key)?);
    }
    Ok(())
}

pub fn config_get(config: &AppConfig, key: &str) -> Result<()> {
    if !EDITABLE.contains(&key) && !SECRET.contains(&key) {
        bail!("unknown key {key:?}");
    }
    println!("{}", describe(&open_store(config), key)?);
    Ok(())
}

fn check_editable(key: &str) -> Result<()> {
    if SECRET.contains(&key) {
        bail!("{key} is managed by `smile2unlock set-password`");
    }
    if !EDITABLE.contains(&key) {
        bail!("unknown key {key:?}");
    }
    Ok(())
}

pub fn config_set(config: &AppConfig, key: &str, value: &str) -> Result<()> {
    check_editable(key)?;
    if TOGGLES.contains(&key) && parse_bool(value).is_none() {
        bail!("{key} expects true/false, got {value:?}");
    }
    open_store(config).set(key, value)?;
    info!(key, value, "store entry updated");
    println!("{key} = {value}");
    Ok(())
}

pub fn config_unset(config: &AppConfig, key: &str) -> Result<()> {
    check_editable(key)?;
    open_store(config).remove(key)?;
    info!(key, "store entry removed");
    println!("{key} removed");
    Ok(())
}

fn describe(store: &dyn ConfigStore, key: &str) -> Result<String> {
    let value = store.get(key)?;
    Ok(match value {
        None => "<unset>".into(),
        Some(_) if SECRET.contains(&key) => "<set>".into(),
        Some(v) => v,
    })
}
