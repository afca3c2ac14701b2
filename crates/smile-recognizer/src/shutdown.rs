use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use smile_core::wait::CancelToken;

static TERMINATE: AtomicBool = AtomicBool::new(false);

const WATCH_INTERVAL: Duration = Duration::from_millis(20);

#[cfg(unix)]
extern "C" fn on_terminate(_signal: nix::libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// Install the handlers and start forwarding to `token`. The handler only
/// flips a static flag; a watcher thread cancels the token.
pub fn install(token: &CancelToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

        let action = SigAction::new(SigHandler::Handler(on_terminate), SaFlags::SA_RESTART, SigSet::empty());
        for signal in [Signal::SIGTERM, Signal::SIGINT] {
            // SAFETY: the handler only stores to an atomic.
            unsafe { sigaction(signal, &action) }.map_err(std::io::Error::from)?;
        }
    }

    let token = token.clone();
    std::thread::Builder::new()
        .name("signal-watch".into())
        .spawn(move || loop {
            if TERMINATE.load(Ordering::SeqCst) {
                tracing::info!("termination requested");
                token.cancel();
                return;
            }
            std::thread::sleep(WATCH_INTERVAL);
        })?;
    Ok(())
}

/// Whether a termination signal has arrived.
pub fn requested() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}
