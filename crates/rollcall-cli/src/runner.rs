use anyhow::{bail, Context, Result};
use rollcall_core::CancelToken;
use std::future::Future;
use tokio::sync::oneshot;

/// Run a blocking session on a dedicated OS thread until it finishes or
/// Ctrl-C is pressed.
///
/// The first Ctrl-C only cancels the token; the session still runs to the end
/// of its current frame and releases the camera before this returns. A second
/// Ctrl-C gives up on a session stuck inside a capture and returns an error.
pub async fn run_until_interrupted<T, F>(name: &str, session: F) -> Result<T>
where
    F: FnOnce(CancelToken) -> T + Send + 'static,
    T: Send + 'static,
{
    run_with_interrupts(name, session, tokio::signal::ctrl_c).await
}

async fn run_with_interrupts<T, F, I, Fut>(name: &str, session: F, mut interrupt: I) -> Result<T>
where
    F: FnOnce(CancelToken) -> T + Send + 'static,
    T: Send + 'static,
    I: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let (reply_tx, mut reply_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            tracing::debug!("session thread started");
            let _ = reply_tx.send(session(token));
        })
        .with_context(|| format!("failed to spawn {name} thread"))?;

    tokio::select! {
        result = &mut reply_rx => return result.context("session thread exited"),
        signal = interrupt() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::info!("interrupt received, stopping session");
            cancel.cancel();
        }
    }

    tokio::select! {
        result = &mut reply_rx => result.context("session thread exited"),
        signal = interrupt() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::warn!(thread = name, "second interrupt, abandoning session");
            bail!("{name} did not stop after the first interrupt")
        }
    }
}
