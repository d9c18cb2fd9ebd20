use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle of one long-running loop.
/// - `request_shutdown()` でループに停止を伝える
/// - `join()` でループの終了を待てる
pub(crate) struct LoopHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Spawn `body` with a fresh shutdown channel.
    pub(crate) fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(body(shutdown_rx));
        Self {
            name,
            shutdown_tx,
            join,
        }
    }

    /// This does not cancel in-flight work; the loop stops at its next safe point.
    pub(crate) fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait until the loop has exited.
    pub(crate) async fn join(self) {
        match self.join.await {
            Ok(()) => tracing::info!(pipeline_loop = self.name, "loop stopped"),
            Err(e) => tracing::error!(pipeline_loop = self.name, error = %e, "loop terminated abnormally"),
        }
    }
}

/// Has shutdown been requested (or the sender dropped)?
pub(crate) fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Sleep for `delay` unless shutdown arrives first.
///
/// Returns `true` when the caller should stop.
pub(crate) async fn sleep_or_shutdown(
    shutdown: &mut watch::Receiver<bool>,
    delay: Duration,
) -> bool {
    let closed = tokio::select! {
        changed = shutdown.changed() => changed.is_err(),
        _ = tokio::time::sleep(delay) => false,
    };
    closed || *shutdown.borrow()
}
