//! Shutdown notifications.
//!
//! [`FluentRouter::start`](crate::FluentRouter::start) turns SIGTERM or
//! Ctrl-C into a sequence of [`ShutdownPhase`] events. Background work owned
//! by the router, such as the idempotency sweeper, listens on the
//! [`CancellationToken`] which fires together with [`ShutdownPhase::Initiated`].
//!
//! ```rust,no_run
//! use supplygraph_edge::{Config, FluentRouter, ShutdownPhase};
//!
//! # async fn example() -> supplygraph_edge::Result<()> {
//! let router = FluentRouter::without_state(Config::default())?;
//! let mut phases = router.subscribe_to_shutdown();
//!
//! tokio::spawn(async move {
//!     while let Ok(phase) = phases.recv().await {
//!         if let ShutdownPhase::GracePeriodStarted { timeout } = phase {
//!             tracing::info!("Draining requests for {}s", timeout.as_secs());
//!         }
//!     }
//! });
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Stages of a graceful shutdown, emitted in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// A signal arrived. New connections are refused and the cancellation
    /// token is triggered.
    Initiated,

    /// In-flight requests are draining for at most `timeout`.
    GracePeriodStarted { timeout: Duration },

    /// The grace period ran out and remaining requests are abandoned.
    GracePeriodEnded,
}

/// Broadcasts [`ShutdownPhase`] events and owns the shared cancellation token.
///
/// Clones share the same channel and token.
#[derive(Clone)]
pub struct ShutdownNotifier {
    sender: broadcast::Sender<ShutdownPhase>,
    cancel_token: CancellationToken,
}

impl ShutdownNotifier {
    /// `capacity` is the number of unread phases buffered per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Subscribers only see phases emitted after they subscribed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Sends `phase` to every subscriber and returns how many received it.
    /// Emitting [`ShutdownPhase::Initiated`] also cancels the token.
    pub(crate) fn emit(&self, phase: ShutdownPhase) -> usize {
        if phase == ShutdownPhase::Initiated {
            self.cancel_token.cancel();
        }
        self.sender.send(phase).unwrap_or(0)
    }
}

impl Default for ShutdownNotifier {
    fn default() -> Self {
        Self::new(16)
    }
}

impl std::fmt::Debug for ShutdownNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownNotifier")
            .field("subscribers", &self.sender.receiver_count())
            .field("initiated", &self.is_shutdown_initiated())
            .finish()
    }
}

/// Resolves once Ctrl-C or SIGTERM arrives, after emitting
/// [`ShutdownPhase::Initiated`] and [`ShutdownPhase::GracePeriodStarted`].
pub(crate) async fn wait_for_signal(timeout: Duration, notifier: ShutdownNotifier) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    notifier.emit(ShutdownPhase::Initiated);
    notifier.emit(ShutdownPhase::GracePeriodStarted { timeout });
    tracing::info!(
        timeout_secs = timeout.as_secs(),
        "Shutting down, draining in-flight requests"
    );
}
