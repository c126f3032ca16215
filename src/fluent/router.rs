//! Core FluentRouter struct and initialization methods.

use {
    super::shutdown::{ShutdownNotifier, ShutdownPhase},
    crate::{Config, HttpMiddleware, IdempotencyStore, Result},
    axum::Router,
    std::sync::Arc,
    tokio::sync::broadcast,
    tokio_util::{sync::CancellationToken, task::AbortOnDropHandle},
};

/// Fluent builder for `axum::Router` with configuration-driven middleware.
///
/// Create instances with [`FluentRouter::without_state`] or
/// [`FluentRouter::with_state`], add routes, then call
/// [`FluentRouter::setup_middleware`] to install the configured stack.
/// Routing calls are forwarded to the wrapped `axum::Router`.
///
/// ```rust,no_run
/// use supplygraph_edge::{Config, FluentRouter};
/// use axum::routing::post;
///
/// # async fn example() -> supplygraph_edge::Result<()> {
/// FluentRouter::without_state(Config::default())?
///     .route("/api/widgets", post(|| async { "created" }))
///     .setup_middleware()
///     .await?
///     .start()
///     .await
/// # }
/// ```
pub struct FluentRouter<State = ()> {
    pub(crate) config: Config,
    pub(crate) state: State,
    pub(crate) inner: Router<State>,
    pub(crate) idempotency_store: Option<Arc<dyn IdempotencyStore>>,
    pub(crate) sweeper_handle: Option<AbortOnDropHandle<()>>,
    pub(crate) panic_channel: Option<tokio::sync::mpsc::Sender<String>>,
    pub(crate) shutdown_notifier: ShutdownNotifier,
}

impl FluentRouter {
    /// Creates a new `FluentRouter` without application state.
    pub fn without_state(config: Config) -> Result<FluentRouter<()>> {
        FluentRouter::<()>::with_state(config, ())
    }
}

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Creates a new `FluentRouter` after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when any section fails validation.
    pub fn with_state<S: Clone + Send + Sync + 'static>(
        config: Config,
        state: S,
    ) -> Result<FluentRouter<S>> {
        config.validate()?;

        Ok(FluentRouter {
            config,
            state,
            inner: Router::new(),
            idempotency_store: None,
            sweeper_handle: None,
            panic_channel: None,
            shutdown_notifier: ShutdownNotifier::default(),
        })
    }

    /// The validated configuration this router was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown notifier shared with the server started by [`FluentRouter::start`].
    pub fn shutdown_notifier(&self) -> &ShutdownNotifier {
        &self.shutdown_notifier
    }

    /// Token cancelled when shutdown is initiated.
    ///
    /// ```rust
    /// # use supplygraph_edge::{Config, FluentRouter};
    /// # fn example() -> supplygraph_edge::Result<()> {
    /// let router = FluentRouter::without_state(Config::default())?;
    /// assert!(!router.cancellation_token().is_cancelled());
    /// # Ok(())
    /// # }
    /// ```
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown_notifier.cancellation_token()
    }

    pub fn subscribe_to_shutdown(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.shutdown_notifier.subscribe()
    }

    /// Returns true if no middleware config is specified (all enabled by default),
    /// or if the middleware is explicitly included or not excluded.
    pub(crate) fn is_middleware_enabled(&self, middleware: HttpMiddleware) -> bool {
        self.config
            .http
            .middleware
            .as_ref()
            .map(|config| config.is_enabled(middleware))
            .unwrap_or(true)
    }

    /// Registers a channel that receives the message of every panic caught
    /// by the panic handler.
    ///
    /// ```rust,no_run
    /// # use supplygraph_edge::{Config, FluentRouter};
    /// # async fn example() -> supplygraph_edge::Result<()> {
    /// let (tx, mut rx) = tokio::sync::mpsc::channel(100);
    /// let router = FluentRouter::without_state(Config::default())?
    ///     .with_panic_notification_channel(tx);
    ///
    /// tokio::spawn(async move {
    ///     while let Some(msg) = rx.recv().await {
    ///         eprintln!("Panic caught: {msg}");
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn with_panic_notification_channel(self, ch: tokio::sync::mpsc::Sender<String>) -> Self {
        Self {
            panic_channel: Some(ch),
            ..self
        }
    }

    /// Uses `store` instead of creating an in-memory store when the
    /// idempotency middleware is set up.
    ///
    /// Injecting a store lets tests and embedding applications inspect or
    /// pre-populate the coordinator's state.
    #[must_use]
    pub fn with_idempotency_store(self, store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            idempotency_store: Some(store),
            ..self
        }
    }
}
