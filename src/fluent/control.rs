//! Panic recovery.

use super::router::FluentRouter;
use crate::{ErrorResponse, HttpMiddleware};

use {
    axum::{
        Json,
        response::{IntoResponse, Response},
    },
    http::StatusCode,
    tower_http::catch_panic::CatchPanicLayer,
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Turns handler panics into `500 Internal Server Error`.
    ///
    /// The panic message is logged and, when a channel was registered with
    /// [`FluentRouter::with_panic_notification_channel`], forwarded there.
    /// Unwinding drops the request future, so an idempotency marker held by
    /// the panicking request is released and nothing is cached for its key.
    ///
    /// This is the outermost layer installed by `setup_middleware()`.
    #[must_use]
    pub fn setup_catch_panic(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::CatchPanic) {
            return self;
        }

        let panic_channel = self.panic_channel.clone();
        self.inner = self.inner.layer(CatchPanicLayer::custom(
            move |err: Box<dyn std::any::Any + Send + 'static>| -> Response {
                let msg = if let Some(s) = err.downcast_ref::<String>() {
                    format!("Service panicked: {s}")
                } else if let Some(s) = err.downcast_ref::<&str>() {
                    format!("Service panicked: {s}")
                } else {
                    "Service panicked with a non-string payload".to_string()
                };

                tracing::error!("{msg}");
                if let Some(ch) = &panic_channel {
                    ch.try_send(msg).ok();
                }

                let body = ErrorResponse::new("INTERNAL_ERROR", "Internal Server Error");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            },
        ));
        self
    }
}
