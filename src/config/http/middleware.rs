use {crate::Result, serde::Deserialize};

/// Selects which middleware the router installs.
///
/// ```toml
/// [http]
/// exclude = ["etag", "timeout"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMiddlewareConfig {
    Include(Vec<HttpMiddleware>),
    Exclude(Vec<HttpMiddleware>),
}

impl HttpMiddlewareConfig {
    pub fn is_enabled(&self, middleware: HttpMiddleware) -> bool {
        match self {
            HttpMiddlewareConfig::Include(list) => list.contains(&middleware),
            HttpMiddlewareConfig::Exclude(list) => !list.contains(&middleware),
        }
    }

    /// Checks that the selection is usable.
    ///
    /// The idempotency coordinator buffers request bodies on its own, so no
    /// pairing is required between entries today. A list that names the same
    /// middleware twice is rejected since it usually hides a typo.
    pub fn validate(&self) -> Result<()> {
        let list = match self {
            HttpMiddlewareConfig::Include(list) | HttpMiddlewareConfig::Exclude(list) => list,
        };
        for (i, middleware) in list.iter().enumerate() {
            if list[..i].contains(middleware) {
                return Err(crate::Error::config(format!(
                    "middleware {middleware:?} is listed more than once"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum HttpMiddleware {
    Idempotency,
    #[serde(rename = "etag")]
    ETag,
    MaxPayloadSize,
    RequestId,
    Logging,
    Liveness,
    Readiness,
    Timeout,
    CatchPanic,
}
