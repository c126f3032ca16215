use {
    crate::{Error, Result},
    serde::Deserialize,
};

/// Configuration of the ETag response tagger.
///
/// ```toml
/// [http.etag]
/// cache_control = "private, no-cache"
/// tag_length = 16
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct HttpETagConfig {
    /// Value of the `Cache-Control` header set on tagged and 304 responses.
    #[serde(default = "HttpETagConfig::default_cache_control")]
    pub cache_control: String,

    /// Number of hex characters of the SHA-256 digest kept in the tag.
    #[serde(default = "HttpETagConfig::default_tag_length")]
    pub tag_length: usize,
}

impl HttpETagConfig {
    fn default_cache_control() -> String {
        "private, no-cache".into()
    }

    fn default_tag_length() -> usize {
        16
    }

    pub fn with_cache_control(mut self, value: &str) -> Self {
        self.cache_control = value.into();
        self
    }

    pub fn with_tag_length(mut self, len: usize) -> Self {
        self.tag_length = len;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=64).contains(&self.tag_length) {
            return Err(Error::config(format!(
                "[http.etag] tag_length must be between 1 and 64, got {}",
                self.tag_length
            )));
        }
        if http::HeaderValue::from_str(&self.cache_control).is_err() {
            return Err(Error::config(
                "[http.etag] cache_control is not a valid header value",
            ));
        }
        Ok(())
    }
}

impl Default for HttpETagConfig {
    fn default() -> Self {
        Self {
            cache_control: Self::default_cache_control(),
            tag_length: Self::default_tag_length(),
        }
    }
}
