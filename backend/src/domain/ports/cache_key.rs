//! Validated cache keys and a builder for namespaced keys.
use thiserror::Error;

/// Separator between key segments.
pub const KEY_SEPARATOR: char = ':';

/// Cache key of the form `prefix:part:part`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Construct a cache key after validating that it is non-empty and trimmed.
    pub fn new(value: impl Into<String>) -> Result<Self, CacheKeyValidationError> {
        let raw = value.into();
        if raw.trim().is_empty() {
            return Err(CacheKeyValidationError::Empty);
        }
        if raw.trim() != raw {
            return Err(CacheKeyValidationError::ContainsWhitespace);
        }
        Ok(Self(raw))
    }

    /// Start a namespaced key.
    ///
    /// # Examples
    /// ```
    /// use skeleton::domain::ports::CacheKey;
    ///
    /// let key = CacheKey::builder("user").part(42).part("profile").build().unwrap();
    /// assert_eq!(key.as_str(), "user:42:profile");
    /// ```
    pub fn builder(prefix: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder {
            segments: vec![prefix.into()],
        }
    }

    /// Borrow the underlying key as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Accumulates key segments; see [`CacheKey::builder`].
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    segments: Vec<String>,
}

impl CacheKeyBuilder {
    #[must_use]
    pub fn part(mut self, segment: impl std::fmt::Display) -> Self {
        self.segments.push(segment.to_string());
        self
    }

    /// Join the segments, rejecting blank ones.
    pub fn build(self) -> Result<CacheKey, CacheKeyValidationError> {
        if self.segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(CacheKeyValidationError::EmptySegment);
        }
        CacheKey::new(self.segments.join(&KEY_SEPARATOR.to_string()))
    }
}

/// Validation errors returned when constructing [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheKeyValidationError {
    /// Key is empty after trimming whitespace.
    #[error("cache key must not be empty")]
    Empty,
    /// Key contains leading or trailing whitespace.
    #[error("cache key must not contain surrounding whitespace")]
    ContainsWhitespace,
    /// A builder segment is blank.
    #[error("cache key segments must not be blank")]
    EmptySegment,
}

#[cfg(test)]
mod tests {
    //! Validates cache key parsing and whitespace constraints.
    use super::{CacheKey, CacheKeyValidationError};
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn cache_key_rejects_blank(#[case] value: &str) {
        let err = CacheKey::new(value).expect_err("blank keys rejected");
        assert_eq!(err, CacheKeyValidationError::Empty);
    }

    #[rstest]
    #[case(" leading")]
    #[case("trailing ")]
    fn cache_key_rejects_whitespace_padding(#[case] value: &str) {
        let err = CacheKey::new(value).expect_err("padded key rejected");
        assert_eq!(err, CacheKeyValidationError::ContainsWhitespace);
    }

    #[test]
    fn builder_joins_with_separator() {
        let key = CacheKey::builder("ratelimit")
            .part("10.0.0.1")
            .part("/login")
            .build()
            .expect("valid key");
        assert_eq!(key.to_string(), "ratelimit:10.0.0.1:/login");
    }

    #[test]
    fn builder_rejects_blank_segments() {
        let err = CacheKey::builder("user")
            .part("")
            .build()
            .expect_err("blank segment");
        assert_eq!(err, CacheKeyValidationError::EmptySegment);
    }
}
