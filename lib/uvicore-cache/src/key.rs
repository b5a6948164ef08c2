use std::fmt;

/// Slash-separated cache key.
///
/// When a cached value is only valid for a particular secondary input (a
/// password, a token), add it with [`CacheKey::fingerprint`] so a lookup
/// with a different input lands on a different key.
///
/// ```
/// use uvicore_cache::CacheKey;
///
/// let key = CacheKey::new("auth").push("user").push("alice");
/// assert_eq!(key.as_str(), "auth/user/alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(root: impl fmt::Display) -> Self {
        Self(root.to_string())
    }

    pub fn push(mut self, segment: impl fmt::Display) -> Self {
        self.0.push('/');
        self.0.push_str(&segment.to_string());
        self
    }

    /// Append the blake3 digest of `secret`. The secret itself never
    /// appears in the key.
    pub fn fingerprint(self, secret: impl AsRef<[u8]>) -> Self {
        let digest = blake3::hash(secret.as_ref());
        self.push(digest.to_hex())
    }

    /// Append a fingerprint only when a secret is given.
    pub fn fingerprint_opt<S: AsRef<[u8]>>(self, secret: Option<S>) -> Self {
        match secret {
            Some(secret) => self.fingerprint(secret),
            None => self,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}
