//! Network transport for `download_file` and remote recipe sources.

pub mod http;

use crate::core::error::TaskError;
use std::path::Path;

/// Fetches a URL into a local file.
pub trait Transport {
    /// Stream `url` into `dest`, creating parent directories. Returns the
    /// number of bytes written. Any non-success response is a
    /// [`TaskError::TransportFailure`] and leaves no file behind.
    fn download(&self, url: &str, dest: &Path) -> Result<u64, TaskError>;
}

/// True when a recipe source should be fetched rather than read from disk.
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_remote() {
        assert!(is_remote("https://raw.githubusercontent.com/a/b/main/recipe.yaml"));
        assert!(is_remote("http://localhost:8080/r.yaml"));
        assert!(!is_remote("recipes/qbcore.yaml"));
        assert!(!is_remote("/abs/http/recipe.yaml"));
        assert!(!is_remote("httpfoo.yaml"));
    }
}
