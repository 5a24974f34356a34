//! HTTP(S) downloads over a blocking reqwest client.

use super::Transport;
use crate::core::error::TaskError;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Read size for streaming a response body to disk.
pub const CHUNK_SIZE: usize = 8192;

/// [`Transport`] backed by `reqwest::blocking`.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    progress: bool,
}

impl HttpTransport {
    /// Build a transport. With `progress`, a bar is drawn on stderr.
    pub fn new(progress: bool) -> Result<Self, TaskError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("fxdeploy/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            // Server artifacts are large; no overall deadline.
            .timeout(None)
            .build()
            .map_err(|e| TaskError::TransportFailure {
                url: String::new(),
                detail: e.to_string(),
            })?;
        Ok(Self { client, progress })
    }

    fn progress_bar(&self, len: Option<u64>, dest: &Path) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bar = match len {
            Some(n) => {
                let bar = ProgressBar::new(n);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg} {bytes}") {
                    bar.set_style(style);
                }
                bar
            }
        };
        bar.set_message(name);
        bar
    }
}

impl Transport for HttpTransport {
    fn download(&self, url: &str, dest: &Path) -> Result<u64, TaskError> {
        let fail = |detail: String| TaskError::TransportFailure {
            url: url.to_string(),
            detail,
        };

        info!(url = %url, dest = %dest.display(), "downloading");
        let mut response = self.client.get(url).send().map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status)));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TaskError::io(parent, e))?;
        }
        let bar = self.progress_bar(response.content_length(), dest);
        let written = write_or_discard(dest, |file| {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut written: u64 = 0;
            loop {
                let n = match response.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(fail(e.to_string())),
                };
                file.write_all(&buf[..n]).map_err(|e| TaskError::io(dest, e))?;
                written += n as u64;
                bar.inc(n as u64);
            }
            file.flush().map_err(|e| TaskError::io(dest, e))?;
            Ok(written)
        });
        match &written {
            Ok(_) => bar.finish_and_clear(),
            Err(_) => bar.abandon(),
        }
        let written = written?;

        debug!(bytes = written, "download complete");
        Ok(written)
    }
}

/// Create `dest` and fill it with `fill`. Any error removes the partial file.
fn write_or_discard(
    dest: &Path,
    fill: impl FnOnce(&mut std::fs::File) -> Result<u64, TaskError>,
) -> Result<u64, TaskError> {
    let mut file = std::fs::File::create(dest).map_err(|e| TaskError::io(dest, e))?;
    let result = fill(&mut file);
    if result.is_err() {
        drop(file);
        let _ = std::fs::remove_file(dest);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_download_writes_body() {
        let mut server = mockito::Server::new();
        let body = "x".repeat(CHUNK_SIZE * 3 + 17);
        let _m = server
            .mock("GET", "/artifacts/fx.tar.xz")
            .with_status(200)
            .with_body(&body)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("downloads/fx.tar.xz");
        let transport = HttpTransport::new(false).unwrap();
        let n = transport
            .download(&format!("{}/artifacts/fx.tar.xz", server.url()), &dest)
            .unwrap();

        assert_eq!(n, body.len() as u64);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), body);
    }

    #[test]
    fn test_http_404_is_fatal_and_leaves_no_file() {
        let mut server = mockito::Server::new();
        let _m = server.mock("GET", "/missing").with_status(404).create();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out/missing.bin");
        let transport = HttpTransport::new(false).unwrap();
        let err = transport
            .download(&format!("{}/missing", server.url()), &dest)
            .unwrap_err();

        assert!(matches!(err, TaskError::TransportFailure { .. }));
        assert!(err.to_string().contains("404"));
        assert!(!err.is_recoverable());
        assert!(!dest.exists());
    }

    #[test]
    fn test_http_failed_write_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial.bin");
        let err = write_or_discard(&dest, |file| {
            file.write_all(b"half a payload").unwrap();
            Err(TaskError::io(&dest, std::io::Error::other("disk full")))
        })
        .unwrap_err();
        assert_eq!(err.kind(), "io");
        assert!(!dest.exists());

        let n = write_or_discard(&dest, |file| {
            file.write_all(b"ok").unwrap();
            Ok(2)
        })
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(std::fs::read(&dest).unwrap(), b"ok");
    }

    #[test]
    fn test_http_unreachable_host() {
        let dir = tempfile::tempdir().unwrap();
        let transport = HttpTransport::new(false).unwrap();
        let err = transport
            .download("http://127.0.0.1:1/never", &dir.path().join("f"))
            .unwrap_err();
        assert_eq!(err.kind(), "transport_failure");
    }
}
