use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::progress::DownloadObserver;

/// Release downloads bounce through a region redirect and a CDN redirect.
pub const MAX_REDIRECTS: usize = 5;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("too many redirects fetching {url} (limit {MAX_REDIRECTS})")]
    TooManyRedirects { url: String },
    #[error("GET {url} returned HTTP {status}")]
    Http { url: String, status: u16 },
    #[error("connection dropped while reading {url}: {source}")]
    Stream {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub bytes: u64,
    pub elapsed: Duration,
    /// Where the bytes actually came from after redirects.
    pub final_url: String,
}

/// Client shared by the release lookup and the downloads. No overall timeout:
/// a stalled connection is left to the transport's own idle handling.
pub fn http_client() -> reqwest::Result<Client> {
    Client::builder()
        .redirect(Policy::limited(MAX_REDIRECTS))
        .timeout(None)
        .user_agent(concat!("sald-install/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Downloader { client }
    }

    /// Streams `url` into `dest`. On any failure `dest` is removed, so callers
    /// must only ever pass scratch paths they own.
    pub fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_size: u64,
        observer: &mut dyn DownloadObserver,
    ) -> Result<DownloadOutcome, DownloadError> {
        let result = self.transfer(url, dest, expected_size, observer);
        if let Err(e) = &result {
            observer.failed();
            log::debug!("download of {url} failed: {e}");
            if dest.exists() {
                if let Err(rm) = fs_err::remove_file(dest) {
                    log::warn!("could not remove partial download: {rm}");
                }
            }
        }
        result
    }

    fn transfer(
        &self,
        url: &str,
        dest: &Path,
        expected_size: u64,
        observer: &mut dyn DownloadObserver,
    ) -> Result<DownloadOutcome, DownloadError> {
        let started = Instant::now();
        log::debug!("GET {url}");
        let mut resp = self.client.get(url).send().map_err(|source| {
            if source.is_redirect() {
                DownloadError::TooManyRedirects {
                    url: url.to_string(),
                }
            } else {
                DownloadError::Network {
                    url: url.to_string(),
                    source,
                }
            }
        })?;
        let final_url = resp.url().to_string();
        if final_url != url {
            log::debug!("redirected to {final_url}");
        }
        if !resp.status().is_success() {
            return Err(DownloadError::Http {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        // The redirect target's length is authoritative over stale metadata.
        let total = resp
            .content_length()
            .filter(|n| *n > 0)
            .unwrap_or(expected_size);
        observer.started(total);

        let mut out = fs_err::File::create(dest)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = match resp.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(DownloadError::Stream {
                        url: url.to_string(),
                        source,
                    })
                }
            };
            out.write_all(&buf[..n])?;
            written += n as u64;
            observer.chunk(written);
        }
        out.flush()?;
        out.sync_all()?;

        if expected_size > 0 && written != expected_size {
            log::info!(
                "{}: received {written} bytes, release metadata said {expected_size}",
                dest.display()
            );
        }
        let elapsed = started.elapsed();
        observer.finished(written, elapsed);
        Ok(DownloadOutcome {
            bytes: written,
            elapsed,
            final_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Silent;

    #[derive(Default)]
    struct Recorder {
        started: Option<u64>,
        chunks: Vec<u64>,
        finished: Option<u64>,
        failed: bool,
    }

    impl DownloadObserver for Recorder {
        fn started(&mut self, total_bytes: u64) {
            self.started = Some(total_bytes);
        }
        fn chunk(&mut self, bytes_so_far: u64) {
            self.chunks.push(bytes_so_far);
        }
        fn finished(&mut self, bytes: u64, _elapsed: Duration) {
            self.finished = Some(bytes);
        }
        fn failed(&mut self) {
            self.failed = true;
        }
    }

    fn downloader() -> Downloader {
        Downloader::new(http_client().unwrap())
    }

    #[test]
    fn streams_body_to_destination_and_reports_progress() {
        let mut server = mockito::Server::new();
        let body = vec![7u8; 200_000];
        let _m = server
            .mock("GET", "/v1.2.0/sald-linux-x86_64")
            .with_status(200)
            .with_body(&body)
            .create();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("sald");
        let mut rec = Recorder::default();

        let url = format!("{}/v1.2.0/sald-linux-x86_64", server.url());
        let out = downloader().download(&url, &dest, 200_000, &mut rec).unwrap();

        assert_eq!(out.bytes, 200_000);
        assert_eq!(fs_err::read(&dest).unwrap(), body);
        assert_eq!(rec.started, Some(200_000));
        assert_eq!(rec.finished, Some(200_000));
        assert_eq!(rec.chunks.last(), Some(&200_000));
        assert!(rec.chunks.windows(2).all(|w| w[0] <= w[1]));
        assert!(!rec.failed);
    }

    #[test]
    fn follows_redirects_to_the_cdn() {
        let mut server = mockito::Server::new();
        let cdn = format!("{}/cdn/blob", server.url());
        let _redirect = server
            .mock("GET", "/download/v1/salad-linux-arm64")
            .with_status(302)
            .with_header("location", &cdn)
            .create();
        let _blob = server
            .mock("GET", "/cdn/blob")
            .with_status(200)
            .with_body("binary")
            .create();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("salad");

        let url = format!("{}/download/v1/salad-linux-arm64", server.url());
        let out = downloader().download(&url, &dest, 0, &mut Silent).unwrap();
        assert_eq!(out.bytes, 6);
        assert_eq!(out.final_url, cdn);
        assert_eq!(fs_err::read_to_string(&dest).unwrap(), "binary");
    }

    #[test]
    fn redirect_loop_is_bounded() {
        let mut server = mockito::Server::new();
        let target = format!("{}/loop", server.url());
        let _m = server
            .mock("GET", "/loop")
            .with_status(301)
            .with_header("location", &target)
            .create();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x");
        let err = downloader()
            .download(&target, &dest, 0, &mut Silent)
            .unwrap_err();
        assert!(matches!(err, DownloadError::TooManyRedirects { .. }), "{err}");
        assert!(!dest.exists());
    }

    #[test]
    fn http_error_removes_any_stale_destination() {
        let mut server = mockito::Server::new();
        let _m = server.mock("GET", "/gone").with_status(404).create();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial");
        fs_err::write(&dest, b"truncated").unwrap();
        let mut rec = Recorder::default();

        let err = downloader()
            .download(&format!("{}/gone", server.url()), &dest, 10, &mut rec)
            .unwrap_err();
        assert!(matches!(err, DownloadError::Http { status: 404, .. }), "{err}");
        assert!(rec.failed);
        assert!(rec.started.is_none());
        assert!(!dest.exists());
    }

    #[test]
    fn unwritable_destination_is_an_io_error() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/a")
            .with_status(200)
            .with_body("abc")
            .create();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing-dir").join("a");
        let err = downloader()
            .download(&format!("{}/a", server.url()), &dest, 3, &mut Silent)
            .unwrap_err();
        assert!(matches!(err, DownloadError::Io(_)), "{err}");
        assert!(!dest.exists());
    }

    #[test]
    fn size_mismatch_is_informational() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/b")
            .with_status(200)
            .with_body("twelve bytes")
            .create();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("b");
        let mut rec = Recorder::default();
        let out = downloader()
            .download(&format!("{}/b", server.url()), &dest, 9_999, &mut rec)
            .unwrap();
        assert_eq!(out.bytes, 12);
        // Content-Length wins over the stale expectation.
        assert_eq!(rec.started, Some(12));
    }
}
