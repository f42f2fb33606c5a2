//! Fetches MERGE artifacts from the remote archive.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::{
    address::FetchAddressResolver,
    cli::create_progress_bar,
    error::{Result, SyncError},
    window::FetchBatch,
};

/// An artifact saved to the local work area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub file_name: String,
    pub path: PathBuf,
}

/// Result of fetching one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(PathBuf),
    NotFound,
    Failed(String),
}

/// Source of remote artifacts.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    /// Saves `directory/file_name` under `destination`.
    async fn fetch(&self, directory: &str, file_name: &str, destination: &Path) -> FetchOutcome;
}

/// Gateway over the HTTP mirror of the archive.
pub struct HttpGateway {
    client: Client,
}

impl HttpGateway {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::config(format!("cannot build HTTP client: {e}")))?;

        Ok(HttpGateway { client })
    }

    async fn download(&self, url: &str, path: &Path) -> std::result::Result<FetchOutcome, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(FetchOutcome::NotFound),
            status if !status.is_success() => return Ok(FetchOutcome::Failed(status.to_string())),
            _ => {}
        }

        let mut file = File::create(path).map_err(|e| e.to_string())?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("error reading chunk: {e}"))?;
            file.write_all(&chunk).map_err(|e| e.to_string())?;
        }

        Ok(FetchOutcome::Fetched(path.to_path_buf()))
    }
}

#[async_trait]
impl SourceGateway for HttpGateway {
    async fn fetch(&self, directory: &str, file_name: &str, destination: &Path) -> FetchOutcome {
        let url = format!("{directory}/{file_name}");
        let path = destination.join(file_name);
        debug!(%url, "Fetching");

        match self.download(&url, &path).await {
            Ok(outcome) => {
                if !matches!(outcome, FetchOutcome::Fetched(_)) {
                    // Don't leave partial or empty files behind
                    let _ = fs::remove_file(&path);
                }
                outcome
            }
            Err(reason) => {
                let _ = fs::remove_file(&path);
                FetchOutcome::Failed(reason)
            }
        }
    }
}

/// What a fetch stage produced.
#[derive(Debug, Default)]
pub struct FetchSummary {
    pub artifacts: Vec<FetchedArtifact>,
    pub not_found: usize,
    pub failed: usize,
}

/// Fetches every unit of every batch, in batch order, into `destination`.
///
/// Absent items are logged and skipped unless `strict` is set, in which case
/// the first one aborts the stage. Failed items are always skipped.
pub async fn fetch_batches(
    gateway: &dyn SourceGateway,
    resolver: &FetchAddressResolver,
    batches: &[FetchBatch],
    destination: &Path,
    strict: bool,
) -> Result<FetchSummary> {
    fs::create_dir_all(destination)?;

    let total: usize = batches.iter().map(|b| b.units.len()).sum();
    let progress_bar = create_progress_bar(total as u64, "Fetching rasters".to_string());
    let mut summary = FetchSummary::default();

    for batch in batches {
        let directory = resolver.directory(batch.granularity(), &batch.key);
        info!(batch = %batch.key, %directory, units = batch.units.len(), "Fetching batch");

        for unit in &batch.units {
            let file_name = resolver.file_name(unit);

            match gateway.fetch(&directory, &file_name, destination).await {
                FetchOutcome::Fetched(path) => {
                    summary.artifacts.push(FetchedArtifact { file_name, path });
                }
                FetchOutcome::NotFound if strict => {
                    progress_bar.abandon();
                    return Err(SyncError::TransportNotFound(format!("{directory}/{file_name}")));
                }
                FetchOutcome::NotFound => {
                    warn!(%file_name, "File not found on remote archive");
                    summary.not_found += 1;
                }
                FetchOutcome::Failed(reason) => {
                    warn!("{}", SyncError::Transport { item: file_name, reason });
                    summary.failed += 1;
                }
            }
            progress_bar.inc(1);
        }
    }

    progress_bar.finish_and_clear();
    info!(
        fetched = summary.artifacts.len(),
        not_found = summary.not_found,
        failed = summary.failed,
        "Fetch finished"
    );

    Ok(summary)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use std::{collections::HashMap, sync::Mutex};

    use tempfile::TempDir;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::{
        address::{DEFAULT_EXTENSION, DEFAULT_PREFIX},
        time_unit::{Granularity, TimeUnit},
        window::SyncWindow,
    };

    /// In-memory archive keyed by `directory/file_name`.
    #[derive(Default)]
    pub(crate) struct FakeGateway {
        pub files: HashMap<String, Vec<u8>>,
        pub failing: Vec<String>,
        pub requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SourceGateway for FakeGateway {
        async fn fetch(&self, directory: &str, file_name: &str, destination: &Path) -> FetchOutcome {
            let key = format!("{directory}/{file_name}");
            self.requests.lock().unwrap().push(key.clone());

            if self.failing.contains(&key) {
                return FetchOutcome::Failed("connection reset".to_string());
            }
            match self.files.get(&key) {
                Some(bytes) => {
                    let path = destination.join(file_name);
                    fs::write(&path, bytes).unwrap();
                    FetchOutcome::Fetched(path)
                }
                None => FetchOutcome::NotFound,
            }
        }
    }

    pub(crate) fn resolver() -> FetchAddressResolver {
        FetchAddressResolver::new("http://archive", DEFAULT_PREFIX, DEFAULT_EXTENSION)
    }

    fn hourly_batches(hours: u32) -> Vec<FetchBatch> {
        let start = TimeUnit::parse_setting(Granularity::Hourly, "2024-01-01h00").unwrap();
        let end = start.offset(i64::from(hours) - 1).unwrap();
        SyncWindow { start, end }.batches()
    }

    #[tokio::test]
    async fn should_fetch_all_available_items() {
        let dir = TempDir::new().unwrap();
        let mut gateway = FakeGateway::default();
        for hour in 0..3 {
            gateway.files.insert(
                format!("http://archive/HOURLY/2024/01/01/MERGE_CPTEC_20240101{hour:02}.grib2"),
                vec![hour],
            );
        }

        let summary = fetch_batches(&gateway, &resolver(), &hourly_batches(3), dir.path(), false)
            .await
            .unwrap();

        assert_eq!(summary.artifacts.len(), 3);
        assert_eq!(summary.artifacts[0].file_name, "MERGE_CPTEC_2024010102.grib2");
        assert_eq!(fs::read(&summary.artifacts[2].path).unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn should_tolerate_missing_and_failed_items() {
        let dir = TempDir::new().unwrap();
        let mut gateway = FakeGateway::default();
        gateway.files.insert(
            "http://archive/HOURLY/2024/01/01/MERGE_CPTEC_2024010100.grib2".to_string(),
            vec![1],
        );
        gateway
            .failing
            .push("http://archive/HOURLY/2024/01/01/MERGE_CPTEC_2024010101.grib2".to_string());

        let summary = fetch_batches(&gateway, &resolver(), &hourly_batches(3), dir.path(), false)
            .await
            .unwrap();

        assert_eq!(summary.artifacts.len(), 1);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn should_abort_on_missing_item_when_strict() {
        let dir = TempDir::new().unwrap();
        let gateway = FakeGateway::default();

        let result =
            fetch_batches(&gateway, &resolver(), &hourly_batches(3), dir.path(), true).await;

        assert!(matches!(result, Err(SyncError::TransportNotFound(_))));
        assert_eq!(gateway.requests.lock().unwrap().len(), 1);
    }

    // Answers `/ok/*` with a body, `/missing/*` with 404 and anything else with 500.
    async fn serve_archive() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buffer = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buffer).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => request.extend_from_slice(&buffer[..n]),
                        }
                    }

                    let request = String::from_utf8_lossy(&request);
                    let path = request.split_whitespace().nth(1).unwrap_or("/");
                    let (status, body) = if path.starts_with("/ok/") {
                        ("200 OK", "GRIB payload")
                    } else if path.starts_with("/missing/") {
                        ("404 Not Found", "")
                    } else {
                        ("500 Internal Server Error", "archive unavailable")
                    };

                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{address}")
    }

    fn gateway() -> HttpGateway {
        HttpGateway::new(Duration::from_secs(5)).unwrap()
    }

    const FILE_NAME: &str = "MERGE_CPTEC_2024010100.grib2";

    #[tokio::test]
    async fn should_stream_successful_response_to_disk() {
        let base = serve_archive().await;
        let dir = TempDir::new().unwrap();

        let outcome = gateway()
            .fetch(&format!("{base}/ok/HOURLY/2024/01/01"), FILE_NAME, dir.path())
            .await;

        let path = dir.path().join(FILE_NAME);
        assert_eq!(outcome, FetchOutcome::Fetched(path.clone()));
        assert_eq!(fs::read(&path).unwrap(), b"GRIB payload");
    }

    #[tokio::test]
    async fn should_report_missing_item_without_leaving_a_file() {
        let base = serve_archive().await;
        let dir = TempDir::new().unwrap();

        let outcome = gateway()
            .fetch(&format!("{base}/missing/HOURLY/2024/01/01"), FILE_NAME, dir.path())
            .await;

        assert_eq!(outcome, FetchOutcome::NotFound);
        assert!(!dir.path().join(FILE_NAME).exists());
    }

    #[tokio::test]
    async fn should_report_server_error_as_failure() {
        let base = serve_archive().await;
        let dir = TempDir::new().unwrap();

        let outcome = gateway()
            .fetch(&format!("{base}/broken/HOURLY/2024/01/01"), FILE_NAME, dir.path())
            .await;

        match outcome {
            FetchOutcome::Failed(reason) => assert!(reason.contains("500"), "{reason}"),
            other => panic!("expected a failure, got {other:?}"),
        }
        assert!(!dir.path().join(FILE_NAME).exists());
    }

    #[tokio::test]
    async fn should_report_refused_connection_as_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let dir = TempDir::new().unwrap();

        let outcome = gateway()
            .fetch(&format!("http://{address}/ok"), FILE_NAME, dir.path())
            .await;

        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        assert!(!dir.path().join(FILE_NAME).exists());
    }
}
