use crate::config::Config;
use rand::Rng;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

async fn create_test_file(
    maybe_size: Option<usize>,
    randomly: bool,
) -> (PathBuf, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("test_file");
    let mut file = TokioFile::create(&file_path).await.unwrap();
    let mut rng = rand::rng();
    if let Some(size) = maybe_size {
        let bytes: Vec<u8> = if randomly {
            (0..size).map(|_| rng.random()).collect()
        } else {
            vec![0u8; size]
        };
        file.write_all(&bytes).await.unwrap();
    }
    (file_path, dir)
}

pub async fn create_test_file_rng_filled(size: usize) -> (PathBuf, tempfile::TempDir) {
    create_test_file(size.into(), true).await
}

pub async fn create_test_file_zero_filled(size: usize) -> (PathBuf, tempfile::TempDir) {
    create_test_file(size.into(), false).await
}

/// Writes `content` to `root/relative_path`, creating parent directories.
pub async fn create_file_in(root: &Path, relative_path: &str, content: &[u8]) -> PathBuf {
    let path = root.join(relative_path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(&path, content).await.unwrap();
    path
}

///
/// Configuration for tests: no DNS domain, loopback UDP, short timeouts and retry delays.
///
pub fn test_config(public_url: &str, storage_path: &Path) -> Config {
    let mut config = Config::new(public_url, storage_path);
    config.udp_port = 0;
    config.existence_query_timeout_secs = 1;
    config.http_timeout_ms = 2_000;
    config.retry_base_delay_ms = 10;
    config.sync_max_retries = 1;
    config
}
