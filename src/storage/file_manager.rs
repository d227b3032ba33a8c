use crate::constants::HASH_READ_BUFFER_SIZE;
use crate::core::hash::ContentHash;
use log::warn;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File as TokioFile};
use tokio::io::{AsyncReadExt, BufReader as TokioBufReader};

///
/// Streams a file through SHA-256 without loading it into memory.
///
pub async fn hash_file(path: &Path) -> io::Result<(ContentHash, u64)> {
    let file = TokioFile::open(path).await?;
    let mut reader = TokioBufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_READ_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok((ContentHash::from_hasher(hasher), size))
}

/// Content type guessed from the file extension.
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

///
/// Lists every regular file under `root`, recursively.
///
/// Directories that cannot be read are logged and skipped, the listing never fails because of a
/// single bad entry. Only a missing or unreadable root is an error.
///
pub async fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    let mut is_root = true;

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if is_root => return Err(e),
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                continue;
            }
        };
        is_root = false;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error while listing {}: {}", dir.display(), e);
                    break;
                }
            };
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => pending.push(entry.path()),
                Ok(file_type) if file_type.is_file() => files.push(entry.path()),
                Ok(_) => {}
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }
    }

    files.sort();
    Ok(files)
}
