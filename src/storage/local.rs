// Copyright 2025 Adobe. All rights reserved.
// This file is licensed to you under the Apache License,
// Version 2.0 (http://www.apache.org/licenses/LICENSE-2.0)
// or the MIT license (http://opensource.org/licenses/MIT),
// at your option.
//
// Unless required by applicable law or agreed to in writing,
// this software is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR REPRESENTATIONS OF ANY KIND, either express or
// implied. See the LICENSE-MIT and LICENSE-APACHE files for the
// specific language governing permissions and limitations under
// each license.

//! Argument and local filesystem checks shared by the provider adapters.

use crate::error::{ConnectorError, ConnectorResult};
use bytes::{Bytes, BytesMut};
use std::io::{ErrorKind as IoErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufWriter};

pub(crate) fn check_bucket(bucket: &str) -> ConnectorResult<()> {
    if bucket.is_empty() {
        return Err(ConnectorError::bucket_not_found(bucket));
    }
    Ok(())
}

pub(crate) fn check_object_path(path: &str) -> ConnectorResult<()> {
    if path.is_empty() {
        return Err(ConnectorError::InvalidArgument(
            "object path must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Check that `local_path` is a readable regular file and return its size.
pub(crate) async fn check_upload_source(local_path: &Path) -> ConnectorResult<u64> {
    let metadata = tokio::fs::metadata(local_path).await.map_err(|e| {
        if e.kind() == IoErrorKind::NotFound {
            ConnectorError::LocalFileNotFound(local_path.to_path_buf())
        } else {
            ConnectorError::InvalidArgument(format!(
                "cannot read '{}': {}",
                local_path.display(),
                e
            ))
        }
    })?;
    if !metadata.is_file() {
        return Err(ConnectorError::InvalidArgument(format!(
            "'{}' is not a regular file",
            local_path.display()
        )));
    }
    Ok(metadata.len())
}

/// Check that a download can land on `local_path` before anything is fetched.
pub(crate) async fn check_download_destination(local_path: &Path) -> ConnectorResult<()> {
    let parent = match local_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let destination_error = |reason: String| ConnectorError::DestinationPath {
        path: local_path.to_path_buf(),
        reason,
    };

    match tokio::fs::metadata(&parent).await {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(destination_error(format!(
                "'{}' is not a directory",
                parent.display()
            )))
        }
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            return Err(destination_error(format!(
                "directory '{}' does not exist",
                parent.display()
            )))
        }
        Err(e) if e.kind() == IoErrorKind::PermissionDenied => {
            return Err(ConnectorError::DestinationPathPermissions {
                path: local_path.to_path_buf(),
            })
        }
        Err(e) => return Err(destination_error(e.to_string())),
    }

    if let Ok(metadata) = tokio::fs::metadata(local_path).await {
        if metadata.is_dir() {
            return Err(destination_error("path is a directory".to_string()));
        }
    }
    Ok(())
}

/// Create (or truncate) the download target.
pub(crate) async fn create_destination(
    local_path: &Path,
    buffer_size: usize,
) -> ConnectorResult<BufWriter<File>> {
    let file = File::create(local_path).await.map_err(|e| {
        if e.kind() == IoErrorKind::PermissionDenied {
            ConnectorError::DestinationPathPermissions {
                path: local_path.to_path_buf(),
            }
        } else {
            ConnectorError::DestinationPath {
                path: local_path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;
    Ok(BufWriter::with_capacity(buffer_size.max(1), file))
}

/// Map a local write failure during a download.
pub(crate) fn destination_write_error(local_path: &Path, error: std::io::Error) -> ConnectorError {
    if error.kind() == IoErrorKind::PermissionDenied {
        ConnectorError::DestinationPathPermissions {
            path: local_path.to_path_buf(),
        }
    } else {
        ConnectorError::DestinationPath {
            path: local_path.to_path_buf(),
            reason: error.to_string(),
        }
    }
}

/// Read `len` bytes of `local_path` starting at `offset`.
pub(crate) async fn read_part(local_path: &Path, offset: u64, len: usize) -> ConnectorResult<Bytes> {
    let io_error = |e: std::io::Error| {
        ConnectorError::Unexpected(format!(
            "Failed to read '{}' at offset {}: {}",
            local_path.display(),
            offset,
            e
        ))
    };
    let mut file = File::open(local_path).await.map_err(io_error)?;
    file.seek(SeekFrom::Start(offset)).await.map_err(io_error)?;
    let mut buffer = BytesMut::zeroed(len);
    file.read_exact(&mut buffer).await.map_err(io_error)?;
    Ok(buffer.freeze())
}

/// Byte ranges of a multipart transfer, as `(part_number, offset, len)` with
/// part numbers starting at 1.
pub(crate) fn part_ranges(size: u64, chunk_size: u64) -> Vec<(i32, u64, usize)> {
    let chunk_size = chunk_size.max(1);
    let mut parts = Vec::new();
    let mut offset = 0;
    let mut number = 1;
    while offset < size {
        let len = chunk_size.min(size - offset);
        parts.push((number, offset, len as usize));
        offset += len;
        number += 1;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_check_bucket() {
        assert!(check_bucket("data").is_ok());
        assert_eq!(check_bucket("").unwrap_err().kind(), ErrorKind::BucketNotFound);
    }

    #[test]
    fn test_check_object_path() {
        assert!(check_object_path("a/b").is_ok());
        assert_eq!(
            check_object_path("").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[tokio::test]
    async fn test_check_upload_source() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.csv");
        tokio::fs::write(&file, b"a,b\n1,2\n").await.unwrap();

        assert_eq!(check_upload_source(&file).await.unwrap(), 8);

        let err = check_upload_source(&dir.path().join("missing.csv"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LocalFileNotFound);

        let err = check_upload_source(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_check_download_destination() {
        let dir = TempDir::new().unwrap();

        assert!(check_download_destination(&dir.path().join("out.bin"))
            .await
            .is_ok());

        let err = check_download_destination(&dir.path().join("missing/out.bin"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationPath);

        let file = dir.path().join("plain");
        tokio::fs::write(&file, b"x").await.unwrap();
        let err = check_download_destination(&file.join("out.bin"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationPath);

        let err = check_download_destination(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationPath);
    }

    #[tokio::test]
    async fn test_create_destination_truncates() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("out.txt");
        tokio::fs::write(&file, b"previous content").await.unwrap();

        let mut writer = create_destination(&file, 16).await.unwrap();
        writer.write_all(b"new").await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(tokio::fs::read(&file).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_read_part() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.bin");
        tokio::fs::write(&file, b"0123456789").await.unwrap();

        let part = read_part(&file, 3, 4).await.unwrap();
        assert_eq!(&part[..], b"3456");

        let err = read_part(&file, 8, 4).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn test_part_ranges() {
        assert_eq!(
            part_ranges(10, 4),
            vec![(1, 0, 4), (2, 4, 4), (3, 8, 2)]
        );
        assert_eq!(part_ranges(8, 4), vec![(1, 0, 4), (2, 4, 4)]);
        assert!(part_ranges(0, 4).is_empty());
    }
}
