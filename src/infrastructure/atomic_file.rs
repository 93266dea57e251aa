//! 原子文件写入
//! 临时文件 + fsync + rename：崩溃时要么是旧值，要么是新值，不会出现半写

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 整体替换文件内容
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;

    let tmp = temp_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
        return result;
    }

    sync_dir(dir).await;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// rename 之后同步目录项；不支持的平台上忽略
async fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(d) = tokio::fs::File::open(dir).await {
            if let Err(e) = d.sync_all().await {
                tracing::debug!(error = %e, dir = ?dir, "Directory fsync failed");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_replaces_whole_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("value.txt");

        write_atomic(&path, b"10000").await.unwrap();
        write_atomic(&path, b"7").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "7");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.txt");
        write_atomic(&path, b"1").await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["value.txt".to_string()]);
    }
}
