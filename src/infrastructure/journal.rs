//! 追加写 JSON Lines 日志
//! 每条记录一行，写入后 fsync；读取时跳过损坏的行
//! 崩溃可能留下没有换行的残行，追加前先补齐换行，新记录不会拼接到残行上

use std::{io::SeekFrom, marker::PhantomData, path::PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

pub struct JsonlJournal<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonlJournal<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// 追加一条记录
    pub async fn append(&self, entry: &T) -> Result<()> {
        let mut line = serde_json::to_vec(entry).context("Failed to serialize journal entry")?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create journal dir: {:?}", dir))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open journal: {:?}", self.path))?;

        if !ends_with_newline(&mut file).await? {
            tracing::warn!(journal = ?self.path, "Journal ends with a torn line, terminating it");
            line.insert(0, b'\n');
        }

        file.write_all(&line)
            .await
            .context("Failed to append journal entry")?;
        file.sync_data().await.context("Failed to sync journal")?;
        Ok(())
    }

    /// 读取全部记录（文件不存在时为空）
    pub async fn load(&self) -> Result<Vec<T>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read journal: {:?}", self.path))
            }
        };

        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    journal = ?self.path,
                    line = idx + 1,
                    error = %e,
                    "Skipping malformed journal line"
                ),
            }
        }
        Ok(entries)
    }
}

/// 空文件视为以换行结尾
async fn ends_with_newline(file: &mut tokio::fs::File) -> Result<bool> {
    let len = file
        .metadata()
        .await
        .context("Failed to stat journal")?
        .len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))
        .await
        .context("Failed to seek journal")?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)
        .await
        .context("Failed to read journal tail")?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: u32,
        note: String,
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JsonlJournal::<Entry>::new(dir.path().join("j.jsonl"));

        assert!(journal.load().await.unwrap().is_empty());

        journal
            .append(&Entry { id: 1, note: "a".into() })
            .await
            .unwrap();
        journal
            .append(&Entry { id: 2, note: "b".into() })
            .await
            .unwrap();

        let entries = journal.load().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], Entry { id: 2, note: "b".into() });
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.jsonl");
        tokio::fs::write(&path, "{\"id\":1,\"note\":\"ok\"}\nnot json\n")
            .await
            .unwrap();

        let journal = JsonlJournal::<Entry>::new(&path);
        let entries = journal.load().await.unwrap();
        assert_eq!(entries, vec![Entry { id: 1, note: "ok".into() }]);
    }

    #[tokio::test]
    async fn test_append_after_torn_tail_is_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.jsonl");
        tokio::fs::write(&path, "{\"id\":1,\"note\":\"ok\"}\n{\"id\":2,\"no")
            .await
            .unwrap();

        let journal = JsonlJournal::<Entry>::new(&path);
        journal
            .append(&Entry { id: 3, note: "c".into() })
            .await
            .unwrap();
        journal
            .append(&Entry { id: 4, note: "d".into() })
            .await
            .unwrap();

        let reopened = JsonlJournal::<Entry>::new(&path);
        let ids: Vec<u32> = reopened.load().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }
}
