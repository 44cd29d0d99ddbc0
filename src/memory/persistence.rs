//! 快照持久化
//!
//! 将可序列化状态写入 / 从 JSON 文件加载：先写同目录临时文件再 rename，避免中途崩溃留下半个快照。

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// 单文件 JSON 快照
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载快照；文件不存在时返回错误（快照是 render / patch 的必要输入）
    pub fn load<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read snapshot {}", self.path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse snapshot {}", self.path.display()))
    }

    /// 写入快照；父目录不存在时自动创建
    pub fn save<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move snapshot into {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_creates_parent_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested/state.json"));
        store.save(&serde_json::json!({"a": 1})).unwrap();
        let back: serde_json::Value = store.load().unwrap();
        assert_eq!(back["a"], 1);
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("missing.json"));
        assert!(store.load::<serde_json::Value>().is_err());
    }
}
