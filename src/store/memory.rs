//! インメモリストレージバックエンド
//!
//! テストと一時プロジェクトのための参照実装。ブラウザ向けの
//! 永続バックエンドはこの実装と同じ契約の背後で差し替わる。

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ForgeError, Result};
use crate::store::{
    normalize_path, ChangeEvent, FileStat, FileStore, StorageFactory, StorageType,
};

/// インメモリのファイルストア
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    events: Vec<ChangeEvent>,
    destroyed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_alive(&self, operation: &str, path: &str) -> Result<()> {
        if self.destroyed {
            return Err(ForgeError::io(operation, path, "store has been destroyed"));
        }
        Ok(())
    }

    /// 明示的または暗黙（ファイルパスの親）のディレクトリか
    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() {
            return true; // ルート
        }
        if self.dirs.contains(path) {
            return true;
        }
        let prefix = format!("{}/", path);
        self.files.keys().any(|f| f.starts_with(&prefix))
            || self.dirs.iter().any(|d| d.starts_with(&prefix))
    }
}

impl FileStore for MemoryStore {
    fn init(&mut self) -> Result<()> {
        self.check_alive("init", "")
    }

    fn destroy(&mut self) -> Result<()> {
        self.destroyed = true;
        Ok(())
    }

    fn list(&self, path: &str, recursive: bool) -> Result<BTreeMap<String, FileStat>> {
        let base = normalize_path(path);
        self.check_alive("list", &base)?;
        let prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{}/", base)
        };

        let mut out = BTreeMap::new();
        for (file, data) in &self.files {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            if recursive || !rest.contains('/') {
                out.insert(
                    file.clone(),
                    FileStat {
                        is_file: true,
                        is_directory: false,
                        size: data.len() as u64,
                    },
                );
            }
            // 直下のサブディレクトリは暗黙に列挙する
            if let Some((first, _)) = rest.split_once('/') {
                out.entry(format!("{}{}", prefix, first)).or_insert(FileStat {
                    is_file: false,
                    is_directory: true,
                    size: 0,
                });
            }
        }
        for dir in &self.dirs {
            let Some(rest) = dir.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            if recursive || !rest.contains('/') {
                out.entry(dir.clone()).or_insert(FileStat {
                    is_file: false,
                    is_directory: true,
                    size: 0,
                });
            }
        }
        Ok(out)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path)?.is_some())
    }

    fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let path = normalize_path(path);
        self.check_alive("stat", &path)?;
        if let Some(data) = self.files.get(&path) {
            return Ok(Some(FileStat {
                is_file: true,
                is_directory: false,
                size: data.len() as u64,
            }));
        }
        if !path.is_empty() && self.is_dir(&path) {
            return Ok(Some(FileStat {
                is_file: false,
                is_directory: true,
                size: 0,
            }));
        }
        Ok(None)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path);
        self.check_alive("readFile", &path)?;
        self.files
            .get(&path)
            .cloned()
            .ok_or_else(|| ForgeError::not_found(format!("file `{}`", path)))
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<()> {
        let path = normalize_path(path);
        self.check_alive("writeFile", &path)?;
        if path.is_empty() {
            return Err(ForgeError::io("writeFile", &path, "empty path"));
        }
        let existed = self.files.contains_key(&path);
        self.files.insert(path.clone(), content.to_vec());
        self.events.push(if existed {
            ChangeEvent::modified(path)
        } else {
            ChangeEvent::created(path)
        });
        Ok(())
    }

    fn rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let old_path = normalize_path(old_path);
        let new_path = normalize_path(new_path);
        self.check_alive("rename", &old_path)?;
        if let Some(data) = self.files.remove(&old_path) {
            self.files.insert(new_path.clone(), data);
            self.events.push(ChangeEvent::renamed(old_path, new_path));
            return Ok(());
        }
        if self.is_dir(&old_path) {
            // ディレクトリ改名は配下のファイル単位のrenamedとして通知する
            let prefix = format!("{}/", old_path);
            let moved: Vec<String> = self
                .files
                .keys()
                .filter(|f| f.starts_with(&prefix))
                .cloned()
                .collect();
            for file in moved {
                let data = self.files.remove(&file).unwrap_or_default();
                let target = format!("{}/{}", new_path, &file[prefix.len()..]);
                self.files.insert(target.clone(), data);
                self.events.push(ChangeEvent::renamed(file, target));
            }
            if self.dirs.remove(&old_path) {
                self.dirs.insert(new_path);
            }
            return Ok(());
        }
        Err(ForgeError::not_found(format!("path `{}`", old_path)))
    }

    fn rm(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        self.check_alive("rm", &path)?;
        if self.files.remove(&path).is_none() {
            return Err(ForgeError::not_found(format!("file `{}`", path)));
        }
        self.events.push(ChangeEvent::deleted(path));
        Ok(())
    }

    fn rmdir(&mut self, path: &str, recursive: bool) -> Result<()> {
        let path = normalize_path(path);
        self.check_alive("rmdir", &path)?;
        if !self.is_dir(&path) {
            return Err(ForgeError::not_found(format!("directory `{}`", path)));
        }
        let prefix = format!("{}/", path);
        let children: Vec<String> = self
            .files
            .keys()
            .filter(|f| f.starts_with(&prefix))
            .cloned()
            .collect();
        if !children.is_empty() && !recursive {
            return Err(ForgeError::io("rmdir", &path, "directory is not empty"));
        }
        for file in children {
            self.files.remove(&file);
            self.events.push(ChangeEvent::deleted(file));
        }
        self.dirs.remove(&path);
        self.dirs.retain(|d| !d.starts_with(&prefix));
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        self.check_alive("mkdir", &path)?;
        if path.is_empty() {
            return Err(ForgeError::io("mkdir", &path, "empty path"));
        }
        self.dirs.insert(path);
        Ok(())
    }

    fn drain_events(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.events)
    }
}

/// メモリバックエンドのみを生成するファクトリ
#[derive(Debug, Default)]
pub struct MemoryStorageFactory;

impl StorageFactory for MemoryStorageFactory {
    fn create(&self, storage_type: StorageType, project_id: &str) -> Result<Box<dyn FileStore>> {
        match storage_type {
            StorageType::Memory => Ok(Box::new(MemoryStore::new())),
            other => Err(ForgeError::state(format!(
                "storage type {:?} is not available for project `{}`",
                other, project_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChangeAction;

    #[test]
    fn write_then_read_roundtrip() {
        let mut store = MemoryStore::new();
        store.write_file("Main.ino", b"void setup() {}").unwrap();
        assert_eq!(store.read_file("Main.ino").unwrap(), b"void setup() {}");
        assert_eq!(store.read_text("/Main.ino").unwrap(), "void setup() {}");
    }

    #[test]
    fn write_emits_created_then_modified() {
        let mut store = MemoryStore::new();
        store.write_file("a.txt", b"1").unwrap();
        store.write_file("a.txt", b"2").unwrap();
        let events = store.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, ChangeAction::Created);
        assert_eq!(events[1].action, ChangeAction::Modified);
        assert!(store.drain_events().is_empty());
    }

    #[test]
    fn list_non_recursive_shows_direct_children_only() {
        let mut store = MemoryStore::new();
        store.write_file("Main.ino", b"").unwrap();
        store.write_file("lib/util.h", b"").unwrap();
        store.write_file("lib/deep/x.h", b"").unwrap();

        let root = store.list("/", false).unwrap();
        assert!(root.contains_key("Main.ino"));
        assert!(root.get("lib").map(|s| s.is_directory).unwrap_or(false));
        assert!(!root.contains_key("lib/util.h"));

        let all = store.list("", true).unwrap();
        assert!(all.contains_key("lib/util.h"));
        assert!(all.contains_key("lib/deep/x.h"));
    }

    #[test]
    fn rename_moves_file_and_records_event() {
        let mut store = MemoryStore::new();
        store.write_file("Old.ino", b"body").unwrap();
        store.drain_events();
        store.rename("Old.ino", "New.ino").unwrap();
        assert!(!store.exists("Old.ino").unwrap());
        assert_eq!(store.read_text("New.ino").unwrap(), "body");
        let events = store.drain_events();
        assert_eq!(events, vec![ChangeEvent::renamed("Old.ino", "New.ino")]);
    }

    #[test]
    fn rename_directory_renames_each_file() {
        let mut store = MemoryStore::new();
        store.write_file("lib/a.h", b"a").unwrap();
        store.write_file("lib/b.h", b"b").unwrap();
        store.drain_events();
        store.rename("lib", "vendor").unwrap();
        assert!(store.exists("vendor/a.h").unwrap());
        assert!(store.exists("vendor/b.h").unwrap());
        let events = store.drain_events();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.action == ChangeAction::Renamed && e.old_path.is_some()));
    }

    #[test]
    fn rmdir_requires_recursive_for_non_empty() {
        let mut store = MemoryStore::new();
        store.write_file("lib/a.h", b"a").unwrap();
        assert!(store.rmdir("lib", false).is_err());
        store.rmdir("lib", true).unwrap();
        assert!(!store.exists("lib/a.h").unwrap());
    }

    #[test]
    fn destroyed_store_rejects_operations() {
        let mut store = MemoryStore::new();
        store.destroy().unwrap();
        assert!(store.read_file("x").is_err());
        assert!(store.write_file("x", b"").is_err());
    }
}
