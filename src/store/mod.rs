//! ファイルストア抽象
//!
//! プロジェクトごとの永続ストレージを外部コラボレータとして消費するための契約。
//! バックエンド実装（ブラウザのIndexedDB/FSA等）はこの契約の背後に差し替わる。

pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// プロジェクトストレージの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    /// インメモリ（テスト・一時プロジェクト用）
    Memory,
    /// ブラウザのIndexedDBバックエンド
    IndexedDb,
    /// File System Access APIバックエンド
    FsaApi,
}

/// パスやファイルの属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub is_file: bool,
    pub is_directory: bool,
    pub size: u64,
}

/// ストレージ変更イベントの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// ストレージが発行する変更イベント
///
/// `renamed` の場合のみ `old_path` が埋まる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub path: String,
    pub old_path: Option<String>,
}

impl ChangeEvent {
    pub fn created(path: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Created,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Modified,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Deleted,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn renamed(old_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Renamed,
            path: path.into(),
            old_path: Some(old_path.into()),
        }
    }
}

/// ストア内パスの正規化
///
/// 先頭・末尾・重複スラッシュを取り除き、ルート相対の表現に揃える。
/// 同一ファイルが複数の表記でキャッシュされるのを防ぐため、
/// ストアに触れる全てのコンポーネントはこの正規形を使う。
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = true; // 先頭のスラッシュは落とす
    for ch in path.chars() {
        if ch == '/' {
            if !prev_slash {
                out.push('/');
            }
            prev_slash = true;
        } else {
            out.push(ch);
            prev_slash = false;
        }
    }
    while out.ends_with('/') {
        out.pop();
    }
    out
}

/// パス末尾のファイル名部分
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// 永続ストレージ契約
///
/// list/read/write/rename/remove/stat と変更イベントストリームを提供する。
/// 実装はルート相対の正規化パスを受け取り、発生した変更を発生順に
/// `drain_events` で取り出せるよう蓄積する。
pub trait FileStore {
    /// バックエンドの初期化
    fn init(&mut self) -> Result<()>;

    /// バックエンドの解放。以後の操作は失敗してよい
    fn destroy(&mut self) -> Result<()>;

    /// 指定パス配下のエントリ一覧（パス → 属性）
    fn list(&self, path: &str, recursive: bool) -> Result<BTreeMap<String, FileStat>>;

    fn exists(&self, path: &str) -> Result<bool>;

    fn stat(&self, path: &str) -> Result<Option<FileStat>>;

    /// ファイルを生のバイト列として読む（バイナリセーフ）
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<()>;

    fn rename(&mut self, old_path: &str, new_path: &str) -> Result<()>;

    fn rm(&mut self, path: &str) -> Result<()>;

    fn rmdir(&mut self, path: &str, recursive: bool) -> Result<()>;

    fn mkdir(&mut self, path: &str) -> Result<()>;

    /// 前回の呼び出し以降に発生した変更イベントを発生順に取り出す
    fn drain_events(&mut self) -> Vec<ChangeEvent>;

    /// UTF-8テキストとして読む。非UTF-8は置換文字で吸収する
    fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.read_file(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// ストレージバックエンドの生成シーム
///
/// レジストリに注入され、プロジェクトIDにスコープされたストアを作る。
pub trait StorageFactory {
    fn create(&self, storage_type: StorageType, project_id: &str) -> Result<Box<dyn FileStore>>;
}
