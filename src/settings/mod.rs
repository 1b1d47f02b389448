//! プロジェクト設定ドキュメント
//!
//! `.duinoapp/settings.json` の読み書きと検証、エントリファイル名の導出。
//! 設定は常に「デフォルトへのマージ → 検証 → 永続化」の経路でのみ変更される。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ForgeError, Result};
use crate::store::FileStore;

/// 設定ドキュメントの固定パス
pub const SETTINGS_PATH: &str = ".duinoapp/settings.json";

/// 受理する設定バージョン（リテラル一致）
pub const SETTINGS_VERSION: &str = "1.0.0";

/// 新規プロジェクトのエントリファイル雛形
pub const BLANK_SKETCH: &str = "void setup() {\n  // put your setup code here, to run once:\n\n}\n\nvoid loop() {\n  // put your main code here, to run repeatedly:\n\n}\n";

/// エディタ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorKind {
    Text,
    Blockly,
}

/// シリアルモニタ設定
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_new_line: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_time_window: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_lock_y: Option<bool>,
}

/// リモートコンパイル設定
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

/// プロジェクト設定
///
/// 未知のフィールドは `extra` に保持され、そのまま書き戻される
/// （将来バージョンとの前方互換）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    pub settings_version: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub version: String,
    pub editor: EditorKind,
    /// `name@version` 形式のライブラリ参照（順序を保持）
    #[serde(default)]
    pub libraries: Vec<String>,
    /// 完全修飾ボード名 `<vendor:arch:board[:opts]>`
    pub board: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile: Option<CompileSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 指定名で初期化したデフォルト設定
pub fn default_settings(name: &str) -> ProjectSettings {
    ProjectSettings {
        settings_version: SETTINGS_VERSION.to_string(),
        name: name.to_string(),
        description: None,
        author: Some(String::new()),
        version: "1.0.0".to_string(),
        editor: EditorKind::Text,
        libraries: Vec::new(),
        board: "arduino:avr:uno".to_string(),
        monitor: None,
        compile: None,
        extra: Map::new(),
    }
}

/// 設定の検証。保存前に必ず通す
pub fn validate_settings(settings: &ProjectSettings) -> Result<()> {
    if settings.settings_version != SETTINGS_VERSION {
        return Err(ForgeError::validation("Invalid settings version."));
    }
    if settings.name.is_empty() {
        return Err(ForgeError::validation("Project name is required."));
    }
    if settings.version.is_empty() {
        return Err(ForgeError::validation("Project version is required."));
    }
    if settings.board.is_empty() {
        return Err(ForgeError::validation("Project board is required."));
    }
    Ok(())
}

/// プロジェクト名からエントリファイル名を導出する純関数
///
/// 同じ入力に対して常に同じ結果を返す（繰り返し適用しても不動）。
pub fn ino_file_name(name: &str) -> String {
    format!("{}.ino", pascal_case(name))
}

/// エントリファイル名からプロジェクト名を復元
pub fn project_name_from_ino(ino_name: &str) -> String {
    let stem = ino_name.strip_suffix(".ino").unwrap_or(ino_name);
    pascal_case(stem)
}

/// PascalCase変換
///
/// 英数字以外を語の区切りとして落とし、小文字→大文字の境界でも語を
/// 切る。`pascal_case(pascal_case(x)) == pascal_case(x)` が成り立つ。
pub fn pascal_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut new_word = true;
    let mut prev_lower = false;
    for ch in input.chars() {
        if !ch.is_alphanumeric() {
            new_word = true;
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower {
            new_word = true;
        }
        if new_word {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
        new_word = false;
        prev_lower = ch.is_lowercase() || ch.is_numeric();
    }
    out
}

/// 設定の部分更新
///
/// `None` のフィールドは現在値を維持する。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub editor: Option<EditorKind>,
    pub libraries: Option<Vec<String>>,
    pub board: Option<String>,
    pub monitor: Option<MonitorSettings>,
    pub compile: Option<CompileSettings>,
}

impl SettingsPatch {
    /// 名前だけを変更するパッチ
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// 完全な設定を上書きパッチとして扱う（インポート経路で使用）
    pub fn from_settings(settings: &ProjectSettings) -> Self {
        Self {
            name: Some(settings.name.clone()),
            description: settings.description.clone(),
            author: settings.author.clone(),
            version: Some(settings.version.clone()),
            editor: Some(settings.editor),
            libraries: Some(settings.libraries.clone()),
            board: Some(settings.board.clone()),
            monitor: settings.monitor.clone(),
            compile: settings.compile.clone(),
        }
    }

    /// 現在値へマージした結果を返す
    pub fn apply_to(&self, current: &ProjectSettings) -> ProjectSettings {
        let mut merged = current.clone();
        if let Some(name) = &self.name {
            merged.name = name.clone();
        }
        if let Some(description) = &self.description {
            merged.description = Some(description.clone());
        }
        if let Some(author) = &self.author {
            merged.author = Some(author.clone());
        }
        if let Some(version) = &self.version {
            merged.version = version.clone();
        }
        if let Some(editor) = self.editor {
            merged.editor = editor;
        }
        if let Some(libraries) = &self.libraries {
            merged.libraries = libraries.clone();
        }
        if let Some(board) = &self.board {
            merged.board = board.clone();
        }
        if let Some(monitor) = &self.monitor {
            merged.monitor = Some(monitor.clone());
        }
        if let Some(compile) = &self.compile {
            merged.compile = Some(compile.clone());
        }
        merged
    }
}

/// 設定ドキュメントを読み込む
///
/// 存在しない・壊れている場合は `fallback_name` を種にしたデフォルトへ
/// 落ちる（エラーにしない）。読み取った内容をデフォルトへマージした
/// 結果が読み取った生の内容と異なる場合は、その場で書き戻して自己修復
/// する（バージョンアップでフィールドが増えた場合など）。
pub fn parse_settings(store: &mut dyn FileStore, fallback_name: &str) -> Result<ProjectSettings> {
    let parsed: Value = store
        .read_text(SETTINGS_PATH)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Map::new()));

    let seed_name = parsed
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_name);

    let defaults = serde_json::to_value(default_settings(seed_name))
        .map_err(|e| ForgeError::validation(e.to_string()))?;

    let mut merged = defaults;
    if let (Value::Object(target), Value::Object(overlay)) = (&mut merged, &parsed) {
        for (key, value) in overlay {
            target.insert(key.clone(), value.clone());
        }
    }

    // 型レベルで壊れたドキュメント（name が数値等）もエラーにせず、
    // デフォルトへ落として修復する
    let settings: ProjectSettings = match serde_json::from_value(merged.clone()) {
        Ok(settings) => settings,
        Err(err) => {
            log::warn!("discarding type-corrupt settings document: {}", err);
            let fallback = default_settings(seed_name);
            merged = serde_json::to_value(&fallback)
                .map_err(|e| ForgeError::validation(e.to_string()))?;
            fallback
        }
    };

    if merged != parsed {
        log::debug!("settings document healed for `{}`", settings.name);
        save_settings(store, &settings)?;
    }
    Ok(settings)
}

/// 設定ドキュメントを検証して書き込む
pub fn save_settings(store: &mut dyn FileStore, settings: &ProjectSettings) -> Result<()> {
    validate_settings(settings)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| ForgeError::validation(e.to_string()))?;
    store
        .write_file(SETTINGS_PATH, json.as_bytes())
        .map_err(|e| match e {
            ForgeError::Io {
                operation, message, ..
            } => ForgeError::io(operation, SETTINGS_PATH, message),
            other => other,
        })
}
