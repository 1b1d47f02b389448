//! プロジェクトのアーカイブ入出力
//!
//! アーカイブ（zip等）の展開・梱包そのものは外部コラボレータの
//! `ArchiveCodec` に委ね、ここではプロジェクトルートの検出と再ルート、
//! 設定の検証、レジストリへの取り込みを行う。

use serde_json::Value;

use crate::error::{ForgeError, Result};
use crate::settings::{
    default_settings, project_name_from_ino, validate_settings, ProjectSettings, SettingsPatch,
    SETTINGS_PATH,
};
use crate::store::{file_name, normalize_path, FileStore, StorageType};

use super::registry::ProjectRegistry;

/// アーカイブ内の1エントリ（ファイルのみ）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: normalize_path(&path.into()),
            data: data.into(),
        }
    }
}

/// アーカイブの展開・梱包契約（外部コラボレータ）
pub trait ArchiveCodec {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<ArchiveEntry>>;
    fn pack(&self, entries: &[ArchiveEntry]) -> Result<Vec<u8>>;
}

/// URLからアーカイブを取得する契約（外部コラボレータ）
pub trait ArchiveFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// 展開済みプロジェクト
#[derive(Debug, Clone)]
pub struct ExtractedProject {
    pub settings: ProjectSettings,
    pub files: Vec<ArchiveEntry>,
}

/// スターターテンプレート
#[derive(Debug, Clone, Copy)]
pub struct StarterTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub src: &'static str,
}

pub const STARTER_TEMPLATES: &[StarterTemplate] = &[
    StarterTemplate {
        id: "blink",
        name: "Blink",
        description: "Blink the on-board LED once a second.",
        src: "https://duino.app/starter-templates/blink.zip",
    },
    StarterTemplate {
        id: "serial-echo",
        name: "Serial Echo",
        description: "Echo everything received on the serial port.",
        src: "https://duino.app/starter-templates/serial-echo.zip",
    },
];

pub fn find_template(template_id: &str) -> Option<&'static StarterTemplate> {
    STARTER_TEMPLATES.iter().find(|t| t.id == template_id)
}

/// エントリファイル名か（`\w+\.ino` 相当）
fn is_ino_name(name: &str) -> bool {
    name.strip_suffix(".ino")
        .and_then(|stem| stem.chars().last())
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false)
}

/// アーカイブを展開し、検出したプロジェクトルート配下のファイルを返す
///
/// ルートは設定ドキュメント（`.duinoapp/settings.json`）を含む
/// ディレクトリ、無ければ唯一のエントリファイルのあるディレクトリ。
/// `ino_filter` を渡すとその名前のエントリファイルだけを候補にする
/// （複数ino入りアーカイブの取り込みに使う）。
pub fn extract_project(
    codec: &dyn ArchiveCodec,
    bytes: &[u8],
    ino_filter: Option<&str>,
) -> Result<ExtractedProject> {
    let entries: Vec<ArchiveEntry> = codec
        .extract(bytes)?
        .into_iter()
        .map(|e| ArchiveEntry::new(e.path, e.data))
        .collect();

    let settings_entry = entries
        .iter()
        .find(|e| e.path == SETTINGS_PATH || e.path.ends_with(&format!("/{}", SETTINGS_PATH)));
    let ino_entry = entries.iter().find(|e| {
        let name = file_name(&e.path);
        is_ino_name(name) && ino_filter.map(|f| name == f).unwrap_or(true)
    });

    if settings_entry.is_none() && ino_entry.is_none() {
        return Err(ForgeError::structural(
            "Archive does not contain a valid project.",
        ));
    }
    let ino_entry = ino_entry.ok_or_else(|| {
        ForgeError::structural("Archive does not contain a valid project root file.")
    })?;

    let root = match settings_entry {
        Some(entry) => entry
            .path
            .strip_suffix(SETTINGS_PATH)
            .unwrap_or("")
            .trim_end_matches('/')
            .to_string(),
        None => match ino_entry.path.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        },
    };
    let ino_name = file_name(&ino_entry.path).to_string();

    // ルート配下へ再ルートし、外のエントリは捨てる
    let prefix = if root.is_empty() {
        String::new()
    } else {
        format!("{}/", root)
    };
    let files: Vec<ArchiveEntry> = entries
        .into_iter()
        .filter_map(|mut entry| {
            let rebased = entry.path.strip_prefix(&prefix)?.to_string();
            if rebased.is_empty() {
                return None;
            }
            entry.path = rebased;
            Some(entry)
        })
        .collect();

    let settings = match files.iter().find(|e| e.path == SETTINGS_PATH) {
        Some(entry) => {
            let parsed: Value = serde_json::from_slice(&entry.data)
                .map_err(|_| ForgeError::validation("Failed to parse settings file."))?;
            let settings: ProjectSettings = serde_json::from_value(parsed)
                .map_err(|_| ForgeError::validation("Failed to parse settings file."))?;
            validate_settings(&settings)?;
            settings
        }
        None => default_settings(&project_name_from_ino(&ino_name)),
    };

    Ok(ExtractedProject { settings, files })
}

/// 展開済みプロジェクトを新規プロジェクトとして取り込む
///
/// サービスを仕込みの段階で完成させる。全ファイルの書き込みと設定の
/// 適用まで済ませてから据え付けるため、途中で失敗しても旧アクティブ
/// プロジェクトはそのまま残る。エントリファイルは正規名へ付け替えて
/// 書き込むため、完成時点で不変条件を満たす。
pub fn from_extracted(
    registry: &mut ProjectRegistry,
    storage_type: StorageType,
    extracted: &ExtractedProject,
    name: Option<&str>,
) -> Result<String> {
    let mut settings = extracted.settings.clone();
    if let Some(name) = name {
        if !name.is_empty() {
            settings.name = name.to_string();
        }
    }
    validate_settings(&settings)?;

    let mut service = registry.prepare_project(storage_type, &settings.name)?;
    let ino_name = service.ino_file_name();
    for file in &extracted.files {
        if file.path == SETTINGS_PATH {
            continue;
        }
        let target = if is_ino_name(file_name(&file.path)) {
            ino_name.clone()
        } else {
            file.path.clone()
        };
        service.storage_mut().write_file(&target, &file.data)?;
    }
    service.update_settings(&SettingsPatch::from_settings(&settings))?;
    registry.install_service(service)
}

/// アーカイブファイルからのインポート
pub fn import_from_file(
    registry: &mut ProjectRegistry,
    codec: &dyn ArchiveCodec,
    storage_type: StorageType,
    bytes: &[u8],
    name: Option<&str>,
) -> Result<String> {
    let extracted = extract_project(codec, bytes, None)?;
    from_extracted(registry, storage_type, &extracted, name)
}

/// URLからのインポート
pub fn import_from_url(
    registry: &mut ProjectRegistry,
    codec: &dyn ArchiveCodec,
    fetcher: &dyn ArchiveFetcher,
    storage_type: StorageType,
    url: &str,
    name: Option<&str>,
    ino_filter: Option<&str>,
) -> Result<String> {
    let bytes = fetcher.fetch(url)?;
    let extracted = extract_project(codec, &bytes, ino_filter)?;
    from_extracted(registry, storage_type, &extracted, name)
}

/// スターターテンプレートからのインポート
pub fn import_from_template(
    registry: &mut ProjectRegistry,
    codec: &dyn ArchiveCodec,
    fetcher: &dyn ArchiveFetcher,
    storage_type: StorageType,
    template_id: &str,
    name: Option<&str>,
) -> Result<String> {
    let template = find_template(template_id)
        .ok_or_else(|| ForgeError::not_found(format!("template `{}`", template_id)))?;
    import_from_url(
        registry,
        codec,
        fetcher,
        storage_type,
        template.src,
        name,
        None,
    )
}

/// アーカイブ内のエントリファイル名一覧（インポート前の問い合わせ用）
pub fn list_ino_files(codec: &dyn ArchiveCodec, bytes: &[u8]) -> Result<Vec<String>> {
    Ok(codec
        .extract(bytes)?
        .into_iter()
        .map(|e| file_name(&normalize_path(&e.path)).to_string())
        .filter(|name| is_ino_name(name))
        .collect())
}

/// プロジェクト全体をアーカイブへ書き出す
///
/// 設定ドキュメントも固定相対パスのまま含める。
pub fn export_project(codec: &dyn ArchiveCodec, store: &dyn FileStore) -> Result<Vec<u8>> {
    let mut entries = Vec::new();
    for (path, stat) in store.list("", true)? {
        if !stat.is_file {
            continue;
        }
        let data = store.read_file(&path)?;
        entries.push(ArchiveEntry { path, data });
    }
    codec.pack(&entries)
}
