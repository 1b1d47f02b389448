//! プロジェクトサービス
//!
//! ひとつのプロジェクトのライフサイクルを所有する。ストレージハンドル・
//! 設定・識別子を束ね、「エントリファイルはちょうど1つ」の不変条件を守る。

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};
use crate::settings::{
    ino_file_name, parse_settings, project_name_from_ino, save_settings, validate_settings,
    ProjectSettings, SettingsPatch, BLANK_SKETCH, SETTINGS_PATH,
};
use crate::store::{ChangeEvent, FileStore, StorageFactory, StorageType};
use crate::util::now_millis;

/// プロジェクトの参照情報
///
/// レジストリが一覧として保持・永続化する。サービス本体は
/// アクティブな間だけ生きたコピーを持つ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
    pub name: String,
    pub storage_type: StorageType,
    /// 最終アクセス時刻（エポックミリ秒）。最近使った順の並びに使う
    #[serde(default)]
    pub last_opened: u64,
}

/// サービスの状態機械
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
    Destroyed,
}

/// ひとつのプロジェクトを所有するサービス
pub struct ProjectService {
    id: String,
    name: String,
    storage_type: StorageType,
    last_opened: u64,
    state: ServiceState,
    storage: Box<dyn FileStore>,
    settings: ProjectSettings,
}

impl ProjectService {
    /// プロジェクトを初期化して `Ready` 状態にする
    ///
    /// `is_existing` は明示的に開かれた既存ディレクトリを指す。その場合
    /// ルート直下を走査して、エントリファイルが複数あれば
    /// `Structural`、設定ドキュメントが無ければ同じく `Structural` で
    /// 失敗する。新規経路では0または1個を受理し、欠けたエントリ
    /// ファイルは雛形で自己修復する。
    pub fn initialize(
        factory: &dyn StorageFactory,
        project_ref: &ProjectRef,
        is_existing: bool,
    ) -> Result<ProjectService> {
        let mut storage = factory.create(project_ref.storage_type, &project_ref.id)?;
        storage.init()?;

        let mut name = project_ref.name.clone();
        if is_existing {
            let existing_ino = Self::validate_project_directory(storage.as_mut())?;
            if name.is_empty() {
                if let Some(ino) = &existing_ino {
                    name = project_name_from_ino(ino);
                }
            }
        }

        let settings = parse_settings(storage.as_mut(), &name)?;
        let mut service = ProjectService {
            id: project_ref.id.clone(),
            name: settings.name.clone(),
            storage_type: project_ref.storage_type,
            last_opened: now_millis(),
            state: ServiceState::Initializing,
            storage,
            settings,
        };
        service.ensure_ino_file()?;
        service.state = ServiceState::Ready;
        Ok(service)
    }

    /// 明示的に開かれたディレクトリの検証
    ///
    /// 戻り値は既存エントリファイル名（あれば）。
    fn validate_project_directory(storage: &mut dyn FileStore) -> Result<Option<String>> {
        let ino_files = Self::ino_files_in(storage)?;
        if ino_files.len() > 1 {
            return Err(ForgeError::structural(
                "Project directory contains multiple .ino files.",
            ));
        }
        if !storage.exists(SETTINGS_PATH)? {
            return Err(ForgeError::structural(
                "No settings file found in project directory.",
            ));
        }
        Ok(ino_files.into_iter().next())
    }

    /// ルート直下のエントリファイル候補
    fn ino_files_in(storage: &dyn FileStore) -> Result<Vec<String>> {
        let entries = storage.list("", false)?;
        Ok(entries
            .into_iter()
            .filter(|(path, stat)| stat.is_file && path.ends_with(".ino"))
            .map(|(path, _)| path)
            .collect())
    }

    fn ensure_ready(&self, operation: &str) -> Result<()> {
        if self.state != ServiceState::Ready && self.state != ServiceState::Initializing {
            return Err(ForgeError::state(format!(
                "cannot {} on a {:?} project service",
                operation, self.state
            )));
        }
        Ok(())
    }

    /// エントリファイル不変条件の確認と修復
    ///
    /// 0個なら雛形で作成、名前がずれていれば正規名へリネームする。
    /// 2個以上は構成の破損として失敗する。
    pub fn ensure_ino_file(&mut self) -> Result<()> {
        self.ensure_ready("ensure entry file")?;
        let ino_files = Self::ino_files_in(self.storage.as_ref())?;
        if ino_files.len() > 1 {
            return Err(ForgeError::structural(
                "Project directory contains multiple .ino files.",
            ));
        }

        let expected = self.ino_file_name();
        match ino_files.into_iter().next() {
            None => {
                log::debug!("creating blank entry file `{}`", expected);
                self.storage.write_file(&expected, BLANK_SKETCH.as_bytes())
            }
            Some(existing) if existing != expected => {
                log::debug!("renaming entry file `{}` -> `{}`", existing, expected);
                self.storage.rename(&existing, &expected)
            }
            Some(_) => Ok(()),
        }
    }

    /// 設定更新とエントリ名のずれの修復をやり直す
    ///
    /// `update_settings` が設定の永続化後のリネームで失敗した場合の
    /// 明示的なリカバリ操作。
    pub fn repair_entry_file(&mut self) -> Result<()> {
        self.ensure_ino_file()
    }

    /// 設定の部分更新
    ///
    /// マージ → 検証 → 永続化 → エントリファイル修復の順。検証失敗時は
    /// 何も書き込まれない。永続化後のエントリリネームが失敗した場合、
    /// 設定は新しい名前を指したままになる（`repair_entry_file` で再試行）。
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Result<ProjectSettings> {
        self.ensure_ready("update settings")?;
        let merged = patch.apply_to(&self.settings);
        validate_settings(&merged)?;
        save_settings(self.storage.as_mut(), &merged)?;
        self.settings = merged;
        self.name = self.settings.name.clone();
        self.ensure_ino_file()?;
        Ok(self.settings.clone())
    }

    /// プロジェクト名の変更（エントリファイルも追従する）
    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        if self.settings.name != new_name {
            self.update_settings(&SettingsPatch::rename(new_name))?;
        }
        Ok(())
    }

    /// ストレージを解放する
    ///
    /// レジストリは揮発アクション障壁が空になるのを待ってから呼ぶこと。
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == ServiceState::Destroyed {
            return Ok(());
        }
        self.storage.destroy()?;
        self.state = ServiceState::Destroyed;
        Ok(())
    }

    /// 最終アクセス時刻を更新
    pub fn touch(&mut self) {
        self.last_opened = now_millis();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    /// 現在のプロジェクト名に対応するエントリファイル名
    pub fn ino_file_name(&self) -> String {
        ino_file_name(&self.name)
    }

    pub fn storage(&self) -> &dyn FileStore {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> &mut dyn FileStore {
        self.storage.as_mut()
    }

    /// アクティブなストレージの変更イベントを取り出す
    pub fn drain_events(&mut self) -> Vec<ChangeEvent> {
        self.storage.drain_events()
    }

    pub fn to_ref(&self) -> ProjectRef {
        ProjectRef {
            id: self.id.clone(),
            name: self.name.clone(),
            storage_type: self.storage_type,
            last_opened: self.last_opened,
        }
    }
}
