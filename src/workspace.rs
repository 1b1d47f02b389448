//! ワークスペース
//!
//! レジストリ・エディタモデル・タブを1つのアプリケーション
//! インスタンスとして束ねるファサード。グローバル状態は持たず、
//! 依存はすべて構築時に注入する。
//!
//! 協調的シングルスレッドモデルの割り込み点は `pump` に集約されている。
//! ホスト側はイベントループの各周回で `pump` を呼び、ストレージの
//! 変更イベントの反映とデバウンス書き戻しを進める。

use std::time::Instant;

use crate::editor::models::EditorModels;
use crate::error::{ForgeError, Result};
use crate::project::importer::{self, ArchiveCodec, ArchiveFetcher};
use crate::project::{ProjectRegistry, SubscriberId};
use crate::settings::{ProjectSettings, SettingsPatch};
use crate::store::{ChangeEvent, StorageFactory, StorageType};
use crate::tabs::{ProjectTab, TabState};

/// アプリケーション1インスタンス分の状態
pub struct Workspace {
    registry: ProjectRegistry,
    models: EditorModels,
    tabs: TabState,
}

impl Workspace {
    pub fn new(factory: Box<dyn StorageFactory>) -> Self {
        let registry = ProjectRegistry::new(factory);
        let models = EditorModels::new(registry.volatile());
        Self {
            registry,
            models,
            tabs: TabState::new(),
        }
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProjectRegistry {
        &mut self.registry
    }

    pub fn models(&self) -> &EditorModels {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut EditorModels {
        &mut self.models
    }

    pub fn tabs(&self) -> &TabState {
        &self.tabs
    }

    pub fn tabs_mut(&mut self) -> &mut TabState {
        &mut self.tabs
    }

    fn active_id(&self) -> Result<String> {
        self.registry
            .active_id()
            .map(str::to_string)
            .ok_or_else(|| ForgeError::state("no active project"))
    }

    /// プロジェクト切替後の後始末と整合化
    ///
    /// 旧プロジェクトのバッファを破棄し、初期化中に積まれたイベントを
    /// 捨ててから、新プロジェクトのタブを実体と突き合わせる。
    fn after_switch(&mut self, old_id: Option<String>) -> Result<()> {
        if let Some(old_id) = old_id {
            self.models.handle_project_switch(&old_id);
        }
        self.registry.drain_events();
        let Some(project_id) = self.registry.active_id().map(str::to_string) else {
            return Ok(());
        };
        let Some(service) = self.registry.active() else {
            return Ok(());
        };
        let entry_file = service.ino_file_name();
        if let Some(store) = self.registry.active_storage() {
            self.tabs.reconcile(store, &project_id, &entry_file)?;
        }
        Ok(())
    }

    /// 空のプロジェクトを作成してアクティブにする
    pub fn create_project(&mut self, storage_type: StorageType, name: &str) -> Result<String> {
        let old_id = self.registry.active_id().map(str::to_string);
        let id = self.registry.create_project(storage_type, name)?;
        self.after_switch(old_id)?;
        Ok(id)
    }

    /// 既知のプロジェクトをアクティブにする
    pub fn load_project(&mut self, project_id: &str) -> Result<()> {
        let old_id = self.registry.active_id().map(str::to_string);
        self.registry.load_project(project_id)?;
        self.after_switch(old_id)
    }

    /// 既存ディレクトリをプロジェクトとして開く
    pub fn open_project(&mut self, storage_type: StorageType) -> Result<String> {
        let old_id = self.registry.active_id().map(str::to_string);
        let id = self.registry.open_project(storage_type)?;
        self.after_switch(old_id)?;
        Ok(id)
    }

    /// アクティブプロジェクトを閉じる
    pub fn close_project(&mut self) -> Result<()> {
        let old_id = self.registry.active_id().map(str::to_string);
        self.registry.close_project()?;
        if let Some(old_id) = old_id {
            self.models.handle_project_switch(&old_id);
        }
        Ok(())
    }

    /// プロジェクトを一覧から削除する
    pub fn delete_project(&mut self, project_id: &str) -> Result<()> {
        self.registry.delete_project(project_id)?;
        self.models.handle_project_switch(project_id);
        self.tabs.drop_project_tabs(project_id);
        Ok(())
    }

    /// アクティブプロジェクトの設定を更新する。エントリファイルの
    /// 改名が起きた場合、その反映は次の `pump` で行われる
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Result<ProjectSettings> {
        self.registry.update_settings(patch)
    }

    pub fn rename_project(&mut self, name: &str) -> Result<()> {
        self.registry.rename_project(name)
    }

    /// アーカイブファイルからのインポート
    pub fn import_from_file(
        &mut self,
        codec: &dyn ArchiveCodec,
        storage_type: StorageType,
        bytes: &[u8],
        name: Option<&str>,
    ) -> Result<String> {
        let old_id = self.registry.active_id().map(str::to_string);
        let id = importer::import_from_file(&mut self.registry, codec, storage_type, bytes, name)?;
        self.after_switch(old_id)?;
        Ok(id)
    }

    /// URLからのインポート
    pub fn import_from_url(
        &mut self,
        codec: &dyn ArchiveCodec,
        fetcher: &dyn ArchiveFetcher,
        storage_type: StorageType,
        url: &str,
        name: Option<&str>,
        ino_filter: Option<&str>,
    ) -> Result<String> {
        let old_id = self.registry.active_id().map(str::to_string);
        let id = importer::import_from_url(
            &mut self.registry,
            codec,
            fetcher,
            storage_type,
            url,
            name,
            ino_filter,
        )?;
        self.after_switch(old_id)?;
        Ok(id)
    }

    /// スターターテンプレートからのインポート
    pub fn import_from_template(
        &mut self,
        codec: &dyn ArchiveCodec,
        fetcher: &dyn ArchiveFetcher,
        storage_type: StorageType,
        template_id: &str,
        name: Option<&str>,
    ) -> Result<String> {
        let old_id = self.registry.active_id().map(str::to_string);
        let id = importer::import_from_template(
            &mut self.registry,
            codec,
            fetcher,
            storage_type,
            template_id,
            name,
        )?;
        self.after_switch(old_id)?;
        Ok(id)
    }

    /// アクティブプロジェクトをアーカイブへ書き出す
    pub fn export_project(&self, codec: &dyn ArchiveCodec) -> Result<Vec<u8>> {
        let store = self
            .registry
            .active_storage()
            .ok_or_else(|| ForgeError::state("no active project"))?;
        importer::export_project(codec, store)
    }

    /// ファイルをバッファへロードし、タブで開く
    pub fn open_file(&mut self, path: &str) -> Result<String> {
        let project_id = self.active_id()?;
        let store = self
            .registry
            .active_storage()
            .ok_or_else(|| ForgeError::state("no active project"))?;
        self.models.get_model(store, &project_id, path, false)?;
        self.tabs.open_file_tab(store, &project_id, path)
    }

    /// バッファ内容を編集する（書き戻しはデバウンス後の `pump` で）
    pub fn edit_file(&mut self, path: &str, text: &str, now: Instant) -> Result<()> {
        let project_id = self.active_id()?;
        let store = self
            .registry
            .active_storage()
            .ok_or_else(|| ForgeError::state("no active project"))?;
        self.models.get_model(store, &project_id, path, false)?;
        self.models.update_content(&project_id, path, text, now)
    }

    /// ペンディング中の編集を即時に書き戻す
    pub fn save_now(&mut self) -> Result<()> {
        let project_id = self.active_id()?;
        if let Some(store) = self.registry.active_storage_mut() {
            self.models.flush_pending(store, &project_id);
        }
        Ok(())
    }

    /// 表示タブ一覧（プレースホルダ合成込み）
    pub fn visible_tabs(&self) -> Vec<ProjectTab> {
        self.tabs.project_tabs(self.registry.active_id())
    }

    pub fn subscribe(&mut self, handler: Box<dyn FnMut(&ChangeEvent)>) -> SubscriberId {
        self.registry.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// イベントの反映とデバウンス書き戻しを1回分進める
    ///
    /// ストレージに溜まった変更イベントを発生順に、モデル → タブ →
    /// 外部購読者の順で配った後、静穏間隔が過ぎていればペンディングを
    /// 書き戻す。
    pub fn pump(&mut self, now: Instant) -> Result<()> {
        let Some(project_id) = self.registry.active_id().map(str::to_string) else {
            return Ok(());
        };
        let events = self.registry.drain_events();
        // 取り出し済みのイベントは失敗しても最後まで配りきる。途中で
        // 打ち切ると残りのイベントが失われ、実体との整合が戻らなくなる
        let mut first_error = None;
        for event in events {
            if let Some(store) = self.registry.active_storage() {
                if let Err(err) = self.models.handle_change(store, &project_id, event.clone()) {
                    log::error!("failed to apply change to editor models: {}", err);
                    first_error.get_or_insert(err);
                }
            }
            if let Err(err) = self.tabs.handle_change(&project_id, &event) {
                log::error!("failed to apply change to tabs: {}", err);
                first_error.get_or_insert(err);
            }
            self.registry.notify_subscribers(&event);
        }
        if let Some(store) = self.registry.active_storage_mut() {
            self.models.flush_due(store, &project_id, now);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStorageFactory;
    use crate::tabs::TabKind;

    fn workspace() -> Workspace {
        Workspace::new(Box::new(MemoryStorageFactory))
    }

    #[test]
    fn welcome_tab_before_any_project() {
        let ws = workspace();
        let tabs = ws.visible_tabs();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].kind, TabKind::Welcome);
    }

    #[test]
    fn create_project_opens_entry_file_tab() {
        let mut ws = workspace();
        ws.create_project(StorageType::Memory, "My Sketch").unwrap();
        let tabs = ws.visible_tabs();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].kind, TabKind::File);
        assert_eq!(tabs[0].path.as_deref(), Some("MySketch.ino"));
    }

    #[test]
    fn edit_without_active_project_is_rejected() {
        let mut ws = workspace();
        let err = ws.edit_file("a.ino", "x", Instant::now()).unwrap_err();
        assert!(matches!(err, ForgeError::State { .. }));
    }

    #[test]
    fn pump_applies_rename_to_models_and_tabs() {
        let mut ws = workspace();
        let id = ws.create_project(StorageType::Memory, "Old Name").unwrap();
        ws.open_file("OldName.ino").unwrap();
        ws.rename_project("New Name").unwrap();
        ws.pump(Instant::now()).unwrap();

        assert!(ws.models().model(&id, "OldName.ino").is_none());
        assert!(ws.models().model(&id, "NewName.ino").is_some());
        let tabs = ws.visible_tabs();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].path.as_deref(), Some("NewName.ino"));
    }

    #[test]
    fn save_now_writes_pending_edits() {
        let mut ws = workspace();
        ws.create_project(StorageType::Memory, "Sketch").unwrap();
        ws.edit_file("Sketch.ino", "int x = 1;", Instant::now()).unwrap();
        ws.save_now().unwrap();
        let text = ws
            .registry()
            .active_storage()
            .unwrap()
            .read_text("Sketch.ino")
            .unwrap();
        assert_eq!(text, "int x = 1;");
    }

    #[test]
    fn delete_project_drops_tabs_and_models() {
        let mut ws = workspace();
        let id = ws.create_project(StorageType::Memory, "Doomed").unwrap();
        ws.open_file("Doomed.ino").unwrap();
        ws.delete_project(&id).unwrap();
        assert!(ws.registry().refs().is_empty());
        assert!(ws.models().model(&id, "Doomed.ino").is_none());
        assert_eq!(ws.visible_tabs()[0].kind, TabKind::Welcome);
    }

    mod failing_backend {
        use std::collections::BTreeMap;

        use super::*;
        use crate::store::memory::MemoryStore;
        use crate::store::{FileStat, FileStore, StorageFactory};

        /// `poison` を含むパスの読み出しだけ失敗するストア
        struct PoisonStore {
            inner: MemoryStore,
        }

        impl FileStore for PoisonStore {
            fn init(&mut self) -> Result<()> {
                self.inner.init()
            }

            fn destroy(&mut self) -> Result<()> {
                self.inner.destroy()
            }

            fn list(&self, path: &str, recursive: bool) -> Result<BTreeMap<String, FileStat>> {
                self.inner.list(path, recursive)
            }

            fn exists(&self, path: &str) -> Result<bool> {
                self.inner.exists(path)
            }

            fn stat(&self, path: &str) -> Result<Option<FileStat>> {
                self.inner.stat(path)
            }

            fn read_file(&self, path: &str) -> Result<Vec<u8>> {
                if path.contains("poison") {
                    return Err(ForgeError::io("readFile", path, "backend refused read"));
                }
                self.inner.read_file(path)
            }

            fn write_file(&mut self, path: &str, content: &[u8]) -> Result<()> {
                self.inner.write_file(path, content)
            }

            fn rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
                self.inner.rename(old_path, new_path)
            }

            fn rm(&mut self, path: &str) -> Result<()> {
                self.inner.rm(path)
            }

            fn rmdir(&mut self, path: &str, recursive: bool) -> Result<()> {
                self.inner.rmdir(path, recursive)
            }

            fn mkdir(&mut self, path: &str) -> Result<()> {
                self.inner.mkdir(path)
            }

            fn drain_events(&mut self) -> Vec<ChangeEvent> {
                self.inner.drain_events()
            }
        }

        struct PoisonFactory;

        impl StorageFactory for PoisonFactory {
            fn create(
                &self,
                _storage_type: StorageType,
                _project_id: &str,
            ) -> Result<Box<dyn FileStore>> {
                Ok(Box::new(PoisonStore {
                    inner: MemoryStore::new(),
                }))
            }
        }

        #[test]
        fn pump_dispatches_remaining_events_after_handler_error() {
            let mut ws = Workspace::new(Box::new(PoisonFactory));
            ws.create_project(StorageType::Memory, "Sketch").unwrap();
            {
                let store = ws.registry_mut().active_storage_mut().unwrap();
                store.write_file("poison.txt", b"p").unwrap();
                store.write_file("victim.md", b"v").unwrap();
            }
            ws.pump(Instant::now()).unwrap();
            ws.open_file("victim.md").unwrap();

            // 1件目（未キャッシュパスへの改名）の反映はロード失敗で
            // エラーになるが、後続の削除イベントまで配りきること
            {
                let store = ws.registry_mut().active_storage_mut().unwrap();
                store.rename("poison.txt", "poison2.txt").unwrap();
                store.rm("victim.md").unwrap();
            }
            let err = ws.pump(Instant::now()).unwrap_err();
            assert!(matches!(err, ForgeError::Io { .. }));

            let id = ws.registry().active_id().unwrap().to_string();
            assert!(ws.models().model(&id, "victim.md").is_none());
            assert!(ws
                .visible_tabs()
                .iter()
                .all(|tab| tab.path.as_deref() != Some("victim.md")));
        }
    }
}
