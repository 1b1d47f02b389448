//! プロジェクトレジストリ
//!
//! 既知プロジェクトの参照一覧とアクティブなサービスを管理する
//! オーケストレータ。破壊的操作の相互排他（揮発アクション障壁）と、
//! アクティブストレージの変更イベントの外部購読者への再配信も担う。

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{ForgeError, Result};
use crate::settings::{ProjectSettings, SettingsPatch};
use crate::store::{ChangeEvent, FileStore, StorageFactory, StorageType};
use crate::util::{gen_id, now_millis};

use super::service::{ProjectRef, ProjectService};

/// 外部購読者の識別子。購読解除に使う
pub type SubscriberId = usize;

/// 揮発アクション障壁
///
/// 名前つきの参照カウント集合。破壊的操作（プロジェクト切替・破棄）は
/// この集合が空になるまで待つ。個別リソースのロックは存在しない。
#[derive(Clone, Default)]
pub struct VolatileActions {
    inner: Rc<RefCell<HashMap<String, u32>>>,
}

impl VolatileActions {
    pub fn add(&self, name: &str) {
        let mut inner = self.inner.borrow_mut();
        *inner.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn remove(&self, name: &str) {
        let mut inner = self.inner.borrow_mut();
        if let Some(count) = inner.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                inner.remove(name);
            }
        }
    }

    pub fn is_volatile(&self) -> bool {
        !self.inner.borrow().is_empty()
    }

    /// RAIIガードとしてアクションを保持する
    pub fn guard(&self, name: &str) -> VolatileGuard {
        self.add(name);
        VolatileGuard {
            actions: self.clone(),
            name: name.to_string(),
        }
    }

    /// 障壁が空になるまでポーリングする
    ///
    /// 協調的シングルスレッドモデルでは呼び出し間で障壁は空になるのが
    /// 通常なので、規定回数を超えて残っている場合はエラーにする
    /// （ハングの代わり）。
    pub fn wait_until_clear(&self) -> Result<()> {
        const MAX_POLLS: usize = 100;
        for _ in 0..MAX_POLLS {
            if !self.is_volatile() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let held: Vec<String> = self.inner.borrow().keys().cloned().collect();
        Err(ForgeError::state(format!(
            "volatile actions still in flight: {}",
            held.join(", ")
        )))
    }
}

/// スコープを抜けるとアクションを解放するガード
pub struct VolatileGuard {
    actions: VolatileActions,
    name: String,
}

impl Drop for VolatileGuard {
    fn drop(&mut self) {
        self.actions.remove(&self.name);
    }
}

struct Subscriber {
    id: SubscriberId,
    handler: Box<dyn FnMut(&ChangeEvent)>,
}

/// 全プロジェクトのオーケストレータ
pub struct ProjectRegistry {
    factory: Box<dyn StorageFactory>,
    refs: Vec<ProjectRef>,
    active: Option<ProjectService>,
    volatile: VolatileActions,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: SubscriberId,
}

impl ProjectRegistry {
    pub fn new(factory: Box<dyn StorageFactory>) -> Self {
        Self {
            factory,
            refs: Vec::new(),
            active: None,
            volatile: VolatileActions::default(),
            subscribers: Vec::new(),
            next_subscriber_id: 0,
        }
    }

    /// 永続化されていた参照一覧を復元する（アプリ起動時）
    pub fn restore_refs(&mut self, refs: Vec<ProjectRef>) {
        self.refs = refs;
    }

    pub fn refs(&self) -> &[ProjectRef] {
        &self.refs
    }

    /// 最近開いた順の参照一覧
    pub fn refs_by_recency(&self) -> Vec<ProjectRef> {
        let mut refs = self.refs.clone();
        refs.sort_by(|a, b| b.last_opened.cmp(&a.last_opened));
        refs
    }

    pub fn find_ref(&self, project_id: &str) -> Option<&ProjectRef> {
        self.refs.iter().find(|r| r.id == project_id)
    }

    pub fn active(&self) -> Option<&ProjectService> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ProjectService> {
        self.active.as_mut()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|p| p.id())
    }

    pub fn active_storage(&self) -> Option<&dyn FileStore> {
        self.active.as_ref().map(|p| p.storage())
    }

    pub fn active_storage_mut(&mut self) -> Option<&mut dyn FileStore> {
        self.active.as_mut().map(|p| p.storage_mut())
    }

    pub fn settings(&self) -> Option<&ProjectSettings> {
        self.active.as_ref().map(|p| p.settings())
    }

    /// 障壁ハンドルの複製（エディタモデル等が保存時トークンに使う）
    pub fn volatile(&self) -> VolatileActions {
        self.volatile.clone()
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile.is_volatile()
    }

    pub fn add_volatile_action(&self, name: &str) {
        self.volatile.add(name);
    }

    pub fn remove_volatile_action(&self, name: &str) {
        self.volatile.remove(name);
    }

    pub fn wait_for_volatile_actions(&self) -> Result<()> {
        self.volatile.wait_until_clear()
    }

    /// 変更イベントの外部購読
    ///
    /// 購読者はレジストリに対して登録されるため、アクティブな
    /// ストレージが差し替わってもハンドラ識別は保たれる。
    pub fn subscribe(&mut self, handler: Box<dyn FnMut(&ChangeEvent)>) -> SubscriberId {
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.push(Subscriber { id, handler });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// アクティブストレージに溜まった変更イベントを取り出す
    pub fn drain_events(&mut self) -> Vec<ChangeEvent> {
        match &mut self.active {
            Some(service) => service.drain_events(),
            None => Vec::new(),
        }
    }

    /// 外部購読者へ1イベントを配信する
    pub fn notify_subscribers(&mut self, event: &ChangeEvent) {
        for subscriber in &mut self.subscribers {
            (subscriber.handler)(event);
        }
    }

    /// 新しいサービスをアクティブに据え、旧サービスを後始末する
    ///
    /// 据え付けが先、旧側の破棄は障壁が空になってから。
    fn install(&mut self, service: ProjectService) -> Result<()> {
        let project_ref = service.to_ref();
        match self.refs.iter_mut().find(|r| r.id == project_ref.id) {
            Some(existing) => *existing = project_ref,
            None => self.refs.push(project_ref),
        }
        let old = self.active.replace(service);
        if let Some(mut old) = old {
            self.volatile.wait_until_clear()?;
            old.destroy()?;
        }
        Ok(())
    }

    /// 既知のプロジェクトをアクティブにする
    ///
    /// 新プロジェクトの初期化が完全に終わるまで旧プロジェクトは
    /// アクティブのまま残る（初期化失敗時は何も変わらない）。
    pub fn load_project(&mut self, project_id: &str) -> Result<()> {
        self.volatile.wait_until_clear()?;
        let project_ref = self
            .find_ref(project_id)
            .cloned()
            .ok_or_else(|| ForgeError::not_found(format!("project `{}`", project_id)))?;
        let service = ProjectService::initialize(self.factory.as_ref(), &project_ref, false)?;
        self.install(service)
    }

    /// 新しいIDでサービスを初期化だけ行う（まだアクティブにしない）
    ///
    /// インポートのように据え付け前の仕込みが必要な経路が使う。失敗時は
    /// アクティブプロジェクトに影響しない。
    pub(crate) fn prepare_project(
        &self,
        storage_type: StorageType,
        name: &str,
    ) -> Result<ProjectService> {
        let project_ref = ProjectRef {
            id: gen_id(),
            name: name.to_string(),
            storage_type,
            last_opened: now_millis(),
        };
        ProjectService::initialize(self.factory.as_ref(), &project_ref, false)
    }

    /// 仕込み済みのサービスをアクティブに据える
    pub(crate) fn install_service(&mut self, service: ProjectService) -> Result<String> {
        self.volatile.wait_until_clear()?;
        let id = service.id().to_string();
        self.install(service)?;
        Ok(id)
    }

    /// 空のプロジェクトを作成してアクティブにする
    pub fn create_project(&mut self, storage_type: StorageType, name: &str) -> Result<String> {
        let service = self.prepare_project(storage_type, name)?;
        self.install_service(service)
    }

    /// 既存ディレクトリをプロジェクトとして開く
    ///
    /// 設定ドキュメントが無い・エントリファイルが複数あるディレクトリは
    /// `Structural` で拒否する。
    pub fn open_project(&mut self, storage_type: StorageType) -> Result<String> {
        self.volatile.wait_until_clear()?;
        let project_ref = ProjectRef {
            id: gen_id(),
            name: String::new(),
            storage_type,
            last_opened: now_millis(),
        };
        let service = ProjectService::initialize(self.factory.as_ref(), &project_ref, true)?;
        let id = project_ref.id.clone();
        self.install(service)?;
        Ok(id)
    }

    /// アクティブプロジェクトを閉じる
    pub fn close_project(&mut self) -> Result<()> {
        self.volatile.wait_until_clear()?;
        if let Some(mut service) = self.active.take() {
            // 一覧の参照に最新の名前・時刻を反映してから閉じる
            let project_ref = service.to_ref();
            if let Some(existing) = self.refs.iter_mut().find(|r| r.id == project_ref.id) {
                *existing = project_ref;
            }
            service.destroy()?;
        }
        Ok(())
    }

    /// プロジェクトを一覧から削除する（アクティブなら先に閉じる）
    pub fn delete_project(&mut self, project_id: &str) -> Result<()> {
        if self.find_ref(project_id).is_none() {
            return Err(ForgeError::not_found(format!("project `{}`", project_id)));
        }
        if self.active_id() == Some(project_id) {
            self.close_project()?;
        }
        self.refs.retain(|r| r.id != project_id);
        Ok(())
    }

    /// アクティブプロジェクトの設定を更新する
    ///
    /// 更新中は揮発アクションとして障壁に載る。
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Result<ProjectSettings> {
        let volatile = self.volatile.clone();
        let service = self
            .active
            .as_mut()
            .ok_or_else(|| ForgeError::state("no active project"))?;
        let _guard = volatile.guard("update-settings");
        let settings = service.update_settings(patch)?;
        let project_ref = service.to_ref();
        if let Some(existing) = self.refs.iter_mut().find(|r| r.id == project_ref.id) {
            *existing = project_ref;
        }
        Ok(settings)
    }

    /// アクティブプロジェクトの名前を変更する
    pub fn rename_project(&mut self, name: &str) -> Result<()> {
        if self.active.is_none() {
            return Err(ForgeError::state("no active project"));
        }
        self.update_settings(&SettingsPatch::rename(name))?;
        Ok(())
    }

    /// アクティブプロジェクトの最終アクセス時刻を更新する
    pub fn touch_active(&mut self) {
        if let Some(service) = &mut self.active {
            service.touch();
            let project_ref = service.to_ref();
            if let Some(existing) = self.refs.iter_mut().find(|r| r.id == project_ref.id) {
                existing.last_opened = project_ref.last_opened;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStorageFactory;

    fn registry() -> ProjectRegistry {
        ProjectRegistry::new(Box::new(MemoryStorageFactory))
    }

    #[test]
    fn create_project_installs_active_and_ref() {
        let mut registry = registry();
        let id = registry.create_project(StorageType::Memory, "My Sketch").unwrap();
        assert_eq!(registry.active_id(), Some(id.as_str()));
        assert_eq!(registry.refs().len(), 1);
        assert_eq!(registry.refs()[0].name, "My Sketch");
    }

    #[test]
    fn switching_projects_keeps_new_active_on_old_teardown() {
        let mut registry = registry();
        let first = registry.create_project(StorageType::Memory, "First").unwrap();
        let second = registry.create_project(StorageType::Memory, "Second").unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.active_id(), Some(second.as_str()));
        assert_eq!(registry.refs().len(), 2);
    }

    #[test]
    fn load_unknown_project_fails_and_preserves_active() {
        let mut registry = registry();
        let id = registry.create_project(StorageType::Memory, "Keep").unwrap();
        let err = registry.load_project("missing").unwrap_err();
        assert!(matches!(err, ForgeError::NotFound { .. }));
        assert_eq!(registry.active_id(), Some(id.as_str()));
    }

    #[test]
    fn volatile_guard_clears_on_drop() {
        let registry = registry();
        assert!(!registry.is_volatile());
        {
            let _guard = registry.volatile().guard("editor:save-file");
            assert!(registry.is_volatile());
        }
        assert!(!registry.is_volatile());
    }

    #[test]
    fn volatile_actions_are_reference_counted_by_name() {
        let volatile = VolatileActions::default();
        volatile.add("save");
        volatile.add("save");
        volatile.remove("save");
        assert!(volatile.is_volatile());
        volatile.remove("save");
        assert!(!volatile.is_volatile());
    }

    #[test]
    fn wait_fails_when_barrier_is_held() {
        let mut registry = registry();
        registry.create_project(StorageType::Memory, "A").unwrap();
        let _guard = registry.volatile().guard("stuck");
        assert!(registry.close_project().is_err());
        // 失敗してもアクティブプロジェクトは残る
        assert!(registry.active().is_some());
    }

    #[test]
    fn rename_project_updates_ref_list() {
        let mut registry = registry();
        registry.create_project(StorageType::Memory, "Old Name").unwrap();
        registry.rename_project("New Name").unwrap();
        assert_eq!(registry.refs()[0].name, "New Name");
        assert_eq!(registry.active().unwrap().name(), "New Name");
    }

    #[test]
    fn subscribers_survive_project_switch() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut registry = registry();
        let seen: Rc<RefCell<Vec<ChangeEvent>>> = Rc::default();
        let sink = seen.clone();
        let id = registry.subscribe(Box::new(move |event| sink.borrow_mut().push(event.clone())));

        registry.create_project(StorageType::Memory, "A").unwrap();
        registry.drain_events(); // 初期化時のイベントを捨てる
        registry
            .active_storage_mut()
            .unwrap()
            .write_file("notes.txt", b"hi")
            .unwrap();
        for event in registry.drain_events() {
            registry.notify_subscribers(&event);
        }
        assert_eq!(seen.borrow().len(), 1);

        // ストレージが差し替わっても同じ購読者が受け続ける
        registry.create_project(StorageType::Memory, "B").unwrap();
        registry.drain_events();
        registry
            .active_storage_mut()
            .unwrap()
            .write_file("more.txt", b"yo")
            .unwrap();
        for event in registry.drain_events() {
            registry.notify_subscribers(&event);
        }
        assert_eq!(seen.borrow().len(), 2);

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
    }

    #[test]
    fn delete_project_removes_ref_and_closes_active() {
        let mut registry = registry();
        let id = registry.create_project(StorageType::Memory, "Doomed").unwrap();
        registry.delete_project(&id).unwrap();
        assert!(registry.refs().is_empty());
        assert!(registry.active().is_none());
    }
}
