//! エディタモデルキャッシュ
//!
//! (プロジェクトID, 正規化パス) をキーに編集バッファを保持する。
//! 初回アクセス時にストアから遅延ロードし、編集はペンディング集合に
//! 積んでデバウンス書き戻しする。ストアの変更イベント（削除・改名）
//! に応じてバッファを破棄・移送し、プロジェクト横断検索も提供する。

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::error::{ForgeError, Result};
use crate::project::VolatileActions;
use crate::search::{search_text, ProjectSearch, SearchOptions, SearchResult};
use crate::store::{file_name, normalize_path, ChangeAction, ChangeEvent, FileStore};

use super::content_type::{is_text_file, language_from_file_name};

/// 書き戻しの静穏間隔の既定値
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// デバウンス書き戻し中に障壁へ載せるトークン名
const FLUSH_ACTION: &str = "editor:flush-pending";

/// プロジェクト内部ディレクトリ（設定置き場）。検索・一括ロードの対象外
const INTERNAL_DIR: &str = ".duinoapp";

/// バッファのキー
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelKey {
    pub project_id: String,
    pub path: String,
}

impl ModelKey {
    pub fn new(project_id: &str, path: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            path: normalize_path(path),
        }
    }
}

/// エディタウィジェットの表示状態（カーソル・スクロール位置）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewState {
    pub cursor_line: usize,
    pub cursor_column: usize,
    pub scroll_top: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelContent {
    Text(String),
    /// テキスト系でないファイルはデコードせず生バイト列のまま追跡する
    Raw(Vec<u8>),
}

/// 1ファイル分の編集バッファ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorModel {
    path: String,
    content: ModelContent,
    view_state: Option<ViewState>,
}

impl EditorModel {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            ModelContent::Text(text) => Some(text),
            ModelContent::Raw(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.content, ModelContent::Text(_))
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.content {
            ModelContent::Text(text) => text.as_bytes(),
            ModelContent::Raw(bytes) => bytes,
        }
    }

    pub fn language(&self) -> &'static str {
        language_from_file_name(file_name(&self.path))
    }

    pub fn view_state(&self) -> Option<ViewState> {
        self.view_state
    }
}

/// バッファキャッシュ本体
pub struct EditorModels {
    models: BTreeMap<ModelKey, EditorModel>,
    pending: BTreeSet<ModelKey>,
    last_edit: Option<Instant>,
    debounce: Duration,
    volatile: VolatileActions,
    /// イベント処理の直列化ゲート。処理中の再入はキューに積む
    handling_events: bool,
    queued_events: VecDeque<ChangeEvent>,
    /// デバウンス書き戻しの失敗はタイマ起点で呼び出し元が居ないため、
    /// 例外にせずこのスロットに残す
    last_error: Option<ForgeError>,
    search: ProjectSearch,
    /// 全ファイルロード済みのプロジェクトID
    loaded_project: Option<String>,
}

impl EditorModels {
    pub fn new(volatile: VolatileActions) -> Self {
        Self {
            models: BTreeMap::new(),
            pending: BTreeSet::new(),
            last_edit: None,
            debounce: SAVE_DEBOUNCE,
            volatile,
            handling_events: false,
            queued_events: VecDeque::new(),
            last_error: None,
            search: ProjectSearch::new(),
            loaded_project: None,
        }
    }

    /// キャッシュ済みのバッファ
    pub fn model(&self, project_id: &str, path: &str) -> Option<&EditorModel> {
        self.models.get(&ModelKey::new(project_id, path))
    }

    /// バッファを取得する（無ければストアからロードして作る）
    ///
    /// `force_reload` はテキストバッファの内容をストアから読み直す。
    /// キャッシュ外で書き込まれたファイルとの再同期に使う。
    pub fn get_model(
        &mut self,
        store: &dyn FileStore,
        project_id: &str,
        path: &str,
        force_reload: bool,
    ) -> Result<&EditorModel> {
        let key = ModelKey::new(project_id, path);
        if let Some(model) = self.models.get_mut(&key) {
            if force_reload && model.is_text() {
                model.content = ModelContent::Text(store.read_text(&key.path)?);
            }
        } else {
            let model = Self::load_model(store, &key.path)?;
            self.models.insert(key.clone(), model);
        }
        self.models
            .get(&key)
            .ok_or_else(|| ForgeError::state("model cache out of sync"))
    }

    fn load_model(store: &dyn FileStore, path: &str) -> Result<EditorModel> {
        let bytes = store.read_file(path)?;
        let content = if is_text_file(file_name(path)) {
            ModelContent::Text(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            ModelContent::Raw(bytes)
        };
        Ok(EditorModel {
            path: path.to_string(),
            content,
            view_state: None,
        })
    }

    /// エディタウィジェット側で既に開いているバッファを取り込む。
    /// プロジェクト切替時の再ロード回避に使う（内容は読み直さない）
    pub fn adopt_model(&mut self, project_id: &str, path: &str, text: &str) {
        let key = ModelKey::new(project_id, path);
        self.models.entry(key).or_insert_with(|| EditorModel {
            path: normalize_path(path),
            content: ModelContent::Text(text.to_string()),
            view_state: None,
        });
    }

    /// バッファの内容を差し替え、書き戻し待ちにする
    pub fn update_content(
        &mut self,
        project_id: &str,
        path: &str,
        text: &str,
        now: Instant,
    ) -> Result<()> {
        let key = ModelKey::new(project_id, path);
        let model = self
            .models
            .get_mut(&key)
            .ok_or_else(|| ForgeError::not_found(format!("model `{}`", key.path)))?;
        if !model.is_text() {
            return Err(ForgeError::state(format!(
                "`{}` is not a text buffer",
                key.path
            )));
        }
        model.content = ModelContent::Text(text.to_string());
        self.pending.insert(key);
        self.last_edit = Some(now);
        Ok(())
    }

    pub fn save_view_state(&mut self, project_id: &str, path: &str, state: ViewState) {
        let key = ModelKey::new(project_id, path);
        if let Some(model) = self.models.get_mut(&key) {
            model.view_state = Some(state);
        }
    }

    pub fn is_pending(&self, project_id: &str, path: &str) -> bool {
        self.pending.contains(&ModelKey::new(project_id, path))
    }

    /// バッファと付随状態（表示状態・ペンディング印）を破棄する
    pub fn dispose_model(&mut self, project_id: &str, path: &str) {
        let key = ModelKey::new(project_id, path);
        self.models.remove(&key);
        self.pending.remove(&key);
    }

    /// ストアの変更イベントを反映する
    ///
    /// 処理は1件ずつ直列化される。処理ループの最中に届いたイベントは
    /// キューに積まれ、入れ子にならずに同じループが順に消化する。
    pub fn handle_change(
        &mut self,
        store: &dyn FileStore,
        project_id: &str,
        event: ChangeEvent,
    ) -> Result<()> {
        self.queued_events.push_back(event);
        if self.handling_events {
            return Ok(());
        }
        self.handling_events = true;
        let result = self.drain_queued(store, project_id);
        self.handling_events = false;
        result
    }

    fn drain_queued(&mut self, store: &dyn FileStore, project_id: &str) -> Result<()> {
        while let Some(event) = self.queued_events.pop_front() {
            self.apply_change(store, project_id, &event)?;
        }
        Ok(())
    }

    fn apply_change(
        &mut self,
        store: &dyn FileStore,
        project_id: &str,
        event: &ChangeEvent,
    ) -> Result<()> {
        match event.action {
            // キャッシュは自分の書き込みの成果を既に持っている。外部書き込みは
            // 呼び出し側の force_reload で再同期する
            ChangeAction::Created | ChangeAction::Modified => Ok(()),
            ChangeAction::Deleted => {
                debug!("disposing deleted buffer: {}", event.path);
                self.dispose_model(project_id, &event.path);
                Ok(())
            }
            ChangeAction::Renamed => {
                let Some(old_path) = &event.old_path else {
                    warn!("renamed event without old path: {}", event.path);
                    return Ok(());
                };
                self.apply_rename(store, project_id, old_path, &event.path)
            }
        }
    }

    /// 改名：新パスのバッファを用意し、内容・表示状態・ペンディング印を
    /// 旧キーから引き継いでから旧キーを破棄する
    fn apply_rename(
        &mut self,
        store: &dyn FileStore,
        project_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<()> {
        let old_key = ModelKey::new(project_id, old_path);
        let new_key = ModelKey::new(project_id, new_path);
        let was_pending = self.pending.remove(&old_key);

        if let Some(mut model) = self.models.remove(&old_key) {
            // 未書き戻しの編集を失わないよう、内容ごと移送する
            model.path = new_key.path.clone();
            self.models.insert(new_key.clone(), model);
        } else if store.exists(&new_key.path)? {
            let model = Self::load_model(store, &new_key.path)?;
            self.models.insert(new_key.clone(), model);
        }

        if was_pending {
            self.pending.insert(new_key);
        }
        Ok(())
    }

    /// プロジェクト切替：旧プロジェクトのバッファを全て破棄する
    pub fn handle_project_switch(&mut self, old_project_id: &str) {
        self.models.retain(|key, _| key.project_id != old_project_id);
        self.pending.retain(|key| key.project_id != old_project_id);
        if self.loaded_project.as_deref() == Some(old_project_id) {
            self.loaded_project = None;
        }
        self.search.reset();
    }

    /// プロジェクトの全ファイルをバッファとしてロードする（検索の前提）
    pub fn load_entire_project(&mut self, store: &dyn FileStore, project_id: &str) -> Result<()> {
        if self.loaded_project.as_deref() == Some(project_id) {
            return Ok(());
        }
        for (path, stat) in store.list("", true)? {
            if !stat.is_file || is_internal_path(&path) {
                continue;
            }
            self.get_model(store, project_id, &path, false)?;
        }
        self.loaded_project = Some(project_id.to_string());
        Ok(())
    }

    /// 静穏間隔が経過していればペンディングを書き戻す
    pub fn flush_due(&mut self, store: &mut dyn FileStore, active_project_id: &str, now: Instant) {
        let Some(last_edit) = self.last_edit else {
            return;
        };
        if now.duration_since(last_edit) < self.debounce {
            return;
        }
        self.flush_pending(store, active_project_id);
    }

    /// ペンディング集合を即時に書き戻す
    ///
    /// 集合はスナップショットして空にしてから書き始める。書き込み中に
    /// 届いた編集は次のデバウンス窓を張り直す。失敗は `last_error` に
    /// 残し、障壁トークンは失敗しても必ず解放される。
    pub fn flush_pending(&mut self, store: &mut dyn FileStore, active_project_id: &str) {
        let _guard = self.volatile.guard(FLUSH_ACTION);
        let drained = std::mem::take(&mut self.pending);
        self.last_edit = None;

        for key in drained {
            if key.project_id != active_project_id {
                continue;
            }
            let Some(text) = self.models.get(&key).and_then(|m| m.text()) else {
                continue;
            };
            if let Err(err) = store.write_file(&key.path, text.as_bytes()) {
                error!("pending save failed for {}: {}", key.path, err);
                self.last_error = Some(err);
            }
        }
    }

    /// 最後の書き戻し失敗を取り出す（表示用スロット）
    pub fn take_last_error(&mut self) -> Option<ForgeError> {
        self.last_error.take()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// 1バッファ内の検索
    pub fn search_model(
        &mut self,
        store: &dyn FileStore,
        project_id: &str,
        path: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let model = self.get_model(store, project_id, path, false)?;
        let path = model.path().to_string();
        match model.text() {
            Some(text) => search_text(&path, text, query, options),
            None => Ok(Vec::new()),
        }
    }

    /// プロジェクト横断検索
    ///
    /// 全ファイルをロードしてからパス順に走査する。内部ディレクトリは
    /// 対象外。クエリが前回の前方拡張なら前回ヒットしたファイルだけを
    /// 走査し直す（`force` で全走査を強制）。`limit` はプロジェクト
    /// 全体のマッチ上限（通常は `GLOBAL_RESULT_LIMIT`）。
    pub fn search_project(
        &mut self,
        store: &dyn FileStore,
        project_id: &str,
        query: &str,
        options: &SearchOptions,
        force: bool,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.load_entire_project(store, project_id)?;
        let files: Vec<(String, String)> = self
            .models
            .iter()
            .filter(|(key, _)| key.project_id == project_id && !is_internal_path(&key.path))
            .filter_map(|(key, model)| model.text().map(|t| (key.path.clone(), t.to_string())))
            .collect();
        self.search.search(&files, query, options, force, limit)
    }
}

fn is_internal_path(path: &str) -> bool {
    path == INTERNAL_DIR || path.starts_with(&format!("{}/", INTERNAL_DIR))
}
