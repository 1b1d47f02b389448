//! タブ／ビュー状態
//!
//! 開いているエディタビューとファイルの対応を保持する。タブの実体は
//! プロジェクト横断で1つのリストに持ち、表示時にアクティブプロジェクト
//! で絞り込む。1プロジェクトにつきカレントタブは常に1つ（リストが
//! 空のときのみ0）。空のときはプレースホルダタブを合成する。

use log::debug;

use crate::error::{ForgeError, Result};
use crate::store::{file_name, normalize_path, ChangeAction, ChangeEvent, FileStore};
use crate::util::gen_id;

/// タブの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabKind {
    /// ファイルを開くタブ。`path` が必須
    File,
    /// プロジェクト設定パネル
    Settings,
    /// アクティブプロジェクトが無いときに合成される
    Welcome,
    /// プロジェクトにタブが1つも無いときに合成される
    StartProject,
}

impl TabKind {
    /// ユーザー操作で作成できる種別か（合成専用タブは作れない）
    fn is_creatable(self) -> bool {
        matches!(self, TabKind::File | TabKind::Settings)
    }
}

/// 1つのタブ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTab {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub kind: TabKind,
    pub path: Option<String>,
    pub is_current: bool,
    /// プレビュー表示（シングルクリックで開いた仮のタブ）
    pub is_temporary: bool,
}

impl ProjectTab {
    fn synthesized(id: &str, name: &str, kind: TabKind) -> Self {
        Self {
            id: id.to_string(),
            project_id: String::new(),
            name: name.to_string(),
            kind,
            path: None,
            is_current: true,
            is_temporary: false,
        }
    }
}

/// 全タブの保持と操作
#[derive(Debug, Default)]
pub struct TabState {
    tabs: Vec<ProjectTab>,
}

impl TabState {
    pub fn new() -> Self {
        Self::default()
    }

    /// アクティブプロジェクトの表示タブ一覧
    ///
    /// プロジェクトが無ければWelcome、タブが空ならStartProjectの
    /// プレースホルダを合成する。合成タブは保持されない。
    pub fn project_tabs(&self, active_project_id: Option<&str>) -> Vec<ProjectTab> {
        let Some(project_id) = active_project_id else {
            return vec![ProjectTab::synthesized("welcome", "Welcome", TabKind::Welcome)];
        };
        let tabs: Vec<ProjectTab> = self
            .tabs
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        if tabs.is_empty() {
            return vec![ProjectTab::synthesized(
                "start-project",
                "Start Project",
                TabKind::StartProject,
            )];
        }
        tabs
    }

    pub fn current_tab(&self, project_id: &str) -> Option<&ProjectTab> {
        self.tabs
            .iter()
            .find(|t| t.project_id == project_id && t.is_current)
    }

    fn find_tab(&self, project_id: &str, tab_id: &str) -> Option<usize> {
        self.tabs
            .iter()
            .position(|t| t.project_id == project_id && t.id == tab_id)
    }

    /// タブを作成してカレントにする
    ///
    /// 同一プロジェクト内の (種別, パス) で重複排除し、既存タブが
    /// あればそれを選択し直す。ファイルタブは対象が存在する通常
    /// ファイルであることを検証する。
    pub fn add_tab(
        &mut self,
        store: &dyn FileStore,
        project_id: &str,
        kind: TabKind,
        name: &str,
        path: Option<&str>,
    ) -> Result<String> {
        if !kind.is_creatable() {
            return Err(ForgeError::state(format!(
                "tab kind {:?} cannot be created explicitly",
                kind
            )));
        }
        let path = path.map(normalize_path);
        if kind == TabKind::File {
            let Some(path) = &path else {
                return Err(ForgeError::validation("file tab requires a path"));
            };
            let stat = store
                .stat(path)?
                .ok_or_else(|| ForgeError::not_found(format!("file `{}`", path)))?;
            if !stat.is_file {
                return Err(ForgeError::validation(format!("`{}` is not a file", path)));
            }
        }

        if let Some(existing) = self
            .tabs
            .iter()
            .find(|t| t.project_id == project_id && t.kind == kind && t.path == path)
        {
            let id = existing.id.clone();
            self.select_tab(project_id, &id)?;
            return Ok(id);
        }

        let tab = ProjectTab {
            id: gen_id(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            kind,
            path,
            is_current: false,
            is_temporary: false,
        };
        let id = tab.id.clone();
        self.tabs.push(tab);
        self.select_tab(project_id, &id)?;
        Ok(id)
    }

    /// ファイルを開く（タブ名はファイル名）
    pub fn open_file_tab(
        &mut self,
        store: &dyn FileStore,
        project_id: &str,
        path: &str,
    ) -> Result<String> {
        let name = file_name(&normalize_path(path)).to_string();
        self.add_tab(store, project_id, TabKind::File, &name, Some(path))
    }

    /// 設定パネルを開く（プロジェクトにつき1つ）
    pub fn open_settings_tab(&mut self, store: &dyn FileStore, project_id: &str) -> Result<String> {
        self.add_tab(store, project_id, TabKind::Settings, "Settings", None)
    }

    /// カレントタブを切り替える。同一プロジェクト内の他タブの
    /// カレントフラグは全て落とす
    pub fn select_tab(&mut self, project_id: &str, tab_id: &str) -> Result<()> {
        if self.find_tab(project_id, tab_id).is_none() {
            return Err(ForgeError::not_found(format!("tab `{}`", tab_id)));
        }
        for tab in self.tabs.iter_mut().filter(|t| t.project_id == project_id) {
            tab.is_current = tab.id == tab_id;
        }
        Ok(())
    }

    /// タブを閉じる
    ///
    /// カレントタブを閉じる場合は、閉じる前に隣のタブ（前を優先、
    /// 無ければ次）をカレントに昇格させる。
    pub fn close_tab(&mut self, project_id: &str, tab_id: &str) -> Result<()> {
        let index = self
            .find_tab(project_id, tab_id)
            .ok_or_else(|| ForgeError::not_found(format!("tab `{}`", tab_id)))?;

        if self.tabs[index].is_current {
            let siblings: Vec<usize> = self
                .tabs
                .iter()
                .enumerate()
                .filter(|(i, t)| t.project_id == project_id && *i != index)
                .map(|(i, _)| i)
                .collect();
            let promoted = siblings
                .iter()
                .rev()
                .find(|&&i| i < index)
                .or_else(|| siblings.iter().find(|&&i| i > index));
            if let Some(&i) = promoted {
                self.tabs[i].is_current = true;
            }
        }
        self.tabs.remove(index);
        Ok(())
    }

    /// 仮タブを確定タブへ昇格（またはその逆）
    pub fn toggle_temporary(&mut self, project_id: &str, tab_id: &str) -> Result<bool> {
        let index = self
            .find_tab(project_id, tab_id)
            .ok_or_else(|| ForgeError::not_found(format!("tab `{}`", tab_id)))?;
        self.tabs[index].is_temporary = !self.tabs[index].is_temporary;
        Ok(self.tabs[index].is_temporary)
    }

    /// ストアの変更イベントを反映する
    ///
    /// 削除は該当ファイルタブを閉じ、改名はタブ名とパスをその場で
    /// 更新する。
    pub fn handle_change(&mut self, project_id: &str, event: &ChangeEvent) -> Result<()> {
        match event.action {
            ChangeAction::Created | ChangeAction::Modified => Ok(()),
            ChangeAction::Deleted => {
                let doomed: Vec<String> = self
                    .tabs
                    .iter()
                    .filter(|t| {
                        t.project_id == project_id
                            && t.kind == TabKind::File
                            && t.path.as_deref() == Some(event.path.as_str())
                    })
                    .map(|t| t.id.clone())
                    .collect();
                for id in doomed {
                    debug!("closing tab for deleted file: {}", event.path);
                    self.close_tab(project_id, &id)?;
                }
                Ok(())
            }
            ChangeAction::Renamed => {
                let Some(old_path) = &event.old_path else {
                    return Ok(());
                };
                for tab in self.tabs.iter_mut().filter(|t| {
                    t.project_id == project_id
                        && t.kind == TabKind::File
                        && t.path.as_deref() == Some(old_path.as_str())
                }) {
                    tab.path = Some(event.path.clone());
                    tab.name = file_name(&event.path).to_string();
                }
                Ok(())
            }
        }
    }

    /// プロジェクト有効化時の整合化
    ///
    /// 実体の無くなったファイルのタブを閉じ、タブが1つも残らなければ
    /// エントリファイルを自動で開く。
    pub fn reconcile(
        &mut self,
        store: &dyn FileStore,
        project_id: &str,
        entry_file: &str,
    ) -> Result<()> {
        let stale: Vec<String> = self
            .tabs
            .iter()
            .filter(|t| t.project_id == project_id && t.kind == TabKind::File)
            .filter_map(|t| {
                let path = t.path.as_deref()?;
                match store.exists(path) {
                    Ok(true) => None,
                    _ => Some(t.id.clone()),
                }
            })
            .collect();
        for id in stale {
            self.close_tab(project_id, &id)?;
        }

        if !self.tabs.iter().any(|t| t.project_id == project_id) && store.exists(entry_file)? {
            self.open_file_tab(store, project_id, entry_file)?;
        }
        Ok(())
    }

    /// プロジェクトの全タブを破棄する（プロジェクト削除時）
    pub fn drop_project_tabs(&mut self, project_id: &str) {
        self.tabs.retain(|t| t.project_id != project_id);
    }
}
