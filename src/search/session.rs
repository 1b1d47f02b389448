//! プロジェクト横断検索セッション
//!
//! 直前の検索結果を覚えておき、クエリが前回の拡張（1文字追記など）の
//! ときは前回ヒットしたファイルだけを走査し直す。インクリメンタル
//! 検索の体感速度のための最適化で、結果の意味は全走査と同じになる
//! 条件のときだけ効かせる。

use std::collections::BTreeSet;

use crate::error::Result;

use super::matcher::{search_text, SearchOptions, SearchResult};

/// プロジェクト全体の検索状態
#[derive(Debug, Default)]
pub struct ProjectSearch {
    last_query: String,
    last_options: Option<SearchOptions>,
    /// 前回ヒットしたファイルのパス集合
    last_hit_files: Option<BTreeSet<String>>,
    /// 前回の走査が全体上限で打ち切られたか
    exceeded_limit: bool,
}

impl ProjectSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// ヒントを適用できる条件
    ///
    /// - 強制再走査でない
    /// - クエリが前回クエリ（非空）の前方拡張
    /// - 単語境界モードでない（境界はクエリ拡張で変わり得る）
    /// - オプションが前回と同一
    /// - 前回が上限打ち切りでない（未走査ファイルが残っている可能性）
    fn hint_applies(&self, query: &str, options: &SearchOptions, force: bool) -> bool {
        !force
            && !self.last_query.is_empty()
            && query.starts_with(&self.last_query)
            && options.word_separators.is_none()
            && self.last_options.as_ref() == Some(options)
            && !self.exceeded_limit
            && self.last_hit_files.is_some()
    }

    /// `files` は (パス, テキスト) の列。走査順がそのまま結果順になる。
    /// `limit` はプロジェクト全体のマッチ上限で、到達した走査は
    /// 打ち切り扱いになり次回のヒントを無効にする。
    pub fn search(
        &mut self,
        files: &[(String, String)],
        query: &str,
        options: &SearchOptions,
        force: bool,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        if query.is_empty() {
            self.reset();
            return Ok(Vec::new());
        }

        let hint = if self.hint_applies(query, options, force) {
            self.last_hit_files.clone()
        } else {
            None
        };

        let mut results = Vec::new();
        let mut hit_files = BTreeSet::new();
        let mut exceeded = false;
        for (path, text) in files {
            if let Some(candidates) = &hint {
                if !candidates.contains(path) {
                    continue;
                }
            }
            let file_results = search_text(path, text, query, options)?;
            if !file_results.is_empty() {
                hit_files.insert(path.clone());
            }
            results.extend(file_results);
            if results.len() >= limit {
                results.truncate(limit);
                exceeded = true;
                break;
            }
        }

        self.last_query = query.to_string();
        self.last_options = Some(options.clone());
        self.last_hit_files = Some(hit_files);
        self.exceeded_limit = exceeded;
        Ok(results)
    }

    /// セッション状態を破棄する。プロジェクト切替時に呼ぶ。
    pub fn reset(&mut self) {
        self.last_query.clear();
        self.last_options = None;
        self.last_hit_files = None;
        self.exceeded_limit = false;
    }
}

#[cfg(test)]
mod tests {
    use super::super::GLOBAL_RESULT_LIMIT;
    use super::*;

    fn files() -> Vec<(String, String)> {
        vec![
            ("a.ino".to_string(), "void setup() {}\nvoid loop() {}".to_string()),
            ("b.cpp".to_string(), "int setupDone = 0;".to_string()),
            ("c.txt".to_string(), "nothing here".to_string()),
        ]
    }

    #[test]
    fn searches_all_files_in_order() {
        let mut session = ProjectSearch::new();
        let results = session
            .search(&files(), "setup", &SearchOptions::default(), false, GLOBAL_RESULT_LIMIT)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].path, "a.ino");
        assert_eq!(results[1].path, "b.cpp");
    }

    #[test]
    fn prefix_extension_narrows_to_previous_hits() {
        let mut session = ProjectSearch::new();
        let options = SearchOptions::default();
        session
            .search(&files(), "setup", &options, false, GLOBAL_RESULT_LIMIT)
            .unwrap();

        // 前回 "c.txt" にはヒットなし。拡張クエリでは走査対象外になるので
        // ヒント有効時に c.txt の内容が変わってもヒットしない
        let mut changed = files();
        changed[2].1 = "setupDone appears now".to_string();
        let results = session
            .search(&changed, "setupD", &options, false, GLOBAL_RESULT_LIMIT)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "b.cpp");
    }

    #[test]
    fn force_rescans_everything() {
        let mut session = ProjectSearch::new();
        let options = SearchOptions::default();
        session
            .search(&files(), "setup", &options, false, GLOBAL_RESULT_LIMIT)
            .unwrap();

        let mut changed = files();
        changed[2].1 = "setupDone appears now".to_string();
        let results = session
            .search(&changed, "setupD", &options, true, GLOBAL_RESULT_LIMIT)
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn option_change_invalidates_hint() {
        let mut session = ProjectSearch::new();
        session
            .search(&files(), "setup", &SearchOptions::default(), false, GLOBAL_RESULT_LIMIT)
            .unwrap();

        let cased = SearchOptions {
            match_case: true,
            ..SearchOptions::default()
        };
        let mut changed = files();
        changed[2].1 = "setupDone appears now".to_string();
        let results = session
            .search(&changed, "setupD", &cased, false, GLOBAL_RESULT_LIMIT)
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn word_separator_mode_never_uses_hint() {
        let mut session = ProjectSearch::new();
        let options = SearchOptions {
            word_separators: Some(super::super::DEFAULT_WORD_SEPARATORS.to_string()),
            ..SearchOptions::default()
        };
        // "loop(" は境界あり、"setupDone" は境界なし
        session
            .search(&files(), "loop", &options, false, GLOBAL_RESULT_LIMIT)
            .unwrap();
        assert!(!session.hint_applies("loops", &options, false));
    }

    #[test]
    fn non_prefix_query_rescans() {
        let mut session = ProjectSearch::new();
        let options = SearchOptions::default();
        session
            .search(&files(), "setup", &options, false, GLOBAL_RESULT_LIMIT)
            .unwrap();
        assert!(!session.hint_applies("loop", &options, false));
    }

    #[test]
    fn empty_query_clears_session() {
        let mut session = ProjectSearch::new();
        let options = SearchOptions::default();
        session
            .search(&files(), "setup", &options, false, GLOBAL_RESULT_LIMIT)
            .unwrap();
        let results = session
            .search(&files(), "", &options, false, GLOBAL_RESULT_LIMIT)
            .unwrap();
        assert!(results.is_empty());
        assert!(!session.hint_applies("setup", &options, false));
    }

    #[test]
    fn reset_discards_hint_state() {
        let mut session = ProjectSearch::new();
        let options = SearchOptions::default();
        session
            .search(&files(), "setup", &options, false, GLOBAL_RESULT_LIMIT)
            .unwrap();
        session.reset();
        assert!(!session.hint_applies("setups", &options, false));
    }

    #[test]
    fn small_limit_truncates_and_disables_hint() {
        let mut session = ProjectSearch::new();
        let options = SearchOptions::default();
        let results = session.search(&files(), "setup", &options, false, 1).unwrap();
        assert_eq!(results.len(), 1);
        // 打ち切られた走査には未走査ファイルが残るので、前方拡張でも
        // ヒントは効かず全体を走査し直す
        assert!(!session.hint_applies("setups", &options, false));
        let mut changed = files();
        changed[2].1 = "setupDone appears now".to_string();
        let results = session
            .search(&changed, "setupD", &options, false, GLOBAL_RESULT_LIMIT)
            .unwrap();
        assert_eq!(results.len(), 2);
    }
}
