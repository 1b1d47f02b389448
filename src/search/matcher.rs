//! バッファ内容のマッチング
//!
//! クエリからパターンを組み立て、行・桁つきのマッチ範囲を返す。
//! リテラル／正規表現、大文字小文字、単語境界の各モードに対応する。

use regex::Regex;

use crate::error::{ForgeError, Result};

use super::DEFAULT_RESULT_LIMIT;

/// 検索オプション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// クエリを正規表現として解釈する
    pub is_regex: bool,
    pub match_case: bool,
    /// `Some` なら単語境界モード。値は区切りとみなす文字集合
    pub word_separators: Option<String>,
    /// キャプチャグループの文字列も返す
    pub capture_matches: bool,
    /// 1回の検索で返すマッチ数の上限
    pub limit_result_count: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            is_regex: false,
            match_case: false,
            word_separators: None,
            capture_matches: false,
            limit_result_count: DEFAULT_RESULT_LIMIT,
        }
    }
}

/// マッチ範囲（1始まり、エディタウィジェット互換）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRange {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

/// 1件のマッチ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub path: String,
    pub range: MatchRange,
    /// `capture_matches` 時のみ。先頭はマッチ全体
    pub matches: Option<Vec<String>>,
    /// マッチ範囲を覆う行のテキスト
    pub lines: Vec<String>,
}

fn build_regex(query: &str, options: &SearchOptions) -> Result<Regex> {
    let body = if options.is_regex {
        query.to_string()
    } else {
        regex::escape(query)
    };
    let pattern = if options.match_case {
        format!("(?m){}", body)
    } else {
        format!("(?mi){}", body)
    };
    Regex::new(&pattern).map_err(|e| ForgeError::validation(format!("invalid search query: {}", e)))
}

/// 区切り文字・空白・テキスト端を単語境界とみなす
fn at_word_boundary(text: &str, start: usize, end: usize, separators: &str) -> bool {
    let is_boundary = |ch: Option<char>| match ch {
        None => true,
        Some(c) => c.is_whitespace() || separators.contains(c),
    };
    is_boundary(text[..start].chars().next_back()) && is_boundary(text[end..].chars().next())
}

/// バイトオフセットを (行, 桁) に変換（1始まり、桁は文字単位）
fn position_of(text: &str, line_starts: &[usize], offset: usize) -> (usize, usize) {
    let line_idx = match line_starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i - 1,
    };
    let column = text[line_starts[line_idx]..offset].chars().count() + 1;
    (line_idx + 1, column)
}

/// テキストからマッチ範囲を列挙する
///
/// 結果は出現順。`options.limit_result_count` で打ち切る。
pub fn search_text(
    path: &str,
    text: &str,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let regex = build_regex(query, options)?;

    let mut line_starts = vec![0usize];
    for (idx, byte) in text.bytes().enumerate() {
        if byte == b'\n' {
            line_starts.push(idx + 1);
        }
    }
    let all_lines: Vec<&str> = text.split('\n').collect();

    let mut results = Vec::new();
    for captures in regex.captures_iter(text) {
        if results.len() >= options.limit_result_count {
            break;
        }
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() == whole.end() {
            continue; // 空マッチは範囲を成さない
        }
        if let Some(separators) = &options.word_separators {
            if !at_word_boundary(text, whole.start(), whole.end(), separators) {
                continue;
            }
        }

        let (start_line, start_column) = position_of(text, &line_starts, whole.start());
        let (end_line, end_column) = position_of(text, &line_starts, whole.end());
        let lines = all_lines[start_line - 1..end_line]
            .iter()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        let matches = options.capture_matches.then(|| {
            captures
                .iter()
                .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect()
        });

        results.push(SearchResult {
            path: path.to_string(),
            range: MatchRange {
                start_line,
                start_column,
                end_line,
                end_column,
            },
            matches,
            lines,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::DEFAULT_WORD_SEPARATORS;

    fn opts() -> SearchOptions {
        SearchOptions::default()
    }

    #[test]
    fn finds_matches_with_line_and_column() {
        let text = "int x = 1;\nint y = x + x;\n";
        let results = search_text("a.ino", text, "x", &opts()).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].range.start_line, 1);
        assert_eq!(results[0].range.start_column, 5);
        assert_eq!(results[1].range.start_line, 2);
        assert_eq!(results[0].lines, vec!["int x = 1;".to_string()]);
    }

    #[test]
    fn literal_query_escapes_regex_metacharacters() {
        let results = search_text("a.txt", "price is $1.50", "$1.50", &opts()).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn case_sensitivity_is_honored() {
        let text = "Foo foo FOO";
        assert_eq!(search_text("t", text, "foo", &opts()).unwrap().len(), 3);
        let cased = SearchOptions {
            match_case: true,
            ..opts()
        };
        assert_eq!(search_text("t", text, "foo", &cased).unwrap().len(), 1);
    }

    #[test]
    fn word_separator_mode_requires_boundaries() {
        let text = "loop() looped pool.loop";
        let whole_word = SearchOptions {
            word_separators: Some(DEFAULT_WORD_SEPARATORS.to_string()),
            ..opts()
        };
        let results = search_text("t", text, "loop", &whole_word).unwrap();
        // "loop(" と ".loop" は境界、"looped"/"pool" は不一致
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn regex_mode_with_captures() {
        let text = "pinMode(13, OUTPUT);\npinMode(7, INPUT);";
        let options = SearchOptions {
            is_regex: true,
            capture_matches: true,
            ..opts()
        };
        let results = search_text("t", text, r"pinMode\((\d+),", &options).unwrap();
        assert_eq!(results.len(), 2);
        let captures = results[0].matches.as_ref().unwrap();
        assert_eq!(captures[1], "13");
    }

    #[test]
    fn invalid_regex_surfaces_validation_error() {
        let options = SearchOptions {
            is_regex: true,
            ..opts()
        };
        assert!(search_text("t", "text", "(unclosed", &options).is_err());
    }

    #[test]
    fn limit_caps_result_count() {
        let text = "a a a a a";
        let options = SearchOptions {
            limit_result_count: 2,
            ..opts()
        };
        assert_eq!(search_text("t", text, "a", &options).unwrap().len(), 2);
    }

    #[test]
    fn multiline_match_carries_covering_lines() {
        let text = "begin\nmiddle\nend";
        let options = SearchOptions {
            is_regex: true,
            ..opts()
        };
        let results = search_text("t", text, r"middle\nend", &options).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].range.start_line, 2);
        assert_eq!(results[0].range.end_line, 3);
        assert_eq!(
            results[0].lines,
            vec!["middle".to_string(), "end".to_string()]
        );
    }
}
