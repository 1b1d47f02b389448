//! 検索
//!
//! バッファ単位のマッチングと、ヒント最適化つきの
//! プロジェクト横断検索セッション

pub mod matcher;
pub mod session;

pub use matcher::{search_text, MatchRange, SearchOptions, SearchResult};
pub use session::ProjectSearch;

/// 単語区切りとして扱う文字集合（エディタウィジェット互換）
pub const DEFAULT_WORD_SEPARATORS: &str = "~!@#$%^&*()=+[{]}|;:,.<>?/";

/// 1ファイルあたりの既定マッチ上限
pub const DEFAULT_RESULT_LIMIT: usize = 100;

/// プロジェクト全体の既定マッチ上限
pub const GLOBAL_RESULT_LIMIT: usize = 20_000;
