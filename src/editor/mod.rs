//! 編集層
//!
//! ファイル種別判定とエディタモデル（編集バッファ）キャッシュ

pub mod content_type;
pub mod models;

pub use content_type::{category_from_file_name, is_text_file, FileCategory};
pub use models::{EditorModels, ModelKey, ViewState};
