//! inoforge - プロジェクトストレージとエディタモデル同期層
//!
//! ブラウザ常駐IDEの中核。プラガブルな永続ファイルストア、編集中の
//! インメモリバッファキャッシュ、タブ／ビュー状態という独立に変化する
//! 3つの表現を、変更イベント駆動で整合させる。

// コアモジュール
pub mod error;
pub mod store;

// プロジェクト層
pub mod project;
pub mod settings;

// 編集層
pub mod editor;
pub mod search;
pub mod tabs;

// アプリケーション統合
pub mod workspace;

mod util;

// 公開API
pub use error::{ForgeError, Result};
pub use workspace::Workspace;
