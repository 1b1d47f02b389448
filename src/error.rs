//! クレート共通のエラー型
//!
//! 設定・プロジェクト構造・ストレージ操作・状態遷移のエラー分類

use thiserror::Error;

/// クレート共通のResult型
pub type Result<T> = std::result::Result<T, ForgeError>;

/// inoforgeのエラー分類
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForgeError {
    /// 設定ドキュメントの検証失敗（書き込みは行われない）
    #[error("invalid settings: {message}")]
    Validation { message: String },

    /// プロジェクト構造の破損（複数エントリファイル等、ロードは中断される）
    #[error("project structure error: {message}")]
    Structural { message: String },

    /// 対象が存在しない（パス・プロジェクト・タブ）
    #[error("not found: {what}")]
    NotFound { what: String },

    /// ストレージバックエンドのI/O失敗
    #[error("io error during {operation} on `{path}`: {message}")]
    Io {
        operation: String,
        path: String,
        message: String,
    },

    /// 現在の状態では許可されない操作
    #[error("invalid state: {message}")]
    State { message: String },
}

impl ForgeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn io(
        operation: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }
}
