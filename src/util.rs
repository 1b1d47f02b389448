//! 共通ユーティリティ
//!
//! ID生成とタイムスタンプ取得

use rand::{distributions::Alphanumeric, Rng};

/// 衝突耐性のあるプロセス内生成ID（英数字12文字）
pub(crate) fn gen_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// UNIXエポックからのミリ秒
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
