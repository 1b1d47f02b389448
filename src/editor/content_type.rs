//! ファイル種別判定
//!
//! 拡張子からコンテントタイプ・エディタ言語・カテゴリを引く。
//! カテゴリがテキスト系でないファイルは生のバイト列のまま扱われ、
//! テキストへのデコードや書き戻しの対象にならない。

/// ファイルのカテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Text,
    Image,
    Video,
    Audio,
}

impl FileCategory {
    pub fn is_text(self) -> bool {
        self == FileCategory::Text
    }
}

struct FileDef {
    exts: &'static [&'static str],
    language: &'static str,
    content_type: &'static str,
    category: FileCategory,
}

const FILE_DEFS: &[FileDef] = &[
    FileDef {
        exts: &["ino"],
        language: "cpp",
        content_type: "text/x-arduino",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["cpp", "cc", "cxx"],
        language: "cpp",
        content_type: "text/x-c++src",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["c"],
        language: "c",
        content_type: "text/x-csrc",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["h", "hpp"],
        language: "cpp",
        content_type: "text/x-c++hdr",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["js"],
        language: "javascript",
        content_type: "text/javascript",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["ts"],
        language: "typescript",
        content_type: "application/typescript",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["json"],
        language: "json",
        content_type: "application/json",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["html"],
        language: "html",
        content_type: "text/html",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["css"],
        language: "css",
        content_type: "text/css",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["md"],
        language: "markdown",
        content_type: "text/markdown",
        category: FileCategory::Text,
    },
    FileDef {
        exts: &["png", "jpg", "jpeg", "gif", "bmp", "webp", "ico"],
        language: "binary",
        content_type: "image/*",
        category: FileCategory::Image,
    },
    FileDef {
        exts: &["mp4", "webm", "mov"],
        language: "binary",
        content_type: "video/*",
        category: FileCategory::Video,
    },
    FileDef {
        exts: &["mp3", "wav", "ogg", "flac"],
        language: "binary",
        content_type: "audio/*",
        category: FileCategory::Audio,
    },
    // 既定値（未知の拡張子はプレーンテキスト扱い）
    FileDef {
        exts: &["txt"],
        language: "plaintext",
        content_type: "text/plain",
        category: FileCategory::Text,
    },
];

fn def_for(file_name: &str) -> &'static FileDef {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_lowercase();
    FILE_DEFS
        .iter()
        .find(|def| def.exts.contains(&ext.as_str()))
        .unwrap_or(&FILE_DEFS[FILE_DEFS.len() - 1])
}

pub fn content_type_from_file_name(file_name: &str) -> &'static str {
    def_for(file_name).content_type
}

pub fn language_from_file_name(file_name: &str) -> &'static str {
    def_for(file_name).language
}

pub fn category_from_file_name(file_name: &str) -> FileCategory {
    def_for(file_name).category
}

pub fn is_text_file(file_name: &str) -> bool {
    category_from_file_name(file_name).is_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ino_is_arduino_text() {
        assert_eq!(content_type_from_file_name("Blink.ino"), "text/x-arduino");
        assert_eq!(language_from_file_name("Blink.ino"), "cpp");
        assert!(is_text_file("Blink.ino"));
    }

    #[test]
    fn unknown_extension_defaults_to_plain_text() {
        assert_eq!(content_type_from_file_name("notes.xyz"), "text/plain");
        assert!(is_text_file("notes.xyz"));
    }

    #[test]
    fn binary_categories_are_not_text() {
        assert_eq!(category_from_file_name("logo.PNG"), FileCategory::Image);
        assert_eq!(category_from_file_name("clip.mp4"), FileCategory::Video);
        assert_eq!(category_from_file_name("beep.wav"), FileCategory::Audio);
        assert!(!is_text_file("logo.png"));
    }
}
