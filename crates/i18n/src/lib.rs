use std::collections::BTreeMap;

use core_types::{ErrorCode, UiLanguage};

/// `(key, zh_cn, en_us)`.
const MESSAGES: &[(&str, &str, &str)] = &[
    ("code.success", "成功", "Success"),
    ("code.param_error", "参数错误", "Invalid parameters"),
    ("code.param_required", "缺少必要参数", "Missing required parameter"),
    ("code.param_invalid", "参数格式无效", "Malformed parameter"),
    (
        "code.title_duplicate",
        "该标题已存在，请使用其他标题",
        "This title already exists, please choose another",
    ),
    (
        "code.article_has_children",
        "该文章存在子文章无法删除。",
        "This article has child articles and cannot be deleted.",
    ),
    ("code.article_not_exist", "文章不存在", "Article does not exist"),
    ("code.resource_not_found", "资源不存在", "Resource not found"),
    ("code.resource_existed", "资源已存在", "Resource already exists"),
    ("code.upload_not_found", "上传文件不存在", "Uploaded file not found"),
    ("code.upload_too_large", "文件大小超过50MB限制", "File exceeds the 50MB limit"),
    ("code.system_error", "系统异常", "System error"),
    ("code.database_error", "数据库错误", "Database error"),
    ("code.network_error", "网络错误", "Network error"),
    ("asset.deleted", "删除成功", "Deleted"),
];

/// Envelope message catalog for one language.
#[derive(Debug, Clone)]
pub struct I18n {
    lang: UiLanguage,
    messages: BTreeMap<&'static str, (&'static str, &'static str)>,
}

impl I18n {
    pub fn new(lang: UiLanguage) -> Self {
        Self {
            lang,
            messages: MESSAGES
                .iter()
                .map(|&(key, zh_cn, en_us)| (key, (zh_cn, en_us)))
                .collect(),
        }
    }

    /// The text for `key`, or the key itself when it is not in the catalog.
    pub fn t<'a>(&'a self, key: &'a str) -> &'a str {
        match (self.messages.get(key), self.lang) {
            (Some(&(zh_cn, _)), UiLanguage::ZhCn) => zh_cn,
            (Some(&(_, en_us)), UiLanguage::EnUs) => en_us,
            (None, _) => key,
        }
    }

    pub fn code(&self, code: ErrorCode) -> &str {
        self.t(code.message_key())
    }
}
