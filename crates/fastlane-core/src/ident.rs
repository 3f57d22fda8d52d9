//! 标识符与会话令牌生成
//!
//! 文件 ID、访问请求 ID 和会话令牌都是不透明字符串，调用方不应解析其内容。
//! 唯一的例外是存储文件名：`<前缀>-<原始文件名>`，重启后的目录扫描依赖它恢复原始文件名。

use uuid::Uuid;

/// 生成文件或访问请求使用的唯一 ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// 生成会话令牌（v4 UUID 的前 8 位十六进制）
pub fn session_token() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(8);
    token
}

/// 生成磁盘上的存储文件名: `<32 位十六进制前缀>-<原始文件名>`
///
/// 前缀不含 `-`，因此第一个 `-` 之后的部分就是原始文件名。
pub fn storage_name(display_name: &str) -> String {
    format!("{}-{}", Uuid::new_v4().simple(), display_name)
}

/// 从存储文件名恢复原始文件名
///
/// 同时兼容带连字符的 UUID 前缀 (`xxxxxxxx-xxxx-...-<name>`)。
/// 不符合 `<前缀>-<名称>` 约定时返回 `None`。
pub fn display_name_from_storage(storage_name: &str) -> Option<&str> {
    if let (Some(prefix), Some(rest)) = (storage_name.get(..36), storage_name.get(36..))
        && Uuid::try_parse(prefix).is_ok()
        && let Some(name) = rest.strip_prefix('-')
    {
        return (!name.is_empty()).then_some(name);
    }

    match storage_name.split_once('-') {
        Some((prefix, name)) if !prefix.is_empty() && !name.is_empty() => Some(name),
        _ => None,
    }
}
