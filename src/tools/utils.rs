//! 工具函数模块
//!
//! 文件路径处理等通用工具函数。

/// 文件路径处理工具函数
pub mod path {
    use std::path::Path;

    /// 提取文件名（返回String，用于日志显示）
    #[inline]
    pub fn extract_filename_lossy(path: &Path) -> String {
        path.file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

pub use path::extract_filename_lossy;
