//! 统一错误处理框架
//!
//! 校正框架的错误分为两类：配置错误（致命，立即中止）与输入/IO错误。
//! 事件级的数据质量问题（坏质量Qn向量、未验证的bin、不显著的校正）
//! 不是错误，只通过质量标志和诊断计数体现。

use std::io;
use thiserror::Error;

/// 校正框架统一错误类型
#[derive(Debug, Error)]
pub enum CorrectionError {
    /// 同名探测器配置重复注册
    #[error("重复的探测器配置 / duplicate detector configuration: {name}")]
    DuplicateConfiguration { name: String },

    /// 同一配置内重复的校正步骤（同名）
    #[error("配置 {configuration} 中重复的校正步骤 / duplicate correction step: {step}")]
    DuplicateCorrectionStep {
        configuration: String,
        step: &'static str,
    },

    /// 同一配置内两个步骤使用相同的排序键
    #[error("配置 {configuration} 中重复的排序键 / duplicate ordering key: {key}")]
    DuplicateOrderingKey {
        configuration: String,
        key: &'static str,
    },

    /// 引用的探测器配置不存在
    #[error(
        "配置 {configuration} 的 {step} 步骤引用了不存在的参考配置 / unresolved reference: {reference}"
    )]
    UnresolvedReference {
        configuration: String,
        step: &'static str,
        reference: String,
    },

    /// 步骤引用了自身所属的配置
    #[error("配置 {configuration} 的 {step} 步骤不能以自身为参考 / self reference")]
    SelfReference {
        configuration: String,
        step: &'static str,
    },

    /// 配置之间的引用形成环
    #[error("探测器配置之间存在循环引用 / reference cycle involving: {involved}")]
    ReferenceCycle { involved: String },

    /// 按名称查找的配置不存在
    #[error("未知的探测器配置 / unknown detector configuration: {0}")]
    UnknownConfiguration(String),

    /// 校准输入的布局与步骤需求不一致
    #[error("校准数据 {profile} 形状不匹配 / shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        profile: String,
        expected: String,
        found: String,
    },

    /// 谐波编号非法（0或不在配置中）
    #[error("非法谐波 / invalid harmonic {harmonic}: {context}")]
    InvalidHarmonic { harmonic: u32, context: String },

    /// 处理开始后修改拓扑
    #[error("校正框架已初始化，拓扑已冻结 / framework already initialized: {0}")]
    Frozen(String),

    /// 处理事件前未初始化框架
    #[error("校正框架尚未初始化 / framework not initialized")]
    NotInitialized,

    /// 输入验证错误（作业配置、事件记录）
    #[error("输入验证失败 / invalid input: {0}")]
    InvalidInput(String),

    /// 文件I/O错误
    #[error("文件I/O错误 / I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON解析错误 / JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 校正操作的标准Result类型
pub type CorrectionResult<T> = Result<T, CorrectionError>;

// ==================== 错误转换Helper函数 ====================

/// 创建输入验证错误的helper函数
#[inline]
pub fn invalid_input<E: std::fmt::Display>(context: &str, err: E) -> CorrectionError {
    CorrectionError::InvalidInput(format!("{context}: {err}"))
}

/// 创建谐波错误的helper函数
#[inline]
pub fn invalid_harmonic(harmonic: u32, context: impl Into<String>) -> CorrectionError {
    CorrectionError::InvalidHarmonic {
        harmonic,
        context: context.into(),
    }
}

// ==================== 错误分类系统 ====================

/// 错误类别枚举（用于CLI退出码和提示）
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ErrorCategory {
    /// 配置错误：引用、重复步骤、形状不匹配等
    Configuration,
    /// 输入错误：作业配置或事件数据无法解析
    Input,
    /// I/O错误：文件不存在、权限不足等
    Io,
}

impl ErrorCategory {
    /// 从CorrectionError提取错误类别
    pub fn from_error(e: &CorrectionError) -> Self {
        match e {
            CorrectionError::Io(_) => Self::Io,
            CorrectionError::InvalidInput(_) | CorrectionError::Json(_) => Self::Input,
            _ => Self::Configuration,
        }
    }

    /// 获取错误类别的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Configuration => "配置错误",
            Self::Input => "输入错误",
            Self::Io => "I/O错误",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let e = CorrectionError::UnresolvedReference {
            configuration: "TPC".into(),
            step: "Alignment",
            reference: "FMD".into(),
        };
        assert_eq!(ErrorCategory::from_error(&e), ErrorCategory::Configuration);
        assert!(e.to_string().contains("FMD"));

        let e = invalid_input("event line 3", "missing field");
        assert_eq!(ErrorCategory::from_error(&e), ErrorCategory::Input);

        let e: CorrectionError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(ErrorCategory::from_error(&e), ErrorCategory::Io);
        assert_eq!(ErrorCategory::Io.display_name(), "I/O错误");
    }
}
