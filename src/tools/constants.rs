//! 常量和默认配置集中管理
//!
//! 校正步骤身份、算法阈值和默认值集中定义。

/// 校正步骤的身份常量（名称、排序键、校准数据名前缀、校正后向量标签）
pub mod corrections {
    /// 重心校正 + 宽度均衡
    pub const RECENTERING_NAME: &str = "Recentering and width equalization";
    pub const RECENTERING_KEY: &str = "CCCC";
    pub const RECENTERING_PROFILE: &str = "Qn";
    pub const RECENTERING_LABEL: &str = "rec";

    /// 探测器间对齐
    pub const ALIGNMENT_NAME: &str = "Alignment";
    pub const ALIGNMENT_KEY: &str = "EEEE";
    pub const ALIGNMENT_PROFILE: &str = "QnQn";
    pub const ALIGNMENT_LABEL: &str = "align";

    /// 扭转与重标度
    pub const TWIST_AND_RESCALE_NAME: &str = "Twist and rescale";
    pub const TWIST_AND_RESCALE_KEY: &str = "HHHH";
    pub const TWIST_AND_RESCALE_PROFILE: &str = "TwQnQn";
    pub const TWIST_AND_RESCALE_LABEL: &str = "twist";

    /// 未校正（原始）Qn向量标签
    pub const PLAIN_LABEL: &str = "plain";
}

/// 校正算法常量
pub mod algorithm {
    /// 对齐旋转的显著性阈值（约2σ）
    ///
    /// 统计量 sqrt((XY-YX)² / (eXY²+eYX²)) 达到该值时才应用旋转
    pub const SIGNIFICANCE_THRESHOLD: f64 = 2.0;
}

/// 默认配置值
pub mod defaults {
    /// bin内容被视为已验证所需的最少条目数
    pub const MIN_ENTRIES_TO_VALIDATE: u64 = 2;

    /// 原始Qn向量被视为好质量所需的最少数据向量数
    pub const MIN_MULTIPLICITY: u64 = 1;

    /// 批量输入时扫描的事件文件扩展名
    pub const EVENT_FILE_EXTENSION: &str = "jsonl";

    /// 允许的最大谐波编号
    pub const MAX_HARMONIC: u32 = 64;

    /// 每个错误类别保留的出错位置数，超出部分只计数
    pub const MAX_RECORDED_LOCATIONS: usize = 100;
}

/// 应用程序信息
pub mod app_info {
    /// 输出报告头部
    pub fn format_report_header(version: &str) -> String {
        format!("Qn Corrections v{version} / Qn向量校正报告")
    }
}
