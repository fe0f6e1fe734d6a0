//! Qn Corrections - 流向量校正框架
//!
//! 对每个事件、每个探测器构建Qn向量（各谐波的 Qx, Qy），
//! 再经过按排序键排列的校正流水线消除探测器效应。
//!
//! ## 核心特性
//! - 重心校正与宽度均衡：Qx' = (Qx - <Qx>) / σx
//! - 探测器间对齐：以参考探测器为基准的显著性门控旋转
//! - 扭转与重标度：带bin验证门控和诊断计数的旋转校正
//! - 多轮处理：每轮附加上一轮的校准数据，逐步启用后续步骤
//!
//! ## 使用流程
//! 1. 向 [`CorrectionManager`] 注册 [`DetectorConfiguration`] 及其校正步骤
//! 2. `initialize(calibration)` 解析引用并冻结拓扑
//! 3. 每个事件：`clear_event` → 添加数据向量 → `process_event`
//! 4. `calibration_output()` 得到本轮校准数据，供下一轮使用

pub mod core;
pub mod corrections;
pub mod detector;
pub mod error;
pub mod tools;

// 重新导出核心类型
pub use core::{CalibrationStore, EventClassVariable, EventClassVariablesSet, QnNormalization, QnVector};
pub use corrections::{Alignment, CorrectionKind, CorrectionStep, Recentering, StepState, TwistAndRescale};
pub use detector::{ConfigurationId, CorrectionManager, DetectorConfiguration};
pub use error::{CorrectionError, CorrectionResult};
