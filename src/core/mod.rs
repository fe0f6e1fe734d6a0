//! 核心数据结构模块
//!
//! 包含Qn向量、事件类别分箱和校准数据存储。

pub mod calibration;
pub mod event_classes;
pub mod qn_vector;

// 重新导出公共接口
pub use calibration::{BinAccumulator, CalibrationStore, Field, Profile, ProfileKind};
pub use event_classes::{EventClassVariable, EventClassVariablesSet};
pub use qn_vector::{QnNormalization, QnVector};
