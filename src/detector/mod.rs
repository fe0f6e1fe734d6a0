//! 探测器配置与校正管理器
//!
//! [`DetectorConfiguration`] 拥有一个探测器的原始和校正后Qn向量以及有序的校正步骤；
//! [`CorrectionManager`] 注册所有配置，解析跨配置引用并逐事件驱动流水线。

pub mod configuration;
pub mod manager;

pub use configuration::DetectorConfiguration;
pub use manager::{CorrectionManager, StepReport};

use crate::core::QnVector;

/// 已注册配置的编号（注册顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigurationId(pub(crate) usize);

impl ConfigurationId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 处理某个配置时对其余配置的只读视图
///
/// 由配置切片在目标位置拆分得到，目标配置本身不在视图中。
#[derive(Debug, Clone, Copy)]
pub struct ReferenceView<'a> {
    head: &'a [DetectorConfiguration],
    tail: &'a [DetectorConfiguration],
    tail_offset: usize,
}

impl<'a> ReferenceView<'a> {
    /// 不含任何配置的视图
    pub fn empty() -> Self {
        Self {
            head: &[],
            tail: &[],
            tail_offset: 0,
        }
    }

    /// 拆分出可变的目标配置和其余配置的视图
    pub(crate) fn split(
        configurations: &'a mut [DetectorConfiguration],
        index: usize,
    ) -> Option<(&'a mut DetectorConfiguration, ReferenceView<'a>)> {
        let (head, rest) = configurations.split_at_mut(index);
        let (target, tail) = rest.split_first_mut()?;
        let view = ReferenceView {
            head,
            tail,
            tail_offset: index + 1,
        };
        Some((target, view))
    }

    /// 被引用配置的当前（校正后）Qn向量
    pub fn current_vector(&self, id: ConfigurationId) -> Option<&'a QnVector> {
        let index = id.0;
        let configuration = if index < self.head.len() {
            self.head.get(index)
        } else if index >= self.tail_offset {
            self.tail.get(index - self.tail_offset)
        } else {
            None
        };
        configuration.map(DetectorConfiguration::current_qn_vector)
    }
}
