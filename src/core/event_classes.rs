//! 事件类别（event class）分箱
//!
//! 每个事件类别变量从变量容器中按索引读取一个值，并按bin边界定位；
//! 多个变量的bin组合成一个全局bin编号（行优先）。
//! 校正步骤从不自己计算bin，只调用 [`EventClassVariablesSet::classify`]。

use crate::error::{CorrectionError, CorrectionResult};
use serde::{Deserialize, Serialize};

/// 单个事件类别变量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventClassVariable {
    /// 变量在变量容器中的索引
    pub variable: usize,

    /// 显示标签（如 "centrality"）
    #[serde(default)]
    pub label: String,

    /// 升序排列的bin边界，n+1个边界定义n个bin
    pub edges: Vec<f64>,
}

impl EventClassVariable {
    /// 用显式边界创建变量
    pub fn new(variable: usize, label: impl Into<String>, edges: Vec<f64>) -> Self {
        Self {
            variable,
            label: label.into(),
            edges,
        }
    }

    /// 等宽分箱
    pub fn uniform(variable: usize, label: impl Into<String>, bins: usize, min: f64, max: f64) -> Self {
        let width = (max - min) / bins as f64;
        let edges = (0..=bins).map(|i| min + width * i as f64).collect();
        Self::new(variable, label, edges)
    }

    /// bin个数
    pub fn n_bins(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    /// 定位bin：下边界闭、上边界开，最后一个bin包含上边界
    fn locate(&self, value: f64) -> Option<usize> {
        let (first, last) = (*self.edges.first()?, *self.edges.last()?);
        if !value.is_finite() || value < first || value > last {
            return None;
        }
        if value == last {
            return self.n_bins().checked_sub(1);
        }
        self.edges.partition_point(|&edge| edge <= value).checked_sub(1)
    }

    fn validate(&self) -> CorrectionResult<()> {
        if self.edges.len() < 2 {
            return Err(CorrectionError::InvalidInput(format!(
                "事件类别变量 {} 至少需要两个边界",
                self.label
            )));
        }
        if self.edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(CorrectionError::InvalidInput(format!(
                "事件类别变量 {} 的边界必须严格递增",
                self.label
            )));
        }
        Ok(())
    }
}

/// 事件类别变量集合（分箱服务）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventClassVariablesSet {
    pub variables: Vec<EventClassVariable>,
}

impl EventClassVariablesSet {
    /// 创建并校验变量集合
    pub fn new(variables: Vec<EventClassVariable>) -> CorrectionResult<Self> {
        let set = Self { variables };
        set.validate()?;
        Ok(set)
    }

    /// 校验所有变量的边界
    pub fn validate(&self) -> CorrectionResult<()> {
        self.variables.iter().try_for_each(EventClassVariable::validate)
    }

    /// 全局bin总数（无变量时为1，所有事件同属一个类别）
    pub fn n_bins(&self) -> usize {
        self.variables.iter().map(EventClassVariable::n_bins).product()
    }

    /// 计算当前事件的bin编号；任一变量越界或缺失则返回None
    ///
    /// # 示例
    ///
    /// ```rust
    /// use qn_corrections::core::{EventClassVariable, EventClassVariablesSet};
    ///
    /// let set = EventClassVariablesSet::new(vec![
    ///     EventClassVariable::uniform(0, "centrality", 10, 0.0, 100.0),
    ///     EventClassVariable::uniform(1, "vtx-z", 2, -10.0, 10.0),
    /// ]).unwrap();
    /// assert_eq!(set.n_bins(), 20);
    /// assert_eq!(set.classify(&[25.0, 3.0]), Some(2 * 2 + 1));
    /// assert_eq!(set.classify(&[25.0, 30.0]), None);
    /// ```
    pub fn classify(&self, variables: &[f64]) -> Option<usize> {
        self.variables.iter().try_fold(0usize, |bin, var| {
            let value = *variables.get(var.variable)?;
            Some(bin * var.n_bins() + var.locate(value)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_edges() {
        let var = EventClassVariable::new(0, "c", vec![0.0, 10.0, 50.0, 100.0]);
        assert_eq!(var.locate(0.0), Some(0));
        assert_eq!(var.locate(9.99), Some(0));
        assert_eq!(var.locate(10.0), Some(1));
        assert_eq!(var.locate(100.0), Some(2));
        assert_eq!(var.locate(100.1), None);
        assert_eq!(var.locate(-0.1), None);
        assert_eq!(var.locate(f64::NAN), None);
    }

    #[test]
    fn test_no_variables_single_class() {
        let set = EventClassVariablesSet::default();
        assert_eq!(set.n_bins(), 1);
        assert_eq!(set.classify(&[]), Some(0));
    }

    #[test]
    fn test_missing_variable_index() {
        let set = EventClassVariablesSet::new(vec![EventClassVariable::uniform(3, "v", 4, 0.0, 1.0)])
            .unwrap();
        assert_eq!(set.classify(&[0.5]), None);
    }

    #[test]
    fn test_invalid_edges_rejected() {
        assert!(EventClassVariablesSet::new(vec![EventClassVariable::new(0, "v", vec![1.0])]).is_err());
        assert!(
            EventClassVariablesSet::new(vec![EventClassVariable::new(0, "v", vec![0.0, 2.0, 1.0])])
                .is_err()
        );
    }

    #[test]
    fn test_unvalidated_single_edge_never_classifies() {
        let set = EventClassVariablesSet {
            variables: vec![EventClassVariable {
                variable: 0,
                label: "v".to_string(),
                edges: vec![5.0],
            }],
        };
        assert_eq!(set.classify(&[5.0]), None);
        assert_eq!(set.classify(&[1.0]), None);
    }
}
