//! 作业配置
//!
//! JSON格式描述要注册的探测器配置及其校正步骤，例如：
//!
//! ```json
//! {
//!   "detectors": [
//!     {
//!       "name": "TPC",
//!       "harmonics": [1, 2, 3],
//!       "normalization": "qover_m",
//!       "event_classes": [{ "variable": 0, "label": "centrality", "bins": 10, "min": 0, "max": 100 }],
//!       "corrections": [
//!         { "kind": "recentering", "width_equalization": true },
//!         { "kind": "alignment", "reference": "FMD", "harmonic": 2 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::core::{EventClassVariable, EventClassVariablesSet, QnNormalization};
use crate::corrections::{Alignment, CorrectionKind, CorrectionStep, Recentering, TwistAndRescale};
use crate::detector::{CorrectionManager, DetectorConfiguration};
use crate::error::{CorrectionResult, invalid_harmonic, invalid_input};
use crate::tools::constants::defaults::{MAX_HARMONIC, MIN_MULTIPLICITY};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 作业配置根
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub detectors: Vec<DetectorSpec>,

    /// 覆盖所有对齐类步骤的最少条目数
    #[serde(default)]
    pub min_entries: Option<u64>,
}

/// 单个探测器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorSpec {
    pub name: String,
    pub harmonics: Vec<u32>,

    #[serde(default)]
    pub normalization: QnNormalization,

    #[serde(default = "default_min_multiplicity")]
    pub min_multiplicity: u64,

    #[serde(default)]
    pub event_classes: Vec<EventClassSpec>,

    #[serde(default)]
    pub corrections: Vec<CorrectionSpec>,
}

fn default_min_multiplicity() -> u64 {
    MIN_MULTIPLICITY
}

/// 事件类别变量：显式边界或等宽分箱
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventClassSpec {
    Edges {
        variable: usize,
        #[serde(default)]
        label: String,
        edges: Vec<f64>,
    },
    Uniform {
        variable: usize,
        #[serde(default)]
        label: String,
        bins: usize,
        min: f64,
        max: f64,
    },
}

impl EventClassSpec {
    fn to_variable(&self) -> EventClassVariable {
        match self {
            Self::Edges {
                variable,
                label,
                edges,
            } => EventClassVariable::new(*variable, label.as_str(), edges.clone()),
            Self::Uniform {
                variable,
                label,
                bins,
                min,
                max,
            } => EventClassVariable::uniform(*variable, label.as_str(), *bins, *min, *max),
        }
    }
}

/// 校正步骤描述
///
/// `stop_collecting` 为真时，步骤在附加校准后只应用不再收集。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrectionSpec {
    Recentering {
        #[serde(default)]
        width_equalization: bool,
        #[serde(default)]
        stop_collecting: bool,
    },
    Alignment {
        reference: String,
        harmonic: u32,
        #[serde(default)]
        all_harmonics: bool,
        #[serde(default)]
        min_entries: Option<u64>,
        #[serde(default)]
        stop_collecting: bool,
    },
    TwistAndRescale {
        reference: String,
        harmonic: u32,
        #[serde(default)]
        min_entries: Option<u64>,
        #[serde(default)]
        stop_collecting: bool,
    },
}

impl CorrectionSpec {
    pub fn kind(&self) -> CorrectionKind {
        match self {
            Self::Recentering { .. } => CorrectionKind::Recentering,
            Self::Alignment { .. } => CorrectionKind::Alignment,
            Self::TwistAndRescale { .. } => CorrectionKind::TwistAndRescale,
        }
    }

    /// 对齐类步骤的对齐谐波
    fn harmonic(&self) -> Option<u32> {
        match self {
            Self::Recentering { .. } => None,
            Self::Alignment { harmonic, .. } | Self::TwistAndRescale { harmonic, .. } => Some(*harmonic),
        }
    }

    fn stops_collecting(&self) -> bool {
        match self {
            Self::Recentering {
                stop_collecting, ..
            }
            | Self::Alignment {
                stop_collecting, ..
            }
            | Self::TwistAndRescale {
                stop_collecting, ..
            } => *stop_collecting,
        }
    }

    fn to_step(&self, global_min_entries: Option<u64>) -> CorrectionStep {
        match self {
            Self::Recentering {
                width_equalization,
                ..
            } => Recentering::new()
                .with_width_equalization(*width_equalization)
                .into(),
            Self::Alignment {
                reference,
                harmonic,
                all_harmonics,
                min_entries,
                ..
            } => {
                let mut step = Alignment::new(reference.as_str(), *harmonic)
                    .with_all_harmonics(*all_harmonics);
                if let Some(min) = min_entries.or(global_min_entries) {
                    step = step.with_min_entries(min);
                }
                step.into()
            }
            Self::TwistAndRescale {
                reference,
                harmonic,
                min_entries,
                ..
            } => {
                let mut step = TwistAndRescale::new(reference.as_str(), *harmonic);
                if let Some(min) = min_entries.or(global_min_entries) {
                    step = step.with_min_entries(min);
                }
                step.into()
            }
        }
    }
}

impl JobConfig {
    /// 从JSON字符串解析
    pub fn from_json(text: &str) -> CorrectionResult<Self> {
        let job: Self = serde_json::from_str(text)?;
        if job.detectors.is_empty() {
            return Err(invalid_input("job config", "至少需要一个探测器 / no detectors"));
        }
        for detector in &job.detectors {
            let step_harmonics = detector.corrections.iter().filter_map(CorrectionSpec::harmonic);
            if let Some(harmonic) = detector
                .harmonics
                .iter()
                .copied()
                .chain(step_harmonics)
                .find(|&h| h == 0 || h > MAX_HARMONIC)
            {
                return Err(invalid_harmonic(
                    harmonic,
                    format!("{}: 谐波编号必须在 1..={MAX_HARMONIC} / harmonic out of range", detector.name),
                ));
            }
        }
        Ok(job)
    }

    /// 从文件加载
    pub fn load(path: &Path) -> CorrectionResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// 注册所有探测器配置和步骤，返回尚未初始化的管理器
    pub fn build_manager(&self) -> CorrectionResult<CorrectionManager> {
        let mut manager = CorrectionManager::new();
        for detector in &self.detectors {
            let variables = detector
                .event_classes
                .iter()
                .map(EventClassSpec::to_variable)
                .collect();
            let event_classes = EventClassVariablesSet::new(variables)?;

            let mut configuration =
                DetectorConfiguration::new(detector.name.as_str(), &detector.harmonics, event_classes)?
                    .with_normalization(detector.normalization)
                    .with_min_multiplicity(detector.min_multiplicity);
            for correction in &detector.corrections {
                configuration.add_correction_step(correction.to_step(self.min_entries))?;
            }
            manager.add_detector_configuration(configuration)?;
        }
        Ok(manager)
    }

    /// 初始化后应用收集策略
    pub fn apply_collection_policy(&self, manager: &mut CorrectionManager) -> CorrectionResult<()> {
        for detector in &self.detectors {
            for correction in detector.corrections.iter().filter(|c| c.stops_collecting()) {
                manager.stop_collecting(&detector.name, correction.kind())?;
            }
        }
        Ok(())
    }
}
