//! 探测器配置
//!
//! 一个配置拥有：
//! - 事件类别变量集合（bin划分）
//! - 原始Qn向量（由数据向量构建或直接提供）和当前校正后Qn向量
//! - 按排序键升序排列的校正步骤
//!
//! 初始化后拓扑冻结，事件循环中不再分配。

use super::ReferenceView;
use crate::core::{CalibrationStore, EventClassVariablesSet, Profile, QnNormalization, QnVector};
use crate::corrections::{CorrectionKind, CorrectionStep, EventContext, SupportContext};
use crate::error::{CorrectionError, CorrectionResult, invalid_harmonic};
use crate::tools::constants::corrections::PLAIN_LABEL;
use crate::tools::constants::defaults::MIN_MULTIPLICITY;
use tracing::debug;

/// 单个探测器的校正配置
#[derive(Debug, Clone)]
pub struct DetectorConfiguration {
    name: String,
    harmonics: Vec<u32>,
    event_classes: EventClassVariablesSet,
    normalization: QnNormalization,
    min_multiplicity: u64,
    plain: QnVector,
    corrected: QnVector,
    /// 本事件的原始向量由外部直接提供
    plain_supplied: bool,
    current_bin: Option<usize>,
    steps: Vec<CorrectionStep>,
    frozen: bool,
}

impl DetectorConfiguration {
    /// 以名称、谐波集合和事件类别创建配置
    pub fn new(
        name: impl Into<String>,
        harmonics: &[u32],
        event_classes: EventClassVariablesSet,
    ) -> CorrectionResult<Self> {
        event_classes.validate()?;
        let mut harmonics = harmonics.to_vec();
        harmonics.sort_unstable();
        harmonics.dedup();

        let plain = QnVector::new(PLAIN_LABEL, &harmonics)?;
        let corrected = plain.clone();
        Ok(Self {
            name: name.into(),
            harmonics,
            event_classes,
            normalization: QnNormalization::default(),
            min_multiplicity: MIN_MULTIPLICITY,
            plain,
            corrected,
            plain_supplied: false,
            current_bin: None,
            steps: Vec::new(),
            frozen: false,
        })
    }

    pub fn with_normalization(mut self, normalization: QnNormalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// 原始向量构建所需的最少数据向量数
    pub fn with_min_multiplicity(mut self, min_multiplicity: u64) -> Self {
        self.min_multiplicity = min_multiplicity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn harmonics(&self) -> &[u32] {
        &self.harmonics
    }

    pub fn event_classes(&self) -> &EventClassVariablesSet {
        &self.event_classes
    }

    pub fn normalization(&self) -> QnNormalization {
        self.normalization
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// 按流水线顺序排列的步骤
    pub fn steps(&self) -> &[CorrectionStep] {
        &self.steps
    }

    pub fn step(&self, kind: CorrectionKind) -> Option<&CorrectionStep> {
        self.steps.iter().find(|s| s.kind() == kind)
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [CorrectionStep] {
        &mut self.steps
    }

    fn ensure_not_frozen(&self, action: &str) -> CorrectionResult<()> {
        if self.frozen {
            return Err(CorrectionError::Frozen(format!("{action} on {}", self.name)));
        }
        Ok(())
    }

    /// 添加校正步骤，按排序键插入到正确位置
    ///
    /// 同名步骤或相同排序键都是配置错误。
    pub fn add_correction_step(&mut self, step: impl Into<CorrectionStep>) -> CorrectionResult<()> {
        self.ensure_not_frozen("add correction step")?;
        let step = step.into();

        if self.steps.iter().any(|s| s.name() == step.name()) {
            return Err(CorrectionError::DuplicateCorrectionStep {
                configuration: self.name.clone(),
                step: step.name(),
            });
        }
        if self.steps.iter().any(|s| s.key() == step.key()) {
            return Err(CorrectionError::DuplicateOrderingKey {
                configuration: self.name.clone(),
                key: step.key(),
            });
        }

        let position = self.steps.partition_point(|s| s.before(&step));
        self.steps.insert(position, step);
        Ok(())
    }

    /// 激活额外谐波（对齐步骤需要的谐波），初始化前有效
    pub fn activate_harmonic(&mut self, harmonic: u32) -> CorrectionResult<()> {
        self.ensure_not_frozen("activate harmonic")?;
        if harmonic == 0 {
            return Err(invalid_harmonic(harmonic, format!("配置 {}", self.name)));
        }
        if self.harmonics.contains(&harmonic) {
            return Ok(());
        }

        let position = self.harmonics.partition_point(|&h| h < harmonic);
        self.harmonics.insert(position, harmonic);
        self.plain = QnVector::new(PLAIN_LABEL, &self.harmonics)?;
        self.corrected = self.plain.clone();
        debug!("{}: harmonic {harmonic} activated", self.name);
        Ok(())
    }

    /// 是否存在给定类别的步骤且正在应用；没有该步骤时返回None
    pub fn is_correction_step_being_applied(&self, kind: CorrectionKind) -> Option<bool> {
        self.step(kind).map(CorrectionStep::is_being_applied)
    }

    /// 原始Qn向量
    pub fn plain_qn_vector(&self) -> &QnVector {
        &self.plain
    }

    /// 当前Qn向量（流水线最后应用的步骤的输出）
    pub fn current_qn_vector(&self) -> &QnVector {
        &self.corrected
    }

    /// 最近一次事件的事件类别bin
    pub fn current_bin(&self) -> Option<usize> {
        self.current_bin
    }

    /// 为每个步骤创建校准Profile和校正缓冲区
    pub(crate) fn create_support(&mut self) -> CorrectionResult<()> {
        let support = SupportContext {
            configuration: &self.name,
            harmonics: &self.harmonics,
            n_bins: self.event_classes.n_bins(),
        };
        for step in &mut self.steps {
            step.create_support(&support)?;
        }
        Ok(())
    }

    /// 为所有步骤附加校准输入，返回成功附加的步骤数
    pub(crate) fn attach_inputs(&mut self, store: &CalibrationStore) -> CorrectionResult<usize> {
        let mut attached = 0;
        for step in &mut self.steps {
            if step.attach_input(store, &self.name)? {
                attached += 1;
            }
        }
        Ok(attached)
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    /// 外部策略：指定步骤停止继续收集
    pub(crate) fn stop_collecting(&mut self, kind: CorrectionKind) -> bool {
        match self.steps.iter_mut().find(|s| s.kind() == kind) {
            Some(step) => {
                step.stop_collecting();
                true
            }
            None => false,
        }
    }

    /// 为新事件清空所有向量
    pub fn clear_event(&mut self) {
        self.plain.reset();
        self.corrected.reset();
        self.corrected.set_from(&self.plain, true);
        self.plain_supplied = false;
        self.current_bin = None;
        for step in &mut self.steps {
            step.clear();
        }
    }

    /// 累加一个数据向量到原始Qn向量
    pub fn add_data_vector(&mut self, phi: f64, weight: f64) {
        self.plain.add(phi, weight);
    }

    /// 直接提供原始Qn向量（跳过数据向量构建和归一化）
    pub fn supply_plain_qn_vector(&mut self, qn: &QnVector) {
        self.plain.set_from(qn, false);
        self.plain_supplied = true;
    }

    fn build_qn_vector(&mut self) {
        if !self.plain_supplied {
            self.plain.finalize(self.normalization, self.min_multiplicity);
        }
        self.corrected.set_from(&self.plain, true);
    }

    /// 阶段A：构建原始向量并依次应用校正
    ///
    /// 遇到第一个未应用的步骤即停止；返回是否全部步骤都已应用。
    pub(crate) fn process_corrections(&mut self, variables: &[f64], references: ReferenceView<'_>) -> bool {
        self.build_qn_vector();
        self.current_bin = self.event_classes.classify(variables);

        let ctx = EventContext {
            configuration: &self.name,
            variables,
            bin: self.current_bin,
            references,
        };
        for step in &mut self.steps {
            if !step.process_corrections(&mut self.corrected, &ctx) {
                return false;
            }
        }
        true
    }

    /// 阶段B：每个步骤对其输入向量收集校准数据
    ///
    /// 第一个步骤的输入是原始向量，其余步骤的输入是前一步骤的输出。
    /// 遇到只收集不应用的步骤后停止。
    pub(crate) fn process_data_collection(&mut self, variables: &[f64], references: ReferenceView<'_>) -> bool {
        let ctx = EventContext {
            configuration: &self.name,
            variables,
            bin: self.current_bin,
            references,
        };
        for index in 0..self.steps.len() {
            let (previous, rest) = self.steps.split_at_mut(index);
            let input = previous
                .last()
                .and_then(CorrectionStep::corrected)
                .unwrap_or(&self.plain);
            let Some(step) = rest.first_mut() else {
                break;
            };
            if !step.process_data_collection(input, &ctx) {
                return false;
            }
        }
        true
    }

    /// 本轮要写出的校准Profile
    ///
    /// 正在收集且有条目的步骤写出新累积的Profile；
    /// 不再收集的步骤原样带出已附加的输入，供下一轮继续使用。
    /// 从未收到数据的步骤不写出，下一轮仍从Calibrating开始。
    pub fn output_profiles(&self) -> impl Iterator<Item = &Profile> {
        self.steps.iter().filter_map(|step| {
            let collected = step
                .calibration_profile()
                .filter(|p| step.state().is_collecting() && !p.is_empty());
            collected.or_else(|| step.input_profile())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::{Alignment, Recentering, TwistAndRescale};

    fn configuration() -> DetectorConfiguration {
        DetectorConfiguration::new("TPC", &[2, 1], EventClassVariablesSet::default()).unwrap()
    }

    #[test]
    fn test_steps_sorted_by_key() {
        let mut config = configuration();
        config.add_correction_step(TwistAndRescale::new("FMD", 2)).unwrap();
        config.add_correction_step(Recentering::new()).unwrap();
        config.add_correction_step(Alignment::new("FMD", 2)).unwrap();

        let keys: Vec<_> = config.steps().iter().map(CorrectionStep::key).collect();
        assert_eq!(keys, vec!["CCCC", "EEEE", "HHHH"]);
        assert_eq!(config.harmonics(), &[1, 2]);
    }

    #[test]
    fn test_invalid_event_classes_rejected() {
        use crate::core::EventClassVariable;

        for variable in [
            EventClassVariable::new(0, "c", vec![5.0]),
            EventClassVariable::uniform(0, "c", 0, 0.0, 100.0),
            EventClassVariable::new(0, "c", vec![0.0, 0.0]),
        ] {
            let set = EventClassVariablesSet {
                variables: vec![variable],
            };
            let err = DetectorConfiguration::new("TPC", &[2], set).unwrap_err();
            assert!(matches!(err, CorrectionError::InvalidInput(_)));
        }
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut config = configuration();
        config.add_correction_step(Recentering::new()).unwrap();
        let err = config.add_correction_step(Recentering::new()).unwrap_err();
        assert!(matches!(err, CorrectionError::DuplicateCorrectionStep { .. }));
    }

    #[test]
    fn test_activate_harmonic() {
        let mut config = configuration();
        config.activate_harmonic(4).unwrap();
        config.activate_harmonic(2).unwrap();
        assert_eq!(config.harmonics(), &[1, 2, 4]);
        assert!(config.plain_qn_vector().has_harmonic(4));
        assert!(config.activate_harmonic(0).is_err());

        config.freeze();
        assert!(matches!(
            config.activate_harmonic(3),
            Err(CorrectionError::Frozen(_))
        ));
    }

    #[test]
    fn test_without_steps_current_is_plain() {
        let mut config = configuration().with_normalization(QnNormalization::QoverM);
        config.create_support().unwrap();
        config.clear_event();
        config.add_data_vector(0.0, 2.0);
        assert!(config.process_corrections(&[], ReferenceView::empty()));

        let current = config.current_qn_vector();
        assert_eq!(current.name(), "plain");
        assert_eq!(current.qx(1), 1.0);
        assert!(current.is_good_quality());
    }

    #[test]
    fn test_empty_event_is_bad_quality() {
        let mut config = configuration();
        config.create_support().unwrap();
        config.clear_event();
        config.process_corrections(&[], ReferenceView::empty());
        assert!(!config.current_qn_vector().is_good_quality());
    }

    #[test]
    fn test_supplied_vector_skips_normalization() {
        let mut config = configuration().with_normalization(QnNormalization::QoverM);
        config.create_support().unwrap();
        config.clear_event();

        let mut qn = QnVector::new("external", &[1, 2]).unwrap();
        qn.set_qx(2, 3.0);
        config.supply_plain_qn_vector(&qn);
        config.process_corrections(&[], ReferenceView::empty());
        assert!(config.current_qn_vector().is_good_quality());
        assert_eq!(config.current_qn_vector().qx(2), 3.0);
        assert_eq!(config.current_qn_vector().name(), "plain");
    }

    #[test]
    fn test_calibrating_recentering_stops_chain() {
        let mut config = configuration();
        config.add_correction_step(Recentering::new()).unwrap();
        config.create_support().unwrap();

        config.clear_event();
        config.add_data_vector(0.0, 1.0);
        assert!(!config.process_corrections(&[], ReferenceView::empty()));
        assert!(!config.process_data_collection(&[], ReferenceView::empty()));

        let profile = config.output_profiles().next().unwrap();
        assert_eq!(profile.name(), "Qn TPC");
        assert_eq!(profile.entry_count(0), 1);
        assert_eq!(config.is_correction_step_being_applied(CorrectionKind::Recentering), Some(false));
        assert_eq!(config.is_correction_step_being_applied(CorrectionKind::Alignment), None);
    }
}
