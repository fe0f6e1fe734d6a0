//! 校正管理器
//!
//! 两阶段建立：
//! 1. 注册所有探测器配置及其校正步骤
//! 2. `initialize()`：解析跨配置引用，激活对齐谐波，确定处理顺序，
//!    创建支持数据结构，附加上一轮校准数据，冻结拓扑
//!
//! 之后逐事件调用 `clear_event` → 填充数据 → `process_event`。

use super::{ConfigurationId, DetectorConfiguration, ReferenceView};
use crate::core::{CalibrationStore, QnVector};
use crate::corrections::{CorrectionKind, CorrectionStep, ReferenceLink, StepState, StepUsage};
use crate::error::{CorrectionError, CorrectionResult};
use std::collections::HashMap;
use tracing::{info, warn};

/// 报告中的一行：一个配置的一个步骤
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub configuration: String,
    pub step: &'static str,
    pub key: &'static str,
    pub state: StepState,
    pub usage: StepUsage,
    /// 未验证bin事件总数（只有扭转与重标度有）
    pub not_validated: Option<u64>,
}

/// 探测器配置注册表与逐事件驱动
#[derive(Debug, Default)]
pub struct CorrectionManager {
    configurations: Vec<DetectorConfiguration>,
    names: HashMap<String, ConfigurationId>,
    /// 依赖顺序：被引用的配置先处理
    processing_order: Vec<usize>,
    initialized: bool,
    events: u64,
}

impl CorrectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// 已处理事件数
    pub fn events_processed(&self) -> u64 {
        self.events
    }

    // ==================== 注册 ====================

    /// 注册探测器配置；名称必须唯一
    pub fn add_detector_configuration(
        &mut self,
        configuration: DetectorConfiguration,
    ) -> CorrectionResult<ConfigurationId> {
        if self.initialized {
            return Err(CorrectionError::Frozen(format!(
                "add detector configuration {}",
                configuration.name()
            )));
        }
        if self.names.contains_key(configuration.name()) {
            return Err(CorrectionError::DuplicateConfiguration {
                name: configuration.name().to_string(),
            });
        }

        let id = ConfigurationId(self.configurations.len());
        self.names.insert(configuration.name().to_string(), id);
        self.configurations.push(configuration);
        Ok(id)
    }

    /// 为已注册的配置添加校正步骤
    pub fn add_correction_step(
        &mut self,
        configuration: &str,
        step: impl Into<CorrectionStep>,
    ) -> CorrectionResult<()> {
        self.configuration_mut(configuration)?.add_correction_step(step)
    }

    /// 按名称查找配置
    pub fn find_configuration(&self, name: &str) -> Option<&DetectorConfiguration> {
        self.find_configuration_id(name).and_then(|id| self.configuration(id))
    }

    pub fn find_configuration_id(&self, name: &str) -> Option<ConfigurationId> {
        self.names.get(name).copied()
    }

    pub fn configuration(&self, id: ConfigurationId) -> Option<&DetectorConfiguration> {
        self.configurations.get(id.0)
    }

    /// 初始化前按名称获取可变配置
    pub fn configuration_mut(&mut self, name: &str) -> CorrectionResult<&mut DetectorConfiguration> {
        if self.initialized {
            return Err(CorrectionError::Frozen(format!("modify configuration {name}")));
        }
        let id = self
            .find_configuration_id(name)
            .ok_or_else(|| CorrectionError::UnknownConfiguration(name.to_string()))?;
        Ok(&mut self.configurations[id.0])
    }

    /// 按注册顺序遍历配置
    pub fn configurations(&self) -> impl Iterator<Item = &DetectorConfiguration> {
        self.configurations.iter()
    }

    // ==================== 初始化 ====================

    /// 完成建立并冻结拓扑
    ///
    /// `input` 为上一轮的校准输出；没有时所有步骤从Calibrating开始。
    /// 任何配置错误都会中止初始化。
    pub fn initialize(&mut self, input: Option<&CalibrationStore>) -> CorrectionResult<()> {
        if self.initialized {
            return Err(CorrectionError::Frozen("initialize called twice".to_string()));
        }

        self.resolve_references()?;
        self.activate_alignment_harmonics()?;
        self.processing_order = self.dependency_order()?;

        for configuration in &mut self.configurations {
            configuration.create_support()?;
        }
        match input {
            Some(store) => {
                self.attach_inputs(store)?;
            }
            None => self.refresh_passive_states(),
        }

        for configuration in &mut self.configurations {
            configuration.freeze();
        }
        self.initialized = true;

        let steps: usize = self.configurations.iter().map(|c| c.steps().len()).sum();
        info!(
            "correction framework initialized: {} configurations, {} steps",
            self.configurations.len(),
            steps
        );
        Ok(())
    }

    /// 初始化之后附加新的校准数据（外部驱动），返回成功附加的步骤数
    pub fn attach_calibration(&mut self, store: &CalibrationStore) -> CorrectionResult<usize> {
        if !self.initialized {
            return Err(CorrectionError::NotInitialized);
        }
        self.attach_inputs(store)
    }

    fn attach_inputs(&mut self, store: &CalibrationStore) -> CorrectionResult<usize> {
        let mut attached = 0;
        for configuration in &mut self.configurations {
            attached += configuration.attach_inputs(store)?;
        }
        self.refresh_passive_states();
        info!("calibration input attached to {attached} steps");
        Ok(attached)
    }

    /// 名称引用解析为编号：缺失和自引用都是配置错误
    fn resolve_references(&mut self) -> CorrectionResult<()> {
        let names = &self.names;
        for (index, configuration) in self.configurations.iter_mut().enumerate() {
            let owner = configuration.name().to_string();
            for step in configuration.steps_mut() {
                let step_name = step.name();
                let Some(link) = step.reference_mut() else {
                    continue;
                };
                let Some(&id) = names.get(link.name()) else {
                    return Err(CorrectionError::UnresolvedReference {
                        configuration: owner,
                        step: step_name,
                        reference: link.name().to_string(),
                    });
                };
                if id.0 == index {
                    return Err(CorrectionError::SelfReference {
                        configuration: owner,
                        step: step_name,
                    });
                }
                link.resolve(id);
            }
        }
        Ok(())
    }

    /// 对齐谐波必须同时存在于本配置和参考配置
    fn activate_alignment_harmonics(&mut self) -> CorrectionResult<()> {
        let mut required = Vec::new();
        for (index, configuration) in self.configurations.iter().enumerate() {
            for step in configuration.steps() {
                if let (Some(harmonic), Some(id)) =
                    (step.alignment_harmonic(), step.reference().and_then(ReferenceLink::id))
                {
                    required.push((index, harmonic));
                    required.push((id.0, harmonic));
                }
            }
        }
        for (index, harmonic) in required {
            if let Some(configuration) = self.configurations.get_mut(index) {
                configuration.activate_harmonic(harmonic)?;
            }
        }
        Ok(())
    }

    /// 被引用的配置排在引用者之前；同层按注册顺序
    fn dependency_order(&self) -> CorrectionResult<Vec<usize>> {
        let count = self.configurations.len();
        let dependencies: Vec<Vec<usize>> = self
            .configurations
            .iter()
            .map(|c| {
                c.steps()
                    .iter()
                    .filter_map(|s| s.reference().and_then(ReferenceLink::id))
                    .map(|id| id.0)
                    .collect()
            })
            .collect();

        let mut placed = vec![false; count];
        let mut order = Vec::with_capacity(count);
        while order.len() < count {
            let next = (0..count).find(|&i| {
                !placed[i]
                    && dependencies[i]
                        .iter()
                        .all(|&d| placed.get(d).copied().unwrap_or(true))
            });
            match next {
                Some(index) => {
                    placed[index] = true;
                    order.push(index);
                }
                None => {
                    let involved = self
                        .configurations
                        .iter()
                        .zip(&placed)
                        .filter(|(_, done)| !**done)
                        .map(|(c, _)| c.name())
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(CorrectionError::ReferenceCycle { involved });
                }
            }
        }
        Ok(order)
    }

    /// 参考配置的重心校正未应用时，对齐类步骤进入Passive
    fn refresh_passive_states(&mut self) {
        let mut updates = Vec::new();
        for (index, configuration) in self.configurations.iter().enumerate() {
            for (position, step) in configuration.steps().iter().enumerate() {
                let Some(id) = step.reference().and_then(ReferenceLink::id) else {
                    continue;
                };
                let applied = self
                    .configurations
                    .get(id.0)
                    .and_then(|r| r.is_correction_step_being_applied(CorrectionKind::Recentering));
                updates.push((index, position, applied));
            }
        }
        for (index, position, applied) in updates {
            let configuration = &mut self.configurations[index];
            let owner = configuration.name().to_string();
            if let Some(step) = configuration.steps_mut().get_mut(position) {
                step.after_inputs_attach(applied, &owner);
            }
        }
    }

    /// 外部策略：指定步骤不再继续收集（ApplyingAndCollecting → Applying）
    pub fn stop_collecting(&mut self, configuration: &str, kind: CorrectionKind) -> CorrectionResult<bool> {
        let id = self
            .find_configuration_id(configuration)
            .ok_or_else(|| CorrectionError::UnknownConfiguration(configuration.to_string()))?;
        Ok(self.configurations[id.0].stop_collecting(kind))
    }

    // ==================== 事件循环 ====================

    /// 为新事件清空所有配置
    pub fn clear_event(&mut self) {
        for configuration in &mut self.configurations {
            configuration.clear_event();
        }
    }

    /// 向配置添加一个数据向量
    pub fn add_data_vector(&mut self, id: ConfigurationId, phi: f64, weight: f64) {
        if let Some(configuration) = self.configurations.get_mut(id.0) {
            configuration.add_data_vector(phi, weight);
        }
    }

    /// 直接提供配置的原始Qn向量
    pub fn supply_plain_qn_vector(&mut self, id: ConfigurationId, qn: &QnVector) {
        if let Some(configuration) = self.configurations.get_mut(id.0) {
            configuration.supply_plain_qn_vector(qn);
        }
    }

    /// 处理当前事件
    ///
    /// 阶段A按依赖顺序对所有配置应用校正，使参考向量在被读取前已是最终值；
    /// 阶段B再让每个步骤收集校准数据。
    pub fn process_event(&mut self, variables: &[f64]) -> CorrectionResult<()> {
        if !self.initialized {
            return Err(CorrectionError::NotInitialized);
        }

        for &index in &self.processing_order {
            if let Some((configuration, references)) =
                ReferenceView::split(&mut self.configurations, index)
            {
                configuration.process_corrections(variables, references);
                if configuration.current_bin().is_none() {
                    warn!(
                        "event {} outside all event classes of {}",
                        self.events,
                        configuration.name()
                    );
                }
            }
        }
        for &index in &self.processing_order {
            if let Some((configuration, references)) =
                ReferenceView::split(&mut self.configurations, index)
            {
                configuration.process_data_collection(variables, references);
            }
        }

        self.events += 1;
        Ok(())
    }

    /// 配置当前（校正后）的Qn向量
    pub fn corrected_qn_vector(&self, name: &str) -> Option<&QnVector> {
        self.find_configuration(name)
            .map(DetectorConfiguration::current_qn_vector)
    }

    // ==================== 输出 ====================

    /// 收集所有步骤累积的校准数据和诊断计数
    pub fn calibration_output(&self) -> CalibrationStore {
        let mut store = CalibrationStore::new();
        for configuration in &self.configurations {
            for profile in configuration.output_profiles() {
                store.insert(profile.clone());
            }
            for (name, counts) in configuration.steps().iter().filter_map(CorrectionStep::diagnostics) {
                store.insert_diagnostics(name, counts.to_vec());
            }
        }
        store
    }

    /// 每个配置每个步骤的使用情况
    pub fn report(&self) -> Vec<StepReport> {
        self.configurations
            .iter()
            .flat_map(|configuration| {
                configuration.steps().iter().map(move |step| StepReport {
                    configuration: configuration.name().to_string(),
                    step: step.name(),
                    key: step.key(),
                    state: step.state(),
                    usage: step.report_usage(),
                    not_validated: step.diagnostics().map(|(_, counts)| counts.iter().sum()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventClassVariablesSet;
    use crate::corrections::{Alignment, Recentering, TwistAndRescale};

    fn detector(name: &str) -> DetectorConfiguration {
        DetectorConfiguration::new(name, &[1], EventClassVariablesSet::default()).unwrap()
    }

    #[test]
    fn test_duplicate_configuration() {
        let mut manager = CorrectionManager::new();
        manager.add_detector_configuration(detector("TPC")).unwrap();
        let err = manager.add_detector_configuration(detector("TPC")).unwrap_err();
        assert!(matches!(err, CorrectionError::DuplicateConfiguration { .. }));
    }

    #[test]
    fn test_unresolved_reference_is_fatal() {
        let mut manager = CorrectionManager::new();
        manager.add_detector_configuration(detector("TPC")).unwrap();
        manager.add_correction_step("TPC", Alignment::new("FMD", 2)).unwrap();
        let err = manager.initialize(None).unwrap_err();
        assert!(matches!(err, CorrectionError::UnresolvedReference { .. }));
        assert!(!manager.is_initialized());
    }

    #[test]
    fn test_self_reference_and_cycle() {
        let mut manager = CorrectionManager::new();
        manager.add_detector_configuration(detector("TPC")).unwrap();
        manager.add_correction_step("TPC", TwistAndRescale::new("TPC", 2)).unwrap();
        assert!(matches!(
            manager.initialize(None),
            Err(CorrectionError::SelfReference { .. })
        ));

        let mut manager = CorrectionManager::new();
        manager.add_detector_configuration(detector("A")).unwrap();
        manager.add_detector_configuration(detector("B")).unwrap();
        manager.add_correction_step("A", Alignment::new("B", 2)).unwrap();
        manager.add_correction_step("B", Alignment::new("A", 2)).unwrap();
        match manager.initialize(None) {
            Err(CorrectionError::ReferenceCycle { involved }) => assert_eq!(involved, "A, B"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_reference_processed_first_and_harmonics_activated() {
        let mut manager = CorrectionManager::new();
        manager.add_detector_configuration(detector("A")).unwrap();
        manager.add_detector_configuration(detector("B")).unwrap();
        manager.add_correction_step("A", Alignment::new("B", 3)).unwrap();
        manager.initialize(None).unwrap();

        assert_eq!(manager.processing_order, vec![1, 0]);
        assert_eq!(manager.find_configuration("A").unwrap().harmonics(), &[1, 3]);
        assert_eq!(manager.find_configuration("B").unwrap().harmonics(), &[1, 3]);
        assert!(manager.add_correction_step("A", Recentering::new()).is_err());
    }

    #[test]
    fn test_process_before_initialize() {
        let mut manager = CorrectionManager::new();
        assert!(matches!(
            manager.process_event(&[]),
            Err(CorrectionError::NotInitialized)
        ));
    }

    #[test]
    fn test_passive_while_reference_recentering_calibrates() {
        let mut manager = CorrectionManager::new();
        manager.add_detector_configuration(detector("A")).unwrap();
        manager.add_detector_configuration(detector("B")).unwrap();
        manager.add_correction_step("A", Alignment::new("B", 2)).unwrap();
        manager.add_correction_step("B", Recentering::new()).unwrap();
        manager.initialize(None).unwrap();

        let report = manager.report();
        let alignment = report.iter().find(|r| r.configuration == "A").unwrap();
        assert_eq!(alignment.state, StepState::Passive);
        assert!(!alignment.usage.collecting && !alignment.usage.applying);
    }
}
