//! 校正步骤模块
//!
//! 每个校正步骤是一个独立的算法单元，拥有：
//! - 稳定的名称和4字符排序键（决定流水线顺序）
//! - 生命周期状态（[`StepState`]）
//! - 独占的校正后Qn向量缓冲区，处理后发布回所属配置
//! - 正在累积的校准Profile，以及上一轮附加的只读输入Profile
//!
//! 流水线中的步骤以 [`CorrectionStep`] 枚举统一分派。

pub mod alignment;
pub mod recentering;
pub mod rotation;
pub mod twist_and_rescale;

pub use alignment::Alignment;
pub use recentering::Recentering;
pub use rotation::{Correlation, rotate};
pub use twist_and_rescale::TwistAndRescale;

use crate::core::{CalibrationStore, Profile, ProfileKind, QnVector};
use crate::detector::{ConfigurationId, ReferenceView};
use crate::error::CorrectionResult;
use crate::tools::constants::corrections::*;
use tracing::info;

/// 校正类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrectionKind {
    Recentering,
    Alignment,
    TwistAndRescale,
}

/// 校正类别的静态描述
#[derive(Debug)]
pub struct CorrectionDescriptor {
    /// 校正名称（配置内唯一）
    pub name: &'static str,
    /// 排序键
    pub key: &'static str,
    /// 校准Profile名前缀
    pub profile_prefix: &'static str,
    /// 校正后Qn向量标签
    pub label: &'static str,
    /// 校准Profile布局
    pub profile_kind: ProfileKind,
}

const DESCRIPTORS: [CorrectionDescriptor; 3] = [
    CorrectionDescriptor {
        name: RECENTERING_NAME,
        key: RECENTERING_KEY,
        profile_prefix: RECENTERING_PROFILE,
        label: RECENTERING_LABEL,
        profile_kind: ProfileKind::Components,
    },
    CorrectionDescriptor {
        name: ALIGNMENT_NAME,
        key: ALIGNMENT_KEY,
        profile_prefix: ALIGNMENT_PROFILE,
        label: ALIGNMENT_LABEL,
        profile_kind: ProfileKind::Correlation,
    },
    CorrectionDescriptor {
        name: TWIST_AND_RESCALE_NAME,
        key: TWIST_AND_RESCALE_KEY,
        profile_prefix: TWIST_AND_RESCALE_PROFILE,
        label: TWIST_AND_RESCALE_LABEL,
        profile_kind: ProfileKind::Correlation,
    },
];

impl CorrectionKind {
    /// 查表获取描述
    pub fn descriptor(&self) -> &'static CorrectionDescriptor {
        match self {
            Self::Recentering => &DESCRIPTORS[0],
            Self::Alignment => &DESCRIPTORS[1],
            Self::TwistAndRescale => &DESCRIPTORS[2],
        }
    }
}

/// 校正步骤生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// 只收集校准数据
    Calibrating,
    /// 应用上一轮校准，同时继续收集
    ApplyingAndCollecting,
    /// 只应用
    Applying,
    /// 等待外部条件，既不收集也不应用
    Passive,
}

impl StepState {
    pub fn is_collecting(&self) -> bool {
        matches!(self, Self::Calibrating | Self::ApplyingAndCollecting)
    }

    pub fn is_applying(&self) -> bool {
        matches!(self, Self::ApplyingAndCollecting | Self::Applying)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Calibrating => "calibrating",
            Self::ApplyingAndCollecting => "applying+collecting",
            Self::Applying => "applying",
            Self::Passive => "passive",
        }
    }
}

/// 步骤使用情况报告
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepUsage {
    pub collecting: bool,
    pub applying: bool,
}

/// 按名称引用的另一个探测器配置（非拥有）
///
/// 名称在配置时记录，在框架初始化时解析为 [`ConfigurationId`]。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceLink {
    name: String,
    resolved: Option<ConfigurationId>,
}

impl ReferenceLink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<ConfigurationId> {
        self.resolved
    }

    pub(crate) fn resolve(&mut self, id: ConfigurationId) {
        self.resolved = Some(id);
    }
}

/// 单个事件的处理上下文
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    /// 所属配置名称（日志用）
    pub configuration: &'a str,
    /// 变量容器
    pub variables: &'a [f64],
    /// 事件类别bin；事件不属于任何类别时为None
    pub bin: Option<usize>,
    /// 其他配置的当前Qn向量
    pub references: ReferenceView<'a>,
}

impl<'a> EventContext<'a> {
    /// 解析引用的当前Qn向量
    pub fn reference_vector(&self, link: &ReferenceLink) -> Option<&'a QnVector> {
        self.references.current_vector(link.id()?)
    }
}

/// 建立支持数据结构时需要的配置信息
#[derive(Debug, Clone, Copy)]
pub struct SupportContext<'a> {
    pub configuration: &'a str,
    pub harmonics: &'a [u32],
    pub n_bins: usize,
}

/// 所有步骤共有的状态：生命周期、校正缓冲区、校准Profile
#[derive(Debug, Clone)]
pub(crate) struct StepCore {
    pub(crate) state: StepState,
    /// 进入Passive前的状态
    suspended: Option<StepState>,
    pub(crate) corrected: Option<QnVector>,
    pub(crate) calibration: Option<Profile>,
    pub(crate) input: Option<Profile>,
}

impl StepCore {
    pub(crate) fn new() -> Self {
        Self {
            state: StepState::Calibrating,
            suspended: None,
            corrected: None,
            calibration: None,
            input: None,
        }
    }

    /// 创建校正后向量缓冲区和校准Profile
    pub(crate) fn create_support(
        &mut self,
        kind: CorrectionKind,
        profile_name: String,
        support: &SupportContext<'_>,
        profile_harmonics: &[u32],
    ) -> CorrectionResult<()> {
        let descriptor = kind.descriptor();
        self.corrected = Some(QnVector::new(descriptor.label, support.harmonics)?);
        self.calibration = Some(Profile::new(
            profile_name,
            descriptor.profile_kind,
            support.n_bins,
            profile_harmonics,
        ));
        Ok(())
    }

    /// 从上一轮校准数据中附加输入Profile
    ///
    /// 找不到同名Profile返回 `Ok(false)`（校准不可用，保持原状态）；
    /// 形状不匹配是配置错误。
    pub(crate) fn attach(
        &mut self,
        store: &CalibrationStore,
        required_harmonics: &[u32],
        min_entries: u64,
        configuration: &str,
        step: &str,
    ) -> CorrectionResult<bool> {
        let Some(calibration) = &self.calibration else {
            return Ok(false);
        };
        let Some(found) = store.get(calibration.name()) else {
            info!("{step} on {configuration}: no calibration input, staying {:?}", self.state);
            return Ok(false);
        };
        found.check_shape(calibration.kind(), calibration.n_bins(), required_harmonics)?;

        let mut input = found.clone();
        input.set_min_entries(min_entries);
        self.input = Some(input);
        self.advance_on_attach();
        info!("{step} on {configuration} going to be applied ({:?})", self.state);
        Ok(true)
    }

    fn advance_on_attach(&mut self) {
        match (self.state, self.suspended) {
            (StepState::Calibrating, _) => self.state = StepState::ApplyingAndCollecting,
            (StepState::Passive, Some(StepState::Calibrating)) => {
                self.suspended = Some(StepState::ApplyingAndCollecting)
            }
            _ => {}
        }
    }

    /// 根据外部条件进入或离开Passive
    pub(crate) fn set_passive(&mut self, passive: bool, configuration: &str, step: &str) {
        match (self.state, passive) {
            (StepState::Passive, false) => {
                self.state = self.suspended.take().unwrap_or(StepState::Calibrating);
                info!("{step} on {configuration} leaves passive state ({:?})", self.state);
            }
            (StepState::Passive, true) | (_, false) => {}
            (state, true) => {
                self.suspended = Some(state);
                self.state = StepState::Passive;
                info!("{step} on {configuration} waits for its reference, passive");
            }
        }
    }

    /// 外部决定不再继续细化：ApplyingAndCollecting → Applying
    pub(crate) fn stop_collecting(&mut self) {
        match (self.state, self.suspended) {
            (StepState::ApplyingAndCollecting, _) => self.state = StepState::Applying,
            (StepState::Passive, Some(StepState::ApplyingAndCollecting)) => {
                self.suspended = Some(StepState::Applying)
            }
            _ => {}
        }
    }

    pub(crate) fn clear(&mut self) {
        if let Some(corrected) = &mut self.corrected {
            corrected.reset();
        }
    }
}

/// 流水线中的校正步骤
#[derive(Debug, Clone)]
pub enum CorrectionStep {
    Recentering(Recentering),
    Alignment(Alignment),
    TwistAndRescale(TwistAndRescale),
}

impl From<Recentering> for CorrectionStep {
    fn from(step: Recentering) -> Self {
        Self::Recentering(step)
    }
}

impl From<Alignment> for CorrectionStep {
    fn from(step: Alignment) -> Self {
        Self::Alignment(step)
    }
}

impl From<TwistAndRescale> for CorrectionStep {
    fn from(step: TwistAndRescale) -> Self {
        Self::TwistAndRescale(step)
    }
}

impl CorrectionStep {
    pub fn kind(&self) -> CorrectionKind {
        match self {
            Self::Recentering(_) => CorrectionKind::Recentering,
            Self::Alignment(_) => CorrectionKind::Alignment,
            Self::TwistAndRescale(_) => CorrectionKind::TwistAndRescale,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().descriptor().name
    }

    pub fn key(&self) -> &'static str {
        self.kind().descriptor().key
    }

    /// 排序比较：按键的字典序
    pub fn before(&self, other: &CorrectionStep) -> bool {
        self.key() < other.key()
    }

    fn core(&self) -> &StepCore {
        match self {
            Self::Recentering(s) => &s.core,
            Self::Alignment(s) => &s.core,
            Self::TwistAndRescale(s) => &s.core,
        }
    }

    fn core_mut(&mut self) -> &mut StepCore {
        match self {
            Self::Recentering(s) => &mut s.core,
            Self::Alignment(s) => &mut s.core,
            Self::TwistAndRescale(s) => &mut s.core,
        }
    }

    pub fn state(&self) -> StepState {
        self.core().state
    }

    /// 是否正在应用校正
    pub fn is_being_applied(&self) -> bool {
        self.state().is_applying()
    }

    pub fn report_usage(&self) -> StepUsage {
        StepUsage {
            collecting: self.state().is_collecting(),
            applying: self.state().is_applying(),
        }
    }

    /// 跨配置引用（对齐类步骤）
    pub fn reference(&self) -> Option<&ReferenceLink> {
        match self {
            Self::Recentering(_) => None,
            Self::Alignment(s) => Some(&s.reference),
            Self::TwistAndRescale(s) => Some(&s.reference),
        }
    }

    pub(crate) fn reference_mut(&mut self) -> Option<&mut ReferenceLink> {
        match self {
            Self::Recentering(_) => None,
            Self::Alignment(s) => Some(&mut s.reference),
            Self::TwistAndRescale(s) => Some(&mut s.reference),
        }
    }

    /// 对齐谐波；需要在本配置和参考配置中激活
    pub fn alignment_harmonic(&self) -> Option<u32> {
        match self {
            Self::Recentering(_) => None,
            Self::Alignment(s) => Some(s.harmonic),
            Self::TwistAndRescale(s) => Some(s.harmonic),
        }
    }

    /// 本步骤最新的校正后向量
    pub fn corrected(&self) -> Option<&QnVector> {
        self.core().corrected.as_ref()
    }

    /// 正在累积的校准Profile
    pub fn calibration_profile(&self) -> Option<&Profile> {
        self.core().calibration.as_ref()
    }

    /// 已附加的输入Profile
    pub fn input_profile(&self) -> Option<&Profile> {
        self.core().input.as_ref()
    }

    /// 未验证bin诊断（名称，按bin计数）
    pub fn diagnostics(&self) -> Option<(&str, &[u64])> {
        match self {
            Self::TwistAndRescale(s) => Some(s.not_validated()),
            _ => None,
        }
    }

    pub(crate) fn create_support(&mut self, support: &SupportContext<'_>) -> CorrectionResult<()> {
        match self {
            Self::Recentering(s) => s.create_support(support),
            Self::Alignment(s) => s.create_support(support),
            Self::TwistAndRescale(s) => s.create_support(support),
        }
    }

    /// 附加上一轮校准数据；成功时 Calibrating → ApplyingAndCollecting
    pub fn attach_input(&mut self, store: &CalibrationStore, configuration: &str) -> CorrectionResult<bool> {
        match self {
            Self::Recentering(s) => s.attach_input(store, configuration),
            Self::Alignment(s) => s.attach_input(store, configuration),
            Self::TwistAndRescale(s) => s.attach_input(store, configuration),
        }
    }

    /// 输入附加完成后检查外部条件
    ///
    /// `reference_recentering_applied`：参考配置的重心校正是否在应用，
    /// 参考配置没有重心校正步骤时为None。
    pub(crate) fn after_inputs_attach(
        &mut self,
        reference_recentering_applied: Option<bool>,
        configuration: &str,
    ) {
        if self.reference().is_none() {
            return;
        }
        let name = self.name();
        let blocked = reference_recentering_applied == Some(false);
        self.core_mut().set_passive(blocked, configuration, name);
    }

    /// 外部策略：停止继续收集
    pub fn stop_collecting(&mut self) {
        self.core_mut().stop_collecting();
    }

    /// 为新事件清空缓冲区
    pub fn clear(&mut self) {
        self.core_mut().clear();
    }

    /// 应用校正；返回是否应用（Calibrating/Passive返回false，流水线就此中断）
    pub fn process_corrections(&mut self, current: &mut QnVector, ctx: &EventContext<'_>) -> bool {
        match self {
            Self::Recentering(s) => s.process_corrections(current, ctx),
            Self::Alignment(s) => s.process_corrections(current, ctx),
            Self::TwistAndRescale(s) => s.process_corrections(current, ctx),
        }
    }

    /// 收集校准数据；返回是否继续后续步骤的收集
    ///
    /// `input` 是本步骤的输入向量（前一步骤输出，或原始向量）。
    pub fn process_data_collection(&mut self, input: &QnVector, ctx: &EventContext<'_>) -> bool {
        match self {
            Self::Recentering(s) => s.process_data_collection(input, ctx),
            Self::Alignment(s) => s.process_data_collection(input, ctx),
            Self::TwistAndRescale(s) => s.process_data_collection(input, ctx),
        }
    }
}
