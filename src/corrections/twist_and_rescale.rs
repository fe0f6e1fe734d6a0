//! 扭转与重标度校正
//!
//! 与对齐校正使用相同的相关量和旋转，但：
//! - 校准数据基于本步骤的输入向量（前一步骤的输出）累积，
//!   与同一事件中上游已应用的校正解耦
//! - 应用前要求bin条目数达到阈值（默认2），
//!   未达到时跳过旋转并按事件类别记录诊断计数

use super::{CorrectionKind, EventContext, ReferenceLink, StepCore, SupportContext};
use super::rotation::{Correlation, rotate};
use crate::core::{CalibrationStore, Field, QnVector};
use crate::error::CorrectionResult;
use crate::tools::constants::defaults::MIN_ENTRIES_TO_VALIDATE;
use tracing::debug;

const NOT_VALIDATED_PREFIX: &str = "TwScale NvE";

/// 扭转与重标度步骤
#[derive(Debug, Clone)]
pub struct TwistAndRescale {
    pub(crate) harmonic: u32,
    pub(crate) reference: ReferenceLink,
    min_entries: u64,
    diagnostics_name: String,
    /// 未验证bin的事件计数（按事件类别bin）
    not_validated: Vec<u64>,
    pub(crate) core: StepCore,
}

impl TwistAndRescale {
    pub fn new(reference: impl Into<String>, harmonic: u32) -> Self {
        Self {
            harmonic,
            reference: ReferenceLink::new(reference),
            min_entries: MIN_ENTRIES_TO_VALIDATE,
            diagnostics_name: String::new(),
            not_validated: Vec::new(),
            core: StepCore::new(),
        }
    }

    /// bin验证所需的最少条目数
    pub fn with_min_entries(mut self, min_entries: u64) -> Self {
        self.min_entries = min_entries;
        self
    }

    pub fn harmonic(&self) -> u32 {
        self.harmonic
    }

    pub fn min_entries(&self) -> u64 {
        self.min_entries
    }

    /// 诊断名称和按bin的未验证计数
    pub fn not_validated(&self) -> (&str, &[u64]) {
        (&self.diagnostics_name, &self.not_validated)
    }

    pub(crate) fn create_support(&mut self, support: &SupportContext<'_>) -> CorrectionResult<()> {
        let descriptor = CorrectionKind::TwistAndRescale.descriptor();
        let name = format!(
            "{} {}x{}",
            descriptor.profile_prefix,
            support.configuration,
            self.reference.name()
        );
        self.diagnostics_name = format!("{NOT_VALIDATED_PREFIX} {}", support.configuration);
        self.not_validated = vec![0; support.n_bins];
        self.core.create_support(
            CorrectionKind::TwistAndRescale,
            name,
            support,
            &[self.harmonic],
        )
    }

    pub(crate) fn attach_input(&mut self, store: &CalibrationStore, configuration: &str) -> CorrectionResult<bool> {
        let name = CorrectionKind::TwistAndRescale.descriptor().name;
        self.core
            .attach(store, &[self.harmonic], self.min_entries, configuration, name)
    }

    pub(crate) fn process_data_collection(&mut self, input: &QnVector, ctx: &EventContext<'_>) -> bool {
        let state = self.core.state;
        if state.is_collecting() {
            debug!(
                "Twist and rescale in {} with reference {}: collecting data",
                ctx.configuration,
                self.reference.name()
            );
            let reference = ctx.reference_vector(&self.reference);
            if let (Some(bin), Some(reference), Some(profile)) =
                (ctx.bin, reference, self.core.calibration.as_mut())
                && input.is_good_quality()
                && reference.is_good_quality()
            {
                let m = self.harmonic;
                let (ref_x, ref_y) = (reference.qx(m), reference.qy(m));
                profile.fill(bin, m, Field::XX, input.qx(m) * ref_x);
                profile.fill(bin, m, Field::XY, input.qx(m) * ref_y);
                profile.fill(bin, m, Field::YX, input.qy(m) * ref_x);
                profile.fill(bin, m, Field::YY, input.qy(m) * ref_y);
            }
        }
        state.is_applying()
    }

    pub(crate) fn process_corrections(&mut self, current: &mut QnVector, ctx: &EventContext<'_>) -> bool {
        if !self.core.state.is_applying() {
            return false;
        }
        let Some(corrected) = self.core.corrected.as_mut() else {
            return false;
        };
        debug!(
            "Twist and rescale in {} with reference {}: applying correction",
            ctx.configuration,
            self.reference.name()
        );

        corrected.set_from(current, false);
        if !current.is_good_quality() {
            corrected.set_good(false);
        } else if let Some(input) = self.core.input.as_ref() {
            match ctx.bin {
                Some(bin) if input.validated(bin) => {
                    let correlation = Correlation::from_profile(input, bin, self.harmonic);
                    if let Some(delta_phi) = correlation.rotation_angle(self.harmonic) {
                        rotate(current, corrected, delta_phi);
                    }
                }
                Some(bin) => {
                    if let Some(count) = self.not_validated.get_mut(bin) {
                        *count += 1;
                    }
                }
                None => {}
            }
        }

        current.set_from(corrected, true);
        true
    }
}
