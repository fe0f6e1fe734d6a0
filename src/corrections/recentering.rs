//! 重心校正（可选宽度均衡）
//!
//! 校准：对每个好质量事件，按事件类别bin和谐波累积 (Qx, Qy)。
//! 应用：Qx' = (Qx - <Qx>) / σx，Qy' = (Qy - <Qy>) / σy，
//! 未启用宽度均衡时 σ = 1。

use super::{CorrectionKind, EventContext, StepCore, SupportContext};
use crate::core::{CalibrationStore, Field, QnVector};
use crate::error::CorrectionResult;
use crate::tools::constants::defaults::MIN_ENTRIES_TO_VALIDATE;
use tracing::debug;

/// 重心校正步骤
#[derive(Debug, Clone)]
pub struct Recentering {
    apply_width_equalization: bool,
    harmonics: Vec<u32>,
    pub(crate) core: StepCore,
}

impl Default for Recentering {
    fn default() -> Self {
        Self::new()
    }
}

impl Recentering {
    pub fn new() -> Self {
        Self {
            apply_width_equalization: false,
            harmonics: Vec::new(),
            core: StepCore::new(),
        }
    }

    /// 启用宽度均衡
    pub fn with_width_equalization(mut self, enabled: bool) -> Self {
        self.apply_width_equalization = enabled;
        self
    }

    pub fn width_equalization(&self) -> bool {
        self.apply_width_equalization
    }

    pub(crate) fn create_support(&mut self, support: &SupportContext<'_>) -> CorrectionResult<()> {
        let descriptor = CorrectionKind::Recentering.descriptor();
        self.harmonics = support.harmonics.to_vec();
        let name = format!("{} {}", descriptor.profile_prefix, support.configuration);
        self.core
            .create_support(CorrectionKind::Recentering, name, support, support.harmonics)
    }

    pub(crate) fn attach_input(&mut self, store: &CalibrationStore, configuration: &str) -> CorrectionResult<bool> {
        let name = CorrectionKind::Recentering.descriptor().name;
        self.core
            .attach(store, &self.harmonics, MIN_ENTRIES_TO_VALIDATE, configuration, name)
    }

    pub(crate) fn process_data_collection(&mut self, input: &QnVector, ctx: &EventContext<'_>) -> bool {
        let state = self.core.state;
        if state.is_collecting() {
            debug!("Recentering in {}: collecting data", ctx.configuration);
            if let (Some(bin), Some(profile)) = (ctx.bin, self.core.calibration.as_mut())
                && input.is_good_quality()
            {
                for h in input.harmonics() {
                    profile.fill(bin, h, Field::X, input.qx(h));
                    profile.fill(bin, h, Field::Y, input.qy(h));
                }
            }
        }
        // 仅收集时流水线到此为止
        state.is_applying()
    }

    pub(crate) fn process_corrections(&mut self, current: &mut QnVector, ctx: &EventContext<'_>) -> bool {
        if !self.core.state.is_applying() {
            return false;
        }
        let Some(corrected) = self.core.corrected.as_mut() else {
            return false;
        };
        debug!("Recentering in {}: applying correction", ctx.configuration);

        corrected.set_from(current, false);
        if !current.is_good_quality() {
            corrected.set_good(false);
        } else if let (Some(bin), Some(input)) = (ctx.bin, self.core.input.as_ref())
            && input.entry_count(bin) > 0
        {
            for h in current.harmonics() {
                let (mut width_x, mut width_y) = (1.0, 1.0);
                if self.apply_width_equalization {
                    width_x = positive_or_one(input.spread(bin, h, Field::X));
                    width_y = positive_or_one(input.spread(bin, h, Field::Y));
                }
                corrected.set_qx(h, (current.qx(h) - input.content(bin, h, Field::X)) / width_x);
                corrected.set_qy(h, (current.qy(h) - input.content(bin, h, Field::Y)) / width_y);
            }
        }

        current.set_from(corrected, true);
        true
    }
}

#[inline]
fn positive_or_one(width: f64) -> f64 {
    if width > 0.0 { width } else { 1.0 }
}
