//! 探测器间对齐校正
//!
//! 以参考探测器在对齐谐波 m 上的Qn向量为基准，
//! 旋转本探测器的Qn向量以消除系统性相位偏移。

use super::{CorrectionKind, EventContext, ReferenceLink, StepCore, SupportContext};
use super::rotation::{Correlation, rotate};
use crate::core::{CalibrationStore, Field, QnVector};
use crate::error::CorrectionResult;
use crate::tools::constants::defaults::MIN_ENTRIES_TO_VALIDATE;
use tracing::debug;

/// 对齐校正步骤
#[derive(Debug, Clone)]
pub struct Alignment {
    pub(crate) harmonic: u32,
    pub(crate) reference: ReferenceLink,
    collect_all_harmonics: bool,
    min_entries: u64,
    collected_harmonics: Vec<u32>,
    pub(crate) core: StepCore,
}

impl Alignment {
    /// 以参考配置名称和对齐谐波创建
    pub fn new(reference: impl Into<String>, harmonic: u32) -> Self {
        Self {
            harmonic,
            reference: ReferenceLink::new(reference),
            collect_all_harmonics: false,
            min_entries: MIN_ENTRIES_TO_VALIDATE,
            collected_harmonics: Vec::new(),
            core: StepCore::new(),
        }
    }

    /// 对本探测器的所有谐波累积相关量（默认只累积对齐谐波）
    pub fn with_all_harmonics(mut self, enabled: bool) -> Self {
        self.collect_all_harmonics = enabled;
        self
    }

    /// bin验证所需的最少条目数
    pub fn with_min_entries(mut self, min_entries: u64) -> Self {
        self.min_entries = min_entries;
        self
    }

    pub fn harmonic(&self) -> u32 {
        self.harmonic
    }

    pub fn reference_name(&self) -> &str {
        self.reference.name()
    }

    pub(crate) fn create_support(&mut self, support: &SupportContext<'_>) -> CorrectionResult<()> {
        let descriptor = CorrectionKind::Alignment.descriptor();
        self.collected_harmonics = if self.collect_all_harmonics {
            support.harmonics.to_vec()
        } else {
            vec![self.harmonic]
        };
        let name = format!(
            "{} {}x{}",
            descriptor.profile_prefix,
            support.configuration,
            self.reference.name()
        );
        self.core.create_support(
            CorrectionKind::Alignment,
            name,
            support,
            &self.collected_harmonics,
        )
    }

    pub(crate) fn attach_input(&mut self, store: &CalibrationStore, configuration: &str) -> CorrectionResult<bool> {
        let name = CorrectionKind::Alignment.descriptor().name;
        self.core
            .attach(store, &[self.harmonic], self.min_entries, configuration, name)
    }

    pub(crate) fn process_data_collection(&mut self, input: &QnVector, ctx: &EventContext<'_>) -> bool {
        let state = self.core.state;
        if state.is_collecting() {
            debug!(
                "Alignment in {} with reference {}: collecting data",
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
                for &h in &self.collected_harmonics {
                    profile.fill(bin, h, Field::XX, input.qx(h) * ref_x);
                    profile.fill(bin, h, Field::XY, input.qx(h) * ref_y);
                    profile.fill(bin, h, Field::YX, input.qy(h) * ref_x);
                    profile.fill(bin, h, Field::YY, input.qy(h) * ref_y);
                }
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
            "Alignment in {} with reference {}: applying correction",
            ctx.configuration,
            self.reference.name()
        );

        corrected.set_from(current, false);
        let reference_good = ctx
            .reference_vector(&self.reference)
            .is_some_and(QnVector::is_good_quality);

        if !current.is_good_quality() || !reference_good {
            corrected.set_good(false);
        } else if let (Some(bin), Some(input)) = (ctx.bin, self.core.input.as_ref())
            && input.validated(bin)
            && let Some(delta_phi) =
                Correlation::from_profile(input, bin, self.harmonic).rotation_angle(self.harmonic)
        {
            rotate(current, corrected, delta_phi);
        }
        // 未验证或不显著：保持不变

        current.set_from(corrected, true);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Profile, ProfileKind};
    use crate::corrections::StepState;
    use crate::detector::ReferenceView;
    use approx::assert_abs_diff_eq;

    fn prepared() -> Alignment {
        let mut step = Alignment::new("REF", 2);
        step.create_support(&SupportContext {
            configuration: "A",
            harmonics: &[1, 2],
            n_bins: 1,
        })
        .unwrap();
        step
    }

    fn ctx() -> EventContext<'static> {
        EventContext {
            configuration: "A",
            variables: &[],
            bin: Some(0),
            references: ReferenceView::empty(),
        }
    }

    #[test]
    fn test_profile_name_and_harmonics() {
        let step = prepared();
        let profile = step.core.calibration.as_ref().unwrap();
        assert_eq!(profile.name(), "QnQn AxREF");
        assert_eq!(profile.harmonics(), &[2]);

        let mut all = Alignment::new("REF", 2).with_all_harmonics(true);
        all.create_support(&SupportContext {
            configuration: "A",
            harmonics: &[1, 2, 3],
            n_bins: 1,
        })
        .unwrap();
        assert_eq!(all.core.calibration.as_ref().unwrap().harmonics(), &[1, 2, 3]);
    }

    #[test]
    fn test_unresolved_reference_marks_bad_quality() {
        let mut step = prepared();
        let mut profile = Profile::new("QnQn AxREF", ProfileKind::Correlation, 1, &[2]);
        for _ in 0..3 {
            profile.fill(0, 2, Field::XY, 1.0);
            profile.fill(0, 2, Field::XX, 0.0);
            profile.fill(0, 2, Field::YX, 0.0);
            profile.fill(0, 2, Field::YY, 0.0);
        }
        let mut store = CalibrationStore::new();
        store.insert(profile);
        assert!(step.attach_input(&store, "A").unwrap());
        assert_eq!(step.core.state, StepState::ApplyingAndCollecting);

        // 空引用视图：参考向量不可得，视为坏质量
        let mut current = QnVector::new("plain", &[1, 2]).unwrap();
        current.set_qx(2, 1.0);
        assert!(step.process_corrections(&mut current, &ctx()));
        assert!(!current.is_good_quality());
        assert_eq!(current.qx(2), 1.0);
        assert_eq!(current.name(), "align");
    }

    #[test]
    fn test_calibrating_returns_false() {
        let mut step = prepared();
        let mut current = QnVector::new("plain", &[1, 2]).unwrap();
        assert!(!step.process_corrections(&mut current, &ctx()));
        assert!(!step.process_data_collection(&current.clone(), &ctx()));
        assert_eq!(step.core.calibration.as_ref().unwrap().entry_count(0), 0);
        assert_abs_diff_eq!(current.qx(2), 0.0);
    }
}
