//! 对齐类校正的相关量与旋转
//!
//! 相关量定义（自身谐波 h，参考谐波 m）：
//! XX = Qx_self·Qx_ref，XY = Qx_self·Qy_ref，YX = Qy_self·Qx_ref，YY = Qy_self·Qy_ref
//!
//! 旋转角 Δφ = -atan2(XY - YX, XX + YY) / m，
//! 仅当 sqrt((XY-YX)² / (eXY² + eYX²)) ≥ 2.0 时应用。

use crate::core::{Field, Profile, QnVector};
use crate::tools::constants::algorithm::SIGNIFICANCE_THRESHOLD;

/// 一个bin的相关量平均值和误差
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Correlation {
    pub xx: f64,
    pub xy: f64,
    pub yx: f64,
    pub yy: f64,
    pub e_xy: f64,
    pub e_yx: f64,
}

impl Correlation {
    /// 从Profile读取bin内容
    pub fn from_profile(profile: &Profile, bin: usize, harmonic: u32) -> Self {
        Self {
            xx: profile.content(bin, harmonic, Field::XX),
            xy: profile.content(bin, harmonic, Field::XY),
            yx: profile.content(bin, harmonic, Field::YX),
            yy: profile.content(bin, harmonic, Field::YY),
            e_xy: profile.error(bin, harmonic, Field::XY),
            e_yx: profile.error(bin, harmonic, Field::YX),
        }
    }

    /// 不对称性的显著性
    ///
    /// 合成误差为0时：不对称非零视为无穷显著，不对称为零视为不显著。
    pub fn significance(&self) -> f64 {
        let asymmetry = self.xy - self.yx;
        let variance = self.e_xy * self.e_xy + self.e_yx * self.e_yx;
        if variance > 0.0 {
            (asymmetry * asymmetry / variance).sqrt()
        } else if asymmetry != 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    /// 旋转角 Δφ（对齐谐波 m）
    pub fn delta_phi(&self, harmonic: u32) -> f64 {
        -(self.xy - self.yx).atan2(self.xx + self.yy) / harmonic as f64
    }

    /// 显著时返回旋转角，否则None
    pub fn rotation_angle(&self, harmonic: u32) -> Option<f64> {
        (self.significance() >= SIGNIFICANCE_THRESHOLD).then(|| self.delta_phi(harmonic))
    }
}

/// 将 `source` 的每个激活谐波旋转 h·Δφ 写入 `target`
///
/// Qx' = Qx·cos(hΔφ) + Qy·sin(hΔφ)
/// Qy' = Qy·cos(hΔφ) - Qx·sin(hΔφ)
pub fn rotate(source: &QnVector, target: &mut QnVector, delta_phi: f64) {
    for h in source.harmonics() {
        let (sin, cos) = (h as f64 * delta_phi).sin_cos();
        let (qx, qy) = (source.qx(h), source.qy(h));
        target.set_qx(h, qx * cos + qy * sin);
        target.set_qy(h, qy * cos - qx * sin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn test_significance_boundary_applies() {
        let c = Correlation {
            xy: 2.0,
            e_xy: 1.0,
            ..Default::default()
        };
        assert_eq!(c.significance(), 2.0);
        assert!(c.rotation_angle(2).is_some());

        let below = Correlation {
            e_xy: 1.000_001,
            ..c
        };
        assert!(below.significance() < 2.0);
        assert!(below.rotation_angle(2).is_none());
    }

    #[test]
    fn test_zero_error_cases() {
        let symmetric = Correlation {
            xx: 1.0,
            ..Default::default()
        };
        assert_eq!(symmetric.significance(), 0.0);
        assert!(symmetric.rotation_angle(1).is_none());

        let skewed = Correlation {
            xy: 1.0,
            ..Default::default()
        };
        assert!(skewed.significance().is_infinite());
        assert_abs_diff_eq!(skewed.rotation_angle(2).unwrap(), -FRAC_PI_4, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_preserves_norm() {
        let mut source = QnVector::new("src", &[1, 2, 3]).unwrap();
        for h in 1..=3 {
            source.set_qx(h, 0.3 * h as f64);
            source.set_qy(h, -0.7 + 0.1 * h as f64);
        }
        let mut target = source.clone();

        for delta_phi in [-2.5, -0.3, 0.0, 0.77, 3.1] {
            rotate(&source, &mut target, delta_phi);
            for h in 1..=3 {
                assert_abs_diff_eq!(target.modulus(h), source.modulus(h), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_rotation_by_harmonic_multiple() {
        let mut source = QnVector::new("src", &[2]).unwrap();
        source.set_qx(2, 1.0);
        let mut target = source.clone();
        rotate(&source, &mut target, -FRAC_PI_4);
        // 2·(-π/4) = -π/2：(1,0) → (0,1)
        assert_abs_diff_eq!(target.qx(2), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(target.qy(2), 1.0, epsilon = 1e-12);
    }
}
