//! Qn向量（流向量）核心数据结构
//!
//! 每个谐波 n 对应一对分量 (Qx, Qy)：
//! - Qx(n) = Σ w·cos(nφ)
//! - Qy(n) = Σ w·sin(nφ)
//!
//! 谐波集合在创建后固定；事件循环中只修改分量值和质量标志，
//! 不会重新分配内存。

use crate::error::{CorrectionResult, invalid_harmonic};
use crate::tools::constants::defaults::MAX_HARMONIC;
use serde::{Deserialize, Serialize};

/// Qn向量归一化方法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QnNormalization {
    /// 不归一化
    #[default]
    None,
    /// 除以权重和 M
    QoverM,
    /// 除以 √M
    QoverSqrtM,
    /// 每个谐波除以自身模长
    QoverQlength,
}

/// 按谐波索引的二维流向量
///
/// 谐波成员表是显式的稀疏集合（例如 {1, 2, 4}），
/// 分量数组按谐波编号直接索引，索引0不使用。
#[derive(Debug, Clone, PartialEq)]
pub struct QnVector {
    /// 显示标签，记录最后一次修改它的校正
    name: String,

    /// 谐波成员表（索引 = 谐波编号）
    active: Vec<bool>,

    /// 各谐波的Qx分量
    qx: Vec<f64>,

    /// 各谐波的Qy分量
    qy: Vec<f64>,

    /// 质量标志
    good_quality: bool,

    /// 参与构建的数据向量个数
    multiplicity: u64,

    /// 参与构建的权重和
    sum_of_weights: f64,
}

impl QnVector {
    /// 用给定谐波集合创建Qn向量
    ///
    /// 谐波必须为 1..=[`MAX_HARMONIC`] 内的整数；重复的谐波编号会被合并。
    ///
    /// # 示例
    ///
    /// ```rust
    /// use qn_corrections::core::QnVector;
    ///
    /// let qn = QnVector::new("plain", &[1, 2, 4]).unwrap();
    /// assert_eq!(qn.harmonics().collect::<Vec<_>>(), vec![1, 2, 4]);
    /// assert!(qn.is_good_quality());
    /// ```
    pub fn new(name: impl Into<String>, harmonics: &[u32]) -> CorrectionResult<Self> {
        if harmonics.is_empty() {
            return Err(invalid_harmonic(0, "Qn向量至少需要一个谐波"));
        }
        if let Some(&zero) = harmonics.iter().find(|&&h| h == 0) {
            return Err(invalid_harmonic(zero, "谐波编号必须为正"));
        }
        if let Some(&large) = harmonics.iter().find(|&&h| h > MAX_HARMONIC) {
            return Err(invalid_harmonic(
                large,
                format!("谐波编号不能超过 {MAX_HARMONIC} / harmonic above {MAX_HARMONIC}"),
            ));
        }

        let max = harmonics.iter().copied().max().unwrap_or(0) as usize;
        let mut active = vec![false; max + 1];
        for &h in harmonics {
            active[h as usize] = true;
        }

        Ok(Self {
            name: name.into(),
            active,
            qx: vec![0.0; max + 1],
            qy: vec![0.0; max + 1],
            good_quality: true,
            multiplicity: 0,
            sum_of_weights: 0.0,
        })
    }

    /// 显示标签
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 按升序遍历激活的谐波
    pub fn harmonics(&self) -> impl Iterator<Item = u32> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(|(h, _)| h as u32)
    }

    /// 激活谐波个数
    pub fn no_of_harmonics(&self) -> usize {
        self.active.iter().filter(|on| **on).count()
    }

    /// 最高谐波编号
    pub fn max_harmonic(&self) -> u32 {
        (self.active.len() - 1) as u32
    }

    /// 谐波是否属于该向量
    #[inline]
    pub fn has_harmonic(&self, harmonic: u32) -> bool {
        self.active.get(harmonic as usize).copied().unwrap_or(false)
    }

    /// 谐波 h 的Qx分量（非激活谐波返回0）
    #[inline]
    pub fn qx(&self, harmonic: u32) -> f64 {
        self.qx.get(harmonic as usize).copied().unwrap_or(0.0)
    }

    /// 谐波 h 的Qy分量（非激活谐波返回0）
    #[inline]
    pub fn qy(&self, harmonic: u32) -> f64 {
        self.qy.get(harmonic as usize).copied().unwrap_or(0.0)
    }

    /// 设置Qx分量；非激活谐波被忽略
    #[inline]
    pub fn set_qx(&mut self, harmonic: u32, value: f64) {
        if self.has_harmonic(harmonic) {
            self.qx[harmonic as usize] = value;
        }
    }

    /// 设置Qy分量；非激活谐波被忽略
    #[inline]
    pub fn set_qy(&mut self, harmonic: u32, value: f64) {
        if self.has_harmonic(harmonic) {
            self.qy[harmonic as usize] = value;
        }
    }

    /// 质量标志
    #[inline]
    pub fn is_good_quality(&self) -> bool {
        self.good_quality
    }

    /// 设置质量标志
    #[inline]
    pub fn set_good(&mut self, good: bool) {
        self.good_quality = good;
    }

    /// 数据向量个数
    pub fn multiplicity(&self) -> u64 {
        self.multiplicity
    }

    /// 权重和
    pub fn sum_of_weights(&self) -> f64 {
        self.sum_of_weights
    }

    /// 模长 |Q(h)|
    pub fn modulus(&self, harmonic: u32) -> f64 {
        self.qx(harmonic).hypot(self.qy(harmonic))
    }

    /// 事件平面角 Ψ(h) = atan2(Qy, Qx) / h
    pub fn event_plane(&self, harmonic: u32) -> f64 {
        if harmonic == 0 {
            return 0.0;
        }
        self.qy(harmonic).atan2(self.qx(harmonic)) / harmonic as f64
    }

    /// 为新事件清空：分量归零，质量置为好
    pub fn reset(&mut self) {
        self.qx.fill(0.0);
        self.qy.fill(0.0);
        self.good_quality = true;
        self.multiplicity = 0;
        self.sum_of_weights = 0.0;
    }

    /// 从另一向量复制分量和质量
    ///
    /// 只复制两者共有的谐波；`change_name` 为真时同时接受对方的标签，
    /// 用于记录当前向量最后由哪个校正修改。
    pub fn set_from(&mut self, other: &QnVector, change_name: bool) {
        let common = self.active.len().min(other.active.len());
        for h in 0..common {
            if self.active[h] {
                self.qx[h] = other.qx[h];
                self.qy[h] = other.qy[h];
            }
        }
        self.good_quality = other.good_quality;
        self.multiplicity = other.multiplicity;
        self.sum_of_weights = other.sum_of_weights;
        if change_name && self.name != other.name {
            self.name.clear();
            self.name.push_str(&other.name);
        }
    }

    /// 累加一个数据向量（方位角 φ，权重 w）到所有激活谐波
    pub fn add(&mut self, phi: f64, weight: f64) {
        for h in 1..self.active.len() {
            if self.active[h] {
                let (sin, cos) = (h as f64 * phi).sin_cos();
                self.qx[h] += weight * cos;
                self.qy[h] += weight * sin;
            }
        }
        self.multiplicity += 1;
        self.sum_of_weights += weight;
    }

    /// 构建完成后检查多重数并归一化
    ///
    /// 权重和为0或数据向量少于 `min_multiplicity` 时标记为坏质量，不做除法。
    pub fn finalize(&mut self, normalization: QnNormalization, min_multiplicity: u64) {
        if self.multiplicity < min_multiplicity || self.sum_of_weights == 0.0 {
            self.good_quality = false;
            return;
        }

        match normalization {
            QnNormalization::None => {}
            QnNormalization::QoverM => self.scale(1.0 / self.sum_of_weights),
            QnNormalization::QoverSqrtM => self.scale(1.0 / self.sum_of_weights.sqrt()),
            QnNormalization::QoverQlength => {
                for h in 1..self.active.len() {
                    if !self.active[h] {
                        continue;
                    }
                    let len = self.qx[h].hypot(self.qy[h]);
                    if len > 0.0 {
                        self.qx[h] /= len;
                        self.qy[h] /= len;
                    }
                }
            }
        }
    }

    fn scale(&mut self, factor: f64) {
        for h in 1..self.active.len() {
            if self.active[h] {
                self.qx[h] *= factor;
                self.qy[h] *= factor;
            }
        }
    }
}
