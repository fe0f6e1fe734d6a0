//! 校准数据存储
//!
//! 按事件类别bin索引的统计累积器（Σv、Σv²、条目数），
//! 每个校正步骤拥有一个正在累积的 [`Profile`]，
//! 并可从上一轮的 [`CalibrationStore`] 中附加一个只读的输入 [`Profile`]。
//!
//! 多个独立作业的校准数据可通过逐项相加原始累积量合并（[`CalibrationStore::merge`]）。

use crate::error::{CorrectionError, CorrectionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::tools::constants::defaults::MIN_ENTRIES_TO_VALIDATE;

/// 校准分量字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    X,
    Y,
    XX,
    XY,
    YX,
    YY,
}

/// Profile布局类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// 每谐波 {X, Y}（重心校正）
    Components,
    /// 每谐波 {XX, XY, YX, YY}（对齐类校正）
    Correlation,
}

impl ProfileKind {
    /// 该布局包含的字段
    pub fn fields(&self) -> &'static [Field] {
        match self {
            Self::Components => &[Field::X, Field::Y],
            Self::Correlation => &[Field::XX, Field::XY, Field::YX, Field::YY],
        }
    }

    fn field_index(&self, field: Field) -> Option<usize> {
        self.fields().iter().position(|&f| f == field)
    }
}

/// 单个bin单个分量的累积器
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BinAccumulator {
    pub entries: u64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl BinAccumulator {
    /// 累积一个值
    #[inline]
    pub fn fill(&mut self, value: f64) {
        self.entries += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    /// 合并另一累积器（交换、结合）
    #[inline]
    pub fn merge(&mut self, other: &BinAccumulator) {
        self.entries += other.entries;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }

    /// 平均值；空bin为0
    pub fn mean(&self) -> f64 {
        if self.entries == 0 {
            return 0.0;
        }
        self.sum / self.entries as f64
    }

    /// 标准差（分布宽度）
    pub fn spread(&self) -> f64 {
        if self.entries == 0 {
            return 0.0;
        }
        let n = self.entries as f64;
        let mean = self.sum / n;
        (self.sum_sq / n - mean * mean).max(0.0).sqrt()
    }

    /// 平均值的误差 spread/√n
    pub fn error(&self) -> f64 {
        if self.entries == 0 {
            return 0.0;
        }
        self.spread() / (self.entries as f64).sqrt()
    }
}

/// 按事件类别bin和谐波索引的分量Profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    name: String,
    kind: ProfileKind,
    n_bins: usize,
    harmonics: Vec<u32>,

    /// 验证阈值由读取方设置，不随数据持久化
    #[serde(skip, default = "default_min_entries")]
    min_entries: u64,

    /// 索引 = (bin * 谐波数 + 谐波序号) * 字段数 + 字段序号
    cells: Vec<BinAccumulator>,
}

fn default_min_entries() -> u64 {
    MIN_ENTRIES_TO_VALIDATE
}

impl Profile {
    /// 创建空Profile
    pub fn new(name: impl Into<String>, kind: ProfileKind, n_bins: usize, harmonics: &[u32]) -> Self {
        let cells = n_bins * harmonics.len() * kind.fields().len();
        Self {
            name: name.into(),
            kind,
            n_bins,
            harmonics: harmonics.to_vec(),
            min_entries: MIN_ENTRIES_TO_VALIDATE,
            cells: vec![BinAccumulator::default(); cells],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn harmonics(&self) -> &[u32] {
        &self.harmonics
    }

    /// 设置bin验证所需的最少条目数
    pub fn set_min_entries(&mut self, min_entries: u64) {
        self.min_entries = min_entries;
    }

    pub fn min_entries(&self) -> u64 {
        self.min_entries
    }

    fn cell_index(&self, bin: usize, harmonic: u32, field: Field) -> Option<usize> {
        if bin >= self.n_bins {
            return None;
        }
        let h = self.harmonics.iter().position(|&x| x == harmonic)?;
        let f = self.kind.field_index(field)?;
        let n_fields = self.kind.fields().len();
        Some((bin * self.harmonics.len() + h) * n_fields + f)
    }

    fn cell(&self, bin: usize, harmonic: u32, field: Field) -> BinAccumulator {
        self.cell_index(bin, harmonic, field)
            .and_then(|i| self.cells.get(i).copied())
            .unwrap_or_default()
    }

    /// 向bin累积一个值；越界的bin/谐波/字段被忽略
    pub fn fill(&mut self, bin: usize, harmonic: u32, field: Field, value: f64) {
        if let Some(cell) = self
            .cell_index(bin, harmonic, field)
            .and_then(|i| self.cells.get_mut(i))
        {
            cell.fill(value);
        }
    }

    /// bin内容（平均值）
    pub fn content(&self, bin: usize, harmonic: u32, field: Field) -> f64 {
        self.cell(bin, harmonic, field).mean()
    }

    /// bin宽度（标准差）
    pub fn spread(&self, bin: usize, harmonic: u32, field: Field) -> f64 {
        self.cell(bin, harmonic, field).spread()
    }

    /// bin平均值误差
    pub fn error(&self, bin: usize, harmonic: u32, field: Field) -> f64 {
        self.cell(bin, harmonic, field).error()
    }

    /// 原始累积和
    pub fn sum(&self, bin: usize, harmonic: u32, field: Field) -> f64 {
        self.cell(bin, harmonic, field).sum
    }

    /// bin条目数：该bin所有分量中最小的条目数
    pub fn entry_count(&self, bin: usize) -> u64 {
        if bin >= self.n_bins {
            return 0;
        }
        let per_bin = self.harmonics.len() * self.kind.fields().len();
        self.cells
            .get(bin * per_bin..(bin + 1) * per_bin)
            .and_then(|cells| cells.iter().map(|c| c.entries).min())
            .unwrap_or(0)
    }

    /// 所有bin都没有条目
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|c| c.entries == 0)
    }

    /// bin内容是否已验证（条目数达到阈值）
    pub fn validated(&self, bin: usize) -> bool {
        self.entry_count(bin) >= self.min_entries
    }

    /// 检查布局是否满足读取方的需求
    ///
    /// 类别和bin数必须一致，且需要的谐波必须都存在。
    pub fn check_shape(&self, kind: ProfileKind, n_bins: usize, harmonics: &[u32]) -> CorrectionResult<()> {
        let missing = harmonics.iter().any(|h| !self.harmonics.contains(h));
        if self.kind != kind || self.n_bins != n_bins || missing || !self.has_consistent_layout() {
            return Err(CorrectionError::ShapeMismatch {
                profile: self.name.clone(),
                expected: format!("{kind:?} bins={n_bins} harmonics={harmonics:?}"),
                found: format!(
                    "{:?} bins={} harmonics={:?} cells={}",
                    self.kind,
                    self.n_bins,
                    self.harmonics,
                    self.cells.len()
                ),
            });
        }
        Ok(())
    }

    /// 累积器数量与声明的 bins × 谐波 × 字段 一致
    fn has_consistent_layout(&self) -> bool {
        self.n_bins
            .checked_mul(self.harmonics.len())
            .and_then(|n| n.checked_mul(self.kind.fields().len()))
            .is_some_and(|n| n == self.cells.len())
    }

    /// 检查从文件读入的Profile自身布局是否完整
    pub fn check_layout(&self) -> CorrectionResult<()> {
        if self.has_consistent_layout() {
            return Ok(());
        }
        Err(CorrectionError::ShapeMismatch {
            profile: self.name.clone(),
            expected: format!(
                "{} cells",
                self.n_bins
                    .saturating_mul(self.harmonics.len())
                    .saturating_mul(self.kind.fields().len())
            ),
            found: format!("{} cells", self.cells.len()),
        })
    }

    /// 累加同布局Profile的原始累积量
    pub fn merge(&mut self, other: &Profile) -> CorrectionResult<()> {
        if self.kind != other.kind
            || self.n_bins != other.n_bins
            || self.harmonics != other.harmonics
            || self.cells.len() != other.cells.len()
            || !self.has_consistent_layout()
        {
            return Err(CorrectionError::ShapeMismatch {
                profile: self.name.clone(),
                expected: format!("{:?} bins={} harmonics={:?}", self.kind, self.n_bins, self.harmonics),
                found: format!("{:?} bins={} harmonics={:?}", other.kind, other.n_bins, other.harmonics),
            });
        }
        for (cell, extra) in self.cells.iter_mut().zip(&other.cells) {
            cell.merge(extra);
        }
        Ok(())
    }
}

/// 校准数据集合（一次处理轮次的全部Profile和诊断计数）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationStore {
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    profiles: BTreeMap<String, Profile>,

    /// 未验证bin诊断计数（按名称，每个事件类别bin一项）
    #[serde(default)]
    diagnostics: BTreeMap<String, Vec<u64>>,
}

impl CalibrationStore {
    /// 创建带时间戳的空集合
    pub fn new() -> Self {
        Self {
            created_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// 加入Profile（同名覆盖）
    pub fn insert(&mut self, profile: Profile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    /// 按名称查找Profile
    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// 记录诊断计数
    pub fn insert_diagnostics(&mut self, name: impl Into<String>, counts: Vec<u64>) {
        self.diagnostics.insert(name.into(), counts);
    }

    pub fn diagnostics(&self, name: &str) -> Option<&[u64]> {
        self.diagnostics.get(name).map(Vec::as_slice)
    }

    /// 遍历所有诊断计数
    pub fn diagnostics_entries(&self) -> impl Iterator<Item = (&str, &[u64])> {
        self.diagnostics
            .iter()
            .map(|(name, counts)| (name.as_str(), counts.as_slice()))
    }

    /// 合并另一个作业的校准数据
    ///
    /// 同名Profile逐项相加，布局不一致是错误；只存在于一方的Profile直接加入。
    /// 诊断计数按bin相加。
    pub fn merge(&mut self, other: &CalibrationStore) -> CorrectionResult<()> {
        for (name, profile) in &other.profiles {
            match self.profiles.get_mut(name) {
                Some(existing) => existing.merge(profile)?,
                None => {
                    profile.check_layout()?;
                    self.profiles.insert(name.clone(), profile.clone());
                }
            }
        }
        for (name, counts) in &other.diagnostics {
            let existing = self.diagnostics.entry(name.clone()).or_insert_with(|| vec![0; counts.len()]);
            if existing.len() != counts.len() {
                return Err(CorrectionError::ShapeMismatch {
                    profile: name.clone(),
                    expected: format!("{} bins", existing.len()),
                    found: format!("{} bins", counts.len()),
                });
            }
            for (total, count) in existing.iter_mut().zip(counts) {
                *total += count;
            }
        }
        Ok(())
    }

    /// 从JSON文件加载，并检查每个Profile的布局
    pub fn load(path: &Path) -> CorrectionResult<Self> {
        let text = fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&text)?;
        store.validate()?;
        Ok(store)
    }

    /// 检查全部Profile的布局
    pub fn validate(&self) -> CorrectionResult<()> {
        self.profiles.values().try_for_each(Profile::check_layout)
    }

    /// 保存为JSON文件
    pub fn save(&self, path: &Path) -> CorrectionResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_accumulator_statistics() {
        let mut acc = BinAccumulator::default();
        for v in [1.0, 2.0, 3.0, 4.0] {
            acc.fill(v);
        }
        assert_relative_eq!(acc.mean(), 2.5);
        assert_relative_eq!(acc.spread(), 1.25f64.sqrt());
        assert_relative_eq!(acc.error(), 1.25f64.sqrt() / 2.0);
    }

    #[test]
    fn test_empty_accumulator() {
        let acc = BinAccumulator::default();
        assert_eq!(acc.mean(), 0.0);
        assert_eq!(acc.spread(), 0.0);
        assert_eq!(acc.error(), 0.0);
    }

    #[test]
    fn test_profile_fill_and_validation() {
        let mut p = Profile::new("QnQn A", ProfileKind::Correlation, 3, &[2]);
        assert!(!p.validated(1));

        for field in [Field::XX, Field::XY, Field::YX, Field::YY] {
            p.fill(1, 2, field, 1.0);
        }
        assert_eq!(p.entry_count(1), 1);
        assert!(!p.validated(1));

        for field in [Field::XX, Field::XY, Field::YX, Field::YY] {
            p.fill(1, 2, field, 3.0);
        }
        assert_eq!(p.entry_count(1), 2);
        assert!(p.validated(1));
        assert_relative_eq!(p.content(1, 2, Field::XY), 2.0);
        assert_relative_eq!(p.sum(1, 2, Field::XY), 4.0);
        assert_eq!(p.entry_count(0), 0);

        p.set_min_entries(3);
        assert!(!p.validated(1));
    }

    #[test]
    fn test_out_of_range_fill_ignored() {
        let mut p = Profile::new("Qn A", ProfileKind::Components, 2, &[1, 2]);
        p.fill(5, 1, Field::X, 1.0);
        p.fill(0, 3, Field::X, 1.0);
        p.fill(0, 1, Field::XX, 1.0);
        assert_eq!(p.entry_count(0), 0);
        assert_eq!(p.entry_count(5), 0);
    }

    #[test]
    fn test_shape_check() {
        let p = Profile::new("Qn A", ProfileKind::Components, 4, &[1, 2, 3]);
        assert!(p.check_shape(ProfileKind::Components, 4, &[1, 3]).is_ok());
        assert!(p.check_shape(ProfileKind::Correlation, 4, &[1]).is_err());
        assert!(p.check_shape(ProfileKind::Components, 5, &[1]).is_err());
        assert!(p.check_shape(ProfileKind::Components, 4, &[4]).is_err());
    }

    #[test]
    fn test_store_json_round_trip_keeps_sums() {
        let mut store = CalibrationStore::new();
        let mut p = Profile::new("Qn A", ProfileKind::Components, 1, &[2]);
        p.fill(0, 2, Field::X, 0.5);
        p.fill(0, 2, Field::Y, -0.5);
        store.insert(p);
        store.insert_diagnostics("TwScale NvE A", vec![3]);

        let text = serde_json::to_string(&store).unwrap();
        let loaded: CalibrationStore = serde_json::from_str(&text).unwrap();
        let p = loaded.get("Qn A").unwrap();
        assert_eq!(p.entry_count(0), 1);
        assert_relative_eq!(p.content(0, 2, Field::Y), -0.5);
        assert_eq!(p.min_entries(), MIN_ENTRIES_TO_VALIDATE);
        assert_eq!(loaded.diagnostics("TwScale NvE A"), Some(&[3u64][..]));
        assert!(loaded.created_at().is_some());
    }

    #[test]
    fn test_merge_sums_accumulators() {
        let mut first = CalibrationStore::new();
        let mut p = Profile::new("Qn A", ProfileKind::Components, 1, &[1]);
        p.fill(0, 1, Field::X, 1.0);
        p.fill(0, 1, Field::Y, 1.0);
        first.insert(p.clone());
        first.insert_diagnostics("TwScale NvE A", vec![1, 0]);

        let mut second = CalibrationStore::new();
        p.fill(0, 1, Field::X, 3.0);
        p.fill(0, 1, Field::Y, 3.0);
        second.insert(p);
        second.insert(Profile::new("Qn B", ProfileKind::Components, 1, &[1]));
        second.insert_diagnostics("TwScale NvE A", vec![2, 5]);

        first.merge(&second).unwrap();
        let merged = first.get("Qn A").unwrap();
        assert_eq!(merged.entry_count(0), 3);
        assert_relative_eq!(merged.sum(0, 1, Field::X), 5.0);
        assert!(first.get("Qn B").is_some());
        assert_eq!(first.diagnostics("TwScale NvE A"), Some(&[3u64, 5][..]));

        let mut other = CalibrationStore::new();
        other.insert(Profile::new("Qn A", ProfileKind::Components, 2, &[1]));
        assert!(matches!(first.merge(&other), Err(CorrectionError::ShapeMismatch { .. })));
    }

    const MALFORMED: &str = r#"{"profiles":{"Qn X":{"name":"Qn X","kind":"components","n_bins":3,"harmonics":[1],"cells":[]}}}"#;

    #[test]
    fn test_malformed_profile_accessors_do_not_panic() {
        let store: CalibrationStore = serde_json::from_str(MALFORMED).unwrap();
        let p = store.get("Qn X").unwrap();
        assert_eq!(p.entry_count(0), 0);
        assert_eq!(p.entry_count(2), 0);
        assert!(!p.validated(1));
        assert_eq!(p.content(1, 1, Field::X), 0.0);
        assert!(p.check_shape(ProfileKind::Components, 3, &[1]).is_err());
        assert!(matches!(store.validate(), Err(CorrectionError::ShapeMismatch { .. })));

        let mut p = p.clone();
        p.fill(0, 1, Field::X, 1.0);
        assert_eq!(p.entry_count(0), 0);
    }

    #[test]
    fn test_load_rejects_malformed_profile() {
        let path = std::env::temp_dir().join(format!("qn_malformed_cal_{}.json", std::process::id()));
        fs::write(&path, MALFORMED).unwrap();
        let result = CalibrationStore::load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(CorrectionError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_merge_rejects_malformed_profile() {
        let malformed: CalibrationStore = serde_json::from_str(MALFORMED).unwrap();

        let mut empty = CalibrationStore::new();
        assert!(matches!(empty.merge(&malformed), Err(CorrectionError::ShapeMismatch { .. })));

        let mut existing = CalibrationStore::new();
        existing.insert(Profile::new("Qn X", ProfileKind::Components, 3, &[1]));
        assert!(matches!(existing.merge(&malformed), Err(CorrectionError::ShapeMismatch { .. })));
    }
}
