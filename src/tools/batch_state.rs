//! 运行状态统计
//!
//! 记录处理的文件数、事件数，以及按错误类别归档的失败事件位置。
//! 每个类别最多保留 [`MAX_RECORDED_LOCATIONS`] 个位置，其余只计数。

use crate::error::ErrorCategory;
use crate::tools::constants::defaults::MAX_RECORDED_LOCATIONS;
use std::collections::HashMap;

/// 统计快照
#[derive(Debug, Clone, Default)]
pub struct RunStatsSnapshot {
    /// 处理完成的文件数
    pub files: usize,
    /// 送入流水线的事件数
    pub events: u64,
    /// 被跳过的事件数
    pub skipped: usize,
    /// 事件中未注册的探测器条目数
    pub unknown_detectors: usize,
    /// 错误分类统计（错误类型 -> "文件:行号" 列表）
    pub error_stats: HashMap<ErrorCategory, Vec<String>>,
    /// 超出保留上限、未记录位置的失败事件数
    pub omitted_locations: HashMap<ErrorCategory, usize>,
}

impl RunStatsSnapshot {
    /// 某类别的失败事件总数（含未记录位置的部分）
    pub fn category_count(&self, category: ErrorCategory) -> usize {
        self.error_stats.get(&category).map_or(0, Vec::len)
            + self.omitted_locations.get(&category).copied().unwrap_or(0)
    }
}

/// 串行运行统计
#[derive(Debug, Default)]
pub struct RunStats {
    files: usize,
    events: u64,
    skipped: usize,
    unknown_detectors: usize,
    error_stats: HashMap<ErrorCategory, Vec<String>>,
    omitted_locations: HashMap<ErrorCategory, usize>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc_files(&mut self) -> usize {
        self.files += 1;
        self.files
    }

    /// 记录一个已处理的事件及其中被忽略的探测器条目数
    #[inline]
    pub fn inc_events(&mut self, unknown_detectors: usize) -> u64 {
        self.events += 1;
        self.unknown_detectors += unknown_detectors;
        self.events
    }

    /// 记录跳过的事件
    pub fn inc_skipped(&mut self, category: ErrorCategory, location: String) -> usize {
        self.skipped += 1;
        let locations = self.error_stats.entry(category).or_default();
        if locations.len() < MAX_RECORDED_LOCATIONS {
            locations.push(location);
        } else {
            *self.omitted_locations.entry(category).or_default() += 1;
        }
        self.skipped
    }

    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            files: self.files,
            events: self.events,
            skipped: self.skipped,
            unknown_detectors: self.unknown_detectors,
            error_stats: self.error_stats.clone(),
            omitted_locations: self.omitted_locations.clone(),
        }
    }
}
