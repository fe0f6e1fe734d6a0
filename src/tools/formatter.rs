//! 输出格式化模块
//!
//! - 校正步骤使用情况表（comfy-table）
//! - 逐事件的校正后Qn向量（JSON lines）
//! - 运行摘要

use super::batch_state::RunStatsSnapshot;
use super::constants::app_info;
use crate::core::QnVector;
use crate::detector::{CorrectionManager, StepReport};
use crate::error::CorrectionResult;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 一个配置在某事件中的输出向量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedVectorOutput {
    pub detector: String,
    /// 最后应用的校正标签（plain/rec/align/twist）
    pub label: String,
    pub good_quality: bool,
    /// 谐波 -> [Qx, Qy]
    pub components: BTreeMap<u32, [f64; 2]>,
}

impl CorrectedVectorOutput {
    pub fn from_vector(detector: &str, qn: &QnVector) -> Self {
        Self {
            detector: detector.to_string(),
            label: qn.name().to_string(),
            good_quality: qn.is_good_quality(),
            components: qn.harmonics().map(|h| (h, [qn.qx(h), qn.qy(h)])).collect(),
        }
    }
}

/// 一个事件的输出行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOutput {
    pub event: u64,
    pub vectors: Vec<CorrectedVectorOutput>,
}

impl EventOutput {
    /// 从管理器的当前状态收集所有配置的校正后向量
    pub fn collect(event: u64, manager: &CorrectionManager) -> Self {
        Self {
            event,
            vectors: manager
                .configurations()
                .map(|c| CorrectedVectorOutput::from_vector(c.name(), c.current_qn_vector()))
                .collect(),
        }
    }
}

/// 写出一行事件输出
pub fn write_event_line<W: Write + ?Sized>(writer: &mut W, output: &EventOutput) -> CorrectionResult<()> {
    serde_json::to_writer(&mut *writer, output)?;
    writeln!(writer)?;
    Ok(())
}

/// 校正步骤使用情况表
pub fn format_report_table(rows: &[StepReport]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Detector / 探测器",
        "Step / 步骤",
        "Key",
        "State / 状态",
        "Collecting",
        "Applying",
        "Not validated",
    ]);

    let flag = |on: bool| if on { "yes" } else { "-" };
    for row in rows {
        table.add_row(vec![
            Cell::new(&row.configuration),
            Cell::new(row.step),
            Cell::new(row.key),
            Cell::new(row.state.display_name()),
            Cell::new(flag(row.usage.collecting)).set_alignment(CellAlignment::Center),
            Cell::new(flag(row.usage.applying)).set_alignment(CellAlignment::Center),
            Cell::new(
                row.not_validated
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            )
            .set_alignment(CellAlignment::Right),
        ]);
    }
    table.to_string()
}

/// 完整运行报告：头部、步骤表、统计摘要
pub fn format_run_report(rows: &[StepReport], stats: &RunStatsSnapshot) -> String {
    let mut output = String::new();
    output.push_str(&app_info::format_report_header(VERSION));
    output.push('\n');
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    output.push_str(&format!("log date: {now}\n\n"));

    if rows.is_empty() {
        output.push_str("没有配置校正步骤 / No correction steps configured\n");
    } else {
        output.push_str(&format_report_table(rows));
        output.push('\n');
    }

    output.push_str(&format!(
        "\n文件 / Files: {}   事件 / Events: {}   跳过 / Skipped: {}\n",
        stats.files, stats.events, stats.skipped
    ));
    if stats.unknown_detectors > 0 {
        output.push_str(&format!(
            "未注册探测器条目 / Unknown detector entries: {}\n",
            stats.unknown_detectors
        ));
    }
    let mut categories: Vec<_> = stats.error_stats.iter().collect();
    categories.sort_by_key(|(category, _)| category.display_name());
    for (category, locations) in categories {
        output.push_str(&format!(
            "  [{}] {} 条 / entries: {}",
            category.display_name(),
            stats.category_count(*category),
            locations.join(", ")
        ));
        if let Some(omitted) = stats.omitted_locations.get(category) {
            output.push_str(&format!(" (另有 {omitted} 条 / +{omitted} more)"));
        }
        output.push('\n');
    }
    output
}
