//! qn-inspect - 校准文件检查与合并工具
//!
//! 查看一轮处理写出的校准数据（Profile布局、bin填充、诊断计数），
//! 并把多个独立作业的校准文件合并为一个。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use qn_corrections::CalibrationStore;
use qn_corrections::core::Profile;
use qn_corrections::tools::constants::defaults::MIN_ENTRIES_TO_VALIDATE;
use serde::Serialize;

// ============================================================================
// CLI 定义
// ============================================================================

#[derive(Parser)]
#[command(name = "qn-inspect")]
#[command(about = "校准文件检查与合并工具 / Calibration file inspector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 显示校准文件内容
    /// Show calibration file contents
    Show {
        /// 校准文件
        /// Calibration file
        file: PathBuf,

        /// bin验证所需的最少条目数
        /// Minimum entries for a validated bin
        #[arg(long, short = 'm', default_value_t = MIN_ENTRIES_TO_VALIDATE)]
        min_entries: u64,

        /// 输出格式：table, json（默认table）
        /// Output format: table, json (default: table)
        #[arg(long, short = 'f', default_value = "table")]
        format: OutputFormat,
    },
    /// 合并多个校准文件（逐项相加原始累积量）
    /// Merge calibration files by summing raw accumulators
    Merge {
        /// 输入文件
        /// Input files
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,

        /// 合并结果
        /// Merged output file
        #[arg(long, short = 'o')]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {s}")),
        }
    }
}

// ============================================================================
// 数据结构
// ============================================================================

/// 单个Profile的摘要
#[derive(Debug, Serialize)]
struct ProfileSummary {
    name: String,
    kind: String,
    harmonics: Vec<u32>,
    bins: usize,
    filled_bins: usize,
    validated_bins: usize,
    min_bin_entries: u64,
    max_bin_entries: u64,
}

#[derive(Debug, Serialize)]
struct FileSummary {
    file: String,
    created_at: Option<String>,
    inspected_at: String,
    profiles: Vec<ProfileSummary>,
    diagnostics: Vec<(String, u64)>,
}

fn summarize_profile(profile: &Profile, min_entries: u64) -> ProfileSummary {
    let mut profile = profile.clone();
    profile.set_min_entries(min_entries);

    let counts: Vec<u64> = (0..profile.n_bins()).map(|bin| profile.entry_count(bin)).collect();
    ProfileSummary {
        name: profile.name().to_string(),
        kind: format!("{:?}", profile.kind()),
        harmonics: profile.harmonics().to_vec(),
        bins: profile.n_bins(),
        filled_bins: counts.iter().filter(|&&n| n > 0).count(),
        validated_bins: (0..profile.n_bins()).filter(|&bin| profile.validated(bin)).count(),
        min_bin_entries: counts.iter().copied().min().unwrap_or(0),
        max_bin_entries: counts.iter().copied().max().unwrap_or(0),
    }
}

fn load_store(path: &Path) -> Result<CalibrationStore> {
    CalibrationStore::load(path)
        .with_context(|| format!("Failed to load calibration / 无法加载校准文件: {}", path.display()))
}

fn summarize(path: &Path, min_entries: u64) -> Result<FileSummary> {
    let store = load_store(path)?;
    Ok(FileSummary {
        file: path.display().to_string(),
        created_at: store.created_at().map(|t| t.to_rfc3339()),
        inspected_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        profiles: store
            .profiles()
            .map(|p| summarize_profile(p, min_entries))
            .collect(),
        diagnostics: store
            .diagnostics_entries()
            .map(|(name, counts)| (name.to_string(), counts.iter().sum()))
            .collect(),
    })
}

// ============================================================================
// 输出
// ============================================================================

fn output_table(summary: &FileSummary) {
    println!("# Calibration / 校准数据: {}", summary.file);
    if let Some(created) = &summary.created_at {
        println!("created: {created}");
    }
    println!("inspected: {}\n", summary.inspected_at);

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Profile",
        "Kind / 类别",
        "Harmonics / 谐波",
        "Bins",
        "Filled",
        "Validated",
        "Min entries",
        "Max entries",
    ]);

    for p in &summary.profiles {
        let harmonics = p
            .harmonics
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        table.add_row(vec![
            Cell::new(&p.name),
            Cell::new(&p.kind),
            Cell::new(harmonics),
            Cell::new(p.bins).set_alignment(CellAlignment::Right),
            Cell::new(p.filled_bins).set_alignment(CellAlignment::Right),
            Cell::new(p.validated_bins).set_alignment(CellAlignment::Right),
            Cell::new(p.min_bin_entries).set_alignment(CellAlignment::Right),
            Cell::new(p.max_bin_entries).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{table}");

    if !summary.diagnostics.is_empty() {
        println!("\n## Diagnostics / 诊断计数");
        for (name, total) in &summary.diagnostics {
            println!("- {name}: {total}");
        }
    }
}

fn output_json(summary: &FileSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize JSON / JSON序列化失败: {e}"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Show {
            file,
            min_entries,
            format,
        } => {
            let summary = summarize(&file, min_entries)?;
            match format {
                OutputFormat::Table => output_table(&summary),
                OutputFormat::Json => output_json(&summary),
            }
        }
        Commands::Merge { inputs, output } => {
            let mut merged = CalibrationStore::new();
            for input in &inputs {
                let store = load_store(input)?;
                merged
                    .merge(&store)
                    .with_context(|| format!("Cannot merge / 无法合并: {}", input.display()))?;
                eprintln!("Merged / 已合并: {}", input.display());
            }
            merged
                .save(&output)
                .with_context(|| format!("Failed to write / 写入失败: {}", output.display()))?;
            eprintln!(
                "Merged {} files into / 合并结果: {}",
                inputs.len(),
                output.display()
            );
        }
    }

    Ok(())
}
