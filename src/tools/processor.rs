//! 作业处理模块
//!
//! 一次处理（pass）：加载作业配置和上一轮校准数据，初始化框架，
//! 按顺序读取所有事件文件并驱动流水线，最后写出校准数据。

use super::batch_state::{RunStats, RunStatsSnapshot};
use super::cli::AppConfig;
use super::events::read_events;
use super::formatter::{EventOutput, write_event_line};
use super::job::JobConfig;
use super::{scanner, utils};
use crate::core::CalibrationStore;
use crate::detector::{CorrectionManager, StepReport};
use crate::error::{CorrectionResult, ErrorCategory};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 一次处理的结果
#[derive(Debug)]
pub struct RunSummary {
    pub files: Vec<PathBuf>,
    pub stats: RunStatsSnapshot,
    pub report: Vec<StepReport>,
}

/// 按作业配置建立并初始化管理器
pub fn prepare_manager(job: &JobConfig, calibration: Option<&CalibrationStore>) -> CorrectionResult<CorrectionManager> {
    let mut manager = job.build_manager()?;
    manager.initialize(calibration)?;
    job.apply_collection_policy(&mut manager)?;
    Ok(manager)
}

/// 处理单个事件文件
///
/// 无法解析的行被跳过并计入统计；配置错误立即返回。
pub fn process_event_file(
    path: &Path,
    manager: &mut CorrectionManager,
    mut output: Option<&mut dyn Write>,
    stats: &mut RunStats,
) -> CorrectionResult<()> {
    let filename = utils::extract_filename_lossy(path);
    let reader = BufReader::new(File::open(path)?);

    let lines = read_events(reader, |line, record| {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("{filename}:{line}: {e}");
                stats.inc_skipped(ErrorCategory::from_error(&e), format!("{filename}:{line}"));
                return Ok(());
            }
        };

        let ignored = record.feed(manager)?;
        let event = stats.inc_events(ignored) - 1;
        if let Some(writer) = output.as_deref_mut() {
            write_event_line(writer, &EventOutput::collect(event, manager))?;
        }
        Ok(())
    })?;

    stats.inc_files();
    debug!("{filename}: {lines} records");
    Ok(())
}

/// 执行一次完整处理
pub fn run_job(config: &AppConfig) -> CorrectionResult<RunSummary> {
    let job = JobConfig::load(&config.config_path)?;
    let calibration = config
        .calibration_in
        .as_deref()
        .map(CalibrationStore::load)
        .transpose()?;
    if let Some(store) = &calibration {
        info!(
            "calibration input with {} profiles (created {:?})",
            store.profile_names().count(),
            store.created_at()
        );
    }

    let mut manager = prepare_manager(&job, calibration.as_ref())?;

    let files = scanner::scan_event_files(&config.input_path)?;
    scanner::show_scan_results(config, &files);

    let mut writer = match &config.output_path {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    let mut stats = RunStats::new();
    for (index, file) in files.iter().enumerate() {
        if config.verbose {
            println!(
                "[PROCESSING] [{}/{}] 处理 / Processing: {}",
                index + 1,
                files.len(),
                utils::extract_filename_lossy(file)
            );
        }
        let output = writer.as_mut().map(|w| w as &mut dyn Write);
        process_event_file(file, &mut manager, output, &mut stats)?;
    }

    if let Some(mut writer) = writer {
        writer.flush()?;
    }

    if let Some(path) = &config.calibration_out {
        manager.calibration_output().save(path)?;
        info!("calibration output written to {}", path.display());
    }

    Ok(RunSummary {
        files,
        stats: stats.snapshot(),
        report: manager.report(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_bad_lines_skipped() {
        let dir = std::env::temp_dir().join(format!("qn_processor_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let events = dir.join("events.jsonl");
        fs::write(
            &events,
            "{\"detectors\":{\"A\":[[0.0,1.0]]}}\n{broken\n{\"detectors\":{\"A\":[[1.0,1.0]]}}\n",
        )
        .unwrap();

        let job = JobConfig::from_json(r#"{"detectors":[{"name":"A","harmonics":[1]}]}"#).unwrap();
        let mut manager = prepare_manager(&job, None).unwrap();
        let mut stats = RunStats::new();
        let mut buffer: Vec<u8> = Vec::new();
        process_event_file(&events, &mut manager, Some(&mut buffer), &mut stats).unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events, 2);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.error_stats[&ErrorCategory::Input], vec!["events.jsonl:2"]);
        assert_eq!(String::from_utf8(buffer).unwrap().lines().count(), 2);

        fs::remove_dir_all(&dir).ok();
    }
}
