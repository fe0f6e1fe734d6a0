//! 事件文件扫描模块
//!
//! 输入可以是单个事件文件，也可以是目录（递归扫描 `*.jsonl`）。

use super::cli::AppConfig;
use super::constants::defaults::EVENT_FILE_EXTENSION;
use super::utils;
use crate::error::{CorrectionError, CorrectionResult};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 收集要处理的事件文件，按路径排序
pub fn scan_event_files(input: &Path) -> CorrectionResult<Vec<PathBuf>> {
    if !input.exists() {
        return Err(CorrectionError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("输入不存在 / input not found: {}", input.display()),
        )));
    }

    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(EVENT_FILE_EXTENSION))
        })
        .collect();

    // 批次之间的处理顺序必须可复现
    files.sort();
    Ok(files)
}

/// 显示文件扫描结果
pub fn show_scan_results(config: &AppConfig, event_files: &[PathBuf]) {
    if event_files.is_empty() {
        println!(
            "⚠️  在 {} 中没有找到事件文件 / No event files found",
            config.input_path.display()
        );
        println!("   支持的格式 / Supported: *.{EVENT_FILE_EXTENSION}");
        return;
    }

    if config.is_batch_mode() {
        println!("📁 扫描目录 / Scanning: {}", config.input_path.display());
    }
    println!("🧾 找到 {} 个事件文件 / event files found", event_files.len());

    if config.verbose {
        for (i, file) in event_files.iter().enumerate() {
            println!("   {}. {}", i + 1, utils::extract_filename_lossy(file));
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_directory_sorted_and_filtered() {
        let dir = std::env::temp_dir().join(format!("qn_scan_{}", std::process::id()));
        let nested = dir.join("run2");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.join("b.jsonl"), "").unwrap();
        fs::write(dir.join("a.JSONL"), "").unwrap();
        fs::write(dir.join("notes.txt"), "").unwrap();
        fs::write(nested.join("c.jsonl"), "").unwrap();

        let files = scan_event_files(&dir).unwrap();
        let names: Vec<_> = files.iter().map(|p| utils::extract_filename_lossy(p)).collect();
        assert_eq!(names, vec!["a.JSONL", "b.jsonl", "c.jsonl"]);

        let single = scan_event_files(&dir.join("b.jsonl")).unwrap();
        assert_eq!(single.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_input() {
        let err = scan_event_files(Path::new("/nonexistent/qn/events")).unwrap_err();
        assert!(matches!(err, CorrectionError::Io(_)));
    }
}
