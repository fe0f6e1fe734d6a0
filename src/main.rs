//! Qn Corrections - 主程序入口
//!
//! 纯流程控制器，负责协调各个工具模块完成一次校正处理。

use qn_corrections::{
    error::{CorrectionError, ErrorCategory},
    tools::{self, AppConfig},
};
use std::process;
use tracing::Level;

/// 错误退出码定义
mod exit_codes {
    /// 通用错误（I/O）
    pub const GENERAL_ERROR: i32 = 1;
    /// 输入错误（作业配置或事件数据）
    pub const INPUT_ERROR: i32 = 2;
    /// 配置错误（引用、重复步骤、形状不匹配）
    pub const CONFIGURATION_ERROR: i32 = 3;
}

/// 获取错误建议文本
fn get_error_suggestion(error: &CorrectionError) -> &'static str {
    match error {
        CorrectionError::UnresolvedReference { .. } | CorrectionError::UnknownConfiguration(_) => {
            "检查作业配置中引用的探测器名称是否已注册 / Check that referenced detector names are registered in the job config"
        }
        CorrectionError::ShapeMismatch { .. } => {
            "校准文件与当前作业配置不一致，删除 --calibration-in 重新校准 / Calibration file does not match the job config, recalibrate without --calibration-in"
        }
        CorrectionError::ReferenceCycle { .. } | CorrectionError::SelfReference { .. } => {
            "对齐参考不能形成环 / Alignment references must not form a cycle"
        }
        _ => match ErrorCategory::from_error(error) {
            ErrorCategory::Io => {
                "检查文件路径是否正确，文件是否存在且可读 / Check if file path is correct, file exists and is readable"
            }
            ErrorCategory::Input => {
                "检查作业配置和事件文件的JSON格式 / Check the JSON format of the job config and event files"
            }
            ErrorCategory::Configuration => {
                "检查作业配置中的探测器和校正步骤 / Check detectors and correction steps in the job config"
            }
        },
    }
}

/// 错误处理和建议
fn handle_error(error: CorrectionError) -> ! {
    eprintln!("[ERROR] 错误 / Error: {error}");

    let category = ErrorCategory::from_error(&error);
    eprintln!("[INFO] 类别 / Category: {}", category.display_name());
    eprintln!("[INFO] 建议 / Suggestion: {}", get_error_suggestion(&error));

    let exit_code = match category {
        ErrorCategory::Io => exit_codes::GENERAL_ERROR,
        ErrorCategory::Input => exit_codes::INPUT_ERROR,
        ErrorCategory::Configuration => exit_codes::CONFIGURATION_ERROR,
    };

    process::exit(exit_code);
}

fn init_logging(config: &AppConfig) {
    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// 应用程序主逻辑（便于测试和复用）
fn run() -> Result<(), CorrectionError> {
    // 1. 解析命令行参数
    let config = tools::parse_args();
    init_logging(&config);

    // 2. 显示启动信息
    tools::show_startup_info(&config);

    // 3. 执行一次处理
    let summary = tools::run_job(&config)?;

    // 4. 报告
    println!("{}", tools::format_run_report(&summary.report, &summary.stats));
    tools::show_completion_info(&config);
    Ok(())
}

fn main() {
    if let Err(error) = run() {
        handle_error(error);
    }
}
