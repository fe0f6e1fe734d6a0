//! 命令行接口模块
//!
//! 负责命令行参数解析、配置管理和程序信息展示。

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// 应用程序版本信息
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// 应用程序配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 事件文件（JSON lines）或包含事件文件的目录
    pub input_path: PathBuf,

    /// 作业配置文件（探测器和校正步骤）
    pub config_path: PathBuf,

    /// 上一轮的校准输出（可选）
    pub calibration_in: Option<PathBuf>,

    /// 本轮校准输出写入位置（可选）
    pub calibration_out: Option<PathBuf>,

    /// 逐事件校正结果输出（可选）
    pub output_path: Option<PathBuf>,

    /// 是否显示详细信息
    pub verbose: bool,
}

impl AppConfig {
    /// 基于路径类型判断是否为批量模式
    #[inline]
    pub fn is_batch_mode(&self) -> bool {
        self.input_path.is_dir()
    }
}

fn build_command() -> Command {
    Command::new("qn-correct")
        .version(VERSION)
        .about(DESCRIPTION)
        .author("QnCorrections Team")
        .arg(
            Arg::new("INPUT")
                .help("事件文件（.jsonl）或目录路径 / Event file (.jsonl) or directory")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("作业配置文件 / Job configuration file (JSON)")
                .value_name("FILE")
                .required(true),
        )
        .arg(
            Arg::new("calibration-in")
                .long("calibration-in")
                .short('i')
                .help("上一轮的校准数据 / Calibration data from the previous pass")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("calibration-out")
                .long("calibration-out")
                .short('k')
                .help("写入本轮校准数据 / Write calibration data of this pass")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .help("逐事件输出校正后的Qn向量 / Write corrected Qn vectors per event")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("显示详细处理信息 / Show detailed processing information")
                .action(clap::ArgAction::SetTrue),
        )
}

fn config_from_matches(matches: &ArgMatches) -> AppConfig {
    let path = |id: &str| matches.get_one::<String>(id).map(PathBuf::from);
    AppConfig {
        input_path: path("INPUT").unwrap_or_default(),
        config_path: path("config").unwrap_or_default(),
        calibration_in: path("calibration-in"),
        calibration_out: path("calibration-out"),
        output_path: path("output"),
        verbose: matches.get_flag("verbose"),
    }
}

/// 解析命令行参数并创建配置
pub fn parse_args() -> AppConfig {
    config_from_matches(&build_command().get_matches())
}

/// 显示程序启动信息
pub fn show_startup_info(config: &AppConfig) {
    println!("🚀 Qn Corrections v{VERSION} 启动 / starting");
    println!("📝 {DESCRIPTION}");
    if config.verbose {
        println!("⚙️  作业配置 / Job config: {}", config.config_path.display());
        match &config.calibration_in {
            Some(path) => println!("📥 校准输入 / Calibration input: {}", path.display()),
            None => println!("📥 无校准输入，全部步骤从校准开始 / No calibration input, all steps calibrate"),
        }
    }
    println!();
}

/// 显示程序完成信息
pub fn show_completion_info(config: &AppConfig) {
    if let Some(path) = &config.calibration_out {
        println!("💾 校准数据已保存 / Calibration saved: {}", path.display());
    }
    if config.verbose {
        println!("✅ 所有事件处理完成！/ All events processed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let matches = build_command()
            .try_get_matches_from([
                "qn-correct",
                "events.jsonl",
                "--config",
                "job.json",
                "--calibration-in",
                "pass1.json",
                "-k",
                "pass2.json",
                "-v",
            ])
            .unwrap();
        let config = config_from_matches(&matches);
        assert_eq!(config.input_path, PathBuf::from("events.jsonl"));
        assert_eq!(config.config_path, PathBuf::from("job.json"));
        assert_eq!(config.calibration_in, Some(PathBuf::from("pass1.json")));
        assert_eq!(config.calibration_out, Some(PathBuf::from("pass2.json")));
        assert!(config.output_path.is_none());
        assert!(config.verbose);
    }

    #[test]
    fn test_config_is_required() {
        assert!(
            build_command()
                .try_get_matches_from(["qn-correct", "events.jsonl"])
                .is_err()
        );
    }
}
