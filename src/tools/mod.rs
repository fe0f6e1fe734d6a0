//! 工具模块集合
//!
//! 包含CLI、作业配置、事件输入、文件扫描、格式化等工具模块，支持main.rs的流程控制。

pub mod batch_state;
pub mod cli;
pub mod constants;
pub mod events;
pub mod formatter;
pub mod job;
pub mod processor;
pub mod scanner;
pub mod utils;

// 重新导出主要的公共接口
pub use batch_state::{RunStats, RunStatsSnapshot};
pub use cli::{AppConfig, parse_args, show_completion_info, show_startup_info};
pub use events::{EventRecord, read_events};
pub use formatter::{
    CorrectedVectorOutput, EventOutput, format_report_table, format_run_report, write_event_line,
};
pub use job::{CorrectionSpec, DetectorSpec, EventClassSpec, JobConfig};
pub use processor::{RunSummary, prepare_manager, process_event_file, run_job};
pub use scanner::{scan_event_files, show_scan_results};
