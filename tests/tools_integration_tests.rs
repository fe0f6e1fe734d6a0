//! 命令行工具链集成测试
//!
//! 在临时目录中准备作业配置和事件文件，连续执行两轮处理，
//! 检查校准文件、逐事件输出和运行统计。

use approx::assert_abs_diff_eq;
use qn_corrections::CalibrationStore;
use qn_corrections::core::Field;
use qn_corrections::error::ErrorCategory;
use qn_corrections::tools::{AppConfig, EventOutput, format_run_report, run_job};
use std::fs;
use std::path::{Path, PathBuf};

fn log(msg_zh: impl AsRef<str>, msg_en: impl AsRef<str>) {
    println!("{} / {}", msg_zh.as_ref(), msg_en.as_ref());
}

const JOB: &str = r#"{
    "detectors": [
        {
            "name": "A",
            "harmonics": [2],
            "corrections": [{ "kind": "alignment", "reference": "B", "harmonic": 2 }]
        },
        { "name": "B", "harmonics": [2] }
    ]
}"#;

const EVENT: &str = r#"{"qn":{"A":{"2":[1.0,0.0]},"B":{"2":[0.0,1.0]}}}"#;
const EVENT_WITH_UNKNOWN: &str =
    r#"{"qn":{"A":{"2":[1.0,0.0]},"B":{"2":[0.0,1.0]}},"detectors":{"C":[[0.5,1.0]]}}"#;

struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!("qn_tools_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("events")).unwrap();
        fs::create_dir_all(root.join("out")).unwrap();
        fs::write(root.join("job.json"), JOB).unwrap();

        let mut part1: Vec<&str> = vec![EVENT; 6];
        part1.insert(3, "{not json");
        part1.insert(4, "");
        fs::write(root.join("events/part1.jsonl"), part1.join("\n")).unwrap();

        let mut part2: Vec<&str> = vec![EVENT; 3];
        part2.push(EVENT_WITH_UNKNOWN);
        fs::write(root.join("events/part2.jsonl"), part2.join("\n")).unwrap();
        fs::write(root.join("events/notes.txt"), "not an event file").unwrap();

        Self { root }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn config(&self, calibration_in: Option<&str>, calibration_out: &str, output: &str) -> AppConfig {
        AppConfig {
            input_path: self.path("events"),
            config_path: self.path("job.json"),
            calibration_in: calibration_in.map(|p| self.path(p)),
            calibration_out: Some(self.path(calibration_out)),
            output_path: Some(self.path(output)),
            verbose: false,
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn read_outputs(path: &Path) -> Vec<EventOutput> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// ========== 两轮处理 ==========

#[test]
fn test_two_pass_run() {
    log("两轮处理集成测试", "Two-pass run");
    let ws = Workspace::new("two_pass");

    // 第1轮：校准
    let summary = run_job(&ws.config(None, "out/pass1.json", "out/pass1.jsonl")).unwrap();
    assert_eq!(summary.files.len(), 2);
    assert_eq!(summary.stats.files, 2);
    assert_eq!(summary.stats.events, 10);
    assert_eq!(summary.stats.skipped, 1);
    assert_eq!(summary.stats.unknown_detectors, 1);
    let locations = summary.stats.error_stats.get(&ErrorCategory::Input).unwrap();
    assert_eq!(locations, &vec!["part1.jsonl:4".to_string()]);
    log(
        format!("  第1轮：{} 个事件，跳过 {}", summary.stats.events, summary.stats.skipped),
        format!("  pass 1: {} events, {} skipped", summary.stats.events, summary.stats.skipped),
    );

    let calibration = CalibrationStore::load(&ws.path("out/pass1.json")).unwrap();
    let profile = calibration.get("QnQn AxB").unwrap();
    assert_eq!(profile.entry_count(0), 10);
    assert_abs_diff_eq!(profile.content(0, 2, Field::XY), 1.0);

    let outputs = read_outputs(&ws.path("out/pass1.jsonl"));
    assert_eq!(outputs.len(), 10);
    assert_eq!(outputs[0].event, 0);
    assert_eq!(outputs[9].event, 9);
    let a = outputs[0].vectors.iter().find(|v| v.detector == "A").unwrap();
    assert_eq!(a.label, "plain");
    assert!(a.good_quality);

    // 第2轮：应用对齐
    let summary = run_job(&ws.config(Some("out/pass1.json"), "out/pass2.json", "out/pass2.jsonl")).unwrap();
    assert_eq!(summary.stats.events, 10);
    let alignment = summary.report.iter().find(|r| r.configuration == "A").unwrap();
    assert!(alignment.usage.applying);
    assert!(alignment.usage.collecting);

    let outputs = read_outputs(&ws.path("out/pass2.jsonl"));
    for output in &outputs {
        let a = output.vectors.iter().find(|v| v.detector == "A").unwrap();
        assert_eq!(a.label, "align");
        let [qx, qy] = a.components[&2];
        assert_abs_diff_eq!(qx, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(qy, 1.0, epsilon = 1e-9);
    }

    let report = format_run_report(&summary.report, &summary.stats);
    assert!(report.contains("EEEE"));
    assert!(report.contains("Events: 10"));
    log("  第2轮：A 对齐到 B", "  pass 2: A aligned onto B");
}

// ========== 输入错误 ==========

#[test]
fn test_missing_input_directory() {
    let ws = Workspace::new("missing_input");
    let mut config = ws.config(None, "out/cal.json", "out/events.jsonl");
    config.input_path = ws.path("no_such_dir");

    let err = run_job(&config).unwrap_err();
    assert_eq!(ErrorCategory::from_error(&err), ErrorCategory::Io);
}

#[test]
fn test_invalid_job_config() {
    let ws = Workspace::new("bad_job");
    fs::write(ws.path("job.json"), r#"{ "detectors": [], "extra": 1 }"#).unwrap();

    let err = run_job(&ws.config(None, "out/cal.json", "out/events.jsonl")).unwrap_err();
    assert_eq!(ErrorCategory::from_error(&err), ErrorCategory::Input);
}

#[test]
fn test_single_file_input() {
    let ws = Workspace::new("single_file");
    let mut config = ws.config(None, "out/cal.json", "out/events.jsonl");
    config.input_path = ws.path("events/part2.jsonl");
    assert!(!config.is_batch_mode());

    let summary = run_job(&config).unwrap();
    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.stats.events, 4);
}
