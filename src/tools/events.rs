//! 事件记录输入
//!
//! 每行一个JSON对象：
//! - `variables`：事件变量容器（事件类别分箱读取）
//! - `detectors`：按探测器名称的数据向量列表 `[[phi, weight], ...]`
//! - `qn`：直接提供的原始Qn向量 `{ name: { harmonic: [qx, qy] } }`

use crate::core::QnVector;
use crate::detector::CorrectionManager;
use crate::error::{CorrectionResult, invalid_input};
use crate::tools::constants::corrections::PLAIN_LABEL;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;
use tracing::warn;

/// 单个事件的输入记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub variables: Vec<f64>,

    #[serde(default)]
    pub detectors: BTreeMap<String, Vec<[f64; 2]>>,

    #[serde(default)]
    pub qn: BTreeMap<String, BTreeMap<u32, [f64; 2]>>,
}

impl EventRecord {
    /// 解析一行JSON
    pub fn parse(line: &str) -> CorrectionResult<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// 将记录送入管理器并处理该事件
    ///
    /// 未注册的探测器名称只记录警告；返回被忽略的探测器数。
    pub fn feed(&self, manager: &mut CorrectionManager) -> CorrectionResult<usize> {
        let mut ignored = 0;
        manager.clear_event();

        for (name, data) in &self.detectors {
            let Some(id) = manager.find_configuration_id(name) else {
                warn!("event refers to unknown detector {name}, ignored");
                ignored += 1;
                continue;
            };
            for &[phi, weight] in data {
                manager.add_data_vector(id, phi, weight);
            }
        }

        for (name, components) in &self.qn {
            let Some(configuration) = manager.find_configuration(name) else {
                warn!("event supplies Qn vector for unknown detector {name}, ignored");
                ignored += 1;
                continue;
            };
            let mut qn = QnVector::new(PLAIN_LABEL, configuration.harmonics())?;
            for (&harmonic, &[qx, qy]) in components {
                if !qn.has_harmonic(harmonic) {
                    warn!("harmonic {harmonic} not active in {name}, component ignored");
                    continue;
                }
                qn.set_qx(harmonic, qx);
                qn.set_qy(harmonic, qy);
            }
            if let Some(id) = manager.find_configuration_id(name) {
                manager.supply_plain_qn_vector(id, &qn);
            }
        }

        manager.process_event(&self.variables)?;
        Ok(ignored)
    }
}

/// 逐行读取事件；空行跳过，解析失败的行带行号报告给回调
pub fn read_events<R, F>(reader: R, mut handle: F) -> CorrectionResult<usize>
where
    R: BufRead,
    F: FnMut(usize, CorrectionResult<EventRecord>) -> CorrectionResult<()>,
{
    let mut count = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = EventRecord::parse(trimmed)
            .map_err(|e| invalid_input(&format!("line {}", index + 1), e));
        handle(index + 1, record)?;
        count += 1;
    }
    Ok(count)
}
