//! Aggregate execution statistics.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::language::Language;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageStats {
    pub executions: u64,
    pub successful: u64,
    pub failed: u64,
    pub average_execution_time_ms: f64,
}

impl LanguageStats {
    fn record(&mut self, success: bool, time_ms: f64) {
        self.executions += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.average_execution_time_ms =
            incremental_mean(self.average_execution_time_ms, self.executions, time_ms);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub timed_out_executions: u64,
    pub cancelled_executions: u64,
    pub average_execution_time_ms: f64,
    pub per_language: BTreeMap<Language, LanguageStats>,
}

/// `avg' = (avg * (n - 1) + x) / n`, where `n` already counts `x`.
pub fn incremental_mean(avg: f64, n: u64, x: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    (avg * (n - 1.0) + x) / n
}

impl ExecutionMetrics {
    pub fn record(&mut self, language: Language, success: bool, time_ms: f64) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        self.average_execution_time_ms =
            incremental_mean(self.average_execution_time_ms, self.total_executions, time_ms);
        self.per_language
            .entry(language)
            .or_default()
            .record(success, time_ms);
    }

    pub fn record_timeout(&mut self) {
        self.timed_out_executions += 1;
    }

    pub fn record_cancel(&mut self) {
        self.cancelled_executions += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.successful_executions as f64 / self.total_executions as f64
        }
    }
}
