//! Normal/abnormal tagging of lab rows against the service's abnormal-tests list.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::model::{AbnormalTest, TestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Normal,
    Abnormal,
}

/// A lab row together with its derived status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRow {
    #[serde(flatten)]
    pub result: TestResult,
    pub status: TestStatus,
}

/// Tag every row of `results`, in order.
///
/// A row is abnormal iff its test name equals (case-sensitively) the name of
/// some entry in `abnormal`. Rows are independent of each other, so duplicate
/// names always receive the same status.
pub fn classify(results: &[TestResult], abnormal: &[AbnormalTest]) -> Vec<TestStatus> {
    let flagged: HashSet<&str> = abnormal.iter().map(|t| t.test_name.as_str()).collect();

    results
        .iter()
        .map(|row| {
            if flagged.contains(row.test_name.as_str()) {
                TestStatus::Abnormal
            } else {
                TestStatus::Normal
            }
        })
        .collect()
}
