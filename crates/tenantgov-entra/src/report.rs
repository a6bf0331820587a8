//! Run reporting: partitions result records and logs them as CSV batches.

use serde::Serialize;
use tracing::info;

use crate::access_review::ResultRecord;
use crate::{EntraError, EntraResult};

/// Default records per logged batch. Automation hosts truncate very long
/// output lines.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Counts of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Records of one run split into succeeded and errored.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub succeeded: Vec<ResultRecord>,
    pub errored: Vec<ResultRecord>,
}

impl RunReport {
    #[must_use]
    pub fn from_records(records: Vec<ResultRecord>) -> Self {
        let (succeeded, errored) = records.into_iter().partition(ResultRecord::is_success);
        Self { succeeded, errored }
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.succeeded.len() + self.errored.len(),
            succeeded: self.succeeded.len(),
            failed: self.errored.len(),
        }
    }

    /// Logs both partitions as CSV batches.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be serialized.
    pub fn emit(&self, batch_size: usize) -> EntraResult<()> {
        for (partition, records) in [("succeeded", &self.succeeded), ("errored", &self.errored)] {
            let batches = csv_batches(records, batch_size)?;
            let count = batches.len();
            for (index, batch) in batches.into_iter().enumerate() {
                info!(
                    partition,
                    batch_number = index + 1,
                    batches = count,
                    "\n{batch}"
                );
            }
        }
        Ok(())
    }

    /// Summary of the run, or `PartialFailure` when any group failed.
    ///
    /// # Errors
    ///
    /// Returns `EntraError::PartialFailure` if the errored partition is not empty.
    pub fn finish(&self) -> EntraResult<RunSummary> {
        let summary = self.summary();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Run finished"
        );
        if summary.failed > 0 {
            return Err(EntraError::PartialFailure {
                failed: summary.failed,
                total: summary.total,
            });
        }
        Ok(summary)
    }
}

/// Serializes `records` into CSV documents of at most `batch_size` rows,
/// each with its own header line.
///
/// # Errors
///
/// Returns an error if a record cannot be serialized.
pub fn csv_batches<T: Serialize>(records: &[T], batch_size: usize) -> EntraResult<Vec<String>> {
    records
        .chunks(batch_size.max(1))
        .map(|chunk| {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for record in chunk {
                writer.serialize(record)?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| EntraError::Io(e.into_error()))?;
            String::from_utf8(bytes)
                .map_err(|e| EntraError::Config(format!("CSV output is not UTF-8: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_review::ReviewStatus;
    use chrono::NaiveDate;

    fn record(id: &str, status: ReviewStatus) -> ResultRecord {
        ResultRecord {
            group_id: id.to_string(),
            display_name: format!("Group {id}"),
            mail_nickname: format!("PRJ-{id}"),
            created_date_time: None,
            status,
            review_id: (status == ReviewStatus::Created).then(|| format!("rev-{id}")),
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 16).unwrap(),
            error: (status == ReviewStatus::Failed).then(|| "boom, with comma".to_string()),
        }
    }

    #[test]
    fn test_partition_and_summary() {
        let report = RunReport::from_records(vec![
            record("a", ReviewStatus::Created),
            record("b", ReviewStatus::Failed),
            record("c", ReviewStatus::DryRun),
        ]);

        assert_eq!(
            report.summary(),
            RunSummary {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(report.errored[0].group_id, "b");
    }

    #[test]
    fn test_finish_signals_partial_failure() {
        let report = RunReport::from_records(vec![
            record("a", ReviewStatus::Created),
            record("b", ReviewStatus::Failed),
        ]);

        match report.finish() {
            Err(EntraError::PartialFailure { failed, total }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }

        let ok = RunReport::from_records(vec![record("a", ReviewStatus::Created)]);
        assert_eq!(ok.finish().unwrap().succeeded, 1);
    }

    #[test]
    fn test_csv_batches_bounded_with_header() {
        let records: Vec<_> = (0..5)
            .map(|i| record(&i.to_string(), ReviewStatus::Created))
            .collect();

        let batches = csv_batches(&records, 2).unwrap();
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            assert!(batch.starts_with(
                "GroupId,DisplayName,MailNickname,CreatedDateTime,Status,ReviewId,StartDate,EndDate,Error\n"
            ));
        }
        assert_eq!(batches[2].lines().count(), 2);
        assert!(batches[0].contains("0,Group 0,PRJ-0,,Created,rev-0,2024-06-01,2024-06-16,"));
    }

    #[test]
    fn test_csv_quotes_error_text() {
        let batches = csv_batches(&[record("x", ReviewStatus::Failed)], 10).unwrap();
        assert!(batches[0].contains("\"boom, with comma\""));
    }

    #[test]
    fn test_empty_partition_has_no_batches() {
        let empty: Vec<ResultRecord> = Vec::new();
        assert!(csv_batches(&empty, 10).unwrap().is_empty());
    }
}
