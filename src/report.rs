//! Human-readable rendering of batch reports and errors.

use std::fmt;

use batch_runner::{BatchError, BatchReport, BatchStatusSnapshot, Completion, ItemOutcome};
use runs_api::CancelOutcome;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Renders a [`BatchReport`] as indented plain text.
pub struct ReportDisplay<'a>(pub &'a BatchReport);

impl fmt::Display for ReportDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let submission = &report.submission;
        let totals = submission.totals();

        write!(f, "Batch {}", submission.batch_id)?;
        if let Some(title) = &submission.batch_title {
            write!(f, " \"{title}\"")?;
        }
        writeln!(f, " (HTTP {})", submission.http_status)?;
        writeln!(
            f,
            "  submitted: {} requested, {} accepted, {} rejected, {} pending",
            totals.requested, totals.successful, totals.failed, totals.pending
        )?;
        if let Err(mismatch) = submission.reconcile() {
            writeln!(f, "  warning: {mismatch}")?;
        }

        for (index, outcome) in submission.outcomes().iter().enumerate() {
            match outcome {
                ItemOutcome::Accepted {
                    id, title, status, ..
                } => {
                    write!(f, "  [{index}] accepted {id} ({status})")?;
                    if let Some(title) = title {
                        write!(f, " {title}")?;
                    }
                    writeln!(f)?;
                }
                ItemOutcome::Rejected {
                    code,
                    message,
                    existing_run_id,
                } => {
                    write!(f, "  [{index}] rejected {code}")?;
                    if let Some(message) = message {
                        write!(f, ": {message}")?;
                    }
                    if let Some(existing) = existing_run_id {
                        write!(f, " (existing run {existing})")?;
                    }
                    writeln!(f)?;
                }
                ItemOutcome::Pending => writeln!(f, "  [{index}] pending")?,
            }
        }

        match report.completion {
            Completion::NotPolled => Ok(()),
            Completion::Finished => match &report.final_snapshot {
                Some(snapshot) => write_final(f, snapshot, report.snapshots_seen),
                None => writeln!(f, "  finished"),
            },
            Completion::TimedOut => {
                if let Some(snapshot) = &report.final_snapshot {
                    write_final(f, snapshot, report.snapshots_seen)?;
                }
                writeln!(
                    f,
                    "  stopped waiting; the batch may still be processing server-side"
                )
            }
            Completion::Cancelled => writeln!(f, "  polling cancelled"),
        }
    }
}

fn write_final(
    f: &mut fmt::Formatter<'_>,
    snapshot: &BatchStatusSnapshot,
    snapshots_seen: usize,
) -> fmt::Result {
    let counts = &snapshot.counts;
    writeln!(
        f,
        "  status: {} ({} completed, {} failed, {} cancelled, {} still running) after {} checks",
        snapshot.overall_status.as_str(),
        counts.completed,
        counts.failed,
        counts.cancelled,
        counts.in_flight(),
        snapshots_seen
    )?;
    if !snapshot.is_terminal() {
        if let Some(eta) = snapshot.estimated_completion {
            writeln!(f, "  estimated completion: {}", timestamp(eta))?;
        }
    }
    for run in snapshot.runs.iter().filter(|run| run.pr_url.is_some() || run.error.is_some()) {
        let title = run.title.as_deref().unwrap_or(&run.id);
        if let Some(url) = &run.pr_url {
            writeln!(f, "    {title}: {url}")?;
        }
        if let Some(error) = &run.error {
            writeln!(f, "    {title}: {error}")?;
        }
    }
    Ok(())
}

fn timestamp(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

pub fn format_report(report: &BatchReport) -> String {
    ReportDisplay(report).to_string()
}

/// Error message plus remediation hint, for terminal display.
pub fn format_error(error: &BatchError) -> String {
    match error.api_error() {
        Some(api) => match error {
            BatchError::Polling { batch_id, .. } => {
                format!("batch {batch_id}: {}", api.display_message())
            }
            _ => api.display_message(),
        },
        None => error.to_string(),
    }
}

pub fn format_cancel(batch_id: &str, outcome: CancelOutcome) -> String {
    match outcome {
        CancelOutcome::Cancelled => format!("batch {batch_id} cancelled"),
        CancelOutcome::AlreadyTerminal => {
            format!("batch {batch_id} had already finished; nothing to cancel")
        }
    }
}

/// Machine-readable form of the report.
pub fn report_json(report: &BatchReport) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_runner::BatchSubmissionResult;
    use runs_api::{BulkCreateData, BulkCreateResponse, RunsApiError};

    #[test]
    fn validation_errors_render_plainly() {
        assert_eq!(
            format_error(&BatchError::TooManyItems { count: 41, max: 40 }),
            "batch has 41 runs; at most 40 are allowed"
        );
    }

    #[test]
    fn api_errors_include_hints() {
        let error = BatchError::Api(RunsApiError::Network("connection refused".to_owned()));
        let rendered = format_error(&error);
        assert!(rendered.starts_with("network error: connection refused\n"));
        assert!(rendered.contains("network connection"));

        let submission = BatchSubmissionResult::from_response(
            BulkCreateResponse {
                status: 201,
                data: BulkCreateData {
                    batch_id: "batch-9".to_owned(),
                    batch_title: None,
                    successful: Vec::new(),
                    failed: Vec::new(),
                    metadata: None,
                },
            },
            1,
        );
        let polling = BatchError::Polling {
            batch_id: "batch-9".to_owned(),
            submission: Box::new(submission),
            source: RunsApiError::NotFound {
                message: "Batch batch-9 not found".to_owned(),
            },
        };
        assert_eq!(format_error(&polling), "batch batch-9: Batch batch-9 not found");
    }

    #[test]
    fn cancel_outcomes_render() {
        assert_eq!(format_cancel("b1", CancelOutcome::Cancelled), "batch b1 cancelled");
        assert!(format_cancel("b1", CancelOutcome::AlreadyTerminal).contains("already finished"));
    }
}
