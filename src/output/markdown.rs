//! Markdown summary generation
//!
//! Renders a table of job snapshots with their counters, durations and error
//! summaries.

use crate::jobs::Job;
use crate::output::OutputResult;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown summary of `jobs` to `output_path`
pub fn write_markdown_summary(jobs: &[Job], output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(jobs);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats job snapshots as markdown
pub fn format_markdown_summary(jobs: &[Job]) -> String {
    let mut md = String::new();

    md.push_str("# Harvest Job Summary\n\n");

    let processed: u64 = jobs.iter().map(|j| j.processed).sum();
    let saved: u64 = jobs.iter().map(|j| j.succeeded).sum();
    let skipped: u64 = jobs.iter().map(|j| j.skipped).sum();
    let failed: u64 = jobs.iter().map(|j| j.failed).sum();

    md.push_str("## Totals\n\n");
    md.push_str(&format!("- **Jobs**: {}\n", jobs.len()));
    md.push_str(&format!("- **Items Processed**: {}\n", processed));
    md.push_str(&format!("- **Saved**: {}\n", saved));
    md.push_str(&format!("- **Skipped**: {}\n", skipped));
    md.push_str(&format!("- **Failed**: {}\n\n", failed));

    if jobs.is_empty() {
        return md;
    }

    md.push_str("## Jobs\n\n");
    md.push_str("| Job | Kind | Mode | State | Total | Saved | Skipped | Failed | Duration |\n");
    md.push_str("|-----|------|------|-------|-------|-------|---------|--------|----------|\n");

    for job in jobs {
        let duration = job
            .duration()
            .map(|d| format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            job.id,
            job.kind,
            job.mode,
            job.state,
            job.total,
            job.succeeded,
            job.skipped,
            job.failed,
            duration
        ));
    }
    md.push('\n');

    let problems: Vec<&Job> = jobs.iter().filter(|j| j.error_summary.is_some()).collect();
    if !problems.is_empty() {
        md.push_str("## Errors\n\n");
        for job in problems {
            md.push_str(&format!(
                "- `{}` ({}): {}\n",
                job.id,
                job.kind,
                job.error_summary.as_deref().unwrap_or_default()
            ));
        }
        md.push('\n');
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::ExecutionMode;
    use crate::jobs::JobState;

    fn finished_job(kind: &str, failed: u64) -> Job {
        let mut job = Job::new(kind, ExecutionMode::Async);
        job.transition(JobState::Running).unwrap();
        job.total = 10;
        for _ in 0..(10 - failed) {
            job.record_success();
        }
        for _ in 0..failed {
            job.record_failure();
        }
        if failed > 0 {
            job.error_summary = Some(format!("{} items failed; last: HTTP 404", failed));
        }
        job.transition(JobState::Completed).unwrap();
        job
    }

    #[test]
    fn test_format_markdown_summary() {
        let jobs = vec![finished_job("news", 0), finished_job("forum", 2)];
        let markdown = format_markdown_summary(&jobs);

        assert!(markdown.contains("# Harvest Job Summary"));
        assert!(markdown.contains("- **Jobs**: 2"));
        assert!(markdown.contains("- **Saved**: 18"));
        assert!(markdown.contains("| news | async | completed | 10 | 10 | 0 | 0 |"));
        assert!(markdown.contains("## Errors"));
        assert!(markdown.contains("2 items failed"));
    }

    #[test]
    fn test_no_jobs() {
        let markdown = format_markdown_summary(&[]);
        assert!(markdown.contains("- **Jobs**: 0"));
        assert!(!markdown.contains("## Jobs"));
    }

    #[test]
    fn test_write_markdown_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.md");

        write_markdown_summary(&[finished_job("news", 1)], &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("news"));
    }
}
