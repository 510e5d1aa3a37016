//! Terminal summaries for runs, consolidations and checkpoints

use super::ConsolidationRun;
use crate::checkpoint::Checkpoint;
use crate::models::RunReport;
use colored::*;

fn watermark(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "none".to_string())
}

pub fn print_run_summary(report: &RunReport) {
    let elapsed = (report.finished_at - report.started_at).num_milliseconds();

    println!(
        "\n{} {}/{}",
        "Processing Summary".bright_green().bold(),
        report.plant,
        report.dryer
    );
    println!(
        "  {} {}ms",
        "Time elapsed:".bright_cyan(),
        elapsed.to_string().bright_white()
    );
    println!(
        "  {} {} of {} listed",
        "Files selected:".bright_cyan(),
        report.files_selected.to_string().bright_white(),
        report.files_listed
    );
    println!(
        "  {} {}",
        "Files processed:".bright_cyan(),
        report.succeeded().to_string().bright_white()
    );
    if report.failed() > 0 {
        println!(
            "  {} {}",
            "Files failed:".bright_red(),
            report.failed().to_string().bright_red().bold()
        );
        for outcome in report.outcomes.iter().filter(|o| !o.is_success()) {
            println!(
                "    {} {}",
                outcome.file.name.bright_red(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!(
        "  {} {}",
        "Total readings:".bright_cyan(),
        report.total_records().to_string().bright_white().bold()
    );
    let matched: usize = report.outcomes.iter().map(|o| o.records_matched_lab).sum();
    let calibrated: usize = report.outcomes.iter().map(|o| o.records_calibrated).sum();
    println!(
        "  {} {} matched lab, {} calibrated",
        "Readings:".bright_cyan(),
        matched,
        calibrated
    );
    println!(
        "  {} {} -> {}",
        "Watermark:".bright_cyan(),
        watermark(report.previous_watermark),
        watermark(report.new_watermark).bright_white()
    );
    if let Some(error) = &report.checkpoint_error {
        println!("  {} {}", "Checkpoint not advanced:".bright_red().bold(), error);
    }
    if !report.reference_warnings.is_empty() {
        println!(
            "  {} {}",
            "Reference warnings:".bright_yellow(),
            report.reference_warnings.len()
        );
        for warning in &report.reference_warnings {
            println!("    {}", warning.yellow());
        }
    }
}

pub fn print_consolidation_summary(run: &ConsolidationRun) {
    println!(
        "\n{} {}",
        "Consolidation Summary".bright_green().bold(),
        run.plant
    );
    println!(
        "  {} {}/{}",
        "Output:".bright_cyan(),
        run.folder,
        run.output_file
    );
    println!(
        "  {} {}",
        "Validated files:".bright_cyan(),
        run.files.len().to_string().bright_white()
    );
    println!(
        "  {} {} ({} new, {} duplicates dropped)",
        "Rows:".bright_cyan(),
        run.rows.to_string().bright_white().bold(),
        run.report.appended,
        run.report.duplicates_dropped
    );
    if run.report.skipped_unkeyed > 0 {
        println!(
            "  {} {}",
            "Rows without batch id:".bright_yellow(),
            run.report.skipped_unkeyed
        );
    }
    for warning in &run.warnings {
        println!("  {} {}", "Skipped:".bright_yellow(), warning);
    }
}

pub fn print_checkpoint(checkpoint: &Checkpoint) {
    println!(
        "\n{} {}/{}",
        "Checkpoint".bright_green().bold(),
        checkpoint.plant,
        checkpoint.dryer
    );
    println!(
        "  {} {}",
        "Watermark:".bright_cyan(),
        watermark(checkpoint.last_run_timestamp).bright_white()
    );
    println!(
        "  {} {}",
        "Version:".bright_cyan(),
        checkpoint.version
    );
    println!(
        "  {} {}",
        "Files processed:".bright_cyan(),
        checkpoint.total_files_processed.to_string().bright_white()
    );
    if let Some(updated) = checkpoint.last_updated {
        println!("  {} {}", "Last updated:".bright_cyan(), updated.to_rfc3339());
    }
    for entry in checkpoint.processed_files.iter().rev().take(10) {
        println!(
            "    {} {} ({} readings)",
            entry.processed_at.format("%Y-%m-%d %H:%M:%S"),
            entry.file_name,
            entry.records_processed
        );
    }
}
