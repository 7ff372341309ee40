//! CLI output formatting

use crate::core::{ExecutionStatus, PipelineRun, StepResult, StepStatus};
use crate::execution::ExecutionEvent;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar over the steps of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a step status for display
pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        StepStatus::Failed => style("FAILED").red().to_string(),
        StepStatus::TimedOut => style("TIMED OUT").red().to_string(),
        StepStatus::NotAttempted => style("NOT ATTEMPTED").dim().to_string(),
    }
}

fn short_id(run: &PipelineRun) -> String {
    run.run_id().simple().to_string()[..8].to_string()
}

/// One-line summary of a run for history listings
pub fn format_run_summary(run: &PipelineRun) -> String {
    let status_icon = match run.status() {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Pending => INFO,
    };

    let started = run
        .started_at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{} {} - {} - {} - {}",
        status_icon,
        style(short_id(run)).dim(),
        style(run.pipeline_name()).bold(),
        format_status(run.status()),
        style(started).dim()
    )
}

/// One line per step invocation
pub fn format_step_result(result: &StepResult) -> String {
    let mut line = format!(
        "{} #{} {}",
        style(result.step_name()).bold(),
        result.attempt(),
        format_step_status(result.status())
    );
    if let Some(code) = result.exit_code() {
        line.push_str(&format!(" (exit {})", code));
    }
    if result.status() != StepStatus::NotAttempted {
        line.push_str(&format!(" in {}", format_duration(result.duration())));
    }
    if let Some(error) = result.error() {
        line.push_str(&format!(" - {}", style(error).dim()));
    }
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{} Starting pipeline {} ({}, {} steps)",
            ROCKET,
            style(pipeline_name).bold(),
            style(&run_id.simple().to_string()[..8]).dim(),
            total_steps
        ),
        ExecutionEvent::StepStarted {
            step_name,
            attempt,
            max_attempts,
        } => {
            if *attempt > 1 {
                format!(
                    "{} {} (attempt {}/{})",
                    SPINNER,
                    style(step_name).cyan(),
                    attempt,
                    max_attempts
                )
            } else {
                format!("{} {}", SPINNER, style(step_name).cyan())
            }
        }
        ExecutionEvent::StepOutput { step_name, output } => {
            format!(
                "{} Output from {}:\n{}",
                INFO,
                style(step_name).dim(),
                format_output(output, 10)
            )
        }
        ExecutionEvent::StepSucceeded {
            step_name,
            duration,
            ..
        } => format!(
            "{} {} {}",
            CHECK,
            style(step_name).green(),
            style(format_duration(*duration)).dim()
        ),
        ExecutionEvent::StepFailed {
            step_name,
            attempt,
            error,
            ..
        } => format!(
            "{} {} (attempt {}): {}",
            CROSS,
            style(step_name).red(),
            attempt,
            style(error).dim()
        ),
        ExecutionEvent::StepRetrying {
            step_name,
            next_attempt,
            max_attempts,
            delay,
        } => format!(
            "{} Retrying {} in {} (attempt {}/{})",
            WARN,
            style(step_name).yellow(),
            format_duration(*delay),
            next_attempt,
            max_attempts
        ),
        ExecutionEvent::StepNotAttempted { step_name, reason } => format!(
            "{} {} not attempted: {}",
            SKIP,
            style(step_name).dim(),
            reason
        ),
        ExecutionEvent::RunFinished { run_id, status } => {
            let status_str = match status {
                ExecutionStatus::Succeeded => format!("{}", style("succeeded").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                other => other.to_string(),
            };
            format!(
                "{} Run {} {}",
                INFO,
                style(&run_id.simple().to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.trim_end().to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Human-readable duration
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
