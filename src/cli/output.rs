//! CLI output formatting

use crate::core::{Hop, NodeStatus, OverallStatus, PipelineResult, Role, StepOutcome};
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
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar over nodes
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

/// Format a node status for display
pub fn format_node_status(status: NodeStatus) -> String {
    match status {
        NodeStatus::Success => style("SUCCESS").green().to_string(),
        NodeStatus::Error => style("ERROR").red().to_string(),
        NodeStatus::Skipped => style("SKIPPED").yellow().to_string(),
    }
}

fn format_role(role: Role) -> String {
    match role {
        Role::Intermediate => style("intermediate").cyan().to_string(),
        Role::Terminal => style("terminal").magenta().to_string(),
    }
}

/// Format an execution event for display, `None` for events too chatty to show
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted {
            execution_id,
            operation,
            node_count,
        } => format!(
            "{} Starting {} over {} node(s) ({})",
            ROCKET,
            style(operation).bold(),
            style(node_count).cyan(),
            style(&execution_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::NodeStarted { address, role } => format!(
            "{} {} ({})",
            SPINNER,
            style(address).bold(),
            format_role(*role)
        ),
        ExecutionEvent::ConnectAttemptFailed {
            address,
            attempt,
            max_attempts,
            error,
        } => format!(
            "{} {} connect attempt {}/{}: {}",
            WARN,
            style(address).yellow(),
            attempt,
            max_attempts,
            style(error).dim()
        ),
        ExecutionEvent::StepFailed {
            address,
            description,
            error,
        } => format!(
            "{} {} {}: {}",
            CROSS,
            style(address).dim(),
            style(description).red(),
            style(error).dim()
        ),
        ExecutionEvent::NodeSkipped { address, reason } => format!(
            "{} {} skipped: {}",
            SKIP,
            style(address).yellow(),
            style(reason).dim()
        ),
        ExecutionEvent::NodeFinished { address, status } => {
            let icon = match status {
                NodeStatus::Success => CHECK,
                NodeStatus::Error => CROSS,
                NodeStatus::Skipped => SKIP,
            };
            format!("{} {} {}", icon, style(address).bold(), format_node_status(*status))
        }
        ExecutionEvent::FinalizationStarted => format!("{} Finalizing chain", INFO),
        ExecutionEvent::FinalizationWithheld { reason } => format!(
            "{} Finalization withheld: {}",
            WARN,
            style(reason).yellow()
        ),
        ExecutionEvent::RunFinished { execution_id, status } => {
            let status_str = match status {
                OverallStatus::Success => style("successfully").green().to_string(),
                OverallStatus::Error => style("with errors").red().to_string(),
            };
            format!(
                "{} Run ({}) finished {}",
                INFO,
                style(&execution_id.to_string()[..8]).dim(),
                status_str
            )
        }
        ExecutionEvent::Connected { .. }
        | ExecutionEvent::NodeStateChanged { .. }
        | ExecutionEvent::StepCompleted { .. } => return None,
    };
    Some(line)
}

fn format_step(step: &StepOutcome) -> String {
    if step.is_ok() {
        format!("    {} {}", style("ok").green(), step.description)
    } else {
        format!(
            "    {} {}: {}",
            style("failed").red(),
            step.description,
            style(step.error.as_deref().unwrap_or_default()).dim()
        )
    }
}

/// Human-readable summary of a finished run
pub fn format_result(result: &PipelineResult, verbose: bool) -> String {
    let mut lines = Vec::new();
    for node in &result.node_results {
        let mut line = format!(
            "  {} {} {}",
            style(&node.address).bold(),
            format_role(node.role),
            format_node_status(node.status)
        );
        if let Some(message) = &node.message {
            line.push_str(&format!(" - {}", style(message).dim()));
        }
        lines.push(line);
        for step in &node.steps {
            if verbose || !step.is_ok() {
                lines.push(format_step(step));
            }
        }
    }
    lines.push(format!(
        "  {} succeeded, {} failed, {} skipped",
        style(result.count(NodeStatus::Success)).green(),
        style(result.count(NodeStatus::Error)).red(),
        style(result.count(NodeStatus::Skipped)).yellow()
    ));
    lines.join("\n")
}

/// Table of resolved hops
pub fn format_plan(hops: &[Hop]) -> String {
    hops.iter()
        .map(|hop| {
            let next = hop
                .next_hop
                .as_deref()
                .map(|next| format!("-> {}", style(next).cyan()))
                .unwrap_or_else(|| style("(egress)").dim().to_string());
            format!(
                "  {}. {} {} {}",
                hop.index + 1,
                style(&hop.node.address).bold(),
                format_role(hop.role),
                next
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
