//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying plans, run
//! reports, drift and state in text or JSON.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::engine::{DriftReport, PreparedRun, RunOutcome};
use crate::executor::{ResourceStatus, StepStatus};
use crate::planner::{ActionKind, Plan};
use crate::state::StateFile;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Step row for table display.
#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
}

/// Tracked resource row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Deposed")]
    deposed: usize,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, prepared: &PreparedRun, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(prepared),
            OutputFormat::Text => {
                let mut output = String::new();
                if let Some(drift) = &prepared.drift {
                    output.push_str(&Self::format_drift_text(drift));
                    output.push('\n');
                }
                output.push_str(&Self::format_plan_text(&prepared.plan, detailed));
                output
            }
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes. Infrastructure matches the configuration.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nPlan {}\n", plan.run_id);
        let _ = write!(output, "   Config hash: {}\n\n", ConfigHasher::short_hash(&plan.config_hash));

        let rows: Vec<PlanActionRow> = plan
            .actionable()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_kind(a.kind),
                resource: a
                    .deposed
                    .as_ref()
                    .map_or_else(|| a.resource.to_string(), |d| format!("{} (deposed {d})", a.resource)),
                reason: Self::truncate(&a.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            output.push_str("\nChanges:\n");
            for action in plan.actionable().filter(|a| !a.changes.is_empty()) {
                let _ = writeln!(output, "   {}", action.resource);
                for change in &action.changes {
                    let old = change.old.as_ref().map_or_else(|| String::from("-"), ToString::to_string);
                    let marker = if change.requires_replace {
                        " (forces replacement)".red().to_string()
                    } else {
                        String::new()
                    };
                    let _ = writeln!(output, "     {}: {old} -> {}{marker}", change.attribute, change.new);
                }
            }
        }

        let counts = plan.counts();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to destroy\n",
            counts.create.to_string().green(),
            counts.update.to_string().yellow(),
            counts.replace.to_string().magenta(),
            counts.destroy.to_string().red()
        );
        output
    }

    /// Formats the outcome of an apply or destroy.
    #[must_use]
    pub fn format_run(&self, outcome: &RunOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(outcome),
            OutputFormat::Text => {
                let report = &outcome.report;
                let mut output = String::new();

                if !report.steps.is_empty() {
                    let rows: Vec<StepRow> = report
                        .steps
                        .iter()
                        .map(|s| StepRow {
                            index: s.index + 1,
                            step: s.kind.to_string(),
                            resource: s.resource.to_string(),
                            status: Self::format_step_status(s.status),
                            attempts: s.attempts,
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let headline = if report.is_success() {
                    format!("{} Run {} complete", "✓".green(), report.run_id)
                } else {
                    format!("{} Run {} incomplete", "✗".red(), report.run_id)
                };
                let _ = write!(output, "\n{headline}\n");
                for status in [
                    ResourceStatus::Applied,
                    ResourceStatus::NoOp,
                    ResourceStatus::Failed,
                    ResourceStatus::Blocked,
                    ResourceStatus::Cancelled,
                ] {
                    let count = report.count(status);
                    if count > 0 {
                        let _ = writeln!(output, "   {status}: {count}");
                    }
                }

                if !report.failures.is_empty() {
                    let _ = write!(output, "\n{} Failures:\n", "⚠".yellow());
                    for failure in &report.failures {
                        let _ = writeln!(output, "   - {failure}");
                    }
                }
                match (&outcome.state_error, outcome.serial) {
                    (Some(e), _) => {
                        let _ = writeln!(output, "\n{} State not saved: {e}", "✗".red());
                    }
                    (None, Some(serial)) => {
                        let _ = writeln!(output, "\nState serial: {serial}");
                    }
                    (None, None) => {}
                }
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => Self::format_drift_text(report),
        }
    }

    fn format_drift_text(report: &DriftReport) -> String {
        if report.has_drift() {
            format!("{} {report}\n", "⚠".yellow())
        } else {
            format!("{} {report}\n", "✓".green())
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        show_warnings: bool,
        resources: usize,
        edges: usize,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.errors.is_empty(),
                "warnings": result.warnings,
                "resources": resources,
                "edges": edges,
            })),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Configuration is valid: {resources} resource(s), {edges} dependency edge(s)\n",
                    "✓".green()
                );
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats the state summary.
    #[must_use]
    pub fn format_state(&self, state: &StateFile) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(output, "   Lineage: {}", state.lineage);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.records.len());

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent runs ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} [{}] {} applied, {} incomplete",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            ConfigHasher::short_hash(&entry.config_hash),
                            entry.applied.len(),
                            entry.incomplete.len()
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats the tracked resources.
    #[must_use]
    pub fn format_state_list(&self, state: &StateFile) -> String {
        match self.format {
            OutputFormat::Json => to_json(&state.records),
            OutputFormat::Text => {
                if state.records.is_empty() {
                    return String::from("No resources tracked.\n");
                }
                let rows: Vec<RecordRow> = state
                    .records
                    .values()
                    .map(|r| RecordRow {
                        resource: r.id.to_string(),
                        provider_id: r.provider_id.clone(),
                        deposed: r.deposed.len(),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats an action kind with color.
    fn format_action_kind(kind: ActionKind) -> String {
        match kind {
            ActionKind::Create => "+create".green().to_string(),
            ActionKind::Update => "~update".yellow().to_string(),
            ActionKind::Replace => "±replace".magenta().to_string(),
            ActionKind::Destroy => "-destroy".red().to_string(),
            ActionKind::NoOp => "no-op".dimmed().to_string(),
        }
    }

    /// Formats a step status with color.
    fn format_step_status(status: StepStatus) -> String {
        match status {
            StepStatus::Applied => "applied".green().to_string(),
            StepStatus::Failed => "failed".red().to_string(),
            StepStatus::Blocked => "blocked".yellow().to_string(),
            StepStatus::Cancelled => "cancelled".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}
