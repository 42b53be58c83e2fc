//! Report rendering
//!
//! Tables for renewal, reconciliation, maintenance and dispatch reports.

use prettytable::{format, Cell, Row, Table};

use crate::directives::{Directives, QueueHint};
use crate::dispatch::{BatchReport, SideTaskOutcome};
use crate::lifecycle::{MaintenanceReport, RenewalReport, RenewalStatus, SyncReport};
use crate::processor::ProcessOutcome;
use super::colours::ColourManager;

/// Format a compact table with headers and rows using prettytable-rs clean format
pub fn format_compact_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_CLEAN);
    table.set_titles(Row::new(headers.iter().map(|h| Cell::new(h)).collect()));
    for row in rows {
        table.add_row(Row::new(row.iter().map(|cell| Cell::new(cell)).collect()));
    }

    table
        .to_string()
        .lines()
        .map(|line| format!("  {}\n", line.trim_end()))
        .collect()
}

pub fn render_renewal(report: &RenewalReport, colours: &ColourManager) -> String {
    let mut out = format!(
        "{} {} checked, {} renewed, {} skipped, {} failed\n",
        colours.highlight("Renewal:"),
        report.checked,
        colours.success(&report.renewed.to_string()),
        report.skipped,
        failure_count(report.failed, colours),
    );
    if let Some(error) = &report.error {
        out.push_str(&format!("  {}\n", colours.error(error)));
    }

    let rows: Vec<Vec<String>> = report
        .details
        .iter()
        .map(|detail| {
            let (status, note) = match &detail.status {
                RenewalStatus::Renewed { expires_at } => {
                    (colours.success("renewed").to_string(), format!("until {}", expires_at.to_rfc3339()))
                }
                RenewalStatus::Skipped { remaining_secs } => {
                    (colours.muted("skipped").to_string(), format!("{}h left", remaining_secs / 3600))
                }
                RenewalStatus::Failed { error } => (colours.error("failed").to_string(), error.clone()),
            };
            vec![detail.subscription_id.clone(), detail.resource.clone(), status, note]
        })
        .collect();

    out.push_str(&format_compact_table(&["Subscription", "Resource", "Status", "Detail"], &rows));
    out
}

pub fn render_sync(report: &SyncReport, colours: &ColourManager) -> String {
    let mut out = format!(
        "{} {} created, {} updated, {} unchanged, {} marked deleted\n",
        colours.highlight("Reconcile:"),
        colours.success(&report.created.to_string()),
        report.updated,
        report.unchanged,
        colours.warning(&report.deleted_marked.to_string()),
    );
    for error in &report.errors {
        out.push_str(&format!("  {}\n", colours.error(error)));
    }
    out
}

pub fn render_maintenance(report: &MaintenanceReport, colours: &ColourManager) -> String {
    let elapsed = report.finished_at - report.started_at;
    let mut out = render_renewal(&report.renewal, colours);
    out.push_str(&render_sync(&report.sync, colours));
    out.push_str(&format!("{}\n", colours.muted(&format!("pass took {}ms", elapsed.num_milliseconds()))));
    out
}

pub fn render_batch(report: &BatchReport, colours: &ColourManager) -> String {
    let mut out = format!(
        "{} {} received, {} processed, {} duplicates\n",
        colours.highlight("Dispatch:"),
        report.received,
        colours.success(&report.processed.to_string()),
        report.duplicates,
    );

    let rows: Vec<Vec<String>> = report
        .items
        .iter()
        .map(|item| {
            let processing = match &item.processing {
                Some(ProcessOutcome::Submitted { processor, queue, .. }) => {
                    colours.success(&format!("{} -> {}", processor, queue)).to_string()
                }
                Some(outcome) => colours.warning(outcome.processor()).to_string(),
                None => "-".to_string(),
            };
            let note = match (&item.error, &item.reason) {
                (Some(error), _) => colours.error(error).to_string(),
                (None, Some(reason)) => reason.clone(),
                (None, None) => String::new(),
            };
            vec![
                item.subscription_id.clone().unwrap_or_else(|| "?".to_string()),
                if item.processed { "yes".to_string() } else { "no".to_string() },
                if item.forwarded { colours.success("yes").to_string() } else { "no".to_string() },
                processing,
                note,
            ]
        })
        .collect();
    out.push_str(&format_compact_table(&["Subscription", "Processed", "Forwarded", "Processor", "Note"], &rows));

    for task in &report.side_tasks {
        if task.result == SideTaskOutcome::SkippedDeleted {
            out.push_str(&format!(
                "  {}\n",
                colours.warning(&format!("{} is Deleted; record left unchanged", task.task.subscription_id()))
            ));
        }
    }
    out
}

/// Key/value view of parsed directives, with the derived routing decision
pub fn render_directives(directives: &Directives, default_queue: &str, colours: &ColourManager) -> String {
    let mut rows = Vec::new();
    if let Some(forward) = &directives.forward {
        rows.push(vec!["forward".to_string(), forward.clone()]);
    }
    if let Some(processor) = &directives.processor {
        rows.push(vec!["processor".to_string(), processor.clone()]);
    }
    if let Some(queue) = &directives.queue {
        let value = match queue {
            QueueHint::Enabled => "enabled".to_string(),
            QueueHint::Disabled => "disabled".to_string(),
            QueueHint::Named(name) => name.clone(),
        };
        rows.push(vec!["uipath".to_string(), value]);
    }
    if let Some(detect) = directives.detect_changes {
        rows.push(vec!["detectChanges".to_string(), detect.to_string()]);
    }
    if let Some(fields) = &directives.fields {
        rows.push(vec!["fields".to_string(), fields.join(", ")]);
    }
    for (key, value) in &directives.unknown {
        rows.push(vec![colours.muted(key).to_string(), colours.muted(value).to_string()]);
    }

    if rows.is_empty() {
        return format!("{}\n", colours.muted("No directives"));
    }

    let mut out = format_compact_table(&["Directive", "Value"], &rows);
    let routing = match directives.target_queue(default_queue) {
        Some(queue) if directives.requests_processing() => colours.success(&format!("process -> {}", queue)).to_string(),
        _ => colours.muted("no processing").to_string(),
    };
    out.push_str(&format!("  {} {}\n", colours.highlight("Routing:"), routing));
    out
}

fn failure_count(failed: usize, colours: &ColourManager) -> String {
    if failed > 0 {
        colours.error(&failed.to_string()).to_string()
    } else {
        failed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::RenewalDetail;

    #[test]
    fn test_compact_table() {
        let table = format_compact_table(
            &["Subscription", "Status"],
            &[vec!["S1".to_string(), "renewed".to_string()]],
        );
        assert!(table.contains("Subscription"));
        assert!(table.contains("S1"));
        assert!(table.lines().all(|line| line.starts_with("  ")));
        assert!(format_compact_table(&["x"], &[]).is_empty());
    }

    #[test]
    fn test_render_renewal_plain() {
        let report = RenewalReport {
            checked: 2,
            renewed: 1,
            failed: 1,
            skipped: 0,
            details: vec![
                RenewalDetail {
                    subscription_id: "S1".to_string(),
                    resource: "sites/a/lists/b".to_string(),
                    status: RenewalStatus::Failed { error: "throttled".to_string() },
                },
            ],
            error: None,
        };

        let out = render_renewal(&report, &ColourManager::with_colours(false));
        assert!(out.starts_with("Renewal: 2 checked, 1 renewed, 0 skipped, 1 failed"));
        assert!(out.contains("throttled"));
    }

    #[test]
    fn test_render_directives() {
        let colours = ColourManager::with_colours(false);
        let out = render_directives(&Directives::parse("forward:https://x.example/y;uipath:QueueA;tenant:42"), "default", &colours);
        assert!(out.contains("https://x.example/y"));
        assert!(out.contains("tenant"));
        assert!(out.contains("process -> QueueA"));

        assert_eq!(render_directives(&Directives::default(), "default", &colours), "No directives\n");
    }

    #[test]
    fn test_render_sync_lists_errors() {
        let report = SyncReport {
            deleted_marked: 1,
            errors: vec!["update S2: store unavailable".to_string()],
            ..Default::default()
        };
        let out = render_sync(&report, &ColourManager::with_colours(false));
        assert!(out.contains("1 marked deleted"));
        assert!(out.contains("store unavailable"));
    }
}
