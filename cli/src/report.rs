use anyhow::Result;
use pbs_estimator_core::Report;
use pbs_estimator_core::aggregate::GroupReport;
use std::fmt::Write;

const GIB: f64 = (1024 * 1024 * 1024) as f64;

pub fn format_gib(bytes: u64) -> String {
    format!("{:.2} GiB", bytes as f64 / GIB)
}

pub fn render_json(report: &Report) -> Result<String> {
    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    Ok(json)
}

/// Renders the report the way it is printed to the terminal.
pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    let multiple = report.namespaces.len() > 1;

    for ns in &report.namespaces {
        if multiple || !ns.namespace.is_root() {
            let _ = writeln!(out, "Namespace {}", ns.namespace.display_name());
            let _ = writeln!(out, "{:=<40}", "");
        }
        for group in &ns.groups {
            render_group(&mut out, group);
        }
        let _ = writeln!(out, "Total Namespace Size: {}", format_gib(ns.new_bytes));
        let _ = writeln!(
            out,
            "Total Referenced Size: {}",
            format_gib(ns.referenced_bytes)
        );
        let _ = writeln!(out);
    }

    if multiple {
        let _ = writeln!(out, "Total Datastore Size: {}", format_gib(report.new_bytes_total));
        let _ = writeln!(
            out,
            "Total Referenced Size: {}",
            format_gib(report.referenced_bytes_total)
        );
    }

    if !report.failures.is_empty() {
        let _ = writeln!(
            out,
            "Skipped {} snapshot(s) with unreadable indexes:",
            report.failures.len()
        );
        for failure in &report.failures {
            let _ = writeln!(
                out,
                " - {} {}/{}: {}",
                failure.namespace.display_name(),
                failure.group,
                failure.snapshot,
                failure.reason
            );
        }
    }

    out
}

fn render_group(out: &mut String, group: &GroupReport) {
    let _ = writeln!(
        out,
        "{} ID: {}",
        group.backup_type.as_str().to_uppercase(),
        group.id
    );
    let _ = writeln!(
        out,
        "Estimated size: {} (referenced {}, {} snapshots)",
        format_gib(group.new_bytes),
        format_gib(group.referenced_bytes),
        group.snapshot_count
    );
    for snap in &group.snapshots {
        let _ = writeln!(
            out,
            " - {}: {} new chunks ({})",
            snap.time,
            snap.new_chunks,
            format_gib(snap.new_bytes)
        );
    }
    let _ = writeln!(out, "{:-<40}", "");
}

pub fn render_empty(json: bool, groups: usize, failed: usize) -> Result<String> {
    if json {
        let value = serde_json::json!({
            "empty": true,
            "groups_matched": groups,
            "snapshots_failed": failed,
        });
        return Ok(format!("{}\n", serde_json::to_string_pretty(&value)?));
    }
    Ok(format!(
        "No backup data found ({} groups matched, {} snapshots failed to parse)\n",
        groups, failed
    ))
}
