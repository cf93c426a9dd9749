// Report generation from loaded diagrams

use crate::model::NodeKind;
use crate::pipeline::{ChordView, Coverage, SankeyView};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

/// Human readable byte count using binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn section(report: &mut String, title: &str) {
    report.push_str(RULE);
    report.push('\n');
    report.push_str(title);
    report.push('\n');
    report.push_str(RULE);
    report.push_str("\n\n");
}

fn coverage_lines(report: &mut String, coverage: &Coverage) {
    report.push_str(&format!("Flows:        {}\n", coverage.summary));
    report.push_str(&format!(
        "Traffic:      {} of {}\n\n",
        format_bytes(coverage.shown_bytes),
        format_bytes(coverage.total_bytes)
    ));
}

pub fn generate_chord_text(title: &str, view: &ChordView, max_pairs: usize) -> String {
    let mut report = String::new();
    section(&mut report, title);
    coverage_lines(&mut report, &view.truncation);

    if view.chord.is_empty() {
        report.push_str("  (no traffic)\n\n");
        return report;
    }

    report.push_str(&format!("Endpoints:    {}\n", view.chord.len()));
    report.push_str(&format!("Total:        {}\n\n", format_bytes(view.chord.total())));

    let pairs = view.chord.pairs();
    for (i, j, bytes) in pairs.iter().take(max_pairs) {
        let direction = view
            .chord
            .direction_of(*i, *j)
            .map(|d| format!("  [{}]", d.as_str()))
            .unwrap_or_default();
        report.push_str(&format!(
            "  {} → {}  {}{}\n",
            view.labels[*i],
            view.labels[*j],
            format_bytes(*bytes),
            direction
        ));
    }
    if pairs.len() > max_pairs {
        report.push_str(&format!("  ... {} more pairs\n", pairs.len() - max_pairs));
    }
    report.push('\n');

    report
}

pub fn generate_sankey_text(title: &str, view: &SankeyView) -> String {
    let mut report = String::new();
    section(&mut report, title);
    coverage_lines(&mut report, &view.truncation);

    let graph = &view.graph;
    if graph.is_empty() {
        report.push_str("  (no traffic)\n\n");
        return report;
    }

    for kind in [NodeKind::Source, NodeKind::Application, NodeKind::Destination] {
        let names: Vec<String> = graph
            .nodes_of(kind)
            .map(|(_, node)| match &node.original_ip {
                Some(ip) => format!("{} ({})", node.name, ip),
                None => node.name.clone(),
            })
            .collect();
        report.push_str(&format!("{:<13} {}\n", format!("{}s:", capitalize(kind.as_str())), names.len()));
        for name in names {
            report.push_str(&format!("  {}\n", name));
        }
    }
    report.push('\n');

    report.push_str("Links:\n");
    for link in &graph.links {
        report.push_str(&format!(
            "  {} → {}  {}\n",
            graph.nodes[link.source].name,
            graph.nodes[link.target].name,
            format_bytes(link.value)
        ));
    }
    report.push('\n');

    report
}

fn metadata() -> serde_json::Value {
    serde_json::json!({
        "generator": "Flowlens",
        "version": env!("CARGO_PKG_VERSION"),
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "format": "json"
    })
}

/// Renderer-ready chord shapes: node labels, the matrix and the direction map.
pub fn generate_chord_json(view: &ChordView) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": metadata(),
            "coverage": view.truncation,
            "chord": {
                "nodes": view.chord.nodes,
                "labels": view.labels,
                "matrix": view.chord.matrix,
                "directions": view.chord.directions,
            }
        }
    });

    serde_json::to_string_pretty(&json_report)
}

/// Renderer-ready sankey shapes: `{nodes, links}` with index links.
pub fn generate_sankey_json(view: &SankeyView) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": metadata(),
            "coverage": view.truncation,
            "sankey": view.graph,
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}
