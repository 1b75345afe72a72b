// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Terminal rendering of change records, instances and watch status

use comfy_table::{Table, presets::ASCII_BORDERS_ONLY_CONDENSED};
use k8swatch::watch::{ChangeRecord, Instance, WatchStatus};
use serde_json::json;

use super::OutputFormat;

pub fn format_record(record: &ChangeRecord, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!("{} {} {}", record.timestamp, record.key, record.message),
        OutputFormat::Json => serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string()),
    }
}

pub fn format_instances(instances: &[Instance], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(instances).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Text => {
            let mut table = Table::new();
            table.load_preset(ASCII_BORDERS_ONLY_CONDENSED);
            table.set_header(vec!["NAME", "PHASE", "NODE", "CONTAINERS"]);
            for i in instances {
                let containers = i.container_names.join(",");
                table.add_row(vec![
                    i.name.as_str(),
                    i.phase.as_deref().unwrap_or("-"),
                    i.node_name.as_deref().unwrap_or("-"),
                    containers.as_str(),
                ]);
            }
            table.to_string()
        }
    }
}

/// Render a status update, or None for updates not worth showing
pub fn format_status(status: &WatchStatus, format: OutputFormat, verbose: bool) -> Option<String> {
    let (event, detail) = match status {
        WatchStatus::Stale {
            consecutive_failures,
            error,
            ..
        } => (
            "stale",
            format!("{} consecutive failures: {}", consecutive_failures, error),
        ),
        WatchStatus::Recovered { .. } => ("recovered", String::new()),
        WatchStatus::Synced { objects, .. } if verbose => ("synced", format!("{} workloads", objects)),
        WatchStatus::Connected { elapsed_ms, .. } if verbose => {
            ("connected", format!("{} ms", elapsed_ms))
        }
        _ => return None,
    };

    Some(match format {
        OutputFormat::Text => format!("# {} {} {}", status.cluster(), event, detail)
            .trim_end()
            .to_string(),
        OutputFormat::Json => json!({
            "status": event,
            "cluster": status.cluster(),
            "detail": detail,
        })
        .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8swatch::watch::ObjectKey;

    fn record() -> ChangeRecord {
        ChangeRecord {
            timestamp: "2024-05-01T12:00:00Z".to_string(),
            key: ObjectKey::new("prod", "default", "web"),
            message: "Replicas changed: 3".to_string(),
        }
    }

    #[test]
    fn test_record_text_and_json() {
        assert_eq!(
            format_record(&record(), OutputFormat::Text),
            "2024-05-01T12:00:00Z prod/default/web Replicas changed: 3"
        );
        let value: serde_json::Value =
            serde_json::from_str(&format_record(&record(), OutputFormat::Json)).unwrap();
        assert_eq!(value["message"], "Replicas changed: 3");
        assert_eq!(value["objectKey"]["name"], "web");
    }

    #[test]
    fn test_instances_table() {
        let instances = vec![
            Instance {
                name: "web-7d9f-abcde".to_string(),
                container_names: vec!["nginx".to_string(), "envoy".to_string()],
                phase: Some("Running".to_string()),
                node_name: Some("node-1".to_string()),
            },
            Instance {
                name: "web-x".to_string(),
                container_names: vec!["nginx".to_string()],
                phase: None,
                node_name: None,
            },
        ];
        let text = format_instances(&instances, OutputFormat::Text);
        let lines: Vec<_> = text.lines().collect();

        let header = lines.iter().position(|l| l.contains("NAME")).unwrap();
        let first = lines.iter().position(|l| l.contains("web-7d9f-abcde")).unwrap();
        let second = lines.iter().position(|l| l.contains("web-x")).unwrap();
        assert!(header < first && first < second);
        for col in ["PHASE", "NODE", "CONTAINERS"] {
            assert!(lines[header].contains(col));
        }
        assert!(lines[first].contains("Running"));
        assert!(lines[first].contains("node-1"));
        assert!(lines[first].contains("nginx,envoy"));

        let cells: Vec<_> = lines[second].split_whitespace().collect();
        assert_eq!(cells.iter().filter(|c| **c == "-").count(), 2);
        assert!(cells.contains(&"nginx"));

        // Bordered like the rest of the terminal output
        assert!(lines[0].starts_with('+'));
        assert!(lines[lines.len() - 1].starts_with('+'));
    }

    #[test]
    fn test_instances_empty_table_has_header() {
        let text = format_instances(&[], OutputFormat::Text);
        assert!(text.contains("NAME"));
        assert!(text.contains("CONTAINERS"));
    }

    #[test]
    fn test_status_filtering() {
        let stale = WatchStatus::Stale {
            cluster: "prod".to_string(),
            consecutive_failures: 5,
            error: "connection refused".to_string(),
        };
        assert_eq!(
            format_status(&stale, OutputFormat::Text, false).as_deref(),
            Some("# prod stale 5 consecutive failures: connection refused")
        );

        let synced = WatchStatus::Synced {
            cluster: "prod".to_string(),
            objects: 3,
        };
        assert!(format_status(&synced, OutputFormat::Text, false).is_none());
        assert!(format_status(&synced, OutputFormat::Json, true).is_some());
    }
}
