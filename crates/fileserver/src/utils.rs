//! Formatting helpers for API responses

use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Format a byte count in human-readable binary units
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Convert a filesystem timestamp to UTC
pub fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Accumulated-path breadcrumb used by the file browser
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Breadcrumb {
    pub name: String,
    pub path: String,
}

/// Breadcrumbs from the root ("Home") down to `current_path`
pub fn breadcrumbs(current_path: &str) -> Vec<Breadcrumb> {
    let mut crumbs = vec![Breadcrumb {
        name: "Home".to_string(),
        path: String::new(),
    }];

    let mut accumulated = String::new();
    for part in crate::paths::segments(current_path) {
        accumulated = crate::paths::join_relative(&accumulated, part);
        crumbs.push(Breadcrumb {
            name: part.to_string(),
            path: accumulated.clone(),
        });
    }
    crumbs
}
