use anyhow::anyhow;
use scrum_core::paths;
use serde_json::json;
use std::path::Path;

use super::open_services;
use crate::output::{print_json, print_table};

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    if !paths::is_initialized(root) {
        return Err(anyhow!(
            "no .scrum/ directory in {} (run `scrum init`)",
            root.display()
        ));
    }
    let (config, services) = open_services(root)?;
    let progress = scrum_core::report::progress(&services)?.data;
    let warnings = config.validate();

    if json {
        return print_json(&json!({
            "project": config.project.name,
            "progress": progress,
            "warnings": warnings,
        }));
    }

    println!("Project: {}", config.project.name);
    println!(
        "Tasks:   {}/{} done ({}%)",
        progress.done_tasks, progress.total_tasks, progress.completion_percent
    );
    match &progress.active_sprint {
        Some(s) => println!(
            "Sprint:  {} ({}/{} done, {}%)",
            s.name, s.done, s.total, s.completion_percent
        ),
        None => println!("Sprint:  none active"),
    }

    if !progress.epics.is_empty() {
        println!();
        let rows = progress
            .epics
            .iter()
            .map(|e| {
                vec![
                    e.epic_num.to_string(),
                    e.title.clone(),
                    format!("{}/{}", e.done, e.total),
                    format!("{}%", e.completion_percent),
                ]
            })
            .collect();
        print_table(&["EPIC", "TITLE", "DONE", "PROGRESS"], rows);
    }

    for w in warnings {
        eprintln!("warning: {}", w.message);
    }
    Ok(())
}
