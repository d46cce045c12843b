//! Named, cacheable read-only views addressed by `scrum://` URIs.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::envelope::Reply;
use crate::error::{Result, ScrumError};
use crate::report;
use crate::services::{hold, Services};
use crate::task::TaskQuery;

pub const PROGRESS_URI: &str = "scrum://project/progress";
pub const ANALYTICS_URI: &str = "scrum://project/analytics";
pub const CURRENT_SPRINT_URI: &str = "scrum://sprints/current";
pub const BACKLOG_URI: &str = "scrum://backlog";
pub const EPIC_URI_PREFIX: &str = "scrum://epics/";

#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub uri: String,
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
}

fn info(uri: &str, name: &'static str, description: &'static str) -> ResourceInfo {
    ResourceInfo {
        uri: uri.to_string(),
        name,
        description,
        mime_type: "application/json",
    }
}

// ---------------------------------------------------------------------------
// ViewCache
// ---------------------------------------------------------------------------

struct CachedView {
    generation: u64,
    built: Instant,
    value: Value,
}

/// Per-URI cache. An entry is served only while it is younger than the TTL
/// and no mutation has happened since it was built.
pub(crate) struct ViewCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedView>>,
}

impl ViewCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, uri: &str, generation: u64) -> Option<Value> {
        let entries = hold(&self.entries);
        entries
            .get(uri)
            .filter(|v| v.generation == generation && v.built.elapsed() < self.ttl)
            .map(|v| v.value.clone())
    }

    fn put(&self, uri: &str, generation: u64, value: Value) {
        let mut entries = hold(&self.entries);
        entries.insert(
            uri.to_string(),
            CachedView {
                generation,
                built: Instant::now(),
                value,
            },
        );
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub fn list_resources(svc: &Services) -> Result<Reply<Vec<ResourceInfo>>> {
    let mut out = vec![
        info(PROGRESS_URI, "Project progress", "Overall and per-epic completion"),
        info(ANALYTICS_URI, "Project analytics", "Status breakdowns and sprint velocity"),
        info(CURRENT_SPRINT_URI, "Current sprint", "The active sprint with its tasks"),
        info(BACKLOG_URI, "Backlog", "Tasks not assigned to any sprint"),
    ];
    for epic in svc.epics().list(Default::default())?.data {
        out.push(ResourceInfo {
            uri: format!("{EPIC_URI_PREFIX}{}", epic.epic_num),
            name: "Epic",
            description: "One epic with its stories",
            mime_type: "application/json",
        });
    }
    let count = out.len();
    Ok(Reply::new(format!("{count} resource(s) available"), out).with_meta("count", count))
}

pub fn read_resource(svc: &Services, uri: &str) -> Result<Reply<Value>> {
    let uri = uri.trim();
    let generation = svc.generation();
    let views = &svc.ctx().views;
    if let Some(value) = views.get(uri, generation) {
        tracing::debug!(uri, "resource served from cache");
        return Ok(Reply::new(format!("Resource {uri}"), value)
            .with_meta("uri", uri)
            .with_meta("cached", true));
    }

    let value = build(svc, uri)?;
    views.put(uri, generation, value.clone());
    Ok(Reply::new(format!("Resource {uri}"), value)
        .with_meta("uri", uri)
        .with_meta("cached", false))
}

fn to_value<T: Serialize>(v: &T) -> Result<Value> {
    serde_json::to_value(v).map_err(|e| ScrumError::Storage(format!("render view: {e}")))
}

fn build(svc: &Services, uri: &str) -> Result<Value> {
    match uri {
        PROGRESS_URI => to_value(&report::progress(svc)?.data),
        ANALYTICS_URI => to_value(&report::analytics(svc)?.data),
        CURRENT_SPRINT_URI => match svc.sprints().current()?.data {
            Some(sprint) => {
                let tasks = svc.tasks().current_sprint_tasks()?.data;
                let progress = report::sprint_progress(&sprint, &tasks);
                Ok(json!({
                    "sprint": to_value(&sprint)?,
                    "tasks": to_value(&tasks)?,
                    "progress": to_value(&progress)?,
                }))
            }
            None => Ok(json!({ "sprint": null, "tasks": [], "progress": null })),
        },
        BACKLOG_URI => {
            let backlog: Vec<_> = svc
                .tasks()
                .list(TaskQuery::default())?
                .data
                .into_iter()
                .filter(|t| t.sprint_id.is_none())
                .collect();
            Ok(json!({ "count": backlog.len(), "tasks": to_value(&backlog)? }))
        }
        _ => {
            let Some(num) = uri.strip_prefix(EPIC_URI_PREFIX) else {
                return Err(ScrumError::not_found("resource", uri));
            };
            let epic_num: i64 = num
                .parse()
                .map_err(|_| ScrumError::invalid("uri", format!("'{num}' is not an epic number")))?;
            let epic = svc.epics().get(epic_num)?.data;
            let stories = svc
                .tasks()
                .list(TaskQuery {
                    epic_num: Some(epic_num),
                    ..Default::default()
                })?
                .data;
            let done = stories
                .iter()
                .filter(|t| t.status == crate::types::TaskStatus::Done)
                .count();
            Ok(json!({
                "epic": to_value(&epic)?,
                "stories": to_value(&stories)?,
                "done": done,
                "total": stories.len(),
            }))
        }
    }
}
