//! Read-only aggregates assembled from service results.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::document::DocumentQuery;
use crate::envelope::Reply;
use crate::epic::EpicQuery;
use crate::error::Result;
use crate::services::Services;
use crate::sprint::{sprint_stats, Sprint, SprintQuery};
use crate::task::{Task, TaskQuery};
use crate::types::{SprintStatus, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub total_tasks: usize,
    pub done_tasks: usize,
    pub completion_percent: f64,
    pub by_status: BTreeMap<String, usize>,
    pub epics: Vec<EpicProgress>,
    pub active_sprint: Option<SprintProgress>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpicProgress {
    pub epic_num: i64,
    pub title: String,
    pub status: TaskStatus,
    pub total: usize,
    pub done: usize,
    pub completion_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SprintProgress {
    pub id: i64,
    pub name: String,
    pub total: usize,
    pub done: usize,
    pub completion_percent: f64,
    pub estimated_hours: f64,
    pub days_remaining: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    pub tasks_by_status: BTreeMap<String, usize>,
    pub tasks_by_priority: BTreeMap<String, usize>,
    pub tasks_by_assignee: BTreeMap<String, usize>,
    pub sprints_by_status: BTreeMap<String, usize>,
    pub documents_by_type: BTreeMap<String, usize>,
    pub documents_by_status: BTreeMap<String, usize>,
    pub estimated_hours: f64,
    pub actual_hours: f64,
    pub average_velocity: f64,
    pub sprint_history: Vec<SprintHistory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SprintHistory {
    pub id: i64,
    pub name: String,
    pub completion_rate: f64,
    pub velocity: f64,
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64 * 1000.0).round() / 10.0
}

fn count_done(tasks: &[&Task]) -> usize {
    tasks.iter().filter(|t| t.status == TaskStatus::Done).count()
}

pub fn sprint_progress(sprint: &Sprint, tasks: &[Task]) -> SprintProgress {
    let refs: Vec<&Task> = tasks.iter().collect();
    let done = count_done(&refs);
    let today = Utc::now().date_naive();
    SprintProgress {
        id: sprint.id,
        name: sprint.name.clone(),
        total: tasks.len(),
        done,
        completion_percent: percent(done, tasks.len()),
        estimated_hours: tasks.iter().filter_map(|t| t.estimated_hours).sum(),
        days_remaining: sprint.end_date.map(|end| (end - today).num_days()),
    }
}

/// Overall and per-epic completion plus the active sprint's progress.
pub fn progress(svc: &Services) -> Result<Reply<Progress>> {
    let tasks = svc.tasks().list(TaskQuery::default())?.data;
    let epics = svc.epics().list(EpicQuery::default())?.data;

    let mut by_status: BTreeMap<String, usize> = TaskStatus::all()
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for t in &tasks {
        *by_status.entry(t.status.as_str().to_string()).or_default() += 1;
    }

    let epics = epics
        .into_iter()
        .map(|epic| {
            let stories: Vec<&Task> = tasks.iter().filter(|t| t.epic_num == epic.epic_num).collect();
            let done = count_done(&stories);
            EpicProgress {
                epic_num: epic.epic_num,
                title: epic.title,
                status: epic.status,
                total: stories.len(),
                done,
                completion_percent: percent(done, stories.len()),
            }
        })
        .collect();

    let active_sprint = match svc.sprints().current()?.data {
        Some(sprint) => {
            let sprint_tasks: Vec<Task> = tasks
                .iter()
                .filter(|t| t.sprint_id == Some(sprint.id))
                .cloned()
                .collect();
            Some(sprint_progress(&sprint, &sprint_tasks))
        }
        None => None,
    };

    let all: Vec<&Task> = tasks.iter().collect();
    let done = count_done(&all);
    let progress = Progress {
        total_tasks: tasks.len(),
        done_tasks: done,
        completion_percent: percent(done, tasks.len()),
        by_status,
        epics,
        active_sprint,
    };
    Ok(Reply::new(
        format!(
            "{} of {} task(s) done ({}%)",
            progress.done_tasks, progress.total_tasks, progress.completion_percent
        ),
        progress,
    ))
}

/// Status, priority and ownership breakdowns plus sprint velocity history.
pub fn analytics(svc: &Services) -> Result<Reply<Analytics>> {
    let tasks = svc.tasks().list(TaskQuery::default())?.data;
    let sprints = svc.sprints().list(SprintQuery::default())?.data;
    let documents = svc.documents().list(DocumentQuery::default())?.data;

    let mut tasks_by_status = BTreeMap::new();
    let mut tasks_by_priority = BTreeMap::new();
    let mut tasks_by_assignee = BTreeMap::new();
    for t in &tasks {
        *tasks_by_status.entry(t.status.to_string()).or_insert(0) += 1;
        *tasks_by_priority.entry(t.priority.to_string()).or_insert(0) += 1;
        let who = t.assignee.clone().unwrap_or_else(|| "unassigned".to_string());
        *tasks_by_assignee.entry(who).or_insert(0) += 1;
    }

    let mut sprints_by_status = BTreeMap::new();
    let mut sprint_history = Vec::new();
    for s in &sprints {
        *sprints_by_status.entry(s.status.to_string()).or_insert(0) += 1;
        if s.status != SprintStatus::Completed {
            continue;
        }
        let (completion_rate, velocity) = match &s.completion {
            Some(c) => (c.completion_rate, c.velocity),
            None => {
                let own: Vec<Task> = tasks
                    .iter()
                    .filter(|t| t.sprint_id == Some(s.id))
                    .cloned()
                    .collect();
                sprint_stats(&own)
            }
        };
        sprint_history.push(SprintHistory {
            id: s.id,
            name: s.name.clone(),
            completion_rate,
            velocity,
        });
    }
    let average_velocity = if sprint_history.is_empty() {
        0.0
    } else {
        sprint_history.iter().map(|h| h.velocity).sum::<f64>() / sprint_history.len() as f64
    };

    let mut documents_by_type = BTreeMap::new();
    let mut documents_by_status = BTreeMap::new();
    for d in &documents {
        *documents_by_type.entry(d.doc_type.clone()).or_insert(0) += 1;
        *documents_by_status.entry(d.status.to_string()).or_insert(0) += 1;
    }

    let analytics = Analytics {
        tasks_by_status,
        tasks_by_priority,
        tasks_by_assignee,
        sprints_by_status,
        documents_by_type,
        documents_by_status,
        estimated_hours: tasks.iter().filter_map(|t| t.estimated_hours).sum(),
        actual_hours: tasks.iter().filter_map(|t| t.actual_hours).sum(),
        average_velocity,
        sprint_history,
    };
    Ok(Reply::new(
        format!(
            "Analytics over {} task(s), {} sprint(s), {} document(s)",
            tasks.len(),
            sprints.len(),
            documents.len()
        ),
        analytics,
    ))
}
