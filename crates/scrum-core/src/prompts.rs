//! Prompt templates rendered from live project state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;

use crate::envelope::Reply;
use crate::error::{Result, ScrumError};
use crate::report;
use crate::services::Services;
use crate::sprint::SprintQuery;
use crate::task::{Task, TaskQuery};
use crate::types::{SprintStatus, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct PromptInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetPrompt {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedPrompt {
    pub name: String,
    pub text: String,
}

pub fn catalog() -> Vec<PromptInfo> {
    vec![
        PromptInfo {
            name: "sprint-planning",
            description: "Plan the next sprint from the backlog",
            arguments: vec![PromptArgument {
                name: "capacity_hours",
                description: "Team capacity for the sprint",
                required: false,
            }],
        },
        PromptInfo {
            name: "daily-standup",
            description: "Summarise the active sprint for a standup",
            arguments: vec![PromptArgument {
                name: "assignee",
                description: "Only include this person's tasks",
                required: false,
            }],
        },
        PromptInfo {
            name: "retrospective",
            description: "Reflect on the most recently completed sprint",
            arguments: Vec::new(),
        },
    ]
}

pub fn list_prompts() -> Reply<Vec<PromptInfo>> {
    let prompts = catalog();
    let count = prompts.len();
    Reply::new(format!("{count} prompt(s) available"), prompts).with_meta("count", count)
}

pub fn get_prompt(svc: &Services, params: GetPrompt) -> Result<Reply<RenderedPrompt>> {
    let name = params.name.trim();
    if name.is_empty() {
        return Err(ScrumError::MissingField("name".into()));
    }
    let text = match name {
        "sprint-planning" => sprint_planning(svc, &params.arguments)?,
        "daily-standup" => daily_standup(svc, &params.arguments)?,
        "retrospective" => retrospective(svc)?,
        other => return Err(ScrumError::not_found("prompt", other)),
    };
    Ok(Reply::new(
        format!("Rendered prompt '{name}'"),
        RenderedPrompt {
            name: name.to_string(),
            text,
        },
    ))
}

fn task_line(out: &mut String, t: &Task) {
    let _ = write!(out, "- [{}] {} {} ({})", t.status, t.key(), t.title, t.priority);
    if let Some(who) = &t.assignee {
        let _ = write!(out, " @{who}");
    }
    if let Some(h) = t.estimated_hours {
        let _ = write!(out, " ~{h}h");
    }
    out.push('\n');
}

fn sprint_planning(svc: &Services, args: &Map<String, Value>) -> Result<String> {
    let mut backlog: Vec<Task> = svc
        .tasks()
        .list(TaskQuery::default())?
        .data
        .into_iter()
        .filter(|t| t.sprint_id.is_none() && t.status != TaskStatus::Done)
        .collect();
    backlog.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut out = String::from("You are planning the next sprint.\n\n");
    if let Some(cap) = args.get("capacity_hours").and_then(Value::as_f64) {
        let _ = writeln!(out, "Team capacity: {cap} hours.\n");
    }
    let _ = writeln!(out, "Backlog ({} open task(s), highest priority first):", backlog.len());
    for t in &backlog {
        task_line(&mut out, t);
    }
    out.push_str(
        "\nPropose a sprint name, a one-sentence goal, and the task keys to include. \
         Keep the estimate within capacity.\n",
    );
    Ok(out)
}

fn daily_standup(svc: &Services, args: &Map<String, Value>) -> Result<String> {
    let sprint_tasks = svc.tasks().current_sprint_tasks()?;
    let Some(sprint) = svc.sprints().current()?.data else {
        return Ok("There is no active sprint. Ask the team what they are working on.\n".into());
    };
    let who = args.get("assignee").and_then(Value::as_str);
    let tasks: Vec<&Task> = sprint_tasks
        .data
        .iter()
        .filter(|t| who.is_none() || t.assignee.as_deref() == who)
        .collect();

    let mut out = format!("Daily standup for sprint '{}'", sprint.name);
    if let Some(goal) = &sprint.goal {
        let _ = write!(out, " (goal: {goal})");
    }
    out.push_str(".\n");
    for (label, status) in [
        ("In progress", TaskStatus::InProgress),
        ("In review", TaskStatus::InReview),
        ("Blocked", TaskStatus::Blocked),
        ("Done", TaskStatus::Done),
    ] {
        let group: Vec<&&Task> = tasks.iter().filter(|t| t.status == status).collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{label}:");
        for t in group {
            task_line(&mut out, t);
        }
    }
    out.push_str("\nSummarise progress, call out blockers, and suggest today's focus.\n");
    Ok(out)
}

fn retrospective(svc: &Services) -> Result<String> {
    let completed = svc
        .sprints()
        .list(SprintQuery {
            status: Some(SprintStatus::Completed),
        })?
        .data;
    let Some(sprint) = completed.into_iter().max_by_key(|s| s.end_date) else {
        return Ok("No sprint has been completed yet.\n".into());
    };
    let analytics = report::analytics(svc)?.data;

    let mut out = format!("Retrospective for sprint '{}'.\n\n", sprint.name);
    if let Some(c) = &sprint.completion {
        let _ = writeln!(out, "Completion rate: {}%", c.completion_rate);
        let _ = writeln!(out, "Velocity: {} hours", c.velocity);
        if let Some(g) = &c.goal_achievement {
            let _ = writeln!(out, "Goal achievement: {g}");
        }
        if let Some(l) = &c.lessons_learned {
            let _ = writeln!(out, "Lessons recorded: {l}");
        }
    }
    let _ = writeln!(out, "Average velocity so far: {:.1} hours", analytics.average_velocity);
    out.push_str("\nWhat went well, what did not, and what will we change next sprint?\n");
    Ok(out)
}
