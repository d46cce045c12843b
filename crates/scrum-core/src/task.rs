//! Stories (tasks) and their per-epic numbering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::envelope::Reply;
use crate::epic::EpicService;
use crate::error::{Result, ScrumError};
use crate::services::{hold, Context};
use crate::sprint::SprintService;
use crate::store::{decode, encode, Filter, Kind, Sequenced};
use crate::types::{EntityType, Priority, TaskStatus};
use crate::validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: i64,
    pub epic_num: i64,
    pub story_num: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub sprint_id: Option<i64>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub actual_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Human key such as `3.2` (epic 3, story 2).
    pub fn key(&self) -> String {
        format!("{}.{}", self.epic_num, self.story_num)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTask {
    pub epic_num: i64,
    /// Omit to take the next number in the epic.
    #[serde(default)]
    pub story_num: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub sprint_id: Option<i64>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub actual_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskQuery {
    #[serde(default)]
    pub epic_num: Option<i64>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub sprint_id: Option<i64>,
    #[serde(default)]
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskChanges {
    #[serde(default)]
    pub epic_num: Option<i64>,
    #[serde(default)]
    pub story_num: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// `null` unassigns.
    #[serde(default, deserialize_with = "crate::types::nullable")]
    pub assignee: Option<Option<String>>,
    /// `null` moves the task back to the backlog.
    #[serde(default, deserialize_with = "crate::types::nullable")]
    pub sprint_id: Option<Option<i64>>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub actual_hours: Option<f64>,
}

fn assignee(raw: Option<&str>) -> Result<Option<String>> {
    Ok(validate::text("assignee", raw)?.map(|a| a.replace(['\n', '\r', '\t'], " ")))
}

pub struct TaskService<'a> {
    ctx: &'a Context,
}

impl<'a> TaskService<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub(crate) fn find(&self, id: i64) -> Result<Option<Task>> {
        self.ctx
            .store
            .get(Kind::Task, id)?
            .map(|r| decode(Kind::Task, r))
            .transpose()
    }

    fn load(&self, id: i64) -> Result<Task> {
        self.find(id)?.ok_or_else(|| ScrumError::not_found("task", id))
    }

    /// Create a story, numbering it within its epic and creating the epic if
    /// it does not exist yet.
    pub fn create(&self, params: CreateTask) -> Result<Reply<Task>> {
        let epic_num = validate::positive("epic_num", params.epic_num)?;
        let story_num = params
            .story_num
            .map(|n| validate::positive("story_num", n))
            .transpose()?;
        let title = validate::title("title", &params.title)?;
        let description = validate::text("description", params.description.as_deref())?;
        let assignee = assignee(params.assignee.as_deref())?;
        let estimated_hours = validate::effort("estimated_hours", params.estimated_hours)?;
        let actual_hours = validate::effort("actual_hours", params.actual_hours)?;

        let epic_lock = self.ctx.locks.epic(epic_num);
        let _epic = hold(&epic_lock);
        let _sprints = params.sprint_id.map(|_| hold(&self.ctx.locks.sprints));
        if let Some(sprint_id) = params.sprint_id {
            SprintService::new(self.ctx).assignable(sprint_id)?;
        }

        let epics = EpicService::new(self.ctx);
        let (epic, epic_created) = epics.ensure(epic_num)?;

        let now = Utc::now();
        let mut task = Task {
            id: 0,
            epic_num,
            story_num: 0,
            title,
            description,
            status: params.status.unwrap_or_default(),
            priority: params.priority.unwrap_or_default(),
            assignee,
            sprint_id: params.sprint_id,
            estimated_hours,
            actual_hours,
            created_at: now,
            updated_at: now,
        };
        let inserted = encode(&task).and_then(|record| {
            self.ctx.store.insert_sequenced(
                Kind::Task,
                &Filter::all().eq("epic_num", epic_num),
                "story_num",
                story_num,
                &record,
            )
        });
        let refused = match inserted {
            Ok(Sequenced::Inserted { id, seq }) => {
                task.id = id;
                task.story_num = seq;
                None
            }
            Ok(Sequenced::Stale { taken: true, .. }) => Some(ScrumError::AlreadyExists {
                entity: "story",
                key: format!("{epic_num}.{}", story_num.unwrap_or_default()),
            }),
            Ok(Sequenced::Stale { max, taken: false }) => Some(ScrumError::invalid(
                "story_num",
                format!("must be greater than {max}, the highest story number in epic {epic_num}"),
            )),
            Err(e) => Some(e),
        };
        if let Some(e) = refused {
            if epic_created {
                epics.discard_placeholder(&epic);
            }
            return Err(e);
        }
        self.ctx.touch();
        tracing::info!(task_id = task.id, story = %task.key(), epic_created, "task created");

        Ok(Reply::new(format!("Created story {}: {}", task.key(), task.title), task)
            .with_meta("epic_created", epic_created))
    }

    pub fn get(&self, id: i64) -> Result<Reply<Task>> {
        let task = self.load(id)?;
        Ok(Reply::new(format!("Story {}: {}", task.key(), task.title), task))
    }

    pub fn list(&self, query: TaskQuery) -> Result<Reply<Vec<Task>>> {
        let filter = Filter::all()
            .eq_opt("epic_num", query.epic_num)
            .eq_opt("status", query.status.map(|s| s.as_str()))
            .eq_opt("sprint_id", query.sprint_id)
            .eq_opt("assignee", query.assignee);
        let mut tasks: Vec<Task> = self
            .ctx
            .store
            .query(Kind::Task, &filter)?
            .into_iter()
            .map(|r| decode(Kind::Task, r))
            .collect::<Result<_>>()?;
        tasks.sort_by_key(|t| (t.epic_num, t.story_num));
        let count = tasks.len();
        Ok(Reply::new(format!("Found {count} task(s)"), tasks).with_meta("count", count))
    }

    pub fn update(&self, id: i64, changes: TaskChanges) -> Result<Reply<Task>> {
        let title = changes
            .title
            .as_deref()
            .map(|t| validate::title("title", t))
            .transpose()?;
        let description = validate::edit("description", changes.description.as_deref())?;
        let estimated_hours = validate::effort("estimated_hours", changes.estimated_hours)?;
        let actual_hours = validate::effort("actual_hours", changes.actual_hours)?;

        let _sprints = matches!(changes.sprint_id, Some(Some(_))).then(|| hold(&self.ctx.locks.sprints));
        let mut task = self.load(id)?;

        if changes.epic_num.is_some_and(|n| n != task.epic_num) {
            return Err(ScrumError::invalid("epic_num", "a story cannot move between epics"));
        }
        if changes.story_num.is_some_and(|n| n != task.story_num) {
            return Err(ScrumError::invalid("story_num", "story numbers cannot be changed"));
        }

        let now = Utc::now();
        let mut patch = json!({ "updated_at": now });
        if let Some(title) = title {
            patch["title"] = json!(title);
            task.title = title;
        }
        if let Some(desc) = description {
            patch["description"] = json!(desc);
            task.description = desc;
        }
        if let Some(status) = changes.status {
            patch["status"] = json!(status);
            task.status = status;
        }
        if let Some(priority) = changes.priority {
            patch["priority"] = json!(priority);
            task.priority = priority;
        }
        if let Some(who) = changes.assignee {
            task.assignee = assignee(who.as_deref())?;
            patch["assignee"] = json!(task.assignee);
        }
        if let Some(sprint_id) = changes.sprint_id {
            if let Some(sid) = sprint_id {
                SprintService::new(self.ctx).assignable(sid)?;
            }
            patch["sprint_id"] = json!(sprint_id);
            task.sprint_id = sprint_id;
        }
        if let Some(hours) = estimated_hours {
            patch["estimated_hours"] = json!(hours);
            task.estimated_hours = Some(hours);
        }
        if let Some(hours) = actual_hours {
            patch["actual_hours"] = json!(hours);
            task.actual_hours = Some(hours);
        }
        task.updated_at = now;

        if self.ctx.store.update(Kind::Task, id, &patch)? == 0 {
            return Err(ScrumError::not_found("task", id));
        }
        self.ctx.touch();
        tracing::debug!(task_id = id, "task updated");
        Ok(Reply::new(format!("Updated story {}", task.key()), task))
    }

    pub fn update_status(&self, id: i64, status: TaskStatus) -> Result<Reply<Task>> {
        let previous = self.load(id)?.status;
        let reply = self.update(
            id,
            TaskChanges {
                status: Some(status),
                ..Default::default()
            },
        )?;
        tracing::info!(task_id = id, from = %previous, to = %status, "task status changed");
        Ok(Reply::new(
            format!("Story {} moved from {previous} to {status}", reply.data.key()),
            reply.data,
        )
        .with_meta("previous_status", previous.as_str()))
    }

    /// Delete a task together with its document links.
    pub fn delete(&self, id: i64) -> Result<Reply<Task>> {
        let task = self.load(id)?;
        let _links = hold(&self.ctx.locks.links);
        if self.ctx.store.delete(Kind::Task, id)? == 0 {
            return Err(ScrumError::not_found("task", id));
        }
        let links = self.ctx.store.query(
            Kind::Link,
            &Filter::all()
                .eq("entity_type", EntityType::Task.as_str())
                .eq("entity_id", id),
        )?;
        let mut removed = 0;
        for link in &links {
            if let Some(link_id) = link["id"].as_i64() {
                removed += self.ctx.store.delete(Kind::Link, link_id)?;
            }
        }
        self.ctx.touch();
        tracing::info!(task_id = id, links_removed = removed, "task deleted");
        Ok(
            Reply::new(format!("Deleted story {}: {}", task.key(), task.title), task)
                .with_meta("links_removed", removed),
        )
    }

    /// Tasks in the active sprint. Empty, not an error, when no sprint is
    /// active.
    pub fn current_sprint_tasks(&self) -> Result<Reply<Vec<Task>>> {
        let sprints = SprintService::new(self.ctx);
        let Some(sprint) = sprints.active()? else {
            return Ok(Reply::new("No active sprint", Vec::new())
                .with_meta("sprint_id", serde_json::Value::Null));
        };
        let mut tasks = sprints.tasks_of(sprint.id)?;
        tasks.sort_by_key(|t| (t.epic_num, t.story_num));
        let count = tasks.len();
        Ok(
            Reply::new(format!("{count} task(s) in sprint '{}'", sprint.name), tasks)
                .with_meta("sprint_id", sprint.id)
                .with_meta("count", count),
        )
    }
}
