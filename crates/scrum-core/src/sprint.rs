//! Sprints: creation, the single-active-sprint rule and the status lifecycle.
//!
//! Writes that make a sprint ACTIVE are guarded in the store by "no other
//! ACTIVE sprint", so the rule holds across processes sharing a database.
//! `Locks::sprints` additionally orders status changes within this process.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::envelope::Reply;
use crate::error::{Result, ScrumError};
use crate::services::{hold, Context};
use crate::store::{decode, encode, Filter, Guarded, Kind};
use crate::task::Task;
use crate::types::{SprintStatus, TaskStatus};
use crate::validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprint {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub status: SprintStatus,
    #[serde(default)]
    pub completion: Option<SprintCompletion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Retrospective data stored on a sprint when it is completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprintCompletion {
    #[serde(default)]
    pub goal_achievement: Option<String>,
    pub completion_rate: f64,
    pub velocity: f64,
    #[serde(default)]
    pub lessons_learned: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSprint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// `PLANNING` to create without activating. Defaults to `ACTIVE`.
    #[serde(default)]
    pub status: Option<SprintStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SprintChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<SprintStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteSprint {
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub goal_achievement: Option<String>,
    #[serde(default)]
    pub completion_rate: Option<f64>,
    #[serde(default)]
    pub velocity: Option<f64>,
    #[serde(default)]
    pub lessons_learned: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SprintQuery {
    #[serde(default)]
    pub status: Option<SprintStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignTasks {
    #[serde(default)]
    pub task_ids: Vec<i64>,
}

/// Completion rate and velocity derived from a sprint's tasks.
pub fn sprint_stats(tasks: &[Task]) -> (f64, f64) {
    if tasks.is_empty() {
        return (0.0, 0.0);
    }
    let done: Vec<&Task> = tasks.iter().filter(|t| t.status == TaskStatus::Done).collect();
    let rate = done.len() as f64 / tasks.len() as f64 * 100.0;
    let velocity = done.iter().filter_map(|t| t.estimated_hours).sum();
    ((rate * 10.0).round() / 10.0, velocity)
}

fn active_filter() -> Filter {
    Filter::all().eq("status", SprintStatus::Active.as_str())
}

/// The conflict reported when `row`, an ACTIVE sprint, blocked a write.
fn already_active(row: Value) -> ScrumError {
    match decode::<Sprint>(Kind::Sprint, row) {
        Ok(active) => ScrumError::SprintAlreadyActive {
            id: active.id,
            name: active.name,
        },
        Err(e) => e,
    }
}

fn check_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(ScrumError::invalid("end_date", "must not be before start_date"));
        }
    }
    Ok(())
}

pub struct SprintService<'a> {
    ctx: &'a Context,
}

impl<'a> SprintService<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub(crate) fn find(&self, id: i64) -> Result<Option<Sprint>> {
        self.ctx
            .store
            .get(Kind::Sprint, id)?
            .map(|r| decode(Kind::Sprint, r))
            .transpose()
    }

    fn load(&self, id: i64) -> Result<Sprint> {
        self.find(id)?
            .ok_or_else(|| ScrumError::not_found("sprint", id))
    }

    pub(crate) fn active(&self) -> Result<Option<Sprint>> {
        let rows = self.ctx.store.query(Kind::Sprint, &active_filter())?;
        rows.into_iter()
            .next()
            .map(|r| decode(Kind::Sprint, r))
            .transpose()
    }

    /// The sprint a task may be placed in: it must exist and still be open.
    pub(crate) fn assignable(&self, id: i64) -> Result<Sprint> {
        let sprint = self.load(id)?;
        if sprint.status.is_terminal() {
            return Err(ScrumError::Conflict {
                reason: "sprint_closed",
                message: format!("sprint '{}' is {} and cannot take tasks", sprint.name, sprint.status),
            });
        }
        Ok(sprint)
    }

    pub(crate) fn tasks_of(&self, id: i64) -> Result<Vec<Task>> {
        self.ctx
            .store
            .query(Kind::Task, &Filter::all().eq("sprint_id", id))?
            .into_iter()
            .map(|r| decode(Kind::Task, r))
            .collect()
    }

    pub fn create(&self, params: CreateSprint) -> Result<Reply<Sprint>> {
        let name = validate::title("name", &params.name)?;
        let goal = validate::text("goal", params.goal.as_deref())?;
        check_dates(params.start_date, params.end_date)?;
        let status = params.status.unwrap_or(SprintStatus::Active);
        if !matches!(status, SprintStatus::Active | SprintStatus::Planning) {
            return Err(ScrumError::invalid(
                "status",
                "new sprints must be ACTIVE or PLANNING",
            ));
        }

        let _held = hold(&self.ctx.locks.sprints);
        let now = Utc::now();
        let mut sprint = Sprint {
            id: 0,
            name,
            goal,
            start_date: params
                .start_date
                .or_else(|| (status == SprintStatus::Active).then(|| now.date_naive())),
            end_date: params.end_date,
            status,
            completion: None,
            created_at: now,
            updated_at: now,
        };
        let record = encode(&sprint)?;
        sprint.id = if status == SprintStatus::Active {
            match self
                .ctx
                .store
                .insert_unless(Kind::Sprint, &active_filter(), &record)?
            {
                Guarded::Written(id) => id,
                Guarded::Blocked(row) => return Err(already_active(row)),
            }
        } else {
            self.ctx.store.insert(Kind::Sprint, &record)?
        };
        self.ctx.touch();
        tracing::info!(sprint_id = sprint.id, status = %sprint.status, "sprint created");

        Ok(Reply::new(
            format!("Created sprint '{}' ({})", sprint.name, sprint.status),
            sprint,
        ))
    }

    pub fn get(&self, id: i64) -> Result<Reply<Sprint>> {
        let sprint = self.load(id)?;
        let task_count = self.tasks_of(id)?.len();
        Ok(Reply::new(format!("Sprint '{}'", sprint.name), sprint)
            .with_meta("task_count", task_count))
    }

    pub fn list(&self, query: SprintQuery) -> Result<Reply<Vec<Sprint>>> {
        let filter = Filter::all().eq_opt("status", query.status.map(|s| s.as_str()));
        let sprints: Vec<Sprint> = self
            .ctx
            .store
            .query(Kind::Sprint, &filter)?
            .into_iter()
            .map(|r| decode(Kind::Sprint, r))
            .collect::<Result<_>>()?;
        let count = sprints.len();
        Ok(Reply::new(format!("Found {count} sprint(s)"), sprints).with_meta("count", count))
    }

    /// The active sprint, if any. Absence is not an error.
    pub fn current(&self) -> Result<Reply<Option<Sprint>>> {
        Ok(match self.active()? {
            Some(sprint) => {
                let task_count = self.tasks_of(sprint.id)?.len();
                Reply::new(format!("Active sprint '{}'", sprint.name), Some(sprint))
                    .with_meta("task_count", task_count)
            }
            None => Reply::new("No active sprint", None),
        })
    }

    pub fn update(&self, id: i64, changes: SprintChanges) -> Result<Reply<Sprint>> {
        let name = changes
            .name
            .as_deref()
            .map(|n| validate::title("name", n))
            .transpose()?;
        let goal = validate::edit("goal", changes.goal.as_deref())?;

        let _held = hold(&self.ctx.locks.sprints);
        let mut sprint = self.load(id)?;
        let now = Utc::now();
        let mut patch = json!({ "updated_at": now });

        if let Some(name) = name {
            patch["name"] = json!(name);
            sprint.name = name;
        }
        if let Some(goal) = goal {
            patch["goal"] = json!(goal);
            sprint.goal = goal;
        }
        if let Some(start) = changes.start_date {
            sprint.start_date = Some(start);
            patch["start_date"] = json!(start);
        }
        if let Some(end) = changes.end_date {
            sprint.end_date = Some(end);
            patch["end_date"] = json!(end);
        }
        check_dates(sprint.start_date, sprint.end_date)?;

        let activating = changes.status == Some(SprintStatus::Active)
            && sprint.status != SprintStatus::Active;
        if let Some(to) = changes.status {
            if to != sprint.status {
                self.transition(&mut sprint, to, CompleteSprint::default(), now)?;
                patch["status"] = json!(sprint.status);
                patch["start_date"] = json!(sprint.start_date);
                patch["end_date"] = json!(sprint.end_date);
                patch["completion"] = json!(sprint.completion);
            }
        }
        sprint.updated_at = now;

        let changed = if activating {
            match self
                .ctx
                .store
                .update_unless(Kind::Sprint, id, &active_filter(), &patch)?
            {
                Guarded::Written(n) => n as usize,
                Guarded::Blocked(row) => return Err(already_active(row)),
            }
        } else {
            self.ctx.store.update(Kind::Sprint, id, &patch)?
        };
        if changed == 0 {
            return Err(ScrumError::not_found("sprint", id));
        }
        self.ctx.touch();
        Ok(Reply::new(
            format!("Updated sprint '{}' ({})", sprint.name, sprint.status),
            sprint,
        ))
    }

    pub fn activate(&self, id: i64) -> Result<Reply<Sprint>> {
        self.update(
            id,
            SprintChanges {
                status: Some(SprintStatus::Active),
                ..Default::default()
            },
        )
    }

    pub fn complete(&self, id: i64, params: CompleteSprint) -> Result<Reply<Sprint>> {
        let _held = hold(&self.ctx.locks.sprints);
        let mut sprint = self.load(id)?;
        if sprint.status != SprintStatus::Active {
            return Err(ScrumError::InvalidTransition {
                entity: "sprint",
                from: sprint.status.to_string(),
                to: SprintStatus::Completed.to_string(),
            });
        }
        let now = Utc::now();
        self.transition(&mut sprint, SprintStatus::Completed, params, now)?;
        sprint.updated_at = now;
        let patch = json!({
            "status": sprint.status,
            "end_date": sprint.end_date,
            "completion": sprint.completion,
            "updated_at": now,
        });
        self.ctx.store.update(Kind::Sprint, id, &patch)?;
        self.ctx.touch();

        let rate = sprint.completion.as_ref().map(|c| c.completion_rate).unwrap_or(0.0);
        Ok(Reply::new(format!("Completed sprint '{}'", sprint.name), sprint)
            .with_meta("completion_rate", rate))
    }

    /// Apply a status change in memory. Caller holds the sprint lock and
    /// persists the result, guarding the write when the target is ACTIVE.
    fn transition(
        &self,
        sprint: &mut Sprint,
        to: SprintStatus,
        completion: CompleteSprint,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let from = sprint.status;
        if !from.can_transition_to(to) {
            return Err(ScrumError::InvalidTransition {
                entity: "sprint",
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        match to {
            SprintStatus::Active => {
                sprint.start_date.get_or_insert(now.date_naive());
            }
            SprintStatus::Completed => {
                let end = completion
                    .end_date
                    .or(sprint.end_date)
                    .unwrap_or_else(|| now.date_naive());
                check_dates(sprint.start_date, Some(end))?;
                let (rate, velocity) = sprint_stats(&self.tasks_of(sprint.id)?);
                sprint.end_date = Some(end);
                sprint.completion = Some(SprintCompletion {
                    goal_achievement: validate::text(
                        "goal_achievement",
                        completion.goal_achievement.as_deref(),
                    )?,
                    completion_rate: completion.completion_rate.unwrap_or(rate),
                    velocity: completion.velocity.unwrap_or(velocity),
                    lessons_learned: validate::text(
                        "lessons_learned",
                        completion.lessons_learned.as_deref(),
                    )?,
                    completed_at: now,
                });
            }
            SprintStatus::Cancelled | SprintStatus::Planning => {}
        }
        sprint.status = to;
        tracing::info!(sprint_id = sprint.id, %from, %to, "sprint status changed");
        Ok(())
    }

    pub fn assign_tasks(&self, id: i64, params: AssignTasks) -> Result<Reply<Vec<Task>>> {
        if params.task_ids.is_empty() {
            return Err(ScrumError::MissingField("task_ids".into()));
        }
        let _held = hold(&self.ctx.locks.sprints);
        let sprint = self.assignable(id)?;

        let mut tasks = Vec::with_capacity(params.task_ids.len());
        for task_id in &params.task_ids {
            let row = self
                .ctx
                .store
                .get(Kind::Task, *task_id)?
                .ok_or_else(|| ScrumError::not_found("task", task_id))?;
            tasks.push(decode::<Task>(Kind::Task, row)?);
        }
        let now = Utc::now();
        for task in &mut tasks {
            self.ctx.store.update(
                Kind::Task,
                task.id,
                &json!({ "sprint_id": id, "updated_at": now }),
            )?;
            task.sprint_id = Some(id);
            task.updated_at = now;
        }
        self.ctx.touch();
        tracing::info!(sprint_id = id, count = tasks.len(), "tasks assigned to sprint");

        Ok(Reply::new(
            format!("Assigned {} task(s) to sprint '{}'", tasks.len(), sprint.name),
            tasks,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Services;
    use crate::store::SqliteStore;
    use crate::task::{CreateTask, TaskChanges};
    use std::sync::Arc;
    use std::thread;

    fn services() -> Services {
        Services::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn sprint(svc: &Services, name: &str) -> Result<Reply<Sprint>> {
        svc.sprints().create(CreateSprint {
            name: name.into(),
            ..Default::default()
        })
    }

    #[test]
    fn second_active_sprint_conflicts_naming_first() {
        let svc = services();
        let first = sprint(&svc, "Sprint 1").unwrap();
        assert_eq!(first.data.status, SprintStatus::Active);
        assert!(first.data.start_date.is_some());

        let err = sprint(&svc, "Sprint 2").unwrap_err();
        match &err {
            ScrumError::SprintAlreadyActive { name, .. } => assert_eq!(name, "Sprint 1"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("Sprint 1"));
        assert_eq!(svc.sprints().list(SprintQuery::default()).unwrap().data.len(), 1);
    }

    #[test]
    fn completion_stamps_end_date_and_blocks_reactivation() {
        let svc = services();
        let s = sprint(&svc, "Sprint 1").unwrap().data;
        let done = svc.sprints().complete(s.id, CompleteSprint::default()).unwrap();
        assert_eq!(done.data.status, SprintStatus::Completed);
        assert_eq!(done.data.end_date, Some(Utc::now().date_naive()));
        assert!(done.data.completion.is_some());

        let err = svc.sprints().activate(s.id).unwrap_err();
        assert!(matches!(err, ScrumError::InvalidTransition { .. }));
        let err = svc
            .sprints()
            .update(
                s.id,
                SprintChanges {
                    status: Some(SprintStatus::Active),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Conflict);
        assert_eq!(svc.sprints().get(s.id).unwrap().data.status, SprintStatus::Completed);
    }

    #[test]
    fn cancelled_sprint_cannot_be_completed_or_reopened() {
        let svc = services();
        let s = sprint(&svc, "Doomed").unwrap().data;
        svc.sprints()
            .update(
                s.id,
                SprintChanges {
                    status: Some(SprintStatus::Cancelled),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(svc.sprints().complete(s.id, CompleteSprint::default()).is_err());
        assert!(svc.sprints().activate(s.id).is_err());
        // A new sprint may now become active.
        sprint(&svc, "Next").unwrap();
    }

    #[test]
    fn planning_sprint_activates_only_when_none_active() {
        let svc = services();
        let planned = svc
            .sprints()
            .create(CreateSprint {
                name: "Later".into(),
                status: Some(SprintStatus::Planning),
                ..Default::default()
            })
            .unwrap()
            .data;
        assert_eq!(planned.status, SprintStatus::Planning);

        let active = sprint(&svc, "Now").unwrap().data;
        assert!(matches!(
            svc.sprints().activate(planned.id).unwrap_err(),
            ScrumError::SprintAlreadyActive { .. }
        ));
        svc.sprints().complete(active.id, CompleteSprint::default()).unwrap();
        let activated = svc.sprints().activate(planned.id).unwrap();
        assert_eq!(activated.data.status, SprintStatus::Active);
    }

    #[test]
    fn same_status_update_is_a_noop() {
        let svc = services();
        let s = sprint(&svc, "Steady").unwrap().data;
        let reply = svc.sprints().activate(s.id).unwrap();
        assert_eq!(reply.data.status, SprintStatus::Active);
    }

    #[test]
    fn completion_computes_rate_and_velocity_from_tasks() {
        let svc = services();
        let s = sprint(&svc, "Sprint 1").unwrap().data;
        for (title, hours) in [("a", 3.0), ("b", 5.0)] {
            svc.tasks()
                .create(CreateTask {
                    epic_num: 1,
                    title: title.into(),
                    sprint_id: Some(s.id),
                    estimated_hours: Some(hours),
                    ..Default::default()
                })
                .unwrap();
        }
        let first = svc.tasks().list(Default::default()).unwrap().data[0].id;
        svc.tasks()
            .update(
                first,
                TaskChanges {
                    status: Some(TaskStatus::Done),
                    ..Default::default()
                },
            )
            .unwrap();

        let done = svc
            .sprints()
            .complete(
                s.id,
                CompleteSprint {
                    lessons_learned: Some("smaller stories".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let completion = done.data.completion.unwrap();
        assert_eq!(completion.completion_rate, 50.0);
        assert_eq!(completion.velocity, 3.0);
        assert_eq!(completion.lessons_learned.as_deref(), Some("smaller stories"));
    }

    #[test]
    fn assign_tasks_rejects_closed_sprint() {
        let svc = services();
        let s = sprint(&svc, "Sprint 1").unwrap().data;
        let task = svc
            .tasks()
            .create(CreateTask {
                epic_num: 1,
                title: "t".into(),
                ..Default::default()
            })
            .unwrap()
            .data;
        let assigned = svc
            .sprints()
            .assign_tasks(s.id, AssignTasks { task_ids: vec![task.id] })
            .unwrap();
        assert_eq!(assigned.data[0].sprint_id, Some(s.id));

        svc.sprints().complete(s.id, CompleteSprint::default()).unwrap();
        let err = svc
            .sprints()
            .assign_tasks(s.id, AssignTasks { task_ids: vec![task.id] })
            .unwrap_err();
        assert!(matches!(err, ScrumError::Conflict { reason: "sprint_closed", .. }));
    }

    #[test]
    fn concurrent_creates_yield_exactly_one_active_sprint() {
        let svc = services();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let svc = svc.clone();
                thread::spawn(move || sprint(&svc, &format!("Sprint {i}")).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        let active = svc
            .sprints()
            .list(SprintQuery {
                status: Some(SprintStatus::Active),
            })
            .unwrap();
        assert_eq!(active.data.len(), 1);
    }

    #[test]
    fn separate_connections_never_see_two_active_sprints() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scrum.db");
        let open = || Services::new(Arc::new(SqliteStore::open(&path).unwrap()));
        let (left, right) = (open(), open());

        for round in 0..20 {
            let barrier = Arc::new(std::sync::Barrier::new(2));
            let racers: Vec<_> = [left.clone(), right.clone()]
                .into_iter()
                .enumerate()
                .map(|(side, svc)| {
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        sprint(&svc, &format!("Round {round} side {side}")).is_ok()
                    })
                })
                .collect();
            let wins = racers
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(wins, 1, "round {round}");

            let active = left.sprints().current().unwrap().data.unwrap();
            right
                .sprints()
                .complete(active.id, CompleteSprint::default())
                .unwrap();
        }
    }

    #[test]
    fn activation_is_refused_through_another_connection() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scrum.db");
        let left = Services::new(Arc::new(SqliteStore::open(&path).unwrap()));
        let right = Services::new(Arc::new(SqliteStore::open(&path).unwrap()));

        sprint(&left, "Sprint 1").unwrap();
        let planned = right
            .sprints()
            .create(CreateSprint {
                name: "Sprint 2".into(),
                status: Some(SprintStatus::Planning),
                ..Default::default()
            })
            .unwrap();
        match right.sprints().activate(planned.data.id).unwrap_err() {
            ScrumError::SprintAlreadyActive { name, .. } => assert_eq!(name, "Sprint 1"),
            other => panic!("unexpected error: {other}"),
        }
        let stored = left.sprints().get(planned.data.id).unwrap().data;
        assert_eq!(stored.status, SprintStatus::Planning);
    }
}
