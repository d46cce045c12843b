use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::envelope::Reply;
use crate::error::{Result, ScrumError};
use crate::services::{hold, Context};
use crate::store::{decode, encode, Filter, Guarded, Kind, Sequenced};
use crate::types::{Priority, TaskStatus};
use crate::validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    #[serde(default)]
    pub id: i64,
    pub epic_num: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Title given to an epic created implicitly by a story that references it.
pub fn placeholder_title(epic_num: i64) -> String {
    format!("Epic {epic_num}")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEpic {
    /// Omit to take the next free number.
    #[serde(default)]
    pub epic_num: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpicChanges {
    /// Present only so an attempted renumbering is rejected rather than
    /// silently ignored.
    #[serde(default)]
    pub epic_num: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpicQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

pub struct EpicService<'a> {
    ctx: &'a Context,
}

impl<'a> EpicService<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub(crate) fn find(&self, epic_num: i64) -> Result<Option<Epic>> {
        let rows = self
            .ctx
            .store
            .query(Kind::Epic, &Filter::all().eq("epic_num", epic_num))?;
        rows.into_iter()
            .next()
            .map(|r| decode(Kind::Epic, r))
            .transpose()
    }

    /// Insert an epic under its own number, refusing a number already in use
    /// by any connection to the store.
    fn insert(&self, epic: &mut Epic) -> Result<()> {
        let guard = Filter::all().eq("epic_num", epic.epic_num);
        match self.ctx.store.insert_unless(Kind::Epic, &guard, &encode(&*epic)?)? {
            Guarded::Written(id) => {
                epic.id = id;
                Ok(())
            }
            Guarded::Blocked(_) => Err(ScrumError::AlreadyExists {
                entity: "epic",
                key: epic.epic_num.to_string(),
            }),
        }
    }

    /// Insert an epic under the next free number.
    fn insert_next(&self, epic: &mut Epic) -> Result<()> {
        let record = encode(&*epic)?;
        match self
            .ctx
            .store
            .insert_sequenced(Kind::Epic, &Filter::all(), "epic_num", None, &record)?
        {
            Sequenced::Inserted { id, seq } => {
                epic.id = id;
                epic.epic_num = seq;
                Ok(())
            }
            Sequenced::Stale { max, .. } => Err(ScrumError::Storage(format!(
                "epic numbering refused an automatic number after {max}"
            ))),
        }
    }

    pub fn create(&self, params: CreateEpic) -> Result<Reply<Epic>> {
        let title = validate::title("title", &params.title)?;
        let description = validate::text("description", params.description.as_deref())?;
        let epic_num = params
            .epic_num
            .map(|n| validate::positive("epic_num", n))
            .transpose()?;

        let _registry = hold(&self.ctx.locks.epic_registry);
        let now = Utc::now();
        let mut epic = Epic {
            id: 0,
            epic_num: epic_num.unwrap_or(0),
            title,
            description,
            status: params.status.unwrap_or_default(),
            priority: params.priority.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        match epic_num {
            Some(_) => self.insert(&mut epic)?,
            None => self.insert_next(&mut epic)?,
        }
        self.ctx.touch();
        tracing::info!(epic_num = epic.epic_num, "epic created");

        Ok(Reply::new(
            format!("Created epic {}: {}", epic.epic_num, epic.title),
            epic,
        ))
    }

    /// Return the epic, creating a placeholder if it does not exist yet. The
    /// boolean reports whether a placeholder was created.
    ///
    /// Callers hold the epic's own lock, which orders stories within this
    /// process; the guarded insert settles races with other processes.
    pub(crate) fn ensure(&self, epic_num: i64) -> Result<(Epic, bool)> {
        if let Some(epic) = self.find(epic_num)? {
            return Ok((epic, false));
        }
        let _registry = hold(&self.ctx.locks.epic_registry);
        // An explicit create_epic may have landed while we waited.
        if let Some(epic) = self.find(epic_num)? {
            return Ok((epic, false));
        }
        let now = Utc::now();
        let mut epic = Epic {
            id: 0,
            epic_num,
            title: placeholder_title(epic_num),
            description: None,
            status: TaskStatus::Todo,
            priority: Priority::default(),
            created_at: now,
            updated_at: now,
        };
        match self.insert(&mut epic) {
            Ok(()) => {}
            // Another connection created it between our read and write.
            Err(ScrumError::AlreadyExists { .. }) => {
                if let Some(existing) = self.find(epic_num)? {
                    return Ok((existing, false));
                }
                return Err(ScrumError::Storage(format!(
                    "epic {epic_num} vanished during creation"
                )));
            }
            Err(e) => return Err(e),
        }
        tracing::info!(epic_num, "epic auto-created for story");
        Ok((epic, true))
    }

    /// Undo a placeholder created by [`ensure`](Self::ensure) whose story
    /// could not be stored.
    pub(crate) fn discard_placeholder(&self, epic: &Epic) {
        if let Err(e) = self.ctx.store.delete(Kind::Epic, epic.id) {
            tracing::warn!(epic_num = epic.epic_num, error = %e, "failed to remove placeholder epic");
        }
    }

    pub fn get(&self, epic_num: i64) -> Result<Reply<Epic>> {
        let epic = self
            .find(epic_num)?
            .ok_or_else(|| ScrumError::not_found("epic", epic_num))?;
        let stories = self
            .ctx
            .store
            .query(Kind::Task, &Filter::all().eq("epic_num", epic_num))?
            .len();
        Ok(Reply::new(format!("Epic {}: {}", epic.epic_num, epic.title), epic)
            .with_meta("story_count", stories))
    }

    pub fn list(&self, query: EpicQuery) -> Result<Reply<Vec<Epic>>> {
        let filter = Filter::all().eq_opt("status", query.status.map(|s| s.as_str()));
        let mut epics: Vec<Epic> = self
            .ctx
            .store
            .query(Kind::Epic, &filter)?
            .into_iter()
            .map(|r| decode(Kind::Epic, r))
            .collect::<Result<_>>()?;
        epics.sort_by_key(|e| e.epic_num);
        let count = epics.len();
        Ok(Reply::new(format!("Found {count} epic(s)"), epics).with_meta("count", count))
    }

    pub fn update(&self, epic_num: i64, changes: EpicChanges) -> Result<Reply<Epic>> {
        if let Some(n) = changes.epic_num {
            if n != epic_num {
                return Err(ScrumError::invalid("epic_num", "epic numbers cannot be changed"));
            }
        }
        let title = changes
            .title
            .as_deref()
            .map(|t| validate::title("title", t))
            .transpose()?;
        let description = validate::edit("description", changes.description.as_deref())?;

        let mut epic = self
            .find(epic_num)?
            .ok_or_else(|| ScrumError::not_found("epic", epic_num))?;

        let now = Utc::now();
        let mut patch = json!({ "updated_at": now });
        if let Some(title) = title {
            patch["title"] = Value::String(title.clone());
            epic.title = title;
        }
        if let Some(desc) = description {
            patch["description"] = json!(desc);
            epic.description = desc;
        }
        if let Some(status) = changes.status {
            patch["status"] = json!(status);
            epic.status = status;
        }
        if let Some(priority) = changes.priority {
            patch["priority"] = json!(priority);
            epic.priority = priority;
        }
        epic.updated_at = now;

        if self.ctx.store.update(Kind::Epic, epic.id, &patch)? == 0 {
            return Err(ScrumError::not_found("epic", epic_num));
        }
        self.ctx.touch();
        Ok(Reply::new(format!("Updated epic {}", epic.epic_num), epic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Services;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    fn services() -> Services {
        Services::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn create(svc: &Services, num: Option<i64>, title: &str) -> Result<Reply<Epic>> {
        svc.epics().create(CreateEpic {
            epic_num: num,
            title: title.into(),
            ..Default::default()
        })
    }

    #[test]
    fn create_and_get_epic() {
        let svc = services();
        let created = create(&svc, Some(1), "Authentication").unwrap();
        assert_eq!(created.data.epic_num, 1);
        assert_eq!(created.data.status, TaskStatus::Todo);

        let got = svc.epics().get(1).unwrap();
        assert_eq!(got.data.title, "Authentication");
        assert_eq!(got.metadata["story_count"], 0);
    }

    #[test]
    fn duplicate_epic_num_is_conflict() {
        let svc = services();
        create(&svc, Some(1), "First").unwrap();
        let err = create(&svc, Some(1), "Again").unwrap_err();
        assert!(matches!(err, ScrumError::AlreadyExists { entity: "epic", .. }));
    }

    #[test]
    fn epic_num_auto_assigned_when_omitted() {
        let svc = services();
        create(&svc, Some(4), "Four").unwrap();
        let next = create(&svc, None, "Next").unwrap();
        assert_eq!(next.data.epic_num, 5);
    }

    #[test]
    fn missing_title_is_validation_error() {
        let svc = services();
        let err = create(&svc, Some(1), "   ").unwrap_err();
        assert!(matches!(err, ScrumError::MissingField(ref f) if f == "title"));
    }

    #[test]
    fn get_missing_epic_is_not_found() {
        let svc = services();
        let err = svc.epics().get(42).unwrap_err();
        assert!(matches!(err, ScrumError::NotFound { entity: "epic", .. }));
    }

    #[test]
    fn update_rejects_renumbering_and_applies_fields() {
        let svc = services();
        create(&svc, Some(2), "Billing").unwrap();
        let err = svc
            .epics()
            .update(
                2,
                EpicChanges {
                    epic_num: Some(3),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ScrumError::Invalid { .. }));

        let updated = svc
            .epics()
            .update(
                2,
                EpicChanges {
                    status: Some(TaskStatus::InProgress),
                    priority: Some(Priority::High),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.data.status, TaskStatus::InProgress);
        let got = svc.epics().get(2).unwrap();
        assert_eq!(got.data.priority, Priority::High);
        assert_eq!(got.data.epic_num, 2);
    }

    #[test]
    fn list_filters_by_status_and_sorts() {
        let svc = services();
        create(&svc, Some(3), "C").unwrap();
        create(&svc, Some(1), "A").unwrap();
        svc.epics()
            .update(
                3,
                EpicChanges {
                    status: Some(TaskStatus::Done),
                    ..Default::default()
                },
            )
            .unwrap();
        let all = svc.epics().list(EpicQuery::default()).unwrap();
        assert_eq!(
            all.data.iter().map(|e| e.epic_num).collect::<Vec<_>>(),
            vec![1, 3]
        );
        let done = svc
            .epics()
            .list(EpicQuery {
                status: Some(TaskStatus::Done),
            })
            .unwrap();
        assert_eq!(done.data.len(), 1);
    }
}
