use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::envelope::Reply;
use crate::error::Result;
use crate::services::{hold, Context};
use crate::store::{decode, encode, Filter, Kind};
use crate::validate;

/// The project singleton. `id` is 0 until the record is first saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProjectInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct ProjectService<'a> {
    ctx: &'a Context,
}

impl<'a> ProjectService<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    fn stored(&self) -> Result<Option<Project>> {
        let rows = self.ctx.store.query(Kind::Project, &Filter::all())?;
        rows.into_iter()
            .next()
            .map(|r| decode(Kind::Project, r))
            .transpose()
    }

    /// The stored project, or the configured defaults when nothing has been
    /// saved yet.
    pub fn info(&self) -> Result<Reply<Project>> {
        match self.stored()? {
            Some(project) => Ok(Reply::new(
                format!("Project '{}'", project.name),
                project,
            )
            .with_meta("persisted", true)),
            None => {
                let now = Utc::now();
                let defaults = &self.ctx.project_defaults;
                let project = Project {
                    id: 0,
                    name: defaults.name.clone(),
                    description: defaults.description.clone(),
                    created_at: now,
                    updated_at: now,
                };
                Ok(Reply::new(format!("Project '{}'", project.name), project)
                    .with_meta("persisted", false))
            }
        }
    }

    /// Create or update the singleton project record.
    pub fn update_info(&self, params: UpdateProjectInfo) -> Result<Reply<Project>> {
        let name = params
            .name
            .as_deref()
            .map(|n| validate::title("name", n))
            .transpose()?;
        let description = validate::edit("description", params.description.as_deref())?;

        let _held = hold(&self.ctx.locks.project);
        let now = Utc::now();
        let project = match self.stored()? {
            Some(mut project) => {
                let mut patch = json!({ "updated_at": now });
                if let Some(name) = name {
                    patch["name"] = json!(name);
                    project.name = name;
                }
                if let Some(desc) = description {
                    patch["description"] = json!(desc);
                    project.description = desc;
                }
                project.updated_at = now;
                self.ctx.store.update(Kind::Project, project.id, &patch)?;
                project
            }
            None => {
                let name = match name {
                    Some(n) => n,
                    None => self.ctx.project_defaults.name.clone(),
                };
                let mut project = Project {
                    id: 0,
                    name,
                    description: match description {
                        Some(desc) => desc,
                        None => self.ctx.project_defaults.description.clone(),
                    },
                    created_at: now,
                    updated_at: now,
                };
                project.id = self.ctx.store.insert(Kind::Project, &encode(&project)?)?;
                project
            }
        };
        self.ctx.touch();
        tracing::info!(project = %project.name, "project info updated");
        Ok(Reply::new(format!("Updated project '{}'", project.name), project))
    }
}

#[cfg(test)]
mod tests {
    use crate::services::Services;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    use super::*;

    fn services() -> Services {
        Services::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    #[test]
    fn info_falls_back_to_defaults_until_saved() {
        let svc = services();
        let reply = svc.project().info().unwrap();
        assert_eq!(reply.data.id, 0);
        assert_eq!(reply.metadata["persisted"], false);
    }

    #[test]
    fn update_info_creates_then_updates_singleton() {
        let svc = services();
        let first = svc
            .project()
            .update_info(UpdateProjectInfo {
                name: Some("Atlas".into()),
                description: Some("Mapping service".into()),
            })
            .unwrap();
        assert!(first.data.id > 0);

        let second = svc
            .project()
            .update_info(UpdateProjectInfo {
                name: Some("Atlas 2".into()),
                description: None,
            })
            .unwrap();
        assert_eq!(second.data.id, first.data.id);
        assert_eq!(second.data.description.as_deref(), Some("Mapping service"));

        let info = svc.project().info().unwrap();
        assert_eq!(info.data.name, "Atlas 2");
        assert_eq!(info.metadata["persisted"], true);
    }
}
