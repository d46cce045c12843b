//! Documents and the links that attach them to tasks, epics and sprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::envelope::Reply;
use crate::epic::EpicService;
use crate::error::{Result, ScrumError};
use crate::services::{hold, Context};
use crate::sprint::SprintService;
use crate::store::{decode, encode, Filter, Kind};
use crate::task::TaskService;
use crate::types::{DocumentStatus, EntityType};
use crate::validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: DocumentStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Association between an entity and a document, optionally scoped to one
/// section of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDocumentLink {
    #[serde(default)]
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub document_id: i64,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedDocument {
    pub link: EntityDocumentLink,
    pub document: Document,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDocument {
    #[serde(default, rename = "type", alias = "doc_type")]
    pub doc_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status: Option<DocumentStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentChanges {
    #[serde(default, rename = "type", alias = "doc_type")]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status: Option<DocumentStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentQuery {
    #[serde(default, alias = "type")]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub status: Option<DocumentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDocument {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub document_id: i64,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
}

/// Remove one link, or every link between the entity and the document when
/// `section` is omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkDocument {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub document_id: i64,
    #[serde(default)]
    pub section: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: i64,
}

fn section(raw: Option<&str>) -> Result<Option<String>> {
    Ok(validate::text("section", raw)?.map(|s| s.replace(['\n', '\r', '\t'], " ")))
}

pub struct DocumentService<'a> {
    ctx: &'a Context,
}

impl<'a> DocumentService<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    fn load(&self, id: i64) -> Result<Document> {
        self.ctx
            .store
            .get(Kind::Document, id)?
            .map(|r| decode(Kind::Document, r))
            .transpose()?
            .ok_or_else(|| ScrumError::not_found("document", id))
    }

    fn links(&self, filter: &Filter) -> Result<Vec<EntityDocumentLink>> {
        self.ctx
            .store
            .query(Kind::Link, filter)?
            .into_iter()
            .map(|r| decode(Kind::Link, r))
            .collect()
    }

    fn pair_filter(entity_type: EntityType, entity_id: i64, document_id: i64) -> Filter {
        Filter::all()
            .eq("entity_type", entity_type.as_str())
            .eq("entity_id", entity_id)
            .eq("document_id", document_id)
    }

    fn ensure_entity(&self, entity_type: EntityType, entity_id: i64) -> Result<()> {
        let exists = match entity_type {
            EntityType::Task => TaskService::new(self.ctx).find(entity_id)?.is_some(),
            EntityType::Epic => EpicService::new(self.ctx).find(entity_id)?.is_some(),
            EntityType::Sprint => SprintService::new(self.ctx).find(entity_id)?.is_some(),
        };
        if !exists {
            return Err(ScrumError::not_found(entity_type.as_str(), entity_id));
        }
        Ok(())
    }

    pub fn create(&self, params: CreateDocument) -> Result<Reply<Document>> {
        let doc_type = validate::label("type", &params.doc_type)?;
        let title = validate::title("title", &params.title)?;
        let content = validate::text("content", params.content.as_deref())?.unwrap_or_default();

        let now = Utc::now();
        let mut doc = Document {
            id: 0,
            doc_type,
            title,
            content,
            status: params.status.unwrap_or_default(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        doc.id = self.ctx.store.insert(Kind::Document, &encode(&doc)?)?;
        self.ctx.touch();
        tracing::info!(document_id = doc.id, doc_type = %doc.doc_type, "document created");
        Ok(Reply::new(format!("Created {} document '{}'", doc.doc_type, doc.title), doc))
    }

    pub fn get(&self, id: i64) -> Result<Reply<Document>> {
        let doc = self.load(id)?;
        let links = self.links(&Filter::all().eq("document_id", id))?.len();
        Ok(Reply::new(format!("Document '{}' v{}", doc.title, doc.version), doc)
            .with_meta("link_count", links))
    }

    pub fn list(&self, query: DocumentQuery) -> Result<Reply<Vec<Document>>> {
        let doc_type = query
            .doc_type
            .as_deref()
            .map(|t| validate::label("type", t))
            .transpose()?;
        let filter = Filter::all()
            .eq_opt("type", doc_type)
            .eq_opt("status", query.status.map(|s| s.as_str()));
        let docs: Vec<Document> = self
            .ctx
            .store
            .query(Kind::Document, &filter)?
            .into_iter()
            .map(|r| decode(Kind::Document, r))
            .collect::<Result<_>>()?;
        let count = docs.len();
        Ok(Reply::new(format!("Found {count} document(s)"), docs).with_meta("count", count))
    }

    /// Apply changes. The version is bumped only when the content differs
    /// from what is stored.
    pub fn update(&self, id: i64, changes: DocumentChanges) -> Result<Reply<Document>> {
        let doc_type = changes
            .doc_type
            .as_deref()
            .map(|t| validate::label("type", t))
            .transpose()?;
        let title = changes
            .title
            .as_deref()
            .map(|t| validate::title("title", t))
            .transpose()?;
        let content = changes
            .content
            .as_deref()
            .map(|c| validate::text("content", Some(c)).map(Option::unwrap_or_default))
            .transpose()?;

        let _held = hold(&self.ctx.locks.documents);
        let mut doc = self.load(id)?;
        let now = Utc::now();
        let mut patch = json!({ "updated_at": now });
        if let Some(doc_type) = doc_type {
            patch["type"] = json!(doc_type);
            doc.doc_type = doc_type;
        }
        if let Some(title) = title {
            patch["title"] = json!(title);
            doc.title = title;
        }
        if let Some(status) = changes.status {
            patch["status"] = json!(status);
            doc.status = status;
        }
        let content_changed = matches!(&content, Some(c) if *c != doc.content);
        if let Some(content) = content.filter(|_| content_changed) {
            doc.version += 1;
            patch["content"] = Value::String(content.clone());
            patch["version"] = json!(doc.version);
            doc.content = content;
        }
        doc.updated_at = now;

        if self.ctx.store.update(Kind::Document, id, &patch)? == 0 {
            return Err(ScrumError::not_found("document", id));
        }
        self.ctx.touch();
        tracing::debug!(document_id = id, version = doc.version, content_changed, "document updated");
        Ok(
            Reply::new(format!("Updated document '{}' (v{})", doc.title, doc.version), doc)
                .with_meta("content_changed", content_changed),
        )
    }

    /// Link a document to an entity. Re-linking the same section replaces the
    /// purpose instead of adding a duplicate.
    pub fn link(&self, params: LinkDocument) -> Result<Reply<EntityDocumentLink>> {
        let section = section(params.section.as_deref())?;
        let purpose = validate::text("purpose", params.purpose.as_deref())?;

        let _held = hold(&self.ctx.locks.links);
        self.load(params.document_id)?;
        self.ensure_entity(params.entity_type, params.entity_id)?;

        let key = Self::pair_filter(params.entity_type, params.entity_id, params.document_id)
            .eq("section", section.clone());
        if let Some(mut link) = self.links(&key)?.into_iter().next() {
            self.ctx
                .store
                .update(Kind::Link, link.id, &json!({ "purpose": purpose }))?;
            link.purpose = purpose;
            self.ctx.touch();
            return Ok(Reply::new("Updated existing document link", link).with_meta("replaced", true));
        }

        let mut link = EntityDocumentLink {
            id: 0,
            entity_type: params.entity_type,
            entity_id: params.entity_id,
            document_id: params.document_id,
            section,
            purpose,
            created_at: Utc::now(),
        };
        link.id = self.ctx.store.insert(Kind::Link, &encode(&link)?)?;
        self.ctx.touch();
        tracing::info!(
            entity = %link.entity_type,
            entity_id = link.entity_id,
            document_id = link.document_id,
            "document linked"
        );
        Ok(Reply::new(
            format!(
                "Linked document {} to {} {}",
                link.document_id, link.entity_type, link.entity_id
            ),
            link,
        )
        .with_meta("replaced", false))
    }

    pub fn unlink(&self, params: UnlinkDocument) -> Result<Reply<Vec<EntityDocumentLink>>> {
        let section = section(params.section.as_deref())?;
        let mut filter = Self::pair_filter(params.entity_type, params.entity_id, params.document_id);
        if section.is_some() {
            filter = filter.eq("section", section);
        }

        let _held = hold(&self.ctx.locks.links);
        let doomed = self.links(&filter)?;
        if doomed.is_empty() {
            return Err(ScrumError::not_found(
                "link",
                format!(
                    "{} {} -> document {}",
                    params.entity_type, params.entity_id, params.document_id
                ),
            ));
        }
        for link in &doomed {
            self.ctx.store.delete(Kind::Link, link.id)?;
        }
        self.ctx.touch();
        let removed = doomed.len();
        tracing::info!(removed, document_id = params.document_id, "document unlinked");
        Ok(Reply::new(format!("Removed {removed} link(s)"), doomed).with_meta("removed", removed))
    }

    /// Documents attached to an entity, with the link that attaches each.
    pub fn entity_documents(&self, entity: EntityRef) -> Result<Reply<Vec<LinkedDocument>>> {
        let links = self.links(
            &Filter::all()
                .eq("entity_type", entity.entity_type.as_str())
                .eq("entity_id", entity.entity_id),
        )?;
        let mut out = Vec::with_capacity(links.len());
        for link in links {
            match self.load(link.document_id) {
                Ok(document) => out.push(LinkedDocument { link, document }),
                Err(ScrumError::NotFound { .. }) => {
                    tracing::warn!(link_id = link.id, "link points at a missing document");
                }
                Err(e) => return Err(e),
            }
        }
        let count = out.len();
        Ok(Reply::new(
            format!(
                "{count} document(s) linked to {} {}",
                entity.entity_type, entity.entity_id
            ),
            out,
        )
        .with_meta("count", count))
    }

    pub fn document_entities(&self, document_id: i64) -> Result<Reply<Vec<EntityDocumentLink>>> {
        self.load(document_id)?;
        let links = self.links(&Filter::all().eq("document_id", document_id))?;
        let count = links.len();
        Ok(
            Reply::new(format!("Document {document_id} is linked to {count} entit(ies)"), links)
                .with_meta("count", count),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Services;
    use crate::store::SqliteStore;
    use crate::task::CreateTask;
    use std::sync::Arc;

    fn services() -> Services {
        Services::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn doc(svc: &Services, title: &str) -> Document {
        svc.documents()
            .create(CreateDocument {
                doc_type: "prd".into(),
                title: title.into(),
                content: Some("v1 body".into()),
                status: None,
            })
            .unwrap()
            .data
    }

    fn task(svc: &Services) -> i64 {
        svc.tasks()
            .create(CreateTask {
                epic_num: 1,
                title: "Login".into(),
                ..Default::default()
            })
            .unwrap()
            .data
            .id
    }

    fn link(svc: &Services, task_id: i64, doc_id: i64, section: Option<&str>) -> Reply<EntityDocumentLink> {
        svc.documents()
            .link(LinkDocument {
                entity_type: EntityType::Task,
                entity_id: task_id,
                document_id: doc_id,
                section: section.map(String::from),
                purpose: Some("reference".into()),
            })
            .unwrap()
    }

    #[test]
    fn document_type_serializes_as_type() {
        let svc = services();
        let d = doc(&svc, "Spec");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["type"], "prd");
        assert_eq!(v["version"], 1);
        assert_eq!(v["status"], "DRAFT");
    }

    #[test]
    fn version_bumps_only_on_content_change() {
        let svc = services();
        let d = doc(&svc, "Spec");
        let same = svc
            .documents()
            .update(
                d.id,
                DocumentChanges {
                    content: Some("v1 body".into()),
                    status: Some(DocumentStatus::Approved),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(same.data.version, 1);
        assert_eq!(same.data.status, DocumentStatus::Approved);

        let changed = svc
            .documents()
            .update(
                d.id,
                DocumentChanges {
                    content: Some("v2 body".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(changed.data.version, 2);
        assert_eq!(svc.documents().get(d.id).unwrap().data.content, "v2 body");
    }

    #[test]
    fn relinking_replaces_purpose() {
        let svc = services();
        let t = task(&svc);
        let d = doc(&svc, "Spec");
        link(&svc, t, d.id, Some("auth"));
        let again = svc
            .documents()
            .link(LinkDocument {
                entity_type: EntityType::Task,
                entity_id: t,
                document_id: d.id,
                section: Some("auth".into()),
                purpose: Some("implementation".into()),
            })
            .unwrap();
        assert_eq!(again.metadata["replaced"], true);
        let links = svc.documents().document_entities(d.id).unwrap().data;
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].purpose.as_deref(), Some("implementation"));
    }

    #[test]
    fn link_requires_existing_entity_and_document() {
        let svc = services();
        let d = doc(&svc, "Spec");
        let err = svc
            .documents()
            .link(LinkDocument {
                entity_type: EntityType::Sprint,
                entity_id: 5,
                document_id: d.id,
                section: None,
                purpose: None,
            })
            .unwrap_err();
        assert!(matches!(err, ScrumError::NotFound { entity: "sprint", .. }));

        let t = task(&svc);
        let err = svc
            .documents()
            .link(LinkDocument {
                entity_type: EntityType::Task,
                entity_id: t,
                document_id: 404,
                section: None,
                purpose: None,
            })
            .unwrap_err();
        assert!(matches!(err, ScrumError::NotFound { entity: "document", .. }));
    }

    #[test]
    fn unlink_without_section_removes_every_section() {
        let svc = services();
        let t = task(&svc);
        let d = doc(&svc, "Spec");
        link(&svc, t, d.id, Some("auth"));
        link(&svc, t, d.id, None);

        let removed = svc
            .documents()
            .unlink(UnlinkDocument {
                entity_type: EntityType::Task,
                entity_id: t,
                document_id: d.id,
                section: None,
            })
            .unwrap();
        assert_eq!(removed.data.len(), 2);
        assert!(removed.data.iter().any(|l| l.section.as_deref() == Some("auth")));
        assert!(svc.documents().document_entities(d.id).unwrap().data.is_empty());
    }

    #[test]
    fn unlink_with_section_is_exact() {
        let svc = services();
        let t = task(&svc);
        let d = doc(&svc, "Spec");
        link(&svc, t, d.id, Some("auth"));
        link(&svc, t, d.id, Some("billing"));
        svc.documents()
            .unlink(UnlinkDocument {
                entity_type: EntityType::Task,
                entity_id: t,
                document_id: d.id,
                section: Some("auth".into()),
            })
            .unwrap();
        let left = svc.documents().document_entities(d.id).unwrap().data;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].section.as_deref(), Some("billing"));

        let err = svc
            .documents()
            .unlink(UnlinkDocument {
                entity_type: EntityType::Task,
                entity_id: t,
                document_id: d.id,
                section: Some("auth".into()),
            })
            .unwrap_err();
        assert!(matches!(err, ScrumError::NotFound { entity: "link", .. }));
    }

    #[test]
    fn entity_documents_and_task_delete_cascade() {
        let svc = services();
        let t = task(&svc);
        let d = doc(&svc, "Spec");
        link(&svc, t, d.id, Some("auth"));
        let docs = svc
            .documents()
            .entity_documents(EntityRef {
                entity_type: EntityType::Task,
                entity_id: t,
            })
            .unwrap();
        assert_eq!(docs.data.len(), 1);
        assert_eq!(docs.data[0].document.title, "Spec");

        let deleted = svc.tasks().delete(t).unwrap();
        assert_eq!(deleted.metadata["links_removed"], 1);
        assert!(svc.documents().document_entities(d.id).unwrap().data.is_empty());
    }

    #[test]
    fn list_filters_by_type() {
        let svc = services();
        doc(&svc, "PRD");
        svc.documents()
            .create(CreateDocument {
                doc_type: "Architecture".into(),
                title: "Arch".into(),
                content: None,
                status: None,
            })
            .unwrap();
        let arch = svc
            .documents()
            .list(DocumentQuery {
                doc_type: Some("architecture".into()),
                status: None,
            })
            .unwrap();
        assert_eq!(arch.data.len(), 1);
        assert_eq!(arch.data[0].doc_type, "architecture");
    }
}
