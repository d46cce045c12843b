//! The service layer entry point.
//!
//! [`Services`] is a cheap, cloneable handle shared by every transport. It
//! holds no entity state: each call re-reads from the store. The invariants
//! that must hold across processes (one ACTIVE sprint, unique epic numbers,
//! increasing story numbers) are enforced by the store's guarded writes.
//! What `Services` adds is a set of in-process critical sections that order
//! the remaining read-then-write sequences between callers in this process:
//!
//! - one mutex per epic number (story numbering, epic auto-creation)
//! - one registry mutex for epic creation and epic auto-numbering
//! - one mutex for sprint exclusivity and sprint status transitions
//! - one mutex for document-link upserts and one for document versions
//! - one mutex for the project singleton

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::Config;
use crate::document::DocumentService;
use crate::epic::EpicService;
use crate::error::Result;
use crate::project::ProjectService;
use crate::resources::ViewCache;
use crate::sprint::SprintService;
use crate::store::Store;
use crate::task::TaskService;

#[derive(Clone)]
pub struct Services {
    ctx: Arc<Context>,
}

pub(crate) struct Context {
    pub store: Arc<dyn Store>,
    pub locks: Locks,
    pub project_defaults: ProjectDefaults,
    pub views: ViewCache,
    generation: AtomicU64,
}

#[derive(Debug, Clone)]
pub(crate) struct ProjectDefaults {
    pub name: String,
    pub description: Option<String>,
}

impl Context {
    /// Record that the store changed; cached views built before this point
    /// become stale.
    pub fn touch(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Services {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::build(
            store,
            ProjectDefaults {
                name: "Untitled project".into(),
                description: None,
            },
            Duration::from_secs(30),
        )
    }

    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Self {
        Self::build(
            store,
            ProjectDefaults {
                name: config.project.name.clone(),
                description: config.project.description.clone(),
            },
            Duration::from_secs(config.resources.cache_ttl_secs),
        )
    }

    fn build(store: Arc<dyn Store>, project_defaults: ProjectDefaults, ttl: Duration) -> Self {
        Self {
            ctx: Arc::new(Context {
                store,
                locks: Locks::default(),
                project_defaults,
                views: ViewCache::new(ttl),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn project(&self) -> ProjectService<'_> {
        ProjectService::new(&self.ctx)
    }

    pub fn epics(&self) -> EpicService<'_> {
        EpicService::new(&self.ctx)
    }

    pub fn tasks(&self) -> TaskService<'_> {
        TaskService::new(&self.ctx)
    }

    pub fn sprints(&self) -> SprintService<'_> {
        SprintService::new(&self.ctx)
    }

    pub fn documents(&self) -> DocumentService<'_> {
        DocumentService::new(&self.ctx)
    }

    /// Monotonic counter bumped by every successful mutation.
    pub fn generation(&self) -> u64 {
        self.ctx.generation()
    }

    pub fn ping_store(&self) -> Result<()> {
        self.ctx.store.ping()
    }

    pub(crate) fn ctx(&self) -> &Context {
        &self.ctx
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Locks {
    epics: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    pub epic_registry: Mutex<()>,
    pub sprints: Mutex<()>,
    pub links: Mutex<()>,
    pub documents: Mutex<()>,
    pub project: Mutex<()>,
}

impl Locks {
    /// The critical section for one epic's story numbering.
    pub fn epic(&self, epic_num: i64) -> Arc<Mutex<()>> {
        let mut map = hold(&self.epics);
        Arc::clone(map.entry(epic_num).or_default())
    }
}

/// Lock a critical section. A poisoned mutex only means an earlier holder
/// panicked; the store itself is consistent per record, so carry on.
pub(crate) fn hold<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
