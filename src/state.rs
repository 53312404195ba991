use crate::batch::ImportBatchController;
use crate::error::ImportError;
use crate::mapping::ColumnMapper;
use crate::models::QuestionDraft;
use crate::tabular::TabularDecoder;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{fs, path::Path};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberedDraft {
    pub row_number: usize,
    #[serde(flatten)]
    pub draft: QuestionDraft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub row_number: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub imported: usize,
    pub failures: Vec<RowFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSource {
    Import,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub id: Uuid,
    pub question_set_id: String,
    #[serde(flatten)]
    pub draft: QuestionDraft,
    pub source: QuestionSource,
    pub created_at: DateTime<Utc>,
}

pub trait QuestionStore: Send + Sync {
    fn commit_batch(
        &self,
        question_set_id: &str,
        drafts: Vec<NumberedDraft>,
    ) -> BoxFuture<'static, Result<CommitReport, ImportError>>;

    fn save_question(
        &self,
        question_set_id: &str,
        draft: QuestionDraft,
    ) -> BoxFuture<'static, Result<QuestionRecord, ImportError>>;

    fn list_questions(&self, question_set_id: &str) -> BoxFuture<'static, Result<Vec<QuestionRecord>, ImportError>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistentSnapshot {
    question_sets: HashMap<String, Vec<QuestionRecord>>,
}

pub struct InMemoryDb {
    pub question_sets: RwLock<HashMap<String, Vec<QuestionRecord>>>,
    snapshot_path: Option<String>,
}

impl InMemoryDb {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path.and_then(|path| {
            let raw = fs::read_to_string(path).ok()?;
            match serde_json::from_str::<PersistentSnapshot>(&raw) {
                Ok(s) => Some(s),
                Err(err) => {
                    warn!("failed to read local snapshot {}: {}", path, err);
                    None
                }
            }
        });
        let question_sets = snapshot.map(|s| s.question_sets).unwrap_or_default();
        Self {
            question_sets: RwLock::new(question_sets),
            snapshot_path: snapshot_path.map(str::to_string),
        }
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            question_sets: self.question_sets.read().await.clone(),
        }
    }

    pub async fn persist_core_data(&self) -> anyhow::Result<()> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serialized).await?;
        Ok(())
    }

    async fn persist_or_warn(&self, after: &str) {
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after {}: {}", after, err);
        }
    }
}

fn record(question_set_id: &str, draft: QuestionDraft, source: QuestionSource) -> QuestionRecord {
    QuestionRecord {
        id: Uuid::new_v4(),
        question_set_id: question_set_id.to_string(),
        draft,
        source,
        created_at: Utc::now(),
    }
}

fn duplicate_order(order: u32) -> String {
    format!("question order {order} already exists in this set")
}

#[derive(Clone)]
pub struct InMemoryQuestionStore {
    db: Arc<InMemoryDb>,
}

impl InMemoryQuestionStore {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        Self {
            db: Arc::new(InMemoryDb::new(snapshot_path)),
        }
    }
}

impl QuestionStore for InMemoryQuestionStore {
    fn commit_batch(
        &self,
        question_set_id: &str,
        drafts: Vec<NumberedDraft>,
    ) -> BoxFuture<'static, Result<CommitReport, ImportError>> {
        let db = self.db.clone();
        let set_id = question_set_id.to_string();
        Box::pin(async move {
            let mut report = CommitReport::default();
            {
                let mut sets = db.question_sets.write().await;
                let questions = sets.entry(set_id.clone()).or_default();
                let mut taken: HashSet<u32> =
                    questions.iter().map(|q| q.draft.question_order).collect();
                for numbered in drafts {
                    let order = numbered.draft.question_order;
                    if !taken.insert(order) {
                        report.failures.push(RowFailure {
                            row_number: numbered.row_number,
                            reason: duplicate_order(order),
                        });
                        continue;
                    }
                    questions.push(record(&set_id, numbered.draft, QuestionSource::Import));
                    report.imported += 1;
                }
            }
            info!(
                set = %set_id,
                imported = report.imported,
                rejected = report.failures.len(),
                "stored imported questions"
            );
            db.persist_or_warn("commit_batch").await;
            Ok(report)
        })
    }

    fn save_question(
        &self,
        question_set_id: &str,
        draft: QuestionDraft,
    ) -> BoxFuture<'static, Result<QuestionRecord, ImportError>> {
        let db = self.db.clone();
        let set_id = question_set_id.to_string();
        Box::pin(async move {
            let saved = {
                let mut sets = db.question_sets.write().await;
                let questions = sets.entry(set_id.clone()).or_default();
                let order = draft.question_order;
                if questions.iter().any(|q| q.draft.question_order == order) {
                    return Err(ImportError::Rejected(duplicate_order(order)));
                }
                let saved = record(&set_id, draft, QuestionSource::Manual);
                questions.push(saved.clone());
                saved
            };
            db.persist_or_warn("save_question").await;
            Ok(saved)
        })
    }

    fn list_questions(&self, question_set_id: &str) -> BoxFuture<'static, Result<Vec<QuestionRecord>, ImportError>> {
        let db = self.db.clone();
        let set_id = question_set_id.to_string();
        Box::pin(async move {
            let mut questions = db
                .question_sets
                .read()
                .await
                .get(&set_id)
                .cloned()
                .unwrap_or_default();
            questions.sort_by_key(|q| q.draft.question_order);
            Ok(questions)
        })
    }
}

pub type SharedImport = Arc<Mutex<ImportBatchController>>;

pub const DEFAULT_IMPORT_IDLE: Duration = Duration::from_secs(30 * 60);

pub struct ImportSlot {
    pub controller: SharedImport,
    touched_at: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QuestionStore>,
    pub decoder: Arc<dyn TabularDecoder>,
    pub mapper: Arc<ColumnMapper>,
    pub imports: Arc<DashMap<Uuid, ImportSlot>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn QuestionStore>,
        decoder: Arc<dyn TabularDecoder>,
        mapper: Arc<ColumnMapper>,
    ) -> Self {
        Self {
            store,
            decoder,
            mapper,
            imports: Arc::new(DashMap::new()),
        }
    }

    pub fn open_import(&self, question_set_id: &str) -> (Uuid, SharedImport) {
        let id = Uuid::new_v4();
        let controller = ImportBatchController::new(
            question_set_id,
            self.decoder.clone(),
            self.store.clone(),
            self.mapper.clone(),
        );
        let shared = Arc::new(Mutex::new(controller));
        self.imports.insert(
            id,
            ImportSlot {
                controller: shared.clone(),
                touched_at: Instant::now(),
            },
        );
        (id, shared)
    }

    pub fn import(&self, id: Uuid) -> Option<SharedImport> {
        self.imports.get_mut(&id).map(|mut slot| {
            slot.touched_at = Instant::now();
            slot.controller.clone()
        })
    }

    pub fn close_import(&self, id: Uuid) -> bool {
        self.imports.remove(&id).is_some()
    }

    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut evicted = 0;
        self.imports.retain(|id, slot| {
            if slot.touched_at.elapsed() < max_idle {
                return true;
            }
            info!(session = %id, "evicting idle import session");
            evicted += 1;
            false
        });
        evicted
    }

    pub async fn sweep_idle_forever(self, max_idle: Duration) {
        let period = (max_idle / 4).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = self.sweep_idle(max_idle);
            if evicted > 0 {
                info!(evicted, remaining = self.imports.len(), "idle import sweep");
            }
        }
    }
}
