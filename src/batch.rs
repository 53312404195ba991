use crate::error::ImportError;
use crate::mapping::{CanonicalFieldKey, ColumnMapper, FieldMapping};
use crate::models::ImportBatch;
use crate::rows::validate_row;
use crate::state::{CommitReport, NumberedDraft, QuestionStore, RowFailure};
use crate::tabular::{DecodedTable, SourceFile, TabularDecoder};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportState {
    Idle,
    ColumnsPending,
    MappingConfirmed,
    Previewed,
    Committing,
    Done,
    Cancelled,
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportState::Idle => "idle",
            ImportState::ColumnsPending => "waiting for a column mapping",
            ImportState::MappingConfirmed => "mapped",
            ImportState::Previewed => "previewed",
            ImportState::Committing => "committing",
            ImportState::Done => "done",
            ImportState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Columns,
    Preview,
    Commit,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Columns => "columns",
            Operation::Preview => "preview",
            Operation::Commit => "commit",
        };
        f.write_str(name)
    }
}

// Holds the session busy until landed or dropped.
#[must_use = "a pending call does nothing until it is landed"]
pub struct Pending<T> {
    generation: u64,
    operation: Operation,
    call: BoxFuture<'static, Result<T, ImportError>>,
    ticket: Arc<()>,
}

impl<T> Pending<T> {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub async fn land(self) -> Landed<T> {
        Landed {
            generation: self.generation,
            operation: self.operation,
            result: self.call.await,
            _ticket: self.ticket,
        }
    }
}

pub struct Landed<T> {
    generation: u64,
    operation: Operation,
    result: Result<T, ImportError>,
    _ticket: Arc<()>,
}

// The controller only holds a weak handle on the ticket; once the pending
// call and its landed result are both gone the call can never be accepted.
struct InFlight {
    operation: Operation,
    ticket: Weak<()>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDiscovery {
    pub needs_mapping: bool,
    pub columns: Vec<String>,
    pub suggested_mapping: FieldMapping,
    pub unmapped_required: Vec<CanonicalFieldKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub requested: usize,
    pub imported: usize,
    pub failures: Vec<RowFailure>,
}

pub struct ImportBatchController {
    question_set_id: String,
    decoder: Arc<dyn TabularDecoder>,
    store: Arc<dyn QuestionStore>,
    mapper: Arc<ColumnMapper>,
    state: ImportState,
    generation: u64,
    in_flight: Option<InFlight>,
    file: Option<SourceFile>,
    columns: Vec<String>,
    mapping: Option<FieldMapping>,
    batch: Option<ImportBatch>,
    submitted: usize,
    outcome: Option<CommitOutcome>,
}

impl ImportBatchController {
    pub fn new(
        question_set_id: impl Into<String>,
        decoder: Arc<dyn TabularDecoder>,
        store: Arc<dyn QuestionStore>,
        mapper: Arc<ColumnMapper>,
    ) -> Self {
        Self {
            question_set_id: question_set_id.into(),
            decoder,
            store,
            mapper,
            state: ImportState::Idle,
            generation: 0,
            in_flight: None,
            file: None,
            columns: Vec::new(),
            mapping: None,
            batch: None,
            submitted: 0,
            outcome: None,
        }
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn question_set_id(&self) -> &str {
        &self.question_set_id
    }

    pub fn outstanding(&self) -> Option<Operation> {
        self.in_flight.as_ref().map(|f| f.operation)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn mapping(&self) -> Option<&FieldMapping> {
        self.mapping.as_ref()
    }

    pub fn batch(&self) -> Option<&ImportBatch> {
        self.batch.as_ref()
    }

    pub fn outcome(&self) -> Option<&CommitOutcome> {
        self.outcome.as_ref()
    }

    pub fn suggested_mapping(&self) -> FieldMapping {
        self.mapper.auto_map(&self.columns)
    }

    fn reclaim_abandoned(&mut self) {
        let Some(flight) = &self.in_flight else {
            return;
        };
        if flight.ticket.strong_count() > 0 {
            return;
        }
        let operation = flight.operation;
        self.in_flight = None;
        warn!(
            set = %self.question_set_id,
            operation = %operation,
            "call was dropped before its result was delivered"
        );
        match operation {
            Operation::Columns => {
                self.reset();
                self.state = ImportState::Idle;
            }
            Operation::Preview => {}
            Operation::Commit => self.state = ImportState::Previewed,
        }
    }

    fn expect_state(&mut self, allowed: &[ImportState], action: &'static str) -> Result<(), ImportError> {
        self.reclaim_abandoned();
        if let Some(op) = self.outstanding() {
            return Err(ImportError::Busy(op));
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ImportError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    fn begin<T>(
        &mut self,
        operation: Operation,
        call: BoxFuture<'static, Result<T, ImportError>>,
    ) -> Pending<T> {
        let ticket = Arc::new(());
        self.in_flight = Some(InFlight {
            operation,
            ticket: Arc::downgrade(&ticket),
        });
        Pending {
            generation: self.generation,
            operation,
            call,
            ticket,
        }
    }

    fn accept<T>(&mut self, landed: Landed<T>) -> Result<Result<T, ImportError>, ImportError> {
        if landed.generation != self.generation || self.outstanding() != Some(landed.operation) {
            info!(
                set = %self.question_set_id,
                operation = %landed.operation,
                "discarding result of a cancelled call"
            );
            return Err(ImportError::Stale);
        }
        self.in_flight = None;
        Ok(landed.result)
    }

    fn reset(&mut self) {
        self.in_flight = None;
        self.file = None;
        self.columns.clear();
        self.mapping = None;
        self.batch = None;
        self.submitted = 0;
        self.outcome = None;
    }

    pub fn request_columns(&mut self, file: SourceFile) -> Result<Pending<Vec<String>>, ImportError> {
        self.expect_state(&[ImportState::Idle, ImportState::Cancelled], "upload a file")?;
        self.reset();
        self.state = ImportState::ColumnsPending;
        let call = self.decoder.read_headers(file.clone());
        self.file = Some(file);
        Ok(self.begin(Operation::Columns, call))
    }

    pub fn columns_received(&mut self, landed: Landed<Vec<String>>) -> Result<ColumnDiscovery, ImportError> {
        match self.accept(landed)? {
            Err(err) => {
                warn!(set = %self.question_set_id, error = %err, "column discovery failed");
                self.reset();
                self.state = ImportState::Idle;
                Err(err)
            }
            Ok(columns) => {
                self.columns = columns;
                let suggested = self.suggested_mapping();
                let unmapped_required = suggested.missing_required();
                info!(
                    set = %self.question_set_id,
                    columns = self.columns.len(),
                    bound = suggested.len(),
                    unmapped_required = unmapped_required.len(),
                    "columns discovered"
                );
                Ok(ColumnDiscovery {
                    needs_mapping: !unmapped_required.is_empty(),
                    columns: self.columns.clone(),
                    suggested_mapping: suggested,
                    unmapped_required,
                })
            }
        }
    }

    pub fn confirm_mapping(&mut self, mapping: FieldMapping) -> Result<Pending<DecodedTable>, ImportError> {
        self.expect_state(
            &[
                ImportState::ColumnsPending,
                ImportState::MappingConfirmed,
                ImportState::Previewed,
            ],
            "confirm a mapping",
        )?;
        let missing = mapping.missing_required();
        if !missing.is_empty() {
            let missing: Vec<String> = missing.iter().map(ToString::to_string).collect();
            warn!(
                set = %self.question_set_id,
                missing = %missing.join(", "),
                "mapping confirmed with required fields unmapped"
            );
        }
        self.mapping = Some(mapping);
        self.state = ImportState::MappingConfirmed;
        self.preview()
    }

    pub fn preview(&mut self) -> Result<Pending<DecodedTable>, ImportError> {
        self.expect_state(
            &[ImportState::MappingConfirmed, ImportState::Previewed],
            "preview",
        )?;
        let file = self.file.clone().ok_or(ImportError::InvalidTransition {
            state: self.state,
            action: "preview without a file",
        })?;
        let call = self.decoder.read_table(file);
        Ok(self.begin(Operation::Preview, call))
    }

    pub fn preview_received(&mut self, landed: Landed<DecodedTable>) -> Result<&ImportBatch, ImportError> {
        let table = match self.accept(landed)? {
            Ok(table) => table,
            Err(err) => {
                warn!(set = %self.question_set_id, error = %err, "preview decode failed");
                return Err(err);
            }
        };
        let mapping = self.mapping.clone().unwrap_or_default();
        let rows = table
            .rows
            .iter()
            .map(|row| {
                let mut validated = validate_row(row.row_number, &row.cells, &mapping);
                validated.warnings.extend(row.issues.iter().cloned());
                validated
            })
            .collect();
        let batch = ImportBatch::from_rows(rows);
        info!(
            set = %self.question_set_id,
            total = batch.total_rows,
            valid = batch.valid_rows,
            invalid = batch.invalid_rows,
            "preview assembled"
        );
        self.state = ImportState::Previewed;
        Ok(&*self.batch.insert(batch))
    }

    fn previewed_batch(&mut self, action: &'static str) -> Result<&mut ImportBatch, ImportError> {
        self.expect_state(&[ImportState::Previewed], action)?;
        let state = self.state;
        self.batch
            .as_mut()
            .ok_or(ImportError::InvalidTransition { state, action })
    }

    pub fn toggle_selection(&mut self, row_number: usize) -> Result<bool, ImportError> {
        self.previewed_batch("change the selection")?
            .toggle(row_number)
            .ok_or(ImportError::UnknownRow(row_number))
    }

    pub fn toggle_all_valid(&mut self) -> Result<bool, ImportError> {
        Ok(self.previewed_batch("change the selection")?.toggle_all_valid())
    }

    pub fn commit(&mut self) -> Result<Pending<CommitReport>, ImportError> {
        let drafts: Vec<NumberedDraft> = self
            .previewed_batch("commit")?
            .committable()
            .map(|row| NumberedDraft {
                row_number: row.row_number,
                draft: row.draft.clone(),
            })
            .collect();
        if drafts.is_empty() {
            return Err(ImportError::NothingSelected);
        }
        self.submitted = drafts.len();
        self.state = ImportState::Committing;
        info!(set = %self.question_set_id, rows = drafts.len(), "committing selected rows");
        let call = self.store.commit_batch(&self.question_set_id, drafts);
        Ok(self.begin(Operation::Commit, call))
    }

    pub fn commit_received(&mut self, landed: Landed<CommitReport>) -> Result<&CommitOutcome, ImportError> {
        let report = match self.accept(landed)? {
            Ok(report) => report,
            Err(err) => {
                warn!(set = %self.question_set_id, error = %err, "commit failed; batch left in preview");
                self.state = ImportState::Previewed;
                return Err(err);
            }
        };
        if !report.failures.is_empty() {
            warn!(
                set = %self.question_set_id,
                failed = report.failures.len(),
                "question store rejected some rows"
            );
        }
        info!(
            set = %self.question_set_id,
            requested = self.submitted,
            imported = report.imported,
            "commit finished"
        );
        let outcome = CommitOutcome {
            requested: self.submitted,
            imported: report.imported,
            failures: report.failures,
        };
        self.file = None;
        self.batch = None;
        self.state = ImportState::Done;
        Ok(&*self.outcome.insert(outcome))
    }

    pub fn cancel(&mut self) -> Result<(), ImportError> {
        self.reclaim_abandoned();
        if matches!(self.state, ImportState::Committing | ImportState::Done) {
            return Err(ImportError::InvalidTransition {
                state: self.state,
                action: "cancel",
            });
        }
        if let Some(op) = self.outstanding() {
            info!(set = %self.question_set_id, operation = %op, "cancelled with a call in flight");
        }
        self.reset();
        self.generation += 1;
        self.state = ImportState::Cancelled;
        Ok(())
    }

    pub async fn discover_columns(&mut self, file: SourceFile) -> Result<ColumnDiscovery, ImportError> {
        let landed = self.request_columns(file)?.land().await;
        self.columns_received(landed)
    }

    pub async fn confirm_and_preview(&mut self, mapping: FieldMapping) -> Result<&ImportBatch, ImportError> {
        let landed = self.confirm_mapping(mapping)?.land().await;
        self.preview_received(landed)
    }

    pub async fn commit_selected(&mut self) -> Result<&CommitOutcome, ImportError> {
        let landed = self.commit()?.land().await;
        self.commit_received(landed)
    }
}
