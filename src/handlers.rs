use crate::batch::{ColumnDiscovery, CommitOutcome, ImportBatchController, ImportState, Landed, Pending};
use crate::editor::QuestionDraftEditor;
use crate::error::{AppError, ErrorDetail, ImportError};
use crate::mapping::{CanonicalFieldKey, FieldMapping};
use crate::models::{ImportBatch, Language, QuestionDraft};
use crate::state::{AppState, QuestionRecord, SharedImport};
use crate::tabular::SourceFile;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn validation_details(errors: &ValidationErrors) -> Vec<ErrorDetail> {
    errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| ErrorDetail {
                field: field.to_string(),
                issue: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            })
        })
        .collect()
}

fn find_import(state: &AppState, session_id: &str, req_id: &str) -> Result<(Uuid, SharedImport), AppError> {
    let not_found = || AppError::not_found("import session not found", req_id);
    let id = Uuid::parse_str(session_id).map_err(|_| not_found())?;
    let shared = state.import(id).ok_or_else(not_found)?;
    Ok((id, shared))
}

// The call is awaited on its own task without the session lock, so a client
// that disconnects mid-request cannot leave the session waiting on it.
async fn drive<T, R, F>(
    shared: &SharedImport,
    begin: impl FnOnce(&mut ImportBatchController) -> Result<Pending<T>, ImportError>,
    finish: F,
) -> Result<R, ImportError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut ImportBatchController, Landed<T>) -> Result<R, ImportError> + Send + 'static,
{
    let pending = begin(&mut *shared.lock().await)?;
    let shared = shared.clone();
    tokio::spawn(async move {
        let landed = pending.land().await;
        let mut controller = shared.lock().await;
        finish(&mut controller, landed)
    })
    .await
    .map_err(|e| ImportError::Transport(format!("import task failed: {e}")))?
}

async fn run_preview(shared: &SharedImport, mapping: FieldMapping) -> Result<ImportBatch, ImportError> {
    drive(
        shared,
        |c| c.confirm_mapping(mapping),
        |c, landed| c.preview_received(landed).cloned(),
    )
    .await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOut {
    pub key: CanonicalFieldKey,
    pub default_header: Option<String>,
    pub required: bool,
    pub language: Option<Language>,
}

#[derive(Debug, Serialize)]
pub struct FieldListResponse {
    pub items: Vec<FieldOut>,
    pub total: usize,
}

pub async fn list_fields() -> Json<FieldListResponse> {
    let items: Vec<FieldOut> = CanonicalFieldKey::all()
        .into_iter()
        .map(|key| FieldOut {
            key,
            default_header: key.default_header(),
            required: key.is_required(),
            language: key.language(),
        })
        .collect();
    Json(FieldListResponse {
        total: items.len(),
        items,
    })
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartImportPayload {
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    #[validate(length(min = 1))]
    pub file_base64: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSessionOut {
    pub session_id: Uuid,
    pub question_set_id: String,
    pub state: ImportState,
    #[serde(flatten)]
    pub discovery: ColumnDiscovery,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub batch: Option<ImportBatch>,
}

pub async fn start_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(set_id): Path<String>,
    Json(payload): Json<StartImportPayload>,
) -> Result<(StatusCode, Json<ImportSessionOut>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if let Err(errors) = payload.validate() {
        return Err(AppError::validation("invalid import request", req_id).with_details(validation_details(&errors)));
    }
    let bytes = STANDARD
        .decode(payload.file_base64.trim())
        .map_err(|e| AppError::validation(format!("fileBase64 is not valid base64: {e}"), req_id.clone()))?;
    let file = SourceFile::new(payload.file_name, bytes);

    let (session_id, shared) = state.open_import(&set_id);
    info!(session = %session_id, set = %set_id, file = %file.name, "import session opened");
    let discovery = match drive(
        &shared,
        |c| c.request_columns(file),
        |c, landed| c.columns_received(landed),
    )
    .await
    {
        Ok(discovery) => discovery,
        Err(err) => {
            state.close_import(session_id);
            return Err(AppError::from_import(err, req_id));
        }
    };

    let batch = if discovery.needs_mapping {
        None
    } else {
        match run_preview(&shared, discovery.suggested_mapping.clone()).await {
            Ok(batch) => Some(batch),
            Err(err) => {
                state.close_import(session_id);
                return Err(AppError::from_import(err, req_id));
            }
        }
    };
    let current = shared.lock().await.state();
    Ok((
        StatusCode::CREATED,
        Json(ImportSessionOut {
            session_id,
            question_set_id: set_id,
            state: current,
            discovery,
            batch,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewPayload {
    #[serde(default)]
    pub mapping: Option<FieldMapping>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOut {
    pub session_id: Uuid,
    pub state: ImportState,
    pub mapping: FieldMapping,
    #[serde(flatten)]
    pub batch: ImportBatch,
}

pub async fn preview_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<PreviewPayload>,
) -> Result<Json<PreviewOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (id, shared) = find_import(&state, &session_id, &req_id)?;
    let mapping = match payload.mapping {
        Some(mapping) => mapping,
        None => {
            let controller = shared.lock().await;
            controller
                .mapping()
                .cloned()
                .unwrap_or_else(|| controller.suggested_mapping())
        }
    };
    let batch = run_preview(&shared, mapping.clone())
        .await
        .map_err(|e| AppError::from_import(e, req_id))?;
    let current = shared.lock().await.state();
    Ok(Json(PreviewOut {
        session_id: id,
        state: current,
        mapping,
        batch,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_number: Option<usize>,
    pub selected: bool,
    pub selected_rows: Vec<usize>,
}

pub async fn toggle_row(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((session_id, row_number)): Path<(String, usize)>,
) -> Result<Json<SelectionOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (_, shared) = find_import(&state, &session_id, &req_id)?;
    let mut controller = shared.lock().await;
    let selected = controller
        .toggle_selection(row_number)
        .map_err(|e| AppError::from_import(e, req_id))?;
    Ok(Json(SelectionOut {
        row_number: Some(row_number),
        selected,
        selected_rows: selected_rows(&controller),
    }))
}

pub async fn toggle_all_valid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<SelectionOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (_, shared) = find_import(&state, &session_id, &req_id)?;
    let mut controller = shared.lock().await;
    let selected = controller
        .toggle_all_valid()
        .map_err(|e| AppError::from_import(e, req_id))?;
    Ok(Json(SelectionOut {
        row_number: None,
        selected,
        selected_rows: selected_rows(&controller),
    }))
}

fn selected_rows(controller: &ImportBatchController) -> Vec<usize> {
    controller
        .batch()
        .map(|b| b.selected.iter().copied().collect())
        .unwrap_or_default()
}

pub async fn commit_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<CommitOutcome>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (id, shared) = find_import(&state, &session_id, &req_id)?;
    let outcome = drive(
        &shared,
        |c| c.commit(),
        |c, landed| c.commit_received(landed).cloned(),
    )
    .await
    .map_err(|e| AppError::from_import(e, req_id))?;
    state.close_import(id);
    info!(
        session = %id,
        imported = outcome.imported,
        failed = outcome.failures.len(),
        "import session committed"
    );
    Ok(Json(outcome))
}

pub async fn cancel_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (id, shared) = find_import(&state, &session_id, &req_id)?;
    shared
        .lock()
        .await
        .cancel()
        .map_err(|e| AppError::from_import(e, req_id))?;
    state.close_import(id);
    info!(session = %id, "import session cancelled");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(set_id): Path<String>,
    Json(draft): Json<QuestionDraft>,
) -> Result<(StatusCode, Json<QuestionRecord>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let editor = QuestionDraftEditor::from_draft(draft);
    let draft = editor.submit().map_err(|errors| {
        warn!(set = %set_id, errors = errors.len(), "manual question rejected");
        AppError::validation("question validation failed", req_id.clone())
            .with_details(errors.iter().map(ErrorDetail::from).collect())
    })?;
    let saved = state
        .store
        .save_question(&set_id, draft)
        .await
        .map_err(|e| AppError::from_import(e, req_id))?;
    info!(set = %set_id, question = %saved.id, "manual question saved");
    Ok((StatusCode::CREATED, Json(saved)))
}

#[derive(Debug, Serialize)]
pub struct QuestionListResponse {
    pub items: Vec<QuestionRecord>,
    pub total: usize,
}

pub async fn list_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(set_id): Path<String>,
) -> Result<Json<QuestionListResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let items = state
        .store
        .list_questions(&set_id)
        .await
        .map_err(|e| AppError::from_import(e, req_id))?;
    Ok(Json(QuestionListResponse {
        total: items.len(),
        items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ColumnMapper;
    use crate::state::InMemoryQuestionStore;
    use crate::tabular::{DecodedTable, TabularDecoder};
    use futures::future::BoxFuture;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct GatedDecoder {
        gate: Arc<Notify>,
    }

    impl TabularDecoder for GatedDecoder {
        fn read_headers(&self, _file: SourceFile) -> BoxFuture<'static, Result<Vec<String>, ImportError>> {
            let gate = self.gate.clone();
            Box::pin(async move {
                gate.notified().await;
                Ok(vec!["QSNo".to_string(), "eng-question".to_string()])
            })
        }

        fn read_table(&self, _file: SourceFile) -> BoxFuture<'static, Result<DecodedTable, ImportError>> {
            Box::pin(async { Err(ImportError::Decode("not used".into())) })
        }
    }

    #[tokio::test]
    async fn call_lands_after_the_caller_goes_away() {
        let gate = Arc::new(Notify::new());
        let state = AppState::new(
            Arc::new(InMemoryQuestionStore::new(None)),
            Arc::new(GatedDecoder { gate: gate.clone() }),
            Arc::new(ColumnMapper::default()),
        );
        let (_, shared) = state.open_import("set-1");

        let caller = {
            let shared = shared.clone();
            tokio::spawn(async move {
                drive(
                    &shared,
                    |c| c.request_columns(SourceFile::new("a.csv", b"x".to_vec())),
                    |c, landed| c.columns_received(landed),
                )
                .await
            })
        };
        while shared.lock().await.outstanding().is_none() {
            tokio::task::yield_now().await;
        }
        // the client disconnects while the decoder is still working
        caller.abort();
        gate.notify_one();

        tokio::time::timeout(Duration::from_secs(5), async {
            while shared.lock().await.outstanding().is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let controller = shared.lock().await;
        assert_eq!(controller.state(), ImportState::ColumnsPending);
        assert_eq!(controller.columns(), ["QSNo", "eng-question"]);
    }

    #[test]
    fn empty_file_name_is_reported_per_field() {
        let payload = StartImportPayload {
            file_name: String::new(),
            file_base64: "YQ==".into(),
        };
        let errors = payload.validate().unwrap_err();
        let details = validation_details(&errors);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].field, "file_name");
    }

    #[test]
    fn catalogue_lists_every_field() {
        let Json(list) = futures::executor::block_on(list_fields());
        assert_eq!(list.total, CanonicalFieldKey::all().len());
        let question = list
            .items
            .iter()
            .find(|f| f.key == CanonicalFieldKey::Question(Language::En))
            .unwrap();
        assert!(question.required);
        assert_eq!(question.default_header.as_deref(), Some("eng-question"));
    }
}
