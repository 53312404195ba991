pub mod batch;
pub mod editor;
pub mod error;
pub mod handlers;
pub mod mapping;
pub mod models;
pub mod options;
pub mod routes;
pub mod rows;
pub mod state;
pub mod tabular;

use std::sync::Arc;
use std::time::Duration;

pub fn build_state() -> anyhow::Result<state::AppState> {
    let local_state_path = std::env::var("LOCAL_STATE_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty());
    let max_rows = match std::env::var("IMPORT_MAX_ROWS") {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<usize>()?,
        _ => tabular::DEFAULT_MAX_ROWS,
    };
    let store: Arc<dyn state::QuestionStore> =
        Arc::new(state::InMemoryQuestionStore::new(local_state_path.as_deref()));
    let decoder: Arc<dyn tabular::TabularDecoder> = Arc::new(tabular::CsvDecoder::new(max_rows));
    Ok(state::AppState::new(
        store,
        decoder,
        Arc::new(mapping::ColumnMapper::default()),
    ))
}

pub fn import_idle_timeout() -> anyhow::Result<Duration> {
    match std::env::var("IMPORT_IDLE_SECS") {
        Ok(raw) if !raw.trim().is_empty() => Ok(Duration::from_secs(raw.trim().parse::<u64>()?)),
        _ => Ok(state::DEFAULT_IMPORT_IDLE),
    }
}
