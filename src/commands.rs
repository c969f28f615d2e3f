//! Client-facing calls. Each one forwards to [`Library`] and flattens any
//! failure into a single display string for the notification surface.

use crate::find_replace::Segment;
use crate::library::Library;
use crate::models::{
    AppSettings, ApplyTemplatePayload, BooleanResponse, CreateDocumentPayload, CreateFolderPayload,
    CreateTemplatePayload, DocumentDetail, ExportPayload, ExportResponse, FindReplacePayload, FindReplaceResponse,
    FolderKind, FolderRow, LeafSummary, MoveFolderPayload, MoveLeafPayload, RenameDocumentPayload,
    RenameFolderPayload, SaveDocumentPayload, Selection, TemplateRecord, TreeSnapshot, UpdateTemplatePayload,
    UploadResponse, UploadTemplatesPayload,
};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub library: Arc<Library>,
}

impl AppState {
    pub fn new(library: Arc<Library>) -> Self {
        Self { library }
    }
}

pub fn get_tree(state: &AppState, kind: FolderKind) -> Result<TreeSnapshot, String> {
    state.library.snapshot(kind).map_err(to_client_error)
}

pub fn toggle_folder(state: &AppState, kind: FolderKind, id: i64) -> Result<bool, String> {
    state.library.toggle_folder(kind, id).map_err(to_client_error)
}

pub fn select_folder(state: &AppState, folder_id: Option<i64>) -> Result<Selection, String> {
    state.library.select_folder(folder_id).map_err(to_client_error)
}

pub fn create_folder(state: &AppState, payload: CreateFolderPayload) -> Result<FolderRow, String> {
    state.library.create_folder(payload).map_err(to_client_error)
}

pub fn rename_folder(state: &AppState, payload: RenameFolderPayload) -> Result<Option<FolderRow>, String> {
    state.library.rename_folder(payload).map_err(to_client_error)
}

pub fn move_folder(state: &AppState, payload: MoveFolderPayload) -> Result<Option<FolderRow>, String> {
    state.library.move_folder(payload).map_err(to_client_error)
}

pub fn delete_folder(state: &AppState, kind: FolderKind, id: i64) -> Result<BooleanResponse, String> {
    state.library.delete_folder(kind, id).map_err(to_client_error)
}

pub fn list_documents(state: &AppState, folder_id: Option<i64>) -> Result<Vec<LeafSummary>, String> {
    state.library.list_documents(folder_id).map_err(to_client_error)
}

pub fn get_document(state: &AppState, id: i64) -> Result<Option<DocumentDetail>, String> {
    state.library.get_document(id).map_err(to_client_error)
}

pub fn open_document(state: &AppState, id: i64) -> Result<Option<DocumentDetail>, String> {
    state.library.open_document(id).map_err(to_client_error)
}

pub fn create_document(state: &AppState, payload: CreateDocumentPayload) -> Result<DocumentDetail, String> {
    state.library.create_document(payload).map_err(to_client_error)
}

pub fn save_document(state: &AppState, payload: SaveDocumentPayload) -> Result<Option<DocumentDetail>, String> {
    state.library.save_document(payload).map_err(to_client_error)
}

pub fn rename_document(state: &AppState, payload: RenameDocumentPayload) -> Result<Option<DocumentDetail>, String> {
    state.library.rename_document(payload).map_err(to_client_error)
}

pub fn move_document(state: &AppState, payload: MoveLeafPayload) -> Result<Option<DocumentDetail>, String> {
    state.library.move_document(payload).map_err(to_client_error)
}

pub fn duplicate_document(state: &AppState, id: i64) -> Result<Option<DocumentDetail>, String> {
    state.library.duplicate_document(id).map_err(to_client_error)
}

pub fn delete_document(state: &AppState, id: i64) -> Result<BooleanResponse, String> {
    state.library.delete_document(id).map_err(to_client_error)
}

pub fn find_replace(state: &AppState, payload: FindReplacePayload) -> Result<FindReplaceResponse, String> {
    state.library.find_replace(payload).map_err(to_client_error)
}

pub fn preview_matches(state: &AppState, query: &str) -> Result<Vec<LeafSummary>, String> {
    state.library.preview_matches(query).map_err(to_client_error)
}

pub fn highlight(state: &AppState, text: &str, query: &str) -> Vec<Segment> {
    state.library.highlight(text, query)
}

pub fn list_templates(state: &AppState) -> Result<Vec<TemplateRecord>, String> {
    state.library.list_templates().map_err(to_client_error)
}

pub fn recent_templates(state: &AppState) -> Result<Vec<TemplateRecord>, String> {
    state.library.recent_templates().map_err(to_client_error)
}

pub fn get_template(state: &AppState, id: i64) -> Result<Option<TemplateRecord>, String> {
    state.library.get_template(id).map_err(to_client_error)
}

pub fn create_template(state: &AppState, payload: CreateTemplatePayload) -> Result<TemplateRecord, String> {
    state.library.create_template(payload).map_err(to_client_error)
}

pub fn update_template(state: &AppState, payload: UpdateTemplatePayload) -> Result<Option<TemplateRecord>, String> {
    state.library.update_template(payload).map_err(to_client_error)
}

pub fn move_template(state: &AppState, payload: MoveLeafPayload) -> Result<Option<TemplateRecord>, String> {
    state.library.move_template(payload).map_err(to_client_error)
}

pub fn duplicate_template(state: &AppState, id: i64) -> Result<Option<TemplateRecord>, String> {
    state.library.duplicate_template(id).map_err(to_client_error)
}

pub fn delete_template(state: &AppState, id: i64) -> Result<BooleanResponse, String> {
    state.library.delete_template(id).map_err(to_client_error)
}

pub fn apply_template(state: &AppState, payload: ApplyTemplatePayload) -> Result<Option<DocumentDetail>, String> {
    state.library.apply_template(payload).map_err(to_client_error)
}

pub fn create_document_from_template(
    state: &AppState,
    template_id: i64,
    folder_id: Option<i64>,
) -> Result<Option<DocumentDetail>, String> {
    state
        .library
        .create_document_from_template(template_id, folder_id)
        .map_err(to_client_error)
}

pub fn upload_templates(state: &AppState, payload: UploadTemplatesPayload) -> Result<UploadResponse, String> {
    state.library.upload_templates(payload).map_err(to_client_error)
}

pub fn upload_template_folder(state: &AppState, root: &Path, folder_id: Option<i64>) -> Result<UploadResponse, String> {
    state
        .library
        .upload_template_folder(root, folder_id)
        .map_err(to_client_error)
}

pub fn import_templates(state: &AppState, manifest: &Path) -> Result<usize, String> {
    state.library.import_templates(manifest).map_err(to_client_error)
}

pub fn export_document(state: &AppState, payload: ExportPayload) -> Result<ExportResponse, String> {
    state.library.export(payload).map_err(to_client_error)
}

pub fn get_settings(state: &AppState) -> Result<AppSettings, String> {
    state.library.get_settings().map_err(to_client_error)
}

pub fn update_settings(state: &AppState, update: serde_json::Value) -> Result<AppSettings, String> {
    state.library.update_settings(update).map_err(to_client_error)
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    let message = error.to_string();
    tracing::warn!(error = %message, "command failed");
    message
}
