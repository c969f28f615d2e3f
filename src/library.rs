use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::export::export_document;
use crate::find_replace::{find_matches, highlight_segments, Segment};
use crate::import::{import_template_manifest, upload_template_files, upload_template_folder};
use crate::models::{
    AppSettings, ApplyTemplatePayload, BooleanResponse, CreateDocumentPayload, CreateFolderPayload,
    CreateTemplatePayload, DocumentDetail, ExportPayload, ExportResponse, FindReplacePayload, FindReplaceResponse,
    FolderKind, FolderRow, LeafSummary, MoveFolderPayload, MoveLeafPayload, RenameDocumentPayload,
    RenameFolderPayload, SaveDocumentPayload, Selection, TemplateRecord, TreeSnapshot, UpdateTemplatePayload,
    UploadResponse, UploadTemplatesPayload,
};
use crate::tree::template_summary;
use crate::view::FolderView;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DB_FILE: &str = "folio.sqlite";
const EXPORT_DIR: &str = "exports";

/// Owns the store and the two folder views. Every mutation is persisted first
/// and then reloaded into the matching view without disturbing collapse flags.
pub struct Library {
    db: Arc<Database>,
    data_dir: PathBuf,
    documents: Mutex<FolderView>,
    templates: Mutex<FolderView>,
    selection: Mutex<Selection>,
}

impl Library {
    pub fn new(data_dir: PathBuf) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&data_dir.join(DB_FILE))?);
        if db.get_settings()?.seed_samples {
            if let Err(error) = db.seed_if_empty() {
                tracing::warn!(error = %error, "failed to seed sample library");
            }
        }

        let this = Arc::new(Self {
            db,
            data_dir,
            documents: Mutex::new(FolderView::new()),
            templates: Mutex::new(FolderView::new()),
            selection: Mutex::new(Selection::default()),
        });
        this.reload()?;
        Ok(this)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Full reload of both hierarchies. Collapse flags go back to defaults.
    pub fn reload(&self) -> AppResult<()> {
        let rows = self.db.list_folders(FolderKind::Document)?;
        let leaves = self.db.list_documents(None)?;
        self.view(FolderKind::Document)?.load(rows, leaves);

        let rows = self.db.list_folders(FolderKind::Template)?;
        let leaves = self.template_leaves()?;
        self.view(FolderKind::Template)?.load(rows, leaves);
        Ok(())
    }

    fn refresh(&self, kind: FolderKind) -> AppResult<()> {
        let rows = self.db.list_folders(kind)?;
        let leaves = match kind {
            FolderKind::Document => self.db.list_documents(None)?,
            FolderKind::Template => self.template_leaves()?,
        };
        self.view(kind)?.refresh(rows, leaves);
        Ok(())
    }

    fn template_leaves(&self) -> AppResult<Vec<LeafSummary>> {
        Ok(self.db.list_templates()?.iter().map(template_summary).collect())
    }

    fn view(&self, kind: FolderKind) -> AppResult<MutexGuard<'_, FolderView>> {
        let view = match kind {
            FolderKind::Document => &self.documents,
            FolderKind::Template => &self.templates,
        };
        view.lock()
            .map_err(|_| AppError::Internal("folder view mutex poisoned".to_string()))
    }

    fn selection_mut(&self) -> AppResult<MutexGuard<'_, Selection>> {
        self.selection
            .lock()
            .map_err(|_| AppError::Internal("selection mutex poisoned".to_string()))
    }

    fn settings(&self) -> AppSettings {
        match self.db.get_settings() {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(error = %error, "falling back to default settings");
                AppSettings::default()
            }
        }
    }

    // ─── Tree views ─────────────────────────────────────────────────────────

    pub fn snapshot(&self, kind: FolderKind) -> AppResult<TreeSnapshot> {
        let view = self.view(kind)?;
        Ok(TreeSnapshot {
            kind,
            tree: view.tree().to_vec(),
            root_leaves: view.root_leaves(),
            collapsed: view.collapsed_ids(),
        })
    }

    pub fn toggle_folder(&self, kind: FolderKind, id: i64) -> AppResult<bool> {
        let collapsed = self.view(kind)?.toggle(id);
        tracing::debug!(kind = kind.as_str(), folder_id = id, collapsed, "toggled folder");
        Ok(collapsed)
    }

    pub fn leaves_in(&self, kind: FolderKind, folder_id: i64) -> AppResult<Vec<LeafSummary>> {
        Ok(self.view(kind)?.leaves_in(folder_id))
    }

    pub fn selection(&self) -> AppResult<Selection> {
        Ok(*self.selection_mut()?)
    }

    pub fn select_folder(&self, folder_id: Option<i64>) -> AppResult<Selection> {
        if let Some(id) = folder_id {
            if self.view(FolderKind::Document)?.folder(id).is_none() {
                return Err(AppError::NotFound(format!("document folder {} not found", id)));
            }
        }
        let mut selection = self.selection_mut()?;
        selection.folder_id = folder_id;
        Ok(*selection)
    }

    // ─── Folders ────────────────────────────────────────────────────────────

    pub fn create_folder(&self, payload: CreateFolderPayload) -> AppResult<FolderRow> {
        let row = self.db.create_folder(payload.kind, &payload.name, payload.parent_id)?;
        self.refresh(payload.kind)?;
        tracing::info!(kind = payload.kind.as_str(), folder_id = row.id, "created folder");
        Ok(row)
    }

    pub fn rename_folder(&self, payload: RenameFolderPayload) -> AppResult<Option<FolderRow>> {
        let row = self.db.rename_folder(payload.kind, payload.id, &payload.name)?;
        self.refresh(payload.kind)?;
        Ok(row)
    }

    pub fn move_folder(&self, payload: MoveFolderPayload) -> AppResult<Option<FolderRow>> {
        let row = self.db.move_folder(payload.kind, payload.id, payload.parent_id)?;
        self.refresh(payload.kind)?;
        tracing::info!(kind = payload.kind.as_str(), folder_id = payload.id, parent_id = ?payload.parent_id, "moved folder");
        Ok(row)
    }

    /// Removing an unknown folder is a successful no-op.
    pub fn delete_folder(&self, kind: FolderKind, id: i64) -> AppResult<BooleanResponse> {
        let removed = self.db.delete_folder(kind, id)?;
        if kind == FolderKind::Document {
            let mut selection = self.selection_mut()?;
            if selection.folder_id.is_some_and(|selected| removed.contains(&selected)) {
                selection.folder_id = None;
            }
        }
        self.refresh(kind)?;
        tracing::info!(kind = kind.as_str(), folder_id = id, removed = removed.len(), "deleted folder");
        Ok(BooleanResponse { success: true })
    }

    // ─── Documents ──────────────────────────────────────────────────────────

    pub fn list_documents(&self, folder_id: Option<i64>) -> AppResult<Vec<LeafSummary>> {
        self.db.list_documents(folder_id)
    }

    pub fn get_document(&self, id: i64) -> AppResult<Option<DocumentDetail>> {
        self.db.get_document(id)
    }

    /// Loads the document and makes it the active one.
    pub fn open_document(&self, id: i64) -> AppResult<Option<DocumentDetail>> {
        let document = self.db.get_document(id)?;
        if let Some(document) = &document {
            let mut selection = self.selection_mut()?;
            selection.document_id = Some(document.id);
            selection.folder_id = document.folder_id;
        }
        Ok(document)
    }

    pub fn create_document(&self, payload: CreateDocumentPayload) -> AppResult<DocumentDetail> {
        let title = if payload.title.trim().is_empty() {
            self.settings().default_document_title
        } else {
            payload.title
        };
        let document = self
            .db
            .create_document(payload.folder_id, &title, payload.content.as_deref().unwrap_or_default())?;
        self.refresh(FolderKind::Document)?;
        self.selection_mut()?.document_id = Some(document.id);
        tracing::info!(document_id = document.id, "created document");
        Ok(document)
    }

    pub fn save_document(&self, payload: SaveDocumentPayload) -> AppResult<Option<DocumentDetail>> {
        let document = self.db.save_document(payload.id, &payload.title, &payload.content)?;
        self.refresh(FolderKind::Document)?;
        Ok(document)
    }

    /// Saves editor content into whichever document is active. Returns `None`
    /// when nothing is open.
    pub fn save_active(&self, title: &str, content: &str) -> AppResult<Option<DocumentDetail>> {
        let Some(id) = self.selection()?.document_id else {
            return Ok(None);
        };
        self.save_document(SaveDocumentPayload {
            id,
            title: title.to_string(),
            content: content.to_string(),
        })
    }

    pub fn rename_document(&self, payload: RenameDocumentPayload) -> AppResult<Option<DocumentDetail>> {
        let document = self.db.rename_document(payload.id, &payload.title)?;
        self.refresh(FolderKind::Document)?;
        Ok(document)
    }

    pub fn move_document(&self, payload: MoveLeafPayload) -> AppResult<Option<DocumentDetail>> {
        let document = self.db.move_document(payload.id, payload.folder_id)?;
        self.refresh(FolderKind::Document)?;
        Ok(document)
    }

    pub fn duplicate_document(&self, id: i64) -> AppResult<Option<DocumentDetail>> {
        let document = self.db.duplicate_document(id, &self.settings().copy_suffix)?;
        self.refresh(FolderKind::Document)?;
        Ok(document)
    }

    pub fn delete_document(&self, id: i64) -> AppResult<BooleanResponse> {
        self.db.delete_document(id)?;
        {
            let mut selection = self.selection_mut()?;
            if selection.document_id == Some(id) {
                selection.document_id = None;
            }
        }
        self.refresh(FolderKind::Document)?;
        tracing::info!(document_id = id, "deleted document");
        Ok(BooleanResponse { success: true })
    }

    // ─── Find / replace ─────────────────────────────────────────────────────

    pub fn find_replace(&self, payload: FindReplacePayload) -> AppResult<FindReplaceResponse> {
        let updated = self.db.find_replace(&payload.query, &payload.replace, payload.folder_id)?;
        if updated > 0 {
            self.refresh(FolderKind::Document)?;
        }
        tracing::info!(updated, folder_id = ?payload.folder_id, "find/replace finished");
        Ok(FindReplaceResponse { updated })
    }

    /// Documents a search would touch, based on titles and snippets.
    pub fn preview_matches(&self, query: &str) -> AppResult<Vec<LeafSummary>> {
        Ok(find_matches(self.view(FolderKind::Document)?.leaves(), query))
    }

    pub fn highlight(&self, text: &str, query: &str) -> Vec<Segment> {
        highlight_segments(text, query)
    }

    // ─── Templates ──────────────────────────────────────────────────────────

    pub fn list_templates(&self) -> AppResult<Vec<TemplateRecord>> {
        self.db.list_templates()
    }

    pub fn recent_templates(&self) -> AppResult<Vec<TemplateRecord>> {
        self.db.recent_templates(self.settings().recent_templates_limit)
    }

    pub fn get_template(&self, id: i64) -> AppResult<Option<TemplateRecord>> {
        self.db.get_template(id)
    }

    pub fn create_template(&self, payload: CreateTemplatePayload) -> AppResult<TemplateRecord> {
        let name = if payload.name.trim().is_empty() {
            self.settings().default_template_name
        } else {
            payload.name
        };
        let template = self.db.create_template(&name, &payload.content, payload.folder_id)?;
        self.refresh(FolderKind::Template)?;
        tracing::info!(template_id = template.id, "created template");
        Ok(template)
    }

    pub fn update_template(&self, payload: UpdateTemplatePayload) -> AppResult<Option<TemplateRecord>> {
        let template = self
            .db
            .update_template(payload.id, &payload.name, &payload.content, payload.folder_id)?;
        self.refresh(FolderKind::Template)?;
        Ok(template)
    }

    pub fn move_template(&self, payload: MoveLeafPayload) -> AppResult<Option<TemplateRecord>> {
        let template = self.db.move_template(payload.id, payload.folder_id)?;
        self.refresh(FolderKind::Template)?;
        Ok(template)
    }

    pub fn duplicate_template(&self, id: i64) -> AppResult<Option<TemplateRecord>> {
        let template = self.db.duplicate_template(id, &self.settings().copy_suffix)?;
        self.refresh(FolderKind::Template)?;
        Ok(template)
    }

    pub fn delete_template(&self, id: i64) -> AppResult<BooleanResponse> {
        self.db.delete_template(id)?;
        self.refresh(FolderKind::Template)?;
        tracing::info!(template_id = id, "deleted template");
        Ok(BooleanResponse { success: true })
    }

    pub fn apply_template(&self, payload: ApplyTemplatePayload) -> AppResult<Option<DocumentDetail>> {
        let document = self.db.apply_template(payload.template_id, payload.doc_id)?;
        self.refresh(FolderKind::Document)?;
        self.refresh(FolderKind::Template)?;
        Ok(document)
    }

    pub fn create_document_from_template(
        &self,
        template_id: i64,
        folder_id: Option<i64>,
    ) -> AppResult<Option<DocumentDetail>> {
        let document = self.db.create_document_from_template(template_id, folder_id, None)?;
        if let Some(document) = &document {
            self.selection_mut()?.document_id = Some(document.id);
        }
        self.refresh(FolderKind::Document)?;
        self.refresh(FolderKind::Template)?;
        Ok(document)
    }

    pub fn upload_templates(&self, payload: UploadTemplatesPayload) -> AppResult<UploadResponse> {
        let paths: Vec<PathBuf> = payload.paths.iter().map(PathBuf::from).collect();
        let result = upload_template_files(&self.db, &paths, payload.folder_id);
        self.refresh(FolderKind::Template)?;
        result
    }

    pub fn upload_template_folder(&self, root: &Path, folder_id: Option<i64>) -> AppResult<UploadResponse> {
        let result = upload_template_folder(&self.db, root, folder_id);
        self.refresh(FolderKind::Template)?;
        result
    }

    pub fn import_templates(&self, manifest: &Path) -> AppResult<usize> {
        let imported = import_template_manifest(&self.db, manifest)?;
        self.refresh(FolderKind::Template)?;
        Ok(imported)
    }

    // ─── Export / settings ──────────────────────────────────────────────────

    pub fn export(&self, payload: ExportPayload) -> AppResult<ExportResponse> {
        let target = match payload.target_path {
            Some(path) => PathBuf::from(path),
            None => {
                let dir = self
                    .settings()
                    .export_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.data_dir.join(EXPORT_DIR));
                dir.join(file_stem_for(&payload.title))
            }
        };
        let path = export_document(&payload.title, &payload.content, payload.format, &target)?;
        Ok(ExportResponse {
            path: path.to_string_lossy().to_string(),
        })
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        self.db.update_settings(update)
    }
}

fn file_stem_for(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExportFormat;

    fn open() -> (tempfile::TempDir, Arc<Library>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = Library::new(dir.path().to_path_buf()).expect("library");
        (dir, library)
    }

    #[test]
    fn new_library_is_seeded_and_collapsed() {
        let (_dir, library) = open();
        let snapshot = library.snapshot(FolderKind::Document).expect("snapshot");
        assert!(!snapshot.tree.is_empty());
        assert!(!snapshot.collapsed.is_empty());
        assert_eq!(snapshot.root_leaves.len(), 1);
    }

    #[test]
    fn mutations_keep_collapse_choices() {
        let (_dir, library) = open();
        let folder = library
            .create_folder(CreateFolderPayload {
                kind: FolderKind::Document,
                name: "Inbox".to_string(),
                parent_id: None,
            })
            .expect("folder");
        library
            .create_document(CreateDocumentPayload {
                folder_id: Some(folder.id),
                title: "first".to_string(),
                content: None,
            })
            .expect("doc");

        let before = library.snapshot(FolderKind::Document).expect("snapshot");
        assert!(!before.collapsed.contains(&folder.id));

        assert!(library.toggle_folder(FolderKind::Document, folder.id).expect("toggle"));
        library
            .create_document(CreateDocumentPayload {
                folder_id: Some(folder.id),
                title: "second".to_string(),
                content: None,
            })
            .expect("doc");
        let after = library.snapshot(FolderKind::Document).expect("snapshot");
        assert!(after.collapsed.contains(&folder.id));
        assert_eq!(library.leaves_in(FolderKind::Document, folder.id).expect("leaves").len(), 2);
    }

    #[test]
    fn deleting_selected_folder_clears_selection() {
        let (_dir, library) = open();
        let folder = library
            .create_folder(CreateFolderPayload {
                kind: FolderKind::Document,
                name: "Temp".to_string(),
                parent_id: None,
            })
            .expect("folder");
        library.select_folder(Some(folder.id)).expect("select");
        library.delete_folder(FolderKind::Document, folder.id).expect("delete");
        assert_eq!(library.selection().expect("selection").folder_id, None);
        assert!(library.delete_folder(FolderKind::Document, folder.id).expect("again").success);
        assert!(library.select_folder(Some(folder.id)).is_err());
    }

    #[test]
    fn blank_titles_fall_back_to_settings() {
        let (_dir, library) = open();
        let document = library
            .create_document(CreateDocumentPayload {
                folder_id: None,
                title: "  ".to_string(),
                content: None,
            })
            .expect("doc");
        assert_eq!(document.title, "Untitled document");
        assert_eq!(library.selection().expect("selection").document_id, Some(document.id));

        let saved = library.save_active("Renamed", "<p>x</p>").expect("save").expect("active");
        assert_eq!(saved.title, "Renamed");
    }

    #[test]
    fn export_defaults_to_the_exports_directory() {
        let (dir, library) = open();
        let response = library
            .export(ExportPayload {
                title: "Q3: plan".to_string(),
                content: "<p>hi</p>".to_string(),
                format: ExportFormat::Html,
                target_path: None,
            })
            .expect("export");
        let expected = dir.path().join("exports").join("Q3_ plan.html");
        assert_eq!(PathBuf::from(response.path), expected);
        assert!(expected.exists());
    }
}
