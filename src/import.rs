use crate::convert::{convert_file, is_supported};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{FolderKind, TemplateImportItem, UploadResponse};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Creates one template per supported file, named after the file stem.
/// Processing stops at the first failure; templates created before it stay.
pub fn upload_template_files(db: &Database, paths: &[PathBuf], folder_id: Option<i64>) -> AppResult<UploadResponse> {
    let mut response = UploadResponse::default();
    for path in paths {
        if create_from_file(db, path, folder_id)? {
            response.templates_created += 1;
        } else {
            response.skipped += 1;
        }
    }
    tracing::info!(
        created = response.templates_created,
        skipped = response.skipped,
        "uploaded template files"
    );
    Ok(response)
}

/// Mirrors a directory tree into template folders under `folder_id`.
/// Existing folders with the same parent and name are reused.
pub fn upload_template_folder(db: &Database, root: &Path, folder_id: Option<i64>) -> AppResult<UploadResponse> {
    if !root.is_dir() {
        return Err(AppError::Validation(format!("{} is not a directory", root.display())));
    }
    let mut folders = FolderIndex::load(db)?;
    let mut response = UploadResponse::default();
    let root_id = folders.ensure(db, folder_id, &dir_name(root), &mut response)?;
    walk(db, root, root_id, &mut folders, &mut response)?;
    tracing::info!(
        root = %root.display(),
        created = response.templates_created,
        folders = response.folders_created,
        skipped = response.skipped,
        "uploaded template folder"
    );
    Ok(response)
}

/// Bulk import from a `.json` or `.yaml`/`.yml` list of `{name, content}`.
pub fn import_template_manifest(db: &Database, path: &Path) -> AppResult<usize> {
    let raw = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let items: Vec<TemplateImportItem> = match ext.as_str() {
        "json" => serde_json::from_str(&raw).map_err(|error| AppError::Conversion(error.to_string()))?,
        "yaml" | "yml" => serde_yaml::from_str(&raw)?,
        other => {
            return Err(AppError::Validation(format!(
                "unsupported manifest format '{}'",
                other
            )))
        }
    };
    let imported = db.import_templates(&items)?;
    tracing::info!(path = %path.display(), imported, "imported template manifest");
    Ok(imported)
}

fn walk(
    db: &Database,
    dir: &Path,
    folder_id: i64,
    folders: &mut FolderIndex,
    response: &mut UploadResponse,
) -> AppResult<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            let child_id = folders.ensure(db, Some(folder_id), &dir_name(&path), response)?;
            walk(db, &path, child_id, folders, response)?;
        } else if create_from_file(db, &path, Some(folder_id))? {
            response.templates_created += 1;
        } else {
            response.skipped += 1;
        }
    }
    Ok(())
}

fn create_from_file(db: &Database, path: &Path, folder_id: Option<i64>) -> AppResult<bool> {
    if !is_supported(path) {
        return Ok(false);
    }
    let Some(html) = convert_file(path)? else {
        return Ok(false);
    };
    if html.trim().is_empty() {
        return Ok(false);
    }
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().trim().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    db.create_template(&name, &html, folder_id)?;
    Ok(true)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Imported".to_string())
}

struct FolderIndex {
    by_parent_and_name: HashMap<(Option<i64>, String), i64>,
}

impl FolderIndex {
    fn load(db: &Database) -> AppResult<Self> {
        let by_parent_and_name = db
            .list_folders(FolderKind::Template)?
            .into_iter()
            .map(|row| ((row.parent_id, row.name), row.id))
            .collect();
        Ok(Self { by_parent_and_name })
    }

    fn ensure(
        &mut self,
        db: &Database,
        parent_id: Option<i64>,
        name: &str,
        response: &mut UploadResponse,
    ) -> AppResult<i64> {
        let key = (parent_id, name.trim().to_string());
        if let Some(id) = self.by_parent_and_name.get(&key) {
            return Ok(*id);
        }
        let row = db.create_folder(FolderKind::Template, name, parent_id)?;
        response.folders_created += 1;
        self.by_parent_and_name.insert(key, row.id);
        Ok(row.id)
    }
}
