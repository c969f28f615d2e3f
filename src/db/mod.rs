use crate::errors::{AppError, AppResult};
use crate::find_replace;
use crate::models::{
    AppSettings, DocumentDetail, FolderKind, FolderRow, LeafSummary, TemplateImportItem, TemplateRecord,
};
use crate::tree::document_summary;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

const DOCUMENT_COLUMNS: &str = "id, folder_id, title, content, created_at, updated_at";
const TEMPLATE_COLUMNS: &str = "id, folder_id, name, content, updated_at, usage_count, last_used_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock_conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Folders ────────────────────────────────────────────────────────────

    pub fn list_folders(&self, kind: FolderKind) -> AppResult<Vec<FolderRow>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, parent_id, sort_order FROM {} ORDER BY sort_order ASC, id ASC",
            kind.folder_table()
        ))?;
        let rows = stmt
            .query_map([], parse_folder_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_folder(&self, kind: FolderKind, id: i64) -> AppResult<Option<FolderRow>> {
        let conn = self.lock_conn()?;
        fetch_folder(&conn, kind, id)
    }

    pub fn create_folder(&self, kind: FolderKind, name: &str, parent_id: Option<i64>) -> AppResult<FolderRow> {
        let name = normalize_name(name, "folder name")?;
        let conn = self.lock_conn()?;
        if let Some(parent_id) = parent_id {
            ensure_folder_exists(&conn, kind, parent_id)?;
        }
        let sort_order = Utc::now().timestamp_millis();
        conn.execute(
            &format!(
                "INSERT INTO {} (name, parent_id, sort_order, created_at) VALUES (?1, ?2, ?3, ?4)",
                kind.folder_table()
            ),
            params![name, parent_id, sort_order, format_time(Utc::now())],
        )?;
        Ok(FolderRow {
            id: conn.last_insert_rowid(),
            name,
            parent_id,
            sort_order,
        })
    }

    pub fn rename_folder(&self, kind: FolderKind, id: i64, name: &str) -> AppResult<Option<FolderRow>> {
        let name = normalize_name(name, "folder name")?;
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            &format!("UPDATE {} SET name = ?1 WHERE id = ?2", kind.folder_table()),
            params![name, id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_folder(&conn, kind, id)
    }

    /// Re-parents a folder and places it after its new siblings. Moving a
    /// folder under itself or one of its descendants is rejected.
    pub fn move_folder(&self, kind: FolderKind, id: i64, parent_id: Option<i64>) -> AppResult<Option<FolderRow>> {
        let conn = self.lock_conn()?;
        if fetch_folder(&conn, kind, id)?.is_none() {
            return Ok(None);
        }
        if let Some(parent_id) = parent_id {
            ensure_folder_exists(&conn, kind, parent_id)?;
            if subtree_ids(&conn, kind, id)?.contains(&parent_id) {
                return Err(AppError::Validation(format!(
                    "Folder {} cannot be moved into its own subtree",
                    id
                )));
            }
        }
        conn.execute(
            &format!(
                "UPDATE {} SET parent_id = ?1, sort_order = ?2 WHERE id = ?3",
                kind.folder_table()
            ),
            params![parent_id, Utc::now().timestamp_millis(), id],
        )?;
        fetch_folder(&conn, kind, id)
    }

    /// Deletes the folder and its whole subtree. Leaves filed anywhere in the
    /// subtree are detached to the root, never deleted. Returns the removed
    /// folder ids; an unknown id removes nothing.
    pub fn delete_folder(&self, kind: FolderKind, id: i64) -> AppResult<Vec<i64>> {
        let mut conn = self.lock_conn()?;
        let removed = subtree_ids(&conn, kind, id)?;
        if removed.is_empty() {
            return Ok(removed);
        }

        let tx = conn.transaction()?;
        for folder_id in removed.iter().rev() {
            tx.execute(
                &format!("UPDATE {} SET folder_id = NULL WHERE folder_id = ?1", kind.leaf_table()),
                [folder_id],
            )?;
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", kind.folder_table()),
                [folder_id],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    // ─── Documents ──────────────────────────────────────────────────────────

    pub fn list_documents(&self, scope: Option<i64>) -> AppResult<Vec<LeafSummary>> {
        Ok(self
            .list_document_details(scope)?
            .iter()
            .map(document_summary)
            .collect())
    }

    pub fn list_document_details(&self, scope: Option<i64>) -> AppResult<Vec<DocumentDetail>> {
        let conn = self.lock_conn()?;
        load_documents(&conn, scope)
    }

    pub fn get_document(&self, id: i64) -> AppResult<Option<DocumentDetail>> {
        let conn = self.lock_conn()?;
        fetch_document(&conn, id)
    }

    pub fn create_document(&self, folder_id: Option<i64>, title: &str, content: &str) -> AppResult<DocumentDetail> {
        let title = normalize_name(title, "document title")?;
        let conn = self.lock_conn()?;
        if let Some(folder_id) = folder_id {
            ensure_folder_exists(&conn, FolderKind::Document, folder_id)?;
        }
        let now = stored_now();
        conn.execute(
            "INSERT INTO documents (folder_id, title, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![folder_id, title, content, format_time(now)],
        )?;
        Ok(DocumentDetail {
            id: conn.last_insert_rowid(),
            folder_id,
            title,
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn save_document(&self, id: i64, title: &str, content: &str) -> AppResult<Option<DocumentDetail>> {
        let title = normalize_name(title, "document title")?;
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE documents SET title = ?1, content = ?2, updated_at = ?3 WHERE id = ?4",
            params![title, content, format_time(Utc::now()), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_document(&conn, id)
    }

    pub fn rename_document(&self, id: i64, title: &str) -> AppResult<Option<DocumentDetail>> {
        let title = normalize_name(title, "document title")?;
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE documents SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, format_time(Utc::now()), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_document(&conn, id)
    }

    pub fn move_document(&self, id: i64, folder_id: Option<i64>) -> AppResult<Option<DocumentDetail>> {
        let conn = self.lock_conn()?;
        if let Some(folder_id) = folder_id {
            ensure_folder_exists(&conn, FolderKind::Document, folder_id)?;
        }
        let changed = conn.execute(
            "UPDATE documents SET folder_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![folder_id, format_time(Utc::now()), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_document(&conn, id)
    }

    pub fn duplicate_document(&self, id: i64, suffix: &str) -> AppResult<Option<DocumentDetail>> {
        let Some(source) = self.get_document(id)? else {
            return Ok(None);
        };
        let title = format!("{}{}", source.title, suffix);
        self.create_document(source.folder_id, &title, &source.content).map(Some)
    }

    pub fn delete_document(&self, id: i64) -> AppResult<bool> {
        let conn = self.lock_conn()?;
        let changed = conn.execute("DELETE FROM documents WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// Literal find/replace over the documents in `scope`, committed as one
    /// transaction. Returns how many documents changed.
    pub fn find_replace(&self, query: &str, replacement: &str, scope: Option<i64>) -> AppResult<usize> {
        if query.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock_conn()?;
        let docs = load_documents(&conn, scope)?;
        let outcome = find_replace::find_replace(&docs, query, replacement, scope);
        if outcome.count() == 0 {
            return Ok(0);
        }

        let now = format_time(Utc::now());
        let tx = conn.transaction()?;
        for doc in &outcome.updated {
            tx.execute(
                "UPDATE documents SET title = ?1, content = ?2, updated_at = ?3 WHERE id = ?4",
                params![doc.title, doc.content, now, doc.id],
            )?;
        }
        tx.commit()?;
        Ok(outcome.count())
    }

    // ─── Templates ──────────────────────────────────────────────────────────

    pub fn list_templates(&self) -> AppResult<Vec<TemplateRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM templates ORDER BY updated_at DESC, id DESC",
            TEMPLATE_COLUMNS
        ))?;
        let templates = stmt
            .query_map([], parse_template_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(templates)
    }

    /// Most recently used first; never-used templates fall back to their
    /// last update.
    pub fn recent_templates(&self, limit: u32) -> AppResult<Vec<TemplateRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM templates
             ORDER BY COALESCE(last_used_at, updated_at) DESC, id DESC
             LIMIT ?1",
            TEMPLATE_COLUMNS
        ))?;
        let templates = stmt
            .query_map([limit], parse_template_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(templates)
    }

    pub fn get_template(&self, id: i64) -> AppResult<Option<TemplateRecord>> {
        let conn = self.lock_conn()?;
        fetch_template(&conn, id)
    }

    pub fn create_template(&self, name: &str, content: &str, folder_id: Option<i64>) -> AppResult<TemplateRecord> {
        let name = normalize_name(name, "template name")?;
        let conn = self.lock_conn()?;
        insert_template(&conn, &name, content, folder_id)
    }

    pub fn update_template(
        &self,
        id: i64,
        name: &str,
        content: &str,
        folder_id: Option<i64>,
    ) -> AppResult<Option<TemplateRecord>> {
        let name = normalize_name(name, "template name")?;
        let conn = self.lock_conn()?;
        if let Some(folder_id) = folder_id {
            ensure_folder_exists(&conn, FolderKind::Template, folder_id)?;
        }
        let changed = conn.execute(
            "UPDATE templates SET name = ?1, content = ?2, folder_id = ?3, updated_at = ?4 WHERE id = ?5",
            params![name, content, folder_id, format_time(Utc::now()), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_template(&conn, id)
    }

    pub fn move_template(&self, id: i64, folder_id: Option<i64>) -> AppResult<Option<TemplateRecord>> {
        let conn = self.lock_conn()?;
        if let Some(folder_id) = folder_id {
            ensure_folder_exists(&conn, FolderKind::Template, folder_id)?;
        }
        let changed = conn.execute(
            "UPDATE templates SET folder_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![folder_id, format_time(Utc::now()), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_template(&conn, id)
    }

    pub fn duplicate_template(&self, id: i64, suffix: &str) -> AppResult<Option<TemplateRecord>> {
        let conn = self.lock_conn()?;
        let Some(source) = fetch_template(&conn, id)? else {
            return Ok(None);
        };
        let name = format!("{}{}", source.name, suffix);
        insert_template(&conn, &name, &source.content, source.folder_id).map(Some)
    }

    pub fn delete_template(&self, id: i64) -> AppResult<bool> {
        let conn = self.lock_conn()?;
        let changed = conn.execute("DELETE FROM templates WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    pub fn record_template_use(&self, id: i64) -> AppResult<bool> {
        let conn = self.lock_conn()?;
        let changed = mark_template_used(&conn, id)?;
        Ok(changed)
    }

    /// Copies the template body into the document and counts the use. Nothing
    /// changes when either side is missing.
    pub fn apply_template(&self, template_id: i64, doc_id: i64) -> AppResult<Option<DocumentDetail>> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let Some(template) = fetch_template(&tx, template_id)? else {
            return Ok(None);
        };
        let changed = tx.execute(
            "UPDATE documents SET content = ?1, updated_at = ?2 WHERE id = ?3",
            params![template.content, format_time(Utc::now()), doc_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        mark_template_used(&tx, template_id)?;
        let document = fetch_document(&tx, doc_id)?;
        tx.commit()?;
        Ok(document)
    }

    /// New document titled `<template name>-<date>` unless a title is given.
    pub fn create_document_from_template(
        &self,
        template_id: i64,
        folder_id: Option<i64>,
        title: Option<&str>,
    ) -> AppResult<Option<DocumentDetail>> {
        let Some(template) = self.get_template(template_id)? else {
            return Ok(None);
        };
        let title = match title.map(str::trim).filter(|value| !value.is_empty()) {
            Some(title) => title.to_string(),
            None => format!("{}-{}", template.name, Utc::now().format("%Y-%m-%d")),
        };
        let document = self.create_document(folder_id, &title, &template.content)?;
        self.record_template_use(template_id)?;
        Ok(Some(document))
    }

    pub fn import_templates(&self, items: &[TemplateImportItem]) -> AppResult<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        for item in items {
            let name = normalize_name(&item.name, "template name")?;
            insert_template(&tx, &name, &item.content, item.folder_id)?;
        }
        tx.commit()?;
        Ok(items.len())
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.lock_conn()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_default()),
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)?;

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, format_time(Utc::now())],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
            params![
                serde_json::to_string(&AppSettings::default())?,
                format_time(Utc::now())
            ],
        )?;
        Ok(())
    }

    /// Fills a brand-new store with a small sample library. Returns `false`
    /// when any document folder already exists.
    pub fn seed_if_empty(&self) -> AppResult<bool> {
        let mut conn = self.lock_conn()?;
        let folder_count: i64 = conn.query_row("SELECT COUNT(1) FROM folders", [], |row| row.get(0))?;
        if folder_count > 0 {
            return Ok(false);
        }

        let tx = conn.transaction()?;
        let now = format_time(Utc::now());
        let insert_folder = |name: &str, parent_id: Option<i64>, sort_order: i64| -> AppResult<i64> {
            tx.execute(
                "INSERT INTO folders (name, parent_id, sort_order, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, parent_id, sort_order, now],
            )?;
            Ok(tx.last_insert_rowid())
        };

        let research = insert_folder("Research", None, 1)?;
        insert_folder("Interviews", Some(research), 1)?;
        let competitors = insert_folder("Competitors", Some(research), 2)?;
        let projects = insert_folder("Projects", None, 2)?;
        let planning = insert_folder("Planning", Some(projects), 1)?;
        let archive = insert_folder("Archive", None, 3)?;
        insert_folder("Reviews", Some(archive), 1)?;

        for (folder_id, title, content) in [
            (
                Some(competitors),
                "Competitor teardown",
                "<p>Positioning, pricing and onboarding notes for each competitor.</p>",
            ),
            (
                Some(planning),
                "Task tracker rollout plan",
                "<p>Background, workflow, roles and milestones.</p>",
            ),
            (
                Some(planning),
                "Task tracker requirements",
                "<p>Scope, permission matrix and iteration plan.</p>",
            ),
            (None, "Untitled note", "<p>Start capturing ideas here.</p>"),
        ] {
            tx.execute(
                "INSERT INTO documents (folder_id, title, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![folder_id, title, content, now],
            )?;
        }

        tx.execute(
            "INSERT INTO template_folders (name, parent_id, sort_order, created_at) VALUES ('Meetings', NULL, 1, ?1)",
            [&now],
        )?;
        let meetings = tx.last_insert_rowid();
        for (folder_id, name, content) in [
            (
                Some(meetings),
                "Meeting minutes",
                "<p>Topic:</p><p>Date:</p><p>Attendees:</p><p>Decisions:</p>",
            ),
            (None, "Weekly report", "<p>Done this week:</p><p>Next week:</p><p>Risks:</p>"),
            (None, "Daily log", "<p>Today:</p><p>Time spent:</p><p>Open items:</p>"),
        ] {
            insert_template(&tx, name, content, folder_id)?;
        }

        tx.commit()?;
        tracing::info!("seeded sample library");
        Ok(true)
    }
}

fn load_documents(conn: &Connection, scope: Option<i64>) -> AppResult<Vec<DocumentDetail>> {
    let docs = match scope {
        Some(folder_id) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM documents WHERE folder_id = ?1 ORDER BY updated_at DESC, id DESC",
                DOCUMENT_COLUMNS
            ))?;
            let rows = stmt
                .query_map([folder_id], parse_document_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM documents ORDER BY updated_at DESC, id DESC",
                DOCUMENT_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], parse_document_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(docs)
}

fn fetch_folder(conn: &Connection, kind: FolderKind, id: i64) -> AppResult<Option<FolderRow>> {
    conn.query_row(
        &format!(
            "SELECT id, name, parent_id, sort_order FROM {} WHERE id = ?1",
            kind.folder_table()
        ),
        [id],
        parse_folder_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn ensure_folder_exists(conn: &Connection, kind: FolderKind, id: i64) -> AppResult<()> {
    match fetch_folder(conn, kind, id)? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!("{} folder {} not found", kind.as_str(), id))),
    }
}

/// `id` followed by every folder beneath it, parents before children.
fn subtree_ids(conn: &Connection, kind: FolderKind, id: i64) -> AppResult<Vec<i64>> {
    let table = kind.folder_table();
    let mut stmt = conn.prepare(&format!(
        "WITH RECURSIVE subtree(id) AS (
           SELECT id FROM {table} WHERE id = ?1
           UNION
           SELECT f.id FROM {table} f JOIN subtree s ON f.parent_id = s.id
         )
         SELECT id FROM subtree"
    ))?;
    let ids = stmt
        .query_map([id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn fetch_document(conn: &Connection, id: i64) -> AppResult<Option<DocumentDetail>> {
    conn.query_row(
        &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
        [id],
        parse_document_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn fetch_template(conn: &Connection, id: i64) -> AppResult<Option<TemplateRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM templates WHERE id = ?1", TEMPLATE_COLUMNS),
        [id],
        parse_template_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn insert_template(conn: &Connection, name: &str, content: &str, folder_id: Option<i64>) -> AppResult<TemplateRecord> {
    if let Some(folder_id) = folder_id {
        ensure_folder_exists(conn, FolderKind::Template, folder_id)?;
    }
    let now = stored_now();
    conn.execute(
        "INSERT INTO templates (folder_id, name, content, updated_at, usage_count, last_used_at)
         VALUES (?1, ?2, ?3, ?4, 0, NULL)",
        params![folder_id, name, content, format_time(now)],
    )?;
    Ok(TemplateRecord {
        id: conn.last_insert_rowid(),
        folder_id,
        name: name.to_string(),
        content: content.to_string(),
        updated_at: now,
        usage_count: 0,
        last_used_at: None,
    })
}

fn mark_template_used(conn: &Connection, id: i64) -> AppResult<bool> {
    let changed = conn.execute(
        "UPDATE templates SET usage_count = usage_count + 1, last_used_at = ?1 WHERE id = ?2",
        params![format_time(Utc::now()), id],
    )?;
    Ok(changed > 0)
}

fn parse_folder_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FolderRow> {
    Ok(FolderRow {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        sort_order: row.get(3)?,
    })
}

fn parse_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentDetail> {
    Ok(DocumentDetail {
        id: row.get(0)?,
        folder_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
        updated_at: parse_time(&row.get::<_, String>(5)?)?,
    })
}

fn parse_template_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateRecord> {
    Ok(TemplateRecord {
        id: row.get(0)?,
        folder_id: row.get(1)?,
        name: row.get(2)?,
        content: row.get(3)?,
        updated_at: parse_time(&row.get::<_, String>(4)?)?,
        usage_count: row.get(5)?,
        last_used_at: row
            .get::<_, Option<String>>(6)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
    })
}

fn normalize_name(raw: &str, what: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

/// Current time at the precision `format_time` keeps, so returned records
/// equal what a later read produces.
fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width stamps keep `ORDER BY updated_at` chronological.
fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::errors::AppError;
    use crate::models::{FolderKind, TemplateImportItem};

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn folders_round_trip_and_rename() {
        let (_dir, db) = open();
        let root = db.create_folder(FolderKind::Document, " Projects ", None).expect("create");
        assert_eq!(root.name, "Projects");
        let child = db
            .create_folder(FolderKind::Document, "Planning", Some(root.id))
            .expect("create child");

        let rows = db.list_folders(FolderKind::Document).expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].parent_id, Some(root.id));

        let renamed = db
            .rename_folder(FolderKind::Document, child.id, "Roadmap")
            .expect("rename")
            .expect("exists");
        assert_eq!(renamed.name, "Roadmap");
        assert!(db.rename_folder(FolderKind::Document, 999, "x").expect("rename").is_none());
        assert!(db.list_folders(FolderKind::Template).expect("list").is_empty());
    }

    #[test]
    fn empty_names_are_rejected() {
        let (_dir, db) = open();
        let error = db.create_folder(FolderKind::Document, "   ", None).unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
        let error = db.create_document(None, "", "").unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
    }

    #[test]
    fn unknown_parent_is_not_found() {
        let (_dir, db) = open();
        let error = db.create_folder(FolderKind::Document, "x", Some(42)).unwrap_err();
        assert!(matches!(error, AppError::NotFound(_)));
    }

    #[test]
    fn deleting_a_folder_cascades_and_detaches_documents() {
        let (_dir, db) = open();
        let f = db.create_folder(FolderKind::Document, "F", None).expect("f");
        let g = db.create_folder(FolderKind::Document, "G", Some(f.id)).expect("g");
        let other = db.create_folder(FolderKind::Document, "Other", None).expect("other");
        let in_f = db.create_document(Some(f.id), "in f", "a").expect("doc");
        let in_g = db.create_document(Some(g.id), "in g", "b").expect("doc");
        let in_other = db.create_document(Some(other.id), "in other", "c").expect("doc");

        let removed = db.delete_folder(FolderKind::Document, f.id).expect("delete");
        assert_eq!(removed, vec![f.id, g.id]);

        let rows = db.list_folders(FolderKind::Document).expect("list");
        assert_eq!(rows.iter().map(|row| row.id).collect::<Vec<_>>(), vec![other.id]);

        assert_eq!(db.get_document(in_f.id).expect("get").expect("kept").folder_id, None);
        assert_eq!(db.get_document(in_g.id).expect("get").expect("kept").folder_id, None);
        assert_eq!(
            db.get_document(in_other.id).expect("get").expect("kept").folder_id,
            Some(other.id)
        );

        assert!(db.delete_folder(FolderKind::Document, f.id).expect("again").is_empty());
    }

    #[test]
    fn deleting_a_template_folder_detaches_templates() {
        let (_dir, db) = open();
        let folder = db.create_folder(FolderKind::Template, "Meetings", None).expect("folder");
        let template = db.create_template("Minutes", "<p>x</p>", Some(folder.id)).expect("template");
        db.delete_folder(FolderKind::Template, folder.id).expect("delete");
        let kept = db.get_template(template.id).expect("get").expect("kept");
        assert_eq!(kept.folder_id, None);
    }

    #[test]
    fn folder_cannot_move_into_its_subtree() {
        let (_dir, db) = open();
        let a = db.create_folder(FolderKind::Document, "A", None).expect("a");
        let b = db.create_folder(FolderKind::Document, "B", Some(a.id)).expect("b");
        let c = db.create_folder(FolderKind::Document, "C", None).expect("c");

        let error = db.move_folder(FolderKind::Document, a.id, Some(b.id)).unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
        let error = db.move_folder(FolderKind::Document, a.id, Some(a.id)).unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));

        let moved = db
            .move_folder(FolderKind::Document, b.id, Some(c.id))
            .expect("move")
            .expect("exists");
        assert_eq!(moved.parent_id, Some(c.id));
        let moved = db
            .move_folder(FolderKind::Document, b.id, None)
            .expect("move")
            .expect("exists");
        assert_eq!(moved.parent_id, None);
    }

    #[test]
    fn created_records_match_stored_rows() {
        let (_dir, db) = open();
        let doc = db.create_document(None, "Stamp", "<p>x</p>").expect("doc");
        let stored = db.get_document(doc.id).expect("get").expect("exists");
        assert_eq!(doc, stored);

        let template = db.create_template("Memo", "<p>memo</p>", None).expect("template");
        let stored = db.get_template(template.id).expect("get").expect("exists");
        assert_eq!(template, stored);
    }

    #[test]
    fn documents_save_rename_move_and_duplicate() {
        let (_dir, db) = open();
        let folder = db.create_folder(FolderKind::Document, "Docs", None).expect("folder");
        let doc = db.create_document(None, "Draft", "<p>hello</p>").expect("doc");

        let saved = db
            .save_document(doc.id, "Draft v2", "<p>hello world</p>")
            .expect("save")
            .expect("exists");
        assert_eq!(saved.content, "<p>hello world</p>");
        assert!(saved.updated_at >= doc.updated_at);

        let renamed = db.rename_document(doc.id, "Final").expect("rename").expect("exists");
        assert_eq!(renamed.title, "Final");
        assert_eq!(renamed.created_at, doc.created_at);

        let moved = db.move_document(doc.id, Some(folder.id)).expect("move").expect("exists");
        assert_eq!(moved.folder_id, Some(folder.id));

        let copy = db.duplicate_document(doc.id, " (copy)").expect("dup").expect("exists");
        assert_eq!(copy.title, "Final (copy)");
        assert_eq!(copy.folder_id, Some(folder.id));

        let in_folder = db.list_documents(Some(folder.id)).expect("list");
        assert_eq!(in_folder.len(), 2);
        assert_eq!(in_folder[0].id, copy.id);
        assert_eq!(in_folder[0].snippet, "hello world");

        assert!(db.delete_document(doc.id).expect("delete"));
        assert!(!db.delete_document(doc.id).expect("delete again"));
        assert!(db.save_document(doc.id, "x", "y").expect("save").is_none());
    }

    #[test]
    fn find_replace_counts_updates_and_respects_scope() {
        let (_dir, db) = open();
        let scoped = db.create_folder(FolderKind::Document, "Scoped", None).expect("folder");
        let target = db.create_document(Some(scoped.id), "AQB", "QQ").expect("doc");
        let outside = db.create_document(None, "Q outside", "Q").expect("doc");

        assert_eq!(db.find_replace("Q", "R", Some(scoped.id)).expect("replace"), 1);
        let updated = db.get_document(target.id).expect("get").expect("exists");
        assert_eq!(updated.title, "ARB");
        assert_eq!(updated.content, "RR");
        let untouched = db.get_document(outside.id).expect("get").expect("exists");
        assert_eq!(untouched.title, "Q outside");

        assert_eq!(db.find_replace("Q", "R", Some(scoped.id)).expect("replace"), 0);
        assert_eq!(db.find_replace("", "R", None).expect("replace"), 0);
        assert_eq!(db.find_replace("Q", "R", None).expect("replace"), 1);
    }

    #[test]
    fn applying_a_template_counts_usage() {
        let (_dir, db) = open();
        let template = db.create_template("Report", "<p>Done:</p>", None).expect("template");
        let doc = db.create_document(None, "Week 1", "").expect("doc");

        let applied = db.apply_template(template.id, doc.id).expect("apply").expect("exists");
        assert_eq!(applied.content, "<p>Done:</p>");
        let used = db.get_template(template.id).expect("get").expect("exists");
        assert_eq!(used.usage_count, 1);
        assert!(used.last_used_at.is_some());

        assert!(db.apply_template(template.id, 999).expect("apply").is_none());
        assert!(db.apply_template(999, doc.id).expect("apply").is_none());
        let unchanged = db.get_template(template.id).expect("get").expect("exists");
        assert_eq!(unchanged.usage_count, 1);
    }

    #[test]
    fn document_from_template_uses_dated_title() {
        let (_dir, db) = open();
        let template = db.create_template("Minutes", "<p>Topic:</p>", None).expect("template");
        let doc = db
            .create_document_from_template(template.id, None, None)
            .expect("create")
            .expect("exists");
        assert!(doc.title.starts_with("Minutes-"));
        assert_eq!(doc.content, "<p>Topic:</p>");
        assert_eq!(db.get_template(template.id).expect("get").expect("exists").usage_count, 1);
    }

    #[test]
    fn templates_update_duplicate_import_and_recent() {
        let (_dir, db) = open();
        let folder = db.create_folder(FolderKind::Template, "Ops", None).expect("folder");
        let first = db.create_template("First", "a", None).expect("first");
        let second = db.create_template("Second", "b", None).expect("second");

        let updated = db
            .update_template(first.id, "First v2", "aa", Some(folder.id))
            .expect("update")
            .expect("exists");
        assert_eq!(updated.folder_id, Some(folder.id));
        assert!(db.update_template(999, "x", "y", None).expect("update").is_none());

        let copy = db.duplicate_template(second.id, " (copy)").expect("dup").expect("exists");
        assert_eq!(copy.name, "Second (copy)");

        let imported = db
            .import_templates(&[TemplateImportItem {
                name: "Imported".to_string(),
                content: "c".to_string(),
                folder_id: None,
            }])
            .expect("import");
        assert_eq!(imported, 1);
        assert_eq!(db.list_templates().expect("list").len(), 4);

        db.record_template_use(second.id).expect("use");
        let recent = db.recent_templates(2).expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);

        let moved = db.move_template(second.id, Some(folder.id)).expect("move").expect("exists");
        assert_eq!(moved.folder_id, Some(folder.id));
        assert!(db.delete_template(second.id).expect("delete"));
    }

    #[test]
    fn settings_merge_partial_updates() {
        let (_dir, db) = open();
        let settings = db
            .update_settings(serde_json::json!({ "copySuffix": " - copy", "recentTemplatesLimit": 3 }))
            .expect("update");
        assert_eq!(settings.copy_suffix, " - copy");
        assert_eq!(settings.recent_templates_limit, 3);
        assert!(settings.seed_samples);
        assert_eq!(db.get_settings().expect("get"), settings);
    }

    #[test]
    fn seeding_happens_once() {
        let (_dir, db) = open();
        assert!(db.seed_if_empty().expect("seed"));
        assert!(!db.seed_if_empty().expect("seed again"));
        assert!(!db.list_folders(FolderKind::Document).expect("list").is_empty());
        assert!(!db.list_templates().expect("templates").is_empty());
    }
}
