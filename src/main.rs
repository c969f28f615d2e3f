use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use folio_desk_lib::commands::{self, AppState};
use folio_desk_lib::models::{
    ApplyTemplatePayload, CreateDocumentPayload, CreateFolderPayload, CreateTemplatePayload, ExportFormat,
    ExportPayload, FindReplacePayload, FolderKind, MoveFolderPayload, MoveLeafPayload, RenameDocumentPayload,
    RenameFolderPayload, SaveDocumentPayload, UploadTemplatesPayload,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "folio", about = "Folder-organized documents and templates")]
struct Cli {
    /// Directory holding the database, logs and exports.
    #[arg(long, env = "FOLIO_DATA_DIR", default_value = ".folio")]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Document,
    Template,
}

impl From<Kind> for FolderKind {
    fn from(value: Kind) -> Self {
        match value {
            Kind::Document => FolderKind::Document,
            Kind::Template => FolderKind::Template,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Pdf,
    Word,
    Html,
}

impl From<Format> for ExportFormat {
    fn from(value: Format) -> Self {
        match value {
            Format::Pdf => ExportFormat::Pdf,
            Format::Word => ExportFormat::Word,
            Format::Html => ExportFormat::Html,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the folder tree with its collapse flags.
    Tree {
        #[arg(value_enum, default_value = "document")]
        kind: Kind,
    },
    #[command(subcommand)]
    Folder(FolderCommand),
    #[command(subcommand)]
    Doc(DocCommand),
    #[command(subcommand)]
    Template(TemplateCommand),
    /// Replace every literal occurrence of QUERY in titles and bodies.
    Replace {
        query: String,
        replacement: String,
        #[arg(long)]
        folder: Option<i64>,
    },
    /// List documents whose title or snippet contains QUERY.
    Search { query: String },
    Export {
        id: i64,
        #[arg(value_enum)]
        format: Format,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show settings, or merge a JSON object into them.
    Settings { update: Option<String> },
}

#[derive(Subcommand)]
enum FolderCommand {
    Create {
        #[arg(value_enum)]
        kind: Kind,
        name: String,
        #[arg(long)]
        parent: Option<i64>,
    },
    Rename {
        #[arg(value_enum)]
        kind: Kind,
        id: i64,
        name: String,
    },
    Move {
        #[arg(value_enum)]
        kind: Kind,
        id: i64,
        #[arg(long)]
        parent: Option<i64>,
    },
    Delete {
        #[arg(value_enum)]
        kind: Kind,
        id: i64,
    },
}

#[derive(Subcommand)]
enum DocCommand {
    List {
        #[arg(long)]
        folder: Option<i64>,
    },
    Show {
        id: i64,
    },
    New {
        title: String,
        #[arg(long)]
        folder: Option<i64>,
        /// Read the body from a file; any convertible format works.
        #[arg(long)]
        from: Option<PathBuf>,
    },
    Save {
        id: i64,
        title: String,
        content: PathBuf,
    },
    Rename {
        id: i64,
        title: String,
    },
    Move {
        id: i64,
        #[arg(long)]
        folder: Option<i64>,
    },
    Copy {
        id: i64,
    },
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum TemplateCommand {
    List,
    Recent,
    New {
        name: String,
        content: PathBuf,
        #[arg(long)]
        folder: Option<i64>,
    },
    Move {
        id: i64,
        #[arg(long)]
        folder: Option<i64>,
    },
    Copy {
        id: i64,
    },
    Delete {
        id: i64,
    },
    /// Overwrite a document's body with the template.
    Apply {
        template: i64,
        doc: i64,
    },
    /// Start a new document from the template.
    Use {
        template: i64,
        #[arg(long)]
        folder: Option<i64>,
    },
    Upload {
        paths: Vec<PathBuf>,
        #[arg(long)]
        folder: Option<i64>,
    },
    UploadDir {
        root: PathBuf,
        #[arg(long)]
        folder: Option<i64>,
    },
    Import {
        manifest: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let state = folio_desk_lib::open(cli.data_dir).map_err(|error| anyhow!(error))?;

    match cli.command {
        Command::Tree { kind } => print(commands::get_tree(&state, kind.into())),
        Command::Folder(command) => run_folder(&state, command),
        Command::Doc(command) => run_doc(&state, command),
        Command::Template(command) => run_template(&state, command),
        Command::Replace {
            query,
            replacement,
            folder,
        } => print(commands::find_replace(
            &state,
            FindReplacePayload {
                query,
                replace: replacement,
                folder_id: folder,
            },
        )),
        Command::Search { query } => print(commands::preview_matches(&state, &query)),
        Command::Export { id, format, out } => {
            let document = commands::get_document(&state, id)
                .map_err(|error| anyhow!(error))?
                .ok_or_else(|| anyhow!("document {} not found", id))?;
            print(commands::export_document(
                &state,
                ExportPayload {
                    title: document.title,
                    content: document.content,
                    format: format.into(),
                    target_path: out.map(|path| path.to_string_lossy().to_string()),
                },
            ))
        }
        Command::Settings { update: None } => print(commands::get_settings(&state)),
        Command::Settings { update: Some(raw) } => {
            let update: serde_json::Value = serde_json::from_str(&raw).context("settings update must be JSON")?;
            print(commands::update_settings(&state, update))
        }
    }
}

fn run_folder(state: &AppState, command: FolderCommand) -> Result<()> {
    match command {
        FolderCommand::Create { kind, name, parent } => print(commands::create_folder(
            state,
            CreateFolderPayload {
                kind: kind.into(),
                name,
                parent_id: parent,
            },
        )),
        FolderCommand::Rename { kind, id, name } => print(commands::rename_folder(
            state,
            RenameFolderPayload {
                kind: kind.into(),
                id,
                name,
            },
        )),
        FolderCommand::Move { kind, id, parent } => print(commands::move_folder(
            state,
            MoveFolderPayload {
                kind: kind.into(),
                id,
                parent_id: parent,
            },
        )),
        FolderCommand::Delete { kind, id } => print(commands::delete_folder(state, kind.into(), id)),
    }
}

fn run_doc(state: &AppState, command: DocCommand) -> Result<()> {
    match command {
        DocCommand::List { folder } => print(commands::list_documents(state, folder)),
        DocCommand::Show { id } => print(commands::get_document(state, id)),
        DocCommand::New { title, folder, from } => {
            let content = from.map(|path| read_markup(&path)).transpose()?;
            print(commands::create_document(
                state,
                CreateDocumentPayload {
                    folder_id: folder,
                    title,
                    content,
                },
            ))
        }
        DocCommand::Save { id, title, content } => print(commands::save_document(
            state,
            SaveDocumentPayload {
                id,
                title,
                content: read_markup(&content)?,
            },
        )),
        DocCommand::Rename { id, title } => print(commands::rename_document(state, RenameDocumentPayload { id, title })),
        DocCommand::Move { id, folder } => print(commands::move_document(
            state,
            MoveLeafPayload { id, folder_id: folder },
        )),
        DocCommand::Copy { id } => print(commands::duplicate_document(state, id)),
        DocCommand::Delete { id } => print(commands::delete_document(state, id)),
    }
}

fn run_template(state: &AppState, command: TemplateCommand) -> Result<()> {
    match command {
        TemplateCommand::List => print(commands::list_templates(state)),
        TemplateCommand::Recent => print(commands::recent_templates(state)),
        TemplateCommand::New { name, content, folder } => print(commands::create_template(
            state,
            CreateTemplatePayload {
                name,
                content: read_markup(&content)?,
                folder_id: folder,
            },
        )),
        TemplateCommand::Move { id, folder } => print(commands::move_template(
            state,
            MoveLeafPayload { id, folder_id: folder },
        )),
        TemplateCommand::Copy { id } => print(commands::duplicate_template(state, id)),
        TemplateCommand::Delete { id } => print(commands::delete_template(state, id)),
        TemplateCommand::Apply { template, doc } => print(commands::apply_template(
            state,
            ApplyTemplatePayload {
                template_id: template,
                doc_id: doc,
            },
        )),
        TemplateCommand::Use { template, folder } => {
            print(commands::create_document_from_template(state, template, folder))
        }
        TemplateCommand::Upload { paths, folder } => print(commands::upload_templates(
            state,
            UploadTemplatesPayload {
                paths: paths.iter().map(|path| path.to_string_lossy().to_string()).collect(),
                folder_id: folder,
            },
        )),
        TemplateCommand::UploadDir { root, folder } => print(commands::upload_template_folder(state, &root, folder)),
        TemplateCommand::Import { manifest } => print(commands::import_templates(state, &manifest)),
    }
}

fn read_markup(path: &Path) -> Result<String> {
    folio_desk_lib::convert::convert_file(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .ok_or_else(|| anyhow!("unsupported file type: {}", path.display()))
}

fn print<T: Serialize>(result: std::result::Result<T, String>) -> Result<()> {
    let value = result.map_err(|error| anyhow!(error))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
