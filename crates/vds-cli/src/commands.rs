use std::io::Read;
use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use serde_json::{json, Value};
use vds_backend::FileBackend;
use vds_core::{Database, DatabaseConfig, ProjectHandle};
use vds_types::{BranchName, Document, ObjectHash};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => DatabaseConfig::load(path)?,
        None => DatabaseConfig::default(),
    };
    let db = Database::new(FileBackend::new(&cli.root), config);
    db.open_database()
        .await
        .with_context(|| format!("opening database at {}", cli.root.display()))?;

    let format = cli.format;
    let result = match cli.command {
        Command::Status(args) => cmd_status(&db, args, format).await,
        Command::Projects => cmd_projects(&db, format).await,
        Command::Delete(args) => cmd_delete(&db, args, format).await,
        Command::Put(args) => cmd_put(&db, args, format).await,
        Command::Get(args) => cmd_get(&db, args, format).await,
        Command::Find(args) => cmd_find(&db, args, format).await,
        Command::Dump(args) => cmd_dump(&db, args, format).await,
        Command::Branches(args) => cmd_branches(&db, args, format).await,
        Command::BranchGet(args) => cmd_branch_get(&db, args, format).await,
        Command::BranchSet(args) => cmd_branch_set(&db, args, format).await,
    };
    db.close_database().await?;
    result
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_hash(hash: Option<&ObjectHash>) -> String {
    match hash {
        Some(hash) => hash.to_string().yellow().to_string(),
        None => "(absent)".dimmed().to_string(),
    }
}

async fn open(db: &Database, project: &str) -> anyhow::Result<ProjectHandle> {
    db.open_project(project)
        .await
        .with_context(|| format!("opening project {project}"))
}

async fn cmd_status(db: &Database, args: StatusArgs, format: OutputFormat) -> anyhow::Result<()> {
    let status = db.get_database_status(args.previous).await;
    match format {
        OutputFormat::Json => print_json(&json!({ "status": status })),
        OutputFormat::Text => {
            println!("Database {} at {}", status.to_string().bold(), db.config().database);
            Ok(())
        }
    }
}

async fn cmd_projects(db: &Database, format: OutputFormat) -> anyhow::Result<()> {
    let names = db.get_project_names().await?;
    match format {
        OutputFormat::Json => print_json(&json!(names)),
        OutputFormat::Text => {
            if names.is_empty() {
                println!("No projects.");
            }
            for name in &names {
                println!("  {}", name.as_str().bold());
            }
            Ok(())
        }
    }
}

async fn cmd_delete(db: &Database, args: ProjectArgs, format: OutputFormat) -> anyhow::Result<()> {
    db.delete_project(&args.project).await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "deleted": args.project })),
        OutputFormat::Text => {
            println!("{} Deleted project {}", "✓".green().bold(), args.project.bold());
            Ok(())
        }
    }
}

fn read_document(path: &Path) -> anyhow::Result<Document> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    serde_json::from_str(&text).with_context(|| format!("{} is not a JSON object", path.display()))
}

async fn cmd_put(db: &Database, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let document = read_document(&args.file)?;
    let project = open(db, &args.project).await?;
    let hash = project.insert_object(document).await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "hash": hash })),
        OutputFormat::Text => {
            println!("{} Stored {}", "✓".green().bold(), hash.to_string().yellow());
            Ok(())
        }
    }
}

async fn cmd_get(db: &Database, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let project = open(db, &args.project).await?;
    let object = project.load_object(&args.hash).await?;
    match format {
        OutputFormat::Json => print_json(&Value::Object(object.into_document())),
        OutputFormat::Text => {
            println!("Object {}", object.hash().to_string().yellow().bold());
            for (field, value) in object.payload() {
                println!("  {}: {}", field.bold(), value);
            }
            Ok(())
        }
    }
}

async fn cmd_find(db: &Database, args: FindArgs, format: OutputFormat) -> anyhow::Result<()> {
    let project = open(db, &args.project).await?;
    let hash = project.find_hash(&args.prefix).await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "hash": hash })),
        OutputFormat::Text => {
            println!("{}", hash.to_string().yellow());
            Ok(())
        }
    }
}

async fn cmd_dump(db: &Database, args: ProjectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let project = open(db, &args.project).await?;
    let objects = project.dump_objects().await?;
    match format {
        OutputFormat::Json => print_json(&json!(objects)),
        OutputFormat::Text => {
            println!("{} objects in {}", objects.len().to_string().bold(), args.project.bold());
            for object in &objects {
                println!("  {} {}", object.hash().to_string().yellow(), Value::Object(object.payload()));
            }
            Ok(())
        }
    }
}

async fn cmd_branches(db: &Database, args: ProjectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let project = open(db, &args.project).await?;
    let branches = project.get_branch_names().await?;
    match format {
        OutputFormat::Json => print_json(&json!(branches)),
        OutputFormat::Text => {
            if branches.is_empty() {
                println!("No branches.");
            }
            for (branch, hash) in &branches {
                println!("  {} → {}", branch.to_string().green(), hash.to_string().yellow());
            }
            Ok(())
        }
    }
}

async fn cmd_branch_get(db: &Database, args: BranchGetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let branch = BranchName::parse(&args.branch)?;
    let project = open(db, &args.project).await?;
    let hash = match &args.expected {
        Some(expected) => {
            let expected = ObjectHash::parse_optional(expected)?;
            project.get_branch_hash(&branch, expected.as_ref()).await?
        }
        None => project.read_branch_hash(&branch).await?,
    };
    match format {
        OutputFormat::Json => print_json(&json!({ "branch": branch, "hash": hash })),
        OutputFormat::Text => {
            println!("{} → {}", branch.to_string().green(), show_hash(hash.as_ref()));
            Ok(())
        }
    }
}

async fn cmd_branch_set(db: &Database, args: BranchSetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let branch = BranchName::parse(&args.branch)?;
    let old = ObjectHash::parse_optional(&args.old)?;
    let new = ObjectHash::parse_optional(&args.new)?;
    let project = open(db, &args.project).await?;
    project
        .set_branch_hash(&branch, old.as_ref(), new.as_ref())
        .await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "branch": branch, "old": old, "new": new })),
        OutputFormat::Text => {
            println!(
                "{} {} {} → {}",
                "✓".green().bold(),
                branch.to_string().green(),
                show_hash(old.as_ref()),
                show_hash(new.as_ref())
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    // The database lives in a subdirectory so input files beside it are
    // not mistaken for collections.
    fn cli(dir: &Path, args: &[&str]) -> Cli {
        let root = dir.join("db");
        let mut argv = vec!["vds", "--root", root.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[tokio::test]
    async fn put_then_branch_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let object = dir.path().join("object.json");
        std::fs::write(&object, r##"{"_id": "#root", "name": "ROOT"}"##).unwrap();

        run_command(cli(dir.path(), &["put", "models", object.to_str().unwrap()]))
            .await
            .unwrap();
        run_command(cli(dir.path(), &["branch-set", "models", "*main", "--old", "", "--new", "#root"]))
            .await
            .unwrap();

        let db = Database::new(FileBackend::new(dir.path().join("db")), DatabaseConfig::default());
        db.open_database().await.unwrap();
        let project = db.open_project("models").await.unwrap();
        let main = BranchName::parse("*main").unwrap();
        assert_eq!(
            project.read_branch_hash(&main).await.unwrap(),
            Some(ObjectHash::parse("#root").unwrap())
        );
        assert_eq!(project.find_hash("#r").await.unwrap().as_str(), "#root");
    }

    #[tokio::test]
    async fn stale_branch_set_fails() {
        let dir = tempfile::tempdir().unwrap();
        run_command(cli(dir.path(), &["branch-set", "p", "*b", "--old", "", "--new", "#h1"]))
            .await
            .unwrap();
        let err = run_command(cli(dir.path(), &["branch-set", "p", "*b", "--old", "", "--new", "#h2"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("*b"));
    }

    #[tokio::test]
    async fn invalid_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let object = dir.path().join("object.json");
        std::fs::write(&object, r#"{"_id": "abc"}"#).unwrap();
        assert!(run_command(cli(dir.path(), &["put", "p", object.to_str().unwrap()]))
            .await
            .is_err());
    }
}
