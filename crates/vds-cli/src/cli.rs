use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vds_types::DatabaseStatus;

#[derive(Parser)]
#[command(
    name = "vds",
    about = "Versioned document store: content-addressed objects and CAS branches",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the file-backed database
    #[arg(long, global = true, default_value = ".vds")]
    pub root: PathBuf,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Report the database status
    Status(StatusArgs),
    /// List projects
    Projects,
    /// Delete a project and everything in it
    Delete(ProjectArgs),
    /// Store an object read from a JSON file ("-" for stdin)
    Put(PutArgs),
    /// Show the object stored under a hash
    Get(GetArgs),
    /// Resolve an abbreviated hash
    Find(FindArgs),
    /// Print every object of a project
    Dump(ProjectArgs),
    /// List branches and their hashes
    Branches(ProjectArgs),
    /// Read a branch
    BranchGet(BranchGetArgs),
    /// Compare-and-swap a branch
    BranchSet(BranchSetArgs),
}

#[derive(Args)]
pub struct StatusArgs {
    /// Last status seen; an unchanged answer is delayed by the status timeout
    #[arg(long)]
    pub previous: Option<DatabaseStatus>,
}

#[derive(Args)]
pub struct ProjectArgs {
    pub project: String,
}

#[derive(Args)]
pub struct PutArgs {
    pub project: String,
    pub file: PathBuf,
}

#[derive(Args)]
pub struct GetArgs {
    pub project: String,
    pub hash: String,
}

#[derive(Args)]
pub struct FindArgs {
    pub project: String,
    pub prefix: String,
}

#[derive(Args)]
pub struct BranchGetArgs {
    pub project: String,
    pub branch: String,
    /// Wait (up to the branch poll timeout) while the branch still holds
    /// this hash; "" means absent
    #[arg(long)]
    pub expected: Option<String>,
}

#[derive(Args)]
pub struct BranchSetArgs {
    pub project: String,
    pub branch: String,
    /// Hash the branch must currently hold; "" means absent
    #[arg(long)]
    pub old: String,
    /// Hash to store; "" deletes the branch
    #[arg(long)]
    pub new: String,
}
