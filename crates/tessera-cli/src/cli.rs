use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Tessera -- versioned object registry",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Backend URI: a path, file://, s3://, gs:// or memory://
    #[arg(short, long, global = true)]
    pub backend: Option<String>,

    /// TOML file with [backend] and [registry] tables
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// List object names
    List(ListArgs),
    /// List the versions of an object
    Versions(VersionsArgs),
    /// Print every object, version and its metadata
    Dump(DumpArgs),
    /// Show the metadata of one version
    Metadata(MetadataArgs),
    /// Delete a version, the latest version, or all versions
    Delete(DeleteArgs),
    /// Show who holds an object's lock
    LockStatus(LockStatusArgs),
    /// Store a file's contents as a new version
    Put(PutArgs),
    /// Write a stored version's bytes to a file
    Get(GetArgs),
    /// Run concurrent writers against one name
    Stress(StressArgs),
}

#[derive(Args)]
pub struct ListArgs {
    /// Only names under this namespace prefix
    pub prefix: Option<String>,
}

#[derive(Args)]
pub struct VersionsArgs {
    pub name: String,
}

#[derive(Args)]
pub struct DumpArgs {
    #[arg(long)]
    pub latest_only: bool,
}

#[derive(Args)]
pub struct MetadataArgs {
    pub name: String,
    /// Version label or `latest`
    #[arg(default_value = "latest")]
    pub version: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub name: String,
    /// Version label, `latest`, or `all`
    pub version: String,
}

#[derive(Args)]
pub struct LockStatusArgs {
    pub name: String,
}

#[derive(Args)]
pub struct PutArgs {
    pub name: String,
    pub file: PathBuf,
    /// Explicit version; the next integer version if omitted
    #[arg(long)]
    pub version: Option<String>,
    #[arg(short, long)]
    pub tag: Vec<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub name: String,
    pub file: PathBuf,
    #[arg(long, default_value = "latest")]
    pub version: String,
}

#[derive(Args)]
pub struct StressArgs {
    #[arg(long, default_value = "stress:shared")]
    pub name: String,
    #[arg(short, long, default_value = "4")]
    pub workers: usize,
    /// Operations per worker
    #[arg(short, long, default_value = "5")]
    pub ops: usize,
    /// Delete every version of the name before starting
    #[arg(long)]
    pub reset: bool,
}
