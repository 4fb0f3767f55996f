use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sfs",
    about = "Synced file store: deduplicated blobs shared by local and sync owners",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store directory (overrides the config file)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

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
    /// Store a file's content for a local owner
    Put(PutArgs),
    /// Point an owner at an existing checksum
    Ref(RefArgs),
    /// Remove an owner's reference
    Unref(UnrefArgs),
    /// Remove every sync reference in a domain
    DropSync(DropSyncArgs),
    /// Fetch content by checksum
    Get(GetArgs),
    /// Show the MIME type served for a checksum
    Mime(MimeArgs),
    /// List stored files
    Ls(LsArgs),
    /// Show total referenced storage size
    Du(DuArgs),
    /// Show store counters
    Stats(StatsArgs),
}

#[derive(Args)]
pub struct PutArgs {
    pub owner: String,
    pub domain: String,
    pub file: PathBuf,
}

#[derive(Args)]
pub struct RefArgs {
    pub owner: String,
    pub domain: String,
    pub checksum: String,
    /// Reference as a sync owner
    #[arg(long)]
    pub sync: bool,
}

#[derive(Args)]
pub struct UnrefArgs {
    pub owner: String,
    pub domain: String,
    #[arg(long)]
    pub sync: bool,
}

#[derive(Args)]
pub struct DropSyncArgs {
    pub domain: String,
}

#[derive(Args)]
pub struct GetArgs {
    pub checksum: String,
    /// Write the returned bytes here
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct MimeArgs {
    pub checksum: String,
}

#[derive(Args)]
pub struct LsArgs {}

#[derive(Args)]
pub struct DuArgs {}

#[derive(Args)]
pub struct StatsArgs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_put() {
        let cli = Cli::try_parse_from(["sfs", "put", "node-1", "thumbnail", "a.png"]).unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.owner, "node-1");
            assert_eq!(args.domain, "thumbnail");
            assert_eq!(args.file, PathBuf::from("a.png"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_sync_ref() {
        let cli = Cli::try_parse_from(["sfs", "ref", "guid-7", "thumbnail", "abc.3", "--sync"]).unwrap();
        if let Command::Ref(args) = cli.command {
            assert!(args.sync);
            assert_eq!(args.checksum, "abc.3");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_unref_defaults_to_local() {
        let cli = Cli::try_parse_from(["sfs", "unref", "node-1", "thumbnail"]).unwrap();
        assert!(matches!(cli.command, Command::Unref(UnrefArgs { sync: false, .. })));
    }

    #[test]
    fn parse_drop_sync() {
        let cli = Cli::try_parse_from(["sfs", "drop-sync", "favicon"]).unwrap();
        if let Command::DropSync(args) = cli.command {
            assert_eq!(args.domain, "favicon");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_get_with_output() {
        let cli = Cli::try_parse_from(["sfs", "get", "abc.3", "-o", "out.bin"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.output, Some(PathBuf::from("out.bin")));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from(["sfs", "ls", "--root", "/tmp/store", "-v", "--format", "json"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/store")));
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Ls(_)));
    }

    #[test]
    fn parse_default_format() {
        let cli = Cli::try_parse_from(["sfs", "stats"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(cli.config.is_none());
    }
}
