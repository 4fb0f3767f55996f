use std::path::PathBuf;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use sfs_store::{FileContent, FileStore, StoreConfig};
use sfs_types::{Checksum, DomainTag};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(cli.root, cli.config.as_deref())?;
    let store = FileStore::open(&config)
        .with_context(|| format!("opening store at {}", config.root.display()))?;
    store.on_loaded().await;

    let result = dispatch(&store, cli.command, cli.format).await;
    store.flush().await;
    store.shutdown().await;
    result
}

fn resolve_config(root: Option<PathBuf>, path: Option<&std::path::Path>) -> anyhow::Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::from_toml_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(root) = root {
        config.root = root;
    }
    Ok(config)
}

async fn dispatch(store: &FileStore, command: Command, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Put(args) => cmd_put(store, args, format),
        Command::Ref(args) => cmd_ref(store, args, format),
        Command::Unref(args) => cmd_unref(store, args, format),
        Command::DropSync(args) => cmd_drop_sync(store, args, format).await,
        Command::Get(args) => cmd_get(store, args, format).await,
        Command::Mime(args) => cmd_mime(store, args, format).await,
        Command::Ls(_) => cmd_ls(store, format).await,
        Command::Du(_) => cmd_du(store, format).await,
        Command::Stats(_) => cmd_stats(store, format).await,
    }
}

fn parse_domain(domain: &str) -> anyhow::Result<DomainTag> {
    DomainTag::new(domain).context("invalid domain")
}

fn parse_checksum(checksum: &str) -> anyhow::Result<Checksum> {
    Checksum::parse(checksum).with_context(|| format!("invalid checksum {checksum:?}"))
}

fn kind_label(sync: bool) -> &'static str {
    if sync {
        "sync"
    } else {
        "local"
    }
}

fn cmd_put(store: &FileStore, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let domain = parse_domain(&args.domain)?;
    let data = std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let checksum = store.set_local_file(args.owner.as_str(), &domain, data);
    match format {
        OutputFormat::Json => println!("{}", json!({ "checksum": checksum, "size": checksum.size() })),
        OutputFormat::Text => println!(
            "{} Stored {} for {}/{}",
            "✓".green().bold(),
            checksum.as_str().yellow(),
            domain.as_str().cyan(),
            args.owner.bold()
        ),
    }
    Ok(())
}

fn cmd_ref(store: &FileStore, args: RefArgs, format: OutputFormat) -> anyhow::Result<()> {
    let domain = parse_domain(&args.domain)?;
    let checksum = parse_checksum(&args.checksum)?;
    if args.sync {
        store.set_sync_file_ref(args.owner.as_str(), &domain, checksum.clone());
    } else {
        store.set_local_file_ref(args.owner.as_str(), &domain, checksum.clone());
    }
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "kind": kind_label(args.sync), "domain": domain, "owner": args.owner, "checksum": checksum })
        ),
        OutputFormat::Text => println!(
            "{} {} {}/{} → {}",
            "✓".green().bold(),
            kind_label(args.sync),
            domain.as_str().cyan(),
            args.owner.bold(),
            checksum.as_str().yellow()
        ),
    }
    Ok(())
}

fn cmd_unref(store: &FileStore, args: UnrefArgs, format: OutputFormat) -> anyhow::Result<()> {
    let domain = parse_domain(&args.domain)?;
    if args.sync {
        store.remove_sync_ref(args.owner.as_str(), &domain);
    } else {
        store.remove_local_ref(args.owner.as_str(), &domain);
    }
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "kind": kind_label(args.sync), "domain": domain, "owner": args.owner, "removed": true })
        ),
        OutputFormat::Text => println!(
            "Removed {} reference {}/{}",
            kind_label(args.sync),
            domain.as_str().cyan(),
            args.owner.bold()
        ),
    }
    Ok(())
}

async fn cmd_drop_sync(store: &FileStore, args: DropSyncArgs, format: OutputFormat) -> anyhow::Result<()> {
    let domain = parse_domain(&args.domain)?;
    let before = store.stats().await.sync_references;
    store.remove_all_sync_refs_for_type(&domain);
    let released = before - store.stats().await.sync_references;
    match format {
        OutputFormat::Json => println!("{}", json!({ "domain": domain, "released": released })),
        OutputFormat::Text => println!(
            "{} Released {} sync references in {}",
            "✓".green().bold(),
            released.to_string().bold(),
            domain.as_str().cyan()
        ),
    }
    Ok(())
}

async fn cmd_get(store: &FileStore, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let checksum = parse_checksum(&args.checksum)?;
    let mime_type = store.get_mime_type(&checksum);
    let content = store.get_file(&checksum).await;
    let mime_type = mime_type.await;
    let kind = match &content {
        FileContent::Stored(_) => "stored",
        FileContent::Unknown => "unknown",
        FileContent::Missing => "missing",
    };
    let bytes = content.bytes();
    if let Some(path) = &args.output {
        std::fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "checksum": checksum, "content": kind, "mime_type": mime_type, "len": bytes.len() })
        ),
        OutputFormat::Text => {
            let label = match content {
                FileContent::Stored(_) => kind.green(),
                _ => kind.red(),
            };
            println!("{} {} ({}, {} bytes)", checksum.as_str().yellow(), label, mime_type, bytes.len());
            if let Some(path) = &args.output {
                println!("  written to {}", path.display());
            }
        }
    }
    Ok(())
}

async fn cmd_mime(store: &FileStore, args: MimeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let checksum = parse_checksum(&args.checksum)?;
    let mime_type = store.get_mime_type(&checksum).await;
    match format {
        OutputFormat::Json => println!("{}", json!({ "checksum": checksum, "mime_type": mime_type })),
        OutputFormat::Text => println!("{mime_type}"),
    }
    Ok(())
}

async fn cmd_ls(store: &FileStore, format: OutputFormat) -> anyhow::Result<()> {
    let files = store.list().await;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }
    if files.is_empty() {
        println!("No files stored.");
        return Ok(());
    }
    for file in files {
        let state = if file.deleting {
            "deleting".red()
        } else if file.on_disk {
            "on disk".green()
        } else {
            "missing".yellow()
        };
        println!(
            "{}  {:<24} local:{} sync:{}  {}",
            file.checksum.as_str().yellow(),
            file.mime_type.as_deref().unwrap_or("-"),
            file.local_refs,
            file.sync_refs,
            state
        );
    }
    Ok(())
}

async fn cmd_du(store: &FileStore, format: OutputFormat) -> anyhow::Result<()> {
    let total = store.total_storage_size().await;
    match format {
        OutputFormat::Json => println!("{}", json!({ "total_storage_size": total })),
        OutputFormat::Text => println!("{} bytes", total.to_string().bold()),
    }
    Ok(())
}

async fn cmd_stats(store: &FileStore, format: OutputFormat) -> anyhow::Result<()> {
    let stats = store.stats().await;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("Records:          {} ({} referenced)", stats.records.to_string().bold(), stats.referenced);
            println!("References:       {} local, {} sync", stats.local_references, stats.sync_references);
            println!("Storage size:     {} bytes", stats.total_storage_size);
            println!("Resident:         {} bytes", stats.resident_bytes);
            println!("Pending deletes:  {}", stats.pending_deletes);
            println!("Pending reads:    {}", stats.pending_reads);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    fn cli(dir: &TempDir, args: &[&str]) -> Cli {
        let root = dir.path().join("store");
        let mut argv = vec!["sfs", "--root", root.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    async fn open(dir: &TempDir) -> FileStore {
        let store = FileStore::open(&StoreConfig::with_root(dir.path().join("store"))).unwrap();
        store.on_loaded().await;
        store
    }

    #[test]
    fn root_flag_overrides_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sfs.toml");
        std::fs::write(&path, "root = \"/from/config\"\nsave_delay_ms = 10\n").unwrap();

        let config = resolve_config(None, Some(&path)).unwrap();
        assert_eq!(config.root, PathBuf::from("/from/config"));
        assert_eq!(config.save_delay_ms, 10);

        let config = resolve_config(Some(PathBuf::from("/flag")), Some(&path)).unwrap();
        assert_eq!(config.root, PathBuf::from("/flag"));
    }

    #[tokio::test]
    async fn put_then_unref_round_trip() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.bin");
        std::fs::write(&input, [1u8, 2, 3]).unwrap();

        run_command(cli(&dir, &["put", "node-1", "thumbnail", input.to_str().unwrap()]))
            .await
            .unwrap();
        let store = open(&dir).await;
        let checksum = store.list().await[0].checksum.clone();
        assert_eq!(store.get_file(&checksum).await.into_stored().unwrap().as_ref(), [1, 2, 3]);
        store.shutdown().await;

        let output = dir.path().join("out.bin");
        run_command(cli(&dir, &["get", checksum.as_str(), "-o", output.to_str().unwrap()]))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), [1, 2, 3]);

        run_command(cli(&dir, &["unref", "node-1", "thumbnail"])).await.unwrap();
        let store = open(&dir).await;
        assert_eq!(store.total_storage_size().await, 0);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn sync_ref_and_drop_sync() {
        let dir = TempDir::new().unwrap();
        let checksum = "00112233445566778899aabbccddeeff.42";
        run_command(cli(&dir, &["ref", "guid-7", "thumbnail", checksum, "--sync"]))
            .await
            .unwrap();

        let store = open(&dir).await;
        let c = Checksum::parse(checksum).unwrap();
        assert_eq!(store.get_file(&c).await, FileContent::Missing);
        assert_eq!(store.total_storage_size().await, 42);
        store.shutdown().await;

        run_command(cli(&dir, &["--format", "json", "drop-sync", "thumbnail"]))
            .await
            .unwrap();
        let store = open(&dir).await;
        assert!(store.list().await.is_empty());
        store.shutdown().await;
    }

    #[tokio::test]
    async fn bad_checksum_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(run_command(cli(&dir, &["mime", "not-a-checksum"])).await.is_err());
    }
}
