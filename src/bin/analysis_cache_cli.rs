//! analysis-cache-cli: 校验和计算、缓存键推导与文件缓存检查的命令行工具
//!
//! Usage:
//!   analysis-cache-cli checksum <file>...                       Per-file SHA-256 checksums
//!   analysis-cache-cli key <entity> <file>... [--salt <s>]      Cache key for an ordered item set
//!   analysis-cache-cli inspect <store-dir> <entity>             Show the stored entry
//!   analysis-cache-cli validate <store-dir> <entity> <file>...  Would these items hit the cache?

use ai_analysis_cache::cache::{
    CacheKeyBuilder, CacheStore, CacheValidator, FileCacheStore,
};
use ai_analysis_cache::checksum::{ChecksumGenerator, ChecksumRecord, FileFetcher, ItemRef};
use ai_analysis_cache::utils::clock::{Clock, SystemClock};
use ai_analysis_cache::AnalysisConfig;
use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "checksum" => cmd_checksum(&args[2..]).await,
        "key" => cmd_key(&args[2..]).await,
        "inspect" => cmd_inspect(&args[2..]).await,
        "validate" => cmd_validate(&args[2..]).await,
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"analysis-cache-cli: 分析缓存命令行工具

USAGE:
    analysis-cache-cli <COMMAND> [OPTIONS]

COMMANDS:
    checksum <file>...                        Print SHA-256 checksum of each file
    key <entity> <file>... [--salt <s>]       Print the cache key for an ordered item set
    inspect <store-dir> <entity>              Print the stored entry for an entity
    validate <store-dir> <entity> <file>...   Check whether the items would hit the cache
    version                                   Show version information
    help                                      Show this help message

ENVIRONMENT:
    AI_CACHE_CONFIG             YAML config file (validate uses cache.max_age_secs)
    RUST_LOG                    Log filter, e.g. ai_analysis_cache=debug"#
    );
}

fn cmd_version() {
    println!("analysis-cache-cli {}", env!("CARGO_PKG_VERSION"));
}

/// Splits `--salt <value>` out of positional arguments.
fn split_salt(args: &[String]) -> anyhow::Result<(Vec<String>, Option<String>)> {
    let mut positional = Vec::new();
    let mut salt = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--salt" {
            match iter.next() {
                Some(value) => salt = Some(value.clone()),
                None => bail!("--salt requires a value"),
            }
        } else {
            positional.push(arg.clone());
        }
    }
    Ok((positional, salt))
}

/// Files become items named by their path, in argument order.
fn items_from_paths(paths: &[String]) -> Vec<ItemRef> {
    paths.iter().map(|p| ItemRef::new(p.clone(), p.clone())).collect()
}

async fn checksums(paths: &[String]) -> anyhow::Result<Vec<ChecksumRecord>> {
    let generator = ChecksumGenerator::new(Arc::new(FileFetcher::new()));
    let records = generator
        .generate_all(&items_from_paths(paths))
        .await
        .context("failed to checksum items")?;
    Ok(records)
}

fn load_config() -> anyhow::Result<AnalysisConfig> {
    let cfg = match std::env::var("AI_CACHE_CONFIG") {
        Ok(path) => AnalysisConfig::from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        Err(_) => AnalysisConfig::default(),
    };
    Ok(cfg.apply_env_overrides()?)
}

async fn cmd_checksum(args: &[String]) -> anyhow::Result<()> {
    if args.is_empty() {
        bail!("checksum requires at least one file");
    }
    for record in checksums(args).await? {
        println!("{}  {}", record.checksum, record.item_id);
    }
    Ok(())
}

async fn cmd_key(args: &[String]) -> anyhow::Result<()> {
    let (positional, salt) = split_salt(args)?;
    let Some((entity, files)) = positional.split_first() else {
        bail!("key requires <entity> <file>...");
    };
    let records = checksums(files).await?;
    let mut builder = CacheKeyBuilder::new();
    if let Some(salt) = salt {
        builder = builder.with_salt(salt);
    }
    let key = builder.build(entity, &records);
    println!("entity:            {}", key.entity_id);
    println!("combined checksum: {}", key.combined_checksum);
    println!("item count:        {}", key.item_count);
    Ok(())
}

async fn cmd_inspect(args: &[String]) -> anyhow::Result<()> {
    let [dir, entity] = args else {
        bail!("inspect requires <store-dir> <entity>");
    };
    let store = FileCacheStore::new(dir);
    match store.get(entity).await? {
        Some(entry) => {
            let now = SystemClock.now_ms();
            println!("entry id:          {}", entry.id);
            println!("combined checksum: {}", entry.combined_checksum);
            println!("items:             {}", entry.item_count());
            for record in &entry.item_checksums {
                println!("  {}  {}", record.checksum, record.item_id);
            }
            println!("age:               {}s", entry.age_ms(now) / 1000);
            println!("access count:      {}", entry.access_count);
            println!("{}", serde_json::to_string_pretty(&entry.result)?);
        }
        None => println!("no entry for '{entity}'"),
    }
    Ok(())
}

async fn cmd_validate(args: &[String]) -> anyhow::Result<()> {
    let Some((dir, rest)) = args.split_first() else {
        bail!("validate requires <store-dir> <entity> <file>...");
    };
    let Some((entity, files)) = rest.split_first() else {
        bail!("validate requires <store-dir> <entity> <file>...");
    };
    if files.is_empty() {
        bail!("validate requires at least one file");
    }
    let config = load_config()?;
    let records = checksums(files).await?;
    let key = CacheKeyBuilder::new().build(entity, &records);
    let stored = FileCacheStore::new(dir).get(entity).await?;
    let outcome = CacheValidator::new()
        .with_max_age(config.cache.max_age_secs.map(Duration::from_secs))
        .evaluate(stored.as_ref(), &key, &records, false, SystemClock.now_ms());

    match outcome.invalidation_reason {
        None => println!("HIT  entry {}", outcome.entry_id.unwrap_or_default()),
        Some(reason) => {
            println!("MISS {reason}");
            for id in &outcome.changed_item_ids {
                println!("  changed: {id}");
            }
        }
    }
    Ok(())
}
