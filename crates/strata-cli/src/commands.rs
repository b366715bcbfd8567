use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use strata_cache::CacheChain;
use strata_log::{
    FileLog, LogMessage, LogRepository, PlaintextSealer, ReplicatedLog, SinglePartition,
};
use strata_merge::merge;
use strata_store::{Repository, Revision};
use strata_txn::{FlushReport, TransactionCoordinator, TxnError};
use strata_types::{EntityId, PartitionKey, Value};
use tracing::debug;

use crate::cli::*;
use crate::config::StrataConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = StrataConfig::load(cli.config.as_deref())?;
    let format = cli.format;
    match cli.command {
        Command::Merge(args) => cmd_merge(args, format),
        Command::Put(args) => cmd_put(&config, args, format),
        Command::Get(args) => cmd_get(&config, args, format),
        Command::Delete(args) => cmd_delete(&config, args, format),
        Command::History(args) => cmd_history(&config, args, format),
        Command::Log(args) => cmd_log(&config, args, format),
        Command::Config => cmd_config(&config),
    }
}

/// One request scope over the file log: a log repository for a single
/// partition, the configured cache chain above it and a coordinator.
struct Session {
    log: Arc<FileLog>,
    coordinator: TransactionCoordinator,
}

impl Session {
    fn open(config: &StrataConfig, partition: &PartitionKey) -> anyhow::Result<Self> {
        let log = Arc::new(
            FileLog::open(config.log.clone())
                .with_context(|| format!("opening log in {}", config.log.dir.display()))?,
        );
        let resolver = Arc::new(SinglePartition::new(partition.clone()));
        let repo = LogRepository::new(log.clone(), Arc::new(PlaintextSealer::new()), resolver.clone());
        let chain = Arc::new(CacheChain::from_config(&config.cache, Arc::new(repo)));
        let coordinator = TransactionCoordinator::new(chain, config.transaction.clone())
            .with_sync(log.clone(), resolver);
        Ok(Self { log, coordinator })
    }

    fn finish(self) {
        if let Some(access) = self.coordinator.chain().access_log() {
            debug!(
                reads = access.reads().len(),
                writes = access.writes().len(),
                "backing store accesses"
            );
        }
    }
}

/// Parse a JSON value given inline or as `@path`.
fn parse_value(arg: &str) -> anyhow::Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("reading value from {path}"))?
        }
        None => arg.to_string(),
    };
    let value: Value = serde_json::from_str(&text).context("value is not valid JSON")?;
    value.validate()?;
    Ok(value)
}

fn read_value_file(path: &Path) -> anyhow::Result<Value> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_value(value: &Value, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{value}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

pub fn store_value(
    config: &StrataConfig,
    partition: &PartitionKey,
    id: &EntityId,
    value: Value,
) -> anyhow::Result<FlushReport> {
    let mut session = Session::open(config, partition)?;
    let report = commit_one(&mut session.coordinator, |coord| coord.write(id, value))?;
    session.finish();
    Ok(report)
}

pub fn load_value(
    config: &StrataConfig,
    partition: &PartitionKey,
    id: &EntityId,
) -> anyhow::Result<Option<Value>> {
    let mut session = Session::open(config, partition)?;
    let value = session
        .coordinator
        .run_in_transaction(|coord| -> Result<_, TxnError> { coord.read(id) })?;
    session.finish();
    Ok(value)
}

pub fn delete_value(
    config: &StrataConfig,
    partition: &PartitionKey,
    id: &EntityId,
) -> anyhow::Result<FlushReport> {
    let mut session = Session::open(config, partition)?;
    let report = commit_one(&mut session.coordinator, |coord| coord.delete(id))?;
    session.finish();
    Ok(report)
}

/// Stage one edit in a root transaction and commit it, rolling back if the
/// edit cannot be staged.
fn commit_one<F>(coord: &mut TransactionCoordinator, edit: F) -> Result<FlushReport, TxnError>
where
    F: FnOnce(&mut TransactionCoordinator) -> Result<(), TxnError>,
{
    coord.begin();
    if let Err(e) = edit(coord) {
        coord.rollback()?;
        return Err(e);
    }
    coord.commit()
}

pub fn value_history(
    config: &StrataConfig,
    partition: &PartitionKey,
    id: &EntityId,
) -> anyhow::Result<Vec<Revision>> {
    let session = Session::open(config, partition)?;
    let history = session.coordinator.chain().history(id)?.collect();
    session.finish();
    Ok(history)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_merge(args: MergeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let common = read_value_file(&args.common)?;
    let left = read_value_file(&args.left)?;
    let right = read_value_file(&args.right)?;
    let merged = merge(args.mode.into(), &common, &left, &right)?;
    print_value(&merged, format)
}

fn cmd_put(config: &StrataConfig, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let value = parse_value(&args.value)?;
    let id = args.id.unwrap_or_default();
    let report = store_value(config, &args.partition, &id, value)?;
    print_report(&id, &args.partition, &report, format)
}

fn cmd_get(config: &StrataConfig, args: EntityArgs, format: OutputFormat) -> anyhow::Result<()> {
    match load_value(config, &args.partition, &args.id)? {
        Some(value) => print_value(&value, format),
        None => {
            match format {
                OutputFormat::Json => println!("null"),
                OutputFormat::Text => println!("{} {} not found", "✗".red(), args.id),
            }
            Ok(())
        }
    }
}

fn cmd_delete(
    config: &StrataConfig,
    args: EntityArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let report = delete_value(config, &args.partition, &args.id)?;
    print_report(&args.id, &args.partition, &report, format)
}

fn cmd_history(
    config: &StrataConfig,
    args: EntityArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let history = value_history(config, &args.partition, &args.id)?;
    match format {
        OutputFormat::Json => {
            let revisions: Vec<_> = history
                .iter()
                .map(|rev| json!({ "offset": rev.marker, "value": rev.value }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&revisions)?);
        }
        OutputFormat::Text => {
            if history.is_empty() {
                println!("No revisions of {}.", args.id);
            }
            for rev in &history {
                let value = if rev.value.is_absent() {
                    "deleted".red().to_string()
                } else {
                    rev.value.to_string()
                };
                println!("{}  {}", format!("@{}", rev.marker).yellow(), value);
            }
        }
    }
    Ok(())
}

fn cmd_log(config: &StrataConfig, args: LogArgs, format: OutputFormat) -> anyhow::Result<()> {
    let session = Session::open(config, &args.partition)?;
    let mut rows = Vec::new();
    for entry in session.log.read_from(&args.partition, args.from)? {
        let entry = entry?;
        let detail = match &entry.message {
            LogMessage::Data { base, payload, .. } => json!({
                "bytes": payload.data.len(),
                "readers": payload.readers,
                "has_base": base.is_some(),
            }),
            LogMessage::Tombstone { .. } => json!({}),
            LogMessage::Sync { token } => json!({ "token": token }),
        };
        rows.push(json!({
            "offset": entry.offset,
            "kind": entry.message.kind(),
            "entity": entry.message.entity().map(|id| id.to_string()),
            "detail": detail,
        }));

        if format == OutputFormat::Text {
            let entity = entry
                .message
                .entity()
                .map(|id| id.to_string())
                .unwrap_or_default();
            let kind = match &entry.message {
                LogMessage::Data { .. } => "data".green(),
                LogMessage::Tombstone { .. } => "tombstone".red(),
                LogMessage::Sync { .. } => "sync".dimmed(),
            };
            println!("{:>8}  {:<9}  {}", entry.offset.to_string().yellow(), kind, entity);
        }
    }
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("Partition {} is empty.", args.partition.to_string().bold());
    }
    session.finish();
    Ok(())
}

fn cmd_config(config: &StrataConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

fn print_report(
    id: &EntityId,
    partition: &PartitionKey,
    report: &FlushReport,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let out = json!({
                "id": id.to_string(),
                "partition": partition.to_string(),
                "written": report.written.len(),
                "removed": report.removed.len(),
                "unchanged": report.unchanged.len(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            let outcome = if !report.written.is_empty() {
                "written".green()
            } else if !report.removed.is_empty() {
                "deleted".red()
            } else {
                "unchanged".dimmed()
            };
            println!(
                "{} {} {} in {}",
                "✓".green().bold(),
                id,
                outcome,
                partition.to_string().bold()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_log::FileLogConfig;

    fn config(dir: &Path) -> StrataConfig {
        StrataConfig {
            log: FileLogConfig {
                dir: dir.to_path_buf(),
                ..FileLogConfig::default()
            },
            ..StrataConfig::default()
        }
    }

    fn partition() -> PartitionKey {
        PartitionKey::new("entities", 0)
    }

    fn account(logins: i64) -> Value {
        Value::record()
            .with_field("name", "ada")
            .with_field("logins", Value::counter(logins))
    }

    #[test]
    fn put_then_get_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let id = EntityId::from_u128(1);

        let report = store_value(&config, &partition(), &id, account(1)).unwrap();
        assert_eq!(report.written, vec![id]);
        assert_eq!(load_value(&config, &partition(), &id).unwrap(), Some(account(1)));
    }

    #[test]
    fn second_put_replaces_value() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let id = EntityId::from_u128(1);

        store_value(&config, &partition(), &id, account(1)).unwrap();
        store_value(&config, &partition(), &id, account(3)).unwrap();
        assert_eq!(load_value(&config, &partition(), &id).unwrap(), Some(account(3)));
        assert_eq!(value_history(&config, &partition(), &id).unwrap().len(), 2);
    }

    #[test]
    fn delete_removes_value() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let id = EntityId::from_u128(1);

        store_value(&config, &partition(), &id, account(1)).unwrap();
        let report = delete_value(&config, &partition(), &id).unwrap();
        assert_eq!(report.removed, vec![id]);
        assert!(load_value(&config, &partition(), &id).unwrap().is_none());
    }

    #[test]
    fn parse_value_reads_inline_and_file() {
        let inline = parse_value(r#"{"Counter": 4}"#).unwrap();
        assert_eq!(inline, Value::counter(4));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");
        fs::write(&path, serde_json::to_string(&account(2)).unwrap()).unwrap();
        let from_file = parse_value(&format!("@{}", path.display())).unwrap();
        assert_eq!(from_file, account(2));

        assert!(parse_value("not json").is_err());
    }
}
