//! Subcommand implementations over [`ProjectIndex`].

use std::path::Path;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use localdex_core::config::StrategyName;
use localdex_engine::{GroundTruth, ProjectIndex, Progress, UpdateOutcome};
use serde::Serialize;
use tracing::info;

use crate::cli::SearchArgs;

pub async fn open(project: &Path) -> Result<ProjectIndex> {
    Ok(ProjectIndex::open(project).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn index(index: &ProjectIndex, json: bool) -> Result<()> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );
    let on_progress = |p: &Progress| {
        pb.set_length(p.total as u64);
        pb.set_position(p.done as u64);
        pb.set_message(p.path.clone());
    };
    let result = index.create_full_index(Some(&on_progress)).await;
    pb.finish_and_clear();
    let report = result?;

    if json {
        return print_json(&report);
    }
    println!(
        "Indexed {} of {} files ({} chunks) in {} ms",
        report.files_indexed, report.files_total, report.chunks_created, report.duration_ms
    );
    if report.files_removed > 0 {
        println!("Removed {} deleted files", report.files_removed);
    }
    if report.files_failed > 0 {
        println!("{} files were skipped, run with RUST_LOG=warn for details", report.files_failed);
    }
    Ok(())
}

pub async fn update(index: &ProjectIndex, path: &str, json: bool) -> Result<()> {
    let outcome = index.update_file(path).await?;
    if json {
        return print_json(&outcome);
    }
    match outcome {
        UpdateOutcome::Indexed { chunks } => println!("{path}: {chunks} chunks"),
        UpdateOutcome::Unchanged => println!("{path}: unchanged"),
        UpdateOutcome::Removed => println!("{path}: removed from the index"),
    }
    Ok(())
}

pub async fn search(index: &ProjectIndex, args: &SearchArgs, json: bool) -> Result<()> {
    let results = index.search(&args.query, args.top_k, args.mode, args.alpha).await?;
    if json {
        return print_json(&results);
    }
    if results.is_empty() {
        println!("No results");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!("{}. {}:{}-{} ({:.3})", i + 1, r.path, r.start_line, r.end_line, r.score);
        for line in r.text.lines().take(4) {
            println!("    {line}");
        }
    }
    Ok(())
}

pub async fn status(index: &ProjectIndex, json: bool) -> Result<()> {
    let status = index.status().await?;
    if json {
        return print_json(&status);
    }
    println!("Project:   {}", status.project_path.display());
    println!("Index:     {}", status.index_dir.display());
    if !status.exists {
        println!("No index yet, run `localdex index`");
        return Ok(());
    }
    match &status.engine_selection {
        Some(sel) => println!("Lexical:   {} ({})", sel.engine, sel.reason),
        None => println!("Lexical:   not selected"),
    }
    println!("Strategy:  {}", status.strategy);
    println!("Files:     {}", status.files_indexed);
    println!("Chunks:    {}", status.chunks_indexed);
    println!("Pending:   {}", status.pending_files);
    println!("Size:      {} bytes", status.storage_size);
    if let Some(at) = status.last_indexed_at {
        println!("Updated:   {}", at.to_rfc3339());
    }
    Ok(())
}

pub async fn delete(index: &ProjectIndex) -> Result<()> {
    index.delete_index().await?;
    println!("Deleted index at {}", index.engine().layout().dir().display());
    Ok(())
}

pub async fn watch(index: &ProjectIndex, strategy: Option<StrategyName>) -> Result<()> {
    index.start(strategy).await?;
    let watcher = index.watch()?;
    info!(root = %index.root().display(), "watching, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("stopping");
    drop(watcher);
    index.shutdown().await?;
    Ok(())
}

pub async fn repair(index: &ProjectIndex, git: bool, dry_run: bool, json: bool) -> Result<()> {
    let truth = if git { GroundTruth::Git } else { GroundTruth::Disk };
    if dry_run {
        let report = index.detect_drift(truth).await?;
        if json {
            return print_json(&report);
        }
        if report.is_clean() {
            println!("Index matches the project");
        } else {
            println!(
                "added {}, modified {}, removed {}, orphaned {}, missing {}",
                report.added.len(),
                report.modified.len(),
                report.removed.len(),
                report.orphaned.len(),
                report.missing.len()
            );
        }
        return Ok(());
    }

    let (report, counts) = index.repair(truth).await?;
    if json {
        return print_json(&serde_json::json!({ "drift": report, "reconciled": counts }));
    }
    if report.is_clean() {
        println!("Index matches the project");
    } else {
        println!(
            "Reindexed {}, removed {}, failed {}",
            counts.reindexed, counts.removed, counts.failed
        );
    }
    Ok(())
}
