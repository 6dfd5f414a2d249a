//! Output formatting for the CLI.
//!
//! - Human-readable default output on stdout
//! - JSON output (`--json`)
//! - Progress and status lines on stderr, so JSON stays parseable

use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::Result;

use docshare_core::UploadProgressSnapshot;
use docshare_sync::{ServerInfo, ShareEventEmitter, ShareOutcome, ShareRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

pub fn print_server_info(info: &ServerInfo) {
    println!("User:        {} ({})", info.user.name, info.user.id);
    match (info.limits.min_chunk_size, info.limits.max_chunk_size) {
        (None, None) => println!("Chunk size:  server default"),
        (min, max) => println!(
            "Chunk size:  {} - {}",
            min.map(format_bytes).unwrap_or_else(|| "default".into()),
            max.map(format_bytes).unwrap_or_else(|| "default".into())
        ),
    }
    println!(
        "Incremental: {}",
        if info.features.incremental_share { "yes" } else { "no" }
    );
}

pub fn print_shares(shares: &[ShareRecord], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(shares)?);
        return Ok(());
    }

    if shares.is_empty() {
        println!("No shares.");
        return Ok(());
    }
    for share in shares {
        print_share(share);
        println!();
    }
    Ok(())
}

pub fn print_share(share: &ShareRecord) {
    println!("Share:    {}  ({} {})", share.share_id, share.kind, share.doc_id);
    if !share.title.is_empty() {
        println!("Title:    {}", share.title);
    }
    if !share.url.is_empty() {
        println!("URL:      {}", share.url);
    }

    let mut access = Vec::new();
    if share.has_password {
        access.push("password".to_string());
    }
    if let Some(expires) = share.expires_at {
        access.push(format!("expires {}", expires.format("%Y-%m-%d %H:%M UTC")));
    }
    if let Some(limit) = share.visitor_limit {
        access.push(format!("{limit} visitors max"));
    }
    if !access.is_empty() {
        println!("Access:   {}", access.join(", "));
    }
    println!("Views:    {}", share.view_count);
}

pub fn print_outcome(outcome: &ShareOutcome, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let value = serde_json::json!({
            "share": outcome.share,
            "summary": outcome.summary,
            "incremental": outcome.incremental,
            "unchanged": outcome.unchanged,
            "uploadedBytes": outcome.uploaded_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let s = &outcome.summary;
    if outcome.unchanged {
        println!("Already up to date.");
    } else {
        println!(
            "{} upload: docs +{} ~{} -{}, assets +{} ~{} -{}, {} sent",
            if outcome.incremental { "Incremental" } else { "Full" },
            s.added_docs,
            s.updated_docs,
            s.deleted_docs,
            s.added_assets,
            s.updated_assets,
            s.deleted_assets,
            format_bytes(outcome.uploaded_bytes)
        );
    }
    if let Some(ref share) = outcome.share {
        print_share(share);
    }
    Ok(())
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

// =============================================================================
// Terminal Emitter
// =============================================================================

/// Writes engine events to stderr; progress only when the percent moves.
#[derive(Default)]
pub struct TerminalEmitter {
    last_percent: AtomicU8,
}

impl TerminalEmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShareEventEmitter for TerminalEmitter {
    fn emit_progress(&self, progress: &UploadProgressSnapshot) {
        let previous = self.last_percent.swap(progress.percent, Ordering::Relaxed);
        if previous != progress.percent {
            eprintln!(
                "  {:>3}%  {} / {}  ({}/{} assets)",
                progress.percent,
                format_bytes(progress.uploaded_bytes),
                format_bytes(progress.total_bytes),
                progress.completed_assets,
                progress.total_assets
            );
        }
    }

    fn emit_status(&self, message: &str) {
        eprintln!("{message}...");
    }

    fn emit_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}
