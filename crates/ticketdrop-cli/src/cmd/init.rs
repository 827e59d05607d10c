//! `td init`: create the `.ticketdrop/` project skeleton.

use crate::output::{CliError, OutputMode, fail, pretty_kv, render_mode};
use anyhow::Context as _;
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use ticketdrop_core::config::{ProjectConfig, ProjectPaths, TICKETDROP_DIR, default_config_toml};
use ticketdrop_core::queue::SqliteQueue;
use ticketdrop_core::store::SqliteStore;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite the default config even if `.ticketdrop/` already exists.
    /// Tickets and queued updates are kept.
    #[arg(long)]
    pub force: bool,
}

const GITIGNORE: &str = "tickets.db\ntickets.db-wal\ntickets.db-shm\nlock\nexports/\n";

#[derive(Debug, Serialize)]
struct InitReport {
    root: String,
    config: String,
    database: String,
    exports: String,
}

/// Execute `td init`:
///
/// ```text
/// .ticketdrop/
///   config.toml   (defaults for every key)
///   tickets.db    (tickets, audit trail, offline queue)
///   exports/      (billing CSVs)
///   .gitignore
/// ```
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let paths = ProjectPaths::new(project_root);
    if paths.is_initialized() && !args.force {
        return fail(
            output,
            &CliError {
                suggestion: Some("Use `td init --force` to rewrite the config.".to_string()),
                ..CliError::new(format!("{TICKETDROP_DIR}/ already exists"))
            },
        );
    }

    let dir = paths.dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let config_path = paths.config();
    std::fs::write(&config_path, default_config_toml()?)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    std::fs::write(dir.join(".gitignore"), GITIGNORE).context("Failed to write .gitignore")?;

    let exports = paths.exports(&ProjectConfig::default().export);
    std::fs::create_dir_all(&exports)
        .with_context(|| format!("Failed to create {}", exports.display()))?;

    // Opening both stores runs every migration.
    let database = paths.database();
    SqliteStore::open(&database).context("Failed to initialize ticket database")?;
    SqliteQueue::open(&database).context("Failed to initialize offline queue")?;

    tracing::info!(root = %project_root.display(), "project initialized");
    let report = InitReport {
        root: project_root.display().to_string(),
        config: config_path.display().to_string(),
        database: database.display().to_string(),
        exports: exports.display().to_string(),
    };
    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "initialized {}", r.root),
        |r, w| {
            writeln!(w, "Initialized ticketdrop project")?;
            pretty_kv(w, "Config", &r.config)?;
            pretty_kv(w, "Database", &r.database)?;
            pretty_kv(w, "Exports", &r.exports)
        },
    )
}
