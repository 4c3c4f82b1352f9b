use std::path::Path;
use std::sync::Arc;

use dialoguer::Password;
use indicatif::{ProgressBar, ProgressStyle};
use panel_sync::snapshot::{
    export_inbounds, export_users, inbound_clients_as_users, protocol_breakdown, read_inbounds_snapshot,
    read_users_snapshot,
};
use panel_sync::{
    InboundReconciler, PasarGuardClient, ReconcileOptions, ReconciliationEngine, SnapshotStats, Summary, SyncError,
    SyncObserver, ThreeXuiClient, TracingObserver,
};
use panel_types::PanelKind;
use serde_json::json;
use tracing::{debug, warn};

use crate::cli::{ConnectionArgs, GuardCommands, OutputFormat, XuiCommands};
use crate::config::{ConfigManager, ResolvedConnection, PASSWORD_ENV};
use crate::error::{CliError, Result};
use crate::utils::display;

pub struct CommandHandler {
    config_manager: ConfigManager,
    output_format: OutputFormat,
    observer: Arc<dyn SyncObserver>,
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

impl CommandHandler {
    pub fn new(config_manager: ConfigManager) -> Result<Self> {
        config_manager.validate_config()?;
        debug!("Using config file {}", config_manager.config_path().display());
        Ok(Self {
            config_manager,
            output_format: OutputFormat::Table,
            observer: Arc::new(TracingObserver),
        })
    }

    pub fn set_output_format(&mut self, format: OutputFormat) {
        self.output_format = format;
    }

    fn connection(&self, panel: PanelKind, overrides: &ConnectionArgs) -> Result<(ResolvedConnection, String)> {
        let resolved = self
            .config_manager
            .resolve(panel, overrides, std::env::var(PASSWORD_ENV).ok());
        let password = match resolved.password.clone() {
            Some(password) => password,
            None => Password::new()
                .with_prompt(format!("{} password for {}", panel, resolved.username))
                .interact()?,
        };
        Ok((resolved, password))
    }

    async fn connect_xui(&self, overrides: &ConnectionArgs) -> Result<ThreeXuiClient> {
        let (resolved, password) = self.connection(PanelKind::ThreeXui, overrides)?;
        let client = ThreeXuiClient::new(&resolved.client, self.observer.clone())?;

        let pb = spinner("Authenticating with 3X-UI...");
        let result = client.login(&resolved.credentials(password)).await;
        pb.finish_and_clear();
        result?;
        Ok(client)
    }

    async fn connect_guard(&self, overrides: &ConnectionArgs) -> Result<PasarGuardClient> {
        let (resolved, password) = self.connection(PanelKind::PasarGuard, overrides)?;
        let client = PasarGuardClient::new(&resolved.client, self.observer.clone())?;

        let pb = spinner("Authenticating with PasarGuard...");
        let result = client.login(&resolved.credentials(password)).await;
        pb.finish_and_clear();
        result?;
        Ok(client)
    }

    pub async fn handle_xui_command(&mut self, connection: ConnectionArgs, command: XuiCommands) -> Result<()> {
        match command {
            XuiCommands::ExportInbounds { output, no_traffic } => {
                self.export_inbounds(&connection, &output, !no_traffic).await
            }
            XuiCommands::ExportUsers { output } => self.export_xui_users(&connection, &output).await,
            XuiCommands::Import { file } => self.import_inbounds(&connection, &file).await,
        }
    }

    pub async fn handle_guard_command(&mut self, connection: ConnectionArgs, command: GuardCommands) -> Result<()> {
        match command {
            GuardCommands::Export { output } => self.export_guard_users(&connection, &output).await,
            GuardCommands::Import {
                file,
                groups,
                keep_groups,
            } => self.import_guard_users(&connection, &file, groups, keep_groups).await,
            GuardCommands::Groups => self.list_groups(&connection).await,
        }
    }

    pub async fn export_inbounds(&self, connection: &ConnectionArgs, output: &Path, with_traffic: bool) -> Result<()> {
        let client = self.connect_xui(connection).await?;

        let pb = spinner("Fetching inbounds...");
        let result = client.fetch_inbounds(with_traffic).await;
        pb.finish_and_clear();
        let inbounds = result?;

        write_snapshot(output, &export_inbounds(&inbounds)?)?;
        let stats = SnapshotStats::from_inbounds(&inbounds);

        match self.output_format {
            OutputFormat::Json => {
                let report = json!({
                    "file": output.display().to_string(),
                    "inbounds": inbounds.len(),
                    "protocols": protocol_breakdown(&inbounds),
                    "stats": stats,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Table => {
                display::success(&format!(
                    "Exported {} inbounds with {} clients to {}",
                    inbounds.len(),
                    stats.total,
                    output.display()
                ));
                for (protocol, count) in protocol_breakdown(&inbounds) {
                    println!("  {:<12} {}", protocol, count);
                }
                display::print_stats(&stats);
            }
        }
        Ok(())
    }

    pub async fn export_xui_users(&self, connection: &ConnectionArgs, output: &Path) -> Result<()> {
        let client = self.connect_xui(connection).await?;

        let pb = spinner("Fetching inbound clients...");
        let result = client.fetch_inbounds(true).await;
        pb.finish_and_clear();
        let users = inbound_clients_as_users(&result?);

        write_snapshot(output, &export_users(PanelKind::ThreeXui, &users)?)?;
        self.report_export(output, &SnapshotStats::from_users(&users))
    }

    pub async fn export_guard_users(&self, connection: &ConnectionArgs, output: &Path) -> Result<()> {
        let client = self.connect_guard(connection).await?;

        let pb = spinner("Fetching users...");
        let result = client.fetch_listing().await;
        pb.finish_and_clear();
        let users = result?;

        write_snapshot(output, &export_users(PanelKind::PasarGuard, &users)?)?;
        self.report_export(output, &SnapshotStats::from_users(&users))
    }

    fn report_export(&self, output: &Path, stats: &SnapshotStats) -> Result<()> {
        match self.output_format {
            OutputFormat::Json => {
                let report = json!({ "file": output.display().to_string(), "stats": stats });
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Table => {
                display::success(&format!("Exported {} users to {}", stats.total, output.display()));
                display::print_stats(stats);
            }
        }
        Ok(())
    }

    pub async fn import_inbounds(&self, connection: &ConnectionArgs, file: &Path) -> Result<()> {
        let mut batch = read_inbounds_snapshot(&read_snapshot(file)?)?;
        if batch.is_empty() {
            display::info("Snapshot contains no inbounds.");
            return Ok(());
        }
        display::info(&format!("Importing {} inbounds from {}", batch.len(), file.display()));

        let client = self.connect_xui(connection).await?;
        let reconciler = InboundReconciler::new(&client, self.observer.clone());
        let result = reconciler.reconcile_from_panel(&mut batch).await;
        self.finish_import("Inbound Import Summary", result)
    }

    pub async fn import_guard_users(
        &self,
        connection: &ConnectionArgs,
        file: &Path,
        groups: Vec<i64>,
        keep_groups: bool,
    ) -> Result<()> {
        if let Some(bad) = groups.iter().find(|id| **id <= 0) {
            return Err(CliError::InvalidInput(format!("group id must be positive, got {}", bad)));
        }

        let mut batch = read_users_snapshot(&read_snapshot(file)?)?;
        if batch.is_empty() {
            display::info("Snapshot contains no users.");
            return Ok(());
        }
        if let Some(source) = &batch.source_panel {
            display::info(&format!(
                "Importing {} users exported from {} on {}",
                batch.len(),
                source,
                batch.exported_at.as_deref().unwrap_or("an unknown date")
            ));
        }

        let mut options = ReconcileOptions::default();
        if !groups.is_empty() {
            options = options.with_group_override(groups);
        }
        options.clear_groups_when_empty = !keep_groups;

        let client = self.connect_guard(connection).await?;
        let engine = ReconciliationEngine::new(&client, self.observer.clone()).with_options(options);
        let result = engine.reconcile(&mut batch).await;
        self.finish_import("User Import Summary", result)
    }

    fn finish_import(&self, title: &str, result: std::result::Result<Summary, SyncError>) -> Result<()> {
        let summary = match result {
            Ok(summary) => summary,
            Err(SyncError::RunAborted { cause, summary }) => {
                warn!("Import stopped after {} of {} records", summary.processed(), summary.total);
                self.print_summary(title, &summary)?;
                return Err(CliError::SyncError(*cause));
            }
            Err(error) => return Err(error.into()),
        };

        self.print_summary(title, &summary)?;
        if summary.failed > 0 {
            return Err(CliError::PartialImport {
                failed: summary.failed,
            });
        }
        Ok(())
    }

    fn print_summary(&self, title: &str, summary: &Summary) -> Result<()> {
        match self.output_format {
            OutputFormat::Json => {
                let failures: Vec<_> = summary
                    .failures()
                    .map(|outcome| json!({ "index": outcome.index, "username": outcome.username }))
                    .collect();
                let report = json!({
                    "created": summary.created,
                    "updated": summary.updated,
                    "failed": summary.failed,
                    "total": summary.total,
                    "failures": failures,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Table => display::print_summary(title, summary),
        }
        Ok(())
    }

    pub async fn list_groups(&self, connection: &ConnectionArgs) -> Result<()> {
        let client = self.connect_guard(connection).await?;
        let groups = client.fetch_groups().await?;

        if groups.is_empty() {
            display::info("No groups found.");
            return Ok(());
        }

        match self.output_format {
            OutputFormat::Json => {
                let listing: Vec<_> = groups
                    .iter()
                    .map(|group| json!({ "id": group.id, "name": group.name }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            }
            OutputFormat::Table => {
                println!("{:<6} NAME", "ID");
                for group in &groups {
                    println!("{:<6} {}", group.id, group.name);
                }
            }
        }
        Ok(())
    }
}

fn read_snapshot(file: &Path) -> Result<Vec<u8>> {
    std::fs::read(file).map_err(|e| CliError::FileOperation(format!("Failed to read {}: {}", file.display(), e)))
}

fn write_snapshot(output: &Path, bytes: &[u8]) -> Result<()> {
    if output.exists() {
        display::warning(&format!("Overwriting {}", output.display()));
    }
    std::fs::write(output, bytes)
        .map_err(|e| CliError::FileOperation(format!("Failed to write {}: {}", output.display(), e)))
}
