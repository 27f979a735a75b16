use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing::{error, info, warn, Level};

use coachrs::config::{AppConfig, ClientConfig};
use coachrs::database::{Annotation, DashboardStore, PublishOutcome, VitaminLog};
use coachrs::error::CoachError;
use coachrs::export::export_table;
use coachrs::import::FileFingerprint;
use coachrs::logging::{init_logging, LogFormat, LogLevel};
use coachrs::pipeline::{run_file_with_progress, run_fingerprint};
use coachrs::summary::DashboardSummary;
use coachrs::{Recommendation, Targets};

/// coachrs - Health export coaching dashboard
///
/// Turns an Apple Health export into a per-day table of rolling averages,
/// target deviations, a composite score and a coaching recommendation.
#[derive(Parser)]
#[command(name = "coachrs")]
#[command(version)]
#[command(about = "Coaching dashboard pipeline for health exports", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Console log format
    #[arg(long, value_name = "FORMAT", value_enum, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over a health export
    Process {
        /// Export file (export.xml or export.xml.gz)
        #[arg(short, long)]
        file: PathBuf,

        /// Client id (default client if omitted)
        #[arg(long)]
        client: Option<String>,

        /// Also write the table to a file (.csv or .json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not update the dashboard store
        #[arg(long)]
        no_store: bool,

        /// Process even when nothing changed since the last run
        #[arg(long)]
        force: bool,
    },

    /// Show a client's cached dashboard
    Show {
        /// Client id (default client if omitted)
        #[arg(long)]
        client: Option<String>,

        /// Number of history entries to show
        #[arg(short, long, default_value = "14")]
        limit: usize,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a coach annotation to a client's dashboard
    Annotate {
        /// The note
        note: String,

        /// Client id (default client if omitted)
        #[arg(long)]
        client: Option<String>,

        /// Date the note refers to (today if omitted)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Vitamin and mineral logs
    Vitamins {
        #[command(subcommand)]
        action: VitaminAction,
    },

    /// Manage coached clients
    Clients {
        #[command(subcommand)]
        action: ClientAction,
    },

    /// List active clients with their last sync
    Roster,
}

#[derive(Subcommand)]
enum VitaminAction {
    /// Record a day's supplements, replacing any entry for that date
    Log {
        /// Client id (default client if omitted)
        #[arg(long)]
        client: Option<String>,

        /// Day of intake (today if omitted)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Vitamin D (IU)
        #[arg(long, default_value_t = 0)]
        vitamin_d: u32,

        /// Vitamin C (mg)
        #[arg(long, default_value_t = 0)]
        vitamin_c: u32,

        /// Vitamin B12 (mcg)
        #[arg(long, default_value_t = 0)]
        vitamin_b12: u32,

        /// Omega-3 (mg)
        #[arg(long, default_value_t = 0)]
        omega3: u32,

        /// Magnesium (mg)
        #[arg(long, default_value_t = 0)]
        magnesium: u32,

        /// Zinc (mg)
        #[arg(long, default_value_t = 0)]
        zinc: u32,

        /// Iron (mg)
        #[arg(long, default_value_t = 0)]
        iron: u32,

        /// Anything else taken
        #[arg(long, default_value = "")]
        other: String,

        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Show logged entries, newest first
    List {
        /// Client id (default client if omitted)
        #[arg(long)]
        client: Option<String>,

        /// Number of entries to show
        #[arg(short, long, default_value = "14")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ClientAction {
    /// List all clients
    List,

    /// Add a client
    Add {
        /// Display name
        #[arg(long)]
        name: String,

        /// Explicit id (generated if omitted)
        #[arg(long)]
        id: Option<String>,

        /// Daily calories target (kcal)
        #[arg(long)]
        calories: Option<Decimal>,

        /// Daily steps target
        #[arg(long)]
        steps: Option<Decimal>,

        /// Daily water target (ml)
        #[arg(long)]
        water: Option<Decimal>,

        /// Nightly sleep target (hours)
        #[arg(long)]
        sleep: Option<Decimal>,

        /// Weekly weight change target (percent, negative for loss)
        #[arg(long, allow_hyphen_values = true)]
        weight_change: Option<Decimal>,
    },

    /// Remove a client and everything stored for them
    Remove { id: String },

    /// Make a client the default
    SetDefault { id: String },
}

/// `show --json` payload
#[derive(Serialize)]
struct ShowReport<'a> {
    #[serde(flatten)]
    summary: &'a DashboardSummary,
    annotations: &'a [Annotation],
}

fn main() {
    if let Err(err) = run() {
        report_error(&err);
        std::process::exit(1);
    }
}

fn report_error(err: &anyhow::Error) {
    let Some(coach_error) = err.downcast_ref::<CoachError>() else {
        error!(error = %err, "command failed");
        eprintln!("{} {:#}", "✗".red().bold(), err);
        return;
    };

    if coach_error.severity().to_tracing_level() == Level::WARN {
        warn!(error = %coach_error, "command stopped");
    } else {
        error!(
            error = %coach_error,
            severity = ?coach_error.severity(),
            retryable = coach_error.is_retryable(),
            "command failed"
        );
    }

    eprintln!("{} {}", "✗".red().bold(), coach_error.user_message());
    if coach_error.is_retryable() {
        eprintln!("  {}", "This looks temporary; try again in a moment.".dimmed());
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(AppConfig::default_config_path);
    let mut config = AppConfig::load_or_default(Some(config_path.as_path()))?;

    let mut log_config = config.logging.clone();
    log_config.level = LogLevel::from_verbosity(log_config.level, cli.verbose);
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(&log_config)?;

    match cli.command {
        Commands::Process {
            file,
            client,
            output,
            no_store,
            force,
        } => process(
            &config,
            &file,
            client.as_deref(),
            output.as_deref(),
            no_store,
            force,
        ),

        Commands::Show {
            client,
            limit,
            json,
        } => show(&config, client.as_deref(), limit, json),

        Commands::Annotate { note, client, date } => {
            annotate(&config, client.as_deref(), date, &note)
        }

        Commands::Vitamins { action } => vitamins(&config, action),

        Commands::Clients { action } => manage_clients(&mut config, &config_path, action),

        Commands::Roster => roster(&config),
    }
}

fn open_store(config: &AppConfig) -> Result<DashboardStore> {
    let path = config.settings.resolved_database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    Ok(DashboardStore::open(&path).map_err(CoachError::from)?)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn process(
    config: &AppConfig,
    file: &Path,
    client_id: Option<&str>,
    output: Option<&Path>,
    no_store: bool,
    force: bool,
) -> Result<()> {
    let client = config.resolve_client(client_id)?;
    let fingerprint = FileFingerprint::generate(file).map_err(CoachError::from)?;
    let pipeline_config = config.pipeline.to_pipeline_config(today());
    let run_id = run_fingerprint(&fingerprint.hash, &client.targets, &pipeline_config);
    let store = if no_store {
        None
    } else {
        Some(open_store(config)?)
    };

    if let Some(store) = &store {
        let current = store.is_current(&client.id, &run_id).map_err(CoachError::from)?;
        if current && !force {
            let message = format!(
                "Dashboard for {} is up to date, skipping (use --force to rerun)",
                client.name
            );
            println!("{}", message.yellow());
            return Ok(());
        }
    }

    println!(
        "{}",
        format!("Processing health export for {}...", client.name)
            .green()
            .bold()
    );

    let progress = ProgressBar::new(fingerprint.file_size);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}",
            )?
            .progress_chars("#>-"),
    );

    let result = run_file_with_progress(file, &client.targets, &pipeline_config, progress.clone());
    progress.finish_and_clear();
    let output_data = result?;

    let stats = &output_data.stats;
    println!("  Records scanned: {}", stats.records_seen);
    println!("  Records used:    {}", stats.accepted_total());
    println!("  Records skipped: {}", stats.skipped_total());
    info!(%stats, "parse statistics");

    let table = &output_data.table;
    let (Some(first), Some(last)) = (table.first_date(), table.last_date()) else {
        warn!(client = %client.id, "no data within the retention window");
        return Err(CoachError::Validation(format!(
            "No usable data in the last {} days of this export. {}'s dashboard was left unchanged.",
            pipeline_config.retention_days, client.name
        ))
        .into());
    };
    println!("  Parsed {} days: {} → {}", table.len(), first, last);

    if let Some(output_path) = output {
        let format = export_table(table, output_path).map_err(CoachError::from)?;
        println!("  Wrote {:?} to {}", format, output_path.display());
    }

    if let Some(store) = &store {
        match store
            .publish(&client.id, table, Some(&run_id))
            .map_err(CoachError::from)?
        {
            PublishOutcome::Stored { rows } => {
                println!("  Dashboard cache updated ({} days)", rows)
            }
            PublishOutcome::NoData => println!("  Dashboard cache left unchanged"),
        }
    }

    let summary = DashboardSummary::from_table(table, &client.targets);
    if let Some(recommendation) = summary.latest_recommendation() {
        println!("  Latest recommendation: {}", paint(recommendation));
    }

    println!("{}", "✓ Processing completed".green());
    Ok(())
}

fn show(config: &AppConfig, client_id: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let client = config.resolve_client(client_id)?;
    let store = open_store(config)?;

    let Some(cached) = store.load(&client.id).map_err(CoachError::from)? else {
        let message = format!(
            "No dashboard for {} yet. Run `coachrs process` first.",
            client.name
        );
        println!("{}", message.yellow());
        return Ok(());
    };
    let annotations = store.annotations(&client.id).map_err(CoachError::from)?;

    let mut summary = DashboardSummary::from_table(&cached.table, &client.targets);
    summary.history.truncate(limit);

    if json {
        let report = ShowReport {
            summary: &summary,
            annotations: &annotations,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", client.name.bold());
    if let (Some(first), Some(last)) = (summary.first_date, summary.last_date) {
        println!("  {} → {} ({} days)", first, last, summary.days);
    }
    println!(
        "  Synced {}",
        cached.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    println!();

    print_targets(&client.targets);

    if let Some(latest) = &summary.latest {
        println!("{}", "Latest".bold());
        let mut builder = Builder::default();
        builder.push_record([
            "Date",
            "Weight avg",
            "Calories avg",
            "Steps avg",
            "Sleep avg",
            "Score",
            "Recommendation",
        ]);
        builder.push_record([
            latest.date.to_string(),
            fmt_decimal(latest.averages.weight, 1),
            fmt_decimal(latest.averages.calories, 0),
            fmt_decimal(latest.averages.steps, 0),
            fmt_decimal(latest.averages.sleep, 1),
            fmt_decimal(latest.composite_score, 3),
            latest
                .recommendation
                .map_or("—".to_string(), |rec| rec.to_string()),
        ]);
        println!("{}\n", builder.build().with(Style::rounded()));
    }

    match &summary.hydration {
        Some(hydration) => {
            println!("{}", "Hydration".bold());
            println!(
                "  Latest {} ml ({} vs target), 14-day avg {} ml",
                hydration.latest_water.round_dp(0),
                hydration
                    .latest_deviation
                    .map_or("—".to_string(), |dev| format!("{}%", dev.round_dp(1))),
                fmt_decimal(hydration.latest_average, 0)
            );
            println!(
                "  Days meeting target (≥90%): {} / {}\n",
                hydration.compliant_days, hydration.days_with_water
            );
        }
        None => println!("{}\n", "No water intake data found".dimmed()),
    }

    if !summary.periods.is_empty() {
        println!("{}", "Periods".bold());
        let mut builder = Builder::default();
        builder.push_record([
            "Period",
            "Dates",
            "Avg weight",
            "Avg calories",
            "Avg steps",
            "Avg sleep",
            "Avg score",
            "Weight Δ%",
        ]);
        for period in &summary.periods {
            builder.push_record([
                period.label.clone(),
                format!(
                    "{} → {}",
                    period.start.format("%d %b"),
                    period.end.format("%d %b")
                ),
                fmt_decimal(period.avg_weight, 1),
                fmt_decimal(period.avg_calories, 0),
                fmt_decimal(period.avg_steps, 0),
                fmt_decimal(period.avg_sleep, 1),
                fmt_decimal(period.avg_score, 3),
                fmt_decimal(period.weight_change, 2),
            ]);
        }
        println!("{}\n", builder.build().with(Style::rounded()));
    }

    println!("{}", "Coach annotations".bold());
    if annotations.is_empty() {
        println!("  {}", "No coach annotations yet".dimmed());
    }
    for annotation in &annotations {
        println!("  {}  {}", annotation.date, annotation.note);
    }
    println!();

    println!("{}", "Recommendation history".bold());
    if summary.history.is_empty() {
        println!("  {}", "Insufficient data so far".dimmed());
    }
    for entry in &summary.history {
        println!(
            "  {}  {:<9}  {}",
            entry.date,
            entry.period_label.as_deref().unwrap_or(""),
            paint(entry.recommendation)
        );
    }

    Ok(())
}

fn annotate(
    config: &AppConfig,
    client_id: Option<&str>,
    date: Option<NaiveDate>,
    note: &str,
) -> Result<()> {
    let client = config.resolve_client(client_id)?;
    let note = note.trim();
    if note.is_empty() {
        return Err(CoachError::Validation("An annotation needs some text".to_string()).into());
    }

    let store = open_store(config)?;
    let annotation = store
        .add_annotation(&client.id, date.unwrap_or_else(today), note)
        .map_err(CoachError::from)?;

    info!(client = %client.id, id = annotation.id, "annotation added");
    println!(
        "{}",
        format!("✓ Annotated {} for {}", annotation.date, client.name).green()
    );
    Ok(())
}

fn vitamins(config: &AppConfig, action: VitaminAction) -> Result<()> {
    let store = open_store(config)?;

    match action {
        VitaminAction::Log {
            client,
            date,
            vitamin_d,
            vitamin_c,
            vitamin_b12,
            omega3,
            magnesium,
            zinc,
            iron,
            other,
            notes,
        } => {
            let client = config.resolve_client(client.as_deref())?;
            let log = VitaminLog {
                client_id: client.id.clone(),
                date: date.unwrap_or_else(today),
                vitamin_d,
                vitamin_c,
                vitamin_b12,
                omega3,
                magnesium,
                zinc,
                iron,
                other: other.trim().to_string(),
                notes: notes.trim().to_string(),
            };
            store.upsert_vitamin_log(&log).map_err(CoachError::from)?;
            println!(
                "{}",
                format!("✓ Saved vitamin entry for {} on {}", client.name, log.date).green()
            );
        }

        VitaminAction::List { client, limit } => {
            let client = config.resolve_client(client.as_deref())?;
            let logs = store.vitamin_logs(&client.id).map_err(CoachError::from)?;
            if logs.is_empty() {
                println!("No entries yet for {}.", client.name);
                return Ok(());
            }

            let mut builder = Builder::default();
            builder.push_record([
                "Date",
                "D (IU)",
                "C (mg)",
                "B12 (mcg)",
                "Omega-3 (mg)",
                "Mg (mg)",
                "Zinc (mg)",
                "Iron (mg)",
                "Other",
                "Notes",
            ]);
            for log in logs.iter().take(limit) {
                builder.push_record([
                    log.date.to_string(),
                    log.vitamin_d.to_string(),
                    log.vitamin_c.to_string(),
                    log.vitamin_b12.to_string(),
                    log.omega3.to_string(),
                    log.magnesium.to_string(),
                    log.zinc.to_string(),
                    log.iron.to_string(),
                    log.other.clone(),
                    log.notes.clone(),
                ]);
            }
            println!("{}", builder.build().with(Style::rounded()));
        }
    }

    Ok(())
}

fn manage_clients(config: &mut AppConfig, config_path: &Path, action: ClientAction) -> Result<()> {
    match action {
        ClientAction::List => {
            if config.clients.is_empty() {
                println!("No clients configured. Add one with `coachrs clients add --name <NAME>`.");
                return Ok(());
            }

            let default_id = config.default_client_id.clone();
            let mut builder = Builder::default();
            builder.push_record([
                "",
                "Id",
                "Name",
                "Calories",
                "Steps",
                "Water",
                "Sleep",
                "Weight %/wk",
                "Active",
            ]);
            for client in config.list_clients() {
                let targets = &client.targets;
                let is_default = default_id.as_deref() == Some(client.id.as_str());
                builder.push_record([
                    if is_default { "*" } else { "" }.to_string(),
                    client.id.clone(),
                    client.name.clone(),
                    targets.calories.to_string(),
                    targets.steps.to_string(),
                    targets.water.to_string(),
                    targets.sleep.to_string(),
                    targets.weight_change_pct_per_week.to_string(),
                    if client.active { "yes" } else { "no" }.to_string(),
                ]);
            }
            println!("{}", builder.build().with(Style::rounded()));
            return Ok(());
        }

        ClientAction::Add {
            name,
            id,
            calories,
            steps,
            water,
            sleep,
            weight_change,
        } => {
            let defaults = Targets::default();
            let targets = Targets {
                calories: calories.unwrap_or(defaults.calories),
                steps: steps.unwrap_or(defaults.steps),
                water: water.unwrap_or(defaults.water),
                sleep: sleep.unwrap_or(defaults.sleep),
                weight_change_pct_per_week: weight_change
                    .unwrap_or(defaults.weight_change_pct_per_week),
            };
            let client = ClientConfig::new(name, id, targets);
            let client_id = client.id.clone();
            config.add_client(client)?;
            println!("{}", format!("✓ Added client {}", client_id).green());
        }

        ClientAction::Remove { id } => {
            let removed = config.remove_client(&id)?;
            match open_store(config).and_then(|store| Ok(store.purge_client(&id)?)) {
                Ok(rows) => info!(client = %id, rows, "client data removed"),
                Err(e) => warn!(client = %id, error = %e, "could not remove stored client data"),
            }
            println!("{}", format!("✓ Removed client {}", removed.name).green());
        }

        ClientAction::SetDefault { id } => {
            config.set_default_client(&id)?;
            println!("{}", format!("✓ Default client is now {}", id).green());
        }
    }

    config.save_to_file(config_path)
}

fn roster(config: &AppConfig) -> Result<()> {
    let clients = config.active_clients();
    if clients.is_empty() {
        println!("No active clients.");
        return Ok(());
    }

    let store = open_store(config)?;
    let mut builder = Builder::default();
    builder.push_record(["Client", "Last sync", "Days", "Latest recommendation"]);

    for client in clients {
        let row = match store.load(&client.id) {
            Ok(Some(cached)) => {
                let latest = DashboardSummary::from_table(&cached.table, &client.targets)
                    .latest_recommendation()
                    .map_or("—".to_string(), |rec| rec.to_string());
                [
                    client.name.clone(),
                    cached
                        .updated_at
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M")
                        .to_string(),
                    cached.row_count.to_string(),
                    latest,
                ]
            }
            Ok(None) => [
                client.name.clone(),
                "never".to_string(),
                "0".to_string(),
                "—".to_string(),
            ],
            Err(e) => {
                warn!(client = %client.id, error = %e, "unreadable cached dashboard");
                [
                    client.name.clone(),
                    "error".to_string(),
                    "—".to_string(),
                    "—".to_string(),
                ]
            }
        };
        builder.push_record(row);
    }

    println!("{}", builder.build().with(Style::rounded()));

    let stats = store.get_stats().map_err(CoachError::from)?;
    let footer = format!(
        "{} cached dashboards, {} days in total",
        stats.entry_count, stats.total_rows
    );
    println!("{}", footer.dimmed());
    Ok(())
}

fn print_targets(targets: &Targets) {
    println!("{}", "Targets".bold());
    println!(
        "  Calories {} kcal · Steps {} · Water {} ml · Sleep {} h · Weight {}%/week\n",
        targets.calories,
        targets.steps,
        targets.water,
        targets.sleep,
        targets.weight_change_pct_per_week
    );
}

fn fmt_decimal(value: Option<Decimal>, dp: u32) -> String {
    value.map_or("—".to_string(), |v| v.round_dp(dp).to_string())
}

fn paint(recommendation: Recommendation) -> ColoredString {
    let label = recommendation.label();
    match recommendation {
        Recommendation::HoldSteady => label.green(),
        Recommendation::MonitorTrend => label.cyan(),
        Recommendation::LossTooSlow | Recommendation::LossTooAggressive => label.yellow(),
        Recommendation::SleepDeficit | Recommendation::UnderHydrated => label.red(),
        Recommendation::InsufficientData => label.dimmed(),
    }
}
