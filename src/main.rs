use anyhow::Result;
use clap::Parser;
use snapshot_reconcile::{
    Pipeline, ReconcileConfig, RunFailure, RunRequest, RunStage, SnapshotSource,
};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "snapshot-reconcile",
    version,
    about = "Highlight registry entries that changed between the two latest snapshots"
)]
struct Cli {
    /// Output artifact (.xlsx, .csv with .marks.json sidecar, .html or .json)
    output: PathBuf,

    /// Snapshot tables (.xlsx/.xls/.csv/.tsv) in ingestion order (at least two)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Explicit snapshot date, repeatable: <SOURCE>:<YYYY/MM/DD>
    #[arg(long = "date", value_name = "SOURCE:DATE", value_parser = parse_date_override)]
    dates: Vec<(String, String)>,

    /// JSON config overriding identity columns, excluded columns and colors
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the run report as JSON instead of progress lines
    #[arg(long, default_value_t = false)]
    json: bool,
}

/// Split on the last ':' so drive-letter paths survive.
fn parse_date_override(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.rsplit_once(':') {
        Some((source, date)) if !source.is_empty() && !date.is_empty() => {
            Ok((source.to_string(), date.to_string()))
        }
        _ => Err(format!("expected <SOURCE>:<YYYY/MM/DD>, got '{}'", raw)),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("❌ {:#}", err);
            let code = err
                .downcast_ref::<RunFailure>()
                .map(|f| f.error.exit_code())
                .unwrap_or(1);
            process::exit(code);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ReconcileConfig::from_json_file(path)?,
        None => ReconcileConfig::default(),
    };

    let sources: Vec<SnapshotSource> = cli.inputs.iter().cloned().map(SnapshotSource::new).collect();
    let mut request = RunRequest::new(sources, cli.output.clone()).with_config(config);

    for (source, date) in &cli.dates {
        if !request.sources.iter().any(|s| &s.id == source) {
            tracing::warn!(source = %source, "--date given for a source that is not an input");
            continue;
        }
        request = request.with_date(source.clone(), date.clone());
    }

    let quiet = cli.json;
    let mut pipeline = Pipeline::new().with_observer(move |stage| {
        if !quiet {
            print_stage(stage);
        }
        ControlFlow::Continue(())
    });

    let report = pipeline.run(&request)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("✓ Loaded {} snapshots", report.snapshots.len());
    for snapshot in &report.snapshots {
        println!(
            "   {}. {} ({}) - {} rows",
            snapshot.sequence, snapshot.source, snapshot.snapshot_date, snapshot.rows
        );
    }
    if report.structure.is_consistent() {
        println!("✓ Column structure consistent");
    } else {
        println!("⚠️  {}", report.structure.summary());
        println!("   Only the latest snapshot was emitted, every cell flagged");
    }
    println!("✓ {} rows emitted", report.rows_emitted);
    println!("✓ {} identities changed", report.changed_identities);
    println!("✅ Written to {}", report.artifact.path.display());
    if let Some(sidecar) = &report.artifact.sidecar {
        println!("   Marks: {}", sidecar.display());
    }
    println!("   sha256: {}", report.artifact.sha256);

    Ok(())
}

fn print_stage(stage: RunStage) {
    match stage {
        RunStage::Loading => println!("📂 Loading snapshots..."),
        RunStage::Validating => println!("🔍 Checking column structure..."),
        RunStage::Reconciling => println!("🔗 Matching identities and comparing fields..."),
        RunStage::Annotating => println!("🎨 Applying marks..."),
        RunStage::Done => println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"),
        RunStage::Failed => {}
    }
}
