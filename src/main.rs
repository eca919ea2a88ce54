/// NDJSON Loader
///
/// Loads a directory of JSON Lines table exports into PostgreSQL.
use anyhow::{Context, Result};
use clap::Parser;
use ndjson_loader::cli::Cli;
use ndjson_loader::db::Database;
use ndjson_loader::etl::parsers::JsonLineDecoder;
use ndjson_loader::etl::DecoderRegistry;
use ndjson_loader::{Importer, Progress};
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.validate()?;

    println!("🚀 Starting NDJSON Loader...");

    let database_url = match &cli.database_url {
        Some(url) => url.clone(),
        None => env::var("DATABASE_URL")
            .context("DATABASE_URL not found in environment. Please check your .env file or pass --database-url")?,
    };

    println!("\n💾 Connecting to PostgreSQL database...");
    let database = Database::new(&database_url, cli.max_connections).await?;
    database.test_connection().await?;
    println!("✅ Database connected successfully!");

    if let Some(dir) = &cli.migrations {
        println!("📋 Running database migrations from {}...", dir.display());
        database.migrate(dir).await?;
        println!("✅ Database schema ready!");
    }

    let registry = build_registry(&cli);
    tracing::info!("Decoder registry: {:?}", registry);

    let importer = Arc::new(Importer::new(Arc::new(database.store()), registry, cli.import_config()));
    let cancel = CancellationToken::new();

    // Ctrl-C cancels the run; files already committed stay committed
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n🛑 Interrupt received, cancelling import...");
                cancel.cancel();
            }
        });
    }

    let reporter = {
        let importer = importer.clone();
        let interval = cli.progress_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Some(progress) = importer.snapshot() {
                    print_progress(&progress);
                }
            }
        })
    };

    println!("\n📂 Importing from {}", cli.root_dir.display());
    let (progress, result) = importer.import_all(&cancel, &cli.root_dir).await;
    reporter.abort();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
    } else {
        print_final_stats(&progress);
    }

    match result {
        Ok(()) => {
            println!("\n✨ Import complete!");
            Ok(())
        }
        Err(e) => {
            eprintln!("\n❌ Import failed: {}", e);
            if let Some(failures) = e.failures() {
                for (i, failure) in failures.iter().enumerate() {
                    eprintln!("   {}. {}", i + 1, failure);
                }
            }
            std::process::exit(e.exit_code());
        }
    }
}

/// One decoder per `--table`, or accept every table when none are named
fn build_registry(cli: &Cli) -> DecoderRegistry {
    if cli.tables.is_empty() {
        return DecoderRegistry::new().with_fallback(JsonLineDecoder::new());
    }

    cli.tables
        .iter()
        .fold(DecoderRegistry::new(), |registry, table| registry.register(table.as_str(), JsonLineDecoder::new()))
}

fn print_progress(p: &Progress) {
    let eta = p.eta.map(|eta| format!("{}s", eta.as_secs())).unwrap_or_else(|| "unknown".to_string());
    println!(
        "📊 Progress: {}/{} files inserted, {} decoded, {} failed | {} rows | {:.0} rows/sec | ETA {}",
        format_number(p.inserted_files),
        format_number(p.total_files),
        format_number(p.decoded_files),
        format_number(p.failed_files),
        format_number(p.inserted_rows),
        p.rows_per_second,
        eta
    );
}

fn print_final_stats(p: &Progress) {
    println!("\n📊 Import Statistics:");
    println!("   ⏱️  Total time: {:.2}s", p.elapsed.as_secs_f64());
    println!(
        "   📦 Files: {} total, {} inserted, {} failed, {} not processed",
        format_number(p.total_files),
        format_number(p.inserted_files),
        format_number(p.failed_files),
        format_number(p.total_files.saturating_sub(p.inserted_files + p.failed_files))
    );
    println!("   ✅ Success rate: {:.1}%", p.success_rate());
    println!("   📝 Rows decoded: {}", format_number(p.decoded_rows));
    println!("   💾 Rows inserted: {}", format_number(p.inserted_rows));
    println!("   ⚡ Speed: {:.2} files/sec", p.files_per_second());
    println!("   ⚡ Throughput: {:.0} rows/sec", p.rows_per_second);
}

/// Format a number with thousand separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}
