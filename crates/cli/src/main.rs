use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::server::{self, ServerState};
use kidneyscan_core::chat::ChatSession;
use kidneyscan_core::config::{self, AppConfig};
use kidneyscan_core::models::NewPatientForm;
use kidneyscan_core::pipeline::{self, SaveTarget};
use kidneyscan_core::records;
use std::io::BufRead;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            image,
            describe,
            patient,
            new_patient,
            json,
        } => run_analyze(cfg, image, describe, patient, new_patient, json).await,
        Commands::Patients { query, json } => run_patients(cfg, query, json).await,
        Commands::Patient { id, json } => run_patient(cfg, &id, json).await,
        Commands::Scan { id, json } => run_scan(cfg, &id, json).await,
        Commands::DeleteScan { id } => run_delete_scan(cfg, &id).await,
        Commands::Chat { context, messages } => run_chat(cfg, context, messages).await,
        Commands::Analytics { json } => run_analytics(cfg, json).await,
        Commands::Serve { bind, provider } => run_serve(cfg, bind, provider).await,
    }
}

#[derive(Parser)]
#[command(name = "kidneyscan")]
#[command(about = "Kidney-stone CT scan analysis client", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct NewPatientArgs {
    /// Create a patient with this name and save the scan against it
    #[arg(long = "new-patient-name", requires = "age")]
    name: Option<String>,
    /// Age of the new patient
    #[arg(long = "new-patient-age")]
    age: Option<String>,
    /// Gender of the new patient (default Male)
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload an image for detection
    Analyze {
        /// Image file to analyse
        image: PathBuf,
        /// Generate a report description when the backend gives none
        #[arg(long)]
        describe: bool,
        /// Save the result against an existing patient id
        #[arg(long, conflicts_with = "name")]
        patient: Option<String>,
        #[command(flatten)]
        new_patient: NewPatientArgs,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// List or search patients
    Patients {
        /// Case-insensitive name filter
        #[arg(short, long)]
        query: Option<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one patient with their scans
    Patient {
        id: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one scan
    Scan {
        id: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a scan and its stored images
    DeleteScan { id: String },
    /// Ask the assistant about an analysis
    Chat {
        /// Report text sent with every question
        #[arg(long, default_value = "")]
        context: String,
        /// Questions to send; read from stdin line by line when omitted
        messages: Vec<String>,
    },
    /// Show the classification dashboard numbers
    Analytics {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the description proxy server
    Serve {
        /// Address to bind, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
        /// Text generator to use, overrides description.provider
        #[arg(long)]
        provider: Option<String>,
    },
}

fn save_target(patient: Option<String>, args: NewPatientArgs) -> SaveTarget {
    if let Some(id) = patient {
        return SaveTarget::Existing(id);
    }
    match args.name {
        Some(name) => SaveTarget::New(NewPatientForm {
            name,
            age: args.age.unwrap_or_default(),
            gender: args.gender.unwrap_or_default(),
            phone: args.phone.unwrap_or_default(),
            address: args.address.unwrap_or_default(),
            notes: args.notes.unwrap_or_default(),
        }),
        None => SaveTarget::None,
    }
}

async fn run_analyze(
    cfg: AppConfig,
    image: PathBuf,
    describe: bool,
    patient: Option<String>,
    new_patient: NewPatientArgs,
    json: bool,
) -> Result<()> {
    let target = save_target(patient, new_patient);
    let summary = pipeline::run_analysis(&cfg, &image, describe, target).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    let r = &summary.result;
    println!(
        "label: {}, confidence: {}, analysed in {} ms",
        r.label, r.confidence, summary.duration_ms
    );
    if let Some(count) = r.stone_count {
        println!("stones: {count}");
    }
    for (name, url) in [
        ("annotated", r.annotated_image_url.as_deref()),
        ("original", r.original_image_url.as_deref()),
        ("gradcam", r.gradcam_url.as_deref()),
    ] {
        if let Some(url) = url {
            println!("{name}: {}", preview(url));
        }
    }
    if !r.description.is_empty() {
        println!("\n{}\n", r.description);
    }
    if let Some(d) = summary.description.as_ref().and_then(|d| d.error.as_deref()) {
        println!("description fallback: {d}");
    }
    if let Some(saved) = &summary.saved {
        println!(
            "saved for patient {}{}",
            saved.patient_id,
            saved
                .scan_id
                .as_deref()
                .map(|id| format!(" as scan {id}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Data URIs are far too long for a terminal line.
fn preview(url: &str) -> String {
    if url.starts_with("data:") {
        let head: String = url.chars().take(32).collect();
        format!("{head}... ({} bytes)", url.len())
    } else {
        url.to_string()
    }
}

async fn run_patients(cfg: AppConfig, query: Option<String>, json: bool) -> Result<()> {
    let backend = pipeline::build_backend(&cfg)?;
    let query = query.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let patients = records::list_patients(backend.as_ref(), query).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&patients)?);
        return Ok(());
    }
    if patients.is_empty() {
        println!("no patients found");
    }
    for p in &patients {
        println!(
            "{}\t{}\t{}\t{}",
            p.id,
            p.name,
            p.age.map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
            p.last_scan_date.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn run_patient(cfg: AppConfig, id: &str, json: bool) -> Result<()> {
    let backend = pipeline::build_backend(&cfg)?;
    let resolver = pipeline::build_resolver(&cfg)?;
    let detail = records::load_patient(backend.as_ref(), &resolver, id)
        .await
        .with_context(|| format!("loading patient {id}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }
    let p = &detail.patient;
    println!("{} ({})", p.name, p.patient_id.as_deref().unwrap_or(&p.id));
    println!(
        "age: {}, gender: {}",
        p.age.map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
        p.gender.as_deref().unwrap_or("-")
    );
    println!("scans: {}", detail.scans.len());
    for s in &detail.scans {
        println!(
            "  {}\t{}\t{}\t{}",
            s.id,
            s.scan_date.as_deref().unwrap_or("-"),
            s.prediction,
            s.confidence
        );
    }
    Ok(())
}

async fn run_scan(cfg: AppConfig, id: &str, json: bool) -> Result<()> {
    let backend = pipeline::build_backend(&cfg)?;
    let resolver = pipeline::build_resolver(&cfg)?;
    let scan = records::load_scan(
        backend.as_ref(),
        &resolver,
        id,
        &cfg.save.default_model_version,
    )
    .await
    .with_context(|| format!("loading scan {id}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&scan)?);
        return Ok(());
    }
    println!("scan {}: {} ({})", scan.id, scan.prediction, scan.confidence);
    println!("model: {}", scan.model_version);
    println!("date: {}", scan.scan_date.as_deref().unwrap_or("-"));
    for (name, url) in [
        ("original", &scan.original_image_url),
        ("gradcam", &scan.gradcam_image_url),
        ("annotated", &scan.annotated_image_url),
    ] {
        if !url.is_empty() {
            println!("{name}: {}", preview(url));
        }
    }
    println!("notes: {}", scan.notes);
    Ok(())
}

async fn run_delete_scan(cfg: AppConfig, id: &str) -> Result<()> {
    let backend = pipeline::build_backend(&cfg)?;
    records::delete_scan(backend.as_ref(), id).await?;
    println!("deleted scan {id}");
    Ok(())
}

async fn run_chat(cfg: AppConfig, context: String, messages: Vec<String>) -> Result<()> {
    let backend = pipeline::build_backend(&cfg)?;
    let mut chat = ChatSession::new(context);
    let messages = if messages.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<Vec<_>>>()?
    } else {
        messages
    };
    for msg in messages.iter().filter(|m| !m.trim().is_empty()) {
        let reply = chat.send(backend.as_ref(), msg).await?;
        println!("> {}\n{}\n", msg.trim(), reply.text);
    }
    Ok(())
}

async fn run_analytics(cfg: AppConfig, json: bool) -> Result<()> {
    let backend = pipeline::build_backend(&cfg)?;
    let analytics = records::load_analytics(backend.as_ref()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&analytics)?);
        return Ok(());
    }
    println!(
        "total scans: {}, healthy: {}, ckd: {}",
        analytics.total_scans, analytics.healthy_count, analytics.ckd_count
    );
    for d in &analytics.distribution {
        println!("  {}\t{}", d.label, d.count);
    }
    for p in &analytics.accuracy_over_time {
        println!("  {}\t{:.1}", p.date, p.average_confidence);
    }
    Ok(())
}

async fn run_serve(cfg: AppConfig, bind: Option<String>, provider: Option<String>) -> Result<()> {
    let registry = pipeline::build_registry(&cfg);
    let mut state = ServerState::new(registry);
    state.provider = provider;
    let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
    server::serve(&bind, state).await
}
