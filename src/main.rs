use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use serde::Deserialize;

use ledgercat::{
    ArtifactStore, Categorizer, CategoryExamples, Classifier, ClassifyRequest, CorrectionRequest,
    ServiceConfig, UserId, DEFAULT_DIMENSIONS,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Data directory holding artifacts and correction logs
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train the global artifact from labeled samples and publish it
    TrainGlobal {
        /// JSON Lines file of {"description", "category_id", "label"?} samples
        #[arg(long)]
        data: PathBuf,
        /// Feature vector dimension
        #[arg(long, default_value_t = DEFAULT_DIMENSIONS)]
        dimensions: usize,
    },
    /// Classify one description for one user
    Classify {
        #[arg(long)]
        user: String,
        #[arg(long)]
        text: String,
    },
    /// Submit a correction for one user
    Correct {
        #[arg(long)]
        user: String,
        #[arg(long)]
        text: String,
        /// The category the user actually wants
        #[arg(long)]
        corrected: u32,
        /// What the model had predicted, if anything
        #[arg(long)]
        original: Option<u32>,
    },
    /// Rebuild a user's personalized artifact from their correction history
    Retrain {
        #[arg(long)]
        user: String,
    },
    /// Show what an artifact knows (global by default)
    Inspect {
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct LabeledSample {
    description: String,
    category_id: u32,
    #[serde(default)]
    label: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let data_dir = args
        .data_dir
        .unwrap_or_else(ArtifactStore::default_data_dir);

    match args.command {
        Command::TrainGlobal { data, dimensions } => train_global(&data_dir, &data, dimensions),
        Command::Classify { user, text } => classify(&data_dir, user, text).await,
        Command::Correct {
            user,
            text,
            corrected,
            original,
        } => correct(&data_dir, user, text, corrected, original).await,
        Command::Retrain { user } => retrain(&data_dir, user),
        Command::Inspect { user } => inspect(&data_dir, user),
    }
}

fn train_global(data_dir: &PathBuf, data: &PathBuf, dimensions: usize) -> anyhow::Result<()> {
    let start = Instant::now();
    let reader = BufReader::new(
        File::open(data).with_context(|| format!("opening training data {:?}", data))?,
    );

    let mut examples: HashMap<u32, Vec<String>> = HashMap::new();
    let mut labels: HashMap<u32, String> = HashMap::new();
    let mut total = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: LabeledSample = serde_json::from_str(&line)
            .with_context(|| format!("parsing training sample on line {}", index + 1))?;
        if let Some(label) = sample.label {
            labels.entry(sample.category_id).or_insert(label);
        }
        examples
            .entry(sample.category_id)
            .or_default()
            .push(sample.description);
        total += 1;
    }
    info!("Loaded {} samples across {} categories", total, examples.len());

    let mut builder = Classifier::builder().with_dimensions(dimensions);
    let mut ids: Vec<u32> = examples.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        let mut category = CategoryExamples::new(id)
            .with_examples(examples.remove(&id).unwrap_or_default());
        if let Some(label) = labels.get(&id) {
            category = category.with_label(label.clone());
        }
        builder = builder.add_category(category)?;
    }
    let classifier = builder.build()?;

    let store = ArtifactStore::new(data_dir)?;
    store.publish_global(&classifier)?;
    println!(
        "Published global artifact: {} categories, {} dimensions (took {:.2?})",
        classifier.info().num_categories,
        dimensions,
        start.elapsed()
    );
    Ok(())
}

async fn classify(data_dir: &PathBuf, user: String, text: String) -> anyhow::Result<()> {
    let service = Categorizer::open(ServiceConfig::with_data_dir(data_dir))?;
    let start = Instant::now();
    let result = service
        .classify(ClassifyRequest {
            user_id: user,
            description: text,
        })
        .await?;

    match result.category_id {
        Some(id) => println!("{} -> category {}", result.description, id),
        None => println!("{} -> unknown", result.description),
    }
    info!("Classification took {:.2?}", start.elapsed());
    Ok(())
}

async fn correct(
    data_dir: &PathBuf,
    user: String,
    text: String,
    corrected: u32,
    original: Option<u32>,
) -> anyhow::Result<()> {
    let service = Categorizer::open(ServiceConfig::with_data_dir(data_dir))?;
    let result = service
        .submit_correction(CorrectionRequest {
            user_id: user.clone(),
            description: text,
            original_category_id: original,
            corrected_category_id: corrected,
        })
        .await?;

    println!("Correction recorded for {}", user);
    if result.retrain_triggered {
        // The process exits right after this command, so run the triggered
        // retrain to completion instead of leaving it queued.
        let outcome = service.retrain_now(&user)?;
        println!("Retrain outcome: {:?}", outcome);
    }
    Ok(())
}

fn retrain(data_dir: &PathBuf, user: String) -> anyhow::Result<()> {
    let start = Instant::now();
    let store = std::sync::Arc::new(ArtifactStore::new(data_dir)?);
    let log = std::sync::Arc::new(ledgercat::CorrectionLog::new(data_dir)?);
    let config = ServiceConfig::with_data_dir(data_dir);
    let retrainer = ledgercat::Retrainer::new(
        store,
        log,
        ledgercat::ModelCache::new(config.cache_capacity),
        &config,
    );

    let user_id = UserId::new(&user)?;
    let outcome = retrainer.retrain(&user_id)?;
    println!("Retrain outcome for {}: {:?} (took {:.2?})", user, outcome, start.elapsed());
    Ok(())
}

fn inspect(data_dir: &PathBuf, user: Option<String>) -> anyhow::Result<()> {
    let store = ArtifactStore::new(data_dir)?;
    let classifier = match &user {
        Some(user) => store.load(&UserId::new(user)?)?,
        None => store.load_global()?,
    };

    let info = classifier.info();
    println!(
        "Artifact: {} ({} categories, {} dimensions, trained {})",
        user.as_deref().unwrap_or("global"),
        info.num_categories,
        info.dimensions,
        info.trained_at
    );
    for id in &info.category_ids {
        match info.labels.get(id) {
            Some(label) => println!("  {:>4}  {}", id, label),
            None => println!("  {:>4}", id),
        }
    }
    Ok(())
}
