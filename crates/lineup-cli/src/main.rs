use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lineup_core::{Config, FaceEngine, FaceStore};
use lineup_model::OnnxBackend;

#[derive(Parser)]
#[command(name = "lineup", about = "Face identification against a persisted gallery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register faces from an image or a folder of images
    Register {
        /// Path to a single image
        #[arg(short, long, conflicts_with = "folder")]
        image: Option<PathBuf>,
        /// Folder of images all showing one person
        #[arg(short, long)]
        folder: Option<PathBuf>,
        /// Identity label (defaults to the folder name; required with --image)
        #[arg(short, long)]
        name: Option<String>,
        /// From a folder: also register mirror and brightness variants
        #[arg(short, long)]
        augment: bool,
        /// From a single image: register every detected face under the name
        #[arg(long)]
        all_faces: bool,
    },
    /// Recognize the faces in an image against the gallery
    Recognize {
        /// Path to the image
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Check whether two images show the same face
    Verify {
        /// First image
        #[arg(long)]
        image1: PathBuf,
        /// Second image
        #[arg(long)]
        image2: PathBuf,
    },
    /// List registered identities and their photo counts
    List,
    /// Remove one identity from the gallery
    Remove {
        /// Identity label to remove
        #[arg(short, long)]
        name: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let store = FaceStore::new(&config.gallery_path);

    match cli.command {
        Commands::List => cmd_list(&store, &config),
        Commands::Remove { name } => cmd_remove(&store, &name),
        command => {
            // The remaining commands run inference and need the models.
            let backend = OnnxBackend::load(
                &config.detector_model_path(),
                &config.embedding_model_path(),
            )
            .with_context(|| {
                format!("failed to load ONNX models from {}", config.model_dir.display())
            })?;
            let mut engine = FaceEngine::new(Box::new(backend), store, config.clone());

            match command {
                Commands::Register {
                    image,
                    folder,
                    name,
                    augment,
                    all_faces,
                } => cmd_register(
                    &mut engine,
                    &config,
                    image.as_deref(),
                    folder.as_deref(),
                    name.as_deref(),
                    augment || config.augment,
                    all_faces,
                ),
                Commands::Recognize { image } => cmd_recognize(&mut engine, &image),
                Commands::Verify { image1, image2 } => cmd_verify(&mut engine, &image1, &image2),
                Commands::List | Commands::Remove { .. } => unreachable!(),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_register(
    engine: &mut FaceEngine,
    config: &Config,
    image: Option<&Path>,
    folder: Option<&Path>,
    name: Option<&str>,
    augment: bool,
    all_faces: bool,
) -> Result<()> {
    if let Some(folder) = folder {
        let count = engine.register_folder(folder, name, augment)?;
        let label = name.map(str::to_string).unwrap_or_else(|| {
            folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        println!(
            "Registered {count} embedding(s) from '{}' as '{label}'.",
            folder.display()
        );
        if count > 0 && count < config.min_photos_recommended {
            println!(
                "  Tip: accuracy improves with at least {} photos per person (or use --augment).",
                config.min_photos_recommended
            );
        }
    } else if let (Some(image), Some(name)) = (image, name) {
        let count = engine.register_image(image, name, all_faces)?;
        if count > 0 {
            println!("Registered {count} face(s) as '{name}'.");
        } else {
            println!("Nothing registered (check that the file exists and contains a face).");
        }
    } else {
        bail!("provide --image PATH --name NAME, or --folder PATH [--name NAME]");
    }
    Ok(())
}

fn cmd_recognize(engine: &mut FaceEngine, image: &Path) -> Result<()> {
    let results = engine.recognize_path(image);
    if results.is_empty() {
        println!("No face detected.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        let identity = r.identity.as_deref().unwrap_or("Unknown");
        println!(
            "Face {}: {identity} (similarity: {:.3})",
            i + 1,
            r.similarity
        );
    }
    Ok(())
}

fn cmd_verify(engine: &mut FaceEngine, image1: &Path, image2: &Path) -> Result<()> {
    let outcome = engine
        .verify(image1, image2)
        .context("verification failed")?;
    println!("Verified: {}", outcome.verified);
    println!(
        "Distance: {:.4} (threshold: {:.4})",
        outcome.distance, outcome.threshold
    );
    Ok(())
}

fn cmd_list(store: &FaceStore, config: &Config) -> Result<()> {
    let total = store.count();
    if total == 0 {
        println!("The gallery is empty.");
        return Ok(());
    }
    let counts = store.count_by_identity();
    println!("Total {total} embedding(s), {} identities:", counts.len());
    for (identity, n) in &counts {
        let tip = if *n < config.min_photos_recommended {
            format!(" (recommend >= {} photos)", config.min_photos_recommended)
        } else {
            String::new()
        };
        println!("  - {identity}: {n} photo(s){tip}");
    }
    Ok(())
}

fn cmd_remove(store: &FaceStore, name: &str) -> Result<()> {
    let removed = store.remove_identity(name)?;
    if removed > 0 {
        println!("Removed {removed} embedding(s) for '{name}'.");
    } else {
        println!("No records for '{name}' in the gallery.");
    }
    Ok(())
}
