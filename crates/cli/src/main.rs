mod upload;

use clap::{Args, Parser, Subcommand};
use profile_ann_core::config::{
    DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH, DEFAULT_MAX_ELEMENTS, DEFAULT_M, USER_IDS_FILE,
};
use profile_ann_core::embeddings::{load_embedding_dir, read_ids, read_matrix};
use profile_ann_core::{AnnIndex, AnnIndexConfig, EmbeddingMatrix, Neighbor, Space};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use upload::{ArtifactStore, DirectoryStore};

/// Results printed by the post-build smoke query.
const SMOKE_K: usize = 5;

#[derive(Parser, Debug)]
#[command(
    name = "build-ann-index",
    about = "Build, query, and publish profile ANN index artifacts"
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an index from an embedding directory and save it
    Build(BuildArgs),
    /// Print the nearest profiles to an indexed profile
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Embedding directory (embeddings.npy + user_ids.json), or a .npy/.bin matrix file
    #[arg(long)]
    embeddings: PathBuf,

    /// ID list for a matrix file (defaults to user_ids.json beside it)
    #[arg(long)]
    ids: Option<PathBuf>,

    /// Output artifact directory
    #[arg(short, long)]
    output: PathBuf,

    /// Candidate list size during construction
    #[arg(long, default_value_t = DEFAULT_EF_CONSTRUCTION)]
    ef_construction: usize,

    /// Maximum links per node per layer
    #[arg(long = "m", default_value_t = DEFAULT_M)]
    m: usize,

    /// Candidate list size during search
    #[arg(long, default_value_t = DEFAULT_EF_SEARCH)]
    ef_search: usize,

    /// Minimum graph capacity
    #[arg(long, default_value_t = DEFAULT_MAX_ELEMENTS)]
    max_elements: usize,

    /// Similarity space: cosine, l2, or ip
    #[arg(long, default_value = "cosine")]
    space: Space,

    /// Seed for layer assignment (reproducible builds)
    #[arg(long)]
    seed: Option<u64>,

    /// Publish the artifact after saving by copying it into a directory-backed
    /// store at <store-root>/<bucket>/indices/<UTC timestamp>/. This is a local
    /// filesystem copy, not a network upload to S3/R2
    #[arg(long, default_value_t = false)]
    upload: bool,

    /// Root directory of the artifact store (a local or mounted path). Overrides ANN_ARTIFACT_STORE.
    #[arg(long, env = upload::STORE_ROOT_ENV)]
    store_root: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Saved artifact directory
    #[arg(long)]
    index: PathBuf,

    /// Embedding directory to look up IDs the index does not hold
    #[arg(long)]
    embeddings: Option<PathBuf>,

    /// External ID of the profile to query with
    #[arg(long)]
    id: String,

    /// Number of results
    #[arg(short, long, default_value_t = 10)]
    k: usize,

    /// Additional IDs to exclude (repeatable). The queried ID is always excluded.
    #[arg(long)]
    exclude: Vec<String>,

    /// Candidate list size during search
    #[arg(long, default_value_t = DEFAULT_EF_SEARCH)]
    ef_search: usize,
}

impl BuildArgs {
    fn index_config(&self) -> AnnIndexConfig {
        AnnIndexConfig {
            space: self.space,
            ef_construction: self.ef_construction,
            m: self.m,
            ef_search: self.ef_search,
            max_elements: self.max_elements,
            seed: self.seed,
            ..AnnIndexConfig::default()
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("profile_ann_core=info,profile_ann_cli=info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Load the matrix and its parallel ID list from a directory or a single matrix file.
fn load_inputs(
    embeddings: &Path,
    ids: Option<&Path>,
) -> profile_ann_core::Result<(EmbeddingMatrix, Vec<String>)> {
    if embeddings.is_dir() {
        return load_embedding_dir(embeddings);
    }
    let matrix = read_matrix(embeddings)?;
    let ids_path = match ids {
        Some(p) => p.to_path_buf(),
        None => embeddings
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(USER_IDS_FILE),
    };
    let ids = read_ids(&ids_path)?;
    Ok((matrix, ids))
}

fn print_neighbors(neighbors: &[Neighbor]) {
    if neighbors.is_empty() {
        println!("  (no neighbors)");
        return;
    }
    for (rank, n) in neighbors.iter().enumerate() {
        println!("  {:>3}. {:<40} {:.4}", rank + 1, n.id, n.score);
    }
}

fn run_build(args: &BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let t0 = Instant::now();
    let (matrix, ids) = load_inputs(&args.embeddings, args.ids.as_deref())?;
    println!(
        "Loaded {} embeddings x {}d from {}",
        matrix.len(),
        matrix.dim(),
        args.embeddings.display()
    );

    let index = AnnIndex::new(args.index_config(), matrix.dim())?;
    index.build(&matrix, &ids)?;
    index.save(&args.output)?;
    println!(
        "Built and saved index to {} in {:.2}s",
        args.output.display(),
        t0.elapsed().as_secs_f64()
    );

    println!();
    println!("Smoke test: top {} neighbors of {}", SMOKE_K, ids[0]);
    let neighbors = index.query(matrix.row(0), SMOKE_K, Some(&ids[..1]))?;
    print_neighbors(&neighbors);

    if args.upload {
        println!();
        match DirectoryStore::from_env(args.store_root.clone()) {
            Some(store) => {
                let prefix = upload::key_prefix_at(chrono::Utc::now());
                let stored = publish(&store, &args.output, &prefix)?;
                println!(
                    "Copied {} files into the artifact store at {}/{}",
                    stored.len(),
                    store.bucket(),
                    prefix
                );
            }
            None => {
                println!(
                    "Skipping upload: no artifact store directory configured (set {} or --store-root)",
                    upload::STORE_ROOT_ENV
                );
            }
        }
    }
    Ok(())
}

/// Upload a saved artifact. Failures are reported; the local artifact is left as is.
fn publish(
    store: &dyn ArtifactStore,
    dir: &Path,
    prefix: &str,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    upload::upload_dir(store, dir, prefix).map_err(|e| {
        tracing::error!(
            "Upload of {} failed: {} (local artifact kept)",
            dir.display(),
            e
        );
        e.into()
    })
}

fn run_query(args: &QueryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AnnIndexConfig {
        ef_search: args.ef_search,
        ..AnnIndexConfig::default()
    };
    let index = AnnIndex::open(config, &args.index)?;

    let embedding = match index.embedding_of(&args.id) {
        Some(v) => v,
        None => {
            let Some(dir) = args.embeddings.as_deref() else {
                return Err(format!(
                    "'{}' is not in the index; pass --embeddings to look it up",
                    args.id
                )
                .into());
            };
            let (matrix, ids) = load_embedding_dir(dir)?;
            let row = ids
                .iter()
                .position(|id| id == &args.id)
                .ok_or_else(|| format!("'{}' not found in {}", args.id, dir.display()))?;
            matrix.row(row).to_vec()
        }
    };

    let mut exclude = args.exclude.clone();
    exclude.push(args.id.clone());
    let neighbors = index.query(&embedding, args.k, Some(exclude.as_slice()))?;

    println!(
        "Top {} neighbors of {} ({} indexed, space={})",
        args.k,
        args.id,
        index.len(),
        index.space()
    );
    print_neighbors(&neighbors);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match &cli.command {
        Command::Build(args) => run_build(args),
        Command::Query(args) => run_query(args),
    }
}
