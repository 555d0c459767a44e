use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use log::{info, Level};

use splice_quant::{AnnotationBuilder, Engine, EngineConfig, GeneModelCache, IdNameKeys, RefGenome, SamSource, TsvResultWriter};

/// Classify RNA-seq fragments against a gene model and fit transcript abundances.
#[derive(Parser, Debug)]
#[command(name = "splice-quant")]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a gene model cache from a GTF/GFF annotation and write it to disk
    Cache(CacheArgs),

    /// Load a gene model cache from disk and print summary stats
    Stats(StatsArgs),

    /// Classify alignments and fit abundances per gene collection
    Quant(QuantArgs),
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Serialized gene model cache
    #[arg(long, short)]
    cache: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct KeyArgs {
    /// Attribute keys to use for gene ID (repeatable)
    #[arg(
        long = "gene-id-key",
        value_name = "KEY",
        num_args = 1..,
        default_values_t = vec!["gene_id".to_string()]
    )]
    gene_id_keys: Vec<String>,

    /// Attribute keys to use for gene name (repeatable)
    #[arg(
        long = "gene-name-key",
        value_name = "KEY",
        num_args = 1..,
        default_values_t = vec!["gene_name".to_string()]
    )]
    gene_name_keys: Vec<String>,

    /// Attribute keys to use for transcript ID (repeatable)
    #[arg(
        long = "transcript-id-key",
        value_name = "KEY",
        num_args = 1..,
        default_values_t = vec!["transcript_id".to_string()]
    )]
    transcript_id_keys: Vec<String>,

    /// Attribute keys to use for transcript name (repeatable)
    #[arg(
        long = "transcript-name-key",
        value_name = "KEY",
        num_args = 1..,
        default_values_t = vec!["transcript_name".to_string()]
    )]
    transcript_name_keys: Vec<String>,

    /// GFF3 exon->transcript linkage keys (repeatable)
    #[arg(
        long = "parent-key",
        value_name = "KEY",
        num_args = 1..,
        default_values_t = vec!["Parent".to_string()]
    )]
    parent_keys: Vec<String>,

    /// Feature types that count as exon blocks (repeatable)
    #[arg(
        long = "exon-feature-type",
        value_name = "TYPE",
        num_args = 1..,
        default_values_t = vec!["exon".to_string()]
    )]
    exon_feature_types: Vec<String>,
}

impl From<KeyArgs> for IdNameKeys {
    fn from(args: KeyArgs) -> Self {
        IdNameKeys {
            gene_id_keys: args.gene_id_keys,
            gene_name_keys: args.gene_name_keys,
            transcript_id_keys: args.transcript_id_keys,
            transcript_name_keys: args.transcript_name_keys,
            parent_keys: args.parent_keys,
            exon_feature_types: args.exon_feature_types,
            ..IdNameKeys::default()
        }
    }
}

#[derive(Args, Debug)]
struct CacheArgs {
    /// Input annotation file (.gtf/.gff/.gff3, optionally gzipped)
    #[arg(long, short)]
    annotation: PathBuf,

    /// Bin width in base pairs
    #[arg(long, short, default_value_t = 1_000_000)]
    bin_width: u32,

    /// Output serialized cache file
    #[arg(long, short)]
    cache: PathBuf,

    #[command(flatten)]
    keys: KeyArgs,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("model").required(true).args(["annotation", "cache"])))]
struct QuantArgs {
    /// Annotation file (.gtf/.gff/.gff3, optionally gzipped)
    #[arg(long, short)]
    annotation: Option<PathBuf>,

    /// Serialized gene model cache, instead of an annotation
    #[arg(long, short)]
    cache: Option<PathBuf>,

    /// Bin width in base pairs when building from an annotation
    #[arg(long, default_value_t = 1_000_000)]
    bin_width: u32,

    /// Alignments in SAM text format
    #[arg(long, short)]
    sam: PathBuf,

    /// Reference FASTA for splice motifs (optionally gzipped)
    #[arg(long, short)]
    fasta: Option<PathBuf>,

    /// Output directory
    #[arg(long, short)]
    outdir: PathBuf,

    /// JSON engine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read length used for rate simulation
    #[arg(long)]
    read_length: Option<u32>,

    /// Maximum fragment length in transcript space
    #[arg(long)]
    max_fragment_length: Option<u32>,

    /// Records ingested per gene collection, 0 for no cap
    #[arg(long)]
    max_reads: Option<usize>,

    /// Treat reads with equal start, mate start and orientation as duplicates
    #[arg(long)]
    mark_duplicates: bool,

    /// Do not classify duplicate fragments
    #[arg(long)]
    drop_duplicates: bool,

    /// Skip the abundance fit
    #[arg(long)]
    no_fit: bool,

    /// Skip alternative splice junction detection
    #[arg(long)]
    no_alt_junctions: bool,

    /// Restrict to these chromosomes (repeatable)
    #[arg(long = "chr", value_name = "CHR", num_args = 1..)]
    chromosomes: Vec<String>,

    /// Worker threads
    #[arg(long, short, default_value_t = num_cpus::get())]
    threads: usize,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,

    #[command(flatten)]
    keys: KeyArgs,
}

impl QuantArgs {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(v) = self.read_length {
            config.read_length = v;
        }
        if let Some(v) = self.max_fragment_length {
            config.max_fragment_length = v;
        }
        if let Some(v) = self.max_reads {
            config.max_read_count = v;
        }
        config.mark_duplicates |= self.mark_duplicates;
        config.drop_duplicates |= self.drop_duplicates;
        if self.no_fit {
            config.run_fit = false;
        }
        if self.no_alt_junctions {
            config.find_alt_junctions = false;
        }
        config.validate().context("validating configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Cache(args) => {
            simple_logger::init_with_level(Level::Info)?;
            let cache = AnnotationBuilder::new(args.bin_width)
                .with_keys(args.keys.into())
                .build_from_path(&args.annotation)
                .with_context(|| format!("building gene model from {}", args.annotation.display()))?;

            println!("{cache}");

            cache
                .save(&args.cache)
                .with_context(|| format!("writing cache to {}", args.cache.display()))?;

            info!("cache written to {}", args.cache.display());
        }

        Command::Stats(args) => {
            let cache = GeneModelCache::load(&args.cache)
                .with_context(|| format!("reading cache {}", args.cache.display()))?;
            println!("{cache}");
        }

        Command::Quant(args) => quant(args)?,
    }

    Ok(())
}

fn quant(args: QuantArgs) -> Result<()> {
    let level = if args.verbose { Level::Debug } else { Level::Info };
    simple_logger::init_with_level(level)?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()
        .context("configuring the worker pool")?;

    let config = args.engine_config()?;

    let model = match (&args.cache, &args.annotation) {
        (Some(path), _) => GeneModelCache::load(path)
            .with_context(|| format!("reading cache {}", path.display()))?,
        (None, Some(path)) => {
            AnnotationBuilder::new(args.bin_width)
                .with_keys(args.keys.clone().into())
                .build_from_path(path)
                .with_context(|| format!("building gene model from {}", path.display()))?
        }
        (None, None) => bail!("either --annotation or --cache is required"),
    };
    info!("{model}");

    let alignments = SamSource::from_path(&args.sam)
        .with_context(|| format!("reading alignments {}", args.sam.display()))?;
    info!("{} alignment records loaded", alignments.len());

    let reference = args
        .fasta
        .as_ref()
        .map(|path| RefGenome::from_path(path).with_context(|| format!("reading reference {}", path.display())))
        .transpose()?;

    let sink = TsvResultWriter::create(&args.outdir, config.write_category_counts)
        .with_context(|| format!("creating outputs in {}", args.outdir.display()))?;

    let engine = Engine::new(&config, &model, &alignments)
        .with_reference(reference.as_ref())
        .with_progress(true);
    let collections = engine.collections(&args.chromosomes);
    let summary = engine.run(&collections, &sink)?;

    info!(
        "done: {} of {} gene collections written to {}",
        summary.reported,
        summary.collections,
        args.outdir.display()
    );
    Ok(())
}
