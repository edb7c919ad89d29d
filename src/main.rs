use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use seqbatch::generator::{load_allele_table, load_region_index, AlleleTable};
use seqbatch::genomics::{ReferenceSource, VariantSource};
use seqbatch::labels::write_class_weights;
use seqbatch::model::ArchitectureParams;
use seqbatch::{
    ArchitectureRegistry, BatchGenerator, CancelToken, FastaReference, GeneratorConfig,
    InferencePipeline, PipelineConfig, SamplingMode, SnpBatchGenerator, SnpGeneratorConfig,
    TabixVariants, VariantEncoding,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "seqbatch", about = "One-hot genomic batches and parallel inference")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Label table selection shared by several subcommands.
#[derive(Args, Debug)]
struct LabelArgs {
    /// Single label table (`.tsv`, or bgzipped and tabix-indexed `.gz`).
    #[arg(long, conflicts_with_all = ["nonzero_bins", "universal_negatives"])]
    labels: Option<PathBuf>,
    /// Table of bins with at least one positive task.
    #[arg(long, requires = "universal_negatives")]
    nonzero_bins: Option<PathBuf>,
    /// Positions assumed negative for every task.
    #[arg(long, requires = "nonzero_bins")]
    universal_negatives: Option<PathBuf>,
    /// Task columns to keep (comma separated).
    #[arg(long, value_delimiter = ',')]
    tasks: Option<Vec<String>>,
    /// Chromosomes to keep (comma separated).
    #[arg(long, value_delimiter = ',')]
    chroms: Option<Vec<String>>,
}

impl LabelArgs {
    fn config(&self) -> Result<GeneratorConfig> {
        let mut config = match (&self.labels, &self.nonzero_bins, &self.universal_negatives) {
            (Some(path), None, None) => GeneratorConfig::single(path),
            (None, Some(nonzero), Some(negatives)) => GeneratorConfig::split(nonzero, negatives),
            _ => bail!("pass either --labels or both --nonzero-bins and --universal-negatives"),
        };
        config.tasks = self.tasks.clone();
        config.chroms = self.chroms.clone();
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Predict every labelled window and write `<prefix>.labels` / `<prefix>.predictions`.
    Predict {
        #[command(flatten)]
        labels: LabelArgs,
        /// Indexed reference FASTA (requires `.fai`).
        #[arg(long)]
        reference: PathBuf,
        /// bgzipped, tabix-indexed VCF to inject into the windows.
        #[arg(long, requires = "variant_encoding")]
        variants: Option<PathBuf>,
        /// Variant encoding: `personal` or `freq`.
        #[arg(long, requires = "variants")]
        variant_encoding: Option<String>,
        /// Registered architecture name.
        #[arg(long, default_value = "gc_content")]
        architecture: String,
        /// Nominal batch size.
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
        /// Append reverse complements.
        #[arg(long)]
        revcomp: bool,
        /// Insert a singleton axis into the input tensor.
        #[arg(long)]
        expand_dims: bool,
        /// Worker threads.
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Maximum batches dispatched but not yet predicted.
        #[arg(long, default_value_t = 16)]
        max_in_flight: usize,
        /// Output path prefix.
        #[arg(long)]
        output_prefix: PathBuf,
    },
    /// Score one or more allele columns at fixed sites.
    ScoreVariants {
        /// Allele table: CHR, POS (1-based), then one column per allele set.
        #[arg(long)]
        alleles: PathBuf,
        /// Indexed reference FASTA (requires `.fai`).
        #[arg(long)]
        reference: PathBuf,
        /// Allele columns to score (comma separated); all when omitted.
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
        /// Bases on each side of the site.
        #[arg(long, default_value_t = 500)]
        flank: u64,
        /// Registered architecture name.
        #[arg(long, default_value = "gc_content")]
        architecture: String,
        /// Model outputs per window.
        #[arg(long, default_value_t = 1)]
        outputs: usize,
        /// Nominal batch size.
        #[arg(long, default_value_t = 128)]
        batch_size: usize,
        /// Worker threads.
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Output path prefix; each column writes `<prefix>.<column>.*`.
        #[arg(long)]
        output_prefix: PathBuf,
    },
    /// Summarise a label table and the batches it would yield.
    Inspect {
        #[command(flatten)]
        labels: LabelArgs,
        /// Nominal batch size.
        #[arg(long, default_value_t = 128)]
        batch_size: usize,
        /// Upsample ratio; basic slicing when omitted.
        #[arg(long)]
        upsample_ratio: Option<f64>,
    },
    /// Write `--w1` / `--w0` class weights for every task.
    Weights {
        /// Label table.
        #[arg(long)]
        labels: PathBuf,
        /// Task columns to keep (comma separated).
        #[arg(long, value_delimiter = ',')]
        tasks: Option<Vec<String>>,
        /// Destination file.
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Predict {
            labels,
            reference,
            variants,
            variant_encoding,
            architecture,
            batch_size,
            revcomp,
            expand_dims,
            workers,
            max_in_flight,
            output_prefix,
        } => {
            let mut config = labels
                .config()?
                .with_mode(SamplingMode::Basic)
                .with_shuffle(false)
                .with_batch_size(batch_size)
                .with_reverse_complement(revcomp)
                .with_expand_dims(expand_dims);
            if let Some(encoding) = variant_encoding {
                let encoding: VariantEncoding = encoding.parse()?;
                config = config.with_variant_encoding(encoding);
            }
            let pipeline = PipelineConfig::new(output_prefix)
                .with_workers(workers)
                .with_max_in_flight(max_in_flight);
            run_predict(config, reference, variants, &architecture, pipeline)?
        }
        Commands::ScoreVariants {
            alleles,
            reference,
            columns,
            flank,
            architecture,
            outputs,
            batch_size,
            workers,
            output_prefix,
        } => {
            let config = SnpGeneratorConfig::new(alleles, String::new())
                .with_flank(flank)
                .with_batch_size(batch_size);
            run_score_variants(
                config,
                reference,
                columns,
                &architecture,
                outputs,
                workers,
                output_prefix,
            )?
        }
        Commands::Inspect {
            labels,
            batch_size,
            upsample_ratio,
        } => {
            let mode = match upsample_ratio {
                Some(ratio) => SamplingMode::Upsampled { ratio },
                None => SamplingMode::Basic,
            };
            let config = labels
                .config()?
                .with_batch_size(batch_size)
                .with_mode(mode)
                .with_reverse_complement(false)
                .with_shuffle(false);
            run_inspect(config)?
        }
        Commands::Weights {
            labels,
            tasks,
            output,
        } => run_weights(labels, tasks, output)?,
    }

    Ok(())
}

/// Cancel token tripped by Ctrl-C.
fn interrupt_token() -> Result<CancelToken> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("failed to install Ctrl-C handler")?;
    Ok(token)
}

fn run_predict(
    config: GeneratorConfig,
    reference_path: PathBuf,
    variants_path: Option<PathBuf>,
    architecture: &str,
    pipeline_config: PipelineConfig,
) -> Result<()> {
    let reference: Arc<dyn ReferenceSource> = Arc::new(FastaReference::new(&reference_path));
    let variants: Option<Arc<dyn VariantSource>> = variants_path
        .map(|path| Arc::new(TabixVariants::new(path)) as Arc<dyn VariantSource>);
    let index = load_region_index(&config).context("failed to load label tables")?;

    let registry = ArchitectureRegistry::with_builtins();
    let window = index
        .primary()
        .interval(0)
        .map(|interval| interval.len() as usize)
        .unwrap_or_default();
    let mut model = registry
        .build(
            architecture,
            &ArchitectureParams {
                outputs: index.width(),
                window,
            },
        )
        .with_context(|| format!("failed to build architecture '{architecture}'"))?;

    let pipeline = InferencePipeline::new(pipeline_config)?;
    let cancel = interrupt_token()?;
    let factory = |seed| {
        BatchGenerator::from_index(
            config.clone().with_pinned_seed(seed),
            index.clone(),
            Arc::clone(&reference),
            variants.clone(),
        )
    };
    let summary = pipeline
        .run(factory, model.as_mut(), &cancel)
        .context("inference failed")?;
    info!(
        batches = summary.batches,
        rows = summary.rows,
        labels = %pipeline.config().labels_path().display(),
        predictions = %pipeline.config().predictions_path().display(),
        "predictions written"
    );
    Ok(())
}

fn run_score_variants(
    config: SnpGeneratorConfig,
    reference_path: PathBuf,
    columns: Option<Vec<String>>,
    architecture: &str,
    outputs: usize,
    workers: usize,
    output_prefix: PathBuf,
) -> Result<()> {
    let reference: Arc<dyn ReferenceSource> = Arc::new(FastaReference::new(&reference_path));
    let table: Arc<AlleleTable> = Arc::new(
        load_allele_table(&config.path)
            .context("failed to load allele table")?,
    );
    let columns = columns.unwrap_or_else(|| table.columns().to_vec());
    if columns.is_empty() {
        bail!("allele table has no allele columns");
    }

    let registry = ArchitectureRegistry::with_builtins();
    let mut model = registry
        .build(
            architecture,
            &ArchitectureParams {
                outputs,
                window: (2 * config.flank) as usize,
            },
        )
        .with_context(|| format!("failed to build architecture '{architecture}'"))?;
    let cancel = interrupt_token()?;

    for column in &columns {
        let mut prefix = output_prefix.clone().into_os_string();
        prefix.push(format!(".{column}"));
        let pipeline = InferencePipeline::new(PipelineConfig::new(prefix).with_workers(workers))?;
        let column_config = SnpGeneratorConfig {
            allele_column: column.clone(),
            ..config.clone()
        };
        let factory = |_seed: Option<u64>| {
            SnpBatchGenerator::from_table(
                column_config.clone(),
                Arc::clone(&table),
                Arc::clone(&reference),
            )
        };
        let summary = pipeline
            .run(factory, model.as_mut(), &cancel)
            .with_context(|| format!("scoring allele column '{column}' failed"))?;
        info!(column = %column, rows = summary.rows, "allele column scored");
    }
    Ok(())
}

fn run_inspect(config: GeneratorConfig) -> Result<()> {
    let index = load_region_index(&config).context("failed to load label tables")?;
    let table = index.labels();
    println!("rows\t{}", index.len());
    if let Some(offset) = index.universal_negative_offset() {
        println!("nonzero_bins\t{offset}");
        println!("universal_negatives\t{}", index.len() - offset);
    }
    println!("positive_rows\t{}", table.positive_rows().len());
    println!("negative_rows\t{}", table.negative_rows().len());
    for (task, column) in table.columns().iter().enumerate() {
        let positives = table.values().column(task).iter().filter(|&&v| v > 0.0).count();
        println!("task\t{column}\t{positives}");
    }

    // Sampling needs no sequence data; an empty reference is never opened.
    let reference = Arc::new(seqbatch::InMemoryReference::new());
    let generator = BatchGenerator::from_index(config, index, reference, None)
        .context("invalid sampling configuration")?;
    println!("batches_per_epoch\t{}", generator.len());
    if let Some(upsample) = generator.policy().upsample() {
        println!(
            "slots_per_batch\t{} positive\t{} negative",
            upsample.pos_count(),
            upsample.neg_count()
        );
    }
    Ok(())
}

fn run_weights(labels: PathBuf, tasks: Option<Vec<String>>, output: PathBuf) -> Result<()> {
    let table = seqbatch::load_label_table(&labels, tasks.as_deref(), None)
        .with_context(|| format!("failed to load labels from {}", labels.display()))?;
    let (w1, w0) = table.class_weights();
    let mut writer = BufWriter::new(
        File::create(&output).with_context(|| format!("failed to create {}", output.display()))?,
    );
    write_class_weights(&mut writer, &w1, &w0)?;
    writer.flush()?;
    info!(tasks = w1.len(), path = %output.display(), "class weights written");
    Ok(())
}
