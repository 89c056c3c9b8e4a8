use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tagepoch::{
    epoch_all, export_plan, CodeMap, EpochSet, EventStreamMatcher, PipelineConfig, Recording,
};

#[derive(Parser)]
#[command(name = "tagepoch", about = "Tag EEG event codes and export time-locked epochs")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(ClapArgs)]
struct Common {
    /// Recording written by `Recording::save` (.safetensors)
    #[arg(long, value_name = "FILE")]
    recording: PathBuf,

    /// Pipeline config (config.toml); defaults when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan every block and report the event table
    Scan {
        #[command(flatten)]
        common: Common,

        /// Codemap (.tsv, first column `regexp`)
        #[arg(long, value_name = "FILE")]
        codemap: PathBuf,

        /// Write the event table as JSON
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Scan, cut every configured epoch window and export
    Epochs {
        #[command(flatten)]
        common: Common,

        #[arg(long, value_name = "FILE")]
        codemap: PathBuf,

        /// Directory for exported epoch files
        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,
    },
    /// Align study and test phases by item, then epoch and export each phase
    Align {
        #[command(flatten)]
        common: Common,

        #[arg(long, value_name = "FILE")]
        study_codemap: PathBuf,

        #[arg(long, value_name = "FILE")]
        test_codemap: PathBuf,

        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match args.command {
        Command::Scan { common, codemap, output } => {
            let (rec, cfg) = open(&common)?;
            let codemap = load_codemap(&codemap)?;
            let scan = EventStreamMatcher::with_options(&codemap, cfg.scan_options()).scan_blocks(&rec)?;
            for b in &scan.summary.blocks {
                println!(
                    "{:<32} {:>7} codes {:>6} anchors {:>6} context",
                    b.dblock_path, b.positions, b.anchor_rows, b.context_rows
                );
            }
            println!("{} rows from {} codes", scan.summary.rows(), scan.summary.positions());
            if let Some(out) = output {
                scan.table.write_json(&out)?;
                println!("Written → {}", out.display());
            }
        }
        Command::Epochs { common, codemap, out_dir } => {
            let (rec, cfg) = open(&common)?;
            let codemap = load_codemap(&codemap)?;
            let (scan, sets) = tagepoch::tag_and_epoch(&rec, &codemap, &cfg)?;
            println!("{} rows from {} codes", scan.summary.rows(), scan.summary.positions());
            report_and_export(&sets, &cfg, &out_dir)?;
        }
        Command::Align { common, study_codemap, test_codemap, out_dir } => {
            let (rec, cfg) = open(&common)?;
            let study_map = load_codemap(&study_codemap)?;
            let test_map = load_codemap(&test_codemap)?;
            let (study, test) = cfg.align.scan_phases(&rec, &study_map, &test_map, &cfg.scan_options())?;
            println!("Aligned {} study items, {} test items", study.len(), test.len());

            let mut sets = epoch_all(&rec, "study", &study, &cfg)?;
            sets.extend(epoch_all(&rec, "test", &test, &cfg)?);
            report_and_export(&sets, &cfg, &out_dir)?;
        }
    }
    Ok(())
}

fn open(common: &Common) -> Result<(Recording, PipelineConfig)> {
    let cfg = match &common.config {
        Some(p) => PipelineConfig::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => PipelineConfig::default(),
    };
    let rec = Recording::load(&common.recording)?;
    println!("Loaded {} blocks in {} data groups", rec.len(), rec.data_groups().len());
    Ok((rec, cfg))
}

fn load_codemap(path: &Path) -> Result<CodeMap> {
    let cm = CodeMap::load(path).with_context(|| format!("loading codemap {}", path.display()))?;
    log::info!("codemap {}: {} patterns", path.display(), cm.len());
    Ok(cm)
}

fn report_and_export(sets: &[EpochSet<'_>], cfg: &PipelineConfig, out_dir: &Path) -> Result<()> {
    for set in sets {
        let d = &set.diagnostics;
        println!(
            "{:<20} [{}, {}]  {} epochs  {} dropped ({} bounds, {} block mismatch)",
            set.name,
            set.pre,
            set.post,
            d.retained,
            d.dropped(),
            d.dropped_bounds,
            d.dropped_block_mismatch
        );
        for row in &d.sampled {
            log::debug!("  row {} {}@{}: {}", row.row, row.dblock_path, row.tick, row.reason);
        }
    }

    // One independent destination per (set, format).
    let plan = export_plan(sets, cfg, out_dir);
    plan.par_iter()
        .map(|(set, format, path)| {
            set.export(path, *format)
                .with_context(|| format!("exporting {} as {format}", set.name))?;
            println!("Written → {}", path.display());
            Ok(())
        })
        .collect::<Result<Vec<()>>>()?;
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args()))
        .init();
}
