use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};

use sfm_prep::config::{ConversionConfig, JobFile, JobSpec, Split};
use sfm_prep::datasets::build_adapter;
use sfm_prep::Processor;

#[derive(Parser, Debug)]
#[command(name = "sfm-prep")]
#[command(version = "0.1.0")]
#[command(about = "Convert CO3D, LINEMOD, OnePose and COLMAP captures into the SfM input layout", long_about = None)]
pub struct Args {
    /// Parse annotations and report the frame plan without writing the output tree
    #[arg(long, global = true)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct CommonArgs {
    /// Dataset root
    #[arg(short, long)]
    input: PathBuf,

    /// Output root (deleted and recreated)
    #[arg(short, long)]
    output: PathBuf,

    /// Number of frames to consider (default: all)
    #[arg(short = 'n', long)]
    length: Option<usize>,

    /// Keep every Nth frame
    #[arg(short, long, default_value = "1")]
    stride: usize,

    /// Mask values above this are foreground
    #[arg(long, default_value = "0")]
    mask_threshold: u8,
}

impl CommonArgs {
    fn to_config(&self) -> ConversionConfig {
        ConversionConfig::new(&self.input, &self.output)
            .with_length(self.length)
            .with_stride(self.stride)
            .with_mask_threshold(self.mask_threshold)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One CO3D sequence
    Co3d {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long)]
        sequence_name: String,

        #[arg(long, default_value = "hotdog")]
        category: String,
    },
    /// One LINEMOD scene in BOP layout
    Linemod {
        #[command(flatten)]
        common: CommonArgs,

        /// Which annotated object of each frame supplies the pose
        #[arg(long, default_value = "0")]
        object_index: usize,
    },
    /// LINEMOD packaged for OnePose
    Onepose {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long, value_enum, default_value = "train")]
        split: Split,
    },
    /// COLMAP reconstruction of a custom capture
    Car {
        #[command(flatten)]
        common: CommonArgs,

        /// ONNX segmentation network for frames without masks (needs ORT_DYLIB_PATH)
        #[arg(long)]
        segmentation_model: Option<PathBuf>,
    },
    /// Run every conversion listed in a YAML or JSON job file
    Job {
        file: PathBuf,
    },
}

impl Command {
    fn jobs(&self) -> Result<Vec<JobSpec>> {
        let job = match self {
            Command::Co3d {
                common,
                sequence_name,
                category,
            } => JobSpec::Co3d {
                config: common.to_config(),
                sequence_name: sequence_name.clone(),
                category: category.clone(),
            },
            Command::Linemod {
                common,
                object_index,
            } => JobSpec::Linemod {
                config: common.to_config(),
                object_index: *object_index,
            },
            Command::Onepose { common, split } => JobSpec::Onepose {
                config: common.to_config(),
                split: *split,
            },
            Command::Car {
                common,
                segmentation_model,
            } => JobSpec::Car {
                config: common.to_config(),
                segmentation_model: segmentation_model.clone(),
            },
            Command::Job { file } => return Ok(JobFile::load(file)?.jobs),
        };
        Ok(vec![job])
    }
}

pub struct CLIApp {
    args: Args,
}

impl CLIApp {
    pub fn new() -> Self {
        Self { args: Args::parse() }
    }

    pub fn verbose(&self) -> bool {
        self.args.verbose
    }

    pub fn run(&self) -> Result<()> {
        let start_time = Instant::now();
        let jobs = self.args.command.jobs()?;

        for (idx, job) in jobs.iter().enumerate() {
            self.run_job(job)
                .with_context(|| format!("Job {}/{} failed", idx + 1, jobs.len()))?;
        }

        log::info!(
            "Finished {} job(s) in {:.2}s",
            jobs.len(),
            start_time.elapsed().as_secs_f32()
        );
        Ok(())
    }

    fn run_job(&self, job: &JobSpec) -> Result<()> {
        let adapter = build_adapter(job)?;
        let mut processor = Processor::new(adapter);

        if self.args.dry_run {
            let plan = processor.plan()?;
            log::info!(
                "Dry run: {} of {} frames selected (masks: {}, poses: {}, intrinsics: {})",
                plan.selected.len(),
                plan.total,
                plan.masks,
                plan.poses,
                plan.intrinsics
            );
            return Ok(());
        }

        let summary = processor.process()?;
        log::info!(
            "Wrote {} frames ({} masks, {} poses, {} intrinsics)",
            summary.frames,
            summary.masks,
            summary.poses,
            summary.intrinsics
        );
        Ok(())
    }
}
