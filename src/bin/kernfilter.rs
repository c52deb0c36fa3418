use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "kernfilter", version)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter one image and write the result as PNG.
    Run(RunArgs),
    /// List the kernels a backend can run.
    Kernels(KernelsArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Input image (any format the `image` crate decodes).
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Filter settings JSON. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Kernel name. Empty selects the fallback kernel.
    #[arg(long)]
    kernel: Option<String>,

    /// Sample-size / strength parameter.
    #[arg(long, allow_negative_numbers = true)]
    sample: Option<i32>,

    /// Record layout to encode pixels with.
    #[arg(long, value_enum)]
    layout: Option<LayoutChoice>,

    /// Pass the input through unfiltered.
    #[arg(long)]
    disable: bool,

    /// Backend to use.
    #[arg(long, value_enum, default_value_t = BackendChoice::Cpu)]
    backend: BackendChoice,
}

#[derive(Parser, Debug)]
struct KernelsArgs {
    /// Backend to query.
    #[arg(long, value_enum, default_value_t = BackendChoice::Cpu)]
    backend: BackendChoice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendChoice {
    Cpu,
    Gpu,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayoutChoice {
    Color,
    Positioned,
}

impl From<LayoutChoice> for kernfilter::RecordLayout {
    fn from(v: LayoutChoice) -> Self {
        match v {
            LayoutChoice::Color => Self::Color,
            LayoutChoice::Positioned => Self::Positioned,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.cmd {
        Command::Run(args) => cmd_run(args),
        Command::Kernels(args) => cmd_kernels(args),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

fn make_device(choice: BackendChoice) -> anyhow::Result<Box<dyn kernfilter::ComputeDevice>> {
    match choice {
        BackendChoice::Cpu => Ok(Box::new(kernfilter::CpuDevice::new())),
        #[cfg(feature = "gpu")]
        BackendChoice::Gpu => Ok(Box::new(kernfilter::GpuDevice::new()?)),
        #[cfg(not(feature = "gpu"))]
        BackendChoice::Gpu => {
            anyhow::bail!("gpu backend requires building kernfilter with `--features gpu`")
        }
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let mut settings = match &args.config {
        Some(path) => kernfilter::FilterSettings::from_json_path(path)
            .with_context(|| format!("load filter settings '{}'", path.display()))?,
        None => kernfilter::FilterSettings::default(),
    };
    if let Some(kernel) = args.kernel {
        settings.kernel = kernel;
    }
    if let Some(sample) = args.sample {
        settings.sample_param = sample;
    }
    if let Some(layout) = args.layout {
        settings.layout = layout.into();
    }
    if args.disable {
        settings.enabled = false;
    }

    let source = kernfilter::load_image(&args.in_path)
        .with_context(|| format!("read image '{}'", args.in_path.display()))?;
    let pipeline = kernfilter::FilterPipeline::new(settings)?;
    let device = make_device(args.backend)?;

    let mut host = kernfilter::FilterHost::new(pipeline, device, source);
    host.execute()
        .with_context(|| format!("filter '{}'", args.in_path.display()))?;

    kernfilter::save_png(host.output(), &args.out)
        .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_kernels(args: KernelsArgs) -> anyhow::Result<()> {
    let device = make_device(args.backend)?;
    let registry = kernfilter::KernelRegistry::default();
    eprintln!("kernels on {}:", device.label());
    for name in kernfilter::KernelRegistry::kernel_names(&device) {
        let sig = registry.resolve(&device, name)?.signature;
        let default = if name == registry.default_name() {
            " (default)"
        } else {
            ""
        };
        println!(
            "{name}{default}  buffer={} record={} stride={} uniforms={},{},{}",
            sig.buffer_binding,
            sig.record,
            sig.record_stride,
            sig.uniforms.width,
            sig.uniforms.height,
            sig.uniforms.sample,
        );
    }
    Ok(())
}
