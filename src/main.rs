use clap::Parser;
use tracing_subscriber::EnvFilter;

use seqpass::cli;
use seqpass::pipeline::PipelineError;

fn main() {
    let cli = cli::Cli::parse();

    // Initialize logging based on verbosity flag
    let filter = if cli.verbose {
        EnvFilter::new("seqpass=debug,info")
    } else {
        EnvFilter::new("seqpass=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        cli::Commands::Collect(args) => cli::collect::run(args, cli.format, cli.verbose),
        cli::Commands::GcBins(args) => cli::gc_bins::run(args, cli.format, cli.verbose),
    };

    if let Err(e) = result {
        match e.downcast_ref::<PipelineError>() {
            Some(pipeline) => eprintln!("error: {e:#} (stage: {})", pipeline.stage()),
            None => eprintln!("error: {e:#}"),
        }
        std::process::exit(1);
    }
}
