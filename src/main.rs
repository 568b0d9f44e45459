// src/main.rs

use stackd::{cli, logging, run};

fn main() {
    if let Err(err) = run_main() {
        eprintln!("stackd error: {err:?}");
        std::process::exit(1);
    }
}

fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    // Worker handlers attach their progress listener after the handler
    // returns, so a worker runs everything on one thread.
    let mut builder = if args.is_worker() {
        tokio::runtime::Builder::new_current_thread()
    } else {
        tokio::runtime::Builder::new_multi_thread()
    };
    let runtime = builder.enable_all().build()?;
    runtime.block_on(run(args))
}
