// src/main.rs

use vvexec::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("vvexec error: {err:?}");
            std::process::exit(2);
        }
    }
}

/// Returns whether every unit ran and passed (or diffed).
async fn run_main() -> anyhow::Result<bool> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    match run(args).await? {
        Some(summary) => {
            println!("{summary}");
            Ok(summary.all_passed())
        }
        None => Ok(true),
    }
}
