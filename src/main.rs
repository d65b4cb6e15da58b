use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // SOPFLOW_LOG wins over RUST_LOG; sqlx statement logging is noisy at info
    let filter = EnvFilter::try_from_env("SOPFLOW_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = sopflow::cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
