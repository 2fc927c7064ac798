use chrome_session_worker::config;

fn main() {
    let config = match config::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = runtime.block_on(chrome_session_worker::run_worker(config)) {
        tracing::error!(error = %e, "worker exited with an unrecoverable error");
        std::process::exit(2);
    }
}

fn init_tracing(config: &config::WorkerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match &config.log_path {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("worker.log");
            let file_appender = tracing_appender::rolling::never(dir, filename);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            // Keep the worker thread alive for the process lifetime.
            std::mem::forget(guard);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
