// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use tracing_appender::non_blocking::WorkerGuard;

use crate::config;

pub(crate) fn setup_logging(log_to_file: bool) -> Option<WorkerGuard> {
    if log_to_file {
        return Some(setup_logging_to_file());
    }

    let filter = env_filter();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
    None
}

fn setup_logging_to_file() -> WorkerGuard {
    let log_dir = config::log_dir();
    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {}: {err}", log_dir.display());
    }
    println!("log_dir: {}", log_dir.display());

    let file_appender = tracing_appender::rolling::never(log_dir, config::DEFAULT_LOG_FILE);
    let (file_writer, worker_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .compact()
        .with_writer(file_writer)
        .init();

    std::panic::set_hook(Box::new(|panic| {
        tracing::error!(message = %panic);
    }));

    worker_guard
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env()
        .unwrap()
        .add_directive("mio=warn".parse().unwrap())
}
