use futures::prelude::*;
use dogiators_tg::tracing_err;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        eprintln!("Dotenv config was not found, ignoring this...")
    }

    let logging_task = dogiators_tg::init_logging();

    dogiators_tg::init_metrics();

    let main_fut = AssertUnwindSafe(async {
        let result = try_main().await;

        result.map(|()| ExitCode::SUCCESS).unwrap_or_else(|err| {
            error!(err = tracing_err(&err), "Exitting with an error...");
            ExitCode::FAILURE
        })
    })
    .catch_unwind()
    .unwrap_or_else(|_| {
        error!("Exitting due to a panic...");
        ExitCode::FAILURE
    });

    // Workers never finish on their own unless every account hit a terminal
    // condition, so Ctrl+C is the regular way to stop the farm.
    let exit_code = tokio::select! {
        exit_code = main_fut => {
            info!("All account workers have finished, exiting...");
            exit_code
        }
        () = abort_signal() => ExitCode::SUCCESS,
    };

    logging_task.shutdown().await;

    exit_code
}

async fn try_main() -> dogiators_tg::Result {
    let config = dogiators_tg::Config::load_or_panic();
    dogiators_tg::run(config).await
}

async fn abort_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            err = tracing_err(&err),
            "Failed to wait for Ctrl+C, exiting..."
        );
    } else {
        info!("Ctrl+C received, exiting forcefully...");
    }
}
