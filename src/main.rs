//! pvetui - terminal control plane for a Proxmox VE cluster
//!
//! Thin binary entry point that delegates to `pvetui-core` for every
//! stateful collaborator and only owns argument parsing, tracing
//! initialization, a panic hook, and the keyboard loop.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod app;
mod cli;
mod logging;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use pvetui_core::Engine;

fn main() -> std::process::ExitCode {
    const MAIN_THREAD_STACK_BYTES: usize = 16 * 1024 * 1024;

    install_panic_hook();

    let handle = match std::thread::Builder::new()
        .name("pvetui-main".to_string())
        .stack_size(MAIN_THREAD_STACK_BYTES)
        .spawn(|| -> anyhow::Result<()> {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build Tokio runtime")?;
            runtime.block_on(run())
        }) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Error: failed to spawn pvetui main thread: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match handle.join() {
        Ok(Ok(())) => std::process::ExitCode::SUCCESS,
        Ok(Err(err)) => {
            eprintln!("Error: {err:?}");
            std::process::ExitCode::FAILURE
        }
        Err(_) => {
            eprintln!("Error: pvetui main thread panicked");
            std::process::ExitCode::FAILURE
        }
    }
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = crossterm::terminal::disable_raw_mode();
        default_hook(info);
    }));
}

async fn run() -> anyhow::Result<()> {
    let args = Cli::parse();

    let log_file = args.cache_dir.as_ref().map(|dir| dir.join("pvetui.log"));
    logging::init(args.log_level.as_deref().unwrap_or("info"), log_file.as_deref())?;

    let password = if args.api_token.is_none() {
        Some(rpassword::prompt_password("PVE password: ").context("failed to read password")?)
    } else {
        None
    };

    let cache_dir = args.cache_dir.clone();
    let max_concurrent_tasks = args.max_concurrent_tasks;
    let config = args.into_config(password);

    let _pid_lock = match &cache_dir {
        Some(dir) => Some(pvetui_core::pid_lock::PidLock::acquire(dir)?),
        None => None,
    };

    let engine = Engine::build(config, max_concurrent_tasks)
        .await
        .context("failed to initialize pvetui engine")?;

    engine.cluster.refresh(&engine.shutdown_token()).await.ok();

    let result = app::run(&engine).await;
    engine.shutdown().await.context("failed to shut down engine cleanly")?;
    result
}
