use anyhow::Result;
use clap::Parser;
use gpt2_trainer::cli::{Cli, Commands};
use gpt2_trainer::{data, train};

fn main() -> Result<()> {
    // 1. Setup File Logging
    let file_appender = tracing_appender::rolling::daily("logs", "gpt2_trainer.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // 2. Setup Console Logging
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    // 3. Combine Subscribers
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    // 4. Setup Panic Hook
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(target: "panic", "🔥 CRASH detected at {}: {}", location, msg);
        eprintln!("🔥 CRASH detected at {}: {}", location, msg);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => {
            let summary = train::run(args)?;
            tracing::info!(
                "✅ Done: {} optimizer steps (planned {}), final model at {}",
                summary.optimizer_steps,
                summary.planned_steps,
                summary
                    .checkpoints
                    .last()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
        }
        Commands::BuildShards(args) => {
            let summaries = data::run_build_shards(&args)?;
            tracing::info!("✅ Wrote {} shards", summaries.len());
        }
        Commands::Plan(args) => {
            let (tokens, steps) = train::run_plan(&args)?;
            println!("total tokens: {tokens}");
            println!("total steps: {steps}");
        }
    }

    Ok(())
}
