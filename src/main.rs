//! Mamformer - Main Entry Point

use clap::Parser;
use mamformer::cli::{cmd_info, cmd_predict, cmd_tasks, cmd_train, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mamformer=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            data,
            target,
            config,
            model,
            epochs,
            n_models,
            model_dir,
            store,
            queued,
        } => {
            cmd_train(
                &data,
                &target,
                config.as_deref(),
                model.as_deref(),
                epochs,
                n_models,
                model_dir.as_deref(),
                &store,
                queued,
            )
            .await?;
        }
        Commands::Predict { model_dir, task, data } => {
            cmd_predict(&model_dir, &task, &data)?;
        }
        Commands::Info { data } => {
            cmd_info(&data)?;
        }
        Commands::Tasks { store, task, delete } => {
            cmd_tasks(&store, task.as_deref(), delete)?;
        }
    }

    Ok(())
}
