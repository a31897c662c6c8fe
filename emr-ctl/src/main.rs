mod args;
use args::{parse_args, Commands};

mod core;

use anyhow::Context;
use emr_client::{CancellationToken, JobClient, JobDefaults, ListJobsFilter};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, command output to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();

    let defaults = match &args.command {
        Commands::Submit(submit) => submit.job_defaults(),
        _ => JobDefaults::default(),
    };
    let client = JobClient::connect(&args.client_config(), defaults)
        .await
        .context("failed to configure EMR containers client")?
        .with_match_policy(args.match_policy.into());

    let output = match args.command {
        Commands::Submit(submit) => {
            let cancel = interrupt_token(submit.wait).unwrap_or_default();
            core::submit(&client, &submit.spec(), submit.wait_options(), &cancel).await?
        }
        Commands::Describe { job_id, cluster_id } => {
            core::describe(&client, &job_id, &cluster_id).await?
        }
        Commands::Cancel { job_id, cluster_id } => {
            core::cancel(&client, &job_id, &cluster_id).await?
        }
        Commands::Jobs {
            namespace,
            created_after,
            created_before,
            states,
            name,
        } => {
            let filter = ListJobsFilter {
                created_before,
                created_after,
                states,
                name,
            };
            core::jobs(&client, &namespace, &filter).await?
        }
        Commands::Clusters { provider, states } => {
            core::clusters(&client, provider, states).await?
        }
        Commands::Resolve { namespace } => core::resolve(&client, &namespace).await?,
    };

    println!("{}", output);

    Ok(())
}

/// Token cancelled on Ctrl-C while waiting on a job. Without a wait no
/// listener is installed, so Ctrl-C keeps its default of ending the process.
fn interrupt_token(wait: bool) -> Option<CancellationToken> {
    if !wait {
        return None;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, no longer waiting for the job");
                on_interrupt.cancel();
            }
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
    });
    Some(cancel)
}
