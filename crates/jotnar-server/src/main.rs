//! Process entry point (spec §6 "Deployment").
//!
//! One binary, one role selected by `JOTNAR_ROLE`: `ingestion`, `triage`,
//! `rebase`, `backport`, or `all` (the default, every role in one process
//! for small deployments). Each role is an independent long-running loop
//! sharing one queue pool and a `tokio::sync::Notify` for graceful
//! shutdown on SIGTERM/Ctrl-C, mirroring the teacher's single-binary,
//! multi-subsystem `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use jotnar_agent::{AgentRunner, CliModelBackend};
use jotnar_core::config::Config;
use jotnar_pipeline::{backport, ingestion, janitor, rebase, triage};
use jotnar_queue::{names::QueueName, WorkQueue};
use jotnar_tools::builder::{BuildPackage, BuilderClient, DownloadArtifacts};
use jotnar_tools::forge::{
    AddMergeRequestLabels, CloneRepository, ForgeClient, ForkRepository, GetInternalRhelBranches,
    OpenMergeRequest, PushToRemoteRepository,
};
use jotnar_tools::lookaside::{DownloadSources, UploadSources};
use jotnar_tools::registry::ToolRegistry;
use jotnar_tools::tracker::{
    AddIssueComment, ChangeIssueStatus, CheckCveTriageEligibility, EditIssueLabels,
    GetIssueDetails, SetIssueFields, TrackerClient, VerifyIssueAuthor,
};
use jotnar_tools::KerberosBroker;

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "jotnar_server=info,jotnar_pipeline=info,jotnar_agent=info,jotnar_queue=info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the tool registry every worker shares. Individual workflows only
/// ever reach for the tools their own steps name; registering the full
/// catalogue once keeps the wiring in one place (spec §4.1).
fn build_tool_registry(config: &Config) -> Arc<ToolRegistry> {
    let tracker = Arc::new(TrackerClient::new(
        config.tracker_url.clone(),
        config.tracker_token.clone(),
        Duration::from_secs(config.tool_tracker_timeout_s),
    ));
    let forge = Arc::new(ForgeClient::new(
        config.forge_url.clone(),
        config.forge_token.clone(),
        Duration::from_secs(config.tool_tracker_timeout_s),
    ));
    let keytab = (!config.krb5_keytab.is_empty()).then(|| config.krb5_keytab.clone());
    let kerberos = Arc::new(KerberosBroker::new(keytab, config.krb5_ccache.clone()));
    let builder = Arc::new(BuilderClient::new(
        config.builder_url.clone(),
        kerberos.clone(),
        Duration::from_secs(config.tool_builder_timeout_s),
        Duration::from_secs(config.build_poll_interval_s),
        Duration::from_secs(config.build_poll_deadline_s),
        Duration::from_secs(config.build_poll_interval_s * 4),
    ));

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(GetIssueDetails::new(tracker.clone())));
    registry.register(Box::new(SetIssueFields::new(tracker.clone())));
    registry.register(Box::new(AddIssueComment::new(tracker.clone())));
    registry.register(Box::new(ChangeIssueStatus::new(tracker.clone())));
    registry.register(Box::new(EditIssueLabels::new(tracker.clone())));
    registry.register(Box::new(VerifyIssueAuthor::new(tracker.clone())));
    registry.register(Box::new(CheckCveTriageEligibility::new(tracker)));

    registry.register(Box::new(ForkRepository::new(forge.clone())));
    registry.register(Box::new(CloneRepository));
    registry.register(Box::new(PushToRemoteRepository));
    registry.register(Box::new(OpenMergeRequest::new(forge.clone())));
    registry.register(Box::new(AddMergeRequestLabels::new(forge.clone())));
    registry.register(Box::new(GetInternalRhelBranches::new(forge)));

    registry.register(Box::new(BuildPackage::new(builder)));
    registry.register(Box::new(DownloadArtifacts::new(Duration::from_secs(config.tool_builder_timeout_s))));

    registry.register(Box::new(DownloadSources::new(kerberos.clone())));
    registry.register(Box::new(UploadSources::new(kerberos)));

    Arc::new(registry)
}

async fn shutdown_signal(notify: Arc<tokio::sync::Notify>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sig) = signal(SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
    notify.notify_waiters();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = Arc::new(Config::from_env()?);
    let role = std::env::var("JOTNAR_ROLE").unwrap_or_else(|_| "all".to_string());
    tracing::info!(role = %role, "starting jotnar-server");

    let pool = jotnar_queue::build_pool(&config.queue_url)?;
    let queue = Arc::new(WorkQueue::new(pool));
    queue.ensure_schema().await?;

    let tools = build_tool_registry(&config);
    let backend = Arc::new(CliModelBackend::new("claude", config.model.clone(), config.agent_timeout_s));
    let agent = Arc::new(AgentRunner::new(backend));

    let shutdown = Arc::new(tokio::sync::Notify::new());
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let mut tasks = tokio::task::JoinSet::new();

    if role == "all" || role == "ingestion" {
        let search = jotnar_pipeline::ingestion::IssueSearchClient::new(
            config.tracker_url.clone(),
            config.tracker_token.clone(),
            config.tracker_query.clone(),
            config.ingest_page_size,
        );
        let queue = queue.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            ingestion::run(&queue, &search, Duration::from_secs(config.ingest_interval_s), &shutdown).await;
        });
    }

    if role == "all" || role == "triage" {
        let worker = triage::TriageWorker::new(tools.clone(), agent.clone(), queue.clone(), config.clone());
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            worker.run(&shutdown).await;
        });
    }

    if role == "all" || role == "rebase" {
        let worker = rebase::RebaseWorker {
            tools: tools.clone(),
            agent: agent.clone(),
            queue: queue.clone(),
            config: config.clone(),
        };
        let queues = rebase_queues(&config);
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            worker.run(&queues, &shutdown).await;
        });
    }

    if role == "all" || role == "backport" {
        let worker = backport::BackportWorker {
            tools: tools.clone(),
            agent: agent.clone(),
            queue: queue.clone(),
            config: config.clone(),
        };
        let queues = backport_queues(&config);
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            worker.run(&queues, &shutdown).await;
        });
    }

    if role == "all" || role == "janitor" {
        let config = config.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            janitor::run(
                &config.clone_base_path,
                config.clone_janitor_max_age_days,
                Duration::from_secs(24 * 3600),
                &shutdown,
            )
            .await;
        });
    }

    while tasks.join_next().await.is_some() {}
    tracing::info!("all workers have stopped, exiting");
    Ok(())
}

/// The container-family queue this process drains, plus the legacy
/// unsplit queue so it keeps draining any backlog left there (spec §4.4).
fn rebase_queues(config: &Config) -> Vec<QueueName> {
    match config.container_suffix() {
        "c10s" => vec![QueueName::RebaseQueueC10s, QueueName::RebaseQueue],
        _ => vec![QueueName::RebaseQueueC9s, QueueName::RebaseQueue],
    }
}

fn backport_queues(config: &Config) -> Vec<QueueName> {
    match config.container_suffix() {
        "c10s" => vec![QueueName::BackportQueueC10s, QueueName::BackportQueue],
        _ => vec![QueueName::BackportQueueC9s, QueueName::BackportQueue],
    }
}
