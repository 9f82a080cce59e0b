use command_agent::AgentConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AgentConfig::from_env();
    tracing::info!(agent_id = %config.agent_id, server_url = %config.server_url, "command-agent starting");

    if let Err(err) = command_agent::run(config).await {
        tracing::error!(error = %err, "agent exited with an error");
        std::process::exit(1);
    }
}
