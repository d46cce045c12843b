use std::path::Path;

use super::open_services;

/// Serve RPC on this process's stdin/stdout until stdin closes.
pub fn run(root: &Path) -> anyhow::Result<()> {
    let (_, services) = open_services(root)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        tracing::info!("rpc: reading requests from stdin");
        scrum_rpc::server::serve(services, tokio::io::stdin(), tokio::io::stdout()).await?;
        tracing::info!("rpc: stdin closed");
        Ok(())
    })
}
