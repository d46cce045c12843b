use std::path::Path;

use super::open_services;

pub fn run(root: &Path, port: Option<u16>, stdio: bool) -> anyhow::Result<()> {
    let (config, services) = open_services(root)?;
    let port = port.unwrap_or(config.server.port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;

        if stdio {
            let rpc_services = services.clone();
            tokio::spawn(async move {
                match scrum_rpc::server::serve(rpc_services, tokio::io::stdin(), tokio::io::stdout())
                    .await
                {
                    Ok(()) => tracing::info!("stdio rpc: input closed, HTTP keeps serving"),
                    Err(e) => tracing::error!(error = %e, "stdio rpc failed"),
                }
            });
        }

        tokio::select! {
            res = scrum_server::serve_on(services, listener) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })
}
