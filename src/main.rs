//! Binary entry point: configuration, tenant registration, and run.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use appserver::config::{apps::parse_applications, loader::load_config, TenantConfig};
use appserver::host::channel::ChannelHostFactory;
use appserver::http::HttpWorkerFactory;
use appserver::lifecycle::shutdown_signal;
use appserver::routing::RouteTable;
use appserver::server::Server;

#[derive(Parser, Debug)]
#[command(name = "appserver", about = "Multi-tenant application server front end")]
struct Args {
    /// TOML config file with listener and tenant definitions.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated tenants: [[host:]port:]vpath:realpath
    #[arg(long)]
    applications: Option<String>,

    /// Bind address; overrides the config file.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appserver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => Default::default(),
    };

    let mut tenants: Vec<TenantConfig> = config
        .tenants
        .iter()
        .filter(|t| t.enabled)
        .cloned()
        .collect();
    if let Some(applications) = &args.applications {
        tenants.extend(parse_applications(applications)?);
    }
    if tenants.is_empty() {
        // Serve the working directory at the root, like running with no
        // arguments from an application directory.
        let cwd = std::env::current_dir()?;
        tenants.push(TenantConfig {
            host: None,
            port: None,
            path_prefix: "/".into(),
            physical_root: cwd.to_string_lossy().into_owned(),
            enabled: true,
        });
    }

    let routes = build_route_table(&tenants);

    let bind_addr: SocketAddr = match args.bind {
        Some(addr) => addr,
        None => config.listener.bind_address.parse()?,
    };

    let server = Server::new(routes, Arc::new(HttpWorkerFactory));
    let local = server.start(bind_addr)?;
    tracing::info!(address = %local, tenants = tenants.len(), "appserver started");

    shutdown_signal().await;

    server.stop()?;
    server.stopped().await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn build_route_table(tenants: &[TenantConfig]) -> Arc<RouteTable> {
    let routes = Arc::new(RouteTable::new(Arc::new(ChannelHostFactory)));
    for tenant in tenants {
        routes.register(
            tenant.host.clone(),
            tenant.port,
            &tenant.path_prefix,
            tenant.physical_root.clone(),
        );
    }
    // A sole tenant takes every request without consulting the matcher.
    routes.set_single_tenant(tenants.len() == 1);
    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(prefix: &str) -> TenantConfig {
        TenantConfig {
            host: None,
            port: None,
            path_prefix: prefix.into(),
            physical_root: "/srv/app".into(),
            enabled: true,
        }
    }

    #[test]
    fn sole_tenant_enables_single_tenant_mode() {
        let routes = build_route_table(&[tenant("/")]);
        assert!(routes.is_single_tenant());

        let routes = build_route_table(&[tenant("/"), tenant("/blog/")]);
        assert!(!routes.is_single_tenant());
    }
}
