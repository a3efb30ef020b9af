use anyhow::Result;
use tracing::info;

use crate::address::Address;
use crate::config::{ListenerConfig, RelayConfig, TlsListenerConfig};
use crate::server;
use crate::settings::UnknownTrafficPolicy;

use super::cert;
use super::config::{check_config, expand_path, expand_tls_paths};
use super::template;
use super::{Commands, ServeArgs};

/// Execute CLI commands
pub async fn execute_command(cli: &super::Cli) -> Result<()> {
    match &cli.command {
        Commands::Run { config } => {
            run_from_file(config).await?;
        }
        Commands::Serve(args) => {
            let config = serve_config(args)?;
            server::run_server(config).await?;
        }
        Commands::Check { config } => {
            let config_path = expand_path(config)?;
            check_config(&config_path)?;
        }
        Commands::Template { output } => {
            template::generate_config_template(output.as_deref())?;
        }
        Commands::Cert {
            cert_out,
            key_out,
            common_name,
            alt_names,
        } => {
            cert::generate_certificate(cert_out, key_out, common_name, alt_names)?;
        }
    }

    Ok(())
}

/// Run the relay from a configuration file
async fn run_from_file(config: &str) -> Result<()> {
    let config_path = expand_path(config)?;

    info!("Loading relay configuration from: {}", config_path);
    let mut relay_config = RelayConfig::load(&config_path)?;
    expand_tls_paths(&mut relay_config)?;

    server::run_server(relay_config).await
}

/// 把 `serve` 的命令行参数转换成单监听器配置
pub fn serve_config(args: &ServeArgs) -> Result<RelayConfig> {
    let mut listener =
        ListenerConfig::plain("serve", args.host.as_str(), args.port).with_backlog(args.backlog);

    if args.https {
        let tls = TlsListenerConfig {
            cert_path: args.cert.clone(),
            key_path: args.key.clone(),
        };
        listener = listener.with_tls(tls);
    }

    let policy = if args.await_tunnel {
        UnknownTrafficPolicy::AwaitTunnel
    } else {
        UnknownTrafficPolicy::ForwardDefault
    };

    let mut config = RelayConfig::builder()
        .listener(listener)
        .ssh_backend(Address::new(args.backend_host.as_str(), args.ssh_port))
        .openvpn_backend(Address::new(args.backend_host.as_str(), args.openvpn_port))
        .vmess_backend(Address::new(args.backend_host.as_str(), args.v2ray_port))
        .unknown_traffic(policy)
        .build()?;
    expand_tls_paths(&mut config)?;
    Ok(config)
}
