use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::RelayConfig;

/// Expand path with tilde (~) and make it absolute
pub fn expand_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path);
    let path_buf = PathBuf::from(expanded.as_ref());

    if path_buf.is_absolute() {
        Ok(expanded.into_owned())
    } else {
        // Convert relative path to absolute
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&path_buf)
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))
    }
}

/// 展开所有 TLS 证书/私钥路径中的 `~`
pub fn expand_tls_paths(config: &mut RelayConfig) -> Result<()> {
    for listener in &mut config.listeners {
        let Some(ref mut tls) = listener.tls else {
            continue;
        };
        for path in [&mut tls.cert_path, &mut tls.key_path].into_iter().flatten() {
            let raw = path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Invalid path: {:?}", path))?;
            *path = PathBuf::from(expand_path(raw)?);
        }
    }
    Ok(())
}

/// Check configuration file format
pub fn check_config(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);

    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    println!("Checking configuration file: {}\n", config_path);

    let config = match RelayConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("✗ Configuration validation failed!");
            println!("\nError details:");
            println!("{:#}", e);

            println!("\nCommon issues:");
            println!("  1. Check TOML syntax (brackets, quotes, commas)");
            println!("  2. Every [[listeners]] entry needs name and bind_port");
            println!("  3. Backend addresses are \"host:port\" strings, IPv6 as \"[::1]:22\"");
            println!("  4. Ensure port numbers are valid (1-65535)");
            println!("  5. relay.read_buffer_size must be between 512 and 1048576");
            println!("  6. relay.max_backlog_bytes must be at least relay.read_buffer_size");

            return Err(e);
        }
    };

    println!("✓ Number of listeners: {}", config.listeners.len());
    for (idx, listener) in config.listeners.iter().enumerate() {
        println!(
            "  Listener #{}: '{}' on {} ({}, backlog={})",
            idx + 1,
            listener.name,
            listener.endpoint(),
            listener.mode(),
            listener.backlog
        );

        if let Some(ref tls) = listener.tls {
            match tls.resolved_paths() {
                Some((cert, key)) => {
                    for file in [cert, key] {
                        if file.exists() {
                            println!("    ✓ {:?} exists", file);
                        } else {
                            println!("    ⚠ Warning: {:?} not found", file);
                        }
                    }
                }
                None => println!("    ✓ Certificate/Key: will be auto-generated at runtime"),
            }
        }

        if let Some(ref rate_limit) = listener.rate_limit {
            println!(
                "    ✓ Rate limit: {}/s (burst {})",
                rate_limit.requests_per_second, rate_limit.burst_size
            );
        }
    }

    let registry = config.backends.registry();
    println!("✓ SSH backend: {}", registry.ssh());
    println!("✓ OpenVPN backend: {}", registry.openvpn());
    println!("✓ VMess backend: {}", registry.vmess());
    println!("✓ Default backend: {}", registry.default_backend());
    println!(
        "✓ Unknown traffic: {:?}, disguise reason: {:?}",
        config.relay.unknown_traffic, config.relay.disguise_reason
    );

    println!("\n✓ Relay configuration is valid!");
    Ok(())
}
