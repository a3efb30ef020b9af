use anyhow::{Context, Result};
use rcgen::generate_simple_self_signed;
use rustls::pki_types::CertificateDer;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_rustls::rustls;
use tracing::info;

/// 加载服务端 TLS 配置
///
/// `key_path` 可以和 `cert_path` 相同（证书与私钥放在同一个 PEM 文件中）
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<rustls::ServerConfig>> {
    let cert_file = File::open(cert_path)
        .with_context(|| format!("Failed to open cert file: {:?}", cert_path))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse certificates")?;
    if certs.is_empty() {
        anyhow::bail!("No certificate found in {:?}", cert_path);
    }

    let key_file =
        File::open(key_path).with_context(|| format!("Failed to open key file: {:?}", key_path))?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .context("Failed to parse private key")?
        .with_context(|| format!("No private key found in {:?}", key_path))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to create server config")?;

    Ok(Arc::new(config))
}

/// 生成自签名证书和私钥并写入指定路径
pub fn generate_self_signed_cert(
    common_name: &str,
    alt_names: &[String],
    cert_out: &Path,
    key_out: &Path,
) -> Result<()> {
    // rcgen 至少需要一个 SAN；确保包含 CN
    let mut names: Vec<String> = alt_names.to_vec();
    if !names.iter().any(|n| n == common_name) {
        names.push(common_name.to_string());
    }

    let cert =
        generate_simple_self_signed(names).context("Failed to generate self-signed certificate")?;
    let cert_pem = cert.cert.pem();
    let key_pem = cert.signing_key.serialize_pem();

    std::fs::write(cert_out, cert_pem)
        .with_context(|| format!("Failed to write certificate to {:?}", cert_out))?;
    std::fs::write(key_out, key_pem)
        .with_context(|| format!("Failed to write private key to {:?}", key_out))?;

    Ok(())
}

/// 在临时目录生成一对证书，供未配置证书的 TLS 监听器使用
pub fn generate_temporary_cert(listener_name: &str, bind_addr: &str) -> Result<(PathBuf, PathBuf)> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let temp_dir = std::env::temp_dir();
    let cert_path = temp_dir.join(format!("disguise-relay-{}-cert-{}.pem", listener_name, ts));
    let key_path = temp_dir.join(format!("disguise-relay-{}-key-{}.pem", listener_name, ts));

    // 通配地址回退到 localhost
    let cn = match bind_addr {
        "0.0.0.0" | "::" | "[::]" => "localhost",
        other => other,
    };
    generate_self_signed_cert(cn, &[cn.to_string()], &cert_path, &key_path)?;

    info!(
        "Generated self-signed certificate for listener '{}' at {:?} and key at {:?}",
        listener_name, cert_path, key_path
    );

    Ok((cert_path, key_path))
}
