//! WireGuard interface.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;

use super::{StepBody, StepContext};
use crate::config::keys;
use crate::system::Invocation;

pub struct WireGuardSetup;

/// Interface settings written to `<interface>.conf`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub interface: String,
    pub address: String,
    pub listen_port: u16,
}

/// Accept `addr/prefix` with a prefix valid for the address family.
pub fn validate_cidr(value: &str) -> Result<()> {
    let (addr, prefix) = value
        .split_once('/')
        .with_context(|| format!("'{}' is not in CIDR notation (e.g. 10.253.0.1/24)", value))?;
    let addr: IpAddr = addr
        .parse()
        .with_context(|| format!("'{}' is not a valid IP address", addr))?;
    let prefix: u8 = prefix
        .parse()
        .with_context(|| format!("'{}' is not a valid prefix length", prefix))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        bail!("prefix /{} is too long for {}", prefix, addr);
    }
    Ok(())
}

pub fn render_config(cfg: &InterfaceConfig, private_key: &str) -> String {
    format!(
        "# Managed by homelab-setup\n\
         [Interface]\n\
         Address = {}\n\
         ListenPort = {}\n\
         PrivateKey = {}\n",
        cfg.address, cfg.listen_port, private_key
    )
}

impl WireGuardSetup {
    fn generate_keys(ctx: &StepContext<'_>) -> Result<(String, String)> {
        let private = ctx
            .run(Invocation::new("wg").arg("genkey").read_only())
            .context("failed to generate WireGuard private key")?
            .stdout
            .trim()
            .to_string();
        let public = ctx
            .run(Invocation::new("wg").arg("pubkey").stdin(format!("{}\n", private)).read_only())
            .context("failed to derive WireGuard public key")?
            .stdout
            .trim()
            .to_string();
        Ok((private, public))
    }
}

impl StepBody for WireGuardSetup {
    fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let address = ctx.require(keys::WG_INTERFACE_IP)?;
        validate_cidr(&address)?;

        let port_raw = ctx.value(keys::WG_LISTEN_PORT, "51820");
        let cfg = InterfaceConfig {
            interface: ctx.value(keys::WG_INTERFACE, "wg0"),
            address,
            listen_port: port_raw
                .parse()
                .with_context(|| format!("invalid WireGuard listen port '{}'", port_raw))?,
        };

        let dir = PathBuf::from(ctx.value(keys::WG_CONFIG_PATH, "/etc/wireguard"));
        let conf_path = dir.join(format!("{}.conf", cfg.interface));

        if ctx.fs.file_exists(&conf_path)? {
            info!(path = %conf_path.display(), "WireGuard config already present, keeping existing keys");
        } else {
            let (private_key, public_key) = Self::generate_keys(ctx)?;
            ctx.fs.ensure_directory(&dir, None, 0o700)?;
            ctx.fs
                .write_file(&conf_path, render_config(&cfg, &private_key).as_bytes(), 0o600)
                .with_context(|| format!("failed to write {}", conf_path.display()))?;
            if !public_key.is_empty() {
                ctx.config.set(keys::WG_PUBLIC_KEY, &public_key)?;
            }
            info!(path = %conf_path.display(), public_key = %public_key, "WireGuard config written");
        }

        ctx.run(
            Invocation::new("systemctl")
                .args(["enable", "--now"])
                .arg(format!("wg-quick@{}", cfg.interface)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cidr() {
        assert!(validate_cidr("10.253.0.1/24").is_ok());
        assert!(validate_cidr("fd00::1/64").is_ok());
        assert!(validate_cidr("10.253.0.1").is_err());
        assert!(validate_cidr("10.253.0.1/33").is_err());
        assert!(validate_cidr("not-an-ip/24").is_err());
    }

    #[test]
    fn test_render_config_contains_key_and_address() {
        let cfg = InterfaceConfig {
            interface: "wg0".to_string(),
            address: "10.1.0.1/24".to_string(),
            listen_port: 51820,
        };
        let text = render_config(&cfg, "test-private-key");
        assert!(text.contains("[Interface]"));
        assert!(text.contains("Address = 10.1.0.1/24"));
        assert!(text.contains("ListenPort = 51820"));
        assert!(text.contains("PrivateKey = test-private-key"));
    }
}
