//! NetworkManager / iproute2 backed interface configuration.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::system::executor::run_command;

#[async_trait]
pub trait NetworkConfigurator: Send + Sync {
    /// Static IPv4 address (CIDR) and gateway on a connection profile
    async fn set_address(&self, connection: &str, cidr: &str, gateway: &str) -> Result<()>;

    async fn set_metric(&self, connection: &str, metric: u32) -> Result<()>;

    /// Bring the profile up so modified settings take effect
    async fn activate(&self, connection: &str) -> Result<()>;

    /// Current IPv4 address on the interface, without prefix length
    async fn current_address(&self, interface: &str) -> Result<Option<String>>;

    /// Default route via `gateway` on `interface`, in routing table `table`
    async fn add_route(&self, interface: &str, gateway: &str, table: u32) -> Result<()>;

    /// `from <source> lookup <table>`; a no-op when the rule already exists
    async fn add_routing_rule(&self, source: &str, table: u32, priority: u32) -> Result<()>;
}

pub struct NmcliConfigurator;

#[async_trait]
impl NetworkConfigurator for NmcliConfigurator {
    async fn set_address(&self, connection: &str, cidr: &str, gateway: &str) -> Result<()> {
        run_command(
            "nmcli",
            &[
                "connection", "modify", connection,
                "ipv4.method", "manual",
                "ipv4.addresses", cidr,
                "ipv4.gateway", gateway,
            ],
        )
        .await?;
        info!("{}: address {} via {}", connection, cidr, gateway);
        Ok(())
    }

    async fn set_metric(&self, connection: &str, metric: u32) -> Result<()> {
        let metric = metric.to_string();
        run_command(
            "nmcli",
            &["connection", "modify", connection, "ipv4.route-metric", &metric],
        )
        .await?;
        info!("{}: route metric {}", connection, metric);
        Ok(())
    }

    async fn activate(&self, connection: &str) -> Result<()> {
        run_command("nmcli", &["connection", "up", connection]).await?;
        Ok(())
    }

    async fn current_address(&self, interface: &str) -> Result<Option<String>> {
        let output = run_command("ip", &["-4", "-o", "addr", "show", "dev", interface]).await?;
        Ok(parse_ipv4_address(&output))
    }

    async fn add_route(&self, interface: &str, gateway: &str, table: u32) -> Result<()> {
        let table = table.to_string();
        run_command(
            "ip",
            &["route", "replace", "default", "via", gateway, "dev", interface, "table", &table],
        )
        .await?;
        info!("{}: default via {} in table {}", interface, gateway, table);
        Ok(())
    }

    async fn add_routing_rule(&self, source: &str, table: u32, priority: u32) -> Result<()> {
        let table = table.to_string();
        // Filtering by id matches even when rt_tables gives the table a name
        let existing = run_command("ip", &["rule", "show", "table", &table]).await?;
        if rule_exists(&existing, source) {
            debug!("Rule from {} lookup {} already present", source, table);
            return Ok(());
        }

        let priority = priority.to_string();
        run_command(
            "ip",
            &["rule", "add", "from", source, "table", &table, "priority", &priority],
        )
        .await?;
        info!("Rule from {} lookup {} priority {}", source, table, priority);
        Ok(())
    }
}

/// First address out of `ip -4 -o addr show` output.
/// Input: "2: eth0    inet 192.168.1.20/24 brd 192.168.1.255 scope global eth0 ..."
pub fn parse_ipv4_address(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|t| *t == "inet")?;
        let cidr = tokens.next()?;
        Some(strip_prefix_len(cidr).to_string())
    })
}

pub fn strip_prefix_len(cidr: &str) -> &str {
    cidr.split('/').next().unwrap_or(cidr)
}

/// Looks for `from <source>` in `ip rule show table <id>` output, e.g.
/// "100:	from 10.0.0.5 lookup 100" or "100:	from 10.0.0.5 lookup wired".
fn rule_exists(rules: &str, source: &str) -> bool {
    rules.lines().any(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        tokens
            .windows(2)
            .any(|w| w[0] == "from" && strip_prefix_len(w[1]) == source)
    })
}
