//! Dual-interface (wired + wireless) routing with one policy table per interface.

pub mod configurator;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::types::{InterfaceSettings, NetworkSettings};
use configurator::{strip_prefix_len, NetworkConfigurator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceRole {
    Wired,
    Wireless,
}

impl InterfaceRole {
    pub fn name(&self) -> &'static str {
        match self {
            InterfaceRole::Wired => "wired",
            InterfaceRole::Wireless => "wireless",
        }
    }

    fn default_metric(&self) -> u32 {
        match self {
            InterfaceRole::Wired => 100,
            InterfaceRole::Wireless => 600,
        }
    }

    fn default_table(&self) -> u32 {
        match self {
            InterfaceRole::Wired => 100,
            InterfaceRole::Wireless => 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceOutcome {
    pub role: InterfaceRole,
    pub interface: String,
    /// Source address the policy rule was keyed on; None if it was skipped
    pub rule_source: Option<String>,
}

/// Apply the wired profile, then the wireless one. Absent interfaces are skipped.
pub async fn configure_network(
    settings: &NetworkSettings,
    configurator: &dyn NetworkConfigurator,
) -> Result<Vec<InterfaceOutcome>> {
    let interfaces = [
        (InterfaceRole::Wired, settings.wired.as_ref()),
        (InterfaceRole::Wireless, settings.wireless.as_ref()),
    ];

    let mut outcomes = Vec::new();
    for (role, iface) in interfaces {
        let Some(iface) = iface else {
            info!("No {} interface configured, skipping", role.name());
            continue;
        };
        let outcome = configure_interface(role, iface, configurator)
            .await
            .with_context(|| format!("Failed to configure {} interface {}", role.name(), iface.interface))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

async fn configure_interface(
    role: InterfaceRole,
    iface: &InterfaceSettings,
    configurator: &dyn NetworkConfigurator,
) -> Result<InterfaceOutcome> {
    let metric = iface.metric.unwrap_or_else(|| role.default_metric());
    let table = iface.table.unwrap_or_else(|| role.default_table());
    let priority = iface.rule_priority.unwrap_or(table);

    if let Some(cidr) = &iface.address {
        configurator
            .set_address(&iface.connection, cidr, &iface.gateway)
            .await?;
    }
    configurator.set_metric(&iface.connection, metric).await?;
    configurator.activate(&iface.connection).await?;
    configurator
        .add_route(&iface.interface, &iface.gateway, table)
        .await?;

    let source = match &iface.address {
        Some(cidr) => Some(strip_prefix_len(cidr).to_string()),
        None => configurator.current_address(&iface.interface).await?,
    };
    match &source {
        Some(addr) => configurator.add_routing_rule(addr, table, priority).await?,
        None => warn!(
            "{} has no IPv4 address yet; policy rule for table {} not added",
            iface.interface, table
        ),
    }

    Ok(InterfaceOutcome {
        role,
        interface: iface.interface.clone(),
        rule_source: source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingConfigurator {
        calls: Mutex<Vec<String>>,
        dhcp_address: Option<String>,
        fail_route_on: Option<String>,
    }

    impl RecordingConfigurator {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl NetworkConfigurator for RecordingConfigurator {
        async fn set_address(&self, connection: &str, cidr: &str, gateway: &str) -> Result<()> {
            self.push(format!("address {} {} {}", connection, cidr, gateway));
            Ok(())
        }

        async fn set_metric(&self, connection: &str, metric: u32) -> Result<()> {
            self.push(format!("metric {} {}", connection, metric));
            Ok(())
        }

        async fn activate(&self, connection: &str) -> Result<()> {
            self.push(format!("up {}", connection));
            Ok(())
        }

        async fn current_address(&self, interface: &str) -> Result<Option<String>> {
            self.push(format!("query {}", interface));
            Ok(self.dhcp_address.clone())
        }

        async fn add_route(&self, interface: &str, gateway: &str, table: u32) -> Result<()> {
            if self.fail_route_on.as_deref() == Some(interface) {
                return Err(anyhow!("RTNETLINK answers: Network is unreachable"));
            }
            self.push(format!("route {} {} {}", interface, gateway, table));
            Ok(())
        }

        async fn add_routing_rule(&self, source: &str, table: u32, priority: u32) -> Result<()> {
            self.push(format!("rule {} {} {}", source, table, priority));
            Ok(())
        }
    }

    fn wired() -> InterfaceSettings {
        InterfaceSettings {
            interface: "eth0".to_string(),
            connection: "Wired connection 1".to_string(),
            address: Some("192.168.10.5/24".to_string()),
            gateway: "192.168.10.1".to_string(),
            metric: None,
            table: None,
            rule_priority: None,
        }
    }

    fn wireless() -> InterfaceSettings {
        InterfaceSettings {
            interface: "wlan0".to_string(),
            connection: "site-wifi".to_string(),
            address: None,
            gateway: "10.0.0.1".to_string(),
            metric: None,
            table: None,
            rule_priority: Some(250),
        }
    }

    #[tokio::test]
    async fn configures_wired_then_wireless_with_role_defaults() {
        let configurator = RecordingConfigurator {
            dhcp_address: Some("10.0.0.42".to_string()),
            ..Default::default()
        };
        let settings = NetworkSettings {
            wired: Some(wired()),
            wireless: Some(wireless()),
        };

        let outcomes = configure_network(&settings, &configurator).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].rule_source.as_deref(), Some("192.168.10.5"));
        assert_eq!(outcomes[1].rule_source.as_deref(), Some("10.0.0.42"));

        assert_eq!(
            configurator.calls(),
            vec![
                "address Wired connection 1 192.168.10.5/24 192.168.10.1",
                "metric Wired connection 1 100",
                "up Wired connection 1",
                "route eth0 192.168.10.1 100",
                "rule 192.168.10.5 100 100",
                "metric site-wifi 600",
                "up site-wifi",
                "route wlan0 10.0.0.1 200",
                "query wlan0",
                "rule 10.0.0.42 200 250",
            ]
        );
    }

    #[tokio::test]
    async fn missing_dhcp_address_skips_the_rule_only() {
        let configurator = RecordingConfigurator::default();
        let settings = NetworkSettings {
            wired: None,
            wireless: Some(wireless()),
        };

        let outcomes = configure_network(&settings, &configurator).await.unwrap();
        assert_eq!(outcomes[0].rule_source, None);
        assert!(configurator.calls().iter().all(|c| !c.starts_with("rule")));
        assert!(configurator.calls().contains(&"route wlan0 10.0.0.1 200".to_string()));
    }

    #[tokio::test]
    async fn failure_names_the_interface() {
        let configurator = RecordingConfigurator {
            fail_route_on: Some("eth0".to_string()),
            ..Default::default()
        };
        let settings = NetworkSettings {
            wired: Some(wired()),
            wireless: Some(wireless()),
        };

        let err = configure_network(&settings, &configurator).await.unwrap_err();
        assert!(format!("{:#}", err).contains("wired interface eth0"));
        assert!(configurator.calls().iter().all(|c| !c.contains("wlan0")));
    }
}
