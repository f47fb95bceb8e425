//! Fleet rescale with live session migration.
//!
//! Retiring proxies leave the pools first, then each of their sessions is
//! re-matched. The first session that cannot be placed aborts the rescale;
//! sessions already moved in the same call stay moved. Migration
//! instructions go out after the locks are released, concurrently, each
//! with its own timeout.

use crate::config::{BrokerError, Result};
use crate::core::rendezvous::{Broker, lock};
use crate::core::signaling::TransferRequest;
use std::net::IpAddr;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// One client moved from a retiring proxy to a replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub client_id: String,
    pub from: IpAddr,
    pub to: IpAddr,
}

/// Outcome of a complete rescale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescaleReport {
    pub retired: usize,
    pub migrations: Vec<Migration>,
    pub transfers_failed: usize,
}

impl Broker {
    /// Retires `retiring` proxies and re-homes their sessions.
    ///
    /// `incoming` proxies join the pools on their own first poll; they are
    /// only logged here.
    ///
    /// # Errors
    ///
    /// Returns `PartialMigration` if any session could not be re-matched.
    /// Migrations completed before the failure are kept.
    pub async fn rescale(&self, retiring: &[IpAddr], incoming: &[IpAddr]) -> Result<RescaleReport> {
        if retiring.is_empty() && incoming.is_empty() {
            return Ok(RescaleReport::default());
        }
        info!(
            retiring = retiring.len(),
            incoming = incoming.len(),
            "Rescale requested"
        );

        let mut migrations = Vec::new();
        let mut stranded = 0;
        {
            let mut state = lock(&self.state);
            let mut registry = lock(&self.registry);

            for &addr in retiring {
                state.pools.remove(addr);
                state.directory.remove_addr(addr);
            }

            'retiring: for &addr in retiring {
                let sessions = registry.clients_of(addr);
                for (idx, session) in sessions.iter().enumerate() {
                    let Some(replacement) = state.pools.match_proxy(session.nat) else {
                        stranded = sessions.len() - idx;
                        warn!(
                            addr = %addr,
                            nat = %session.nat,
                            stranded,
                            "No replacement proxy, aborting rescale"
                        );
                        break 'retiring;
                    };
                    registry.rebind(&session.client_id, replacement.addr);
                    migrations.push(Migration {
                        client_id: session.client_id.clone(),
                        from: addr,
                        to: replacement.addr,
                    });
                }
                registry.drop_proxy(addr);
            }
        }

        let transfers_failed = self.send_transfers(&migrations).await;

        if stranded > 0 {
            self.metrics.record_rescale(false);
            return Err(BrokerError::PartialMigration {
                migrated: migrations.len(),
                stranded,
            });
        }

        self.metrics.record_rescale(true);
        info!(
            migrated = migrations.len(),
            transfers_failed,
            "Rescale complete"
        );
        Ok(RescaleReport {
            retired: retiring.len(),
            migrations,
            transfers_failed,
        })
    }

    /// Sends one transfer instruction per migration to the old proxy.
    /// Returns how many could not be delivered.
    async fn send_transfers(&self, migrations: &[Migration]) -> usize {
        let mut tasks = JoinSet::new();
        for migration in migrations {
            let channel = self.channel.clone();
            let timeout = self.config.transfer_timeout;
            let from = migration.from;
            let request = TransferRequest {
                cid: migration.client_id.clone(),
                new_ip: migration.to.to_string(),
                transfer_now: true,
            };
            tasks.spawn(async move {
                match tokio::time::timeout(timeout, channel.send_transfer(from, &request)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(addr = %from, error = %e, "Transfer instruction failed");
                        false
                    }
                    Err(_) => {
                        warn!(addr = %from, "Transfer instruction timed out");
                        false
                    }
                }
            });
        }

        let mut failed = 0;
        while let Some(result) = tasks.join_next().await {
            let delivered = result.unwrap_or(false);
            self.metrics.record_transfer(delivered);
            if !delivered {
                failed += 1;
            }
        }
        failed
    }
}
