use anyhow::{Context, Result};

use super::ServerWorker;
use crate::protocol::{ClusterMembership, JoinNotice};
use crate::topology::types::{
    monitoring_notify_addr, routing_notify_addr, seed_addr, management_restart_addr, RingNode,
    ServerThread,
};
use crate::transport::Transport;

impl ServerWorker {
    /// First-join bootstrap: fetch the current membership from the seed,
    /// learn this node's join epoch from the management node (zero without
    /// one), install the rings and announce the node to the cluster.
    ///
    /// Failing to reach the seed is fatal; without a membership snapshot the
    /// worker cannot route anything.
    pub async fn bootstrap(&mut self) -> Result<()> {
        let seed = seed_addr(&self.settings.seed_ip, self.settings.port_base);
        let reply = Transport::request(&seed, b"join")
            .await
            .context("unable to resolve seed at startup")?;
        let membership: ClusterMembership =
            bincode::deserialize(&reply).context("malformed membership snapshot from seed")?;

        let join_epoch = match &self.settings.mgmt_ip {
            Some(mgmt_ip) => {
                let query = format!("restart:{}", self.settings.private_ip);
                let addr = management_restart_addr(mgmt_ip, self.settings.port_base);
                let reply = Transport::request(&addr, query.as_bytes())
                    .await
                    .context("unable to query restart count")?;
                String::from_utf8(reply)
                    .context("non-UTF-8 restart count")?
                    .trim()
                    .parse()
                    .context("malformed restart count")?
            }
            None => 0,
        };

        self.install_membership(&membership, join_epoch);
        self.announce().await;
        Ok(())
    }

    /// Populate the global rings from a membership snapshot and insert this
    /// node with its own join epoch.
    pub fn install_membership(&mut self, membership: &ClusterMembership, join_epoch: u32) {
        for tier_membership in &membership.tiers {
            let ring = self.global_rings.entry(tier_membership.tier).or_default();
            for server in &tier_membership.servers {
                ring.insert(RingNode {
                    public_ip: server.public_ip.clone(),
                    private_ip: server.private_ip.clone(),
                    join_epoch: 0,
                    vtid: 0,
                });
            }
        }
        self.join_epoch = join_epoch;
        self.global_rings
            .entry(self.settings.self_tier)
            .or_default()
            .insert(RingNode {
                public_ip: self.settings.public_ip.clone(),
                private_ip: self.settings.private_ip.clone(),
                join_epoch,
                vtid: 0,
            });
    }

    /// Thread 0 announces the freshly joined node to every peer server and to
    /// the routing and monitoring collaborators.
    pub async fn announce(&self) {
        if self.tid != 0 {
            return;
        }
        let body = JoinNotice {
            tier: self.settings.self_tier,
            public_ip: self.settings.public_ip.clone(),
            private_ip: self.settings.private_ip.clone(),
            join_epoch: self.join_epoch,
        }
        .encode();

        let mut peers = Vec::new();
        for ring in self.global_rings.values() {
            for node in ring.unique_nodes() {
                if node.private_ip != self.settings.private_ip {
                    peers.push(
                        ServerThread::new(
                            &node.public_ip,
                            &node.private_ip,
                            0,
                            self.settings.port_base,
                        )
                        .node_join_addr(),
                    );
                }
            }
        }
        for addr in peers {
            self.transport.send_string(&addr, &body).await;
        }

        let notify = format!("join:{body}");
        for ip in &self.settings.routing_ips {
            let addr = routing_notify_addr(ip, self.settings.port_base);
            self.transport.send_string(&addr, &notify).await;
        }
        for ip in &self.settings.monitoring_ips {
            let addr = monitoring_notify_addr(ip, self.settings.port_base);
            self.transport.send_string(&addr, &notify).await;
        }
    }
}
