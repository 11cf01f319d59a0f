use serde::Serialize;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use uuid::Uuid;

use super::{pick_random, ServerWorker, EVENT_CLASSES, KEY_MONITORING_WINDOW};
use crate::lattice::{LatticeType, LatticeValue, LwwValue};
use crate::protocol::{
    report_metadata_key, KeyAccessData, KeyCount, KeyRequest, KeySizeData, KeySizeEntry, KeyTuple,
    ReportKind, RequestType, ServerThreadStatistics,
};
use crate::topology::ring::is_primary_replica;
use crate::topology::types::management_func_nodes_addr;

impl ServerWorker {
    /// Close out one reporting epoch: publish the three statistics reports as
    /// LWW metadata PUTs through the MEMORY tier, refresh the cache list, and
    /// reset the counters the reports drew from.
    pub(crate) async fn report_tick(&mut self) {
        self.epoch += 1;
        let duration_us = self.report_start.elapsed().as_micros().max(1) as f64;
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);

        for (class, time) in self.working_time_map.iter().enumerate() {
            let class_occupancy = *time as f64 / duration_us;
            if class_occupancy > 0.02 {
                info!("event class {class} occupancy is {class_occupancy:.3}");
            }
        }
        let occupancy = self.working_time as f64 / duration_us;
        if occupancy > 0.02 {
            info!("occupancy is {occupancy:.3}");
        }

        let consumption: u64 = self
            .stored_key_map
            .values()
            .map(|property| property.size as u64)
            .sum();
        let stats = ServerThreadStatistics {
            storage_consumption_kb: consumption / 1000,
            occupancy,
            epoch: self.epoch,
            access_count: self.access_count,
        };
        self.publish_report(ReportKind::ServerStats, ts, &stats).await;

        // Sweep expired access stamps, then report what remains per key.
        let cutoff = Instant::now().checked_sub(KEY_MONITORING_WINDOW);
        let mut access = KeyAccessData::default();
        for (key, stamps) in self.key_access_tracker.iter_mut() {
            if let Some(cutoff) = cutoff {
                stamps.retain(|stamp| *stamp >= cutoff);
            }
            access.keys.push(KeyCount {
                key: key.clone(),
                access_count: stamps.len() as u32,
            });
        }
        self.publish_report(ReportKind::KeyAccess, ts, &access).await;

        // Sizes are reported by the primary replica only, so the monitoring
        // plane sees each key exactly once per epoch.
        let mut sizes = KeySizeData::default();
        for (key, property) in &self.stored_key_map {
            if is_primary_replica(
                &self.global_rings,
                &self.local_rings,
                &self.settings,
                key,
                &self.key_replication_map,
                &self.wt,
            ) {
                sizes.key_sizes.push(KeySizeEntry {
                    key: key.clone(),
                    size: property.size as u64,
                });
            }
        }
        self.publish_report(ReportKind::KeySize, ts, &sizes).await;

        if let Some(mgmt_ip) = self.settings.mgmt_ip.clone() {
            // Argless query; the payload just names where the answer lands.
            let addr = management_func_nodes_addr(&mgmt_ip, self.settings.port_base);
            let respond_to = self.wt.management_response_addr();
            self.transport.send_string(&addr, &respond_to).await;
        }

        self.report_start = Instant::now();
        self.working_time = 0;
        self.working_time_map = [0; EVENT_CLASSES];
        self.access_count = 0;
    }

    /// PUT one report under its metadata key to a uniformly random member of
    /// the MEMORY-tier replica set.
    async fn publish_report<T: Serialize>(&mut self, kind: ReportKind, ts: u64, body: &T) {
        let body = match bincode::serialize(body) {
            Ok(body) => body,
            Err(err) => {
                error!("failed to encode {kind:?} report: {err}");
                return;
            }
        };
        let payload = match bincode::serialize(&LatticeValue::Lww(LwwValue::new(ts, body))) {
            Ok(payload) => payload,
            Err(err) => {
                error!("failed to encode {kind:?} report: {err}");
                return;
            }
        };
        let key = report_metadata_key(
            kind,
            self.settings.self_tier,
            &self.settings.private_ip,
            self.tid,
        );
        let targets = self.resolve_metadata(&key);
        let Some(target) = pick_random(&targets) else {
            return;
        };
        let request = KeyRequest {
            request_id: Uuid::new_v4().to_string(),
            response_address: None,
            request_type: RequestType::Put,
            tuples: vec![KeyTuple::put(key, LatticeType::Lww, payload)],
        };
        let addr = target.request_addr();
        self.transport.send_message(&addr, &request).await;
    }
}
