use std::collections::{BTreeSet, HashSet};
use tracing::warn;

use super::ServerWorker;
use crate::protocol::{CacheKeysQuery, CacheKeysReport, CacheNodeList, Key};
use crate::topology::types::cache_enumerate_addr;

impl ServerWorker {
    /// An external cache declared the keys it currently holds. Reconcile the
    /// `cache -> keys` record and its `key -> caches` inverse, which is the
    /// map the gossip round consults when fanning out invalidations.
    pub(crate) fn handle_cache_keys(&mut self, bytes: Vec<u8>) {
        let report: CacheKeysReport = match bincode::deserialize(&bytes) {
            Ok(report) => report,
            Err(err) => {
                warn!("discarding malformed cache keys report: {err}");
                return;
            }
        };
        let cache_ip = report.cache_ip;
        let fresh: BTreeSet<Key> = report.keys.into_iter().collect();

        let known = self
            .cache_ip_to_keys
            .entry(cache_ip.clone())
            .or_default()
            .clone();

        for key in fresh.difference(&known) {
            self.key_to_cache_ips
                .entry(key.clone())
                .or_default()
                .insert(cache_ip.clone());
        }
        for key in known.difference(&fresh) {
            let now_empty = match self.key_to_cache_ips.get_mut(key) {
                Some(cache_ips) => {
                    cache_ips.remove(&cache_ip);
                    cache_ips.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.key_to_cache_ips.remove(key);
            }
        }
        self.cache_ip_to_keys.insert(cache_ip, fresh);
    }

    /// The management node answered with the live cache nodes. Departed
    /// caches take their mappings with them; newly seen caches are asked to
    /// enumerate what they hold.
    pub(crate) async fn handle_management_nodes(&mut self, bytes: Vec<u8>) {
        let list: CacheNodeList = match bincode::deserialize(&bytes) {
            Ok(list) => list,
            Err(err) => {
                warn!("discarding malformed cache node list: {err}");
                return;
            }
        };
        let live: HashSet<String> = list.ips.into_iter().collect();

        let departed: Vec<String> = self.extant_caches.difference(&live).cloned().collect();
        for cache_ip in departed {
            let Some(keys) = self.cache_ip_to_keys.remove(&cache_ip) else {
                continue;
            };
            for key in keys {
                let now_empty = match self.key_to_cache_ips.get_mut(&key) {
                    Some(cache_ips) => {
                        cache_ips.remove(&cache_ip);
                        cache_ips.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.key_to_cache_ips.remove(&key);
                }
            }
        }

        let added: Vec<String> = live.difference(&self.extant_caches).cloned().collect();
        for cache_ip in added {
            self.rid += 1;
            let respond_to = self.wt.cache_ip_response_addr();
            let query = CacheKeysQuery {
                request_id: format!("{respond_to}:{}", self.rid),
                respond_to,
            };
            let addr = cache_enumerate_addr(&cache_ip, self.settings.port_base);
            self.transport.send_message(&addr, &query).await;
        }

        self.extant_caches = live;
    }
}
