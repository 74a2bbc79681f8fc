/// Published topology snapshots and the refresh loop.
///
/// The refresh task is the only writer: it re-bootstraps from the seed list
/// when no metadata session is live, runs a fetch cycle, and swaps the new
/// `ReplicaSetView` in atomically. Readers load the current snapshot without
/// taking any lock; a failed cycle leaves the previous snapshot in place.
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use log::{info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::MetadataError;
use crate::metadata::fetcher::ClusterTopology;
use crate::metadata::types::{ReplicaSetView, ServerMode};
use crate::routing::AccessMode;

pub struct MetadataCache {
    cluster_name: String,
    seeds: Vec<(String, u16)>,
    ttl: Duration,
    topology: Mutex<ClusterTopology>,
    view: ArcSwap<ReplicaSetView>,
}

impl MetadataCache {
    pub fn new(
        cluster_name: String,
        seeds: Vec<(String, u16)>,
        ttl: Duration,
        topology: ClusterTopology,
    ) -> Self {
        MetadataCache {
            cluster_name,
            seeds,
            ttl,
            topology: Mutex::new(topology),
            view: ArcSwap::from_pointee(ReplicaSetView::new()),
        }
    }

    /// Run one fetch cycle and publish the result. On error the previous
    /// snapshot stays in effect.
    pub async fn refresh_once(&self) -> Result<(), MetadataError> {
        let mut topology = self.topology.lock().await;

        if !topology.is_connected() && !topology.connect(&self.seeds).await {
            return Err(MetadataError(format!(
                "unable to reach any metadata server for cluster '{}'",
                self.cluster_name
            )));
        }

        let view = topology.fetch_instances(&self.cluster_name).await?;
        self.view.store(Arc::new(view));
        Ok(())
    }

    /// Spawn the periodic refresh task.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        info!(
            "starting metadata refresh for cluster '{}' every {}s",
            cache.cluster_name,
            cache.ttl.as_secs()
        );
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(cache.ttl);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if let Err(err) = cache.refresh_once().await {
                    warn!("metadata refresh failed, keeping previous snapshot: {err}");
                }
            }
        })
    }

    /// Backends for a replica set whose resolved mode matches the requested
    /// access mode, in the catalog's order. Empty means "no servable backend
    /// right now".
    pub fn lookup(&self, replicaset_name: &str, mode: AccessMode) -> Vec<(String, u16)> {
        let want = match mode {
            AccessMode::ReadWrite => ServerMode::ReadWrite,
            AccessMode::ReadOnly => ServerMode::ReadOnly,
        };
        let view = self.view.load();
        view.get(replicaset_name)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|i| i.mode == want)
                    .map(|i| (i.host.clone(), i.port))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The current immutable snapshot.
    pub fn snapshot(&self) -> Arc<ReplicaSetView> {
        self.view.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::metadata::session::SessionFactory;
    use crate::metadata::testing::{row, ScriptedFactory};

    fn cache_with(factory: &Arc<ScriptedFactory>) -> MetadataCache {
        let topology = ClusterTopology::new(
            "user",
            "pass",
            Duration::from_secs(1),
            Arc::clone(factory) as Arc<dyn SessionFactory>,
        );
        MetadataCache::new(
            "replicaset-1".to_string(),
            vec![("localhost".to_string(), 3310)],
            Duration::from_secs(10),
            topology,
        )
    }

    fn script_healthy_cycle(factory: &Arc<ScriptedFactory>, session: usize) {
        factory.get(session).push_metadata(Ok(vec![
            row(&[Some("replicaset-1"), Some("instance-1"), Some("HA"), None, None, Some(""), Some("localhost:3310"), None]),
            row(&[Some("replicaset-1"), Some("instance-2"), Some("HA"), None, None, Some(""), Some("localhost:3320"), None]),
            row(&[Some("replicaset-1"), Some("instance-3"), Some("HA"), None, None, Some(""), Some("localhost:3330"), None]),
        ]));
        factory
            .get(session)
            .push_primary(Ok(vec![row(&[
                Some("group_replication_primary_member"),
                Some("instance-1"),
            ])]));
        factory.get(session).push_status(Ok(vec![
            row(&[Some("instance-1"), Some("ubuntu"), Some("3310"), Some("ONLINE"), Some("1")]),
            row(&[Some("instance-2"), Some("ubuntu"), Some("3320"), Some("ONLINE"), Some("1")]),
            row(&[Some("instance-3"), Some("ubuntu"), Some("3330"), Some("ONLINE"), Some("1")]),
        ]));
    }

    #[tokio::test]
    async fn lookup_filters_by_access_mode_in_catalog_order() {
        let factory = Arc::new(ScriptedFactory::with_sessions(2));
        factory.get(0).allow(&["localhost:3310"]);
        script_healthy_cycle(&factory, 0);

        let cache = cache_with(&factory);
        cache.refresh_once().await.unwrap();

        assert_eq!(
            cache.lookup("replicaset-1", AccessMode::ReadWrite),
            vec![("localhost".to_string(), 3310)]
        );
        assert_eq!(
            cache.lookup("replicaset-1", AccessMode::ReadOnly),
            vec![
                ("localhost".to_string(), 3320),
                ("localhost".to_string(), 3330)
            ]
        );
        assert!(cache.lookup("no-such-set", AccessMode::ReadWrite).is_empty());
    }

    #[tokio::test]
    async fn empty_cache_yields_empty_lookups() {
        let factory = Arc::new(ScriptedFactory::with_sessions(1));
        let cache = cache_with(&factory);

        assert!(cache.lookup("replicaset-1", AccessMode::ReadWrite).is_empty());
        assert!(cache.snapshot().is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let factory = Arc::new(ScriptedFactory::with_sessions(2));
        factory.get(0).allow(&["localhost:3310"]);
        script_healthy_cycle(&factory, 0);

        let cache = cache_with(&factory);
        cache.refresh_once().await.unwrap();
        let before = cache.snapshot();

        // next cycle: the topology query breaks
        factory
            .get(0)
            .push_metadata(Err(QueryError::Failed("some error (42)".to_string())));
        cache.refresh_once().await.unwrap_err();

        assert_eq!(cache.snapshot(), before);
        assert_eq!(
            cache.lookup("replicaset-1", AccessMode::ReadWrite),
            vec![("localhost".to_string(), 3310)]
        );
    }

    #[tokio::test]
    async fn refresh_reconnects_after_discarded_session() {
        let factory = Arc::new(ScriptedFactory::with_sessions(3));
        factory.get(0).allow(&["localhost:3310"]);
        factory
            .get(0)
            .push_metadata(Err(QueryError::Failed("some error (42)".to_string())));

        let cache = cache_with(&factory);
        cache.refresh_once().await.unwrap_err();

        // session was discarded; the next cycle bootstraps a fresh one
        factory.get(1).allow(&["localhost:3310"]);
        script_healthy_cycle(&factory, 1);
        cache.refresh_once().await.unwrap();

        assert_eq!(factory.create_count(), 2);
        assert_eq!(
            cache.lookup("replicaset-1", AccessMode::ReadWrite),
            vec![("localhost".to_string(), 3310)]
        );
    }

    #[tokio::test]
    async fn published_view_keys_match_instances() {
        let factory = Arc::new(ScriptedFactory::with_sessions(2));
        factory.get(0).allow(&["localhost:3310"]);
        script_healthy_cycle(&factory, 0);

        let cache = cache_with(&factory);
        cache.refresh_once().await.unwrap();

        for (name, instances) in cache.snapshot().iter() {
            assert!(instances.iter().all(|i| &i.replicaset_name == name));
        }
    }

    #[tokio::test]
    async fn unreachable_seeds_surface_as_metadata_error() {
        let factory = Arc::new(ScriptedFactory::with_sessions(1));
        let cache = cache_with(&factory);

        let err = cache.refresh_once().await.unwrap_err();
        assert!(err
            .to_string()
            .contains("unable to reach any metadata server"));
    }
}
