/// The discovery state machine.
///
/// One `ClusterTopology` owns every catalog session it opens. Each refresh
/// runs the three-query protocol: Query #1 reads the configured topology
/// from the metadata server, then for every replica set Queries #2 and #3
/// are issued against that set's members (falling back node by node) to
/// learn which member is primary and which members are alive. The resolved
/// per-instance modes and the replica-set status come out of
/// `check_replicaset_status`.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{MetadataError, QueryError};
use crate::metadata::session::{CatalogSession, Row, SessionFactory};
use crate::metadata::types::{
    GroupReplicationMember, ManagedInstance, MemberRole, MemberState, ReplicaSetStatus,
    ReplicaSetView, ServerMode,
};
use crate::utils::split_host_port;

/// Query #1: expected topology for a cluster, from the catalog tables on the
/// metadata server. The cluster name is appended as a quoted literal.
pub const QUERY_METADATA: &str = "SELECT \
    R.replicaset_name, I.mysql_server_uuid, I.role, I.weight, I.version_token, H.location, \
    I.addresses->>'$.mysqlClassic', I.addresses->>'$.mysqlX' \
    FROM mysql_innodb_cluster_metadata.clusters AS F \
    JOIN mysql_innodb_cluster_metadata.replicasets AS R ON F.cluster_id = R.cluster_id \
    JOIN mysql_innodb_cluster_metadata.instances AS I ON R.replicaset_id = I.replicaset_id \
    JOIN mysql_innodb_cluster_metadata.hosts AS H ON I.host_id = H.host_id \
    WHERE F.cluster_name = ";

/// Query #2: the member a node currently considers primary. An empty value
/// means no primary is visible from that node.
pub const QUERY_PRIMARY_MEMBER: &str = "show status like 'group_replication_primary_member'";

/// Query #3: group membership and member state as seen by a node.
pub const QUERY_STATUS: &str = "SELECT \
    member_id, member_host, member_port, member_state, \
    @@group_replication_single_primary_mode \
    FROM performance_schema.replication_group_members \
    WHERE channel_name = 'group_replication_applier'";

pub struct ClusterTopology {
    user: String,
    password: String,
    connect_timeout: Duration,
    factory: Arc<dyn SessionFactory>,
    metadata_session: Option<Box<dyn CatalogSession>>,
}

impl ClusterTopology {
    pub fn new(
        user: &str,
        password: &str,
        connect_timeout: Duration,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        ClusterTopology {
            user: user.to_string(),
            password: password.to_string(),
            connect_timeout,
            factory,
            metadata_session: None,
        }
    }

    /// Try each seed in order; the first that accepts a connection becomes
    /// the metadata server session. One session object serves all attempts.
    pub async fn connect(&mut self, seeds: &[(String, u16)]) -> bool {
        self.metadata_session = None;
        let mut session = self.factory.create();
        for (host, port) in seeds {
            match session
                .connect(host, *port, &self.user, &self.password, self.connect_timeout)
                .await
            {
                Ok(()) => {
                    debug!("connected to metadata server {host}:{port}");
                    self.metadata_session = Some(session);
                    return true;
                }
                Err(err) => warn!("metadata server candidate failed: {err}"),
            }
        }
        false
    }

    pub fn is_connected(&self) -> bool {
        self.metadata_session
            .as_ref()
            .map_or(false, |s| s.is_connected())
    }

    /// Address of the current metadata server session, if any.
    pub fn metadata_server(&self) -> Option<String> {
        self.metadata_session.as_ref().and_then(|s| s.address())
    }

    /// Query #1 against the metadata server, grouped by replica set in the
    /// catalog's row order.
    pub async fn fetch_instances_from_metadata_server(
        &mut self,
        cluster_name: &str,
    ) -> Result<ReplicaSetView, MetadataError> {
        let session = self
            .metadata_session
            .as_mut()
            .ok_or_else(|| MetadataError("not connected to any metadata server".to_string()))?;

        let sql = format!("{QUERY_METADATA}'{}'", cluster_name.replace('\'', "''"));
        let rows = match session.query(&sql).await {
            Ok(rows) => rows,
            Err(err) => {
                // session starts clean next cycle
                self.metadata_session = None;
                return Err(err.into());
            }
        };

        let mut view = ReplicaSetView::new();
        for row in &rows {
            let instance = instance_from_row(row);
            view.entry(instance.replicaset_name.clone())
                .or_default()
                .push(instance);
        }
        Ok(view)
    }

    /// Probe the members of one replica set for live group-replication
    /// state, update each instance's `mode`, and report the set's status.
    ///
    /// Candidates are tried in catalog order. A connect failure moves on to
    /// the next candidate; a query failure additionally discards that
    /// session. When the metadata server is itself a member, its session is
    /// reused instead of opening a fresh one.
    pub async fn update_replicaset_status(
        &mut self,
        replicaset_name: &str,
        instances: &mut [ManagedInstance],
    ) -> Result<ReplicaSetStatus, MetadataError> {
        for idx in 0..instances.len() {
            let host = instances[idx].host.clone();
            let port = instances[idx].port;
            if host.is_empty() {
                continue;
            }

            let Some((mut session, reused)) = self.node_session(&host, port).await else {
                continue;
            };

            let primary_uuid = match query_primary_member(session.as_mut()).await {
                Ok(uuid) => uuid,
                Err(err) => {
                    warn!("primary-member query on {host}:{port} failed: {err}");
                    continue;
                }
            };

            let members = match query_group_members(session.as_mut(), &primary_uuid).await {
                Ok(members) => members,
                Err(err) => {
                    warn!("group-members query on {host}:{port} failed: {err}");
                    continue;
                }
            };

            if reused {
                self.metadata_session = Some(session);
            }
            return Ok(Self::check_replicaset_status(instances, &members));
        }

        Err(MetadataError(format!(
            "Unable to fetch live group_replication member data from any server in replicaset '{replicaset_name}'"
        )))
    }

    /// Orchestrator: topology first, then live state for every replica set
    /// the catalog returned.
    pub async fn fetch_instances(
        &mut self,
        cluster_name: &str,
    ) -> Result<ReplicaSetView, MetadataError> {
        let mut view = self.fetch_instances_from_metadata_server(cluster_name).await?;
        let names: Vec<String> = view.keys().cloned().collect();
        for name in names {
            if let Some(instances) = view.get_mut(&name) {
                let status = self.update_replicaset_status(&name, instances).await?;
                debug!("replicaset '{name}' status: {status:?}");
            }
        }
        Ok(view)
    }

    /// Resolve each expected instance against the live-member map and derive
    /// the replica-set status under the quorum rule: strictly more than half
    /// of the expected instances must have a usable mode.
    pub fn check_replicaset_status(
        instances: &mut [ManagedInstance],
        live: &HashMap<String, GroupReplicationMember>,
    ) -> ReplicaSetStatus {
        let mut writable = 0usize;
        let mut readable = 0usize;

        for instance in instances.iter_mut() {
            instance.mode = match live.get(&instance.server_uuid) {
                Some(member) if member.state == MemberState::Online => match member.role {
                    MemberRole::Primary => {
                        writable += 1;
                        ServerMode::ReadWrite
                    }
                    MemberRole::Secondary => {
                        readable += 1;
                        ServerMode::ReadOnly
                    }
                },
                Some(_) => ServerMode::Unavailable,
                None => {
                    warn!(
                        "Member {} defined in metadata not found in actual replicaset",
                        instance
                    );
                    ServerMode::Unavailable
                }
            };
        }

        let alive = writable + readable;
        if instances.is_empty() || alive * 2 <= instances.len() {
            ReplicaSetStatus::Unavailable
        } else if writable > 0 {
            ReplicaSetStatus::AvailableWritable
        } else {
            ReplicaSetStatus::AvailableReadOnly
        }
    }

    /// A session to the given node: the metadata session when the node is
    /// the metadata server, a fresh connection otherwise. `None` means the
    /// node could not be reached.
    async fn node_session(
        &mut self,
        host: &str,
        port: u16,
    ) -> Option<(Box<dyn CatalogSession>, bool)> {
        let addr = format!("{host}:{port}");
        if self
            .metadata_session
            .as_ref()
            .and_then(|s| s.address())
            .as_deref()
            == Some(addr.as_str())
        {
            return self.metadata_session.take().map(|s| (s, true));
        }

        let mut session = self.factory.create();
        match session
            .connect(host, port, &self.user, &self.password, self.connect_timeout)
            .await
        {
            Ok(()) => Some((session, false)),
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }
}

async fn query_primary_member(session: &mut dyn CatalogSession) -> Result<String, QueryError> {
    let rows = session.query(QUERY_PRIMARY_MEMBER).await?;
    Ok(rows.first().map(|r| r.text(1)).unwrap_or_default())
}

async fn query_group_members(
    session: &mut dyn CatalogSession,
    primary_uuid: &str,
) -> Result<HashMap<String, GroupReplicationMember>, QueryError> {
    let rows = session.query(QUERY_STATUS).await?;

    // group-wide variable, identical on every row
    let single_primary = rows
        .first()
        .map(|r| {
            let flag = r.text(4);
            !(flag == "0" || flag.eq_ignore_ascii_case("off"))
        })
        .unwrap_or(true);

    let mut members = HashMap::new();
    for row in rows {
        let member_id = row.text(0);
        let state = MemberState::from_catalog(&row.text(3));
        let role = if single_primary {
            if member_id == primary_uuid {
                MemberRole::Primary
            } else {
                MemberRole::Secondary
            }
        } else if state == MemberState::Online {
            MemberRole::Primary
        } else {
            MemberRole::Secondary
        };
        members.insert(
            member_id.clone(),
            GroupReplicationMember {
                member_id,
                host: row.text(1),
                port: row.uint_or(2, 0) as u16,
                state,
                role,
            },
        );
    }
    Ok(members)
}

fn instance_from_row(row: &Row) -> ManagedInstance {
    let (host, port) = match row.get(6) {
        Some(addr) => parse_catalog_addr(addr, 3306),
        None => (String::new(), 3306),
    };
    let xport = match row.get(7) {
        Some(addr) => parse_catalog_addr(addr, port.saturating_mul(10)).1,
        None => port.saturating_mul(10),
    };

    ManagedInstance {
        replicaset_name: row.text(0),
        server_uuid: row.text(1),
        role: row.text(2),
        mode: ServerMode::Unavailable,
        weight: row.float_or(3, 0.0),
        version_token: row.uint_or(4, 0),
        location: row.text(5),
        host,
        port,
        xport,
    }
}

fn parse_catalog_addr(addr: &str, default_port: u16) -> (String, u16) {
    match split_host_port(addr) {
        Ok((host, Some(port))) => (host, port),
        Ok((host, None)) => (host, default_port),
        Err(reason) => {
            warn!("malformed address '{addr}' in metadata: {reason}");
            (String::new(), default_port)
        }
    }
}
