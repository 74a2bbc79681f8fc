/// Per-instance TCP service: accept a client, pick the first reachable
/// backend from the instance's route source, and splice bytes both ways
/// until either side closes.
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::ConfigError;
use crate::metadata::cache::MetadataCache;
use crate::routing::destination::{DestinationSpec, TcpDestination};
use crate::routing::AccessMode;

/// Source of candidate backends for one routing instance. Candidates are
/// returned in preference order; an empty list means nothing is servable.
pub trait RouteSource: Send + Sync {
    fn candidates(&self) -> Vec<TcpDestination>;
}

impl std::fmt::Debug for dyn RouteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn RouteSource")
    }
}

/// Fixed address list from the configuration.
pub struct StaticRoutes {
    addresses: Vec<TcpDestination>,
}

impl StaticRoutes {
    pub fn new(addresses: Vec<TcpDestination>) -> Self {
        StaticRoutes { addresses }
    }
}

impl RouteSource for StaticRoutes {
    fn candidates(&self) -> Vec<TcpDestination> {
        self.addresses.clone()
    }
}

/// Live backends from the metadata cache, filtered by access mode.
pub struct CacheRoutes {
    cache: Arc<MetadataCache>,
    replicaset: String,
    mode: AccessMode,
}

impl CacheRoutes {
    pub fn new(cache: Arc<MetadataCache>, replicaset: String, mode: AccessMode) -> Self {
        CacheRoutes {
            cache,
            replicaset,
            mode,
        }
    }
}

impl RouteSource for CacheRoutes {
    fn candidates(&self) -> Vec<TcpDestination> {
        self.cache
            .lookup(&self.replicaset, self.mode)
            .into_iter()
            .filter(|(host, _)| !host.is_empty())
            .map(|(host, port)| TcpDestination { host, port })
            .collect()
    }
}

/// Build the route source a destination spec calls for.
pub fn route_source_for(
    spec: &DestinationSpec,
    mode: AccessMode,
    cache: Option<Arc<MetadataCache>>,
) -> Result<Arc<dyn RouteSource>, ConfigError> {
    match spec {
        DestinationSpec::AddressList { addresses } => {
            Ok(Arc::new(StaticRoutes::new(addresses.clone())))
        }
        DestinationSpec::MetadataCache { target, .. } => {
            let cache = cache.ok_or_else(|| {
                ConfigError::Invalid(
                    "metadata-cache destinations require a [metadata] section".to_string(),
                )
            })?;
            Ok(Arc::new(CacheRoutes::new(cache, target.clone(), mode)))
        }
    }
}

pub struct Router {
    name: String,
    source: Arc<dyn RouteSource>,
    connect_timeout: Duration,
    client_connect_timeout: Duration,
    max_connections: usize,
    max_connect_errors: u32,
    net_buffer_length: usize,
    active: AtomicUsize,
    connect_errors: Mutex<HashMap<IpAddr, u32>>,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        source: Arc<dyn RouteSource>,
        connect_timeout: Duration,
        client_connect_timeout: Duration,
        max_connections: usize,
        max_connect_errors: u32,
        net_buffer_length: usize,
    ) -> Self {
        Router {
            name,
            source,
            connect_timeout,
            client_connect_timeout,
            max_connections,
            max_connect_errors,
            net_buffer_length,
            active: AtomicUsize::new(0),
            connect_errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn run_tcp(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let router = Arc::clone(&self);
                    tokio::spawn(async move {
                        router
                            .handle_client(stream, Some(peer.ip()), peer.to_string())
                            .await;
                    });
                }
                Err(err) => {
                    error!("[{}] accept failed: {err}", self.name);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub async fn run_unix(self: Arc<Self>, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let router = Arc::clone(&self);
                    tokio::spawn(async move {
                        // no stable peer identity on a unix socket, so the
                        // connect-error blocklist does not apply
                        router
                            .handle_client(stream, None, "unix-socket".to_string())
                            .await;
                    });
                }
                Err(err) => {
                    error!("[{}] accept failed: {err}", self.name);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub async fn handle_client<S>(&self, client: S, peer_ip: Option<IpAddr>, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(ip) = peer_ip {
            if self.is_blocked(ip).await {
                warn!("[{}] refusing blocked client {peer}", self.name);
                return;
            }
        }

        if self.active.fetch_add(1, Ordering::SeqCst) >= self.max_connections {
            self.active.fetch_sub(1, Ordering::SeqCst);
            warn!("[{}] too many connections, rejecting client {peer}", self.name);
            return;
        }

        let backend = match timeout(self.client_connect_timeout, self.connect_backend()).await {
            Ok(Some(backend)) => backend,
            Ok(None) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                if let Some(ip) = peer_ip {
                    self.record_connect_error(ip).await;
                }
                warn!("[{}] no backend available for client {peer}", self.name);
                return;
            }
            Err(_) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                if let Some(ip) = peer_ip {
                    self.record_connect_error(ip).await;
                }
                warn!("[{}] backend selection timed out for client {peer}", self.name);
                return;
            }
        };

        if let Some(ip) = peer_ip {
            self.clear_connect_errors(ip).await;
        }
        self.splice(client, backend, &peer).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Walk the candidate list in order and return the first backend that
    /// accepts a connection within the connect timeout.
    async fn connect_backend(&self) -> Option<TcpStream> {
        for destination in self.source.candidates() {
            if destination.host.is_empty() {
                continue;
            }
            match timeout(
                self.connect_timeout,
                TcpStream::connect((destination.host.as_str(), destination.port)),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    debug!("[{}] connected to backend {destination}", self.name);
                    return Some(stream);
                }
                Ok(Err(err)) => {
                    warn!("[{}] backend {destination} refused: {err}", self.name);
                }
                Err(_) => {
                    warn!("[{}] backend {destination} timed out", self.name);
                }
            }
        }
        None
    }

    async fn splice<S>(&self, mut client: S, mut backend: TcpStream, peer: &str)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client_buf = vec![0u8; self.net_buffer_length];
        let mut backend_buf = vec![0u8; self.net_buffer_length];
        let mut to_backend = 0u64;
        let mut to_client = 0u64;

        info!("[{}] splicing client {peer}", self.name);

        loop {
            tokio::select! {
                result = client.read(&mut client_buf) => {
                    match result {
                        Ok(0) => {
                            debug!("[{}] client {peer} closed", self.name);
                            break;
                        }
                        Ok(n) => {
                            to_backend += n as u64;
                            if let Err(err) = backend.write_all(&client_buf[..n]).await {
                                warn!("[{}] write to backend failed for {peer}: {err}", self.name);
                                break;
                            }
                        }
                        Err(err) => {
                            warn!("[{}] read from client {peer} failed: {err}", self.name);
                            break;
                        }
                    }
                }
                result = backend.read(&mut backend_buf) => {
                    match result {
                        Ok(0) => {
                            debug!("[{}] backend closed for client {peer}", self.name);
                            break;
                        }
                        Ok(n) => {
                            to_client += n as u64;
                            if let Err(err) = client.write_all(&backend_buf[..n]).await {
                                warn!("[{}] write to client {peer} failed: {err}", self.name);
                                break;
                            }
                        }
                        Err(err) => {
                            warn!("[{}] read from backend failed for {peer}: {err}", self.name);
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            "[{}] done with client {peer}: {to_backend} bytes to backend, {to_client} bytes to client",
            self.name
        );
    }

    async fn is_blocked(&self, ip: IpAddr) -> bool {
        let errors = self.connect_errors.lock().await;
        errors
            .get(&ip)
            .map_or(false, |count| *count >= self.max_connect_errors)
    }

    async fn record_connect_error(&self, ip: IpAddr) {
        let mut errors = self.connect_errors.lock().await;
        let count = errors.entry(ip).or_insert(0);
        *count += 1;
        if *count >= self.max_connect_errors {
            warn!("[{}] blocking client {ip} after {count} connect errors", self.name);
        }
    }

    async fn clear_connect_errors(&self, ip: IpAddr) {
        self.connect_errors.lock().await.remove(&ip);
    }
}
