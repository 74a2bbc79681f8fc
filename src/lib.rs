/// Pasarela - stateless TCP connection router for replicated MySQL clusters
///
/// Pasarela sits between client applications and a replicated cluster. For
/// each client connection it selects a backend from a dynamically maintained
/// routing pool and splices bytes between the two sockets until either side
/// closes. Backend membership is discovered periodically: the metadata cache
/// reads the cluster's own catalog from one of a list of seed servers,
/// cross-checks it against live group-replication state, and publishes a
/// classified instance list (role + availability) that routing instances
/// consult on every new connection.
pub mod config;
pub mod error;
pub mod metadata;
pub mod routing;
pub mod utils;
