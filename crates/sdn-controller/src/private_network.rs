//! Private overlay network and star-center election.
//!
//! A [`PrivateNetwork`] spans one local network per participating pool. One
//! host is elected as the star center; every other eligible host gets a
//! tunnel port toward the center and the center gets one back.

use crate::infra::{HostRecord, InfraApi, PoolSnapshot, TunnelStatus};
use crate::switch::{PortRequest, SwitchControlClient};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sdn_types::{metadata, Encapsulation, ObjectId, OpaqueRef, PoolId, PrivateNetworkId, Vni};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const PASSWORD_LEN: usize = 32;

/// Access to the pools and switch clients owned by the controller.
pub trait OverlayContext: Send + Sync {
    fn pool_api(&self, pool: &PoolId) -> Option<Arc<dyn InfraApi>>;
    fn switch_client(&self, host: &ObjectId) -> Option<Arc<SwitchControlClient>>;
}

/// A pool's local network participating in an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberNetwork {
    pub pool: PoolId,
    pub id: ObjectId,
    pub opaque_ref: OpaqueRef,
    pub name_label: String,
}

/// The elected hub host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CenterHost {
    pub pool: PoolId,
    pub id: ObjectId,
    pub opaque_ref: OpaqueRef,
    pub name_label: String,
}

/// Host eligible to become star center.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub pool: PoolId,
    pub host: HostRecord,
}

impl Candidate {
    fn to_center(&self) -> CenterHost {
        CenterHost {
            pool: self.pool.clone(),
            id: self.host.id.clone(),
            opaque_ref: self.host.opaque_ref.clone(),
            name_label: self.host.name_label.clone(),
        }
    }
}

/// Picks the star center among eligible candidates.
///
/// Priority: the preferred center, then the previous center, then the first
/// candidate in pool order.
pub fn choose_center<'a>(
    candidates: &'a [Candidate],
    preferred: Option<&ObjectId>,
    previous: Option<&ObjectId>,
) -> Option<&'a Candidate> {
    let find = |id: Option<&ObjectId>| id.and_then(|id| candidates.iter().find(|c| &c.host.id == id));
    find(preferred)
        .or_else(|| find(previous))
        .or_else(|| candidates.first())
}

/// Returns true if `host` can act as center for `network`.
pub fn is_eligible(snapshot: &PoolSnapshot, network: &OpaqueRef, host: &HostRecord) -> bool {
    host.enabled
        && snapshot.is_live(host)
        && snapshot
            .host_pif_on(host, network)
            .is_some_and(|pif| pif.currently_attached)
}

fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Result of removing a member network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedMember {
    pub member: MemberNetwork,
    /// The center belonged to the removed pool and has been cleared.
    pub center_lost: bool,
}

/// One overlay network instance.
#[derive(Debug, Clone)]
pub struct PrivateNetwork {
    uuid: PrivateNetworkId,
    networks: Vec<MemberNetwork>,
    center: Option<CenterHost>,
    preferred_center: Option<ObjectId>,
}

impl PrivateNetwork {
    pub fn new(uuid: PrivateNetworkId, preferred_center: Option<ObjectId>) -> Self {
        Self {
            uuid,
            networks: Vec::new(),
            center: None,
            preferred_center,
        }
    }

    pub fn uuid(&self) -> &PrivateNetworkId {
        &self.uuid
    }

    /// Member networks in pool iteration order.
    pub fn networks(&self) -> &[MemberNetwork] {
        &self.networks
    }

    pub fn center(&self) -> Option<&CenterHost> {
        self.center.as_ref()
    }

    pub fn preferred_center(&self) -> Option<&ObjectId> {
        self.preferred_center.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn pools(&self) -> impl Iterator<Item = &PoolId> {
        self.networks.iter().map(|n| &n.pool)
    }

    pub fn network_for(&self, pool: &PoolId) -> Option<&MemberNetwork> {
        self.networks.iter().find(|n| &n.pool == pool)
    }

    /// Registers a pool's network. Does not elect a center.
    pub fn add_network(&mut self, member: MemberNetwork) {
        match self.networks.iter_mut().find(|n| n.pool == member.pool) {
            Some(existing) => *existing = member,
            None => self.networks.push(member),
        }
    }

    /// Drops the member of `pool`. Clears the center if it lived there.
    pub fn remove_pool(&mut self, pool: &PoolId) -> Option<RemovedMember> {
        let index = self.networks.iter().position(|n| &n.pool == pool)?;
        Some(self.remove_at(index))
    }

    /// Drops the member network with the given identity.
    pub fn remove_network(&mut self, id: &ObjectId) -> Option<RemovedMember> {
        let index = self.networks.iter().position(|n| &n.id == id)?;
        Some(self.remove_at(index))
    }

    fn remove_at(&mut self, index: usize) -> RemovedMember {
        let member = self.networks.remove(index);
        let center_lost = self
            .center
            .as_ref()
            .is_some_and(|c| c.pool == member.pool);
        if center_lost {
            self.center = None;
        }
        RemovedMember {
            member,
            center_lost,
        }
    }

    /// Makes `host` the center without re-running election.
    ///
    /// Used when a centerless overlay sees its first interface come up.
    pub fn set_center(&mut self, pool: &PoolId, host: &HostRecord) {
        if self.network_for(pool).is_none() {
            warn!(
                private_network = %self.uuid,
                host = %host.name_label,
                pool = %pool,
                "Refusing center outside the overlay's pools"
            );
            return;
        }
        self.center = Some(CenterHost {
            pool: pool.clone(),
            id: host.id.clone(),
            opaque_ref: host.opaque_ref.clone(),
            name_label: host.name_label.clone(),
        });
    }

    /// Every eligible host across member pools, in pool order.
    pub fn candidates(&self, ctx: &dyn OverlayContext) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for member in &self.networks {
            let Some(api) = ctx.pool_api(&member.pool) else {
                continue;
            };
            let snapshot = api.snapshot();
            candidates.extend(
                snapshot
                    .hosts()
                    .into_iter()
                    .filter(|host| is_eligible(&snapshot, &member.opaque_ref, host))
                    .map(|host| Candidate {
                        pool: member.pool.clone(),
                        host: host.clone(),
                    }),
            );
        }
        candidates
    }

    /// Provisions the spoke/center port pair for `host`.
    ///
    /// Returns the bridge name on the spoke side, or `None` if `host` is the
    /// center, there is no center, or provisioning failed.
    pub async fn add_host(
        &self,
        ctx: &dyn OverlayContext,
        pool: &PoolId,
        host: &HostRecord,
    ) -> Option<String> {
        let center = self.center.as_ref()?;
        if center.id == host.id {
            return None;
        }

        let member = self.network_for(pool)?;
        let center_member = self.network_for(&center.pool)?;

        let snapshot = ctx.pool_api(pool)?.snapshot();
        let network = snapshot.network(&member.opaque_ref)?;

        let encapsulation = match network.meta(metadata::ENCAPSULATION) {
            Some(value) => value.parse().unwrap_or_else(|e| {
                warn!(private_network = %self.uuid, error = %e, "Falling back to GRE");
                Encapsulation::Gre
            }),
            None => Encapsulation::Gre,
        };
        let vni = network
            .meta(metadata::VNI)
            .and_then(|v| v.parse::<Vni>().ok())
            .unwrap_or(Vni::new(0));
        let password = (network.meta(metadata::ENCRYPTED) == Some("true")).then(random_password);

        let (Some(host_client), Some(center_client)) =
            (ctx.switch_client(&host.id), ctx.switch_client(&center.id))
        else {
            warn!(
                private_network = %self.uuid,
                host = %host.name_label,
                center = %center.name_label,
                "Missing switch client, cannot add host"
            );
            return None;
        };

        let spoke = PortRequest {
            private_network: self.uuid.clone(),
            network: member.id.clone(),
            network_name: member.name_label.clone(),
            remote_address: center_client.host().address.clone(),
            encapsulation,
            vni,
            password: password.clone(),
        };
        let hub = PortRequest {
            private_network: self.uuid.clone(),
            network: center_member.id.clone(),
            network_name: center_member.name_label.clone(),
            remote_address: host_client.host().address.clone(),
            encapsulation,
            vni,
            password,
        };

        match tokio::try_join!(
            host_client.add_interface_and_port(&spoke),
            center_client.add_interface_and_port(&hub),
        ) {
            Ok((bridge, _)) => Some(bridge),
            Err(e) => {
                error!(
                    private_network = %self.uuid,
                    host = %host.name_label,
                    center = %center.name_label,
                    pool = %pool,
                    error = %e,
                    "Error while adding host to private network"
                );
                None
            }
        }
    }

    /// Attaches `host` into the star and updates both tunnel statuses.
    pub async fn attach_host(
        &self,
        ctx: &dyn OverlayContext,
        pool: &PoolId,
        host: &HostRecord,
    ) -> Option<String> {
        let center = self.center.as_ref()?;
        if center.id == host.id {
            return None;
        }
        let api = ctx.pool_api(pool)?;
        let member = self.network_for(pool)?;

        let snapshot = api.snapshot();
        // Event records can predate the tunnel interface.
        let host = snapshot.host(&host.opaque_ref).unwrap_or(host);
        let Some(tunnel) = snapshot.tunnel_for(host, &member.opaque_ref) else {
            info!(
                private_network = %self.uuid,
                network = %member.name_label,
                host = %host.name_label,
                pool = %pool,
                "Unable to add host to network: no tunnel available"
            );
            return None;
        };
        let tunnel = tunnel.opaque_ref.clone();

        let center_tunnel = self.center_tunnel(ctx);

        set_status(api.as_ref(), &tunnel, TunnelStatus::inactive()).await;

        let bridge = self.add_host(ctx, pool, host).await?;
        let active = TunnelStatus::active(bridge.clone());
        match center_tunnel {
            Some((center_api, center_tunnel)) => {
                tokio::join!(
                    set_status(api.as_ref(), &tunnel, active.clone()),
                    set_status(center_api.as_ref(), &center_tunnel, active),
                );
            }
            None => set_status(api.as_ref(), &tunnel, active).await,
        }

        debug!(
            private_network = %self.uuid,
            host = %host.name_label,
            bridge = %bridge,
            "Host attached to star"
        );
        Some(bridge)
    }

    fn center_tunnel(&self, ctx: &dyn OverlayContext) -> Option<(Arc<dyn InfraApi>, OpaqueRef)> {
        let center = self.center.as_ref()?;
        let member = self.network_for(&center.pool)?;
        let api = ctx.pool_api(&center.pool)?;
        let snapshot = api.snapshot();
        let host = snapshot.host(&center.opaque_ref)?;
        let tunnel = snapshot.tunnel_for(host, &member.opaque_ref)?.opaque_ref.clone();
        Some((api, tunnel))
    }

    /// Tears the overlay's ports down on every member host.
    pub async fn reset(&self, ctx: &dyn OverlayContext) {
        for member in &self.networks {
            let Some(api) = ctx.pool_api(&member.pool) else {
                continue;
            };
            let snapshot = api.snapshot();
            for host in snapshot.hosts() {
                let Some(tunnel) = snapshot.tunnel_for(host, &member.opaque_ref) else {
                    continue;
                };
                if let Some(client) = ctx.switch_client(&host.id) {
                    if let Err(e) = client.reset_for_network(&member.id, &self.uuid).await {
                        error!(
                            private_network = %self.uuid,
                            host = %host.name_label,
                            pool = %member.pool,
                            error = %e,
                            "Error while resetting host bridge"
                        );
                    }
                }
                set_status(api.as_ref(), &tunnel.opaque_ref, TunnelStatus::inactive()).await;
            }
        }
    }

    /// Runs star-center election and returns the candidates it considered.
    ///
    /// Only `center` changes; no host is touched. Follow with
    /// [`rebuild_star`](Self::rebuild_star). Leaves the center unset if no
    /// host is eligible.
    pub fn elect_new_center(&mut self, ctx: &dyn OverlayContext) -> Vec<Candidate> {
        let candidates = self.candidates(ctx);
        let chosen = choose_center(
            &candidates,
            self.preferred_center.as_ref(),
            self.center.as_ref().map(|c| &c.id),
        )
        .map(Candidate::to_center);

        match &chosen {
            Some(center) => info!(
                private_network = %self.uuid,
                center = %center.name_label,
                pool = %center.pool,
                "New star-center elected"
            ),
            None => info!(private_network = %self.uuid, "No available host to elect new star-center"),
        }
        self.center = chosen;
        candidates
    }

    /// Resets the overlay's ports and attaches every candidate to the
    /// current center.
    pub async fn rebuild_star(&self, ctx: &dyn OverlayContext, candidates: &[Candidate]) {
        self.reset(ctx).await;
        if self.center.is_none() {
            return;
        }
        for candidate in candidates {
            self.attach_host(ctx, &candidate.pool, &candidate.host).await;
        }
    }
}

async fn set_status(api: &dyn InfraApi, tunnel: &OpaqueRef, status: TunnelStatus) {
    let active = status.active;
    if let Err(e) = api.set_tunnel_status(tunnel, status).await {
        error!(
            tunnel = %tunnel,
            pool = %api.pool().name_label,
            active,
            error = %e,
            "Error while setting tunnel status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(pool: &str, host: &str) -> Candidate {
        Candidate {
            pool: PoolId::new(pool),
            host: HostRecord {
                id: ObjectId::new(host),
                opaque_ref: OpaqueRef::new(format!("OpaqueRef:{host}")),
                name_label: host.to_string(),
                address: "10.0.0.1".to_string(),
                enabled: true,
                pifs: Vec::new(),
                metrics: OpaqueRef::new(OpaqueRef::NULL),
            },
        }
    }

    fn member(pool: &str, id: &str) -> MemberNetwork {
        MemberNetwork {
            pool: PoolId::new(pool),
            id: ObjectId::new(id),
            opaque_ref: OpaqueRef::new(format!("OpaqueRef:{id}")),
            name_label: id.to_string(),
        }
    }

    #[test]
    fn test_choose_center_priority() {
        let candidates = vec![candidate("a", "a1"), candidate("b", "b1"), candidate("b", "b2")];
        let a1 = ObjectId::new("a1");
        let b2 = ObjectId::new("b2");
        let gone = ObjectId::new("gone");

        assert_eq!(choose_center(&candidates, Some(&b2), Some(&a1)).unwrap().host.id, b2);
        assert_eq!(choose_center(&candidates, Some(&gone), Some(&b2)).unwrap().host.id, b2);
        assert_eq!(choose_center(&candidates, None, Some(&gone)).unwrap().host.id, a1);
        assert!(choose_center(&[], Some(&a1), Some(&a1)).is_none());
    }

    #[test]
    fn test_choose_center_is_stable() {
        let candidates = vec![candidate("a", "a1"), candidate("b", "b1")];
        let first = choose_center(&candidates, None, None).unwrap().host.id.clone();
        let second = choose_center(&candidates, None, Some(&first)).unwrap().host.id.clone();
        assert_eq!(first, second);
    }

    #[test]
    fn test_add_network_replaces_pool_entry() {
        let mut pn = PrivateNetwork::new(PrivateNetworkId::new("pn"), None);
        pn.add_network(member("a", "net-a"));
        pn.add_network(member("b", "net-b"));
        pn.add_network(member("a", "net-a2"));

        let ids: Vec<_> = pn.networks().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["net-a2", "net-b"]);
    }

    #[test]
    fn test_remove_pool_clears_center() {
        let mut pn = PrivateNetwork::new(PrivateNetworkId::new("pn"), None);
        pn.add_network(member("a", "net-a"));
        pn.add_network(member("b", "net-b"));
        pn.set_center(&PoolId::new("a"), &candidate("a", "a1").host);

        let removed = pn.remove_pool(&PoolId::new("b")).unwrap();
        assert!(!removed.center_lost);
        assert!(pn.center().is_some());

        let removed = pn.remove_network(&ObjectId::new("net-a")).unwrap();
        assert!(removed.center_lost);
        assert!(pn.center().is_none());
        assert!(pn.is_empty());
        assert!(pn.remove_pool(&PoolId::new("a")).is_none());
    }

    #[test]
    fn test_set_center_outside_pools_is_ignored() {
        let mut pn = PrivateNetwork::new(PrivateNetworkId::new("pn"), None);
        pn.add_network(member("a", "net-a"));
        pn.set_center(&PoolId::new("z"), &candidate("z", "z1").host);
        assert!(pn.center().is_none());
    }

    #[test]
    fn test_random_password() {
        let password = random_password();
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
