//! Replicated ticket registry.
//!
//! A [`TicketCluster`] is a set of named members, each holding a
//! [`MemoryTicketRegistry`]. Every ticket ID hashes to an owner member and
//! is copied to the next `backup_count` members around the ring:
//!
//! ```text
//!   members:  [cas-1]  [cas-2]  [cas-3]
//!                ▲        ▲
//!   "ST-7-…" ─ owner ── backup          (backup_count = 1)
//! ```
//!
//! Each CAS node talks to the cluster through its own
//! [`ReplicatedTicketRegistry`] handle. All handles see the same tickets.
//!
//! # Consistency
//!
//! - Writes go to every online replica; at least one must be online.
//! - Reads and single removals go to the first online replica (the owner
//!   unless it is down). Concurrent removals of one ID therefore race on a
//!   single map and exactly one wins.
//! - When every replica of an ID is offline the operation fails with
//!   [`RegistryError::Unavailable`]; it never reports the ticket as absent.
//! - A member coming back online first catches up from the replicas that
//!   stayed online: it takes their copies and drops tickets they no longer
//!   hold. Writes are held off while it catches up, and it serves no reads
//!   until it has.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    hash::{DefaultHasher, Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use cas_ticket::{Clock, ConfigError, Redacted, SharedClock, Ticket};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    error::{RegistryError, RegistryResult},
    memory::MemoryTicketRegistry,
    registry::TicketRegistry,
};

const DEFAULT_BACKUP_COUNT: usize = 1;

/// Configuration for a [`TicketCluster`].
///
/// # Validation
///
/// - `members` must be non-empty and free of duplicates
/// - `local_member` must be one of `members`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct ReplicatedRegistryConfig {
    /// Names of the cluster members, in ring order.
    pub members: Vec<String>,
    /// The member this node's registry handle is attached to.
    #[builder(into)]
    pub local_member: String,
    /// Copies kept in addition to the owner's.
    #[serde(default = "default_backup_count")]
    #[builder(default = DEFAULT_BACKUP_COUNT)]
    pub backup_count: usize,
}

fn default_backup_count() -> usize {
    DEFAULT_BACKUP_COUNT
}

impl ReplicatedRegistryConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::BelowMinimum {
                field: "members",
                value: "0".to_owned(),
                min: "1".to_owned(),
            });
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.members.iter().find(|m| !seen.insert(m.as_str())) {
            return Err(ConfigError::invalid("members", format!("duplicate member {dup}")));
        }
        if !self.members.contains(&self.local_member) {
            return Err(ConfigError::invalid(
                "local_member",
                format!("{} is not a cluster member", self.local_member),
            ));
        }
        Ok(())
    }
}

/// One member of a [`TicketCluster`].
pub struct ClusterMember {
    name: String,
    store: MemoryTicketRegistry,
    online: AtomicBool,
}

impl ClusterMember {
    /// Member name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the member is reachable.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Number of tickets held by this member, replicas included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether this member holds no tickets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn reachable(&self) -> RegistryResult<&MemoryTicketRegistry> {
        if self.is_online() {
            Ok(&self.store)
        } else {
            Err(RegistryError::unavailable(format!("cluster member {} is unreachable", self.name)))
        }
    }
}

impl fmt::Debug for ClusterMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterMember")
            .field("name", &self.name)
            .field("online", &self.is_online())
            .field("tickets", &self.len())
            .finish()
    }
}

/// A group of members sharing tickets by hash partitioning.
#[derive(Debug)]
pub struct TicketCluster {
    members: Vec<ClusterMember>,
    replicas: usize,
    clock: SharedClock,
    // Held shared by writes, exclusively by membership changes.
    membership: RwLock<()>,
}

impl TicketCluster {
    /// Creates a cluster with every member online.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    pub fn new(config: &ReplicatedRegistryConfig, clock: SharedClock) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let members = config
            .members
            .iter()
            .map(|name| ClusterMember {
                name: name.clone(),
                store: MemoryTicketRegistry::with_clock(Arc::clone(&clock)),
                online: AtomicBool::new(true),
            })
            .collect::<Vec<_>>();
        let replicas = (config.backup_count + 1).min(members.len());
        Ok(Arc::new(Self { members, replicas, clock, membership: RwLock::new(()) }))
    }

    /// Returns a registry handle attached to `member`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if no member has that name.
    pub fn registry(self: &Arc<Self>, member: &str) -> Result<ReplicatedTicketRegistry, ConfigError> {
        let local = self
            .index_of(member)
            .ok_or_else(|| ConfigError::invalid("local_member", format!("{member} is not a cluster member")))?;
        Ok(ReplicatedTicketRegistry { cluster: Arc::clone(self), local })
    }

    /// Looks a member up by name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Marks a member reachable or unreachable. Returns `false` if no member
    /// has that name.
    ///
    /// A member brought back online is resynchronised from the online
    /// replicas of its partition before it becomes visible.
    pub fn set_online(&self, name: &str, online: bool) -> bool {
        let Some(index) = self.index_of(name) else {
            return false;
        };
        let _membership = self.membership.write();
        let member = &self.members[index];
        if online && !member.is_online() {
            let (refreshed, dropped) = self.resync(index);
            tracing::info!(member = name, refreshed, dropped, "cluster member resynchronised");
        }
        member.online.store(online, Ordering::Release);
        tracing::info!(member = name, online, "cluster member availability changed");
        true
    }

    /// Brings the member at `index` up to date with its partition. For every
    /// ticket it replicates, the first other online replica is authoritative;
    /// with none online the member's own copy is kept. Returns the number of
    /// tickets copied in and dropped.
    fn resync(&self, index: usize) -> (usize, usize) {
        let target = &self.members[index];
        let mut ids: HashSet<String> = target.store.ids().into_iter().collect();
        for (other, member) in self.members.iter().enumerate() {
            if other == index || !member.is_online() {
                continue;
            }
            ids.extend(
                member
                    .store
                    .ids()
                    .into_iter()
                    .filter(|id| self.replicas_of(id).any(|m| std::ptr::eq(m, target))),
            );
        }

        let (mut refreshed, mut dropped) = (0, 0);
        for id in ids {
            let Some(source) =
                self.replicas_of(&id).find(|m| !std::ptr::eq(*m, target) && m.is_online())
            else {
                continue;
            };
            match source.store.get(&id) {
                Some(ticket) => {
                    target.store.insert(ticket);
                    refreshed += 1;
                },
                None => {
                    if target.store.take(&id) {
                        dropped += 1;
                    }
                },
            }
        }
        (refreshed, dropped)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    fn replicas_of(&self, id: &str) -> impl Iterator<Item = &ClusterMember> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let n = self.members.len();
        let owner = (hasher.finish() % n as u64) as usize;
        (0..self.replicas).map(move |offset| &self.members[(owner + offset) % n])
    }

    fn primary_for(&self, id: &str) -> RegistryResult<&MemoryTicketRegistry> {
        self.replicas_of(id).find(|m| m.is_online()).map(|m| &m.store).ok_or_else(|| {
            RegistryError::unavailable(format!("no reachable replica for ticket {}", Redacted(id)))
        })
    }
}

/// A node's handle onto a [`TicketCluster`].
#[derive(Clone)]
pub struct ReplicatedTicketRegistry {
    cluster: Arc<TicketCluster>,
    local: usize,
}

impl ReplicatedTicketRegistry {
    /// Name of the member this handle is attached to.
    #[must_use]
    pub fn local_member(&self) -> &str {
        &self.cluster.members[self.local].name
    }

    /// The cluster this handle belongs to.
    #[must_use]
    pub fn cluster(&self) -> &Arc<TicketCluster> {
        &self.cluster
    }
}

impl fmt::Debug for ReplicatedTicketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedTicketRegistry")
            .field("local_member", &self.local_member())
            .field("members", &self.cluster.members.len())
            .finish()
    }
}

#[async_trait]
impl TicketRegistry for ReplicatedTicketRegistry {
    fn name(&self) -> &'static str {
        "replicated"
    }

    fn clock(&self) -> &dyn Clock {
        self.cluster.clock.as_ref()
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(ticket.id()), member = self.local_member()))]
    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
        fail::fail_point!("replicated-registry-write", |_| {
            Err(RegistryError::unavailable("injected replication failure"))
        });
        let _membership = self.cluster.membership.read();
        let mut written = 0usize;
        for member in self.cluster.replicas_of(ticket.id()) {
            if let Ok(store) = member.reachable() {
                store.insert(ticket.clone());
                written += 1;
            } else {
                tracing::warn!(replica = member.name(), "skipping unreachable replica");
            }
        }
        if written == 0 {
            return Err(RegistryError::unavailable(format!(
                "no reachable replica for ticket {}",
                Redacted(ticket.id())
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id), member = self.local_member()))]
    async fn fetch_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        Ok(self.cluster.primary_for(id)?.get(id))
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id), member = self.local_member()))]
    async fn remove_ticket(&self, id: &str) -> RegistryResult<bool> {
        let _membership = self.cluster.membership.read();
        let removed = self.cluster.primary_for(id)?.take(id);
        for member in self.cluster.replicas_of(id) {
            if let Ok(store) = member.reachable() {
                store.take(id);
            }
        }
        Ok(removed)
    }

    #[tracing::instrument(skip(self), fields(member = self.local_member()))]
    async fn fetch_all(&self) -> RegistryResult<Vec<Ticket>> {
        let offline = self.cluster.members.iter().filter(|m| !m.is_online()).count();
        if offline >= self.cluster.replicas {
            return Err(RegistryError::unavailable(format!(
                "{offline} cluster members unreachable; some tickets have no reachable replica"
            )));
        }
        let mut all = HashMap::new();
        for member in self.cluster.members.iter().filter(|m| m.is_online()) {
            for ticket in member.store.snapshot() {
                // Prefer the primary copy when replicas disagree.
                if self.cluster.primary_for(ticket.id()).is_ok_and(|p| std::ptr::eq(p, &member.store)) {
                    all.insert(ticket.id().to_owned(), ticket);
                } else {
                    all.entry(ticket.id().to_owned()).or_insert(ticket);
                }
            }
        }
        Ok(all.into_values().collect())
    }

    #[tracing::instrument(skip(self), fields(member = self.local_member()))]
    async fn health_check(&self) -> RegistryResult<()> {
        self.cluster.members[self.local].reachable().map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use cas_ticket::{
        ExpirationPolicy, TicketGrantingTicket,
        testutil::{ManualClock, authentication, epoch},
    };

    use super::*;

    fn config(backup_count: usize) -> ReplicatedRegistryConfig {
        ReplicatedRegistryConfig::builder()
            .members(vec!["cas-1".to_owned(), "cas-2".to_owned(), "cas-3".to_owned()])
            .local_member("cas-1")
            .backup_count(backup_count)
            .build()
    }

    fn tgt(id: &str) -> Ticket {
        TicketGrantingTicket::new(id, authentication("alice"), ExpirationPolicy::NeverExpires, epoch())
            .into()
    }

    #[test]
    fn test_config_validation() {
        let mut bad = config(1);
        bad.local_member = "cas-9".to_owned();
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid { field: "local_member", .. })));

        let mut dup = config(1);
        dup.members.push("cas-1".to_owned());
        assert!(matches!(dup.validate(), Err(ConfigError::Invalid { field: "members", .. })));

        let empty = ReplicatedRegistryConfig::builder().members(vec![]).local_member("x").build();
        assert!(matches!(empty.validate(), Err(ConfigError::BelowMinimum { field: "members", .. })));
    }

    #[tokio::test]
    async fn test_members_share_tickets() {
        let cluster = TicketCluster::new(&config(1), Arc::new(ManualClock::at_epoch())).unwrap();
        let one = cluster.registry("cas-1").unwrap();
        let two = cluster.registry("cas-2").unwrap();

        one.add_ticket(tgt("TGT-1")).await.unwrap();
        assert!(two.get_ticket("TGT-1").await.unwrap().is_some());

        assert_eq!(two.delete_ticket("TGT-1").await.unwrap(), 1);
        assert!(one.get_ticket("TGT-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ticket_survives_owner_outage_with_backup() {
        let cluster = TicketCluster::new(&config(1), Arc::new(ManualClock::at_epoch())).unwrap();
        let registry = cluster.registry("cas-1").unwrap();
        registry.add_ticket(tgt("TGT-1")).await.unwrap();

        let owner = cluster.replicas_of("TGT-1").next().unwrap().name().to_owned();
        cluster.set_online(&owner, false);

        let survivor = cluster.members.iter().find(|m| m.is_online()).unwrap().name().to_owned();
        let handle = cluster.registry(&survivor).unwrap();
        assert!(handle.get_ticket("TGT-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_replicas_are_unavailable_not_absent() {
        let cluster = TicketCluster::new(&config(0), Arc::new(ManualClock::at_epoch())).unwrap();
        let registry = cluster.registry("cas-1").unwrap();
        registry.add_ticket(tgt("TGT-1")).await.unwrap();

        let owner = cluster.replicas_of("TGT-1").next().unwrap().name().to_owned();
        cluster.set_online(&owner, false);

        let err = registry.get_ticket("TGT-1").await.unwrap_err();
        assert!(err.is_transient());
        assert!(registry.fetch_all().await.is_err());
    }

    #[tokio::test]
    async fn test_removal_during_outage_survives_rejoin() {
        let cluster = TicketCluster::new(&config(1), Arc::new(ManualClock::at_epoch())).unwrap();
        for name in ["cas-1", "cas-2", "cas-3"] {
            let registry = cluster.registry(name).unwrap();
            let id = format!("ST-{name}");
            registry.add_ticket(tgt(&id)).await.unwrap();

            for member in cluster.replicas_of(&id).map(|m| m.name().to_owned()).collect::<Vec<_>>() {
                cluster.set_online(&member, false);
                assert!(registry.remove_ticket(&id).await.unwrap());
                cluster.set_online(&member, true);

                assert!(!registry.remove_ticket(&id).await.unwrap(), "{id} removed twice after {member} rejoined");
                assert!(registry.fetch_ticket(&id).await.unwrap().is_none());
                registry.add_ticket(tgt(&id)).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_rejoining_member_takes_updates_made_while_offline() {
        let cluster = TicketCluster::new(&config(1), Arc::new(ManualClock::at_epoch())).unwrap();
        let registry = cluster.registry("cas-1").unwrap();
        registry.add_ticket(tgt("TGT-1")).await.unwrap();
        let owner = cluster.replicas_of("TGT-1").next().unwrap().name().to_owned();

        cluster.set_online(&owner, false);
        let mut session = registry.fetch_ticket("TGT-1").await.unwrap().unwrap();
        session.as_ticket_granting_mut().unwrap().record_descendant("AT-1");
        registry.update_ticket(session).await.unwrap();
        registry.add_ticket(tgt("TGT-2")).await.unwrap();
        cluster.set_online(&owner, true);

        let stored = registry.fetch_ticket("TGT-1").await.unwrap().unwrap();
        assert!(stored.as_ticket_granting().unwrap().descendant_tickets().contains("AT-1"));
        assert!(registry.fetch_ticket("TGT-2").await.unwrap().is_some());
        for member in cluster.replicas_of("TGT-2") {
            assert!(member.store.get("TGT-2").is_some(), "{} missing TGT-2", member.name());
        }
    }

    #[tokio::test]
    async fn test_sole_replica_keeps_its_copy_on_rejoin() {
        let cluster = TicketCluster::new(&config(0), Arc::new(ManualClock::at_epoch())).unwrap();
        let registry = cluster.registry("cas-1").unwrap();
        registry.add_ticket(tgt("TGT-1")).await.unwrap();
        let owner = cluster.replicas_of("TGT-1").next().unwrap().name().to_owned();

        cluster.set_online(&owner, false);
        cluster.set_online(&owner, true);
        assert!(registry.fetch_ticket("TGT-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_health_check_tracks_local_member() {
        let cluster = TicketCluster::new(&config(1), Arc::new(ManualClock::at_epoch())).unwrap();
        let registry = cluster.registry("cas-2").unwrap();
        assert!(registry.health_check().await.is_ok());

        cluster.set_online("cas-2", false);
        assert!(registry.health_check().await.is_err());
        assert!(!cluster.set_online("cas-9", false));
    }
}
