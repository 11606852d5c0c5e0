use std::collections::HashMap;

use forgelink_types::{payload::DataType, MetricId};
use log::debug;

use crate::{events::MetricBirthDetails, Identity};

/// A metric identifier resolved against the alias cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetric {
    pub name: String,
    pub datatype: DataType,
}

struct AliasEntry {
    name: String,
    datatype: DataType,
}

struct IdentityAliases {
    aliases: HashMap<u64, AliasEntry>,
    names: HashMap<String, DataType>,
    last_activity: u64,
}

impl IdentityAliases {
    fn new(now: u64) -> Self {
        Self {
            aliases: HashMap::new(),
            names: HashMap::new(),
            last_activity: now,
        }
    }
}

/// Per-identity alias table populated from birth certificates.
///
/// An alias is only resolvable between its identity's birth and the
/// next death; resolving an unknown alias is an error the caller must
/// count, never a guess. Identities that go quiet are evicted after a
/// TTL to bound memory.
pub struct AliasCache {
    identities: HashMap<Identity, IdentityAliases>,
    ttl_ms: u64,
}

impl AliasCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            identities: HashMap::new(),
            ttl_ms,
        }
    }

    /// Install the alias table declared by a birth certificate,
    /// replacing whatever the previous lifecycle declared.
    pub fn install_from_birth(
        &mut self,
        identity: &Identity,
        details: &[(MetricBirthDetails, crate::events::MetricDetails)],
        now: u64,
    ) {
        let entry = self
            .identities
            .entry(identity.clone())
            .and_modify(|e| {
                e.aliases.clear();
                e.names.clear();
            })
            .or_insert_with(|| IdentityAliases::new(now));
        entry.last_activity = now;
        for (birth, _) in details {
            entry.names.insert(birth.name.clone(), birth.datatype);
            if let Some(alias) = birth.alias {
                entry.aliases.insert(
                    alias,
                    AliasEntry {
                        name: birth.name.clone(),
                        datatype: birth.datatype,
                    },
                );
            }
        }
    }

    /// Resolve a data-message metric id to its birth-declared name and
    /// datatype.
    ///
    /// Named metrics resolve through the name table when the identity
    /// declared them, and pass through with an unknown datatype
    /// otherwise; aliases resolve only while the identity is alive.
    pub fn resolve(
        &mut self,
        identity: &Identity,
        id: &MetricId,
        now: u64,
    ) -> Result<ResolvedMetric, u64> {
        let entry = self.identities.get_mut(identity);
        match id {
            MetricId::Alias(alias) => match entry {
                Some(identity_aliases) => match identity_aliases.aliases.get(alias) {
                    Some(found) => {
                        identity_aliases.last_activity = now;
                        Ok(ResolvedMetric {
                            name: found.name.clone(),
                            datatype: found.datatype,
                        })
                    }
                    None => Err(*alias),
                },
                None => Err(*alias),
            },
            MetricId::Name(name) => {
                let datatype = match entry {
                    Some(identity_aliases) => {
                        identity_aliases.last_activity = now;
                        identity_aliases
                            .names
                            .get(name)
                            .copied()
                            .unwrap_or(DataType::Unknown)
                    }
                    None => DataType::Unknown,
                };
                Ok(ResolvedMetric {
                    name: name.clone(),
                    datatype,
                })
            }
        }
    }

    /// Invalidate an identity wholesale on death.
    pub fn clear_identity(&mut self, identity: &Identity) {
        self.identities.remove(identity);
    }

    /// Invalidate a node and every device nested under it. A node
    /// death implies the death of its devices.
    pub fn clear_node(&mut self, node: &crate::NodeIdentifier) {
        self.identities.retain(|identity, _| identity.node != *node);
    }

    /// Evict identities with no activity inside the TTL. Returns the
    /// number of evicted identities.
    pub fn sweep(&mut self, now: u64) -> usize {
        let ttl = self.ttl_ms;
        let before = self.identities.len();
        self.identities
            .retain(|_, entry| now.saturating_sub(entry.last_activity) < ttl);
        let evicted = before - self.identities.len();
        if evicted > 0 {
            debug!("Alias cache evicted {evicted} inactive identities");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MetricDetails;
    use crate::NodeIdentifier;
    use forgelink_types::Quality;

    fn identity() -> Identity {
        Identity::node(NodeIdentifier {
            group: "plant1".into(),
            node: "gateway-a".into(),
        })
    }

    fn birth_details(name: &str, alias: u64) -> (MetricBirthDetails, MetricDetails) {
        (
            MetricBirthDetails {
                name: name.into(),
                alias: Some(alias),
                datatype: DataType::Double,
            },
            MetricDetails {
                value: None,
                timestamp: 0,
                quality: Quality::GOOD,
            },
        )
    }

    #[test]
    fn alias_resolvable_only_between_birth_and_death() {
        let mut cache = AliasCache::new(60_000);
        let id = identity();

        // before birth: unresolved
        assert_eq!(cache.resolve(&id, &MetricId::Alias(7), 0), Err(7));

        cache.install_from_birth(&id, &[birth_details("Line 1/Temp", 7)], 0);
        let resolved = cache.resolve(&id, &MetricId::Alias(7), 1).unwrap();
        assert_eq!(resolved.name, "Line 1/Temp");
        assert_eq!(resolved.datatype, DataType::Double);

        cache.clear_identity(&id);
        assert_eq!(cache.resolve(&id, &MetricId::Alias(7), 2), Err(7));
    }

    #[test]
    fn rebirth_replaces_alias_table() {
        let mut cache = AliasCache::new(60_000);
        let id = identity();
        cache.install_from_birth(&id, &[birth_details("a", 1)], 0);
        cache.install_from_birth(&id, &[birth_details("b", 2)], 1);
        assert_eq!(cache.resolve(&id, &MetricId::Alias(1), 2), Err(1));
        assert_eq!(
            cache.resolve(&id, &MetricId::Alias(2), 2).unwrap().name,
            "b"
        );
    }

    #[test]
    fn node_death_clears_nested_devices() {
        let mut cache = AliasCache::new(60_000);
        let node = NodeIdentifier {
            group: "plant1".into(),
            node: "gateway-a".into(),
        };
        let device_id = Identity::device(node.clone(), "press-03".into());
        cache.install_from_birth(&device_id, &[birth_details("x", 9)], 0);

        cache.clear_node(&node);
        assert_eq!(cache.resolve(&device_id, &MetricId::Alias(9), 1), Err(9));
    }

    #[test]
    fn ttl_sweep_evicts_inactive_identities() {
        let mut cache = AliasCache::new(1_000);
        let id = identity();
        cache.install_from_birth(&id, &[birth_details("a", 1)], 0);

        assert_eq!(cache.sweep(500), 0);
        // activity refreshes the clock
        _ = cache.resolve(&id, &MetricId::Alias(1), 900);
        assert_eq!(cache.sweep(1_500), 0);
        assert_eq!(cache.sweep(2_000), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn named_metrics_pass_through() {
        let mut cache = AliasCache::new(60_000);
        let id = identity();
        let resolved = cache
            .resolve(&id, &MetricId::Name("Line 1/Temp".into()), 0)
            .unwrap();
        assert_eq!(resolved.name, "Line 1/Temp");
        assert_eq!(resolved.datatype, DataType::Unknown);
    }
}
