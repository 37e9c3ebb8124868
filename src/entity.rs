//! Lookup targets, exclusion policy and grouping.

use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;

/// Entities sent per indicator query.
pub const MAX_ENTITIES_PER_LOOKUP: usize = 1;

/// Networks never looked up when private addresses are ignored.
const NON_ROUTABLE: &[&str] = &[
    "0.0.0.0/32",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "224.0.0.0/4",
    // Reserved, includes 255.255.255.255.
    "240.0.0.0/4",
    "::/128",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
];

/// Kind of indicator an entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "IPv4")]
    Ipv4,
    #[serde(rename = "IPv6")]
    Ipv6,
    #[serde(rename = "hash")]
    Hash,
    #[serde(rename = "domain")]
    Domain,
    #[serde(rename = "cidr")]
    Cidr,
}

/// A lookup target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub value: String,
    pub types: Vec<EntityType>,
    /// Set by the caller when it already knows the address is private.
    #[serde(default, rename = "isPrivateIP")]
    pub is_private_ip: bool,
}

impl Entity {
    pub fn new(value: impl Into<String>, types: Vec<EntityType>) -> Self {
        Self {
            value: value.into(),
            types,
            is_private_ip: false,
        }
    }

    /// Build an entity from a bare value, guessing its type.
    pub fn infer(value: &str) -> Self {
        let value = value.trim();

        if let Ok(ip) = value.parse::<IpAddr>() {
            let kind = if ip.is_ipv4() {
                EntityType::Ipv4
            } else {
                EntityType::Ipv6
            };
            let mut entity = Entity::new(value, vec![kind]);
            entity.is_private_ip = is_non_routable(&ip);
            return entity;
        }

        if value.parse::<IpNet>().is_ok() {
            return Entity::new(value, vec![EntityType::Cidr]);
        }

        let is_hash = matches!(value.len(), 32 | 40 | 64 | 128)
            && value.chars().all(|c| c.is_ascii_hexdigit());
        if is_hash {
            return Entity::new(value, vec![EntityType::Hash]);
        }

        Entity::new(value, vec![EntityType::Domain])
    }

    pub fn is_type(&self, kind: EntityType) -> bool {
        self.types.contains(&kind)
    }

    pub fn is_ip(&self) -> bool {
        self.is_type(EntityType::Ipv4) || self.is_type(EntityType::Ipv6)
    }

    /// Case-insensitive key used to map results back to entities.
    pub fn lookup_key(&self) -> String {
        self.value.to_lowercase()
    }
}

fn non_routable_networks() -> impl Iterator<Item = IpNet> {
    NON_ROUTABLE.iter().filter_map(|net| net.parse().ok())
}

/// Whether an address is private, loopback, link-local, multicast or
/// otherwise reserved. IPv4-mapped IPv6 addresses are judged as IPv4.
pub fn is_non_routable(ip: &IpAddr) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(*ip),
        IpAddr::V4(_) => *ip,
    };
    non_routable_networks().any(|net| net.contains(&ip))
}

/// Why an entity was not looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Private,
    Malformed,
    IgnoredPattern,
}

/// Decides which entities are sent to the server.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    ignore_private_ips: bool,
    ignore_patterns: Vec<Regex>,
}

impl EntityFilter {
    pub fn new(ignore_private_ips: bool, ignore_patterns: Vec<Regex>) -> Self {
        Self {
            ignore_private_ips,
            ignore_patterns,
        }
    }

    /// Returns the reason an entity is excluded, if any.
    pub fn exclusion(&self, entity: &Entity) -> Option<SkipReason> {
        if entity.is_ip() {
            let Ok(ip) = entity.value.parse::<IpAddr>() else {
                return Some(SkipReason::Malformed);
            };
            let family_matches = (ip.is_ipv4() && entity.is_type(EntityType::Ipv4))
                || (ip.is_ipv6() && entity.is_type(EntityType::Ipv6));
            if !family_matches {
                return Some(SkipReason::Malformed);
            }
            if self.ignore_private_ips && (entity.is_private_ip || is_non_routable(&ip)) {
                return Some(SkipReason::Private);
            }
        } else if entity.is_type(EntityType::Cidr) {
            let Ok(net) = entity.value.parse::<IpNet>() else {
                return Some(SkipReason::Malformed);
            };
            if self.ignore_private_ips && (entity.is_private_ip || is_non_routable(&net.network()))
            {
                return Some(SkipReason::Private);
            }
        } else if self.ignore_private_ips && entity.is_private_ip {
            return Some(SkipReason::Private);
        }

        if self.ignore_patterns.iter().any(|re| re.is_match(&entity.value)) {
            return Some(SkipReason::IgnoredPattern);
        }

        None
    }
}

/// Entities to query, grouped into request-sized batches.
#[derive(Debug, Default)]
pub struct Partition {
    /// Each group holds lookup keys into `lookup`.
    pub groups: Vec<Vec<String>>,
    /// Lookup key to the first entity seen with that key.
    pub lookup: HashMap<String, Entity>,
    /// Every entity that passed the filter, in input order, duplicates included.
    pub accepted: Vec<Entity>,
}

impl Partition {
    /// Filter entities and split the survivors into groups of `batch_size`.
    ///
    /// Duplicate values (case-insensitive) are queried once but each one is
    /// still kept in `accepted`.
    pub fn build(entities: &[Entity], filter: &EntityFilter, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let mut partition = Partition::default();
        let mut group: Vec<String> = Vec::with_capacity(batch_size);

        for entity in entities {
            if let Some(reason) = filter.exclusion(entity) {
                debug!(entity = %entity.value, reason = ?reason, "Skipping entity");
                continue;
            }

            partition.accepted.push(entity.clone());

            let key = entity.lookup_key();
            if partition.lookup.contains_key(&key) {
                continue;
            }

            if group.len() >= batch_size {
                partition.groups.push(std::mem::take(&mut group));
            }

            group.push(key.clone());
            partition.lookup.insert(key, entity.clone());
        }

        if !group.is_empty() {
            partition.groups.push(group);
        }

        partition
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Entities of one group, in order.
    pub fn entities<'a>(&'a self, group: &'a [String]) -> impl Iterator<Item = &'a Entity> + 'a {
        group.iter().filter_map(move |key| self.lookup.get(key))
    }
}
