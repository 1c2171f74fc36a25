/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::cidr;

/// One tracked prefix: either a tenant root or a child carved out of
/// another tracked prefix.
///
/// A prefix is in exactly one of two modes. Either it is split into child
/// prefixes (`child_prefix_length` set, `available_child_prefixes`
/// populated) or individual addresses are allocated from it (`ips` grows
/// beyond the reserved pair). The two modes are mutually exclusive.
///
/// The persisted form is the serde serialization of this struct; it must
/// round-trip every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    /// Canonical CIDR, the identity of this prefix within its tenant.
    pub cidr: IpNet,

    /// Back-reference to the parent this prefix was carved from. Used for
    /// navigation only, never followed transactionally. `None` for roots.
    pub parent_cidr: Option<IpNet>,

    /// Length of the children this prefix is carved into. Set by the first
    /// child acquisition and fixed for the lifetime of the prefix.
    pub child_prefix_length: Option<u8>,

    /// The full tiling of this prefix at `child_prefix_length`, mapped to
    /// whether each child is still free.
    pub available_child_prefixes: BTreeMap<IpNet, bool>,

    /// Allocated addresses. The network and broadcast addresses are
    /// reserved at creation and are never handed out or released.
    pub ips: BTreeSet<IpAddr>,

    /// Monotonic counter fencing every update of this record.
    pub version: i64,
}

impl Prefix {
    /// A fresh root prefix covering `cidr`, with the network and broadcast
    /// addresses pre-reserved. A `/32` or `/128` collapses both into a
    /// single entry.
    pub fn new(cidr: IpNet) -> Self {
        let mut ips = BTreeSet::new();
        ips.insert(cidr.network());
        ips.insert(cidr.broadcast());
        Self {
            cidr,
            parent_cidr: None,
            child_prefix_length: None,
            available_child_prefixes: BTreeMap::new(),
            ips,
            version: 0,
        }
    }

    /// True once this prefix has been carved into child prefixes.
    pub fn is_parent(&self) -> bool {
        self.child_prefix_length.is_some()
    }

    /// True while any address beyond the reserved network and broadcast
    /// pair is allocated.
    pub fn has_allocated_ips(&self) -> bool {
        self.ips.len() > 2
    }

    /// Point-in-time utilization, computed locally.
    pub fn usage(&self) -> Usage {
        Usage {
            available_ips: cidr::address_count(&self.cidr),
            acquired_ips: self.ips.len() as u64,
            available_prefixes: self.available_child_prefixes.len() as u64,
            acquired_prefixes: self
                .available_child_prefixes
                .values()
                .filter(|free| !**free)
                .count() as u64,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cidr, f)
    }
}

/// Derived utilization numbers for one prefix. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Every address the prefix covers, reserved ones included.
    pub available_ips: u128,
    /// Currently allocated addresses, reserved ones included.
    pub acquired_ips: u64,
    /// Size of the child pool (zero until the first child acquisition).
    pub available_prefixes: u64,
    /// Child pool entries currently handed out.
    pub acquired_prefixes: u64,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.available_prefixes == 0 {
            write!(f, "ip:{}/{}", self.acquired_ips, self.available_ips)
        } else {
            write!(
                f,
                "ip:{}/{} prefixes:{}/{}",
                self.acquired_ips,
                self.available_ips,
                self.acquired_prefixes,
                self.available_prefixes
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_reserves_network_and_broadcast() {
        let prefix = Prefix::new("10.0.0.0/24".parse().unwrap());
        assert_eq!(prefix.ips.len(), 2);
        assert!(prefix.ips.contains(&"10.0.0.0".parse::<IpAddr>().unwrap()));
        assert!(prefix.ips.contains(&"10.0.0.255".parse::<IpAddr>().unwrap()));
        assert_eq!(prefix.version, 0);
        assert!(!prefix.is_parent());
        assert!(!prefix.has_allocated_ips());
    }

    #[test]
    fn test_host_prefix_reserves_single_address() {
        let prefix = Prefix::new("10.0.0.1/32".parse().unwrap());
        assert_eq!(prefix.ips.len(), 1);

        let usage = prefix.usage();
        assert_eq!(usage.available_ips, 1);
        assert_eq!(usage.acquired_ips, 1);
    }

    #[test]
    fn test_usage_counts_pool_entries() {
        let mut prefix = Prefix::new("192.168.0.0/22".parse().unwrap());
        prefix.child_prefix_length = Some(24);
        prefix
            .available_child_prefixes
            .insert("192.168.0.0/24".parse().unwrap(), false);
        prefix
            .available_child_prefixes
            .insert("192.168.1.0/24".parse().unwrap(), true);
        prefix
            .available_child_prefixes
            .insert("192.168.2.0/24".parse().unwrap(), true);
        prefix
            .available_child_prefixes
            .insert("192.168.3.0/24".parse().unwrap(), false);

        let usage = prefix.usage();
        assert_eq!(usage.available_prefixes, 4);
        assert_eq!(usage.acquired_prefixes, 2);
        assert_eq!(usage.to_string(), "ip:2/1024 prefixes:2/4");
    }

    #[test]
    fn test_serde_round_trip() {
        let mut prefix = Prefix::new("192.168.0.0/22".parse().unwrap());
        prefix.parent_cidr = Some("192.168.0.0/16".parse().unwrap());
        prefix.child_prefix_length = Some(24);
        prefix
            .available_child_prefixes
            .insert("192.168.0.0/24".parse().unwrap(), false);
        prefix
            .available_child_prefixes
            .insert("192.168.1.0/24".parse().unwrap(), true);
        prefix.ips.insert("192.168.0.1".parse().unwrap());
        prefix.version = 7;

        let payload = serde_json::to_value(&prefix).expect("Couldn't serialize prefix");
        let restored: Prefix = serde_json::from_value(payload).expect("Couldn't deserialize prefix");
        assert_eq!(prefix, restored);
    }
}
