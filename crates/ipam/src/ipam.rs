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
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cidr;
use crate::errors::{IpamError, Result};
use crate::prefix::Prefix;
use crate::retry;
use crate::storage::PrefixStorage;

/// Upper bound on `child_length - parent_length` when a parent is first
/// carved. The pool materializes one entry per child, so wider spans (a
/// /48 carved into /128s, say) are rejected instead of enumerated.
const MAX_CHILD_POOL_BITS: u8 = 20;

/// An address handed out by an acquire operation, together with the prefix
/// it was taken from. Transient: the prefix's ip set is the persistent
/// record of the allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAllocation {
    pub ip: IpAddr,
    pub prefix: IpNet,
}

/// Tenant-scoped allocator over a [`PrefixStorage`].
///
/// The allocator itself is stateless; all shared state lives in the store.
/// Every mutating operation is one or more version-fenced record updates,
/// and each public method wraps a single read-mutate-persist attempt in a
/// conflict retry loop. Operations touching two records (child
/// acquisition and release) are sequences of per-record atomic steps, not
/// one global transaction.
#[derive(Clone)]
pub struct Ipam {
    storage: Arc<dyn PrefixStorage>,
}

impl Ipam {
    pub fn new(storage: Arc<dyn PrefixStorage>) -> Self {
        Self { storage }
    }

    /// Start tracking `cidr` as a root prefix for the tenant. Creating an
    /// already-tracked cidr returns the stored record unchanged. Overlap
    /// against existing roots is not checked here; callers wanting
    /// disjoint roots run [`prefixes_overlapping`] first.
    pub async fn new_prefix(&self, cidr: &str, tenant: &str) -> Result<Prefix> {
        retry::retry_on_conflict(|| self.new_prefix_internal(cidr, tenant)).await
    }

    async fn new_prefix_internal(&self, cidr: &str, tenant: &str) -> Result<Prefix> {
        let net = cidr::parse_cidr(cidr)?;
        let created = self.storage.create_prefix(Prefix::new(net), tenant).await?;
        debug!("tracking prefix {net} for tenant {tenant}");
        Ok(created)
    }

    /// Stop tracking a prefix. Fails while any address beyond the reserved
    /// pair is still allocated. Children are not cascaded into: release
    /// them through [`release_child_prefix`](Self::release_child_prefix)
    /// first.
    pub async fn delete_prefix(&self, cidr: &str, tenant: &str) -> Result<Prefix> {
        retry::retry_on_conflict(|| self.delete_prefix_internal(cidr, tenant)).await
    }

    async fn delete_prefix_internal(&self, cidr: &str, tenant: &str) -> Result<Prefix> {
        let net = cidr::parse_cidr(cidr)?;
        let prefix = self.storage.read_prefix(&net, tenant).await?;
        if prefix.has_allocated_ips() {
            return Err(IpamError::Validation(format!(
                "prefix {net} has allocated ips, delete not possible"
            )));
        }
        self.storage.delete_prefix(prefix, tenant).await
    }

    /// Fetch one tracked prefix.
    pub async fn prefix_from(&self, cidr: &str, tenant: &str) -> Result<Prefix> {
        let net = cidr::parse_cidr(cidr)?;
        self.storage.read_prefix(&net, tenant).await
    }

    /// Every prefix tracked for the tenant.
    pub async fn read_all_prefixes(&self, tenant: &str) -> Result<Vec<Prefix>> {
        self.storage.read_all_prefixes(tenant).await
    }

    /// Carve a child of `length` bits out of `parent_cidr` and start
    /// tracking it as its own prefix.
    ///
    /// The first acquisition fixes the child length and materializes the
    /// full tiling of the parent as a free pool; later acquisitions must
    /// ask for the same length. The lowest free child wins. Parents with
    /// allocated addresses cannot be carved.
    pub async fn acquire_child_prefix(
        &self,
        parent_cidr: &str,
        length: u8,
        tenant: &str,
    ) -> Result<Prefix> {
        retry::retry_on_conflict(|| self.acquire_child_prefix_internal(parent_cidr, length, tenant))
            .await
    }

    async fn acquire_child_prefix_internal(
        &self,
        parent_cidr: &str,
        length: u8,
        tenant: &str,
    ) -> Result<Prefix> {
        let parent_net = cidr::parse_cidr(parent_cidr)?;
        let mut parent = self.storage.read_prefix(&parent_net, tenant).await?;

        if parent.has_allocated_ips() {
            return Err(IpamError::Validation(format!(
                "prefix {parent_net} has allocated ips, acquire child prefix not possible"
            )));
        }
        if length <= parent_net.prefix_len() {
            return Err(IpamError::Validation(format!(
                "child prefix length {length} must be greater than parent prefix length {}",
                parent_net.prefix_len()
            )));
        }

        match parent.child_prefix_length {
            None => {
                if length - parent_net.prefix_len() > MAX_CHILD_POOL_BITS {
                    return Err(IpamError::Validation(format!(
                        "carving {parent_net} into /{length} children exceeds the supported pool size"
                    )));
                }
                let children = parent_net.subnets(length).map_err(|_| {
                    IpamError::Validation(format!(
                        "invalid child prefix length {length} for {parent_net}"
                    ))
                })?;
                parent.available_child_prefixes = children.map(|child| (child, true)).collect();
                parent.child_prefix_length = Some(length);
            }
            Some(existing) if existing != length => {
                return Err(IpamError::Validation(format!(
                    "given length {length} is not equal to existing child prefix length {existing}"
                )));
            }
            Some(_) => {}
        }

        let child_net = parent
            .available_child_prefixes
            .iter()
            .find_map(|(child, free)| free.then_some(*child))
            .ok_or(IpamError::NoChildPrefixAvailable(parent_net))?;

        parent.available_child_prefixes.insert(child_net, false);
        let parent = self.storage.update_prefix(parent, tenant).await?;

        // The parent update above is committed; a failure from here on
        // leaves the pool entry marked used and surfaces the error as-is.
        let mut child = Prefix::new(child_net);
        child.parent_cidr = Some(parent.cidr);
        let child = self.storage.create_prefix(child, tenant).await?;
        debug!(
            "acquired child prefix {} of {} for tenant {tenant}",
            child.cidr, parent.cidr
        );
        Ok(child)
    }

    /// Return a child prefix to its parent's pool and stop tracking it.
    /// The child must not hold allocated addresses.
    pub async fn release_child_prefix(&self, child: &Prefix, tenant: &str) -> Result<()> {
        retry::retry_on_conflict(|| self.release_child_prefix_internal(child, tenant)).await
    }

    async fn release_child_prefix_internal(&self, child: &Prefix, tenant: &str) -> Result<()> {
        let parent_net = child
            .parent_cidr
            .ok_or_else(|| IpamError::NotFound(format!("prefix {} is no child prefix", child.cidr)))?;

        let mut parent = match self.storage.read_prefix(&parent_net, tenant).await {
            Ok(parent) => parent,
            Err(IpamError::NotFound(_)) => {
                return Err(IpamError::NotFound(format!(
                    "prefix {} is no child prefix",
                    child.cidr
                )));
            }
            Err(err) => return Err(err),
        };

        if child.has_allocated_ips() {
            return Err(IpamError::Validation(format!(
                "prefix {} has allocated ips, release not possible",
                child.cidr
            )));
        }

        parent.available_child_prefixes.insert(child.cidr, true);
        self.delete_prefix(&child.cidr.to_string(), tenant).await?;
        self.storage.update_prefix(parent, tenant).await?;
        debug!(
            "released child prefix {} of {parent_net} for tenant {tenant}",
            child.cidr
        );
        Ok(())
    }

    /// Allocate the lowest free address of a leaf prefix.
    pub async fn acquire_ip(&self, prefix_cidr: &str, tenant: &str) -> Result<IpAllocation> {
        retry::retry_on_conflict(|| self.acquire_ip_internal(prefix_cidr, None, tenant)).await
    }

    /// Allocate one specific address of a leaf prefix.
    pub async fn acquire_specific_ip(
        &self,
        prefix_cidr: &str,
        ip: &str,
        tenant: &str,
    ) -> Result<IpAllocation> {
        let specific = cidr::parse_ip(ip)?;
        retry::retry_on_conflict(|| self.acquire_ip_internal(prefix_cidr, Some(specific), tenant))
            .await
    }

    async fn acquire_ip_internal(
        &self,
        prefix_cidr: &str,
        specific: Option<IpAddr>,
        tenant: &str,
    ) -> Result<IpAllocation> {
        let net = cidr::parse_cidr(prefix_cidr)?;
        let mut prefix = self.storage.read_prefix(&net, tenant).await?;

        if prefix.is_parent() {
            return Err(IpamError::Validation(format!(
                "prefix {net} has child prefixes, acquire ip not possible"
            )));
        }
        if let Some(ip) = specific
            && !net.contains(&ip)
        {
            return Err(IpamError::Validation(format!("ip {ip} is not in prefix {net}")));
        }

        // Walk the whole block starting at the network address. The
        // reserved network and broadcast entries are skipped like any
        // other allocated address.
        let mut candidate = Some(net.network());
        while let Some(ip) = candidate {
            if !net.contains(&ip) {
                break;
            }
            if prefix.ips.contains(&ip) {
                if specific == Some(ip) {
                    return Err(IpamError::AlreadyAllocated { prefix: net, ip });
                }
            } else if specific.is_none() || specific == Some(ip) {
                prefix.ips.insert(ip);
                self.storage.update_prefix(prefix, tenant).await?;
                debug!("acquired ip {ip} in prefix {net} for tenant {tenant}");
                return Ok(IpAllocation { ip, prefix: net });
            }
            candidate = cidr::increment(ip);
        }

        Err(IpamError::NoIpAvailable(net))
    }

    /// Release a previously acquired address.
    pub async fn release_ip(&self, allocation: &IpAllocation, tenant: &str) -> Result<Prefix> {
        retry::retry_on_conflict(|| {
            self.release_ip_internal(allocation.prefix, allocation.ip, tenant)
        })
        .await
    }

    /// Release an address from a prefix by value.
    pub async fn release_ip_from_prefix(
        &self,
        prefix_cidr: &str,
        ip: &str,
        tenant: &str,
    ) -> Result<Prefix> {
        let net = cidr::parse_cidr(prefix_cidr)?;
        let ip = cidr::parse_ip(ip)?;
        retry::retry_on_conflict(|| self.release_ip_internal(net, ip, tenant)).await
    }

    async fn release_ip_internal(&self, net: IpNet, ip: IpAddr, tenant: &str) -> Result<Prefix> {
        let mut prefix = self.storage.read_prefix(&net, tenant).await?;

        if ip == net.network() || ip == net.broadcast() {
            return Err(IpamError::Validation(format!(
                "ip {ip} is reserved in prefix {net} and cannot be released"
            )));
        }
        if !prefix.ips.remove(&ip) {
            return Err(IpamError::NotFound(format!(
                "ip {ip} is not allocated in prefix {net}"
            )));
        }
        let prefix = self.storage.update_prefix(prefix, tenant).await?;
        debug!("released ip {ip} in prefix {net} for tenant {tenant}");
        Ok(prefix)
    }
}

/// Check candidate prefixes against already-tracked ones. The first
/// conflicting pair is reported as a validation error; prefixes of
/// different address families never conflict.
pub fn prefixes_overlapping(existing: &[IpNet], new: &[IpNet]) -> Result<()> {
    for new_prefix in new {
        for existing_prefix in existing {
            if cidr::overlaps(existing_prefix, new_prefix) {
                return Err(IpamError::Validation(format!(
                    "{new_prefix} overlaps {existing_prefix}"
                )));
            }
        }
    }
    Ok(())
}
