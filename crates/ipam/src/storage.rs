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
use async_trait::async_trait;
use ipnet::IpNet;

use crate::errors::Result;
use crate::prefix::Prefix;

/// Persistence contract the allocator runs against. Prefixes are keyed by
/// `(tenant, cidr)`; the tenant is an opaque namespace and no operation
/// crosses it.
///
/// Implementations must be reachable from concurrent callers and
/// processes. The only required consistency primitive is the per-record
/// version fence in [`update_prefix`](PrefixStorage::update_prefix): the
/// version comparison and the write must be one atomic store step.
#[async_trait]
pub trait PrefixStorage: Send + Sync {
    /// Persist a new prefix. Creating a cidr that already exists for the
    /// tenant is not an error; the stored record is returned unchanged.
    async fn create_prefix(&self, prefix: Prefix, tenant: &str) -> Result<Prefix>;

    /// Fetch one prefix. [`crate::IpamError::NotFound`] when absent.
    async fn read_prefix(&self, cidr: &IpNet, tenant: &str) -> Result<Prefix>;

    /// Every prefix of the tenant, in no particular order.
    async fn read_all_prefixes(&self, tenant: &str) -> Result<Vec<Prefix>>;

    /// Compare-and-swap update. The write succeeds only while the stored
    /// version still equals `prefix.version`, and the returned record
    /// carries the incremented version.
    /// [`crate::IpamError::OptimisticLock`] when no row matches.
    async fn update_prefix(&self, prefix: Prefix, tenant: &str) -> Result<Prefix>;

    /// Remove a prefix. Deleting an absent row is not an error.
    async fn delete_prefix(&self, prefix: Prefix, tenant: &str) -> Result<Prefix>;
}
