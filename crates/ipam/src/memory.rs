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
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use ipnet::IpNet;

use crate::errors::{IpamError, Result};
use crate::prefix::Prefix;
use crate::storage::PrefixStorage;

type TenantMap = HashMap<String, HashMap<IpNet, Prefix>>;

/// Storage backend keeping every prefix in process memory, tenant by
/// tenant. The version fence behaves exactly like the database-backed
/// implementations, so conflict handling is testable without a database.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tenants: RwLock<TenantMap>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TenantMap> {
        self.tenants.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TenantMap> {
        self.tenants.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PrefixStorage for MemoryStorage {
    async fn create_prefix(&self, prefix: Prefix, tenant: &str) -> Result<Prefix> {
        let mut tenants = self.write();
        let prefixes = tenants.entry(tenant.to_string()).or_default();
        match prefixes.get(&prefix.cidr) {
            Some(existing) => Ok(existing.clone()),
            None => {
                prefixes.insert(prefix.cidr, prefix.clone());
                Ok(prefix)
            }
        }
    }

    async fn read_prefix(&self, cidr: &IpNet, tenant: &str) -> Result<Prefix> {
        self.read()
            .get(tenant)
            .and_then(|prefixes| prefixes.get(cidr))
            .cloned()
            .ok_or_else(|| IpamError::NotFound(cidr.to_string()))
    }

    async fn read_all_prefixes(&self, tenant: &str) -> Result<Vec<Prefix>> {
        Ok(self
            .read()
            .get(tenant)
            .map(|prefixes| prefixes.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_prefix(&self, prefix: Prefix, tenant: &str) -> Result<Prefix> {
        let mut tenants = self.write();
        let stored = tenants
            .get_mut(tenant)
            .and_then(|prefixes| prefixes.get_mut(&prefix.cidr))
            .ok_or(IpamError::OptimisticLock(prefix.cidr))?;

        if stored.version != prefix.version {
            return Err(IpamError::OptimisticLock(prefix.cidr));
        }

        let mut updated = prefix;
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_prefix(&self, prefix: Prefix, tenant: &str) -> Result<Prefix> {
        let removed = self
            .write()
            .get_mut(tenant)
            .and_then(|prefixes| prefixes.remove(&prefix.cidr));
        Ok(removed.unwrap_or(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "tenant-a";

    fn sample() -> Prefix {
        Prefix::new("10.0.0.0/24".parse().unwrap())
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let storage = MemoryStorage::new();
        let first = storage.create_prefix(sample(), TENANT).await.unwrap();
        let updated = storage.update_prefix(first, TENANT).await.unwrap();
        assert_eq!(updated.version, 1);

        // A second create must hand back the stored record, not reset it.
        let second = storage.create_prefix(sample(), TENANT).await.unwrap();
        assert_eq!(second.version, 1);
    }

    #[tokio::test]
    async fn test_update_fences_on_version() {
        let storage = MemoryStorage::new();
        let prefix = storage.create_prefix(sample(), TENANT).await.unwrap();

        let stale = prefix.clone();
        storage.update_prefix(prefix, TENANT).await.unwrap();

        let err = storage.update_prefix(stale, TENANT).await.unwrap_err();
        assert!(matches!(err, IpamError::OptimisticLock(_)));
    }

    #[tokio::test]
    async fn test_update_missing_row_is_a_conflict() {
        let storage = MemoryStorage::new();
        let err = storage.update_prefix(sample(), TENANT).await.unwrap_err();
        assert!(matches!(err, IpamError::OptimisticLock(_)));
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let storage = MemoryStorage::new();
        storage.create_prefix(sample(), TENANT).await.unwrap();

        let err = storage
            .read_prefix(&sample().cidr, "tenant-b")
            .await
            .unwrap_err();
        assert!(matches!(err, IpamError::NotFound(_)));
        assert!(storage.read_all_prefixes("tenant-b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_absent_row_is_not_an_error() {
        let storage = MemoryStorage::new();
        let returned = storage.delete_prefix(sample(), TENANT).await.unwrap();
        assert_eq!(returned, sample());
    }
}
