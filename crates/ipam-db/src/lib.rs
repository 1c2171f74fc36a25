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

//! PostgreSQL-backed [`PrefixStorage`].
//!
//! Prefixes live in a single table keyed `(tenant, cidr)`. The record
//! itself is an opaque jsonb payload; the version is mirrored into its own
//! column so the conditional update can fence on it without touching the
//! payload.

use async_trait::async_trait;
use ipam::{IpamError, Prefix, PrefixStorage, Result};
use ipnet::IpNet;
use ipnetwork::IpNetwork;
use sqlx::PgPool;

pub mod migrations;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("error executing query {query}: {source}")]
    Query { query: String, source: sqlx::Error },

    #[error("error connecting to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("error encoding prefix payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl StorageError {
    fn query(query: &str, source: sqlx::Error) -> Self {
        Self::Query {
            query: query.to_string(),
            source,
        }
    }
}

impl From<StorageError> for IpamError {
    fn from(err: StorageError) -> Self {
        IpamError::Storage(Box::new(err))
    }
}

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await.map_err(StorageError::Connect)?;
        migrations::migrate(&pool).await.map_err(StorageError::Migrate)?;
        Ok(Self::new(pool))
    }
}

// If IpNetwork::new() doesn't accept what we got out of a canonical
// ipnet::IpNet, something has gone very wrong and we should just panic.
fn cidr_column(net: &IpNet) -> IpNetwork {
    IpNetwork::new(net.addr(), net.prefix_len()).expect(
        "IpNetwork::new() returned an unexpected Err (this shouldn't happen, please file a bug)",
    )
}

fn encode(prefix: &Prefix) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(prefix).map_err(StorageError::Payload)?)
}

fn decode(payload: serde_json::Value) -> Result<Prefix> {
    Ok(serde_json::from_value(payload).map_err(StorageError::Payload)?)
}

#[async_trait]
impl PrefixStorage for PostgresStorage {
    async fn create_prefix(&self, prefix: Prefix, tenant: &str) -> Result<Prefix> {
        let payload = encode(&prefix)?;
        let query = "INSERT INTO prefixes (tenant, cidr, version, prefix)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant, cidr) DO NOTHING
            RETURNING prefix";
        let inserted: Option<serde_json::Value> = sqlx::query_scalar(query)
            .bind(tenant)
            .bind(cidr_column(&prefix.cidr))
            .bind(prefix.version)
            .bind(&payload)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::query(query, e))?;

        match inserted {
            Some(payload) => decode(payload),
            // Duplicate key: hand back the stored record unchanged.
            None => self.read_prefix(&prefix.cidr, tenant).await,
        }
    }

    async fn read_prefix(&self, cidr: &IpNet, tenant: &str) -> Result<Prefix> {
        let query = "SELECT prefix FROM prefixes WHERE tenant = $1 AND cidr = $2";
        let row: Option<serde_json::Value> = sqlx::query_scalar(query)
            .bind(tenant)
            .bind(cidr_column(cidr))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::query(query, e))?;

        match row {
            Some(payload) => decode(payload),
            None => Err(IpamError::NotFound(cidr.to_string())),
        }
    }

    async fn read_all_prefixes(&self, tenant: &str) -> Result<Vec<Prefix>> {
        let query = "SELECT prefix FROM prefixes WHERE tenant = $1";
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(query)
            .bind(tenant)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::query(query, e))?;

        rows.into_iter().map(decode).collect()
    }

    async fn update_prefix(&self, prefix: Prefix, tenant: &str) -> Result<Prefix> {
        let expected = prefix.version;
        let mut updated = prefix;
        updated.version += 1;
        let payload = encode(&updated)?;

        // The version comparison and the write are one statement, so the
        // fence holds without an explicit transaction.
        let query = "UPDATE prefixes SET prefix = $1, version = $2
            WHERE tenant = $3 AND cidr = $4 AND version = $5
            RETURNING prefix";
        let row: Option<serde_json::Value> = sqlx::query_scalar(query)
            .bind(&payload)
            .bind(updated.version)
            .bind(tenant)
            .bind(cidr_column(&updated.cidr))
            .bind(expected)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::query(query, e))?;

        match row {
            Some(payload) => decode(payload),
            None => Err(IpamError::OptimisticLock(updated.cidr)),
        }
    }

    async fn delete_prefix(&self, prefix: Prefix, tenant: &str) -> Result<Prefix> {
        let query = "DELETE FROM prefixes WHERE tenant = $1 AND cidr = $2";
        sqlx::query(query)
            .bind(tenant)
            .bind(cidr_column(&prefix.cidr))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::query(query, e))?;
        Ok(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trips_all_fields() {
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
        prefix.version = 3;

        let payload = encode(&prefix).expect("Couldn't encode prefix payload");
        let restored = decode(payload).expect("Couldn't decode prefix payload");
        assert_eq!(prefix, restored);
    }

    #[test]
    fn test_cidr_column_preserves_address_and_length() {
        let v4: IpNet = "10.1.0.0/16".parse().unwrap();
        let column = cidr_column(&v4);
        assert_eq!(column.ip(), v4.addr());
        assert_eq!(column.prefix(), v4.prefix_len());

        let v6: IpNet = "2001:db8::/48".parse().unwrap();
        let column = cidr_column(&v6);
        assert_eq!(column.ip(), v6.addr());
        assert_eq!(column.prefix(), v6.prefix_len());
    }
}
