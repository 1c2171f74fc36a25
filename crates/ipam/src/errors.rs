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

use ipnet::IpNet;

pub type Result<T> = std::result::Result<T, IpamError>;

#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    #[error("prefix not found: {0}")]
    NotFound(String),

    #[error("no more ips available in prefix {0}")]
    NoIpAvailable(IpNet),

    #[error("no more child prefixes available in prefix {0}")]
    NoChildPrefixAvailable(IpNet),

    #[error("ip {ip} is already allocated in prefix {prefix}")]
    AlreadyAllocated { prefix: IpNet, ip: IpAddr },

    /// A version-checked update found no matching row. Handled by the retry
    /// harness; callers only see this after the attempt budget is spent.
    #[error("optimistic lock conflict while updating prefix {0}")]
    OptimisticLock(IpNet),

    #[error("invalid cidr {cidr}: {source}")]
    InvalidCidr {
        cidr: String,
        source: ipnet::AddrParseError,
    },

    #[error("invalid ip address: {0}")]
    InvalidIp(String),

    #[error("{0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}
