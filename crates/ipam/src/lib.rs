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

//! Tenant-scoped IP address management.
//!
//! Tracks CIDR prefixes per tenant, carves parent prefixes into
//! fixed-length child prefixes, and allocates individual addresses out of
//! leaf prefixes. All state lives behind a [`PrefixStorage`]
//! implementation; every mutation is a version-fenced compare-and-swap
//! retried on conflict, so any number of processes can allocate against
//! the same store concurrently.

pub mod cidr;
mod errors;
mod ipam;
mod memory;
mod prefix;
mod retry;
mod storage;

pub use errors::{IpamError, Result};
pub use ipam::{Ipam, IpAllocation, prefixes_overlapping};
pub use memory::MemoryStorage;
pub use prefix::{Prefix, Usage};
pub use storage::PrefixStorage;
