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

//! Small helpers over [`ipnet`] that the allocator needs and the crate
//! itself does not provide.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::IpNet;

use crate::errors::{IpamError, Result};

/// Parse a CIDR in `address/length` notation into its canonical form, with
/// the bits after the prefix cleared.
pub fn parse_cidr(cidr: &str) -> Result<IpNet> {
    IpNet::from_str(cidr)
        .map(|net| net.trunc())
        .map_err(|source| IpamError::InvalidCidr {
            cidr: cidr.to_string(),
            source,
        })
}

/// Parse a bare IP address.
pub fn parse_ip(ip: &str) -> Result<IpAddr> {
    IpAddr::from_str(ip).map_err(|_| IpamError::InvalidIp(ip.to_string()))
}

/// Two prefixes overlap iff either one contains the other's network
/// address. Prefixes of different address families never overlap.
pub fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// The address following `ip`, or `None` when the address family wraps.
pub fn increment(ip: IpAddr) -> Option<IpAddr> {
    match ip {
        IpAddr::V4(v4) => v4
            .to_bits()
            .checked_add(1)
            .map(|bits| IpAddr::V4(Ipv4Addr::from_bits(bits))),
        IpAddr::V6(v6) => v6
            .to_bits()
            .checked_add(1)
            .map(|bits| IpAddr::V6(Ipv6Addr::from_bits(bits))),
    }
}

/// Total number of addresses covered by `net`, clamped to `u128::MAX` for
/// an IPv6 `/0`.
pub fn address_count(net: &IpNet) -> u128 {
    let host_bits = net.max_prefix_len() - net.prefix_len();
    if host_bits >= 128 {
        u128::MAX
    } else {
        1u128 << host_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonicalizes_host_bits() {
        let net = parse_cidr("10.0.0.5/24").expect("Couldn't parse cidr");
        assert_eq!(net.to_string(), "10.0.0.0/24");

        let net = parse_cidr("2001:db8::1/64").expect("Couldn't parse v6 cidr");
        assert_eq!(net.to_string(), "2001:db8::/64");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        parse_cidr("10.0.0.0").expect_err("Unexpectedly parsed cidr without a length");
        parse_cidr("10.0.0.0/33").expect_err("Unexpectedly parsed cidr with invalid length");
        parse_cidr("not-a-cidr/8").expect_err("Unexpectedly parsed garbage");
        parse_ip("10.0.0").expect_err("Unexpectedly parsed malformed ip");
    }

    #[test]
    fn test_overlaps() {
        let outer = parse_cidr("10.0.0.0/8").unwrap();
        let inner = parse_cidr("10.1.0.0/16").unwrap();
        let disjoint = parse_cidr("192.168.0.0/16").unwrap();
        let v6 = parse_cidr("2001:db8::/32").unwrap();

        assert!(overlaps(&outer, &inner));
        assert!(overlaps(&inner, &outer));
        assert!(!overlaps(&outer, &disjoint));
        assert!(!overlaps(&outer, &v6));
    }

    #[test]
    fn test_increment() {
        let next = increment("10.0.0.255".parse().unwrap()).unwrap();
        assert_eq!(next, "10.0.1.0".parse::<IpAddr>().unwrap());

        assert!(increment("255.255.255.255".parse().unwrap()).is_none());
        assert!(
            increment("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff".parse().unwrap()).is_none()
        );
    }

    #[test]
    fn test_address_count() {
        assert_eq!(address_count(&parse_cidr("10.0.0.0/24").unwrap()), 256);
        assert_eq!(address_count(&parse_cidr("10.0.0.1/32").unwrap()), 1);
        assert_eq!(address_count(&parse_cidr("2001:db8::/64").unwrap()), 1 << 64);
        assert_eq!(address_count(&parse_cidr("::/0").unwrap()), u128::MAX);
    }
}
