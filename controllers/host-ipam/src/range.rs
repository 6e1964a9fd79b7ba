//! Range expression parsing and address enumeration.
//!
//! The pool is configured with a comma-separated list of
//! `<start>/<prefix>-<end>/<prefix>` entries, for example
//! `10.0.0.10/24-10.0.0.20/24, 172.16.1.50/22-172.16.1.55/22`.

use ipam_store::{RangeId, RangeIdError};
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors for a single range entry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RangeExprError {
    #[error("expected '<start>/<prefix>-<end>/<prefix>', got '{0}'")]
    MissingSeparator(String),

    #[error("prefix lengths differ in '{0}'")]
    PrefixMismatch(String),

    #[error(transparent)]
    Range(#[from] RangeIdError),
}

/// One parsed `<start>/<prefix>-<end>/<prefix>` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeExpr {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    /// Subnet of the start address; every enumerated address is tagged with it
    pub range: RangeId,
}

impl RangeExpr {
    /// Parse a single entry
    pub fn parse(expr: &str) -> Result<Self, RangeExprError> {
        let expr = expr.trim();
        let (start, end) = expr
            .split_once('-')
            .ok_or_else(|| RangeExprError::MissingSeparator(expr.to_string()))?;
        let (start_addr, start_prefix) = split_address(start.trim(), expr)?;
        let (end_addr, end_prefix) = split_address(end.trim(), expr)?;

        if start_prefix != end_prefix {
            return Err(RangeExprError::PrefixMismatch(expr.to_string()));
        }

        let start: RangeId = format!("{}/{}", start_addr, start_prefix).parse()?;
        let start_addr: Ipv4Addr = start_addr
            .parse()
            .map_err(|_| RangeIdError::InvalidAddress(expr.to_string()))?;
        let end_addr: Ipv4Addr = end_addr
            .parse()
            .map_err(|_| RangeIdError::InvalidAddress(expr.to_string()))?;

        Ok(Self {
            start: start_addr,
            end: end_addr,
            range: start,
        })
    }

    /// Enumerate addresses from `start` up to and including `end`.
    ///
    /// Stops early at the edge of the start address's subnet, so an `end`
    /// that is below `start` or outside the subnet never loops forever.
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        let mut addresses = Vec::new();
        for address in self.range.hosts_from(self.start) {
            addresses.push(address);
            if address == self.end {
                return addresses;
            }
        }

        warn!(
            "End address {} not reached from {} within {}; stopped at subnet boundary",
            self.end, self.start, self.range
        );
        addresses
    }
}

fn split_address<'a>(part: &'a str, expr: &str) -> Result<(&'a str, &'a str), RangeExprError> {
    part.split_once('/')
        .ok_or_else(|| RangeIdError::MissingPrefix(expr.to_string()).into())
}

/// Parse a range configuration string.
///
/// Malformed entries are logged and skipped; the caller decides whether an
/// empty result is fatal.
pub fn parse_range_config(config: &str) -> Vec<RangeExpr> {
    debug!("Parsing IP ranges: {}", config);
    config
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match RangeExpr::parse(entry) {
            Ok(expr) => Some(expr),
            Err(e) => {
                warn!("Skipping range entry '{}': {}", entry, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerates_inclusive_range_in_order() {
        let expr = RangeExpr::parse("10.0.0.1/24-10.0.0.3/24").unwrap();
        assert_eq!(expr.range.to_string(), "10.0.0.0/24");
        assert_eq!(
            expr.addresses(),
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
            ]
        );
    }

    #[test]
    fn test_enumeration_carries_across_octets() {
        let expr = RangeExpr::parse("172.16.1.254/22-172.16.2.1/22").unwrap();
        assert_eq!(
            expr.addresses(),
            vec![
                Ipv4Addr::new(172, 16, 1, 254),
                Ipv4Addr::new(172, 16, 1, 255),
                Ipv4Addr::new(172, 16, 2, 0),
                Ipv4Addr::new(172, 16, 2, 1),
            ]
        );
    }

    #[test]
    fn test_unreachable_end_stops_at_subnet_boundary() {
        // End is outside the start's /30
        let expr = RangeExpr::parse("10.0.0.1/30-10.0.0.9/30").unwrap();
        assert_eq!(
            expr.addresses(),
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
            ]
        );

        // End below start
        let expr = RangeExpr::parse("10.0.0.2/30-10.0.0.1/30").unwrap();
        assert_eq!(expr.addresses().len(), 2);
    }

    #[test]
    fn test_enumeration_stops_at_top_of_address_space() {
        let expr = RangeExpr::parse("255.255.255.254/24-0.0.0.1/24").unwrap();
        assert_eq!(
            expr.addresses(),
            vec![Ipv4Addr::new(255, 255, 255, 254), Ipv4Addr::new(255, 255, 255, 255)]
        );
    }

    #[test]
    fn test_single_address_range() {
        let expr = RangeExpr::parse("10.0.0.5/32-10.0.0.5/32").unwrap();
        assert_eq!(expr.addresses(), vec![Ipv4Addr::new(10, 0, 0, 5)]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            RangeExpr::parse("10.0.0.1/24"),
            Err(RangeExprError::MissingSeparator(_))
        ));
        assert!(matches!(
            RangeExpr::parse("10.0.0.1/24-10.0.0.9/23"),
            Err(RangeExprError::PrefixMismatch(_))
        ));
        assert!(matches!(
            RangeExpr::parse("10.0.0.1-10.0.0.9"),
            Err(RangeExprError::Range(RangeIdError::MissingPrefix(_)))
        ));
        assert!(matches!(
            RangeExpr::parse("10.0.0.1/24-10.0.0.x/24"),
            Err(RangeExprError::Range(RangeIdError::InvalidAddress(_)))
        ));
    }

    #[test]
    fn test_config_skips_malformed_entries() {
        let ranges = parse_range_config(
            " 10.0.0.1/24-10.0.0.3/24 , 172.16.1.50/22-172.16.1.55/21,,bogus, 192.168.0.1/24-192.168.0.2/24",
        );
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].range.to_string(), "10.0.0.0/24");
        assert_eq!(ranges[1].range.to_string(), "192.168.0.0/24");
    }

    #[test]
    fn test_empty_config_yields_nothing() {
        assert!(parse_range_config("").is_empty());
        assert!(parse_range_config(" , ").is_empty());
    }
}
