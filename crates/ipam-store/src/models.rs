//! Store row types

use ipnet::{Ipv4AddrRange, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of an address range: the network of a subnet, e.g. `10.0.0.0/24`.
///
/// Parsing accepts any address inside the network and normalizes it, so
/// `10.0.0.7/24` and `10.0.0.0/24` name the same range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RangeId(Ipv4Net);

/// Errors produced when parsing a [`RangeId`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RangeIdError {
    /// Missing `/` separator
    #[error("missing prefix length in '{0}'")]
    MissingPrefix(String),

    /// Address part is not an IPv4 address
    #[error("invalid IPv4 address in '{0}'")]
    InvalidAddress(String),

    /// Prefix length is not a number in 0..=32
    #[error("invalid prefix length in '{0}'")]
    InvalidPrefix(String),
}

impl RangeId {
    /// Range containing `address` with the given prefix length
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, RangeIdError> {
        let net = Ipv4Net::new(address, prefix_len)
            .map_err(|_| RangeIdError::InvalidPrefix(format!("{}/{}", address, prefix_len)))?;
        Ok(Self(net.trunc()))
    }

    /// Network address
    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    /// Last address of the subnet
    pub fn broadcast(&self) -> Ipv4Addr {
        self.0.broadcast()
    }

    /// Prefix length
    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// Whether `address` lies inside this range's subnet
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.0.contains(&address)
    }

    /// Addresses from `start` to the end of the subnet, in order.
    ///
    /// Empty when `start` is outside the subnet.
    pub fn hosts_from(&self, start: Ipv4Addr) -> impl Iterator<Item = Ipv4Addr> + use<> {
        let net = self.0;
        Ipv4AddrRange::new(start, net.broadcast()).take_while(move |address| net.contains(address))
    }
}

impl From<Ipv4Net> for RangeId {
    fn from(net: Ipv4Net) -> Self {
        Self(net.trunc())
    }
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RangeId {
    type Err = RangeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (addr, prefix) = trimmed
            .split_once('/')
            .ok_or_else(|| RangeIdError::MissingPrefix(trimmed.to_string()))?;
        let address: Ipv4Addr = addr
            .parse()
            .map_err(|_| RangeIdError::InvalidAddress(trimmed.to_string()))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| RangeIdError::InvalidPrefix(trimmed.to_string()))?;
        Self::new(address, prefix_len)
    }
}

impl TryFrom<String> for RangeId {
    type Error = RangeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RangeId> for String {
    fn from(value: RangeId) -> Self {
        value.to_string()
    }
}

/// Pool row state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AddressState {
    /// Free to hand out
    Available,
    /// Handed out
    Allocated,
}

/// A single address in the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    /// Insertion order; lower ids are allocated first
    pub id: u64,
    /// The address itself
    pub address: Ipv4Addr,
    /// Range the address was seeded into
    pub range: RangeId,
    /// Current state
    pub state: AddressState,
}

/// Association between a hostname and an allocated address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Host holding the address
    pub hostname: String,
    /// Bound address
    pub address: Ipv4Addr,
    /// Range of `address`
    pub range: RangeId,
}

impl Binding {
    /// Create a binding
    pub fn new(hostname: impl Into<String>, address: Ipv4Addr, range: RangeId) -> Self {
        Self {
            hostname: hostname.into(),
            address,
            range,
        }
    }
}

/// Result of claiming a specific address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Address was Available and is now Allocated
    Claimed,
    /// Address was already Allocated; nothing changed
    AlreadyAllocated,
    /// Address is not in the pool for this range
    NotInPool,
}
