//! Fixed counter record layout and keys.
//!
//! The record layout is shared with the packet path that increments the
//! counters, so index positions are fixed. Indices past the named ones are
//! carried through untouched.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Number of counters in a record. Records shorter than this are rejected.
pub const MAX_COUNTER_NUMBER: usize = 8;

/// Traffic direction a counter set is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    /// Traffic entering the dataplane through the interface.
    Ingress,
    /// Traffic leaving the dataplane through the interface.
    Egress,
}

impl Hook {
    /// Both hooks, in the order they are read and flushed.
    pub const ALL: [Hook; 2] = [Hook::Ingress, Hook::Egress];

    /// Returns the hook name as used in map keys and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Ingress => "ingress",
            Hook::Egress => "egress",
        }
    }

    /// Returns the numeric hook id used in the BPF map key.
    pub fn id(&self) -> u8 {
        match self {
            Hook::Ingress => 0,
            Hook::Egress => 1,
        }
    }

    /// Parses a numeric hook id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Hook::Ingress),
            1 => Some(Hook::Egress),
            _ => None,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hook {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingress" => Ok(Hook::Ingress),
            "egress" => Ok(Hook::Egress),
            other => Err(format!("unknown hook '{}'", other)),
        }
    }
}

/// Identifies one fixed counter record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CounterKey {
    /// Interface name (e.g., "eth0").
    pub iface: String,
    /// Attachment direction.
    pub hook: Hook,
}

impl CounterKey {
    /// Creates a new counter key.
    pub fn new(iface: impl Into<String>, hook: Hook) -> Self {
        Self {
            iface: iface.into(),
            hook,
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.iface, self.hook)
    }
}

/// Named positions within a counter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum CounterIndex {
    /// Packets observed.
    TotalPackets = 0,
    /// Packets accepted by a policy verdict.
    AcceptedByPolicy = 1,
    /// Packets dropped by a policy verdict.
    DroppedByPolicy = 2,
    /// Packets rejected for being malformed or too short.
    ErrShortPacket = 3,
    /// Packets with a bad checksum.
    ErrFailedCsum = 4,
    /// Packets dropped for carrying IP options.
    ErrIpOptions = 5,
    /// Packets with a malformed IP header.
    ErrIpMalformed = 6,
}

impl CounterIndex {
    /// Returns the position of this counter in the record.
    pub fn position(self) -> usize {
        self as usize
    }

    /// Returns the snake_case name used in JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalPackets => "total_packets",
            Self::AcceptedByPolicy => "accepted_by_policy",
            Self::DroppedByPolicy => "dropped_by_policy",
            Self::ErrShortPacket => "err_short_packet",
            Self::ErrFailedCsum => "err_failed_csum",
            Self::ErrIpOptions => "err_ip_options",
            Self::ErrIpMalformed => "err_ip_malformed",
        }
    }

    /// Returns all named indices in layout order.
    pub fn all() -> &'static [CounterIndex] {
        &[
            Self::TotalPackets,
            Self::AcceptedByPolicy,
            Self::DroppedByPolicy,
            Self::ErrShortPacket,
            Self::ErrFailedCsum,
            Self::ErrIpOptions,
            Self::ErrIpMalformed,
        ]
    }
}

/// Aggregated values of one fixed counter record.
///
/// Always at least [`MAX_COUNTER_NUMBER`] wide once produced by the
/// aggregate reader; any extra trailing values are kept in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct CounterRecord {
    values: Vec<u64>,
}

impl CounterRecord {
    /// Creates an all-zero record of the given width.
    pub fn zeroed(width: usize) -> Self {
        Self {
            values: vec![0; width],
        }
    }

    /// Wraps raw values without validation.
    pub fn from_values(values: Vec<u64>) -> Self {
        Self { values }
    }

    /// Returns the value of a named counter, or 0 if the record is too short.
    pub fn get(&self, index: CounterIndex) -> u64 {
        self.value_at(index.position()).unwrap_or(0)
    }

    /// Returns the value at a raw position.
    pub fn value_at(&self, position: usize) -> Option<u64> {
        self.values.get(position).copied()
    }

    /// Returns all values in layout order.
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// Returns the record width.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the record has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns true if every value is zero.
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0)
    }

    /// Adds one replica element-wise, widening to fit longer replicas.
    ///
    /// Uses wrapping arithmetic: the producer's counters wrap natively.
    pub fn accumulate(&mut self, replica: &[u64]) {
        if replica.len() > self.values.len() {
            self.values.resize(replica.len(), 0);
        }
        for (total, value) in self.values.iter_mut().zip(replica) {
            *total = total.wrapping_add(*value);
        }
    }

    /// Returns the positions whose value is lower than in `previous`.
    pub fn decreased_since(&self, previous: &CounterRecord) -> Vec<usize> {
        self.values
            .iter()
            .zip(previous.values.iter())
            .enumerate()
            .filter(|(_, (now, before))| now < before)
            .map(|(pos, _)| pos)
            .collect()
    }
}
