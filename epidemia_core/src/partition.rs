//! Division of the population into per-agent shares.

use serde::Serialize;
use std::ops::Range;

/// A contiguous slice of one city's residents owned by one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Share {
    /// City the residents live in
    pub city: u32,

    /// Resident indices
    pub range: Range<u32>,
}

impl Share {
    pub fn new(city: u32, range: Range<u32>) -> Self {
        Self { city, range }
    }

    pub fn len(&self) -> u32 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// True for the share holding the city's first resident. Exactly one
    /// share per non-empty city owns it, and that share's agent does the
    /// city's one-off build work.
    pub fn owns_city(&self) -> bool {
        self.range.start == 0 && !self.is_empty()
    }
}

/// Splits cities with the given populations among `agents` agents.
///
/// Populations are laid end to end and cut into equal segments, so an
/// agent's quota may span several small cities and a large city may be
/// split across several agents. Every resident lands in exactly one share.
pub fn partition(populations: &[u32], agents: usize) -> Vec<Vec<Share>> {
    let agents = agents.max(1);
    let total: u64 = populations.iter().map(|&p| p as u64).sum();
    let mut shares: Vec<Vec<Share>> = vec![Vec::new(); agents];
    let boundary = |agent: usize| total * agent as u64 / agents as u64;

    let mut offset: u64 = 0;
    for (city, &population) in populations.iter().enumerate() {
        let start = offset;
        let end = offset + population as u64;
        offset = end;
        if population == 0 {
            continue;
        }
        for (agent, list) in shares.iter_mut().enumerate() {
            let lo = boundary(agent).max(start);
            let hi = boundary(agent + 1).min(end);
            if lo < hi {
                list.push(Share::new(city as u32, (lo - start) as u32..(hi - start) as u32));
            }
        }
    }
    shares
}
