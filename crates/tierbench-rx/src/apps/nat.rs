use super::PacketProcessor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

const IPV4_SRC: usize = 26;

/// Source address translation against a random table
pub struct Nat {
    table: HashMap<u32, u32>,
    hits: u64,
    misses: u64,
}

impl Nat {
    /// Table of `entries` random external → internal mappings
    pub fn new(entries: usize) -> Self {
        let mut rng = StdRng::from_entropy();
        let table = (0..entries)
            .map(|_| (rng.gen_range(1..=u32::MAX), rng.gen_range(1..=u32::MAX)))
            .collect::<HashMap<_, _>>();
        tracing::debug!(entries = table.len(), "nat table built");
        Self::with_table(table)
    }

    pub fn with_table(table: HashMap<u32, u32>) -> Self {
        Self {
            table,
            hits: 0,
            misses: 0,
        }
    }
}

impl PacketProcessor for Nat {
    #[inline]
    fn process(&mut self, pkt: &mut [u8]) {
        let Some(field) = pkt.get_mut(IPV4_SRC..IPV4_SRC + 4) else {
            self.misses += 1;
            return;
        };
        let external = u32::from_be_bytes([field[0], field[1], field[2], field[3]]);
        match self.table.get(&external) {
            Some(internal) => {
                field.copy_from_slice(&internal.to_be_bytes());
                self.hits += 1;
            }
            None => self.misses += 1,
        }
    }

    fn stats(&self) -> String {
        format!("nat hits: {} misses: {}", self.hits, self.misses)
    }
}
