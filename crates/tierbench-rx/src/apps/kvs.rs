use super::PacketProcessor;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

const VALUE_LEN: usize = 2048;
const PKT_TOUCH_LEN: usize = 256;

struct Entry {
    value: Box<[u8; VALUE_LEN]>,
    gets: u64,
    sets: u64,
}

/// Key table shared by every core running the kvs kernel
pub struct KvsTable {
    entries: Mutex<HashMap<u64, Entry>>,
    keys: u64,
}

impl KvsTable {
    pub fn new(keys: u64) -> Self {
        let entries = (0..keys)
            .map(|k| {
                (
                    k,
                    Entry {
                        value: Box::new([0u8; VALUE_LEN]),
                        gets: 0,
                        sets: 0,
                    },
                )
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            keys,
        }
    }

    /// (keys, total gets, total sets)
    pub fn totals(&self) -> (usize, u64, u64) {
        let entries = self.entries.lock();
        let (gets, sets) = entries
            .values()
            .fold((0, 0), |(g, s), e| (g + e.gets, s + e.sets));
        (entries.len(), gets, sets)
    }
}

/// Random GET/SET against the shared table
///
/// Both operations read the first 256 bytes of the packet one cache line at
/// a time; a GET also reads the whole stored value.
pub struct Kvs {
    table: Arc<KvsTable>,
    rng: StdRng,
    sink: u64,
}

impl Kvs {
    pub fn new(table: Arc<KvsTable>) -> Self {
        Self {
            table,
            rng: StdRng::from_entropy(),
            sink: 0,
        }
    }

    fn touch_packet(&mut self, pkt: &[u8]) {
        for b in pkt.iter().take(PKT_TOUCH_LEN).step_by(64) {
            self.sink = self.sink.wrapping_add(*b as u64);
        }
    }
}

impl PacketProcessor for Kvs {
    fn process(&mut self, pkt: &mut [u8]) {
        let key = self.rng.gen_range(0..self.table.keys);
        let is_set = self.rng.gen::<bool>();
        self.touch_packet(pkt);

        let mut entries = self.table.entries.lock();
        if let Some(e) = entries.get_mut(&key) {
            if is_set {
                e.sets += 1;
            } else {
                e.gets += 1;
                for b in e.value.iter().step_by(64) {
                    self.sink = self.sink.wrapping_add(*b as u64);
                }
            }
        }
        drop(entries);
        std::hint::black_box(self.sink);
    }

    fn stats(&self) -> String {
        let (keys, gets, sets) = self.table.totals();
        format!("kvs keys: {keys} value bytes: {VALUE_LEN} gets: {gets} sets: {sets}")
    }
}
