use super::PacketProcessor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CATEGORIES: usize = 5;
const VAL_RANGE: i64 = 1024 * 1024;
const K: usize = 4;
/// One query per 64 bytes of packet
const TUPLE_LEN: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Point {
    x: i64,
    y: i64,
    category: u8,
}

/// k-nearest-neighbour classification over a fixed random point set
pub struct Knn {
    points: Vec<Point>,
    dist: Vec<(i64, u8)>,
    rng: StdRng,
    classified: [u64; CATEGORIES],
}

impl Knn {
    pub fn new(footprint: usize) -> Self {
        let mut rng = StdRng::from_entropy();
        let points = (0..footprint)
            .map(|_| Point {
                x: rng.gen_range(0..VAL_RANGE),
                y: rng.gen_range(0..VAL_RANGE),
                category: rng.gen_range(0..CATEGORIES as u8),
            })
            .collect();
        Self::with_points(points, rng)
    }

    fn with_points(points: Vec<Point>, rng: StdRng) -> Self {
        Self {
            dist: Vec::with_capacity(points.len()),
            points,
            rng,
            classified: [0; CATEGORIES],
        }
    }

    /// Majority category among the `K` closest points
    fn classify(&mut self, x: i64, y: i64) -> Option<u8> {
        if self.points.is_empty() {
            return None;
        }
        self.dist.clear();
        self.dist.extend(
            self.points
                .iter()
                .map(|p| ((x - p.x).pow(2) + (y - p.y).pow(2), p.category)),
        );
        let k = K.min(self.dist.len());
        self.dist.select_nth_unstable_by_key(k - 1, |d| d.0);

        let mut votes = [0u32; CATEGORIES];
        for (_, c) in &self.dist[..k] {
            votes[*c as usize] += 1;
        }
        (0..CATEGORIES)
            .max_by_key(|c| (votes[*c], std::cmp::Reverse(*c)))
            .map(|c| c as u8)
    }
}

impl PacketProcessor for Knn {
    fn process(&mut self, pkt: &mut [u8]) {
        for tuple in pkt.chunks_exact(TUPLE_LEN) {
            let q = (self.rng.gen_range(0..VAL_RANGE) + tuple[0] as i64) % VAL_RANGE;
            if let Some(c) = self.classify(q, q) {
                self.classified[c as usize] += 1;
            }
        }
    }

    fn stats(&self) -> String {
        format!(
            "knn points: {} classified per category: {:?}",
            self.points.len(),
            self.classified
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: i64, y: i64, category: u8) -> Point {
        Point { x, y, category }
    }

    #[test]
    fn test_majority_of_nearest() {
        let points = vec![
            pt(0, 0, 1),
            pt(1, 1, 1),
            pt(2, 2, 1),
            pt(3, 3, 2),
            pt(900, 900, 4),
            pt(901, 901, 4),
            pt(902, 902, 4),
        ];
        let mut knn = Knn::with_points(points, StdRng::seed_from_u64(7));
        assert_eq!(knn.classify(0, 0), Some(1));
        assert_eq!(knn.classify(901, 901), Some(4));
    }

    #[test]
    fn test_one_query_per_tuple() {
        let mut knn = Knn::new(32);
        let mut pkt = vec![0u8; 200];
        knn.process(&mut pkt);
        assert_eq!(knn.classified.iter().sum::<u64>(), 3);
    }

    #[test]
    fn test_empty_set() {
        let mut knn = Knn::with_points(Vec::new(), StdRng::seed_from_u64(1));
        assert_eq!(knn.classify(1, 1), None);
    }
}
