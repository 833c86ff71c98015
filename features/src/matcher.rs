use pano_core::{Descriptor, Descriptors, FeatureMatch, Matches};
use rayon::prelude::*;

/// Brute-force Hamming matcher with Lowe's ratio test and optional cross-check.
#[derive(Debug, Clone)]
pub struct Matcher {
    cross_check: bool,
    ratio_threshold: Option<f32>,
}

#[derive(Debug, Clone, Copy)]
struct TwoNearest {
    best: Option<(usize, u32)>,
    second: Option<u32>,
}

/// Two nearest neighbours of `q`; ties keep the lower train index.
fn two_nearest(q: &Descriptor, train: &Descriptors) -> TwoNearest {
    let mut best: Option<(usize, u32)> = None;
    let mut second: Option<u32> = None;

    for (train_idx, t) in train.iter().enumerate() {
        let distance = q.hamming_distance(t);
        match best {
            None => best = Some((train_idx, distance)),
            Some((_, best_dist)) if distance < best_dist => {
                second = Some(best_dist);
                best = Some((train_idx, distance));
            }
            Some(_) => {
                if second.map_or(true, |s| distance < s) {
                    second = Some(distance);
                }
            }
        }
    }

    TwoNearest { best, second }
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            cross_check: false,
            ratio_threshold: None,
        }
    }

    pub fn with_cross_check(mut self, enabled: bool) -> Self {
        self.cross_check = enabled;
        self
    }

    pub fn with_ratio_test(mut self, threshold: f32) -> Self {
        self.ratio_threshold = Some(threshold);
        self
    }

    /// Matches every query descriptor against `train`. Output is ordered by
    /// query index regardless of how the work was scheduled.
    pub fn match_descriptors(&self, query: &Descriptors, train: &Descriptors) -> Matches {
        if query.is_empty() || train.is_empty() {
            return Matches::new();
        }

        let reverse: Option<Vec<Option<usize>>> = self.cross_check.then(|| {
            train
                .descriptors
                .par_iter()
                .map(|t| two_nearest(t, query).best.map(|(idx, _)| idx))
                .collect()
        });

        let candidates: Vec<Option<FeatureMatch>> = query
            .descriptors
            .par_iter()
            .enumerate()
            .map(|(query_idx, q)| {
                let nn = two_nearest(q, train);
                let (train_idx, distance) = nn.best?;

                let confidence = match nn.second {
                    Some(second) if second > 0 => 1.0 - distance as f32 / second as f32,
                    _ => 0.0,
                };

                if let Some(ratio) = self.ratio_threshold {
                    let second = nn.second?;
                    if (distance as f32) >= ratio * second as f32 {
                        return None;
                    }
                }

                if let Some(reverse) = &reverse {
                    if reverse[train_idx] != Some(query_idx) {
                        return None;
                    }
                }

                Some(FeatureMatch::new(query_idx, train_idx, distance as f32).with_confidence(confidence))
            })
            .collect();

        Matches {
            matches: candidates.into_iter().flatten().collect(),
        }
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pano_core::DESCRIPTOR_BYTES;

    fn desc(fill: u8) -> Descriptor {
        Descriptor::new([fill; DESCRIPTOR_BYTES])
    }

    fn with_bits(bits: &[usize]) -> Descriptor {
        let mut d = Descriptor::zeros();
        for &b in bits {
            d.set_bit(b);
        }
        d
    }

    #[test]
    fn identical_sets_match_one_to_one() {
        let set: Descriptors = [desc(0xAA), desc(0x55), desc(0x0F)].into_iter().collect();
        let matches = Matcher::new().with_ratio_test(0.7).match_descriptors(&set, &set);
        assert_eq!(matches.len(), 3);
        for (i, m) in matches.iter().enumerate() {
            assert_eq!((m.query_idx, m.train_idx), (i, i));
            assert_eq!(m.distance, 0.0);
            assert_eq!(m.confidence, 1.0);
        }
    }

    #[test]
    fn ratio_test_rejects_ambiguous_matches() {
        let query: Descriptors = [with_bits(&[])].into_iter().collect();
        // distances 10 and 12: 10 < 0.7 * 12 fails
        let ambiguous: Descriptors = [
            with_bits(&(0..10).collect::<Vec<_>>()),
            with_bits(&(100..112).collect::<Vec<_>>()),
        ]
        .into_iter()
        .collect();
        assert!(Matcher::new().with_ratio_test(0.7).match_descriptors(&query, &ambiguous).is_empty());
        assert_eq!(Matcher::new().match_descriptors(&query, &ambiguous).len(), 1);
    }

    #[test]
    fn ratio_test_needs_a_second_neighbour() {
        let query: Descriptors = [desc(0)].into_iter().collect();
        let single: Descriptors = [desc(0)].into_iter().collect();
        assert!(Matcher::new().with_ratio_test(0.7).match_descriptors(&query, &single).is_empty());
    }

    #[test]
    fn cross_check_removes_many_to_one() {
        let query: Descriptors = [with_bits(&[1]), with_bits(&[1, 2])].into_iter().collect();
        let train: Descriptors = [with_bits(&[1]), desc(0xFF)].into_iter().collect();
        let plain = Matcher::new().match_descriptors(&query, &train);
        assert_eq!(plain.len(), 2);
        let checked = Matcher::new().with_cross_check(true).match_descriptors(&query, &train);
        assert_eq!(checked.len(), 1);
        assert_eq!(checked.matches[0].query_idx, 0);
    }

    #[test]
    fn empty_inputs_produce_no_matches() {
        let empty = Descriptors::new();
        let one: Descriptors = [desc(1)].into_iter().collect();
        assert!(Matcher::new().match_descriptors(&empty, &one).is_empty());
        assert!(Matcher::new().match_descriptors(&one, &empty).is_empty());
    }
}
