//! Reference-frame selection. Depends on [`crate::stats`] and
//! [`crate::detect`].

use crate::error::{Result, StackError};
use crate::frame::Frame;

/// Candidate summary handed to [`select_reference`]; callers populate this
/// from frames that have already passed detection (stars/hfr/stats present).
#[derive(Clone, Copy, Debug)]
pub struct ReferenceCandidate {
    pub frame_id: u64,
    pub hfr: f32,
    pub star_count: usize,
    pub noise: f32,
}

/// Score a candidate: lower is better. Penalizes both poor seeing (high HFR)
/// and a star count far from the batch median (indicating clouds, tracking
/// loss, or a spurious detection run), and rewards frames with more
/// detections via the `sqrt(star_count)` denominator.
fn score(candidate: &ReferenceCandidate, median_star_count: f32) -> f32 {
    if candidate.star_count == 0 || median_star_count <= 0.0 {
        return f32::INFINITY;
    }
    let deviation = (candidate.star_count as f32 - median_star_count).abs() / median_star_count;
    candidate.hfr * (1.0 + deviation) / (candidate.star_count as f32).sqrt()
}

/// Pick the best reference among `candidates`. Ties broken by lower noise,
/// then by lower frame id (earliest frame wins, for determinism).
pub fn select_reference(candidates: &[ReferenceCandidate]) -> Result<ReferenceCandidate> {
    if candidates.is_empty() {
        return Err(StackError::NoReference("no candidate frames survived detection".into()));
    }

    let mut counts: Vec<f32> = candidates.iter().map(|c| c.star_count as f32).collect();
    counts.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = counts.len() / 2;
    let median_star_count = if counts.len() % 2 == 1 {
        counts[mid]
    } else {
        (counts[mid - 1] + counts[mid]) / 2.0
    };

    let mut best: Option<(f32, ReferenceCandidate)> = None;
    for &candidate in candidates {
        let s = score(&candidate, median_star_count);
        if !s.is_finite() {
            continue;
        }
        best = match best {
            None => Some((s, candidate)),
            Some((best_s, best_c)) => {
                if s < best_s - f32::EPSILON
                    || ((s - best_s).abs() <= f32::EPSILON
                        && (candidate.noise < best_c.noise
                            || (candidate.noise == best_c.noise && candidate.frame_id < best_c.frame_id)))
                {
                    Some((s, candidate))
                } else {
                    Some((best_s, best_c))
                }
            }
        };
    }

    best.map(|(_, c)| c)
        .ok_or_else(|| StackError::NoReference("all candidates scored non-finite (zero star counts)".into()))
}

/// Convenience: build a candidate list from frames that carry detection
/// results, skipping any that don't (dropped frames).
pub fn candidates_from_frames(frames: &[Frame]) -> Vec<ReferenceCandidate> {
    frames
        .iter()
        .filter_map(|f| {
            let stars = f.stars.as_ref()?;
            let hfr = f.hfr?;
            let noise = f.stats.as_ref().map(|s| s.noise).unwrap_or(0.0);
            Some(ReferenceCandidate {
                frame_id: f.id,
                hfr,
                star_count: stars.len(),
                noise,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_lower_hfr_at_equal_star_count() {
        let candidates = vec![
            ReferenceCandidate { frame_id: 1, hfr: 3.0, star_count: 40, noise: 1.0 },
            ReferenceCandidate { frame_id: 2, hfr: 1.5, star_count: 40, noise: 1.0 },
        ];
        let chosen = select_reference(&candidates).unwrap();
        assert_eq!(chosen.frame_id, 2);
    }

    #[test]
    fn penalizes_star_count_outliers() {
        let candidates = vec![
            ReferenceCandidate { frame_id: 1, hfr: 2.0, star_count: 50, noise: 1.0 },
            ReferenceCandidate { frame_id: 2, hfr: 2.0, star_count: 3, noise: 1.0 },
            ReferenceCandidate { frame_id: 3, hfr: 2.0, star_count: 48, noise: 1.0 },
        ];
        let chosen = select_reference(&candidates).unwrap();
        assert_ne!(chosen.frame_id, 2);
    }

    #[test]
    fn empty_candidates_is_an_error() {
        assert!(select_reference(&[]).is_err());
    }

    #[test]
    fn ties_broken_by_noise_then_id() {
        let candidates = vec![
            ReferenceCandidate { frame_id: 5, hfr: 2.0, star_count: 40, noise: 2.0 },
            ReferenceCandidate { frame_id: 2, hfr: 2.0, star_count: 40, noise: 1.0 },
        ];
        let chosen = select_reference(&candidates).unwrap();
        assert_eq!(chosen.frame_id, 2);
    }
}
