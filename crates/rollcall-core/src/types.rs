use crate::roster::Roster;
use serde::{Deserialize, Serialize};

/// Bounding box of a detected face, in the coordinates of the frame the
/// detector ran on, with the five facial landmarks needed for alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl Region {
    /// Map this region to a frame scaled by `factor`.
    ///
    /// Detection may run on a downscaled copy of the camera frame; before
    /// the region is drawn on the full-resolution frame its coordinates
    /// must be mapped back with the inverse of the downscale factor.
    pub fn scaled(&self, factor: f32) -> Region {
        Region {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }
}

/// Face descriptor vector (512-dimensional for ArcFace, L2-normalized).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Descriptor {
    /// Euclidean distance to another descriptor. Lower = more similar.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Result of matching a probe descriptor against the roster.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Name of the matched identity (if any).
    pub name: Option<String>,
    /// Distance of the best candidate; `f32::INFINITY` for an empty roster.
    pub distance: f32,
}

/// Strategy for resolving a probe descriptor to an enrolled identity.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, roster: &Roster, threshold: f32) -> MatchResult;
}

/// Minimum-distance matcher with an absolute acceptance threshold.
///
/// Scans the roster in enrollment order and keeps the strict minimum, so a
/// distance tie resolves to the earlier-enrolled identity. The winning
/// candidate is only accepted if its distance clears the threshold — the
/// best among bad options is still unknown.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn compare(&self, probe: &Descriptor, roster: &Roster, threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best: Option<&crate::roster::EnrolledFace> = None;

        for entry in roster.iter() {
            let dist = probe.distance(&entry.descriptor);
            if dist < best_dist {
                best_dist = dist;
                best = Some(entry);
            }
        }

        match best {
            Some(entry) if best_dist <= threshold => MatchResult {
                matched: true,
                name: Some(entry.name.clone()),
                distance: best_dist,
            },
            _ => MatchResult {
                matched: false,
                name: None,
                distance: best_dist,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: &[f32]) -> Descriptor {
        Descriptor {
            values: values.to_vec(),
            model_version: None,
        }
    }

    fn roster_of(entries: &[(&str, &[f32])]) -> Roster {
        let mut roster = Roster::new();
        for (name, values) in entries {
            roster.insert(name.to_string(), desc(values));
        }
        roster
    }

    #[test]
    fn test_distance_identical() {
        let a = desc(&[1.0, 0.0, 0.0]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_known_value() {
        let a = desc(&[0.0, 0.0]);
        let b = desc(&[3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_match_selects_minimum_distance() {
        let roster = roster_of(&[("alice", &[1.0, 0.0]), ("bob", &[0.0, 1.0])]);
        let probe = desc(&[0.1, 0.9]);

        let result = NearestMatcher.compare(&probe, &roster, 0.5);
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("bob"));
    }

    #[test]
    fn test_match_tie_keeps_first_enrolled() {
        // Two identical reference descriptors: the earlier entry must win.
        let roster = roster_of(&[("first", &[1.0, 0.0]), ("second", &[1.0, 0.0])]);
        let probe = desc(&[1.0, 0.0]);

        let result = NearestMatcher.compare(&probe, &roster, 0.5);
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("first"));
    }

    #[test]
    fn test_best_candidate_over_threshold_is_unknown() {
        // 0.7 and 0.9 away: minimum still fails the 0.5 gate.
        let roster = roster_of(&[("alice", &[0.7, 0.0]), ("bob", &[0.9, 0.0])]);
        let probe = desc(&[0.0, 0.0]);

        let result = NearestMatcher.compare(&probe, &roster, 0.5);
        assert!(!result.matched);
        assert!(result.name.is_none());
        // The measured distance of the best candidate is still reported.
        assert!((result.distance - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_distance_equal_to_threshold_matches() {
        let roster = roster_of(&[("alice", &[0.5, 0.0])]);
        let probe = desc(&[0.0, 0.0]);

        let result = NearestMatcher.compare(&probe, &roster, 0.5);
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_empty_roster_is_unknown() {
        let result = NearestMatcher.compare(&desc(&[1.0, 0.0]), &Roster::new(), 0.5);
        assert!(!result.matched);
        assert!(result.name.is_none());
        assert_eq!(result.distance, f32::INFINITY);
    }

    #[test]
    fn test_threshold_monotonicity() {
        // Any match accepted under a stricter threshold is accepted under a
        // looser one.
        let roster = roster_of(&[("alice", &[0.3, 0.0]), ("bob", &[0.8, 0.0])]);
        let probe = desc(&[0.0, 0.0]);

        let strict = NearestMatcher.compare(&probe, &roster, 0.4);
        let loose = NearestMatcher.compare(&probe, &roster, 0.9);
        assert!(strict.matched);
        assert!(loose.matched);
        assert_eq!(strict.name, loose.name);
    }

    #[test]
    fn test_match_is_deterministic() {
        let roster = roster_of(&[("alice", &[0.2, 0.1]), ("bob", &[0.4, 0.3])]);
        let probe = desc(&[0.25, 0.15]);

        let a = NearestMatcher.compare(&probe, &roster, 0.5);
        let b = NearestMatcher.compare(&probe, &roster, 0.5);
        assert_eq!(a.matched, b.matched);
        assert_eq!(a.name, b.name);
        assert_eq!(a.distance, b.distance);
    }

    #[test]
    fn test_region_scaled() {
        let region = Region {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
            confidence: 0.9,
            landmarks: Some([(1.0, 2.0); 5]),
        };
        let scaled = region.scaled(2.0);
        assert_eq!(scaled.x, 20.0);
        assert_eq!(scaled.y, 40.0);
        assert_eq!(scaled.width, 60.0);
        assert_eq!(scaled.height, 80.0);
        assert_eq!(scaled.confidence, 0.9);
        assert_eq!(scaled.landmarks.unwrap()[0], (2.0, 4.0));
    }
}
