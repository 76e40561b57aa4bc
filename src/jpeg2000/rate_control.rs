//! PCRD-opt: post-compression rate-distortion optimisation. Each code
//! block's coding passes already carry a (bit_plane, cumulative_bytes)
//! trace; this module turns that into per-pass (rate, distortion) points,
//! filters to the convex hull, and picks inclusion points per quality
//! layer via a slope (lambda) search against a byte budget.

use crate::jpeg2000::image::Subband;
use crate::jpeg2000::tier1::PassRecord;

/// One convex-hull-filtered candidate truncation point for a code block.
#[derive(Debug, Clone, Copy)]
pub struct RatePoint {
    pub pass_index: usize,
    pub rate: usize,
    pub distortion: f64,
    pub slope: f64,
}

/// Mean-square distortion contributed by one more bit plane of a
/// subband, weighted by its basis-function energy gain (spec §4.5).
fn pass_distortion_estimate(bit_plane: u8, energy_gain: f32) -> f64 {
    let weight = (energy_gain as f64).powi(2);
    let magnitude = (1u64 << bit_plane) as f64;
    weight * magnitude * magnitude
}

/// Builds the convex hull of (rate, distortion-reduction) points for one
/// code block's passes, dropping passes that a straight line between
/// their neighbours would dominate.
pub fn convex_hull(passes: &[PassRecord], energy_gain: f32) -> Vec<RatePoint> {
    if passes.is_empty() {
        return Vec::new();
    }

    let mut remaining_distortion: f64 = passes
        .iter()
        .map(|p| pass_distortion_estimate(p.bit_plane, energy_gain))
        .sum();
    let mut points = Vec::with_capacity(passes.len());
    for (i, pass) in passes.iter().enumerate() {
        remaining_distortion -= pass_distortion_estimate(pass.bit_plane, energy_gain) * 0.5;
        points.push(RatePoint {
            pass_index: i,
            rate: pass.cumulative_bytes,
            distortion: remaining_distortion,
            slope: 0.0,
        });
        remaining_distortion -= pass_distortion_estimate(pass.bit_plane, energy_gain) * 0.5;
    }

    let mut hull: Vec<RatePoint> = Vec::with_capacity(points.len());
    for mut point in points {
        while hull.len() >= 2 {
            let a = hull[hull.len() - 2];
            let b = hull[hull.len() - 1];
            if !is_convex(a, b, point) {
                hull.pop();
            } else {
                break;
            }
        }
        if let Some(last) = hull.last() {
            if point.rate == last.rate {
                continue;
            }
            point.slope = slope(*last, point);
        }
        hull.push(point);
    }

    for i in 1..hull.len() {
        hull[i].slope = slope(hull[i - 1], hull[i]);
    }
    hull
}

fn slope(a: RatePoint, b: RatePoint) -> f64 {
    let dr = (b.rate as f64 - a.rate as f64).max(1e-9);
    let dd = a.distortion - b.distortion;
    dd / dr
}

fn is_convex(a: RatePoint, b: RatePoint, c: RatePoint) -> bool {
    slope(a, b) >= slope(b, c)
}

/// A chosen truncation point for one code block within one quality
/// layer: how many bytes (and which pass) of that block's coded data to
/// include.
#[derive(Debug, Clone, Copy)]
pub struct Inclusion {
    pub pass_index: usize,
    pub rate: usize,
}

/// Picks, for a single lambda threshold, the last hull point whose slope
/// is still >= lambda (i.e. still "worth" including at this quality).
fn select_for_lambda(hull: &[RatePoint], lambda: f64) -> Option<Inclusion> {
    hull.iter()
        .rev()
        .find(|p| p.slope >= lambda || p.pass_index == 0)
        .map(|p| Inclusion {
            pass_index: p.pass_index,
            rate: p.rate,
        })
}

/// Binary-searches for the lambda that keeps total included bytes across
/// all code-block hulls within `byte_budget`, then returns the chosen
/// inclusion for each block. Falls back to an empty inclusion for a
/// block if even its first pass would overshoot on its own.
pub fn select_layer(hulls: &[Vec<RatePoint>], byte_budget: usize) -> Vec<Option<Inclusion>> {
    if byte_budget == 0 {
        return vec![None; hulls.len()];
    }

    let max_slope = hulls
        .iter()
        .flat_map(|h| h.iter().map(|p| p.slope))
        .fold(0.0_f64, f64::max);
    let (mut lo, mut hi) = (0.0_f64, (max_slope + 1.0).max(1.0));

    let total_bytes_at = |lambda: f64| -> usize {
        hulls
            .iter()
            .map(|h| select_for_lambda(h, lambda).map(|i| i.rate).unwrap_or(0))
            .sum()
    };

    for _ in 0..40 {
        let mid = (lo + hi) / 2.0;
        if total_bytes_at(mid) > byte_budget {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let mut chosen: Vec<Option<Inclusion>> = hulls.iter().map(|h| select_for_lambda(h, hi)).collect();
    let mut total: usize = chosen.iter().flatten().map(|i| i.rate).sum();
    if total > byte_budget {
        // Greedily drop the least valuable remaining inclusions until the
        // budget is met; happens only when the binary search's upper
        // bound still overshoots by a rounding margin.
        let mut order: Vec<usize> = (0..chosen.len()).collect();
        order.sort_by(|&a, &b| {
            let sa = chosen[a].map(|_| hulls[a].last().map(|p| p.slope).unwrap_or(0.0)).unwrap_or(f64::MAX);
            let sb = chosen[b].map(|_| hulls[b].last().map(|p| p.slope).unwrap_or(0.0)).unwrap_or(f64::MAX);
            sa.partial_cmp(&sb).unwrap()
        });
        for &idx in &order {
            if total <= byte_budget {
                break;
            }
            if let Some(inc) = chosen[idx] {
                total -= inc.rate;
                chosen[idx] = None;
            }
        }
    }
    chosen
}

/// Drives PCRD-opt across every code block of a tile-component's
/// resolutions for one target byte budget, returning the per-block
/// inclusion chosen for this layer.
pub fn plan_layer(resolutions: &[crate::jpeg2000::image::Resolution], byte_budget: usize) -> Vec<Option<Inclusion>> {
    let mut hulls = Vec::new();
    for resolution in resolutions {
        for precinct in &resolution.precincts {
            for (subband, blocks) in resolution.subbands.iter().zip(precinct.code_blocks.iter()) {
                for block in blocks {
                    hulls.push(convex_hull(&block.passes, subband.energy_gain()));
                }
            }
        }
    }
    select_layer(&hulls, byte_budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::tier1::PassType;

    fn passes(bytes: &[usize]) -> Vec<PassRecord> {
        bytes
            .iter()
            .enumerate()
            .map(|(i, &b)| PassRecord {
                pass_type: PassType::Cleanup,
                bit_plane: (bytes.len() - i) as u8,
                cumulative_bytes: b,
            })
            .collect()
    }

    #[test]
    fn convex_hull_is_non_decreasing_in_rate() {
        let p = passes(&[10, 20, 35, 60]);
        let hull = convex_hull(&p, 1.0);
        let mut last = 0;
        for point in &hull {
            assert!(point.rate >= last);
            last = point.rate;
        }
    }

    #[test]
    fn select_layer_respects_budget() {
        let p1 = convex_hull(&passes(&[5, 15, 40]), 1.0);
        let p2 = convex_hull(&passes(&[8, 22, 55]), 1.0 / 1.6651);
        let hulls = vec![p1, p2];
        let chosen = select_layer(&hulls, 50);
        let total: usize = chosen.iter().flatten().map(|i| i.rate).sum();
        assert!(total <= 50);
    }

    #[test]
    fn zero_budget_selects_nothing() {
        let hulls = vec![convex_hull(&passes(&[5, 15, 40]), 1.0)];
        let chosen = select_layer(&hulls, 0);
        assert!(chosen.iter().all(|c| c.is_none()));
    }
}
