//! Ramer-Douglas-Peucker polyline simplification

use super::projection::Xy;

/// Distance from `p` to the segment `a`-`b`
pub fn point_segment_distance(p: Xy, a: Xy, b: Xy) -> f64 {
    let ab = b.sub(a);
    let len_sq = ab.dot(ab);
    if len_sq == 0.0 {
        return p.sub(a).length();
    }
    let t = (p.sub(a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.sub(a.add(ab.scale(t))).length()
}

/// Indices of the points kept by RDP at `tolerance` meters
///
/// First and last points are always kept. Iterative, so long recordings do
/// not grow the call stack.
pub fn simplify_indices(points: &[Xy], tolerance: f64) -> Vec<usize> {
    let n = points.len();
    if n <= 2 {
        return (0..n).collect();
    }

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;

    let mut stack = vec![(0usize, n - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let (a, b) = (points[start], points[end]);
        let mut max_dist = 0.0;
        let mut max_idx = start;
        for (i, p) in points.iter().enumerate().take(end).skip(start + 1) {
            let d = point_segment_distance(*p, a, b);
            if d > max_dist {
                max_dist = d;
                max_idx = i;
            }
        }
        if max_dist > tolerance {
            keep[max_idx] = true;
            stack.push((start, max_idx));
            stack.push((max_idx, end));
        }
    }

    keep.iter().enumerate().filter(|(_, k)| **k).map(|(i, _)| i).collect()
}
