//! Window clustering for the minimum-neighbors filter.
//!
//! Raw detections at neighboring positions and scales pile up around a real
//! object. Windows of similar position and size are merged into clusters,
//! clusters smaller than `min_neighbors` are dropped, and each surviving
//! cluster is reported as the rounded average of its members.

use crate::shared::bounding_box::BoundingBox;

/// Two windows belong together when their corners sit within 20% of the
/// first window's width and their widths are within 20% of each other.
fn similar(a: &BoundingBox, b: &BoundingBox) -> bool {
    let delta = (a.width as f64 * 0.2).round() as i32;
    b.x >= a.x - delta
        && b.x <= a.x + delta
        && b.y >= a.y - delta
        && b.y <= a.y + delta
        && b.width <= (a.width as f64 * 1.2).round() as i32
        && (b.width as f64 * 1.2).round() as i32 >= a.width
}

fn find(parents: &mut [usize], index: usize) -> usize {
    let mut index = index;
    while parents[index] != index {
        parents[index] = parents[parents[index]];
        index = parents[index];
    }
    index
}

fn union(parents: &mut [usize], a: usize, b: usize) {
    let root_a = find(parents, a);
    let root_b = find(parents, b);
    if root_a != root_b {
        parents[root_b] = root_a;
    }
}

pub fn group_windows(windows: &[BoundingBox], min_neighbors: usize) -> Vec<BoundingBox> {
    if windows.is_empty() {
        return Vec::new();
    }

    let mut parents: Vec<usize> = (0..windows.len()).collect();
    for a in 0..windows.len() {
        for b in (a + 1)..windows.len() {
            if similar(&windows[a], &windows[b]) {
                union(&mut parents, a, b);
            }
        }
    }

    // Clusters keep the order in which their first member was scanned.
    let mut roots: Vec<usize> = Vec::new();
    let mut sums: Vec<[i64; 4]> = Vec::new();
    let mut counts: Vec<i64> = Vec::new();
    for index in 0..windows.len() {
        let root = find(&mut parents, index);
        let slot = match roots.iter().position(|&r| r == root) {
            Some(slot) => slot,
            None => {
                roots.push(root);
                sums.push([0; 4]);
                counts.push(0);
                roots.len() - 1
            }
        };
        let window = &windows[index];
        sums[slot][0] += i64::from(window.x);
        sums[slot][1] += i64::from(window.y);
        sums[slot][2] += i64::from(window.width);
        sums[slot][3] += i64::from(window.height);
        counts[slot] += 1;
    }

    let mut grouped = Vec::new();
    for (slot, count) in counts.iter().copied().enumerate() {
        if (count as usize) < min_neighbors.max(1) {
            continue;
        }
        let average = |sum: i64| ((2 * sum + count) / (2 * count)) as i32;
        grouped.push(BoundingBox {
            x: average(sums[slot][0]),
            y: average(sums[slot][1]),
            width: average(sums[slot][2]),
            height: average(sums[slot][3]),
        });
    }
    grouped
}
