//! In-memory form of a trained Viola-Jones cascade.
//!
//! A cascade is an ordered list of boosted stages; each stage sums the
//! responses of small decision trees over rectangular haar features and
//! rejects the window as soon as one stage falls below its threshold.
//! Feature geometry is stored in trained-window units and scaled at
//! evaluation time.

use super::integral::IntegralImage;

/// A rectangle of the trained window together with its feature weight.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

/// A haar feature: two or three weighted rects whose signed sums are
/// combined into one response.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub rects: Vec<WeightedRect>,
}

/// Where a node comparison leads: a leaf contribution or another node of
/// the same tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Branch {
    Value(f32),
    Node(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    pub feature: Feature,
    pub threshold: f32,
    pub left: Branch,
    pub right: Branch,
}

/// One weak classifier. Node branches point strictly forward, which the
/// loader enforces, so evaluation always terminates.
#[derive(Clone, Debug, PartialEq)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    pub threshold: f32,
    pub trees: Vec<Tree>,
}

/// A complete loaded cascade, immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct CascadeModel {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
}

impl CascadeModel {
    pub fn new(window_width: u32, window_height: u32, stages: Vec<Stage>) -> Self {
        Self {
            window_width,
            window_height,
            stages,
        }
    }

    /// Width of the trained detection window, the minimum detectable size.
    pub fn window_width(&self) -> u32 {
        self.window_width
    }

    pub fn window_height(&self) -> u32 {
        self.window_height
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub(crate) fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Runs every stage against the window at (x, y) of size
    /// `win_width` x `win_height`, scanned at `scale` times the trained
    /// window. Feature responses are normalized by window area and by the
    /// window's pixel standard deviation, so the trained thresholds hold
    /// under varying lighting.
    pub fn passes(
        &self,
        integral: &IntegralImage,
        x: usize,
        y: usize,
        win_width: usize,
        win_height: usize,
        scale: f64,
    ) -> bool {
        let inv_area = 1.0 / (win_width * win_height) as f64;
        let total = integral.window_sum(x, y, x + win_width, y + win_height) as f64;
        let total_sq = integral.window_square_sum(x, y, x + win_width, y + win_height) as f64;
        let mean = total * inv_area;
        let variance = total_sq * inv_area - mean * mean;
        let stddev = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut stage_sum = 0.0;
            for tree in &stage.trees {
                stage_sum += evaluate_tree(tree, integral, x, y, scale, inv_area, stddev);
            }
            if stage_sum < stage.threshold as f64 {
                return false;
            }
        }
        true
    }
}

fn evaluate_tree(
    tree: &Tree,
    integral: &IntegralImage,
    x: usize,
    y: usize,
    scale: f64,
    inv_area: f64,
    stddev: f64,
) -> f64 {
    let mut index = 0;
    loop {
        let node = &tree.nodes[index];
        let response = feature_sum(&node.feature, integral, x, y, scale) * inv_area;
        let branch = if response < node.threshold as f64 * stddev {
            node.left
        } else {
            node.right
        };
        match branch {
            Branch::Value(value) => return value as f64,
            Branch::Node(next) => index = next,
        }
    }
}

fn feature_sum(feature: &Feature, integral: &IntegralImage, x: usize, y: usize, scale: f64) -> f64 {
    let mut total = 0.0;
    for rect in &feature.rects {
        let rx = x + (rect.x as f64 * scale).round() as usize;
        let ry = y + (rect.y as f64 * scale).round() as usize;
        let rw = (rect.width as f64 * scale).round() as usize;
        let rh = (rect.height as f64 * scale).round() as usize;
        total += integral.window_sum(rx, ry, rx + rw, ry + rh) as f64 * rect.weight as f64;
    }
    total
}
