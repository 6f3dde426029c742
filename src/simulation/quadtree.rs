use eframe::egui::{vec2, Vec2};

const LEAF_CAPACITY: usize = 8;
const MAX_DEPTH: usize = 12;

/// Square cell of the quadtree.
#[derive(Debug, Clone, Copy)]
pub(super) struct QuadBounds {
    pub(super) center: Vec2,
    pub(super) half_extent: f32,
}

impl QuadBounds {
    fn from_points(points: &[Vec2]) -> Option<Self> {
        let mut min = vec2(f32::INFINITY, f32::INFINITY);
        let mut max = vec2(f32::NEG_INFINITY, f32::NEG_INFINITY);

        for point in points {
            min = min.min(*point);
            max = max.max(*point);
        }

        if !min.x.is_finite() || !min.y.is_finite() || !max.x.is_finite() || !max.y.is_finite() {
            return None;
        }

        let center = (min + max) * 0.5;
        let span = (max - min).max(vec2(1.0, 1.0));
        Some(Self {
            center,
            half_extent: span.max_elem() * 0.5 + 1.0,
        })
    }

    fn child(self, quadrant: usize) -> Self {
        let quarter = self.half_extent * 0.5;
        let offset = match quadrant {
            0 => vec2(-quarter, -quarter),
            1 => vec2(quarter, -quarter),
            2 => vec2(-quarter, quarter),
            _ => vec2(quarter, quarter),
        };
        Self {
            center: self.center + offset,
            half_extent: quarter,
        }
    }

    fn quadrant_for(self, point: Vec2) -> usize {
        match (point.x >= self.center.x, point.y >= self.center.y) {
            (false, false) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (true, true) => 3,
        }
    }

    pub(super) fn min(self) -> Vec2 {
        self.center - vec2(self.half_extent, self.half_extent)
    }

    pub(super) fn max(self) -> Vec2 {
        self.center + vec2(self.half_extent, self.half_extent)
    }

    pub(super) fn side_length(self) -> f32 {
        self.half_extent * 2.0
    }
}

/// Quadtree node aggregating the points below it.
///
/// `center_of_mass` and `count` feed the Barnes-Hut approximation of the charge force,
/// `max_extent` (the largest item size below the cell) bounds the rectangle collision search.
pub(super) struct QuadNode {
    pub(super) bounds: QuadBounds,
    pub(super) center_of_mass: Vec2,
    pub(super) count: f32,
    pub(super) max_extent: Vec2,
    pub(super) indices: Vec<usize>,
    pub(super) children: [Option<Box<QuadNode>>; 4],
}

impl QuadNode {
    /// Builds a tree over points without size.
    pub(super) fn build(positions: &[Vec2]) -> Option<Self> {
        Self::build_sized(positions, &[])
    }

    /// Builds a tree over items centered at `positions` with the given `extents`.
    pub(super) fn build_sized(positions: &[Vec2], extents: &[Vec2]) -> Option<Self> {
        let bounds = QuadBounds::from_points(positions)?;
        let indices = (0..positions.len()).collect::<Vec<_>>();
        Some(Self::build_node(bounds, indices, positions, extents, 0))
    }

    fn build_node(
        bounds: QuadBounds,
        indices: Vec<usize>,
        positions: &[Vec2],
        extents: &[Vec2],
        depth: usize,
    ) -> Self {
        let mut center_of_mass = Vec2::ZERO;
        let mut max_extent = Vec2::ZERO;
        for &index in &indices {
            center_of_mass += positions[index];
            if let Some(extent) = extents.get(index) {
                max_extent = max_extent.max(*extent);
            }
        }

        let count = indices.len() as f32;
        if count > 0.0 {
            center_of_mass /= count;
        }

        let mut node = Self {
            bounds,
            center_of_mass,
            count,
            max_extent,
            indices,
            children: std::array::from_fn(|_| None),
        };

        if depth >= MAX_DEPTH || node.indices.len() <= LEAF_CAPACITY {
            return node;
        }

        let mut buckets = std::array::from_fn::<_, 4, _>(|_| Vec::new());
        for &index in &node.indices {
            buckets[bounds.quadrant_for(positions[index])].push(index);
        }

        if buckets.iter().filter(|bucket| !bucket.is_empty()).count() <= 1 {
            return node;
        }

        for (quadrant, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            node.children[quadrant] = Some(Box::new(Self::build_node(
                bounds.child(quadrant),
                bucket,
                positions,
                extents,
                depth + 1,
            )));
        }
        node.indices.clear();
        node
    }

    pub(super) fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    pub(super) fn children(&self) -> impl Iterator<Item = &QuadNode> {
        self.children.iter().filter_map(|child| child.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_indices(node: &QuadNode, out: &mut Vec<usize>) {
        out.extend(&node.indices);
        for child in node.children() {
            collect_indices(child, out);
        }
    }

    #[test]
    fn test_empty_input_builds_nothing() {
        assert!(QuadNode::build(&[]).is_none());
    }

    #[test]
    fn test_every_point_lands_in_one_leaf() {
        let positions: Vec<Vec2> = (0..40)
            .map(|i| vec2((i % 7) as f32 * 13.0, (i / 7) as f32 * 29.0))
            .collect();
        let tree = QuadNode::build(&positions).unwrap();
        assert!(!tree.is_leaf());
        assert_eq!(tree.count, 40.0);

        let mut indices = Vec::new();
        collect_indices(&tree, &mut indices);
        indices.sort_unstable();
        assert_eq!(indices, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_max_extent_covers_children() {
        let positions = [vec2(0.0, 0.0), vec2(100.0, 100.0)];
        let extents = [vec2(10.0, 50.0), vec2(30.0, 5.0)];
        let tree = QuadNode::build_sized(&positions, &extents).unwrap();
        assert_eq!(tree.max_extent, vec2(30.0, 50.0));
    }
}
