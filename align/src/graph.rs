//! Stitch graph: images as nodes, verified pairs as edges weighted by inliers.

use pano_core::{Correspondence, Transform, TransformKind};
use pano_features::PairGeometry;
use tracing::debug;

use crate::{AlignError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphNode {
    pub index: usize,
    pub width: u32,
    pub height: u32,
}

impl GraphNode {
    pub fn new(index: usize, width: u32, height: u32) -> Self {
        Self { index, width, height }
    }
}

/// Edge between images `i < j`; `transform` maps image `j` into image `i`.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub i: usize,
    pub j: usize,
    pub transform: Transform,
    pub weight: usize,
    /// `src` in image `j`, `dst` in image `i`.
    pub correspondences: Vec<Correspondence>,
}

impl GraphEdge {
    fn from_pair(pair: &PairGeometry) -> Option<Self> {
        if pair.i < pair.j {
            return Some(Self {
                i: pair.i,
                j: pair.j,
                transform: pair.transform,
                weight: pair.inliers.len(),
                correspondences: pair.inliers.clone(),
            });
        }
        Some(Self {
            i: pair.j,
            j: pair.i,
            transform: pair.transform.inverse()?,
            weight: pair.inliers.len(),
            correspondences: pair.inliers.iter().map(Correspondence::swapped).collect(),
        })
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct StitchGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    kind: TransformKind,
}

impl StitchGraph {
    /// Keeps every valid pair whose inlier count reaches `min_inliers` and
    /// whose endpoints are both in `nodes`. Nodes and edges are stored sorted
    /// by image index.
    pub fn build(
        nodes: &[GraphNode],
        pairs: &[PairGeometry],
        min_inliers: usize,
        kind: TransformKind,
    ) -> Self {
        let mut nodes = nodes.to_vec();
        nodes.sort_by_key(|n| n.index);
        nodes.dedup_by_key(|n| n.index);

        let contains = |index: usize| nodes.binary_search_by_key(&index, |n| n.index).is_ok();
        let mut edges: Vec<GraphEdge> = pairs
            .iter()
            .filter(|p| p.i != p.j && p.transform.valid && p.inliers.len() >= min_inliers)
            .filter(|p| contains(p.i) && contains(p.j))
            .filter_map(GraphEdge::from_pair)
            .collect();
        edges.sort_by_key(|e| (e.i, e.j));
        edges.dedup_by_key(|e| (e.i, e.j));

        debug!(nodes = nodes.len(), edges = edges.len(), "built stitch graph");
        Self { nodes, edges, kind }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    fn position(&self, index: usize) -> Option<usize> {
        self.nodes.binary_search_by_key(&index, |n| n.index).ok()
    }

    /// Sum of inlier counts over the edges touching `index`.
    pub fn total_weight(&self, index: usize) -> usize {
        self.edges
            .iter()
            .filter(|e| e.i == index || e.j == index)
            .map(|e| e.weight)
            .sum()
    }

    fn groups(&self) -> Vec<Vec<usize>> {
        let mut set = DisjointSet::new(self.nodes.len());
        for e in &self.edges {
            if let (Some(a), Some(b)) = (self.position(e.i), self.position(e.j)) {
                set.union(a, b);
            }
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut slot_of_root = vec![usize::MAX; self.nodes.len()];
        for pos in 0..self.nodes.len() {
            let root = set.find(pos);
            if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = groups.len();
                groups.push(Vec::new());
            }
            groups[slot_of_root[root]].push(self.nodes[pos].index);
        }
        groups
    }

    /// Images that share no edge with any other image.
    pub fn isolated(&self) -> Vec<usize> {
        self.groups()
            .into_iter()
            .filter(|g| g.len() == 1)
            .map(|g| g[0])
            .collect()
    }

    /// Connected components with at least two images, ordered by their
    /// lowest image index, each with chained initial transforms.
    pub fn components(&self) -> Result<Vec<Component>> {
        self.groups()
            .into_iter()
            .filter(|g| g.len() >= 2)
            .map(|members| self.component(members))
            .collect()
    }

    fn component(&self, members: Vec<usize>) -> Result<Component> {
        let nodes: Vec<GraphNode> = members
            .iter()
            .map(|&index| {
                self.position(index)
                    .map(|p| self.nodes[p])
                    .ok_or(AlignError::UnknownImage(index))
            })
            .collect::<Result<_>>()?;
        let edges: Vec<GraphEdge> = self
            .edges
            .iter()
            .filter(|e| members.binary_search(&e.i).is_ok())
            .cloned()
            .collect();

        // highest total weight, ties to the lowest index
        let mut reference = members[0];
        let mut best_weight = self.total_weight(reference);
        for &index in &members[1..] {
            let weight = self.total_weight(index);
            if weight > best_weight {
                reference = index;
                best_weight = weight;
            }
        }

        let (initial, tree) = chain_transforms(&members, &edges, reference, self.kind)?;
        debug!(
            images = members.len(),
            edges = edges.len(),
            reference,
            "component ready"
        );

        Ok(Component {
            nodes,
            reference,
            edges,
            tree,
            initial,
            kind: self.kind,
        })
    }
}

/// Prim's maximum spanning tree from `reference`. Each image's transform into
/// the reference frame is its parent's composed with the tree edge.
fn chain_transforms(
    members: &[usize],
    edges: &[GraphEdge],
    reference: usize,
    kind: TransformKind,
) -> Result<(Vec<Transform>, Vec<(usize, usize)>)> {
    let pos = |index: usize| members.binary_search(&index).map_err(|_| AlignError::UnknownImage(index));

    let mut placed: Vec<Option<Transform>> = vec![None; members.len()];
    placed[pos(reference)?] = Some(Transform::identity(kind));
    let mut tree = Vec::with_capacity(members.len() - 1);

    loop {
        let mut best: Option<&GraphEdge> = None;
        for e in edges {
            let crosses = placed[pos(e.i)?].is_some() != placed[pos(e.j)?].is_some();
            // edges are sorted by (i, j), so strict comparison keeps the lowest on ties
            if crosses && best.map_or(true, |b| e.weight > b.weight) {
                best = Some(e);
            }
        }
        let Some(e) = best else { break };

        let (pi, pj) = (pos(e.i)?, pos(e.j)?);
        let singular = AlignError::SingularTransform { i: e.i, j: e.j };
        match (placed[pi], placed[pj]) {
            (Some(to_ref), None) => {
                placed[pj] = Some(to_ref.compose(&e.transform).ok_or(singular)?);
            }
            (None, Some(to_ref)) => {
                let inverse = e.transform.inverse().ok_or(singular.clone())?;
                placed[pi] = Some(to_ref.compose(&inverse).ok_or(singular)?);
            }
            _ => break,
        }
        tree.push((e.i, e.j));
    }

    let initial = placed
        .into_iter()
        .zip(members)
        .map(|(t, &index)| t.ok_or(AlignError::UnknownImage(index)))
        .collect::<Result<Vec<_>>>()?;
    Ok((initial, tree))
}

/// One independent panorama.
#[derive(Debug, Clone)]
pub struct Component {
    /// Sorted by image index.
    pub nodes: Vec<GraphNode>,
    pub reference: usize,
    pub edges: Vec<GraphEdge>,
    /// Spanning-tree edges `(i, j)` in the order they were added.
    pub tree: Vec<(usize, usize)>,
    /// Per node, maps the image into the reference frame.
    pub initial: Vec<Transform>,
    pub kind: TransformKind,
}

impl Component {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.nodes.iter().map(|n| n.index).collect()
    }

    pub fn position(&self, index: usize) -> Option<usize> {
        self.nodes.binary_search_by_key(&index, |n| n.index).ok()
    }

    pub fn max_dimension(&self) -> u32 {
        self.nodes
            .iter()
            .map(|n| n.width.max(n.height))
            .max()
            .unwrap_or(1)
    }

    pub fn num_correspondences(&self) -> usize {
        self.edges.iter().map(|e| e.correspondences.len()).sum()
    }
}
