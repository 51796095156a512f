use crate::combiner::normalize;
use crate::error::{Result, VectorStoreError};
use crate::local::splitmix64;
use crate::types::{JointVector, Neighbor};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub const DEFAULT_TREES: usize = 5;
pub const DEFAULT_LEAF_SIZE: usize = 16;
const DEFAULT_SEED: u64 = 0x6c6f_6f6b_616c_696b;
/// Candidates inspected per requested neighbor per tree when no budget is given.
const SEARCH_K_FACTOR: usize = 4;
const SPLIT_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub trees: usize,
    pub leaf_size: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            trees: DEFAULT_TREES,
            leaf_size: DEFAULT_LEAF_SIZE,
            seed: DEFAULT_SEED,
        }
    }
}

/// One node of a random-projection tree. Node 0 is the root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        items: Vec<u32>,
    },
    /// Hyperplane equidistant from two pivot points; items closer to `pivot_a`
    /// descend into `near_a`.
    Split {
        pivot_a: u32,
        pivot_b: u32,
        near_a: u32,
        near_b: u32,
    },
    /// Pivots were indistinguishable; items were divided in half.
    Even {
        left: u32,
        right: u32,
    },
}

/// Approximate nearest-neighbor index over angular distance, built as a forest
/// of random-projection trees.
///
/// Vectors are stored unit-normalized; distance is the Euclidean distance
/// between unit vectors, so it lies in `[0, 2]` and an exact match scores `0`.
#[derive(Clone, Debug)]
pub struct AnnIndex {
    dimension: usize,
    params: ForestParams,
    vectors: Vec<f32>,
    trees: Vec<Vec<Node>>,
}

struct Rng(u64);

impl Rng {
    fn below(&mut self, n: usize) -> usize {
        (splitmix64(&mut self.0) % n as u64) as usize
    }
}

impl AnnIndex {
    /// Build the forest. Ordinal `i` is the position of `vectors[i]`.
    pub fn build(dimension: usize, vectors: &[JointVector], params: ForestParams) -> Result<Self> {
        if dimension == 0 {
            return Err(VectorStoreError::Other("index dimension must be non-zero".into()));
        }
        if params.trees == 0 || params.leaf_size == 0 {
            return Err(VectorStoreError::Other(
                "forest needs at least one tree and a non-zero leaf size".into(),
            ));
        }
        if u32::try_from(vectors.len()).is_err() {
            return Err(VectorStoreError::Other(format!(
                "too many vectors for one index: {}",
                vectors.len()
            )));
        }

        let mut flat = Vec::with_capacity(vectors.len() * dimension);
        for (ordinal, vector) in vectors.iter().enumerate() {
            if vector.dimension() != dimension {
                return Err(VectorStoreError::dimension(
                    format!("index vector {ordinal}"),
                    dimension,
                    vector.dimension(),
                ));
            }
            flat.extend(normalize(vector.as_slice()).vector);
        }

        let mut index = Self {
            dimension,
            params,
            vectors: flat,
            trees: Vec::with_capacity(params.trees),
        };
        for tree in 0..params.trees {
            let mut rng = Rng(params.seed ^ (tree as u64).wrapping_mul(0xA24B_AED4_963E_E407));
            let nodes = index.build_tree(&mut rng);
            index.trees.push(nodes);
        }
        log::debug!(
            "Built ANN forest: {} vectors, dim {}, {} trees, {} nodes",
            index.len(),
            dimension,
            params.trees,
            index.trees.iter().map(Vec::len).sum::<usize>()
        );
        Ok(index)
    }

    /// Reassemble an index read back from disk, checking structural integrity.
    pub fn from_parts(
        dimension: usize,
        params: ForestParams,
        vectors: Vec<f32>,
        trees: Vec<Vec<Node>>,
    ) -> Result<Self> {
        if dimension == 0 || vectors.len() % dimension != 0 {
            return Err(VectorStoreError::IndexCorruption(format!(
                "vector payload of {} floats does not divide into dimension {dimension}",
                vectors.len()
            )));
        }
        let count = vectors.len() / dimension;
        if count > 0 && trees.is_empty() {
            return Err(VectorStoreError::IndexCorruption(
                "index has vectors but no trees".to_string(),
            ));
        }
        for (t, nodes) in trees.iter().enumerate() {
            if nodes.is_empty() {
                return Err(VectorStoreError::IndexCorruption(format!("tree {t} is empty")));
            }
            let item_ok = |idx: u32| (idx as usize) < count;
            // Children always sit after their parent and have exactly one
            // parent, so every walk from the root terminates.
            let mut has_parent = vec![false; nodes.len()];
            for (slot, node) in nodes.iter().enumerate() {
                let (items_ok, children) = match node {
                    Node::Leaf { items } => (items.iter().all(|i| item_ok(*i)), None),
                    Node::Split {
                        pivot_a,
                        pivot_b,
                        near_a,
                        near_b,
                    } => (
                        item_ok(*pivot_a) && item_ok(*pivot_b),
                        Some([*near_a, *near_b]),
                    ),
                    Node::Even { left, right } => (true, Some([*left, *right])),
                };
                if !items_ok {
                    return Err(VectorStoreError::IndexCorruption(format!(
                        "tree {t} node {slot} references an out-of-range item"
                    )));
                }
                for child in children.into_iter().flatten() {
                    let child = child as usize;
                    if child <= slot || child >= nodes.len() || has_parent[child] {
                        return Err(VectorStoreError::IndexCorruption(format!(
                            "tree {t} node {slot} has an invalid child {child}"
                        )));
                    }
                    has_parent[child] = true;
                }
            }
        }
        Ok(Self {
            dimension,
            params,
            vectors,
            trees,
        })
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub const fn params(&self) -> ForestParams {
        self.params
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len() / self.dimension
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Stored unit vector for `ordinal`.
    #[must_use]
    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    pub(crate) fn unit_vectors(&self) -> &[f32] {
        &self.vectors
    }

    pub(crate) fn trees(&self) -> &[Vec<Node>] {
        &self.trees
    }

    /// Top-`k` neighbors with the default candidate budget.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let budget = k
            .saturating_mul(self.trees.len())
            .saturating_mul(SEARCH_K_FACTOR);
        self.search_with_budget(query, k, budget)
    }

    /// Top-`k` neighbors after inspecting at least `search_k` candidates (or all
    /// of them). Returns `min(k, len)` hits sorted by ascending distance; equal
    /// distances keep candidate discovery order.
    pub fn search_with_budget(
        &self,
        query: &[f32],
        k: usize,
        search_k: usize,
    ) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::dimension(
                "query vector",
                self.dimension,
                query.len(),
            ));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let query = normalize(query).vector;
        // No search can yield more candidates than there are vectors.
        let budget = search_k.max(k).min(self.len());

        let mut heap = BinaryHeap::with_capacity(self.trees.len() * 2);
        for tree in 0..self.trees.len() {
            heap.push(Pending {
                priority: f64::INFINITY,
                tree,
                node: 0,
            });
        }

        let mut seen = vec![false; self.len()];
        let mut candidates = Vec::with_capacity(budget);
        while candidates.len() < budget {
            let Some(pending) = heap.pop() else {
                break;
            };
            match &self.trees[pending.tree][pending.node] {
                Node::Leaf { items } => {
                    for &item in items {
                        let ordinal = item as usize;
                        if !seen[ordinal] {
                            seen[ordinal] = true;
                            candidates.push(ordinal);
                        }
                    }
                }
                Node::Split {
                    pivot_a,
                    pivot_b,
                    near_a,
                    near_b,
                } => {
                    let margin = self.margin(&query, *pivot_a as usize, *pivot_b as usize);
                    heap.push(Pending {
                        priority: pending.priority.min(margin),
                        tree: pending.tree,
                        node: *near_a as usize,
                    });
                    heap.push(Pending {
                        priority: pending.priority.min(-margin),
                        tree: pending.tree,
                        node: *near_b as usize,
                    });
                }
                Node::Even { left, right } => {
                    for child in [*left, *right] {
                        heap.push(Pending {
                            priority: pending.priority,
                            tree: pending.tree,
                            node: child as usize,
                        });
                    }
                }
            }
        }

        let mut hits: Vec<Neighbor> = candidates
            .into_iter()
            .map(|ordinal| Neighbor {
                ordinal,
                distance: self.distance_to(&query, ordinal),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// Brute-force reference search over every stored vector.
    pub fn exact_search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search_with_budget(query, k, self.len())
    }

    fn distance_to(&self, unit_query: &[f32], ordinal: usize) -> f32 {
        let start = ordinal * self.dimension;
        let stored = &self.vectors[start..start + self.dimension];
        angular_distance(unit_query, stored)
    }

    /// Signed distance from the hyperplane between two pivots; positive on the
    /// `pivot_a` side.
    fn margin(&self, point: &[f32], pivot_a: usize, pivot_b: usize) -> f64 {
        let a = &self.vectors[pivot_a * self.dimension..(pivot_a + 1) * self.dimension];
        let b = &self.vectors[pivot_b * self.dimension..(pivot_b + 1) * self.dimension];
        let mut along = 0.0f64;
        let mut gap = 0.0f64;
        for ((p, x), y) in point.iter().zip(a).zip(b) {
            let diff = f64::from(*x) - f64::from(*y);
            along += f64::from(*p) * diff;
            gap += diff * diff;
        }
        if gap == 0.0 {
            return 0.0;
        }
        // |a| == |b| for unit vectors, so the plane passes through the origin.
        along / gap.sqrt()
    }

    fn build_tree(&self, rng: &mut Rng) -> Vec<Node> {
        let all: Vec<u32> = (0..self.len() as u32).collect();
        let mut nodes = vec![Node::Leaf { items: Vec::new() }];
        let mut work = vec![(0usize, all)];

        while let Some((slot, items)) = work.pop() {
            if items.len() <= self.params.leaf_size {
                nodes[slot] = Node::Leaf { items };
                continue;
            }
            let near_a = nodes.len();
            let near_b = near_a + 1;
            nodes.push(Node::Leaf { items: Vec::new() });
            nodes.push(Node::Leaf { items: Vec::new() });

            match self.split(&items, rng) {
                Some((pivot_a, pivot_b, side_a, side_b)) => {
                    nodes[slot] = Node::Split {
                        pivot_a,
                        pivot_b,
                        near_a: near_a as u32,
                        near_b: near_b as u32,
                    };
                    work.push((near_a, side_a));
                    work.push((near_b, side_b));
                }
                None => {
                    let mut left = items;
                    let right = left.split_off(left.len() / 2);
                    nodes[slot] = Node::Even {
                        left: near_a as u32,
                        right: near_b as u32,
                    };
                    work.push((near_a, left));
                    work.push((near_b, right));
                }
            }
        }
        nodes
    }

    fn split(&self, items: &[u32], rng: &mut Rng) -> Option<(u32, u32, Vec<u32>, Vec<u32>)> {
        for _ in 0..SPLIT_ATTEMPTS {
            let first = rng.below(items.len());
            let mut second = rng.below(items.len() - 1);
            if second >= first {
                second += 1;
            }
            let (pivot_a, pivot_b) = (items[first], items[second]);
            if self.vector(pivot_a as usize) == self.vector(pivot_b as usize) {
                continue;
            }

            let mut side_a = Vec::new();
            let mut side_b = Vec::new();
            let mut tie_to_a = true;
            for &item in items {
                let start = item as usize * self.dimension;
                let margin = self.margin(
                    &self.vectors[start..start + self.dimension],
                    pivot_a as usize,
                    pivot_b as usize,
                );
                let to_a = match margin.partial_cmp(&0.0) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Less) => false,
                    _ => {
                        tie_to_a = !tie_to_a;
                        tie_to_a
                    }
                };
                if to_a {
                    side_a.push(item);
                } else {
                    side_b.push(item);
                }
            }
            if !side_a.is_empty() && !side_b.is_empty() {
                return Some((pivot_a, pivot_b, side_a, side_b));
            }
        }
        None
    }
}

/// Euclidean distance between two unit vectors, accumulated in `f64`.
#[must_use]
pub fn angular_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}

struct Pending {
    priority: f64,
    tree: usize,
    node: usize,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.tree.cmp(&self.tree))
            .then_with(|| other.node.cmp(&self.node))
    }
}
