//! Per-bag nearest-neighbor indices.
//!
//! A [`BagIndex`] borrows one bag and answers "distance to the k-th
//! nearest neighbor" for every row of a query matrix. Distances are
//! squared L2 internally; the public query returns Euclidean distances.
//! Queries take `&self` and are safe to run concurrently; building is
//! single-threaded.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::str::FromStr;

use ndarray::{ArrayView1, ArrayView2};

use crate::{Error, Result};

/// Points per kd-tree leaf bucket.
const LEAF_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// Single kd-tree, exact when the leaf-check budget is unlimited.
    KdTree,
    /// Brute-force scan, always exact. The reference implementation for
    /// tests and the sane choice for high-dimensional bags.
    Linear,
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kdtree" | "kd" => Ok(IndexKind::KdTree),
            "linear" | "brute" => Ok(IndexKind::Linear),
            _ => Err(Error::invalid(format!("unknown index kind '{s}'"))),
        }
    }
}

enum Node {
    Split {
        dim: usize,
        value: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        start: usize,
        end: usize,
    },
}

pub struct BagIndex<'a> {
    points: ArrayView2<'a, f32>,
    kind: IndexKind,
    /// Permutation of row ids; kd-tree leaves reference ranges of it.
    order: Vec<u32>,
    nodes: Vec<Node>,
    root: usize,
}

impl<'a> BagIndex<'a> {
    pub fn build(points: ArrayView2<'a, f32>, kind: IndexKind) -> Result<Self> {
        if points.nrows() == 0 || points.ncols() == 0 {
            return Err(Error::invalid("cannot index an empty bag"));
        }
        let mut index = BagIndex {
            points,
            kind,
            order: Vec::new(),
            nodes: Vec::new(),
            root: 0,
        };
        if kind == IndexKind::KdTree {
            let mut order: Vec<u32> = (0..points.nrows() as u32).collect();
            index.root = index.build_node(&mut order, 0);
            index.order = order;
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Euclidean distance from every query row to its k-th nearest
    /// neighbor among the indexed points. `checks` caps the number of
    /// kd-tree leaves visited per query (`None` = exhaustive, exact).
    pub fn kth_distances(
        &self,
        query: ArrayView2<f32>,
        k: usize,
        checks: Option<usize>,
    ) -> Result<Vec<f32>> {
        let mut dists = self.kth_sq_distances(query, k, checks)?;
        for d in dists.iter_mut() {
            *d = d.sqrt();
        }
        Ok(dists)
    }

    /// Same as [`kth_distances`](Self::kth_distances) without the square
    /// root.
    pub fn kth_sq_distances(
        &self,
        query: ArrayView2<f32>,
        k: usize,
        checks: Option<usize>,
    ) -> Result<Vec<f32>> {
        if k == 0 {
            return Err(Error::invalid("k-NN query needs k >= 1"));
        }
        if k > self.len() {
            return Err(Error::invalid(format!(
                "k-NN query with k = {k} against a bag of {} points",
                self.len()
            )));
        }
        if query.ncols() != self.points.ncols() {
            return Err(Error::invalid(format!(
                "query dimension {} does not match indexed dimension {}",
                query.ncols(),
                self.points.ncols()
            )));
        }

        let mut out = Vec::with_capacity(query.nrows());
        let mut best = KthBest::new(k);
        for row in query.rows() {
            best.clear();
            match self.kind {
                IndexKind::Linear => {
                    for p in self.points.rows() {
                        best.offer(dist_sq(row, p));
                    }
                }
                IndexKind::KdTree => {
                    let mut leaves_left = checks.unwrap_or(usize::MAX);
                    self.search(self.root, row, &mut best, &mut leaves_left);
                }
            }
            out.push(best.kth());
        }
        Ok(out)
    }

    fn build_node(&mut self, order: &mut [u32], offset: usize) -> usize {
        if order.len() <= LEAF_SIZE {
            self.nodes.push(Node::Leaf {
                start: offset,
                end: offset + order.len(),
            });
            return self.nodes.len() - 1;
        }

        let dim = self.widest_dim(order);
        let mid = order.len() / 2;
        order.select_nth_unstable_by(mid, |&a, &b| {
            let va = self.points[[a as usize, dim]];
            let vb = self.points[[b as usize, dim]];
            va.partial_cmp(&vb).unwrap_or(Ordering::Equal)
        });
        let value = self.points[[order[mid] as usize, dim]];

        let (lo, hi) = order.split_at_mut(mid);
        let left = self.build_node(lo, offset);
        let right = self.build_node(hi, offset + mid);
        self.nodes.push(Node::Split {
            dim,
            value,
            left,
            right,
        });
        self.nodes.len() - 1
    }

    /// Dimension with the largest value spread over the given subset.
    fn widest_dim(&self, order: &[u32]) -> usize {
        let dims = self.points.ncols();
        let mut lo = vec![f32::INFINITY; dims];
        let mut hi = vec![f32::NEG_INFINITY; dims];
        for &id in order {
            for (d, &v) in self.points.row(id as usize).iter().enumerate() {
                if v < lo[d] {
                    lo[d] = v;
                }
                if v > hi[d] {
                    hi[d] = v;
                }
            }
        }
        let mut widest = 0;
        let mut spread = f32::NEG_INFINITY;
        for d in 0..dims {
            if hi[d] - lo[d] > spread {
                spread = hi[d] - lo[d];
                widest = d;
            }
        }
        widest
    }

    fn search(
        &self,
        node: usize,
        point: ArrayView1<f32>,
        best: &mut KthBest,
        leaves_left: &mut usize,
    ) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                // keep scanning past the budget until we have k candidates
                if *leaves_left == 0 && best.is_full() {
                    return;
                }
                *leaves_left = leaves_left.saturating_sub(1);
                for &id in &self.order[start..end] {
                    best.offer(dist_sq(point, self.points.row(id as usize)));
                }
            }
            Node::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = point[dim] - value;
                let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                self.search(near, point, best, leaves_left);
                if !best.is_full() || diff * diff < best.kth() {
                    self.search(far, point, best, leaves_left);
                }
            }
        }
    }
}

fn dist_sq(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Bounded max-heap keeping the k smallest squared distances seen so far.
struct KthBest {
    heap: BinaryHeap<OrdDist>,
    k: usize,
}

impl KthBest {
    fn new(k: usize) -> Self {
        KthBest {
            heap: BinaryHeap::with_capacity(k + 1),
            k,
        }
    }

    fn clear(&mut self) {
        self.heap.clear();
    }

    fn is_full(&self) -> bool {
        self.heap.len() == self.k
    }

    fn offer(&mut self, d: f32) {
        if self.heap.len() < self.k {
            self.heap.push(OrdDist(d));
        } else if let Some(worst) = self.heap.peek() {
            if d < worst.0 {
                self.heap.pop();
                self.heap.push(OrdDist(d));
            }
        }
    }

    /// Current k-th smallest distance; infinite until k candidates exist.
    fn kth(&self) -> f32 {
        if self.is_full() {
            self.heap.peek().map_or(f32::INFINITY, |d| d.0)
        } else {
            f32::INFINITY
        }
    }
}

struct OrdDist(f32);

impl PartialEq for OrdDist {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrdDist {}

impl PartialOrd for OrdDist {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdDist {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}
