use indicatif::ParallelProgressIterator;
use log::info;
use ndarray::prelude::*;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use rayon::prelude::*;
use std::collections::HashMap;

const DEFAULT_BLOCK_SIZE: usize = 1000;

pub struct KnnGraph {
    /// Sorted edge list (i < j), deduplicated
    pub edges: Vec<(usize, usize)>,
    /// Edge distances/weights, parallel to `edges`
    pub distances: Vec<f64>,
    /// Number of nodes
    pub n_nodes: usize,
}

pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
    /// If true, keep only reciprocal edges (i→j AND j→i).
    /// If false, keep union edges (i→j OR j→i), using min distance.
    pub reciprocal: bool,
}

impl Default for KnnGraphArgs {
    fn default() -> Self {
        Self {
            knn: 5,
            block_size: DEFAULT_BLOCK_SIZE,
            reciprocal: false,
        }
    }
}

impl KnnGraph {
    /// Build an exact KNN graph from a precomputed dissimilarity matrix.
    ///
    /// * `dist` - square matrix (n x n) of non-negative dissimilarities
    /// * `args` - KNN graph construction parameters
    pub fn from_distance_matrix(dist: &Array2<f64>, args: &KnnGraphArgs) -> anyhow::Result<Self> {
        let nn = dist.nrows();
        if nn != dist.ncols() {
            return Err(anyhow::anyhow!(
                "distance matrix must be square: {} x {}",
                dist.nrows(),
                dist.ncols()
            ));
        }
        if nn < 2 {
            return Err(anyhow::anyhow!("need at least two points for a kNN graph"));
        }
        if args.knn == 0 {
            return Err(anyhow::anyhow!("knn must be positive"));
        }

        let nquery = args.knn.min(nn - 1);

        /////////////////////////////////////////////////////////////////
        // step 1: searching nearest neighbours                        //
        /////////////////////////////////////////////////////////////////

        let jobs = create_jobs(nn, args.block_size);
        let njobs = jobs.len() as u64;

        let directed: HashMap<(usize, usize), f64> = jobs
            .into_par_iter()
            .progress_count(njobs)
            .flat_map_iter(|(lb, ub)| {
                (lb..ub).flat_map(move |i| {
                    let mut others = (0..nn)
                        .filter(|&j| j != i)
                        .map(|j| (dist[(i, j)], j))
                        .collect::<Vec<_>>();
                    others.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                    others
                        .into_iter()
                        .take(nquery)
                        .map(move |(d_ij, j)| ((i, j), d_ij))
                })
            })
            .collect();

        info!("{} triplets by kNN matching", directed.len());

        ///////////////////////////////////////////////////
        // step 2: edge filtering (reciprocal or union) //
        ///////////////////////////////////////////////////

        let mut edges: Vec<((usize, usize), f64)> = directed
            .iter()
            .filter_map(|(&(i, j), &d_ij)| {
                let reverse = directed.get(&(j, i)).copied();
                if args.reciprocal {
                    match reverse {
                        Some(d_ji) if i < j => Some(((i, j), d_ij.min(d_ji))),
                        _ => None,
                    }
                } else if i < j {
                    Some(((i, j), d_ij.min(reverse.unwrap_or(d_ij))))
                } else if reverse.is_none() {
                    Some(((j, i), d_ij))
                } else {
                    None
                }
            })
            .collect();

        edges.sort_by_key(|&(ij, _)| ij);
        edges.dedup_by_key(|&mut (ij, _)| ij);

        info!(
            "{} edges after {} matching",
            edges.len(),
            if args.reciprocal {
                "reciprocal"
            } else {
                "union"
            }
        );

        let (edge_pairs, distances): (Vec<_>, Vec<_>) = edges.into_iter().unzip();

        Ok(KnnGraph {
            edges: edge_pairs,
            distances,
            n_nodes: nn,
        })
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    fn to_petgraph(&self, unit_weights: bool) -> UnGraph<(), f64> {
        let mut graph = UnGraph::<(), f64>::with_capacity(self.n_nodes, self.edges.len());
        for _ in 0..self.n_nodes {
            graph.add_node(());
        }
        for (&(i, j), &d) in self.edges.iter().zip(self.distances.iter()) {
            let w = if unit_weights { 1.0 } else { d };
            graph.add_edge(NodeIndex::new(i), NodeIndex::new(j), w);
        }
        graph
    }

    /// Number of connected components
    pub fn num_components(&self) -> usize {
        petgraph::algo::connected_components(&self.to_petgraph(true))
    }

    /// All-pairs shortest-path (geodesic) distances by Dijkstra from
    /// every node. Unreachable pairs are `f64::INFINITY`.
    ///
    /// * `unit_weights` - count hops instead of summing edge distances
    pub fn geodesic_distances(&self, unit_weights: bool) -> Array2<f64> {
        let nn = self.n_nodes;
        let graph = self.to_petgraph(unit_weights);

        let mut geo = Array2::<f64>::from_elem((nn, nn), f64::INFINITY);
        geo.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(s, mut g_s)| {
                let reached = petgraph::algo::dijkstra(&graph, NodeIndex::new(s), None, |e| {
                    *e.weight()
                });
                for (node, d) in reached {
                    g_s[node.index()] = d;
                }
            });

        // summation order differs between the two directions
        for i in 0..nn {
            geo[(i, i)] = 0.0;
            for j in (i + 1)..nn {
                let d = geo[(i, j)].min(geo[(j, i)]);
                geo[(i, j)] = d;
                geo[(j, i)] = d;
            }
        }
        geo
    }
}

fn create_jobs(ntot: usize, block_size: usize) -> Vec<(usize, usize)> {
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DistanceOps;
    use approx::assert_abs_diff_eq;

    /// Two tight clusters of 5 points each in 2D, well separated
    fn two_cluster_matrix() -> Array2<f64> {
        array![
            // Cluster A near origin
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [0.1, 0.1],
            [0.05, 0.05],
            // Cluster B far away
            [10.0, 10.0],
            [10.1, 10.0],
            [10.0, 10.1],
            [10.1, 10.1],
            [10.05, 10.05],
        ]
    }

    fn args(knn: usize, reciprocal: bool) -> KnnGraphArgs {
        KnnGraphArgs {
            knn,
            block_size: 3,
            reciprocal,
        }
    }

    #[test]
    fn test_edges_canonical_and_nonnegative() {
        let dist = two_cluster_matrix().pairwise_euclidean_rows();
        let graph = KnnGraph::from_distance_matrix(&dist, &args(4, true)).unwrap();

        assert_eq!(graph.num_nodes(), 10);
        assert!(graph.num_edges() > 0);
        assert_eq!(graph.edges.len(), graph.distances.len());

        for &(i, j) in &graph.edges {
            assert!(i < j, "Edge ({}, {}) not canonical", i, j);
        }
        for &d in &graph.distances {
            assert!(d >= 0.0);
        }
    }

    #[test]
    fn test_two_clusters_no_cross_edges() {
        let dist = two_cluster_matrix().pairwise_euclidean_rows();
        let graph = KnnGraph::from_distance_matrix(&dist, &args(4, false)).unwrap();

        for &(i, j) in &graph.edges {
            let same_cluster = (i < 5 && j < 5) || (i >= 5 && j >= 5);
            assert!(same_cluster, "Cross-cluster edge ({}, {})", i, j);
        }
        assert_eq!(graph.num_components(), 2);

        let geo = graph.geodesic_distances(false);
        assert!(geo[(0, 9)].is_infinite());
        assert!(geo[(0, 4)].is_finite());
    }

    #[test]
    fn test_reciprocal_edges_within_union() {
        let dist = two_cluster_matrix().pairwise_euclidean_rows();
        let mutual = KnnGraph::from_distance_matrix(&dist, &args(3, true)).unwrap();
        let union = KnnGraph::from_distance_matrix(&dist, &args(3, false)).unwrap();

        assert!(mutual.num_edges() <= union.num_edges());
        for &(i, j) in &mutual.edges {
            assert!(union.edges.contains(&(i, j)));
        }
        // every node keeps at least its 3 nearest in the union graph
        for node in 0..union.num_nodes() {
            let degree = union
                .edges
                .iter()
                .filter(|&&(i, j)| i == node || j == node)
                .count();
            assert!(degree >= 3);
        }
    }

    #[test]
    fn test_chain_geodesics() {
        // points on a line: each only links to its immediate neighbours
        let xx = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
        let dist = xx.pairwise_euclidean_rows();
        let graph = KnnGraph::from_distance_matrix(&dist, &args(1, false)).unwrap();
        assert_eq!(graph.num_edges(), 4);
        assert_eq!(graph.num_components(), 1);

        let geo = graph.geodesic_distances(false);
        for i in 0..5 {
            assert_eq!(geo[(i, i)], 0.0);
            for j in 0..5 {
                assert_abs_diff_eq!(geo[(i, j)], (i as f64 - j as f64).abs());
                assert_eq!(geo[(i, j)], geo[(j, i)]);
            }
        }

        let hops = graph.geodesic_distances(true);
        assert_abs_diff_eq!(hops[(0, 4)], 4.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        let dist = Array2::<f64>::zeros((3, 2));
        assert!(KnnGraph::from_distance_matrix(&dist, &args(1, false)).is_err());
        let dist = Array2::<f64>::zeros((1, 1));
        assert!(KnnGraph::from_distance_matrix(&dist, &args(1, false)).is_err());
    }

    #[test]
    fn test_create_jobs_helper() {
        let jobs = create_jobs(10, 3);
        assert_eq!(jobs, vec![(0, 3), (3, 6), (6, 9), (9, 10)]);

        let jobs = create_jobs(1, 100);
        assert_eq!(jobs, vec![(0, 1)]);

        // block_size=0 should fall back to DEFAULT_BLOCK_SIZE
        let jobs = create_jobs(5, 0);
        assert_eq!(jobs, vec![(0, 5)]);
    }
}
