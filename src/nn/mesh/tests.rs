use super::*;
use crate::autograd::{clear_graph, get_grad, no_grad, with_graph};

/// Features whose value names their position: `100 * b + 10 * c + v + 1`.
///
/// Never zero, so a gathered zero always means "sentinel".
fn labeled_features(batch: usize, channels: usize, vertices: usize) -> Tensor {
    let mut data = Vec::with_capacity(batch * channels * vertices);
    for b in 0..batch {
        for c in 0..channels {
            for v in 0..vertices {
                data.push((100 * b + 10 * c + v + 1) as f32);
            }
        }
    }
    Tensor::new(&data, &[batch, channels, vertices])
}

fn label(b: usize, c: usize, v: usize) -> f32 {
    (100 * b + 10 * c + v + 1) as f32
}

/// Path 0 - 1 - 2 - 3 with a ragged last row.
fn path_mesh() -> MeshAdjacency {
    MeshAdjacency::new(vec![vec![1], vec![0, 2], vec![1, 3], vec![2]])
}

fn star_mesh(leaves: usize) -> MeshAdjacency {
    let mut lists = vec![(1..=leaves).collect::<Vec<_>>()];
    lists.extend((0..leaves).map(|_| vec![0]));
    MeshAdjacency::new(lists)
}

fn layer(n_neighbors: i64, order: &str) -> VertexMeshConv {
    VertexMeshConv::from_config(
        VertexConvConfig::new(2, 3)
            .with_n_neighbors(n_neighbors)
            .with_neighbor_order(order)
            .with_seed(42),
    )
    .expect("valid config")
}

// ==================== Construction ====================

#[test]
fn test_new_matches_config_widths() {
    let conv = VertexMeshConv::new(4, 16, true, 6, NeighborOrder::Fixed).unwrap();
    assert_eq!(conv.filter_width(), 7);
    assert_eq!(conv.conv().kernel_size(), (1, 7));
    assert_eq!(conv.conv().weight().shape(), &[16, 4, 1, 7]);
    assert_eq!(conv.num_parameters(), 16 * 4 * 7 + 16);

    let conv = VertexMeshConv::new(4, 16, false, 6, NeighborOrder::from("sum")).unwrap();
    assert_eq!(conv.filter_width(), 2);
    assert_eq!(conv.parameters().len(), 1);

    let conv = VertexMeshConv::new(4, 16, true, 6, NeighborOrder::GaussianC).unwrap();
    assert_eq!(conv.filter_width(), 4);
}

#[test]
fn test_new_rejects_invalid_hyperparameters() {
    assert!(matches!(
        VertexMeshConv::new(4, 8, true, -2, NeighborOrder::Fixed),
        Err(MeshConvError::InvalidHyperparameter { .. })
    ));
    assert!(matches!(
        VertexMeshConv::new(4, 8, true, -1, NeighborOrder::from("sum")),
        Err(MeshConvError::InvalidHyperparameter { .. })
    ));
    assert!(VertexMeshConv::new(0, 8, true, 2, NeighborOrder::Fixed).is_err());
}

#[test]
fn test_seeded_layers_share_weights() {
    let a = layer(3, "fixed");
    let b = layer(3, "fixed");
    assert_eq!(a.conv().weight().data(), b.conv().weight().data());
}

#[test]
fn test_symmetry_operator_is_stored_not_applied() {
    struct Negate;
    impl SymmetryOperator for Negate {
        fn reduce(&self, features: &Tensor) -> Tensor {
            let data: Vec<f32> = features.data().iter().map(|v| -v).collect();
            Tensor::new(&data, features.shape())
        }
    }

    let plain = layer(2, "fixed");
    let hooked = layer(2, "fixed").with_symmetry_operator(Arc::new(Negate));
    assert!(plain.symmetry_operator().is_none());
    assert!(hooked.symmetry_operator().is_some());

    let x = labeled_features(1, 2, 4);
    let meshes = [path_mesh()];
    let y_plain = plain.forward(&x, &meshes).unwrap();
    let y_hooked = hooked.forward(&x, &meshes).unwrap();
    assert_eq!(y_plain.data(), y_hooked.data());
}

#[test]
fn test_debug_hides_tensors() {
    let text = format!("{:?}", layer(2, "fixed"));
    assert!(text.contains("VertexMeshConv"));
    assert!(text.contains("width: 3"));
}

// ==================== Isolated mode ====================

#[test]
fn test_isolated_mode_ignores_adjacency() {
    let conv = layer(0, "fixed");
    assert_eq!(conv.filter_width(), 1);

    let x = labeled_features(1, 2, 4);
    let image = conv.neighborhood_image(&x, &[path_mesh()]).unwrap();
    assert_eq!(image.shape(), &[1, 2, 4, 1]);
    assert_eq!(image.data(), x.data());

    let y_path = conv.forward(&x, &[path_mesh()]).unwrap();
    let y_star = conv.forward(&x, &[star_mesh(3)]).unwrap();
    assert_eq!(y_path.shape(), &[1, 3, 4]);
    assert_eq!(y_path.data(), y_star.data());
}

// ==================== Exact mode ====================

#[test]
fn test_exact_mode_gathers_neighbor_columns() {
    let conv = layer(2, "fixed");
    let mesh = path_mesh();
    let x = labeled_features(1, 2, 4);
    let image = conv.neighborhood_image(&x, &[mesh.clone()]).unwrap();
    assert_eq!(image.shape(), &[1, 2, 4, 3]);

    for c in 0..2 {
        for v in 0..4 {
            assert_eq!(image.at(&[0, c, v, 0]), label(0, c, v));
            for slot in 0..2 {
                let expected = mesh
                    .neighbors(v)
                    .get(slot)
                    .map_or(0.0, |&n| label(0, c, n));
                assert_eq!(image.at(&[0, c, v, slot + 1]), expected, "c={c} v={v} slot={slot}");
            }
        }
    }
}

#[test]
fn test_padding_rows_gather_zeros() {
    let conv = layer(2, "fixed");
    let triangle = MeshAdjacency::from_edges(&[[0, 1], [1, 2], [2, 0]], 3);
    let x = labeled_features(1, 2, 6);
    let image = conv.neighborhood_image(&x, &[triangle]).unwrap();

    for c in 0..2 {
        for v in 3..6 {
            for slot in 0..3 {
                assert_eq!(image.at(&[0, c, v, slot]), 0.0);
            }
        }
        assert_eq!(image.at(&[0, c, 0, 1]), label(0, c, 1));
        assert_eq!(image.at(&[0, c, 0, 2]), label(0, c, 2));
    }
}

#[test]
fn test_out_of_range_neighbors_read_zero() {
    let conv = layer(2, "fixed");
    let mesh = MeshAdjacency::new(vec![vec![5, 1], vec![0]]);
    let x = labeled_features(1, 2, 3);
    let image = conv.neighborhood_image(&x, &[mesh]).unwrap();
    assert_eq!(image.at(&[0, 0, 0, 1]), 0.0);
    assert_eq!(image.at(&[0, 0, 0, 2]), label(0, 0, 1));
}

#[test]
fn test_trailing_singleton_axis_is_squeezed() {
    let conv = layer(2, "fixed");
    let x = labeled_features(1, 2, 4);
    let x4 = x.view(&[1, 2, 4, 1]);
    let y3 = conv.forward(&x, &[path_mesh()]).unwrap();
    let y4 = conv.forward(&x4, &[path_mesh()]).unwrap();
    assert_eq!(y4.shape(), &[1, 3, 4]);
    assert_eq!(y3.data(), y4.data());
}

// ==================== Sum mode ====================

#[test]
fn test_sum_mode_adds_true_neighbors() {
    let conv = layer(3, "sum");
    let mesh = path_mesh();
    let x = labeled_features(1, 2, 4);
    let image = conv.neighborhood_image(&x, &[mesh.clone()]).unwrap();
    assert_eq!(image.shape(), &[1, 2, 4, 2]);

    for c in 0..2 {
        for v in 0..4 {
            let expected: f32 = mesh.neighbors(v).iter().map(|&n| label(0, c, n)).sum();
            assert_eq!(image.at(&[0, c, v, 0]), label(0, c, v));
            assert_eq!(image.at(&[0, c, v, 1]), expected);
        }
    }
}

#[test]
fn test_sum_mode_output_shape() {
    let conv = layer(6, "sum");
    let x = labeled_features(2, 2, 7);
    let y = conv.forward(&x, &[star_mesh(6), path_mesh()]).unwrap();
    assert_eq!(y.shape(), &[2, 3, 7]);
}

// ==================== Average mode ====================

#[test]
fn test_average_mode_means_all_neighbors() {
    let conv = layer(-1, "fixed");
    assert_eq!(conv.filter_width(), 2);

    let mesh = star_mesh(5);
    let x = labeled_features(1, 2, 8);
    let image = conv.neighborhood_image(&x, &[mesh]).unwrap();
    assert_eq!(image.shape(), &[1, 2, 8, 2]);

    for c in 0..2 {
        let hub_mean = (1..=5).map(|n| label(0, c, n)).sum::<f32>() / 5.0;
        assert!((image.at(&[0, c, 0, 1]) - hub_mean).abs() < 1e-4);
        assert_eq!(image.at(&[0, c, 3, 1]), label(0, c, 0));
        // padded vertices
        assert_eq!(image.at(&[0, c, 6, 1]), 0.0);
        assert_eq!(image.at(&[0, c, 7, 1]), 0.0);
        assert_eq!(image.at(&[0, c, 7, 0]), label(0, c, 7));
    }
}

#[test]
fn test_average_mode_isolated_vertex_is_zero() {
    let conv = layer(-1, "random");
    let mesh = MeshAdjacency::new(vec![vec![1], vec![0], vec![]]);
    let x = labeled_features(1, 2, 3);
    let image = conv.neighborhood_image(&x, &[mesh]).unwrap();
    assert_eq!(image.at(&[0, 1, 2, 1]), 0.0);
    assert_eq!(image.at(&[0, 1, 0, 1]), label(0, 1, 1));
}

// ==================== Random mode ====================

#[test]
fn test_random_mode_draws_true_neighbors_without_replacement() {
    let conv = layer(3, "random");
    let mesh = star_mesh(6);
    let x = labeled_features(1, 2, 7);

    for _ in 0..25 {
        let image = conv.neighborhood_image(&x, &[mesh.clone()]).unwrap();
        let hub: Vec<f32> = (1..4).map(|slot| image.at(&[0, 0, 0, slot])).collect();
        let allowed: Vec<f32> = (1..=6).map(|n| label(0, 0, n)).collect();
        assert!(hub.iter().all(|v| allowed.contains(v)), "hub slots {hub:?}");
        assert!(hub[0] != hub[1] && hub[1] != hub[2] && hub[0] != hub[2]);

        // leaves have one neighbor: the hub then sentinels
        assert_eq!(image.at(&[0, 0, 4, 1]), label(0, 0, 0));
        assert_eq!(image.at(&[0, 0, 4, 2]), 0.0);
        assert_eq!(image.at(&[0, 0, 4, 3]), 0.0);
    }
}

#[test]
fn test_random_mode_takes_all_when_degree_equals_k() {
    let conv = layer(2, "random");
    let mesh = path_mesh();
    let x = labeled_features(1, 2, 4);
    let image = conv.neighborhood_image(&x, &[mesh]).unwrap();
    assert_eq!(image.at(&[0, 0, 1, 1]), label(0, 0, 0));
    assert_eq!(image.at(&[0, 0, 1, 2]), label(0, 0, 2));
}

#[test]
fn test_random_sum_samples_before_summing() {
    let conv = layer(2, "random_sum");
    let mesh = star_mesh(4);
    let x = labeled_features(1, 2, 5);
    let leaves: Vec<f32> = (1..=4).map(|n| label(0, 0, n)).collect();

    let image = conv.neighborhood_image(&x, &[mesh]).unwrap();
    let hub_sum = image.at(&[0, 0, 0, 1]);
    let is_pair_sum = (0..4).any(|i| (i + 1..4).any(|j| leaves[i] + leaves[j] == hub_sum));
    assert!(is_pair_sum, "hub sum {hub_sum} is not a sum of two leaves");
}

// ==================== Aggregate orders ====================

#[test]
fn test_aggregate_without_builder_requires_width_four() {
    let x = labeled_features(1, 2, 4);

    let conv = layer(2, "mean_c");
    assert!(matches!(
        conv.forward(&x, &[path_mesh()]),
        Err(MeshConvError::DimensionMismatch { .. })
    ));

    let conv = layer(3, "median_d");
    let y = conv.forward(&x, &[path_mesh()]).unwrap();
    assert_eq!(y.shape(), &[1, 3, 4]);
}

#[test]
fn test_aggregate_uses_statistics_builder() {
    struct SelfAndMoments;
    impl NeighborhoodStatistics for SelfAndMoments {
        fn build(&self, gathered: &Tensor, _order: &NeighborOrder) -> Result<Tensor> {
            let slots = gathered.shape()[3];
            let own = gathered.narrow(3, 0, 1);
            let total = gathered.narrow(3, 1, slots - 1).sum_dim(3, true);
            Ok(Tensor::cat(&[own.clone(), total.clone(), own, total], 3))
        }
    }

    let conv = layer(2, "gaussian_c").with_statistics(Arc::new(SelfAndMoments));
    let x = labeled_features(1, 2, 4);
    let image = conv.neighborhood_image(&x, &[path_mesh()]).unwrap();
    assert_eq!(image.shape(), &[1, 2, 4, 4]);
    assert_eq!(image.at(&[0, 0, 1, 1]), label(0, 0, 0) + label(0, 0, 2));

    let y = conv.forward(&x, &[path_mesh()]).unwrap();
    assert_eq!(y.shape(), &[1, 3, 4]);
}

// ==================== Batching ====================

#[test]
fn test_batch_equals_single_mesh_evaluations() {
    let conv = layer(3, "fixed");
    let meshes = [path_mesh(), star_mesh(5)];
    let x = labeled_features(2, 2, 6);
    let batched = conv.forward(&x, &meshes).unwrap();

    for (b, mesh) in meshes.iter().enumerate() {
        let single_x = x.narrow(0, b, 1);
        let single = conv.forward(&single_x, std::slice::from_ref(mesh)).unwrap();
        let expected = batched.narrow(0, b, 1);
        for (a, e) in single.data().iter().zip(expected.data()) {
            assert!((a - e).abs() < 1e-4, "mesh {b}: {a} vs {e}");
        }
    }
}

#[test]
fn test_gathers_stay_inside_their_mesh() {
    let conv = layer(2, "fixed");
    let x = labeled_features(3, 2, 4);
    let meshes = [path_mesh(), path_mesh(), path_mesh()];
    let image = conv.neighborhood_image(&x, &meshes).unwrap();

    for b in 0..3 {
        for v in 0..4 {
            for slot in 0..3 {
                let value = image.at(&[b, 1, v, slot]);
                let owner = ((value - 1.0) / 100.0).floor() as usize;
                assert!(value == 0.0 || owner == b, "b={b} v={v} slot={slot} read {value}");
            }
        }
    }
}

#[test]
fn test_dyn_adjacency_batch() {
    let conv = layer(2, "fixed");
    let path = path_mesh();
    let star = star_mesh(3);
    let meshes: Vec<&dyn VertexAdjacency> = vec![&path, &star];
    let y = conv.forward(&labeled_features(2, 2, 4), &meshes).unwrap();
    assert_eq!(y.shape(), &[2, 3, 4]);
}

#[test]
fn test_zero_vertex_axis_returns_empty_output() {
    let x = Tensor::zeros(&[2, 2, 0]);
    let meshes = [MeshAdjacency::default(), MeshAdjacency::new(vec![])];

    for (n_neighbors, order) in [(0, "fixed"), (-1, "fixed"), (3, "fixed"), (3, "random"), (4, "sum")] {
        let conv = layer(n_neighbors, order);
        let y = conv.forward(&x, &meshes).unwrap();
        assert_eq!(y.shape(), &[2, 3, 0], "n_neighbors={n_neighbors} order={order}");
    }

    let x4 = Tensor::zeros(&[1, 2, 0, 1]);
    let y = layer(2, "fixed").forward(&x4, &[MeshAdjacency::default()]).unwrap();
    assert_eq!(y.shape(), &[1, 3, 0]);
}

#[test]
fn test_zero_vertex_axis_still_validates() {
    let conv = layer(2, "fixed");
    let x = Tensor::zeros(&[1, 2, 0]);
    let triangle = MeshAdjacency::from_edges(&[[0, 1], [1, 2], [2, 0]], 3);
    assert!(matches!(
        conv.forward(&x, &[triangle]),
        Err(MeshConvError::VertexOverflow { .. })
    ));
    assert!(matches!(
        conv.forward(&Tensor::zeros(&[1, 5, 0]), &[MeshAdjacency::default()]),
        Err(MeshConvError::DimensionMismatch { .. })
    ));
}

// ==================== Errors ====================

#[test]
fn test_forward_rejects_bad_rank() {
    let conv = layer(2, "fixed");
    let x = Tensor::zeros(&[2, 4]);
    assert!(matches!(
        conv.forward(&x, &[path_mesh()]),
        Err(MeshConvError::DimensionMismatch { .. })
    ));
    let x = Tensor::zeros(&[1, 2, 4, 3]);
    assert!(conv.forward(&x, &[path_mesh()]).is_err());
}

#[test]
fn test_forward_rejects_channel_mismatch() {
    let conv = layer(2, "fixed");
    let x = Tensor::zeros(&[1, 5, 4]);
    assert!(matches!(
        conv.forward(&x, &[path_mesh()]),
        Err(MeshConvError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_forward_rejects_batch_mismatch() {
    let conv = layer(2, "fixed");
    let x = Tensor::zeros(&[2, 2, 4]);
    match conv.forward(&x, &[path_mesh()]) {
        Err(MeshConvError::BatchMismatch { features, meshes }) => {
            assert_eq!((features, meshes), (2, 1));
        }
        other => panic!("expected batch mismatch, got {other:?}"),
    }
}

#[test]
fn test_forward_rejects_vertex_overflow() {
    let conv = layer(2, "fixed");
    let x = Tensor::zeros(&[2, 2, 4]);
    match conv.forward(&x, &[path_mesh(), star_mesh(5)]) {
        Err(MeshConvError::VertexOverflow {
            mesh,
            vertices,
            max_vertices,
        }) => assert_eq!((mesh, vertices, max_vertices), (1, 6, 4)),
        other => panic!("expected vertex overflow, got {other:?}"),
    }
}

// ==================== Gradients ====================

#[test]
fn test_input_gradient_counts_neighbor_uses() {
    let mut conv = VertexMeshConv::new(1, 1, false, 2, NeighborOrder::Fixed).unwrap();
    conv.conv_mut()
        .set_weight(Tensor::ones(&[1, 1, 1, 3]).requires_grad());

    // vertex 4 is padding
    let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0], &[1, 1, 5]).requires_grad();
    clear_graph();
    let y = conv.forward(&x, &[path_mesh()]).unwrap();
    y.sum().backward();

    // self use plus appearances in other rows' first two slots
    let grad = get_grad(x.id()).expect("input gradient");
    assert_eq!(grad.data(), &[2.0, 3.0, 3.0, 2.0, 0.0]);
}

#[test]
fn test_tape_grows_per_forward_until_cleared() {
    let conv = layer(2, "fixed");
    let x = labeled_features(1, 2, 4);
    let meshes = [path_mesh()];

    clear_graph();
    let _ = conv.forward(&x, &meshes).unwrap();
    let once = with_graph(|graph| graph.len());
    assert!(once > 0);
    let _ = conv.forward(&x, &meshes).unwrap();
    assert_eq!(with_graph(|graph| graph.len()), 2 * once);

    clear_graph();
    let y = no_grad(|| conv.forward(&x, &meshes).unwrap());
    assert_eq!(y.shape(), &[1, 3, 4]);
    assert_eq!(with_graph(|graph| graph.len()), 0);
}

#[test]
fn test_weight_gradient_in_average_mode() {
    let conv = VertexMeshConv::from_config(
        VertexConvConfig::new(1, 1)
            .with_n_neighbors(-1)
            .with_seed(5),
    )
    .unwrap();
    let x = Tensor::new(&[2.0, 4.0, 6.0], &[1, 1, 3]).requires_grad();
    let mesh = MeshAdjacency::new(vec![vec![1, 2], vec![0], vec![0]]);

    clear_graph();
    let y = conv.forward(&x, &[mesh]).unwrap();
    y.sum().backward();

    let grad_w = get_grad(conv.conv().weight().id()).expect("weight gradient");
    // slot 0 sums the features, slot 1 sums the neighbor means: 5 + 2 + 2
    assert_eq!(grad_w.data(), &[12.0, 9.0]);
    let grad_b = get_grad(conv.conv().bias().expect("bias").id()).expect("bias gradient");
    assert_eq!(grad_b.data(), &[3.0]);
}
