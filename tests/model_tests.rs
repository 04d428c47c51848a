use ndarray::{Array1, Array3};
use pur_resnet::layers::DenseLayer;
use pur_resnet::{ActivationType, CpuExecutor, Loss, Metric, Model, Optimizer, ResNetNetwork, WeightInit};

fn compile(seed: u64, series_length: usize, dimensions: usize, optimizer: Optimizer) -> Model {
    let network = ResNetNetwork::new(Some(seed)).with_n_feature_maps(4);
    let mut rng = network.rng();
    let (input, backbone) = network.build_network((series_length, dimensions), &mut rng).unwrap();
    let head = DenseLayer::new(
        backbone.output_features(),
        1,
        ActivationType::Linear,
        true,
        WeightInit::GlorotUniform,
        &mut rng,
    );
    Model::compile(input, backbone, head, Loss::MeanSquaredError, optimizer, vec![Metric::MeanSquaredError], rng).unwrap()
}

#[test]
fn test_parameter_count_accuracy() {
    // n_feature_maps = 4, kernels [8, 5, 3], dimensions = 1
    // Block 1 (1 -> 4):  convs 8*1*4+4 + 5*4*4+4 + 3*4*4+4 = 36 + 84 + 52 = 172
    //                    bn gammas/betas 3*8 = 24, shortcut conv 1*4+4 = 8, shortcut bn 8
    //                    total 212
    // Block 2 (4 -> 8):  convs 8*4*8+8 + 5*8*8+8 + 3*8*8+8 = 264 + 328 + 200 = 792
    //                    bn 3*16 = 48, shortcut conv 4*8+8 = 40, shortcut bn 16
    //                    total 896
    // Block 3 (8 -> 8):  convs 8*8*8+8 + 328 + 200 = 520 + 328 + 200 = 1048
    //                    bn 48, shortcut bn 16
    //                    total 1112
    // Head: 8 weights + 1 bias = 9
    let model = compile(0, 16, 1, Optimizer::adam(0.01));
    let expected = 212 + 896 + 1112 + 9;

    println!("{}", model.summary());
    assert_eq!(model.parameter_count(), expected);

    // Moving mean and variance of every batch norm: (4*4) + (4*8) + (4*8) channels
    assert_eq!(model.non_trainable_count(), 2 * (16 + 32 + 32));
}

#[test]
fn test_training_reduces_loss() {
    let mut model = compile(3, 12, 1, Optimizer::adam(0.01));
    let x = Array3::from_shape_fn((16, 12, 1), |(i, t, _)| (i as f32 * 0.1) * ((t as f32) * 0.5).cos());
    let y = Array1::from_shape_fn(16, |i| i as f32 * 0.1);

    let history = model.fit(&x, &y, 8, 30, false, &mut []).unwrap();
    let losses = history.losses();
    println!("losses: {:?}", losses);

    assert_eq!(losses.len(), 30);
    assert!(losses.iter().all(|l| l.is_finite()));
    assert!(losses[losses.len() - 1] < losses[0], "loss did not decrease: {:?}", losses);
}

#[test]
fn test_every_optimizer_trains() {
    let optimizers = vec![Optimizer::adam(0.01), Optimizer::sgd(0.01, 0.9), Optimizer::rmsprop(0.001)];
    let x = Array3::from_shape_fn((6, 10, 2), |(i, t, c)| ((i + t + c) as f32).sin());
    let y = Array1::from_shape_fn(6, |i| i as f32);

    for optimizer in optimizers {
        let name = optimizer.name();
        let mut model = compile(5, 10, 2, optimizer);
        let history = model.fit(&x, &y, 3, 2, false, &mut []).unwrap();
        assert_eq!(history.len(), 2, "optimizer {}", name);
        assert_eq!(model.iterations(), 4, "optimizer {}", name);
    }
}

#[test]
fn test_same_seed_same_history() {
    let x = Array3::from_shape_fn((8, 10, 1), |(i, t, _)| ((i * t) as f32 * 0.1).sin());
    let y = Array1::from_shape_fn(8, |i| i as f32 * 0.5);

    let mut first = compile(11, 10, 1, Optimizer::adam(0.01));
    let mut second = compile(11, 10, 1, Optimizer::adam(0.01));
    let a = first.fit(&x, &y, 3, 3, false, &mut []).unwrap();
    let b = second.fit(&x, &y, 3, 3, false, &mut []).unwrap();

    assert_eq!(a.losses(), b.losses());
    assert_eq!(first.predict(&x, &CpuExecutor).unwrap(), second.predict(&x, &CpuExecutor).unwrap());
}
