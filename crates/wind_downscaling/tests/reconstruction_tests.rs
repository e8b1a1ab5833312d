#[cfg(test)]
mod reconstruction {
    use std::cell::Cell;

    use burn::{
        backend::NdArray,
        tensor::{Distribution, Tensor, TensorData},
    };
    use wind_downscaling::{
        data::raster::Raster,
        network::Downscaler,
        tiling::{BorderStrategy, ReconstructionConfig, predict_tiles, reconstruct_map},
    };

    type MyBackend = NdArray<f32>;

    /// Returns the first two input channels, ignoring any noise.
    struct Passthrough;

    impl Downscaler<MyBackend> for Passthrough {
        fn downscale(&self, low_res: Tensor<MyBackend, 5>) -> Tensor<MyBackend, 5> {
            low_res.narrow(4, 0, 2)
        }
    }

    /// Adds the number of previous calls, so every pass differs.
    struct Counting(Cell<usize>);

    impl Downscaler<MyBackend> for Counting {
        fn downscale(&self, low_res: Tensor<MyBackend, 5>) -> Tensor<MyBackend, 5> {
            let k = self.0.get();
            self.0.set(k + 1);
            low_res.add_scalar(k as f64)
        }
    }

    struct Noisy;

    impl Downscaler<MyBackend> for Noisy {
        fn downscale(&self, low_res: Tensor<MyBackend, 5>) -> Tensor<MyBackend, 5> {
            let noise = Tensor::random(low_res.dims(), Distribution::Normal(0., 1.), &low_res.device());
            low_res + noise
        }
    }

    fn tiles() -> Tensor<MyBackend, 5> {
        let values: Vec<f32> = (0..2 * 2 * 4 * 4 * 2).map(|v| (v % 13) as f32).collect();
        Tensor::from_data(TensorData::new(values, [2, 2, 4, 4, 2]), &Default::default())
    }

    fn values(t: Tensor<MyBackend, 5>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn single_member_ensemble_equals_single_pass() {
        let single = predict_tiles(tiles(), &Counting(Cell::new(0)), None).unwrap();
        assert!(single.std.is_none());

        let ensemble = predict_tiles(tiles(), &Counting(Cell::new(0)), Some(1)).unwrap();
        assert_eq!(values(ensemble.mean), values(single.mean));
        assert!(values(ensemble.std.unwrap()).iter().all(|s| *s == 0.));
    }

    #[test]
    fn ensemble_reduces_to_mean_and_population_std() {
        let counting = Counting(Cell::new(0));
        let prediction = predict_tiles(tiles(), &counting, Some(3)).unwrap();
        assert_eq!(counting.0.get(), 3);
        // members are x, x + 1, x + 2
        let expected: Vec<f32> = values(tiles()).iter().map(|v| v + 1.).collect();
        for (m, e) in values(prediction.mean).iter().zip(expected) {
            assert!((m - e).abs() < 1e-5);
        }
        let std = (2f32 / 3.).sqrt();
        for s in values(prediction.std.unwrap()) {
            assert!((s - std).abs() < 1e-4);
        }
    }

    #[test]
    fn noise_invariant_downscaler_has_zero_spread() {
        let prediction = predict_tiles(tiles(), &Passthrough, Some(5)).unwrap();
        assert!(values(prediction.std.unwrap()).iter().all(|s| *s == 0.));
    }

    #[test]
    fn noisy_downscaler_has_positive_spread() {
        let prediction = predict_tiles(tiles(), &Noisy, Some(8)).unwrap();
        let std = values(prediction.std.unwrap());
        assert!(std.iter().all(|s| *s >= 0.));
        assert!(std.iter().any(|s| *s > 0.));
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        assert!(predict_tiles(tiles(), &Passthrough, Some(0)).is_err());
    }

    fn raster(nt: usize, ny: usize, nx: usize) -> Raster {
        let n = nt * ny * nx;
        Raster::new(
            (0..nx).map(|v| 600_000. + 1_000. * v as f64).collect(),
            (0..ny).map(|v| 100_000. + 1_000. * v as f64).collect(),
            (0..nt as i64).map(|t| t * 3600).collect(),
        )
        .with_variable("u", (0..n).map(|v| (v % 17) as f32).collect())
        .unwrap()
        .with_variable("v", (0..n).map(|v| (v % 5) as f32 - 2.).collect())
        .unwrap()
    }

    #[test]
    fn overlap_map_covers_every_pixel() {
        let r = raster(4, 10, 9);
        let config = ReconstructionConfig::new()
            .with_tile_size(4)
            .with_steps_per_tile(2)
            .with_border_strategy(BorderStrategy::Overlap);
        let map = reconstruct_map(
            &r,
            &["u", "v"],
            &["u10", "v10"],
            &Passthrough,
            &config,
            &Default::default(),
        )
        .unwrap();
        assert!(map.std.is_none());
        assert_eq!(map.mean.x, r.x);
        assert_eq!(map.mean.y, r.y);
        assert_eq!(map.mean.time, r.time);
        assert!(map.mean.variable("u10").unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn crop_map_is_a_subset_with_ensemble_spread() {
        let r = raster(5, 10, 9);
        let config = ReconstructionConfig::new()
            .with_tile_size(4)
            .with_steps_per_tile(2)
            .with_ensemble_size(Some(3));
        let map = reconstruct_map(
            &r,
            &["u", "v"],
            &["u10", "v10"],
            &Passthrough,
            &config,
            &Default::default(),
        )
        .unwrap();
        assert_eq!(map.mean.dims(), (4, 8, 8));
        assert_eq!(map.mean.x, r.x[..8].to_vec());
        assert_eq!(map.mean.y, r.y[..8].to_vec());
        let std = map.std.unwrap();
        assert!(std.variable("v10").unwrap().iter().all(|s| *s == 0.));
    }
}
