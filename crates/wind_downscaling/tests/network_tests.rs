#[cfg(test)]
mod network {
    use burn::{backend::NdArray, tensor::{Distribution, Tensor}};
    use wind_downscaling::gan::{
        discriminator::DiscriminatorConfig,
        generator::GeneratorConfig,
        model::{DownscalingGanConfig, ModelError},
    };

    type MyBackend = NdArray<f32>;

    fn field(dims: [usize; 5]) -> Tensor<MyBackend, 5> {
        Tensor::random(dims, Distribution::Normal(0., 1.), &Default::default())
    }

    #[test]
    fn generator_keeps_tile_shape() {
        let device = Default::default();
        let generator = GeneratorConfig::new(8, 3, 2, 2, 2)
            .with_feature_channels(8)
            .init::<MyBackend>(&device)
            .unwrap();
        let out = generator.forward(field([2, 2, 8, 8, 3]), Some(field([2, 2, 8, 8, 2])));
        assert_eq!(out.dims(), [2, 2, 8, 8, 2]);
    }

    #[test]
    fn generator_without_noise() {
        let device = Default::default();
        let generator = GeneratorConfig::new(8, 3, 0, 2, 3)
            .with_feature_channels(16)
            .init::<MyBackend>(&device)
            .unwrap();
        let out = generator.forward(field([1, 3, 8, 8, 3]), None);
        assert_eq!(out.dims(), [1, 3, 8, 8, 2]);
    }

    #[test]
    fn generator_rejects_bad_sizes() {
        let device = Default::default();
        assert!(matches!(
            GeneratorConfig::new(10, 3, 2, 2, 2).init::<MyBackend>(&device),
            Err(ModelError::InvalidImageSize(10))
        ));
        assert!(matches!(
            GeneratorConfig::new(8, 3, 2, 2, 2)
                .with_feature_channels(12)
                .init::<MyBackend>(&device),
            Err(ModelError::InvalidFeatureChannels(12))
        ));
    }

    #[test]
    fn discriminator_scores_each_sample() {
        let device = Default::default();
        let discriminator = DiscriminatorConfig::new(8, 8, 3, 2, 2)
            .with_feature_channels(4)
            .with_max_channels(8)
            .init::<MyBackend>(&device)
            .unwrap();
        let score = discriminator.forward(field([3, 2, 8, 8, 3]), field([3, 2, 8, 8, 2]));
        assert_eq!(score.dims(), [3, 1]);
    }

    #[test]
    fn discriminator_rejects_mismatched_sizes_at_construction() {
        let device = Default::default();
        let err = DiscriminatorConfig::new(16, 128, 3, 2, 2)
            .init::<MyBackend>(&device)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::ShapeMismatch {
                low_res: 16,
                high_res: 128
            }
        ));
        assert!(err.to_string().contains("same size"));
    }

    #[test]
    fn gan_config_checks_both_halves_agree() {
        let device = Default::default();
        let mut config = DownscalingGanConfig::for_tiles(8, 2, 3, 2, 2);
        config.discriminator.timesteps = 4;
        assert!(matches!(
            config.init::<MyBackend>(&device),
            Err(ModelError::Incompatible { what: "time steps", .. })
        ));
    }
}
