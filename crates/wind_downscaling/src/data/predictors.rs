use serde::{Deserialize, Serialize};

pub const TOPO_PREDICTORS: [&str; 3] = ["tpi_500", "slope", "aspect"];
pub const HOMEMADE_PREDICTORS: [&str; 2] = ["w_speed", "w_angle"];
pub const ERA5_SURFACE_PREDICTORS: [&str; 6] = ["u10", "v10", "blh", "fsr", "sp", "sshf"];
pub const ERA5_Z500_PREDICTORS: [&str; 1] = ["z"];
/// COSMO-1 10 m wind components, also used as inputs when training on blurred COSMO.
pub const OUTPUT_VARIABLES: [&str; 2] = ["U_10M", "V_10M"];
/// Output names of a reconstructed map, in generator channel order.
pub const PREDICTED_VARIABLES: [&str; 2] = ["u10", "v10"];

/// Which predictor groups feed the generator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PredictorSet {
    pub topography: bool,
    pub homemade: bool,
    pub cosmo_blurred: bool,
}

impl Default for PredictorSet {
    fn default() -> Self {
        Self {
            topography: true,
            homemade: true,
            cosmo_blurred: false,
        }
    }
}

impl PredictorSet {
    /// Atmospheric predictors only, as used for country-wide maps.
    pub fn atmospheric() -> Self {
        Self {
            topography: false,
            homemade: false,
            cosmo_blurred: false,
        }
    }

    pub fn inputs(&self) -> Vec<String> {
        let mut inputs: Vec<&str> = vec![];
        if self.topography {
            inputs.extend(TOPO_PREDICTORS);
        }
        if self.homemade {
            inputs.extend(HOMEMADE_PREDICTORS);
        }
        if self.cosmo_blurred {
            inputs.extend(OUTPUT_VARIABLES);
        } else {
            inputs.extend(ERA5_Z500_PREDICTORS);
            inputs.extend(ERA5_SURFACE_PREDICTORS);
        }
        inputs.into_iter().map(String::from).collect()
    }

    pub fn outputs(&self) -> Vec<String> {
        OUTPUT_VARIABLES.into_iter().map(String::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_inputs() {
        let inputs = PredictorSet::default().inputs();
        assert_eq!(inputs.len(), 12);
        assert_eq!(inputs[0], "tpi_500");
        assert_eq!(inputs[5], "z");
    }

    #[test]
    fn blurred_inputs_use_cosmo_fields() {
        let set = PredictorSet {
            cosmo_blurred: true,
            ..PredictorSet::atmospheric()
        };
        assert_eq!(set.inputs(), vec!["U_10M".to_string(), "V_10M".to_string()]);
    }
}
