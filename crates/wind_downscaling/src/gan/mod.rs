pub mod component;
pub mod discriminator;
pub mod generator;
pub mod layout;
pub mod loss;
pub mod model;
pub mod noise;
pub mod recurrent;
pub mod trainer;
pub mod training;
