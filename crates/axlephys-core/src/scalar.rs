/// Simulation scalar. The whole engine is written against this alias.
pub type Scalar = f32;
