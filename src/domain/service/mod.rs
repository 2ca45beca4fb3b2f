pub mod admission_policy;

pub use admission_policy::{AdmissionPolicy, RandomSource};
