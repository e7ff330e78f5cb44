//! Test support: mock implementations of the transport seam

pub mod mocks;
