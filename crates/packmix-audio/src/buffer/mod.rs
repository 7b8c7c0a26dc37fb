//! Lock-free buffers shared between the decode worker and the mixer.

pub mod ring;

pub use ring::SampleRing;
