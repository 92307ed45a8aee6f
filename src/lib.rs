#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

extern crate blas_src;

pub mod aggregate;
pub mod agreement;
pub mod baseline;
pub mod config;
pub mod cpet;
pub mod delta;
pub mod error;
pub mod export;
pub mod filter;
pub mod fit;
pub mod resample;
pub mod session;
pub mod study;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;
