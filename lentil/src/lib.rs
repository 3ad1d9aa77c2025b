pub mod accuracy; // per-gene Pearson and the results log
pub mod cost; // expression, location and marker costs
pub mod data;
pub mod distribution;
pub mod error;
pub mod gromov; // adjusted Gromov-Wasserstein coupling
pub mod grid;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod projection;
pub mod sinkhorn; // entropic transport between two marginals
