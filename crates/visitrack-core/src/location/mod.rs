mod fix;
pub mod replay;
pub mod sampler;

pub use fix::LocationFix;
pub use replay::{ReplayEnd, ReplayPoint, ReplayProvider};
pub use sampler::{FixStream, LocationProvider, LocationRequest, LocationSampler, Priority};
