// crates/jamcut-engine/src/lib.rs

pub mod ahead;
pub mod bus;
pub mod clock;
pub mod compositor;
pub mod effect_chain;
pub mod playback;
pub mod player;
pub mod pool;

pub use ahead::{AheadScheduler, SCHEDULE_AHEAD_SECS};
pub use bus::AudioOut;
pub use clock::TransportClock;
pub use compositor::{write_png, CapturedImage, Compositor};
pub use playback::{LoadedClip, PlaybackUnit, UnitState};
pub use player::Player;
pub use pool::{WorkerPool, POOL_CAPACITY};
