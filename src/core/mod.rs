pub mod capture;
pub mod clip;
pub mod config;
pub mod frame_store;
pub mod ledger;
pub mod playback;
pub mod seek;
pub mod session;
pub mod window;
