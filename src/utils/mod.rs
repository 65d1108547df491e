pub mod helpers;
pub mod net;
