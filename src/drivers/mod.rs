pub mod flash;

pub use flash::{AppFlash, FlashControl, FlashError, FlashProgrammer, Sector, SectorLayout};
