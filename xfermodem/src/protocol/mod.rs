//! Protocol implementations.

pub mod crc;
pub mod xmodem;
pub mod ymodem;
pub mod zmodem;

pub use xmodem::XmodemMachine;
pub use ymodem::YmodemMachine;
pub use zmodem::{ZmodemMachine, detect_zmodem_autostart};
