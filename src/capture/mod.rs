pub mod capture_loop;
pub mod configure;
pub mod connection;
pub mod frame;
pub mod property;
pub mod report;

pub use capture_loop::{CaptureExit, CaptureLoop};
pub use configure::{default_profile, Setting, SettingValue};
pub use connection::{Connection, Session};
pub use frame::Frame;
pub use frame::PixelFormat;
pub use property::Properties;
