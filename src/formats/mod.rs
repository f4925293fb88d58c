pub mod cnmt;
pub mod hfs0;
pub mod keys;
pub mod keyset;
pub mod nacp;
pub mod nca;
pub mod ncz;
pub mod pfs0;
pub mod romfs;
pub mod ticket;
pub mod xci;

pub use cnmt::Cnmt;
pub use keys::TitleKeys;
pub use keyset::Keyset;
pub use nca::Nca;
