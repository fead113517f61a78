pub(crate) mod command;
pub(crate) mod listen;
pub(crate) mod scan;
pub(crate) mod send;
pub(crate) mod ui;

pub use self::command::{Args, Command, FakeArgs, LogLevel, MidiMessageArg, OutputFormat};
pub use self::listen::{AdvertiseArgs, ListenArgs};
pub use self::scan::ScanArgs;
pub use self::send::SendArgs;
