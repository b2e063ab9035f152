// Logging must be declared first so `tlog!` is visible to every module below.
#[macro_use]
pub mod logging;

pub mod display_log;
pub mod filter;
pub mod ingest;
pub mod io;
pub mod run_control;
pub mod session;
pub mod settings;
pub mod transmit;
pub mod validate;

#[cfg(feature = "cli")]
mod tui;

pub use display_log::{DisplayLog, DisplayRow, RenderOptions};
pub use filter::{FilterChange, FilterSet, FilterSnapshot};
pub use io::{Frame, FrameFormat, IoError, RawFrame, ReceivedFrame};
pub use run_control::RunState;
pub use session::{Monitor, SessionEvent};
pub use transmit::{SubmitError, TransmitResult};
pub use validate::{parse_byte_list, parse_integer, InputError, ParseError};

#[cfg(feature = "cli")]
pub use tui::run;
