mod endpoint_view;
mod listen_view;
mod painter;
mod send_view;
mod spinner;
mod table;

pub(crate) use self::endpoint_view::{EndpointListing, EndpointListingView};
pub(crate) use self::listen_view::{AttachEventView, ListenSummaryView, MidiMessageView};
pub(crate) use self::painter::Painter;
pub(crate) use self::send_view::{SendReport, SendReportView};
pub(crate) use self::spinner::Spinner;
