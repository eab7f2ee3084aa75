//! DTMF detection and the subsystems driven by it.
//!
//! Two detectors feed one event stream: the RFC 2833 telephony-event
//! decoder and the Goertzel in-band detector. Events flow through the
//! [`processor::DtmfProcessor`] (pattern matching and action dispatch) and,
//! when a call is inside a menu, the [`ivr::IvrEngine`]. Music-on-hold
//! shares the same media-sink capability the IVR prompt player uses.

pub mod actions;
pub mod error;
pub mod event;
pub mod inband;
pub mod ivr;
pub mod moh;
pub mod processor;
pub mod rfc2833;
pub mod tone;

pub use actions::{CallActions, MediaSink};
pub use error::{DtmfError, Result};
pub use event::{DtmfEvent, DtmfMethod};
pub use inband::{InbandDetector, InbandDetectorConfig};
pub use ivr::{IvrAction, IvrActionType, IvrEngine, IvrMenu, IvrMenuItem, IvrPrompt, IvrPromptType};
pub use moh::{MusicOnHoldManager, MusicSource, MusicSourceType};
pub use processor::{DtmfAction, DtmfPattern, DtmfProcessor, PatternMatch};
pub use rfc2833::Rfc2833Decoder;
