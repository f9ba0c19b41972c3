//! finstream-model: the financial analysis message shared by producer and consumer.
//!
//! Every optional attribute is a [`Nullable`], so "not computed" (absent),
//! explicit null and zero stay distinct through encode/decode.

pub mod error;
pub mod instrument;
pub mod message;
pub mod nullable;
pub mod validate;

pub use error::SchemaViolation;
pub use instrument::{InstrumentError, InstrumentReference, InstrumentRiskMetric};
pub use message::{decode, encode, AnalysisMessage, DataItem, InstrumentItem, GROUP_NAMES, INSTRUMENT_TYPE};
pub use nullable::Nullable;
pub use validate::validate;
