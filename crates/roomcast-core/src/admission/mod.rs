//! Connection admission
//!
//! Gates run before a connection is registered into a namespace.

mod pipeline;

pub use pipeline::{
    AdmissionContext, AdmissionError, AdmissionPipeline, AdmissionResult, Next,
};
