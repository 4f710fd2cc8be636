// src/ipc/mod.rs

//! Status protocol spoken by worker processes.

pub mod protocol;

pub use protocol::{
    encode_line, parse_line, Line, MessageType, ProtocolError, WorkerEnvelope, WorkerMessage,
};
