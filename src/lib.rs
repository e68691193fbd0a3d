//! Client side of a resumable extraction job protocol
//!
//! A [`job::JobDriver`] sends job requests to a remote handler, performs the
//! HTTP tasks the handler asks for, and feeds the results back until the job
//! completes or fails. Session state, cookies and failures are kept in the
//! collaborators under [`storage`].

pub mod cli;
pub mod job;
pub mod storage;
pub mod transport;
pub mod utils;
