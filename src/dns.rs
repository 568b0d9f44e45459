// src/dns.rs

//! Local DNS resolver, as seen by the coordinator.
//!
//! The resolver itself lives elsewhere; the coordinator only starts and
//! closes it through [`DnsServer`].

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;

pub trait DnsServer: Send + Sync + Debug {
    /// Start serving. `previously_started` tells the server whether the last
    /// start attempt succeeded, so it can restart instead of binding twice.
    fn start(
        &self,
        previously_started: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
