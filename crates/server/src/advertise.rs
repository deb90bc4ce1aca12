//! DNS-SD announcement of the publisher, so players on the LAN can find the
//! stream by name.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use thiserror::Error;
use tracing::{info, warn};

pub const HTTP_SERVICE_TYPE: &str = "_http._tcp.local.";

#[derive(Error, Debug)]
pub enum AdvertiseError {
    #[error("mdns: {0}")]
    Mdns(#[from] mdns_sd::Error),
}

/// Announces a named HTTP service and withdraws it again.
pub trait ServiceAdvertiser: Send + Sync {
    /// Returns the registration to pass to [`ServiceAdvertiser::withdraw`].
    fn advertise(&self, name: &str, port: u16) -> Result<String, AdvertiseError>;

    fn withdraw(&self, registration: &str);
}

/// Multicast DNS responder running on its own thread.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    host_name: String,
}

impl MdnsAdvertiser {
    pub fn new() -> Result<Self, AdvertiseError> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
            host_name: local_host_name(),
        })
    }
}

impl ServiceAdvertiser for MdnsAdvertiser {
    fn advertise(&self, name: &str, port: u16) -> Result<String, AdvertiseError> {
        let properties = HashMap::from([("path".to_string(), "/".to_string())]);
        let service = ServiceInfo::new(
            HTTP_SERVICE_TYPE,
            name,
            &self.host_name,
            "",
            port,
            properties,
        )?
        .enable_addr_auto();
        let fullname = service.get_fullname().to_string();
        self.daemon.register(service)?;
        info!(service = %fullname, port, "advertised over mdns");
        Ok(fullname)
    }

    fn withdraw(&self, registration: &str) {
        match self.daemon.unregister(registration) {
            Ok(_) => info!(service = %registration, "mdns advertisement withdrawn"),
            Err(e) => warn!(service = %registration, error = %e, "failed to withdraw mdns advertisement"),
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        let _ = self.daemon.shutdown();
    }
}

fn local_host_name() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .map(|h| h.trim_end_matches('.').trim_end_matches(".local").to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "hlsbridge".to_string());
    format!("{host}.local.")
}
