//! Periodic serial port enumeration.
//!
//! A [`PortLister`] owns one background task that enumerates ports on a fixed
//! interval, drops entries that are clearly not physical devices, and
//! publishes the result as an immutable [`PortSnapshot`] over a watch channel.
//! Readers never block the poller; they only ever see the latest value.

use super::error::PortError;
use crate::dispatch::invoke_guarded;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serialport::SerialPortType;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Description of one visible port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub path: String,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub pnp_id: Option<String>,
    /// USB vendor id as four lowercase hex digits.
    pub vendor_id: Option<String>,
    /// USB product id as four lowercase hex digits.
    pub product_id: Option<String>,
}

impl PortInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                path: info.port_name,
                manufacturer: usb.manufacturer,
                serial_number: usb.serial_number,
                pnp_id: None,
                vendor_id: Some(format!("{:04x}", usb.vid)),
                product_id: Some(format!("{:04x}", usb.pid)),
            },
            _ => Self::new(info.port_name),
        }
    }
}

/// Source of port listings.
pub trait PortEnumerator: Send + Sync + 'static {
    /// Enumerate the ports currently visible. May block briefly.
    fn enumerate(&self) -> Result<Vec<PortInfo>, PortError>;
}

/// Enumerates the host's ports through the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortEnumerator;

impl PortEnumerator for SystemPortEnumerator {
    fn enumerate(&self) -> Result<Vec<PortInfo>, PortError> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(PortInfo::from)
            .collect())
    }
}

/// Rules for dropping irrelevant entries from a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortFilter {
    /// Paths starting with any of these are skipped (legacy UARTs, pseudo ports).
    pub exclude_path_prefixes: Vec<String>,
    /// Manufacturers containing any of these are skipped (wireless adapters).
    pub exclude_manufacturers: Vec<String>,
}

impl Default for PortFilter {
    fn default() -> Self {
        Self {
            exclude_path_prefixes: vec!["/dev/ttyS".to_string()],
            exclude_manufacturers: vec!["Wireless".to_string()],
        }
    }
}

impl PortFilter {
    /// Whether `port` should appear in listings.
    pub fn accepts(&self, port: &PortInfo) -> bool {
        if self
            .exclude_path_prefixes
            .iter()
            .any(|prefix| port.path.starts_with(prefix.as_str()))
        {
            return false;
        }
        match &port.manufacturer {
            Some(manufacturer) => !self
                .exclude_manufacturers
                .iter()
                .any(|needle| manufacturer.contains(needle.as_str())),
            None => true,
        }
    }
}

/// Result of the most recent enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortSnapshot {
    pub ports: Vec<PortInfo>,
    /// Set when the last enumeration failed; `ports` is then empty.
    pub error: Option<String>,
}

type ListChangeCallback = Arc<dyn Fn(&[PortInfo]) + Send + Sync>;

/// Read-only view of a lister's latest snapshot.
#[derive(Debug, Clone)]
pub struct PortListHandle {
    rx: watch::Receiver<PortSnapshot>,
}

impl PortListHandle {
    pub fn snapshot(&self) -> PortSnapshot {
        self.rx.borrow().clone()
    }

    pub fn ports(&self) -> Vec<PortInfo> {
        self.rx.borrow().ports.clone()
    }
}

/// Background port poller. Dropping it stops the poll task.
pub struct PortLister {
    rx: watch::Receiver<PortSnapshot>,
    on_change: Arc<RwLock<Option<ListChangeCallback>>>,
    task: JoinHandle<()>,
}

impl PortLister {
    /// Start polling `enumerator` every `poll_interval`. The first poll runs
    /// immediately. Must be called from within a Tokio runtime.
    pub fn spawn(
        enumerator: Arc<dyn PortEnumerator>,
        poll_interval: Duration,
        filter: PortFilter,
    ) -> Self {
        let (tx, rx) = watch::channel(PortSnapshot::default());
        let on_change: Arc<RwLock<Option<ListChangeCallback>>> = Arc::new(RwLock::new(None));
        let task = tokio::spawn(poll_ports(
            enumerator,
            poll_interval,
            filter,
            tx,
            Arc::clone(&on_change),
        ));
        Self {
            rx,
            on_change,
            task,
        }
    }

    /// Poll the host's serial ports with the default filter.
    pub fn system(poll_interval: Duration) -> Self {
        Self::spawn(
            Arc::new(SystemPortEnumerator),
            poll_interval,
            PortFilter::default(),
        )
    }

    pub fn handle(&self) -> PortListHandle {
        PortListHandle {
            rx: self.rx.clone(),
        }
    }

    pub fn snapshot(&self) -> PortSnapshot {
        self.rx.borrow().clone()
    }

    pub fn ports(&self) -> Vec<PortInfo> {
        self.rx.borrow().ports.clone()
    }

    /// Receiver notified on every snapshot change, including error changes.
    pub fn subscribe(&self) -> watch::Receiver<PortSnapshot> {
        self.rx.clone()
    }

    /// Register the callback fired when a successful poll yields a port list
    /// different from the previous one. Replaces any earlier callback.
    pub fn on_change<F>(&self, callback: F) -> bool
    where
        F: Fn(&[PortInfo]) + Send + Sync + 'static,
    {
        *self.on_change.write() = Some(Arc::new(callback));
        true
    }

    /// Stop polling. The last snapshot stays readable through handles.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for PortLister {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for PortLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortLister")
            .field("ports", &self.rx.borrow().ports.len())
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

async fn poll_ports(
    enumerator: Arc<dyn PortEnumerator>,
    poll_interval: Duration,
    filter: PortFilter,
    tx: watch::Sender<PortSnapshot>,
    on_change: Arc<RwLock<Option<ListChangeCallback>>>,
) {
    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let source = Arc::clone(&enumerator);
        let result = tokio::task::spawn_blocking(move || source.enumerate())
            .await
            .unwrap_or_else(|e| Err(PortError::io(e.to_string())));

        let next = match result {
            Ok(ports) => PortSnapshot {
                ports: ports.into_iter().filter(|p| filter.accepts(p)).collect(),
                error: None,
            },
            Err(e) => {
                debug!(error = %e, "port enumeration failed");
                PortSnapshot {
                    ports: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        let ports_changed = next.error.is_none() && tx.borrow().ports != next.ports;
        let changed_ports = ports_changed.then(|| next.ports.clone());

        tx.send_if_modified(move |current| {
            let modified = *current != next;
            *current = next;
            modified
        });

        if let Some(ports) = changed_ports {
            debug!(count = ports.len(), "port list changed");
            let callback = on_change.read().clone();
            if let Some(callback) = callback {
                invoke_guarded("list_change", true, || callback(ports.as_slice()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_drops_legacy_and_wireless() {
        let filter = PortFilter::default();

        assert!(!filter.accepts(&PortInfo::new("/dev/ttyS0")));
        assert!(!filter.accepts(
            &PortInfo::new("/dev/rfcomm0").with_manufacturer("Acme Wireless Adapter")
        ));
        assert!(filter.accepts(&PortInfo::new("/dev/ttyUSB0").with_manufacturer("FTDI")));
        assert!(filter.accepts(&PortInfo::new("COM3")));
    }

    #[test]
    fn test_custom_filter() {
        let filter = PortFilter {
            exclude_path_prefixes: vec!["COM1".into()],
            exclude_manufacturers: vec![],
        };

        assert!(!filter.accepts(&PortInfo::new("COM1")));
        assert!(filter.accepts(&PortInfo::new("/dev/ttyS0")));
    }

    #[test]
    fn test_non_usb_info_conversion() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyAMA0".into(),
            port_type: SerialPortType::PciPort,
        };

        let port = PortInfo::from(info);
        assert_eq!(port, PortInfo::new("/dev/ttyAMA0"));
        assert!(port.vendor_id.is_none());
    }
}
