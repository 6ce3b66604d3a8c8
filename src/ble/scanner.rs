//! BLE scanner - discovers nearby hubs.
//!
//! Runs a filtered scan window on the host adapter and returns the
//! peripherals advertising one of the requested services, deduplicated by
//! address and capped at `BLE_MAX_DISCOVERED`.

use std::time::Duration;

use btleplug::api::{Central, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral};
use tracing::{info, warn};
use uuid::Uuid;

use super::gatt_client::backend_error;
use super::DiscoveredDevice;
use crate::config::BLE_MAX_DISCOVERED;
use crate::error::BackendError;

/// Scan for `window` and collect peripherals advertising any of `services`.
pub async fn scan(
    adapter: &Adapter,
    services: &[Uuid],
    window: Duration,
) -> Result<Vec<(Peripheral, DiscoveredDevice)>, BackendError> {
    info!("BLE scan starting ({} s window)", window.as_secs());

    adapter
        .start_scan(ScanFilter {
            services: services.to_vec(),
        })
        .await
        .map_err(backend_error)?;
    tokio::time::sleep(window).await;

    let peripherals = adapter.peripherals().await.map_err(backend_error)?;
    if let Err(e) = adapter.stop_scan().await {
        warn!("Could not stop scan: {}", e);
    }

    let mut candidates = Vec::new();
    for peripheral in peripherals {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };
        // Some platforms ignore the scan filter.
        if !advertises_any(&props.services, services) {
            continue;
        }
        let name = props.local_name.unwrap_or_else(|| "Unknown".into());
        let device = DiscoveredDevice::new(props.address.to_string(), &name, props.rssi);
        candidates.push((peripheral, device));
    }

    let found = retain_unique(candidates);
    info!("BLE scan complete - {} devices found", found.len());
    Ok(found)
}

fn advertises_any(advertised: &[Uuid], wanted: &[Uuid]) -> bool {
    wanted.is_empty() || advertised.iter().any(|uuid| wanted.contains(uuid))
}

/// Keep the first sighting of each address, at most `BLE_MAX_DISCOVERED`.
fn retain_unique<T>(candidates: Vec<(T, DiscoveredDevice)>) -> Vec<(T, DiscoveredDevice)> {
    let mut found: Vec<(T, DiscoveredDevice)> = Vec::new();
    for (handle, device) in candidates {
        if found.len() == BLE_MAX_DISCOVERED {
            break;
        }
        if found.iter().any(|(_, d)| d.address == device.address) {
            continue;
        }
        info!("Found: {} (RSSI {:?})", device.name.as_str(), device.rssi);
        found.push((handle, device));
    }
    found
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn device(address: &str, name: &str) -> ((), DiscoveredDevice) {
        ((), DiscoveredDevice::new(address, name, Some(-60)))
    }

    #[test]
    fn duplicate_addresses_collapse() {
        let found = retain_unique(vec![
            device("AA", "Steer Hub"),
            device("BB", "Drive Hub"),
            device("AA", "Steer Hub (again)"),
        ]);
        let names: Vec<&str> = found.iter().map(|(_, d)| d.name.as_str()).collect();
        assert_eq!(names, vec!["Steer Hub", "Drive Hub"]);
    }

    #[test]
    fn list_is_capped() {
        let many = (0..BLE_MAX_DISCOVERED + 3)
            .map(|i| device(&format!("{:02X}", i), "Hub"))
            .collect();
        assert_eq!(retain_unique(many).len(), BLE_MAX_DISCOVERED);
    }

    #[test]
    fn service_filter() {
        let hub = Uuid::from_u128(1);
        let other = Uuid::from_u128(2);
        assert!(advertises_any(&[other, hub], &[hub]));
        assert!(!advertises_any(&[other], &[hub]));
        assert!(!advertises_any(&[], &[hub]));
        assert!(advertises_any(&[], &[]));
    }
}
