//! Automatic USB input passthrough following the active display.
//!
//! While the host display is connected, the operator uses the host; when
//! it disconnects (the guest GPU took over) keyboards and mice are handed
//! to the VM, and taken back when it reconnects.

use std::time::Duration;

use asec_eaas::models::DeviceInfo;
use asec_eaas::{DeviceControl, EaasApiError};
use tokio_util::sync::CancellationToken;

use super::display::DisplayProbe;
use crate::log::JobLog;

/// Poll `display` every `interval` until `stop` fires, sending connect
/// or disconnect commands for input devices on every state change.
///
/// The display is assumed connected initially. Returns how many command
/// batches were sent.
pub async fn run_usb_passthrough(
    control: &dyn DeviceControl,
    display: &dyn DisplayProbe,
    display_name: &str,
    interval: Duration,
    log: &JobLog,
    stop: &CancellationToken,
) -> Result<u32, EaasApiError> {
    let devices: Vec<DeviceInfo> = control
        .device_infos()
        .await?
        .into_iter()
        .filter(DeviceInfo::is_input_device)
        .collect();
    log.line(format!("Tracking {} input devices.", devices.len()))
        .await;

    let mut last_connected = true;
    let mut batches = 0;

    while !stop.is_cancelled() {
        match display.poll_display_connected(display_name).await {
            Ok(connected) if connected != last_connected => {
                log.line("Display connection status changed, running connection commands:")
                    .await;
                for device in &devices {
                    // Connected again: the host takes the device back.
                    let command = if connected {
                        &device.disconnect_command
                    } else {
                        &device.connect_command
                    };
                    log.line(format!("\t{command}")).await;
                    if let Err(e) = control.post_command(command).await {
                        log.line(format!("\tCommand failed: {e}")).await;
                    }
                }
                last_connected = connected;
                batches += 1;
            }
            Ok(_) => {}
            Err(e) => {
                log.line(format!("Failed to poll display {display_name}: {e}"))
                    .await;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.cancelled() => break,
        }
    }

    Ok(batches)
}
