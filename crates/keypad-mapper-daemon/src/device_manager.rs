//! Grabbed keyboards and their event readers
//!
//! Every grabbed keyboard gets one tokio task that reads its evdev event
//! stream and routes each event through the shared dispatcher. Grabbing means
//! the rest of the system no longer sees the keyboard, so whatever the
//! dispatcher does not consume is re-emitted on the virtual keyboard.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use evdev::{Device, EventType, InputEvent};
use tokio::task::JoinHandle;

use crate::device::DeviceInfo;
use crate::dispatcher::{KeyEvent, RemapDispatcher, SharedDispatcher};
use crate::injector::{EventForwarder, SyntheticInputEmitter};
use crate::ipc::DeviceStatus;

/// A keyboard held for exclusive access
struct GrabbedDevice {
    device: Device,
    info: DeviceInfo,
}

/// Owns grabbed keyboards until their readers are started.
#[derive(Default)]
pub struct DeviceManager {
    grabbed_devices: BTreeMap<PathBuf, GrabbedDevice>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grabbed_count(&self) -> usize {
        self.grabbed_devices.len()
    }

    /// Open and grab the device described by `info`.
    pub fn try_grab_device(&mut self, info: &DeviceInfo) -> Result<()> {
        let mut device = Device::open(&info.path)
            .with_context(|| format!("Failed to open device at {}", info.path.display()))?;

        device.grab().with_context(|| {
            format!(
                "Failed to grab device '{}' for exclusive access. \
                 Is another application using this device?",
                info.name
            )
        })?;

        tracing::info!("Grabbed '{}' at {}", info.name, info.path.display());

        self.grabbed_devices.insert(
            info.path.clone(),
            GrabbedDevice {
                device,
                info: info.clone(),
            },
        );
        Ok(())
    }

    /// Grab each device, logging the ones that fail. Returns how many were grabbed.
    pub fn grab_all<'a>(&mut self, devices: impl IntoIterator<Item = &'a DeviceInfo>) -> usize {
        let mut grabbed = 0;
        for info in devices {
            match self.try_grab_device(info) {
                Ok(()) => grabbed += 1,
                Err(e) => tracing::warn!("{:#}", e),
            }
        }
        grabbed
    }

    /// Status entries for the control socket
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        self.grabbed_devices
            .values()
            .map(|g| DeviceStatus {
                name: g.info.name.clone(),
                path: g.info.path.clone(),
            })
            .collect()
    }

    /// Start one reader task per grabbed device, handing the devices over.
    pub fn spawn_readers(&mut self, dispatcher: SharedDispatcher) -> Result<Vec<JoinHandle<()>>> {
        let grabbed_devices = std::mem::take(&mut self.grabbed_devices);
        let mut handles = Vec::with_capacity(grabbed_devices.len());

        for (path, GrabbedDevice { device, info }) in grabbed_devices {
            let stream = device.into_event_stream().with_context(|| {
                format!(
                    "Failed to create event stream for device '{}' at {}",
                    info.name,
                    path.display()
                )
            })?;
            handles.push(tokio::spawn(read_events(
                stream,
                info,
                dispatcher.clone(),
            )));
        }

        tracing::debug!("Started {} device reader(s)", handles.len());
        Ok(handles)
    }
}

async fn read_events(mut stream: evdev::EventStream, info: DeviceInfo, dispatcher: SharedDispatcher) {
    loop {
        match stream.next_event().await {
            Ok(event) => {
                let mut dispatcher = dispatcher.lock().await;
                route_event(&mut dispatcher, event);
            }
            Err(e) => {
                tracing::warn!(
                    "Stopped reading '{}' at {}: {}",
                    info.name,
                    info.path.display(),
                    e
                );
                return;
            }
        }
    }
}

/// Send one raw event through the dispatcher, re-emitting it if not consumed.
///
/// SYN reports are dropped because every emit carries its own; non-key events
/// are dropped because the virtual keyboard only declares keys.
pub fn route_event<E>(dispatcher: &mut RemapDispatcher<E>, event: InputEvent)
where
    E: SyntheticInputEmitter + EventForwarder,
{
    if event.event_type() != EventType::KEY {
        return;
    }

    if let Some(key_event) = KeyEvent::from_input_event(&event) {
        if dispatcher.handle(key_event) {
            return;
        }
    }

    if let Some(emitter) = dispatcher.emitter_mut() {
        if let Err(e) = emitter.forward(event) {
            tracing::warn!("Failed to pass through key {}: {}", event.code(), e);
        }
    }
}
