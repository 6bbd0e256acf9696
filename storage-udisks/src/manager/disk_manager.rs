// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;

use anyhow::Result;
use futures::StreamExt;
use futures::stream::Stream;
use futures::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::{
    Connection,
    zvariant::{self, Value},
};
use zbus_macros::proxy;

use crate::error::DiskError;

const BLOCK_IFACE: &str = "org.freedesktop.UDisks2.Block";
const FILESYSTEM_IFACE: &str = "org.freedesktop.UDisks2.Filesystem";

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    default_path = "/org/freedesktop/UDisks2/Manager",
    interface = "org.freedesktop.UDisks2.Manager"
)]
pub trait UDisks2Manager {
    fn get_block_devices(
        &self,
        options: HashMap<String, Value<'_>>,
    ) -> zbus::Result<Vec<zvariant::OwnedObjectPath>>;
}

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    default_path = "/org/freedesktop/UDisks2",
    interface = "org.freedesktop.DBus.ObjectManager"
)]
pub trait UDisks2ObjectManager {
    #[zbus(signal)]
    fn interfaces_added(
        &self,
        object_path: zvariant::OwnedObjectPath,
        interfaces_and_properties: HashMap<String, HashMap<String, zvariant::OwnedValue>>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn interfaces_removed(
        &self,
        object_path: zvariant::OwnedObjectPath,
        interfaces: Vec<String>,
    ) -> zbus::Result<()>;
}

/// Shared handle to the UDisks2 system bus connection
#[derive(Clone)]
pub struct DiskManager {
    connection: Connection,
}

/// A block device or filesystem interface appeared or went away
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Added(String),
    Removed(String),
}

pub struct DeviceEventStream {
    receiver: mpsc::Receiver<DeviceEvent>,
}

impl DiskManager {
    /// Connect to the system bus, where UDisks2 lives.
    pub async fn new() -> Result<Self, DiskError> {
        let connection = Connection::system()
            .await
            .map_err(|e| DiskError::ConnectionFailed(format!("system bus: {e}")))?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Block device and filesystem appearances and removals.
    ///
    /// Listens to `org.freedesktop.DBus.ObjectManager` on the UDisks2 root
    /// object. Mount point changes on an existing filesystem arrive as
    /// property changes and are not reported here.
    pub async fn device_event_stream_signals(&self) -> Result<DeviceEventStream> {
        let (sender, receiver) = mpsc::channel(32);

        let object_manager = UDisks2ObjectManagerProxy::new(&self.connection).await?;
        let mut added = object_manager.receive_interfaces_added().await?;
        let mut removed = object_manager.receive_interfaces_removed().await?;

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    signal = added.next() => {
                        let Some(signal) = signal else { break };
                        match signal.args() {
                            Ok(args) => args
                                .interfaces_and_properties
                                .keys()
                                .any(|name| is_volume_interface(name))
                                .then(|| DeviceEvent::Added(args.object_path.to_string())),
                            Err(e) => {
                                warn!("Unparseable InterfacesAdded signal: {e}");
                                None
                            }
                        }
                    }
                    signal = removed.next() => {
                        let Some(signal) = signal else { break };
                        match signal.args() {
                            Ok(args) => args
                                .interfaces
                                .iter()
                                .any(|name| is_volume_interface(name))
                                .then(|| DeviceEvent::Removed(args.object_path.to_string())),
                            Err(e) => {
                                warn!("Unparseable InterfacesRemoved signal: {e}");
                                None
                            }
                        }
                    }
                };

                if let Some(event) = event
                    && sender.send(event).await.is_err()
                {
                    debug!("Device event receiver dropped, stopping signal forwarding");
                    break;
                }
            }
        });

        Ok(DeviceEventStream { receiver })
    }
}

fn is_volume_interface(name: &str) -> bool {
    name == BLOCK_IFACE || name == FILESYSTEM_IFACE
}

impl Stream for DeviceEventStream {
    type Item = DeviceEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
