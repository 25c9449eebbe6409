//! Operations on the connected transmitter.
//!
//! Every operation takes the session's single operation slot, resolves its
//! characteristic from the registry, and settles with whichever comes first:
//! the stack's answer, the deadline, or loss of the link.

use futures::stream::{BoxStream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::adapter::{Central, GattCharacteristic, GattPeripheral, Notification};
use crate::ble::uuids::CharacteristicId;
use crate::error::{Error, Result};
use crate::session::Session;

type Handle<C> = <<C as Central>::Peripheral as GattPeripheral>::Characteristic;

impl<C: Central> Session<C> {
    /// Write `value` to a characteristic without requesting a response.
    ///
    /// `timeout` defaults to the configured operation timeout.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`], [`Error::NotDiscovered`], [`Error::Disconnected`],
    /// [`Error::Timeout`], or [`Error::Protocol`] if the stack rejects the write.
    pub async fn write(
        &self,
        value: &[u8],
        characteristic: CharacteristicId,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.exclusive(characteristic, timeout, |peripheral, handle| async move {
            debug!("Writing {} bytes to {}", value.len(), characteristic);
            trace!("Write payload: {:02x?}", value);
            peripheral
                .write(&handle, value, true)
                .await
                .map_err(stack_error)
        })
        .await
    }

    /// Read a characteristic.
    ///
    /// If `expected_first_byte` is given, a payload that starts with any other
    /// byte fails with [`Error::UnexpectedValue`].
    pub async fn read(
        &self,
        characteristic: CharacteristicId,
        expected_first_byte: Option<u8>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        self.exclusive(characteristic, timeout, |peripheral, handle| async move {
            debug!("Reading {}", characteristic);
            let value = peripheral.read(&handle).await.map_err(stack_error)?;
            trace!("Read {} from {}: {:02x?}", value.len(), characteristic, value);

            check_first_byte(&value, expected_first_byte)?;
            Ok(value)
        })
        .await
    }

    /// Enable or disable notifications on a characteristic.
    pub async fn set_notify_enabled(
        &self,
        enabled: bool,
        characteristic: CharacteristicId,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.exclusive(characteristic, timeout, |peripheral, handle| async move {
            debug!(
                "{} notifications on {}",
                if enabled { "Enabling" } else { "Disabling" },
                characteristic
            );
            peripheral
                .set_notify(&handle, enabled)
                .await
                .map_err(stack_error)
        })
        .await
    }

    /// Wait for the next notification from a characteristic.
    ///
    /// Notifications from other characteristics are skipped. The first one
    /// from `characteristic` settles the operation, subject to the same
    /// first-byte check as [`read`](Self::read).
    pub async fn wait_for_notification(
        &self,
        characteristic: CharacteristicId,
        expected_first_byte: Option<u8>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        self.exclusive(characteristic, timeout, |peripheral, handle| async move {
            let notifications = peripheral.notifications().await.map_err(stack_error)?;
            debug!("Waiting for notification on {}", characteristic);
            next_notification(notifications, handle.uuid(), expected_first_byte).await
        })
        .await
    }

    /// Write `value`, then wait for the characteristic's next notification.
    ///
    /// The listener is attached before the write is issued, so a reply that
    /// arrives before the write completes is still seen.
    pub async fn write_then_wait_for_notification(
        &self,
        value: &[u8],
        characteristic: CharacteristicId,
        expected_first_byte: Option<u8>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        self.exclusive(characteristic, timeout, |peripheral, handle| async move {
            let notifications = peripheral.notifications().await.map_err(stack_error)?;

            debug!("Writing {} bytes to {} and awaiting reply", value.len(), characteristic);
            trace!("Write payload: {:02x?}", value);
            peripheral
                .write(&handle, value, true)
                .await
                .map_err(stack_error)?;

            next_notification(notifications, handle.uuid(), expected_first_byte).await
        })
        .await
    }

    /// Hold the operation slot for `duration`.
    ///
    /// Other operations fail with [`Error::Busy`] meanwhile. A lost link ends
    /// the wait early with [`Error::Disconnected`], and a `duration` longer
    /// than `timeout` fails with [`Error::Timeout`].
    pub async fn wait(&self, duration: Duration, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.shared.config.default_timeout);
        let disconnected = self.shared.link_lost();

        self.shared
            .gate
            .run_exclusive(timeout, disconnected, async {
                trace!("Waiting {:?}", duration);
                tokio::time::sleep(duration).await;
                Ok(())
            })
            .await
    }

    /// Run `op` against the characteristic's handle while holding the slot.
    async fn exclusive<T, F, Fut>(
        &self,
        characteristic: CharacteristicId,
        timeout: Option<Duration>,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(C::Peripheral, Handle<C>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = timeout.unwrap_or(self.shared.config.default_timeout);
        let disconnected = self.shared.link_lost();
        let shared = &self.shared;

        self.shared
            .gate
            .run_exclusive(timeout, disconnected, async move {
                let handle = shared.registry.read().lookup(characteristic)?;
                let peripheral = shared.peripheral().ok_or(Error::Disconnected)?;
                op(peripheral, handle).await
            })
            .await
    }
}

/// Surface a stack failure as a protocol error.
fn stack_error(error: Error) -> Error {
    match error {
        Error::Protocol { .. } => error,
        other => Error::protocol(other),
    }
}

fn check_first_byte(value: &[u8], expected: Option<u8>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    match value.first() {
        Some(&got) if got == expected => Ok(()),
        Some(&got) => Err(Error::UnexpectedValue { got, expected }),
        None => Err(Error::protocol(format!(
            "empty payload, expected {:#04x}",
            expected
        ))),
    }
}

async fn next_notification(
    mut notifications: BoxStream<'static, Notification>,
    uuid: Uuid,
    expected_first_byte: Option<u8>,
) -> Result<Vec<u8>> {
    while let Some(notification) = notifications.next().await {
        if notification.uuid != uuid {
            continue;
        }

        trace!("Notification from {}: {:02x?}", uuid, notification.value);
        check_first_byte(&notification.value, expected_first_byte)?;
        return Ok(notification.value);
    }

    Err(Error::protocol("notification stream closed"))
}
