//! Helpers for driving a session against the scripted stack.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use crate::ble::adapter::RadioState;
use crate::ble::connection::ConnectionState;
use crate::ble::fake::{FakeCentral, FakePeripheral};
use crate::config::SessionConfig;
use crate::session::{MockSessionDelegate, Session};

/// Let every ready task run. Time must be paused.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Defaults with the connect and discovery deadlines disabled.
pub(crate) fn no_deadlines() -> SessionConfig {
    SessionConfig::default()
        .with_connect_timeout(None)
        .with_discovery_timeout(None)
}

/// A delegate that accepts everything and tolerates any callback.
pub(crate) fn delegate() -> MockSessionDelegate {
    let mut delegate = MockSessionDelegate::new();
    delegate.expect_should_connect().returning(|_| true);
    delegate.expect_is_ready().return_const(());
    delegate.expect_did_disconnect().return_const(());
    delegate
}

/// Start a session and take it all the way to `Ready` with peripheral `tx-1`.
pub(crate) async fn ready_session(
    delegate: MockSessionDelegate,
    config: SessionConfig,
) -> (Session<FakeCentral>, FakeCentral, FakePeripheral) {
    let central = FakeCentral::new();
    let session = Session::new(central.clone(), config, Arc::new(delegate));
    session.start().await.unwrap();

    central.radio(RadioState::PoweredOn);
    let peripheral = central.peripheral("tx-1");
    central.discover(&peripheral);
    settle().await;

    assert_eq!(session.state(), ConnectionState::Ready);
    (session, central, peripheral)
}
